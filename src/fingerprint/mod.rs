//! Build fingerprints for incremental builds.
//!
//! A fingerprint is a snapshot of every observable input of a builder. If the
//! fingerprint recorded at the last successful run equals the current one,
//! the builder's previous outputs are still valid.
//!
//! Equality is strict: same property names and recursively equal values,
//! with sequences compared element by element in order. The hash is an XOR
//! of per-property hashes. That keeps it independent of how properties were
//! inserted and consistent with equality, at the cost of weaker mixing:
//! fingerprints that swap values between properties can collide. Equality
//! still tells them apart.

pub mod codec;
pub mod dependencies;

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{ErrorKind, PropertyKind, PropertyType, PropertyValue, TypedValue};
use crate::params::{ParamError, ParameterSet};

pub use codec::{CacheEntry, CodecError};
pub use dependencies::{
    Dependencies, MultipleDependencies, NoDependencies, ParametersDependency,
    PropertiesDependency, SourceFilesDependency,
};

/// Error producing a fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("property `{name}` not found on `{source_name}`")]
    PropertyNotFound { source_name: String, name: String },

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error("failed to hash source file {}", path.display())]
    SourceFile {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl FingerprintError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FingerprintError::PropertyNotFound { .. } => ErrorKind::Configuration,
            FingerprintError::Param(e) => e.kind(),
            FingerprintError::SourceFile { .. } => ErrorKind::Io,
        }
    }
}

/// Something that exposes named, typed properties.
///
/// Builders implement this instead of relying on reflection: they list the
/// values that decide whether their outputs are stale.
pub trait PropertySource {
    /// Name used in error messages.
    fn source_name(&self) -> String;

    /// Current value of the named property, if it exists.
    fn property(&self, name: &str) -> Option<TypedValue>;
}

impl PropertySource for BTreeMap<String, TypedValue> {
    fn source_name(&self) -> String {
        "property map".to_string()
    }

    fn property(&self, name: &str) -> Option<TypedValue> {
        self.get(name).cloned()
    }
}

impl PropertySource for ParameterSet {
    fn source_name(&self) -> String {
        format!("{} parameters", self.schema().name())
    }

    fn property(&self, name: &str) -> Option<TypedValue> {
        let def = self.schema().def(name).ok()?;
        let value = self.get_value(name).unwrap_or(PropertyValue::Null);
        Some(TypedValue::new(def.ty.clone(), value))
    }
}

/// Immutable snapshot of named property values, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    properties: BTreeMap<String, TypedValue>,
}

impl Fingerprint {
    /// A fingerprint with no properties.
    pub fn empty() -> Self {
        Fingerprint::default()
    }

    /// Snapshot the given properties of a property source.
    pub fn from_properties<S>(source: &S, names: &[&str]) -> Result<Self, FingerprintError>
    where
        S: PropertySource + ?Sized,
    {
        let mut properties = BTreeMap::new();
        for name in names {
            let value =
                source
                    .property(name)
                    .ok_or_else(|| FingerprintError::PropertyNotFound {
                        source_name: source.source_name(),
                        name: name.to_string(),
                    })?;
            properties.insert(name.to_string(), value);
        }
        Ok(Fingerprint { properties })
    }

    /// Snapshot every resolved property of a parameter set. Properties that
    /// are unspecified along the whole chain are captured as null.
    pub fn from_parameters(params: &ParameterSet) -> Result<Self, FingerprintError> {
        let mut properties = BTreeMap::new();
        for (name, def) in params.schema().defs() {
            let value = match params.get_value(name) {
                Ok(value) => value,
                Err(ParamError::NotSpecified { .. }) => PropertyValue::Null,
                Err(e) => return Err(e.into()),
            };
            properties.insert(name.to_string(), TypedValue::new(def.ty.clone(), value));
        }
        Ok(Fingerprint { properties })
    }

    /// Add a property from a Rust value.
    pub fn with<T: PropertyKind>(self, name: impl Into<String>, value: T) -> Self {
        self.with_typed(name, TypedValue::of(value))
    }

    /// Add a property with an explicit declared type.
    pub fn with_typed(mut self, name: impl Into<String>, value: TypedValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Combine with another fingerprint, prefixing its property names with
    /// `prefix.`.
    pub fn merge_prefixed(mut self, prefix: &str, other: Fingerprint) -> Self {
        for (name, value) in other.properties {
            self.properties.insert(format!("{}.{}", prefix, name), value);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.properties.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Names of properties whose values differ between the two fingerprints,
    /// including properties present on only one side.
    pub fn diff(&self, other: &Fingerprint) -> Vec<String> {
        let mut changed: Vec<String> = self
            .properties
            .iter()
            .filter(|(name, value)| {
                other
                    .properties
                    .get(*name)
                    .map_or(true, |o| o.value != value.value)
            })
            .map(|(name, _)| name.clone())
            .collect();

        changed.extend(
            other
                .properties
                .keys()
                .filter(|name| !self.properties.contains_key(*name))
                .cloned(),
        );
        changed.sort();
        changed
    }

    /// Declared types must be representable for the fingerprint to be
    /// persisted. Returns the first offending property, if any.
    pub(crate) fn first_unencodable(&self) -> Option<(&str, &PropertyType)> {
        self.properties
            .iter()
            .find(|(_, v)| !v.ty.is_encodable())
            .map(|(name, v)| (name.as_str(), &v.ty))
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.properties.len() == other.properties.len()
            && self
                .properties
                .iter()
                .zip(&other.properties)
                .all(|((na, va), (nb, vb))| na == nb && va.value == vb.value)
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut acc = 0u64;
        for (name, entry) in &self.properties {
            let mut h = DefaultHasher::new();
            name.hash(&mut h);
            entry.value.hash(&mut h);
            acc ^= h.finish();
        }
        state.write_u64(acc);
    }
}
