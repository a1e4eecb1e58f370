//! Parameter sets with single-inheritance delegation.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{FromProperty, PropertyKind, PropertyValue};
use crate::params::schema::{ParamDef, ParamSchema};
use crate::params::ParamError;

/// Local state of one property.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParamState {
    /// Never set at this layer.
    #[default]
    Unspecified,
    Specified(PropertyValue),
    /// Explicitly cleared; behaves like `Unspecified` for resolution.
    Cleared,
}

/// A typed, inheritable key/value configuration record.
///
/// Values set locally shadow the parent's, except for merge-enabled sequence
/// properties where the parent's resolved elements come first and local
/// elements are appended when not already present.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    schema: Arc<ParamSchema>,
    local: BTreeMap<String, ParamState>,
    parent: Option<Arc<ParameterSet>>,
}

impl ParameterSet {
    /// Create an empty parameter set without a parent.
    pub fn new(schema: Arc<ParamSchema>) -> Self {
        ParameterSet {
            schema,
            local: BTreeMap::new(),
            parent: None,
        }
    }

    /// A copy of this set's local layer attached to a different parent.
    pub fn with_parent(&self, parent: Arc<ParameterSet>) -> ParameterSet {
        ParameterSet {
            schema: Arc::clone(&self.schema),
            local: self.local.clone(),
            parent: Some(parent),
        }
    }

    /// A copy of this set's local layer with no parent.
    pub fn detached(&self) -> ParameterSet {
        ParameterSet {
            schema: Arc::clone(&self.schema),
            local: self.local.clone(),
            parent: None,
        }
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn parent(&self) -> Option<&ParameterSet> {
        self.parent.as_deref()
    }

    /// Local state of a property.
    pub fn state(&self, name: &str) -> Result<&ParamState, ParamError> {
        self.schema.def(name)?;
        Ok(self.local.get(name).unwrap_or(&ParamState::Unspecified))
    }

    /// Set a typed value at the local layer.
    pub fn set<T: PropertyKind>(&mut self, name: &str, value: T) -> Result<(), ParamError> {
        let def = self.schema.def(name)?;
        if T::property_type() != def.ty {
            return Err(ParamError::TypeMismatch {
                name: name.to_string(),
                expected: def.ty.clone(),
                found: T::property_type().to_string(),
            });
        }
        self.set_value(name, value.into_value())
    }

    /// Set an untyped value at the local layer after checking it against the
    /// declared type. Use `clear` rather than setting null.
    pub fn set_value(&mut self, name: &str, value: PropertyValue) -> Result<(), ParamError> {
        let def = self.schema.def(name)?;
        if !value.conforms_to(&def.ty) {
            return Err(ParamError::TypeMismatch {
                name: name.to_string(),
                expected: def.ty.clone(),
                found: value.kind_name(),
            });
        }
        self.local.insert(name.to_string(), ParamState::Specified(value));
        Ok(())
    }

    /// Clear the local value; inherited values become visible again.
    pub fn clear(&mut self, name: &str) -> Result<(), ParamError> {
        self.schema.def(name)?;
        self.local.insert(name.to_string(), ParamState::Cleared);
        Ok(())
    }

    /// Whether this set or any ancestor specifies the property.
    pub fn is_specified(&self, name: &str) -> bool {
        matches!(self.local.get(name), Some(ParamState::Specified(_)))
            || self
                .parent
                .as_ref()
                .map_or(false, |parent| parent.is_specified(name))
    }

    /// Resolved value of a property.
    pub fn get_value(&self, name: &str) -> Result<PropertyValue, ParamError> {
        let def = self.schema.def(name)?;
        self.resolve(name, def).ok_or_else(|| ParamError::NotSpecified {
            schema: self.schema.name().to_string(),
            name: name.to_string(),
        })
    }

    /// Resolved value of a property as a Rust type.
    pub fn get<T: FromProperty>(&self, name: &str) -> Result<T, ParamError> {
        let def = self.schema.def(name)?;
        if T::property_type() != def.ty {
            return Err(ParamError::TypeMismatch {
                name: name.to_string(),
                expected: def.ty.clone(),
                found: T::property_type().to_string(),
            });
        }

        let value = self.get_value(name)?;
        T::from_value(&value).ok_or_else(|| ParamError::TypeMismatch {
            name: name.to_string(),
            expected: def.ty.clone(),
            found: value.kind_name(),
        })
    }

    /// Resolved value, or `default` when unspecified along the whole chain.
    pub fn get_or<T: FromProperty>(&self, name: &str, default: T) -> Result<T, ParamError> {
        match self.get(name) {
            Err(ParamError::NotSpecified { .. }) => Ok(default),
            other => other,
        }
    }

    fn resolve(&self, name: &str, def: &ParamDef) -> Option<PropertyValue> {
        match self.local.get(name) {
            Some(ParamState::Specified(PropertyValue::Seq(local))) if def.merges() => {
                let inherited = self.inherited(name);
                let base = inherited.as_ref().and_then(|v| v.as_seq()).unwrap_or(&[]);
                Some(PropertyValue::Seq(merge_sequences(base, local)))
            }
            Some(ParamState::Specified(value)) => Some(value.clone()),
            _ => self.inherited(name),
        }
    }

    // Parents built from another schema simply don't contribute properties
    // they don't define.
    fn inherited(&self, name: &str) -> Option<PropertyValue> {
        let parent = self.parent.as_ref()?;
        let def = parent.schema.def(name).ok()?;
        parent.resolve(name, def)
    }
}

/// Ordered union: `base` first, then `local`, dropping repeated values.
fn merge_sequences(base: &[PropertyValue], local: &[PropertyValue]) -> Vec<PropertyValue> {
    let mut merged: Vec<PropertyValue> = Vec::with_capacity(base.len() + local.len());
    for item in base.iter().chain(local) {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}
