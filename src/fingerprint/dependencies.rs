//! Fingerprint sources a builder can declare.
//!
//! A builder rarely has a single input. These small types describe where
//! each part of its fingerprint comes from and can be combined with
//! `MultipleDependencies`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{PropertyType, TypedValue};
use crate::fingerprint::{Fingerprint, FingerprintError, PropertySource};
use crate::params::ParameterSet;
use crate::util::fs::{collect_files, relative_path};
use crate::util::hash::sha256_file;

/// A source of fingerprint properties.
pub trait Dependencies: Send + Sync {
    /// Snapshot the current state of the inputs.
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError>;
}

/// A builder without inputs. Its fingerprint is always empty, so it only
/// re-runs when its outputs disappear.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl Dependencies for NoDependencies {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Ok(Fingerprint::empty())
    }
}

/// Selected properties of a `PropertySource`.
pub struct PropertiesDependency {
    source: Arc<dyn PropertySource + Send + Sync>,
    names: Vec<String>,
}

impl PropertiesDependency {
    pub fn new(
        source: Arc<dyn PropertySource + Send + Sync>,
        names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        PropertiesDependency {
            source,
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl Dependencies for PropertiesDependency {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        Fingerprint::from_properties(self.source.as_ref(), &names)
    }
}

/// Every resolved property of a parameter set.
#[derive(Debug, Clone)]
pub struct ParametersDependency {
    params: Arc<ParameterSet>,
}

impl ParametersDependency {
    pub fn new(params: Arc<ParameterSet>) -> Self {
        ParametersDependency { params }
    }
}

impl Dependencies for ParametersDependency {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Fingerprint::from_parameters(&self.params)
    }
}

/// Contents of a set of source files.
///
/// Directories are expanded recursively. Each file contributes a property
/// named after its path relative to `root` holding the SHA-256 of its
/// contents; a missing file contributes null, so files appearing or
/// disappearing change the fingerprint too.
#[derive(Debug, Clone)]
pub struct SourceFilesDependency {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl SourceFilesDependency {
    pub fn new(root: impl Into<PathBuf>, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let root = root.into();
        let paths = paths
            .into_iter()
            .map(|p| if p.is_absolute() { p } else { root.join(p) })
            .collect();
        SourceFilesDependency { root, paths }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Dependencies for SourceFilesDependency {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        let mut fingerprint = Fingerprint::empty();

        for file in collect_files(&self.paths) {
            let name = relative_path(&self.root, &file)
                .to_string_lossy()
                .replace('\\', "/");

            let value = if file.exists() {
                let hash = sha256_file(&file).map_err(|e| FingerprintError::SourceFile {
                    path: file.clone(),
                    source: e.into(),
                })?;
                TypedValue::of(hash)
            } else {
                TypedValue::null(PropertyType::Str)
            };

            fingerprint = fingerprint.with_typed(name, value);
        }

        tracing::debug!(
            "hashed {} source file(s) under {}",
            fingerprint.len(),
            self.root.display()
        );
        Ok(fingerprint)
    }
}

/// Several named dependencies. Each part's properties are prefixed with its
/// name, so parts cannot shadow each other.
#[derive(Default)]
pub struct MultipleDependencies {
    parts: Vec<(String, Box<dyn Dependencies>)>,
}

impl MultipleDependencies {
    pub fn new() -> Self {
        MultipleDependencies::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        dependency: impl Dependencies + 'static,
    ) -> Self {
        self.parts.push((name.into(), Box::new(dependency)));
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl Dependencies for MultipleDependencies {
    fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        self.parts
            .iter()
            .try_fold(Fingerprint::empty(), |acc, (name, part)| {
                Ok(acc.merge_prefixed(name, part.fingerprint()?))
            })
    }
}
