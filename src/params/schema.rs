//! Parameter schemas: the fixed set of typed properties a parameter set may hold.

use std::collections::BTreeMap;

use crate::core::PropertyType;
use crate::params::ParamError;

/// How a sequence-typed property combines with its inherited value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inheritance {
    /// Parent elements first, then local elements not already present.
    Merge,
    /// The local value replaces the inherited one.
    Override,
}

/// Definition of one property in a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    pub ty: PropertyType,
    pub inheritance: Inheritance,
}

impl ParamDef {
    /// Whether the resolved value merges with the parent's.
    pub fn merges(&self) -> bool {
        self.inheritance == Inheritance::Merge && matches!(self.ty, PropertyType::Seq(_))
    }
}

/// A named set of property definitions.
///
/// ```
/// use cairn::core::PropertyType;
/// use cairn::params::{Inheritance, ParamSchema};
///
/// let schema = ParamSchema::new("compiler")
///     .property("debug", PropertyType::Bool)
///     .sequence("defines", PropertyType::Str, Inheritance::Merge);
/// assert!(schema.contains("defines"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSchema {
    name: String,
    defs: BTreeMap<String, ParamDef>,
}

impl ParamSchema {
    pub fn new(name: impl Into<String>) -> Self {
        ParamSchema {
            name: name.into(),
            defs: BTreeMap::new(),
        }
    }

    /// Add a property whose local value overrides any inherited one.
    pub fn property(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.defs.insert(
            name.into(),
            ParamDef {
                ty,
                inheritance: Inheritance::Override,
            },
        );
        self
    }

    /// Add a sequence property with the given inheritance behaviour.
    pub fn sequence(
        mut self,
        name: impl Into<String>,
        element: PropertyType,
        inheritance: Inheritance,
    ) -> Self {
        self.defs.insert(
            name.into(),
            ParamDef {
                ty: PropertyType::seq(element),
                inheritance,
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// Look up a property definition.
    pub fn def(&self, name: &str) -> Result<&ParamDef, ParamError> {
        self.defs.get(name).ok_or_else(|| ParamError::NotDefined {
            schema: self.name.clone(),
            name: name.to_string(),
        })
    }

    /// Property definitions in name order.
    pub fn defs(&self) -> impl Iterator<Item = (&str, &ParamDef)> {
        self.defs.iter().map(|(name, def)| (name.as_str(), def))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_property() {
        let schema = ParamSchema::new("compiler").property("debug", PropertyType::Bool);
        let err = schema.def("optimize").unwrap_err();
        assert!(matches!(err, ParamError::NotDefined { ref name, .. } if name == "optimize"));
    }

    #[test]
    fn test_merge_only_applies_to_sequences() {
        let schema = ParamSchema::new("compiler")
            .sequence("defines", PropertyType::Str, Inheritance::Merge)
            .sequence("warnings", PropertyType::Int, Inheritance::Override)
            .property("level", PropertyType::Int);

        assert!(schema.def("defines").unwrap().merges());
        assert!(!schema.def("warnings").unwrap().merges());
        assert!(!schema.def("level").unwrap().merges());
        assert_eq!(schema.len(), 3);
    }
}
