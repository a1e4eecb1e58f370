//! Parameter inheritance model.
//!
//! Parameter sets are typed configuration records populated by the project
//! model. A set may delegate to a single parent; sequence properties can be
//! declared to merge with the inherited value instead of replacing it.

pub mod schema;
pub mod set;

use thiserror::Error;

use crate::core::{ErrorKind, PropertyType};

pub use schema::{Inheritance, ParamDef, ParamSchema};
pub use set::{ParamState, ParameterSet};

/// Error accessing a parameter set.
#[derive(Debug, Error)]
pub enum ParamError {
    #[error("property `{name}` is not defined in `{schema}` parameters")]
    NotDefined { schema: String, name: String },

    #[error("property `{name}` has type {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: PropertyType,
        found: String,
    },

    #[error("property `{name}` of `{schema}` parameters is not specified")]
    NotSpecified { schema: String, name: String },
}

impl ParamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParamError::NotDefined { .. } => ErrorKind::Configuration,
            ParamError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            ParamError::NotSpecified { .. } => ErrorKind::Unspecified,
        }
    }
}
