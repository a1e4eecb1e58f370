//! Core value types shared by every other module.

pub mod builder_id;
pub mod target_path;
pub mod value;

use std::fmt;

pub use builder_id::BuilderId;
pub use target_path::{TargetPathError, TargetRelativePath, TargetRoot};
pub use value::{FromProperty, PropertyKind, PropertyType, PropertyValue, TypedValue};

/// Coarse classification of every error the crate produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cyclic graph or a property missing from a schema.
    Configuration,
    TypeMismatch,
    /// A property without a value along its whole inheritance chain.
    Unspecified,
    /// A value the fingerprint codec cannot encode.
    UnsupportedType,
    /// Caller broke the build protocol, e.g. asked for results too early.
    ProtocolViolation,
    /// A builder failed while running.
    Execution,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::Unspecified => "unspecified value",
            ErrorKind::UnsupportedType => "unsupported type",
            ErrorKind::ProtocolViolation => "protocol violation",
            ErrorKind::Execution => "execution failure",
            ErrorKind::Io => "i/o",
        };
        f.write_str(name)
    }
}
