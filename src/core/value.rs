//! Property values and their declared types.
//!
//! A `PropertyValue` is the tagged variant used everywhere a typed value has
//! to be carried around at runtime: fingerprint entries, parameter sets and
//! the codec. Equality is strict and recursive; floats compare by bit
//! pattern so that equality and hashing always agree.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// The declared type of a property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Bool,
    Int,
    Float,
    Str,
    /// Homogeneous ordered sequence of the element type.
    Seq(Box<PropertyType>),
    /// A type the codec cannot represent, identified by name.
    Opaque(String),
}

impl PropertyType {
    /// Shorthand for a sequence type.
    pub fn seq(element: PropertyType) -> Self {
        PropertyType::Seq(Box::new(element))
    }

    /// Element type, if this is a sequence type.
    pub fn element(&self) -> Option<&PropertyType> {
        match self {
            PropertyType::Seq(elem) => Some(elem),
            _ => None,
        }
    }

    /// Whether the codec can encode values of this type.
    pub fn is_encodable(&self) -> bool {
        match self {
            PropertyType::Opaque(_) => false,
            PropertyType::Seq(elem) => elem.is_encodable(),
            _ => true,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyType::Bool => write!(f, "bool"),
            PropertyType::Int => write!(f, "int"),
            PropertyType::Float => write!(f, "float"),
            PropertyType::Str => write!(f, "string"),
            PropertyType::Seq(elem) => write!(f, "[{}]", elem),
            PropertyType::Opaque(name) => write!(f, "{}", name),
        }
    }
}

/// A runtime property value.
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<PropertyValue>),
    /// Value of a type without a primitive encoding. Compared by its
    /// canonical text.
    Opaque { type_name: String, repr: String },
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> String {
        match self {
            PropertyValue::Null => "null".to_string(),
            PropertyValue::Bool(_) => "bool".to_string(),
            PropertyValue::Int(_) => "int".to_string(),
            PropertyValue::Float(_) => "float".to_string(),
            PropertyValue::Str(_) => "string".to_string(),
            PropertyValue::Seq(_) => "sequence".to_string(),
            PropertyValue::Opaque { type_name, .. } => type_name.clone(),
        }
    }

    /// Check whether this value is an instance of `ty`.
    ///
    /// Null never conforms; sequences conform when every element does.
    pub fn conforms_to(&self, ty: &PropertyType) -> bool {
        match (self, ty) {
            (PropertyValue::Bool(_), PropertyType::Bool)
            | (PropertyValue::Int(_), PropertyType::Int)
            | (PropertyValue::Float(_), PropertyType::Float)
            | (PropertyValue::Str(_), PropertyType::Str) => true,
            (PropertyValue::Seq(items), PropertyType::Seq(elem)) => {
                items.iter().all(|item| item.conforms_to(elem))
            }
            (PropertyValue::Opaque { type_name, .. }, PropertyType::Opaque(name)) => {
                type_name == name
            }
            _ => false,
        }
    }

    pub fn as_seq(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::Seq(items) => Some(items),
            _ => None,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::Null, PropertyValue::Null) => true,
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a == b,
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropertyValue::Str(a), PropertyValue::Str(b)) => a == b,
            (PropertyValue::Seq(a), PropertyValue::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
            }
            (
                PropertyValue::Opaque {
                    type_name: ta,
                    repr: ra,
                },
                PropertyValue::Opaque {
                    type_name: tb,
                    repr: rb,
                },
            ) => ta == tb && ra == rb,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

impl Hash for PropertyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            PropertyValue::Null => {}
            PropertyValue::Bool(b) => b.hash(state),
            PropertyValue::Int(i) => i.hash(state),
            PropertyValue::Float(f) => f.to_bits().hash(state),
            PropertyValue::Str(s) => s.hash(state),
            PropertyValue::Seq(items) => {
                items.len().hash(state);
                for item in items {
                    item.hash(state);
                }
            }
            PropertyValue::Opaque { type_name, repr } => {
                type_name.hash(state);
                repr.hash(state);
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => write!(f, "null"),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Float(x) => write!(f, "{}", x),
            PropertyValue::Str(s) => write!(f, "{:?}", s),
            PropertyValue::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            PropertyValue::Opaque { type_name, repr } => write!(f, "{}({})", type_name, repr),
        }
    }
}

/// A value together with its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedValue {
    pub ty: PropertyType,
    pub value: PropertyValue,
}

impl TypedValue {
    pub fn new(ty: PropertyType, value: PropertyValue) -> Self {
        TypedValue { ty, value }
    }

    /// Wrap a Rust value, taking the declared type from its `PropertyKind`.
    pub fn of<T: PropertyKind>(value: T) -> Self {
        TypedValue {
            ty: T::property_type(),
            value: value.into_value(),
        }
    }

    /// A null value of the given type.
    pub fn null(ty: PropertyType) -> Self {
        TypedValue {
            ty,
            value: PropertyValue::Null,
        }
    }

    pub fn opaque(type_name: impl Into<String>, repr: impl Into<String>) -> Self {
        let type_name = type_name.into();
        TypedValue {
            ty: PropertyType::Opaque(type_name.clone()),
            value: PropertyValue::Opaque {
                type_name,
                repr: repr.into(),
            },
        }
    }
}

/// Rust types with a fixed `PropertyType`.
///
/// Used by fingerprint construction and by typed parameter writes.
pub trait PropertyKind: Sized {
    fn property_type() -> PropertyType;
    fn into_value(self) -> PropertyValue;
}

/// Property kinds that can be read back out of a stored value.
///
/// Borrowed types such as `&str` can be written but not read; ask for the
/// owned form (`String`) instead.
pub trait FromProperty: PropertyKind {
    fn from_value(value: &PropertyValue) -> Option<Self>;
}

impl PropertyKind for bool {
    fn property_type() -> PropertyType {
        PropertyType::Bool
    }

    fn into_value(self) -> PropertyValue {
        PropertyValue::Bool(self)
    }
}

impl FromProperty for bool {
    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

macro_rules! int_kind {
    ($($ty:ty),*) => {
        $(
            impl PropertyKind for $ty {
                fn property_type() -> PropertyType {
                    PropertyType::Int
                }

                fn into_value(self) -> PropertyValue {
                    PropertyValue::Int(self as i64)
                }
            }

            impl FromProperty for $ty {
                fn from_value(value: &PropertyValue) -> Option<Self> {
                    match value {
                        PropertyValue::Int(i) => <$ty>::try_from(*i).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

int_kind!(i64, i32, u32, u16, u8);

impl PropertyKind for f64 {
    fn property_type() -> PropertyType {
        PropertyType::Float
    }

    fn into_value(self) -> PropertyValue {
        PropertyValue::Float(self)
    }
}

impl FromProperty for f64 {
    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Float(x) => Some(*x),
            _ => None,
        }
    }
}

impl PropertyKind for String {
    fn property_type() -> PropertyType {
        PropertyType::Str
    }

    fn into_value(self) -> PropertyValue {
        PropertyValue::Str(self)
    }
}

impl FromProperty for String {
    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl PropertyKind for &str {
    fn property_type() -> PropertyType {
        PropertyType::Str
    }

    fn into_value(self) -> PropertyValue {
        PropertyValue::Str(self.to_string())
    }
}

const NON_UTF8_PATH: &str = "non-UTF-8 path";

impl PropertyKind for PathBuf {
    fn property_type() -> PropertyType {
        PropertyType::Str
    }

    /// Non-UTF-8 paths become an opaque value holding their raw bytes, so
    /// distinct paths never compare equal and the codec refuses to store them.
    fn into_value(self) -> PropertyValue {
        match self.into_os_string().into_string() {
            Ok(s) => PropertyValue::Str(s),
            Err(raw) => PropertyValue::Opaque {
                type_name: NON_UTF8_PATH.to_string(),
                repr: hex::encode(raw.as_encoded_bytes()),
            },
        }
    }
}

impl FromProperty for PathBuf {
    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Str(s) => Some(PathBuf::from(s)),
            _ => None,
        }
    }
}

impl<T: PropertyKind> PropertyKind for Vec<T> {
    fn property_type() -> PropertyType {
        PropertyType::seq(T::property_type())
    }

    fn into_value(self) -> PropertyValue {
        PropertyValue::Seq(self.into_iter().map(PropertyKind::into_value).collect())
    }
}

impl<T: FromProperty> FromProperty for Vec<T> {
    fn from_value(value: &PropertyValue) -> Option<Self> {
        value.as_seq()?.iter().map(T::from_value).collect()
    }
}

impl<T: PropertyKind> PropertyKind for Option<T> {
    fn property_type() -> PropertyType {
        T::property_type()
    }

    fn into_value(self) -> PropertyValue {
        match self {
            Some(v) => v.into_value(),
            None => PropertyValue::Null,
        }
    }
}

impl<T: FromProperty> FromProperty for Option<T> {
    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}
