//! Binary encoding of fingerprints and cache entries.
//!
//! # Format
//!
//! All integers are little-endian. Strings are a `u32` byte length followed
//! by UTF-8 bytes.
//!
//! ```text
//! fingerprint := "CFPR" version:u8 count:u32 property*
//! property    := name:string type value
//! type        := 1 (bool) | 2 (int) | 3 (float) | 4 (string) | 5 type (sequence)
//! value       := 0 (null) | 1 payload
//! payload     := bool:u8 | int:i64 | float:u64 bits | string | count:u32 value*
//!
//! entry       := "CENT" version:u8 fingerprint count:u32 path:string*
//! ```
//!
//! Every record carries its declared types, so decoding needs no schema.
//! Opaque values and sequences whose elements don't share the declared
//! element type are rejected when saving.

use std::collections::BTreeSet;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{
    ErrorKind, PropertyType, PropertyValue, TargetPathError, TargetRelativePath, TypedValue,
};
use crate::fingerprint::Fingerprint;

const FINGERPRINT_MAGIC: &[u8; 4] = b"CFPR";
const ENTRY_MAGIC: &[u8; 4] = b"CENT";
const VERSION: u8 = 1;

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_SEQ: u8 = 5;

const NULL: u8 = 0;
const PRESENT: u8 = 1;

const MAX_TYPE_DEPTH: usize = 32;
const MAX_LEN: u32 = 64 * 1024 * 1024;

/// Error encoding or decoding a record.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("property `{name}` has unsupported type {ty}")]
    UnsupportedType { name: String, ty: String },

    #[error("property `{name}` holds a {found} value, which is not a {ty}")]
    ValueMismatch {
        name: String,
        ty: String,
        found: String,
    },

    #[error("output path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    TargetPath(#[from] TargetPathError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::UnsupportedType { .. }
            | CodecError::ValueMismatch { .. }
            | CodecError::NonUtf8Path(_) => ErrorKind::UnsupportedType,
            CodecError::Corrupt(_) | CodecError::TargetPath(_) | CodecError::Io(_) => {
                ErrorKind::Io
            }
        }
    }
}

/// Check that a fingerprint can be saved without writing anything.
pub fn validate(fingerprint: &Fingerprint) -> Result<(), CodecError> {
    if let Some((name, ty)) = fingerprint.first_unencodable() {
        return Err(CodecError::UnsupportedType {
            name: name.to_string(),
            ty: ty.to_string(),
        });
    }
    for (name, typed) in fingerprint.iter() {
        check_value(name, typed)?;
    }
    Ok(())
}

/// Write a fingerprint record.
pub fn save<W: Write>(fingerprint: &Fingerprint, w: &mut W) -> Result<(), CodecError> {
    validate(fingerprint)?;

    w.write_all(FINGERPRINT_MAGIC)?;
    w.write_all(&[VERSION])?;
    write_len(w, fingerprint.len())?;

    for (name, typed) in fingerprint.iter() {
        write_str(w, name)?;
        write_type(w, &typed.ty)?;
        write_value(w, &typed.ty, &typed.value)?;
    }

    Ok(())
}

/// Read a fingerprint record.
pub fn load<R: Read>(r: &mut R) -> Result<Fingerprint, CodecError> {
    expect_header(r, FINGERPRINT_MAGIC)?;

    let count = read_len(r)?;
    let mut fingerprint = Fingerprint::empty();
    for _ in 0..count {
        let name = read_str(r)?;
        let ty = read_type(r, 0)?;
        let value = read_value(r, &ty)?;
        fingerprint = fingerprint.with_typed(name, TypedValue::new(ty, value));
    }

    if fingerprint.len() != count as usize {
        return Err(CodecError::Corrupt("duplicate property names".to_string()));
    }

    Ok(fingerprint)
}

/// Encode a fingerprint into a byte vector.
pub fn encode(fingerprint: &Fingerprint) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    save(fingerprint, &mut buf)?;
    Ok(buf)
}

/// Decode a fingerprint from a byte slice.
pub fn decode(mut bytes: &[u8]) -> Result<Fingerprint, CodecError> {
    load(&mut bytes)
}

/// What the cache remembers about a builder's last successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub outputs: BTreeSet<TargetRelativePath>,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, outputs: BTreeSet<TargetRelativePath>) -> Self {
        CacheEntry {
            fingerprint,
            outputs,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        buf.write_all(ENTRY_MAGIC)?;
        buf.write_all(&[VERSION])?;
        save(&self.fingerprint, &mut buf)?;

        write_len(&mut buf, self.outputs.len())?;
        for output in &self.outputs {
            let path = output
                .as_path()
                .to_str()
                .ok_or_else(|| CodecError::NonUtf8Path(output.as_path().to_path_buf()))?;
            write_str(&mut buf, path)?;
        }

        Ok(buf)
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, CodecError> {
        let r = &mut bytes;
        expect_header(r, ENTRY_MAGIC)?;
        let fingerprint = load(r)?;

        let count = read_len(r)?;
        let mut outputs = BTreeSet::new();
        for _ in 0..count {
            outputs.insert(TargetRelativePath::new(read_str(r)?)?);
        }

        if !r.is_empty() {
            return Err(CodecError::Corrupt("trailing bytes after entry".to_string()));
        }

        Ok(CacheEntry {
            fingerprint,
            outputs,
        })
    }
}

fn check_value(name: &str, typed: &TypedValue) -> Result<(), CodecError> {
    if value_fits(&typed.value, &typed.ty) {
        Ok(())
    } else {
        Err(CodecError::ValueMismatch {
            name: name.to_string(),
            ty: typed.ty.to_string(),
            found: typed.value.kind_name(),
        })
    }
}

// Like `conforms_to`, but nulls are encodable at any depth.
fn value_fits(value: &PropertyValue, ty: &PropertyType) -> bool {
    match (value, ty) {
        (PropertyValue::Null, _) => true,
        (PropertyValue::Seq(items), PropertyType::Seq(elem)) => {
            items.iter().all(|item| value_fits(item, elem))
        }
        (value, ty) => value.conforms_to(ty),
    }
}

fn write_len<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds u32"))?;
    w.write_all(&len.to_le_bytes())
}

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_len(w, s.len())?;
    w.write_all(s.as_bytes())
}

fn write_type<W: Write>(w: &mut W, ty: &PropertyType) -> Result<(), CodecError> {
    match ty {
        PropertyType::Bool => w.write_all(&[TAG_BOOL])?,
        PropertyType::Int => w.write_all(&[TAG_INT])?,
        PropertyType::Float => w.write_all(&[TAG_FLOAT])?,
        PropertyType::Str => w.write_all(&[TAG_STR])?,
        PropertyType::Seq(elem) => {
            w.write_all(&[TAG_SEQ])?;
            write_type(w, elem)?;
        }
        PropertyType::Opaque(name) => {
            return Err(CodecError::UnsupportedType {
                name: String::new(),
                ty: name.clone(),
            })
        }
    }
    Ok(())
}

fn write_value<W: Write>(
    w: &mut W,
    ty: &PropertyType,
    value: &PropertyValue,
) -> Result<(), CodecError> {
    if value.is_null() {
        w.write_all(&[NULL])?;
        return Ok(());
    }
    w.write_all(&[PRESENT])?;

    match (ty, value) {
        (PropertyType::Bool, PropertyValue::Bool(b)) => w.write_all(&[u8::from(*b)])?,
        (PropertyType::Int, PropertyValue::Int(i)) => w.write_all(&i.to_le_bytes())?,
        (PropertyType::Float, PropertyValue::Float(x)) => {
            w.write_all(&x.to_bits().to_le_bytes())?
        }
        (PropertyType::Str, PropertyValue::Str(s)) => write_str(w, s)?,
        (PropertyType::Seq(elem), PropertyValue::Seq(items)) => {
            write_len(w, items.len())?;
            for item in items {
                write_value(w, elem, item)?;
            }
        }
        _ => {
            return Err(CodecError::ValueMismatch {
                name: String::new(),
                ty: ty.to_string(),
                found: value.kind_name(),
            })
        }
    }
    Ok(())
}

fn expect_header<R: Read>(r: &mut R, magic: &[u8; 4]) -> Result<(), CodecError> {
    let mut header = [0u8; 5];
    r.read_exact(&mut header)?;
    if &header[..4] != magic {
        return Err(CodecError::Corrupt("bad magic".to_string()));
    }
    if header[4] != VERSION {
        return Err(CodecError::Corrupt(format!(
            "unsupported version {}",
            header[4]
        )));
    }
    Ok(())
}

fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_len<R: Read>(r: &mut R) -> Result<u32, CodecError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    let len = u32::from_le_bytes(buf);
    if len > MAX_LEN {
        return Err(CodecError::Corrupt(format!("length {} out of range", len)));
    }
    Ok(len)
}

fn read_str<R: Read>(r: &mut R) -> Result<String, CodecError> {
    let len = read_len(r)? as u64;
    let mut buf = Vec::new();
    r.take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    String::from_utf8(buf).map_err(|_| CodecError::Corrupt("string is not UTF-8".to_string()))
}

fn read_type<R: Read>(r: &mut R, depth: usize) -> Result<PropertyType, CodecError> {
    if depth > MAX_TYPE_DEPTH {
        return Err(CodecError::Corrupt("type nesting too deep".to_string()));
    }
    match read_u8(r)? {
        TAG_BOOL => Ok(PropertyType::Bool),
        TAG_INT => Ok(PropertyType::Int),
        TAG_FLOAT => Ok(PropertyType::Float),
        TAG_STR => Ok(PropertyType::Str),
        TAG_SEQ => Ok(PropertyType::seq(read_type(r, depth + 1)?)),
        tag => Err(CodecError::Corrupt(format!("unknown type tag {}", tag))),
    }
}

fn read_value<R: Read>(r: &mut R, ty: &PropertyType) -> Result<PropertyValue, CodecError> {
    match read_u8(r)? {
        NULL => return Ok(PropertyValue::Null),
        PRESENT => {}
        marker => return Err(CodecError::Corrupt(format!("bad value marker {}", marker))),
    }

    let value = match ty {
        PropertyType::Bool => match read_u8(r)? {
            0 => PropertyValue::Bool(false),
            1 => PropertyValue::Bool(true),
            b => return Err(CodecError::Corrupt(format!("bad bool byte {}", b))),
        },
        PropertyType::Int => PropertyValue::Int(read_u64(r)? as i64),
        PropertyType::Float => PropertyValue::Float(f64::from_bits(read_u64(r)?)),
        PropertyType::Str => PropertyValue::Str(read_str(r)?),
        PropertyType::Seq(elem) => {
            let count = read_len(r)?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                items.push(read_value(r, elem)?);
            }
            PropertyValue::Seq(items)
        }
        PropertyType::Opaque(name) => {
            return Err(CodecError::Corrupt(format!("opaque type {} in record", name)))
        }
    };
    Ok(value)
}
