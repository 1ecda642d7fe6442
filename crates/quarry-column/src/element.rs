//! Element types a column can store
//!
//! Every element has a total order, a conversion to and from the dynamic
//! [`Value`], and a fixed little-endian encoding used by the binary format.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt::Debug;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use quarry_common::{Operator, Value};

/// A value type storable in a column
pub trait ColumnElement: Clone + Debug + Default + PartialEq + Send + Sync + 'static {
    /// Core type name as it appears in descriptors
    const TYPE_NAME: &'static str;

    /// Whether `Matches`/`MatchesExact` mean plain equality for this type
    const MATCHES_IS_EQUALITY: bool = true;

    /// Total order used by sorted columns
    fn compare(&self, other: &Self) -> Ordering;

    /// Prefix test; `None` when the type has no notion of prefix
    fn starts_with(&self, _prefix: &Self) -> Option<bool> {
        None
    }

    /// Substring test; `None` when unsupported
    fn contains(&self, _needle: &Self) -> Option<bool> {
        None
    }

    fn to_value(&self) -> Value;

    /// Convert a dynamic value, lossily across types where meaningful
    fn from_value(value: &Value) -> Option<Self>;

    /// Convert a query operand; refuses conversions that would change the
    /// answer of a comparison
    fn from_operand(value: &Value) -> Option<Self> {
        Self::from_value(value)
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()>;

    fn read_from(r: &mut dyn Read) -> io::Result<Self>;

    /// Single-item predicate test; `None` when the operator is unsupported
    fn evaluate(&self, op: Operator, operand: &Self) -> Option<bool> {
        let ord = match op {
            Operator::StartsWith => return self.starts_with(operand),
            Operator::Contains => return self.contains(operand),
            Operator::Matches | Operator::MatchesExact if !Self::MATCHES_IS_EQUALITY => {
                return None
            }
            _ => self.compare(operand),
        };
        Some(match op {
            Operator::NotEquals => ord != Ordering::Equal,
            Operator::LessThan => ord == Ordering::Less,
            Operator::LessThanOrEqual => ord != Ordering::Greater,
            Operator::GreaterThan => ord == Ordering::Greater,
            Operator::GreaterThanOrEqual => ord != Ordering::Less,
            _ => ord == Ordering::Equal,
        })
    }
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

// ============================================================================
// Fixed-size elements
// ============================================================================

macro_rules! integer_element {
    ($ty:ty, $name:literal, $variant:ident, $read:ident, $write:ident) => {
        impl ColumnElement for $ty {
            const TYPE_NAME: &'static str = $name;

            fn compare(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }

            fn to_value(&self) -> Value {
                Value::$variant(*self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    other => other.as_i64().and_then(|v| <$ty>::try_from(v).ok()),
                }
            }

            fn from_operand(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    other => other.as_exact_i64().and_then(|v| <$ty>::try_from(v).ok()),
                }
            }

            fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
                w.$write::<LittleEndian>(*self)
            }

            fn read_from(r: &mut dyn Read) -> io::Result<Self> {
                r.$read::<LittleEndian>()
            }
        }
    };
}

integer_element!(i16, "short", Int16, read_i16, write_i16);
integer_element!(u16, "ushort", UInt16, read_u16, write_u16);
integer_element!(i32, "int", Int32, read_i32, write_i32);
integer_element!(u32, "uint", UInt32, read_u32, write_u32);
integer_element!(i64, "long", Int64, read_i64, write_i64);

impl ColumnElement for u64 {
    const TYPE_NAME: &'static str = "ulong";

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn to_value(&self) -> Value {
        Value::UInt64(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_u64()
    }

    fn from_operand(value: &Value) -> Option<Self> {
        match value {
            Value::UInt64(v) => Some(*v),
            Value::String(s) => s.trim().parse::<u64>().ok().or_else(|| {
                value.as_exact_i64().and_then(|v| u64::try_from(v).ok())
            }),
            other => other.as_exact_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u64::<LittleEndian>(*self)
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl ColumnElement for u8 {
    const TYPE_NAME: &'static str = "byte";

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn to_value(&self) -> Value {
        Value::UInt8(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::UInt8(v) => Some(*v),
            other => other.as_i64().and_then(|v| u8::try_from(v).ok()),
        }
    }

    fn from_operand(value: &Value) -> Option<Self> {
        match value {
            Value::UInt8(v) => Some(*v),
            other => other.as_exact_i64().and_then(|v| u8::try_from(v).ok()),
        }
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u8(*self)
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        r.read_u8()
    }
}

impl ColumnElement for bool {
    const TYPE_NAME: &'static str = "bool";

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u8(u8::from(*self))
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        match r.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(invalid_data("bool byte out of range")),
        }
    }
}

/// Both zeros compare equal; NaN keeps its place in the total order
fn float_order(a: f64, b: f64) -> Ordering {
    let unsigned_zero = |v: f64| if v == 0.0 { 0.0 } else { v };
    unsigned_zero(a).total_cmp(&unsigned_zero(b))
}

impl ColumnElement for f64 {
    const TYPE_NAME: &'static str = "double";

    fn compare(&self, other: &Self) -> Ordering {
        float_order(*self, *other)
    }

    fn to_value(&self) -> Value {
        Value::Float64(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_f64::<LittleEndian>(*self)
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        r.read_f64::<LittleEndian>()
    }
}

impl ColumnElement for f32 {
    const TYPE_NAME: &'static str = "float";

    fn compare(&self, other: &Self) -> Ordering {
        float_order(f64::from(*self), f64::from(*other))
    }

    fn to_value(&self) -> Value {
        Value::Float32(*self)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float32(v) => Some(*v),
            other => other.as_f64().map(|v| v as f32),
        }
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_f32::<LittleEndian>(*self)
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        r.read_f32::<LittleEndian>()
    }
}

impl ColumnElement for DateTime<Utc> {
    const TYPE_NAME: &'static str = "datetime";

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn to_value(&self) -> Value {
        Value::DateTime(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::DateTime(d) => Some(*d),
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            Value::Null | Value::Guid(_) | Value::Bytes(_) | Value::Bool(_) => None,
            other => other.as_i64().and_then(DateTime::from_timestamp_millis),
        }
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_i64::<LittleEndian>(self.timestamp())?;
        w.write_u32::<LittleEndian>(self.timestamp_subsec_nanos())
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        let secs = r.read_i64::<LittleEndian>()?;
        let nanos = r.read_u32::<LittleEndian>()?;
        DateTime::from_timestamp(secs, nanos).ok_or_else(|| invalid_data("timestamp out of range"))
    }
}

impl ColumnElement for Uuid {
    const TYPE_NAME: &'static str = "guid";

    fn compare(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    fn to_value(&self) -> Value {
        Value::Guid(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Guid(g) => Some(*g),
            Value::String(s) => Uuid::parse_str(s.trim()).ok(),
            Value::Bytes(b) => Uuid::from_slice(b).ok(),
            _ => None,
        }
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(self.as_bytes())
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        let mut bytes = [0u8; 16];
        r.read_exact(&mut bytes)?;
        Ok(Uuid::from_bytes(bytes))
    }
}

// ============================================================================
// Variable-length bytes
// ============================================================================

/// Owned variable-length value stored by the byte block column
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteBlock(Vec<u8>);

impl ByteBlock {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text view, replacing invalid UTF-8
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for ByteBlock {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for ByteBlock {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<Vec<u8>> for ByteBlock {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ByteBlock {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl ColumnElement for ByteBlock {
    const TYPE_NAME: &'static str = "string";
    const MATCHES_IS_EQUALITY: bool = false;

    fn compare(&self, other: &Self) -> Ordering {
        self.0.as_slice().cmp(other.0.as_slice())
    }

    fn starts_with(&self, prefix: &Self) -> Option<bool> {
        Some(self.0.starts_with(&prefix.0))
    }

    fn contains(&self, needle: &Self) -> Option<bool> {
        if needle.is_empty() {
            return Some(true);
        }
        Some(self.0.windows(needle.len()).any(|w| w == needle.as_bytes()))
    }

    fn to_value(&self) -> Value {
        match std::str::from_utf8(&self.0) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(self.0.clone()),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(ByteBlock::from(s.as_str())),
            Value::Bytes(b) => Some(ByteBlock::from(b.as_slice())),
            other => other.to_text().map(ByteBlock::from),
        }
    }

    fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        let len = u32::try_from(self.0.len()).map_err(|_| invalid_data("value too long"))?;
        w.write_u32::<LittleEndian>(len)?;
        w.write_all(&self.0)
    }

    fn read_from(r: &mut dyn Read) -> io::Result<Self> {
        let len = r.read_u32::<LittleEndian>()? as usize;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        Ok(Self(bytes))
    }
}
