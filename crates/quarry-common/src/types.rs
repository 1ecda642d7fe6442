//! Common type definitions for Quarry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Row identifier within one partition
pub type LocalId = u16;

/// Maximum number of rows a single column can hold
pub const MAX_COUNT: usize = LocalId::MAX as usize + 1;

// ============================================================================
// Dynamic Values
// ============================================================================

/// A dynamically typed column value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Unspecified; columns substitute their default
    #[default]
    Null,
    Bool(bool),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Short name of the variant, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::UInt8(_) => "byte",
            Value::Int16(_) => "short",
            Value::UInt16(_) => "ushort",
            Value::Int32(_) => "int",
            Value::UInt32(_) => "uint",
            Value::Int64(_) => "long",
            Value::UInt64(_) => "ulong",
            Value::Float32(_) => "float",
            Value::Float64(_) => "double",
            Value::DateTime(_) => "datetime",
            Value::Guid(_) => "guid",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Signed integer view; floats truncate, text parses
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Float32(v) => float_to_i64(f64::from(*v)),
            Value::Float64(v) => float_to_i64(*v),
            Value::DateTime(d) => Some(d.timestamp_millis()),
            Value::String(s) => parse_integer(s),
            Value::Bytes(b) => parse_integer(&String::from_utf8_lossy(b)),
            Value::Null | Value::Guid(_) => None,
        }
    }

    /// Integer view that refuses to drop a fractional part
    pub fn as_exact_i64(&self) -> Option<i64> {
        match self {
            Value::Float32(_) | Value::Float64(_) => {
                self.as_f64().filter(|v| v.fract() == 0.0).and_then(float_to_i64)
            }
            Value::String(s) => parse_exact_integer(s),
            Value::Bytes(b) => parse_exact_integer(&String::from_utf8_lossy(b)),
            other => other.as_i64(),
        }
    }

    /// Unsigned integer view; negative values do not convert
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt64(v) => Some(*v),
            Value::String(s) => s.trim().parse::<u64>().ok().or_else(|| {
                parse_integer(s).and_then(|v| u64::try_from(v).ok())
            }),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Floating point view
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            Value::UInt64(v) => Some(*v as f64),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Bytes(b) => String::from_utf8_lossy(b).trim().parse::<f64>().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Boolean view; text accepts true/false/1/0
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => parse_bool(s),
            Value::Bytes(b) => parse_bool(&String::from_utf8_lossy(b)),
            Value::Float32(_) | Value::Float64(_) => self.as_f64().map(|v| v != 0.0),
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Text view; every non-null value has one
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Value::DateTime(d) => Some(d.to_rfc3339()),
            other => Some(other.to_string()),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_i64(v: f64) -> Option<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
}

fn parse_exact_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>().ok().or_else(|| {
        s.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0)
            .and_then(float_to_i64)
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Guid(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", String::from_utf8_lossy(v)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

// ============================================================================
// Query Operators
// ============================================================================

/// Comparison operator supplied by the query layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Value starts with the operand
    StartsWith,
    /// Word-prefix match on indexed text; equality elsewhere
    Matches,
    /// Whole-word match on indexed text; equality elsewhere
    MatchesExact,
    /// Substring match
    Contains,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equals => "=",
            Operator::NotEquals => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::StartsWith => "|>",
            Operator::Matches => ":",
            Operator::MatchesExact => "::",
            Operator::Contains => "contains",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "equals" => Operator::Equals,
            "!=" | "<>" | "notequals" => Operator::NotEquals,
            "<" | "lessthan" => Operator::LessThan,
            "<=" | "lessthanorequal" => Operator::LessThanOrEqual,
            ">" | "greaterthan" => Operator::GreaterThan,
            ">=" | "greaterthanorequal" => Operator::GreaterThanOrEqual,
            "|>" | "startswith" => Operator::StartsWith,
            ":" | "matches" => Operator::Matches,
            "::" | "matchesexact" => Operator::MatchesExact,
            "contains" => Operator::Contains,
            other => return Err(Error::Config(format!("Unknown operator '{}'", other))),
        };
        Ok(op)
    }
}
