//! Column factory
//!
//! Builds column stacks from descriptor strings:
//!
//! ```text
//! descriptor := ("bare:")? (wrapper ("[" config "]")? ":")* core_type
//! ```
//!
//! The leftmost wrapper is the outermost layer. A core type without
//! wrappers gets that type's default stack; `bare:` turns the defaults off.
//! Unknown names fail at construction with [`Error::Config`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use quarry_common::config::StorageConfig;
use quarry_common::{ColumnError, Error, Result, Value};

use crate::byte_block::ByteBlockColumn;
use crate::column::Column;
use crate::dense::ValueColumn;
use crate::element::{ByteBlock, ColumnElement};
use crate::fast_add::FastAddSortedColumn;
use crate::indexed::{IndexedColumn, SplitterKind};
use crate::sorted::SortedColumn;
use crate::untyped::{DynColumn, UntypedColumn};

// ============================================================================
// Descriptor
// ============================================================================

/// One decorator layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    Sorted,
    FastAddSorted,
    Indexed(SplitterKind),
}

impl fmt::Display for WrapperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WrapperKind::Sorted => f.write_str("Sorted"),
            WrapperKind::FastAddSorted => f.write_str("FastAddSorted"),
            WrapperKind::Indexed(SplitterKind::Default) => f.write_str("Indexed"),
            WrapperKind::Indexed(kind) => write!(f, "Indexed[{}]", kind),
        }
    }
}

impl FromStr for WrapperKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, config) = match s.find('[') {
            Some(open) => {
                let inner = s[open + 1..].strip_suffix(']').ok_or_else(|| {
                    Error::Config(format!("unterminated wrapper configuration in '{}'", s))
                })?;
                (&s[..open], Some(inner))
            }
            None => (s, None),
        };

        match (name.trim().to_ascii_lowercase().as_str(), config) {
            ("sorted", None) => Ok(WrapperKind::Sorted),
            ("fastaddsorted", None) => Ok(WrapperKind::FastAddSorted),
            ("indexed", None) => Ok(WrapperKind::Indexed(SplitterKind::Default)),
            ("indexed", Some(config)) => Ok(WrapperKind::Indexed(config.parse()?)),
            ("sorted" | "fastaddsorted", Some(config)) => Err(Error::Config(format!(
                "wrapper '{}' takes no configuration, got '{}'",
                name, config
            ))),
            _ => Err(Error::Config(format!("unknown column wrapper '{}'", name))),
        }
    }
}

/// Parsed descriptor string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub bare: bool,
    /// Outermost first
    pub wrappers: Vec<WrapperKind>,
    /// Lowercased core type name
    pub core_type: String,
}

impl FromStr for ColumnDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let core_type = match parts.pop() {
            Some(core) if !core.is_empty() => core.to_ascii_lowercase(),
            _ => return Err(Error::Config(format!("descriptor '{}' names no core type", s))),
        };

        let bare = parts
            .first()
            .is_some_and(|first| first.eq_ignore_ascii_case("bare"));
        let wrappers = parts
            .iter()
            .skip(usize::from(bare))
            .map(|part| part.parse())
            .collect::<Result<Vec<WrapperKind>>>()?;

        Ok(Self {
            bare,
            wrappers,
            core_type,
        })
    }
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bare {
            f.write_str("bare:")?;
        }
        for wrapper in &self.wrappers {
            write!(f, "{}:", wrapper)?;
        }
        f.write_str(&self.core_type)
    }
}

// ============================================================================
// Column details
// ============================================================================

/// Schema entry for one column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDetails {
    pub name: String,
    pub descriptor: String,
    /// `Value::Null` selects the element type's own default
    pub default_value: Value,
}

impl ColumnDetails {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            default_value: Value::Null,
        }
    }

    pub fn with_default(mut self, default_value: Value) -> Self {
        self.default_value = default_value;
        self
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Builds one core type with the given wrappers, outermost first
pub type ColumnBuilder =
    dyn Fn(&ColumnDetails, &[WrapperKind], &StorageConfig) -> Result<Box<dyn DynColumn>> + Send + Sync;

struct CoreType {
    builder: Arc<ColumnBuilder>,
    default_wrappers: Vec<WrapperKind>,
}

/// Registry of core types, owned by the schema layer
pub struct ColumnFactory {
    config: StorageConfig,
    types: HashMap<String, CoreType>,
}

impl Default for ColumnFactory {
    fn default() -> Self {
        Self::with_builtins(StorageConfig::default())
    }
}

impl ColumnFactory {
    /// Factory with every built-in core type registered. Fails when the
    /// storage settings cannot be honored by the columns it builds.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.byte_block.validate()?;
        Ok(Self::with_builtins(config))
    }

    fn with_builtins(config: StorageConfig) -> Self {
        use WrapperKind::{Indexed, Sorted};

        let mut factory = Self {
            config,
            types: HashMap::new(),
        };

        factory.register(&["bool", "boolean"], vec![Sorted], value_stack::<bool>);
        factory.register(&["byte", "uint8"], vec![Sorted], value_stack::<u8>);
        factory.register(&["short", "int16"], vec![Sorted], value_stack::<i16>);
        factory.register(&["ushort", "uint16"], vec![Sorted], value_stack::<u16>);
        factory.register(&["int", "int32"], vec![Sorted], value_stack::<i32>);
        factory.register(&["uint", "uint32"], vec![Sorted], value_stack::<u32>);
        factory.register(&["long", "int64"], vec![Sorted], value_stack::<i64>);
        factory.register(&["ulong", "uint64"], vec![Sorted], value_stack::<u64>);
        factory.register(&["float", "single"], vec![Sorted], value_stack::<f32>);
        factory.register(&["double"], vec![Sorted], value_stack::<f64>);
        factory.register(&["datetime"], vec![Sorted], value_stack::<DateTime<Utc>>);
        factory.register(&["guid"], vec![Sorted], value_stack::<Uuid>);

        factory.register(
            &["string"],
            vec![Indexed(SplitterKind::Default), Sorted],
            byte_block_stack,
        );
        factory.register(&["html"], vec![Indexed(SplitterKind::Html), Sorted], byte_block_stack);
        factory.register(
            &["stringset"],
            vec![Indexed(SplitterKind::Set), Sorted],
            byte_block_stack,
        );
        factory.register(&["blob"], vec![Sorted], byte_block_stack);

        factory
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Register `builder` under every name in `names`, replacing any
    /// earlier registration.
    pub fn register<F>(&mut self, names: &[&str], default_wrappers: Vec<WrapperKind>, builder: F)
    where
        F: Fn(&ColumnDetails, &[WrapperKind], &StorageConfig) -> Result<Box<dyn DynColumn>>
            + Send
            + Sync
            + 'static,
    {
        let builder: Arc<ColumnBuilder> = Arc::new(builder);
        for name in names {
            self.types.insert(
                name.to_ascii_lowercase(),
                CoreType {
                    builder: Arc::clone(&builder),
                    default_wrappers: default_wrappers.clone(),
                },
            );
        }
    }

    /// Registered core type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, details: &ColumnDetails) -> Result<Box<dyn DynColumn>> {
        if details.name.trim().is_empty() {
            return Err(ColumnError::MissingArgument("name").into());
        }
        if details.descriptor.trim().is_empty() {
            return Err(ColumnError::MissingArgument("descriptor").into());
        }

        let descriptor: ColumnDescriptor = details.descriptor.parse()?;
        let core = self.types.get(&descriptor.core_type).ok_or_else(|| {
            Error::Config(format!(
                "unknown column type '{}' for column '{}'",
                descriptor.core_type, details.name
            ))
        })?;

        let wrappers: &[WrapperKind] = if descriptor.bare || !descriptor.wrappers.is_empty() {
            &descriptor.wrappers
        } else {
            &core.default_wrappers
        };

        let column = (core.builder)(details, wrappers, &self.config)?;
        info!(
            column = %details.name,
            requested = %details.descriptor,
            built = %column.descriptor(),
            "built column"
        );
        Ok(column)
    }
}

// ============================================================================
// Built-in builders
// ============================================================================

fn core_default<T: ColumnElement>(details: &ColumnDetails) -> Result<T> {
    if details.default_value.is_null() {
        return Ok(T::default());
    }
    T::from_value(&details.default_value).ok_or_else(|| {
        ColumnError::TypeMismatch {
            expected: T::TYPE_NAME.to_string(),
            actual: details.default_value.type_name().to_string(),
        }
        .into()
    })
}

/// Apply an ordering wrapper; `Indexed` only exists over byte blocks
fn wrap_ordered<T: ColumnElement>(
    column: Box<dyn Column<T>>,
    wrapper: WrapperKind,
    config: &StorageConfig,
) -> Result<Box<dyn Column<T>>> {
    let wrapped: Box<dyn Column<T>> = match wrapper {
        WrapperKind::Sorted => Box::new(SortedColumn::new(column)?),
        WrapperKind::FastAddSorted => {
            Box::new(FastAddSortedColumn::new(column, config.sorted.clone())?)
        }
        WrapperKind::Indexed(_) => {
            return Err(ColumnError::UnsupportedWrapper {
                wrapper: wrapper.to_string(),
                core_type: T::TYPE_NAME.to_string(),
            }
            .into())
        }
    };
    Ok(wrapped)
}

fn value_stack<T: ColumnElement>(
    details: &ColumnDetails,
    wrappers: &[WrapperKind],
    config: &StorageConfig,
) -> Result<Box<dyn DynColumn>> {
    let default = core_default::<T>(details)?;
    let mut column: Box<dyn Column<T>> = Box::new(ValueColumn::new(details.name.clone(), default));
    for &wrapper in wrappers.iter().rev() {
        column = wrap_ordered(column, wrapper, config)?;
    }
    Ok(Box::new(UntypedColumn::new(column)))
}

fn byte_block_stack(
    details: &ColumnDetails,
    wrappers: &[WrapperKind],
    config: &StorageConfig,
) -> Result<Box<dyn DynColumn>> {
    let default = core_default::<ByteBlock>(details)?;
    let mut column: Box<dyn Column<ByteBlock>> = Box::new(ByteBlockColumn::with_config(
        details.name.clone(),
        default,
        config.byte_block.clone(),
    )?);
    for &wrapper in wrappers.iter().rev() {
        column = match wrapper {
            WrapperKind::Indexed(kind) => {
                let indexed = IndexedColumn::new(column, kind.build(), &config.index)?;
                Box::new(indexed) as Box<dyn Column<ByteBlock>>
            }
            other => wrap_ordered(column, other, config)?,
        };
    }
    Ok(Box::new(UntypedColumn::new(column)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::{LocalId, Operator};
    use roaring::RoaringBitmap;

    use crate::diagnostics::ExecutionDetails;

    fn build(descriptor: &str) -> Result<Box<dyn DynColumn>> {
        ColumnFactory::default().build(&ColumnDetails::new("c", descriptor))
    }

    #[test]
    fn test_parse_descriptor() {
        let parsed: ColumnDescriptor = "bare:Indexed[Html]:fastaddsorted:String".parse().unwrap();
        assert!(parsed.bare);
        assert_eq!(
            parsed.wrappers,
            vec![WrapperKind::Indexed(SplitterKind::Html), WrapperKind::FastAddSorted]
        );
        assert_eq!(parsed.core_type, "string");
        assert_eq!(parsed.to_string(), "bare:Indexed[Html]:FastAddSorted:string");

        assert!("Indexed[Html:string".parse::<ColumnDescriptor>().is_err());
        assert!("Sorted[x]:int".parse::<ColumnDescriptor>().is_err());
        assert!("Sorted:".parse::<ColumnDescriptor>().is_err());
    }

    #[test]
    fn test_default_stacks() {
        assert_eq!(build("int").unwrap().descriptor(), "Sorted:int");
        assert_eq!(build("int32").unwrap().descriptor(), "Sorted:int");
        assert_eq!(build("string").unwrap().descriptor(), "Indexed:Sorted:string");
        assert_eq!(build("html").unwrap().descriptor(), "Indexed[Html]:Sorted:string");
        assert_eq!(build("stringset").unwrap().descriptor(), "Indexed[Set]:Sorted:string");
        assert_eq!(build("bare:datetime").unwrap().descriptor(), "datetime");
        assert_eq!(build("FastAddSorted:guid").unwrap().descriptor(), "FastAddSorted:guid");
    }

    #[test]
    fn test_unknown_names_fail_at_construction() {
        let err = build("decimal").err().unwrap();
        assert!(matches!(err, Error::Config(ref m) if m.contains("decimal")));

        let err = build("Clustered:int").err().unwrap();
        assert!(matches!(err, Error::Config(ref m) if m.contains("Clustered")));

        let err = build("Indexed:long").err().unwrap();
        assert!(matches!(err, Error::Column(ColumnError::UnsupportedWrapper { .. })));

        let err = ColumnFactory::default()
            .build(&ColumnDetails::new(" ", "int"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Column(ColumnError::MissingArgument("name"))));
    }

    #[test]
    fn test_default_value_conversion() {
        let factory = ColumnFactory::default();
        let column = factory
            .build(&ColumnDetails::new("n", "short").with_default(Value::String("42".into())))
            .unwrap();
        assert_eq!(column.default_value(), Value::Int16(42));

        let err = factory
            .build(&ColumnDetails::new("n", "short").with_default(Value::Int64(1 << 40)))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Column(ColumnError::TypeMismatch { .. })));
    }

    #[test]
    fn test_registered_type_builds() {
        let mut factory = ColumnFactory::default();
        factory.register(&["Counter"], vec![WrapperKind::FastAddSorted], value_stack::<u64>);
        let mut column = factory.build(&ColumnDetails::new("hits", "counter")).unwrap();
        assert_eq!(column.descriptor(), "FastAddSorted:ulong");
        assert!(factory.type_names().contains(&"counter"));

        for (lid, v) in [3u64, 1, 2].into_iter().enumerate() {
            column.set(lid as LocalId, &Value::UInt64(v)).unwrap();
        }
        column.commit().unwrap();
        let mut result = RoaringBitmap::new();
        let mut details = ExecutionDetails::new();
        column
            .where_matches(Operator::LessThan, &Value::Int32(3), &mut result, &mut details)
            .unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![1, 2]);
    }
}
