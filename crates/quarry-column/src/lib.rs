//! Quarry Column Engine
//!
//! Per-attribute storage for up to 65,536 rows per partition:
//! - Dense value columns for fixed-size types
//! - Byte block columns for variable-length text and binary content
//! - Sorted and fast-add sorted wrappers for range and prefix queries
//! - Indexed wrapper with an inverted word index for token queries
//! - Untyped adapter and a descriptor-driven column factory
//!
//! Columns perform no internal locking; callers serialize mutation against
//! readers.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod binary;
pub mod byte_block;
pub mod column;
pub mod dense;
pub mod diagnostics;
pub mod element;
pub mod factory;
pub mod fast_add;
pub mod indexed;
pub mod sorted;
pub mod untyped;

pub use byte_block::{ByteBlockColumn, ByteBlockStats};
pub use column::{Column, LookupResult, VerificationLevel};
pub use dense::ValueColumn;
pub use diagnostics::{Diagnostic, DiagnosticCode, ExecutionDetails};
pub use element::{ByteBlock, ColumnElement};
pub use factory::{ColumnDescriptor, ColumnDetails, ColumnFactory, WrapperKind};
pub use fast_add::FastAddSortedColumn;
pub use indexed::{IndexedColumn, SplitterKind, WordIndex, WordSplitter};
pub use sorted::SortedColumn;
pub use untyped::{DynColumn, UntypedColumn};

pub use roaring::RoaringBitmap;
