//! The column contract
//!
//! A column maps each [`LocalId`] below its count to a value and answers
//! predicates over those values. Storage variants implement what they can;
//! wrappers hold one inner column, delegate everything they do not
//! specialize, and keep their own auxiliary structure current on mutation.

use std::io::{Read, Write};

use roaring::RoaringBitmap;
use tracing::warn;

use quarry_common::{metrics, Error, LocalId, Operator, Result};

use crate::diagnostics::{DiagnosticCode, ExecutionDetails};
use crate::element::ColumnElement;

/// How much work a consistency check may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerificationLevel {
    /// Constant-time checks only
    Quick,
    /// Linear checks over auxiliary structures
    Normal,
    /// Everything, including re-reading every stored value
    Full,
}

/// Outcome of an exact-value lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// First id holding the value
    Found(LocalId),
    /// Position in sort order where the value would be inserted
    NotFound(usize),
}

/// Typed column contract
pub trait Column<T: ColumnElement>: Send + Sync {
    /// Name of the innermost storage
    fn name(&self) -> &str;

    fn default_value(&self) -> &T;

    /// Number of ids with a defined value
    fn count(&self) -> usize;

    /// Core element type name
    fn column_type(&self) -> &'static str {
        T::TYPE_NAME
    }

    /// Wrapper stack and core type, outermost first
    fn descriptor(&self) -> String;

    fn get(&self, lid: LocalId) -> Result<T>;

    /// Set a value; `lid == count` appends
    fn set(&mut self, lid: LocalId, value: T) -> Result<()>;

    /// Grow with defaults or truncate the tail
    fn set_size(&mut self, size: usize) -> Result<()>;

    /// Fetch values for an ordered id list
    fn get_many(&self, lids: &[LocalId]) -> Result<Vec<T>> {
        lids.iter().map(|&lid| self.get(lid)).collect()
    }

    /// Make pending appends visible to queries. Only deferred-sort columns
    /// have anything to do here.
    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Test one id; `Ok(None)` when the operator is unsupported
    fn try_evaluate(&self, lid: LocalId, op: Operator, value: &T) -> Result<Option<bool>> {
        Ok(self.get(lid)?.evaluate(op, value))
    }

    /// Bulk evaluation using auxiliary structures. Returns `Ok(false)`,
    /// without touching `result`, when this stack cannot do it in bulk.
    fn try_where(&self, _op: Operator, _value: &T, _result: &mut RoaringBitmap) -> Result<bool> {
        Ok(false)
    }

    /// Ascending permutation of ids, if maintained
    fn sort_order(&self) -> Option<&[LocalId]> {
        None
    }

    /// Exact lookup; `Ok(None)` when unsupported
    fn try_lookup(&self, _value: &T) -> Result<Option<LookupResult>> {
        Ok(None)
    }

    fn verify_consistency(&self, level: VerificationLevel, details: &mut ExecutionDetails);

    fn write_binary(&self, w: &mut dyn Write) -> Result<()>;

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()>;

    /// Add every id matching `op value` to `result`.
    ///
    /// Falls back to a per-item scan when bulk evaluation is unavailable and
    /// records `OperatorNotSupported` when neither path can evaluate `op`.
    fn where_matches(
        &self,
        op: Operator,
        value: &T,
        result: &mut RoaringBitmap,
        details: &mut ExecutionDetails,
    ) -> Result<()> {
        if self.try_where(op, value, result)? {
            return Ok(());
        }

        let mut matches = RoaringBitmap::new();
        for lid in 0..self.count() {
            let lid = to_lid(lid)?;
            match self.try_evaluate(lid, op, value)? {
                Some(true) => {
                    matches.insert(u32::from(lid));
                }
                Some(false) => {}
                None => {
                    warn!(column = self.name(), operator = %op, "operator not supported");
                    metrics::record_unsupported_operator(self.name(), op.symbol());
                    details.add_error(
                        DiagnosticCode::OperatorNotSupported,
                        self.name(),
                        format!("'{}' is not supported by {}", op, self.descriptor()),
                    );
                    return Ok(());
                }
            }
        }

        *result |= matches;
        Ok(())
    }
}

/// Narrow a position to a LocalId
pub(crate) fn to_lid(index: usize) -> Result<LocalId> {
    LocalId::try_from(index).map_err(|_| Error::out_of_range(index, quarry_common::MAX_COUNT))
}

/// Reject ids at or past `count`
pub(crate) fn check_lid(lid: LocalId, count: usize) -> Result<usize> {
    let index = lid as usize;
    if index >= count {
        return Err(Error::out_of_range(index, count));
    }
    Ok(index)
}

/// Reject sizes past the partition limit
pub(crate) fn check_size(size: usize) -> Result<()> {
    if size > quarry_common::MAX_COUNT {
        return Err(quarry_common::ColumnError::CapacityExceeded { requested: size }.into());
    }
    Ok(())
}
