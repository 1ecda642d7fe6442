//! Untyped column
//!
//! [`DynColumn`] is the column contract over [`Value`] instead of a concrete
//! element type, so schemas can hold heterogeneous stacks behind one type.
//! [`UntypedColumn`] adapts any typed stack to it.

use std::io::{Read, Write};

use roaring::RoaringBitmap;
use tracing::debug;

use quarry_common::{ColumnError, LocalId, Operator, Result, Value};

use crate::column::{Column, LookupResult, VerificationLevel};
use crate::diagnostics::{DiagnosticCode, ExecutionDetails};
use crate::element::ColumnElement;

/// Dynamic-value column contract
pub trait DynColumn: Send + Sync {
    fn name(&self) -> &str;

    /// Core element type name
    fn column_type(&self) -> &'static str;

    fn descriptor(&self) -> String;

    fn count(&self) -> usize;

    fn default_value(&self) -> Value;

    fn get(&self, lid: LocalId) -> Result<Value>;

    fn get_many(&self, lids: &[LocalId]) -> Result<Vec<Value>>;

    /// Convert and store; `Value::Null` stores the default
    fn set(&mut self, lid: LocalId, value: &Value) -> Result<()>;

    fn set_size(&mut self, size: usize) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn try_evaluate(&self, lid: LocalId, op: Operator, value: &Value) -> Result<Option<bool>>;

    fn where_matches(
        &self,
        op: Operator,
        value: &Value,
        result: &mut RoaringBitmap,
        details: &mut ExecutionDetails,
    ) -> Result<()>;

    fn sort_order(&self) -> Option<&[LocalId]>;

    fn try_lookup(&self, value: &Value) -> Result<Option<LookupResult>>;

    fn verify_consistency(&self, level: VerificationLevel, details: &mut ExecutionDetails);

    /// Record a finding when the column holds fewer items than the
    /// partition expects
    fn verify_count(&self, expected: usize, details: &mut ExecutionDetails) {
        if self.count() < expected {
            details.add_error(
                DiagnosticCode::ColumnShortOfExpected,
                self.name(),
                format!("holds {} items, partition expects {}", self.count(), expected),
            );
        }
    }

    fn write_binary(&self, w: &mut dyn Write) -> Result<()>;

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()>;
}

/// Adapter from a typed stack to [`DynColumn`]
pub struct UntypedColumn<T: ColumnElement> {
    inner: Box<dyn Column<T>>,
}

impl<T: ColumnElement> UntypedColumn<T> {
    pub fn new(inner: Box<dyn Column<T>>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &dyn Column<T> {
        self.inner.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn Column<T>> {
        self.inner
    }

    fn convert(&self, value: &Value) -> Option<T> {
        if value.is_null() {
            return Some(self.inner.default_value().clone());
        }
        T::from_value(value)
    }

    fn convert_operand(&self, value: &Value) -> Option<T> {
        if value.is_null() {
            return Some(self.inner.default_value().clone());
        }
        T::from_operand(value)
    }
}

impl<T: ColumnElement> DynColumn for UntypedColumn<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn column_type(&self) -> &'static str {
        self.inner.column_type()
    }

    fn descriptor(&self) -> String {
        self.inner.descriptor()
    }

    fn count(&self) -> usize {
        self.inner.count()
    }

    fn default_value(&self) -> Value {
        self.inner.default_value().to_value()
    }

    fn get(&self, lid: LocalId) -> Result<Value> {
        self.inner.get(lid).map(|v| v.to_value())
    }

    fn get_many(&self, lids: &[LocalId]) -> Result<Vec<Value>> {
        Ok(self
            .inner
            .get_many(lids)?
            .iter()
            .map(ColumnElement::to_value)
            .collect())
    }

    fn set(&mut self, lid: LocalId, value: &Value) -> Result<()> {
        let converted = self.convert(value).ok_or_else(|| ColumnError::TypeMismatch {
            expected: T::TYPE_NAME.to_string(),
            actual: value.type_name().to_string(),
        })?;

        if (lid as usize) < self.inner.count() && self.inner.get(lid)? == converted {
            debug!(column = self.name(), id = lid, "unchanged value, write skipped");
            return Ok(());
        }
        self.inner.set(lid, converted)
    }

    fn set_size(&mut self, size: usize) -> Result<()> {
        self.inner.set_size(size)
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn try_evaluate(&self, lid: LocalId, op: Operator, value: &Value) -> Result<Option<bool>> {
        match self.convert_operand(value) {
            Some(converted) => self.inner.try_evaluate(lid, op, &converted),
            None => Ok(Some(false)),
        }
    }

    fn where_matches(
        &self,
        op: Operator,
        value: &Value,
        result: &mut RoaringBitmap,
        details: &mut ExecutionDetails,
    ) -> Result<()> {
        match self.convert_operand(value) {
            Some(converted) => self.inner.where_matches(op, &converted, result, details),
            None => {
                details.add_error(
                    DiagnosticCode::ConversionFailed,
                    self.name(),
                    format!("cannot compare {} to '{}'", T::TYPE_NAME, value),
                );
                Ok(())
            }
        }
    }

    fn sort_order(&self) -> Option<&[LocalId]> {
        self.inner.sort_order()
    }

    fn try_lookup(&self, value: &Value) -> Result<Option<LookupResult>> {
        let converted = self.convert_operand(value).ok_or_else(|| ColumnError::TypeMismatch {
            expected: T::TYPE_NAME.to_string(),
            actual: value.type_name().to_string(),
        })?;
        self.inner.try_lookup(&converted)
    }

    fn verify_consistency(&self, level: VerificationLevel, details: &mut ExecutionDetails) {
        self.inner.verify_consistency(level, details);
    }

    fn write_binary(&self, w: &mut dyn Write) -> Result<()> {
        self.inner.write_binary(w)
    }

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()> {
        self.inner.read_binary(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::ValueColumn;
    use crate::sorted::SortedColumn;
    use quarry_common::Error;

    fn untyped_ints() -> UntypedColumn<i32> {
        let sorted = SortedColumn::new(Box::new(ValueColumn::new("qty", -1i32))).unwrap();
        UntypedColumn::new(Box::new(sorted))
    }

    #[test]
    fn test_converts_across_types() {
        let mut column = untyped_ints();
        column.set(0, &Value::Int64(12)).unwrap();
        column.set(1, &Value::String("7".into())).unwrap();
        column.set(2, &Value::Float64(3.9)).unwrap();
        column.set(3, &Value::Null).unwrap();

        assert_eq!(column.get(0).unwrap(), Value::Int32(12));
        assert_eq!(column.get(1).unwrap(), Value::Int32(7));
        assert_eq!(column.get(2).unwrap(), Value::Int32(3));
        assert_eq!(column.get(3).unwrap(), Value::Int32(-1));
        assert_eq!(column.sort_order().unwrap(), &[3, 2, 1, 0]);
    }

    #[test]
    fn test_unconvertible_set_is_hard_error() {
        let mut column = untyped_ints();
        let err = column.set(0, &Value::String("many".into())).unwrap_err();
        assert!(matches!(err, Error::Column(ColumnError::TypeMismatch { .. })));
        assert_eq!(column.count(), 0);
    }

    #[test]
    fn test_unconvertible_query_is_soft_failure() {
        let mut column = untyped_ints();
        column.set(0, &Value::Int32(1)).unwrap();
        let mut result = RoaringBitmap::new();
        let mut details = ExecutionDetails::new();
        column
            .where_matches(Operator::Equals, &Value::String("one".into()), &mut result, &mut details)
            .unwrap();
        assert!(result.is_empty());
        assert!(details.has(DiagnosticCode::ConversionFailed));
        assert_eq!(column.try_evaluate(0, Operator::Equals, &Value::Bool(true)).unwrap(), Some(true));
    }

    #[test]
    fn test_fractional_operand_is_not_truncated() {
        let mut column = untyped_ints();
        column.set(0, &Value::Int32(2)).unwrap();
        column.set(1, &Value::Int32(5)).unwrap();

        for op in [Operator::LessThan, Operator::Equals] {
            let mut result = RoaringBitmap::new();
            let mut details = ExecutionDetails::new();
            column
                .where_matches(op, &Value::Float64(2.9), &mut result, &mut details)
                .unwrap();
            assert!(result.is_empty(), "{} 2.9 matched {:?}", op, result);
            assert!(details.has(DiagnosticCode::ConversionFailed));
        }
        let evaluated = column.try_evaluate(0, Operator::Equals, &Value::Float64(2.9));
        assert_eq!(evaluated.unwrap(), Some(false));

        let mut result = RoaringBitmap::new();
        let mut details = ExecutionDetails::new();
        column
            .where_matches(Operator::Equals, &Value::Float64(2.0), &mut result, &mut details)
            .unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0]);
        assert!(details.succeeded());
    }

    #[test]
    fn test_lookup_surfaces_conversion_failure() {
        let mut column = untyped_ints();
        column.set(0, &Value::Int32(4)).unwrap();
        assert_eq!(column.try_lookup(&Value::Int64(4)).unwrap(), Some(LookupResult::Found(0)));

        let err = column.try_lookup(&Value::String("four".into())).unwrap_err();
        assert!(matches!(err, Error::Column(ColumnError::TypeMismatch { .. })));
        assert!(column.try_lookup(&Value::Float64(4.5)).is_err());
    }

    #[test]
    fn test_verify_count_reports_short_column() {
        let mut column = untyped_ints();
        column.set_size(2).unwrap();
        let mut details = ExecutionDetails::new();
        column.verify_count(2, &mut details);
        assert!(details.succeeded());
        column.verify_count(5, &mut details);
        assert!(details.has(DiagnosticCode::ColumnShortOfExpected));
    }
}
