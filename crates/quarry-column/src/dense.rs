//! Dense value column
//!
//! One fixed-size value per slot in a single growable array. It answers
//! single-item predicates only; ordered and indexed queries come from
//! wrappers.

use std::io::{Read, Write};

use quarry_common::{Error, LocalId, Result};

use crate::binary;
use crate::column::{check_lid, check_size, Column, VerificationLevel};
use crate::diagnostics::ExecutionDetails;
use crate::element::ColumnElement;

/// Flat array of fixed-size comparable values
pub struct ValueColumn<T: ColumnElement> {
    name: String,
    default_value: T,
    values: Vec<T>,
}

impl<T: ColumnElement> ValueColumn<T> {
    pub fn new(name: impl Into<String>, default_value: T) -> Self {
        Self {
            name: name.into(),
            default_value,
            values: Vec::new(),
        }
    }

    /// Create a column with room for `capacity` rows before reallocating
    pub fn with_capacity(name: impl Into<String>, default_value: T, capacity: usize) -> Self {
        Self {
            name: name.into(),
            default_value,
            values: Vec::with_capacity(capacity),
        }
    }

    /// Raw slice of stored values
    pub fn values(&self) -> &[T] {
        &self.values
    }
}

impl<T: ColumnElement> Column<T> for ValueColumn<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_value(&self) -> &T {
        &self.default_value
    }

    fn count(&self) -> usize {
        self.values.len()
    }

    fn descriptor(&self) -> String {
        T::TYPE_NAME.to_string()
    }

    fn get(&self, lid: LocalId) -> Result<T> {
        let index = check_lid(lid, self.values.len())?;
        Ok(self.values[index].clone())
    }

    fn set(&mut self, lid: LocalId, value: T) -> Result<()> {
        let index = lid as usize;
        if index == self.values.len() {
            self.values.push(value);
            return Ok(());
        }
        let index = check_lid(lid, self.values.len())?;
        self.values[index] = value;
        Ok(())
    }

    fn set_size(&mut self, size: usize) -> Result<()> {
        check_size(size)?;
        // Vec::resize drops the truncated tail, so freed slots hold nothing stale.
        self.values.resize(size, self.default_value.clone());
        Ok(())
    }

    fn get_many(&self, lids: &[LocalId]) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(lids.len());
        for &lid in lids {
            let index = check_lid(lid, self.values.len())?;
            out.push(self.values[index].clone());
        }
        Ok(out)
    }

    // A flat array has no auxiliary structure that could drift.
    fn verify_consistency(&self, _level: VerificationLevel, _details: &mut ExecutionDetails) {}

    fn write_binary(&self, w: &mut dyn Write) -> Result<()> {
        binary::write_len(w, self.values.len())?;
        for value in &self.values {
            value.write_to(w)?;
        }
        Ok(())
    }

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()> {
        let count = binary::read_count(r)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(T::read_from(r).map_err(|e| {
                Error::corrupt(format!("{}: reading {} value: {}", self.name, T::TYPE_NAME, e))
            })?);
        }
        self.values = values;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCode;
    use quarry_common::Operator;
    use roaring::RoaringBitmap;

    #[test]
    fn test_append_and_overwrite() {
        let mut column = ValueColumn::new("age", 0i32);
        column.set(0, 30).unwrap();
        column.set(1, 40).unwrap();
        column.set(0, 31).unwrap();
        assert_eq!(column.count(), 2);
        assert_eq!(column.get(0).unwrap(), 31);
        assert_eq!(column.get_many(&[1, 0]).unwrap(), vec![40, 31]);

        // Only the next id may append
        assert!(column.set(5, 1).is_err());
        assert!(column.get(2).is_err());
    }

    #[test]
    fn test_set_size_fills_and_truncates() {
        let mut column = ValueColumn::new("score", -1i64);
        column.set_size(3).unwrap();
        assert_eq!(column.values(), &[-1, -1, -1]);

        column.set(2, 9).unwrap();
        column.set_size(2).unwrap();
        assert_eq!(column.count(), 2);
        column.set_size(3).unwrap();
        assert_eq!(column.get(2).unwrap(), -1);

        assert!(column.set_size(quarry_common::MAX_COUNT + 1).is_err());
    }

    #[test]
    fn test_where_falls_back_to_scan() {
        let mut column = ValueColumn::new("n", 0u16);
        for (lid, v) in [4u16, 9, 4, 1].into_iter().enumerate() {
            column.set(lid as LocalId, v).unwrap();
        }
        let mut details = ExecutionDetails::new();
        let mut result = RoaringBitmap::new();
        column.where_matches(Operator::Equals, &4, &mut result, &mut details).unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec![0, 2]);
        assert!(details.succeeded());

        let mut result = RoaringBitmap::new();
        column.where_matches(Operator::StartsWith, &4, &mut result, &mut details).unwrap();
        assert!(result.is_empty());
        assert!(details.has(DiagnosticCode::OperatorNotSupported));
    }

    #[test]
    fn test_binary_round_trip() {
        let mut column = ValueColumn::new("ratio", 0.0f64);
        column.set(0, 0.25).unwrap();
        column.set(1, -3.5).unwrap();

        let mut buf = Vec::new();
        column.write_binary(&mut buf).unwrap();

        let mut restored = ValueColumn::new("ratio", 0.0f64);
        restored.read_binary(&mut std::io::Cursor::new(buf.clone())).unwrap();
        assert_eq!(restored.values(), column.values());

        buf.truncate(buf.len() - 3);
        let mut broken = ValueColumn::new("ratio", 0.0f64);
        assert!(broken.read_binary(&mut std::io::Cursor::new(buf)).is_err());
    }
}
