//! Fast-add sorted column
//!
//! Like [`SortedColumn`](crate::sorted::SortedColumn), but appended ids are
//! parked past a committed boundary and only merged into order on
//! [`Column::commit`]. Queries and lookups see the committed prefix only, so
//! callers must commit after a batch of appends and before querying it.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringBitmap;
use tracing::{debug, warn};

use quarry_common::config::SortedConfig;
use quarry_common::{metrics, Error, LocalId, Operator, Result};

use crate::binary;
use crate::column::{check_lid, check_size, to_lid, Column, LookupResult, VerificationLevel};
use crate::diagnostics::ExecutionDetails;
use crate::element::ColumnElement;
use crate::sorted::{
    collect_ranges, find_position, key_position, lookup, matching_ranges, read_permutation,
    reposition, sort_ids, verify_permutation,
};

/// Sorted wrapper with deferred ordering of appends
pub struct FastAddSortedColumn<T: ColumnElement> {
    inner: Box<dyn Column<T>>,
    order: Vec<LocalId>,
    committed: usize,
    scratch: Vec<LocalId>,
    config: SortedConfig,
}

impl<T: ColumnElement> FastAddSortedColumn<T> {
    /// Wrap `inner`; anything it already holds is committed immediately
    pub fn new(inner: Box<dyn Column<T>>, config: SortedConfig) -> Result<Self> {
        let order = (0..inner.count()).map(to_lid).collect::<Result<Vec<_>>>()?;
        let mut column = Self {
            inner,
            order,
            committed: 0,
            scratch: Vec::new(),
            config,
        };
        column.commit()?;
        Ok(column)
    }

    /// Ids appended since the last commit
    pub fn pending(&self) -> usize {
        self.order.len() - self.committed
    }

    fn committed_order(&self) -> &[LocalId] {
        &self.order[..self.committed]
    }
}

impl<T: ColumnElement> Column<T> for FastAddSortedColumn<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_value(&self) -> &T {
        self.inner.default_value()
    }

    fn count(&self) -> usize {
        self.inner.count()
    }

    fn descriptor(&self) -> String {
        format!("FastAddSorted:{}", self.inner.descriptor())
    }

    fn get(&self, lid: LocalId) -> Result<T> {
        self.inner.get(lid)
    }

    fn get_many(&self, lids: &[LocalId]) -> Result<Vec<T>> {
        self.inner.get_many(lids)
    }

    fn set(&mut self, lid: LocalId, value: T) -> Result<()> {
        let count = self.inner.count();
        if lid as usize == count {
            self.inner.set(lid, value)?;
            self.order.push(lid);
            return Ok(());
        }

        check_lid(lid, count)?;
        // Ids past the boundary have no position yet
        if lid as usize >= self.committed {
            return self.inner.set(lid, value);
        }

        let prefix = &self.order[..self.committed];
        let old_pos = find_position(self.inner.as_ref(), prefix, lid)?;
        let target = key_position(self.inner.as_ref(), prefix, &value, lid)?;
        self.inner.set(lid, value)?;
        reposition(&mut self.order[..self.committed], old_pos, target);
        Ok(())
    }

    fn set_size(&mut self, size: usize) -> Result<()> {
        check_size(size)?;
        let count = self.inner.count();
        if size > count {
            self.inner.set_size(size)?;
            for id in count..size {
                self.order.push(to_lid(id)?);
            }
        } else if size < count {
            self.inner.set_size(size)?;
            self.committed = self.order[..self.committed]
                .iter()
                .filter(|&&id| (id as usize) < size)
                .count();
            self.order.retain(|&id| (id as usize) < size);
        }
        Ok(())
    }

    /// Sort the pending suffix and merge it into the committed prefix
    fn commit(&mut self) -> Result<()> {
        self.inner.commit()?;
        let pending = self.pending();
        if pending == 0 {
            return Ok(());
        }

        let suffix = sort_ids(self.inner.as_ref(), &self.order[self.committed..])?;

        self.scratch.clear();
        self.scratch.reserve(self.order.len());
        let mut prefix = self.order[..self.committed].iter().copied().peekable();
        let mut suffix = suffix.into_iter().peekable();
        loop {
            let take_prefix = match (prefix.peek(), suffix.peek()) {
                (Some(&p), Some((value, id))) => {
                    let ord = self.inner.get(p)?.compare(value).then(p.cmp(id));
                    ord == std::cmp::Ordering::Less
                }
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_prefix {
                if let Some(p) = prefix.next() {
                    self.scratch.push(p);
                }
            } else if let Some((_, id)) = suffix.next() {
                self.scratch.push(id);
            }
        }

        std::mem::swap(&mut self.order, &mut self.scratch);
        self.committed = self.order.len();
        metrics::record_commit(pending as u64);
        debug!(column = self.name(), pending, total = self.committed, "committed fast-add rows");

        if self.config.verify_on_commit {
            let mut details = ExecutionDetails::new();
            self.verify_consistency(VerificationLevel::Quick, &mut details);
            for finding in details.errors() {
                warn!(column = self.name(), %finding, "inconsistent after commit");
            }
        }
        Ok(())
    }

    fn try_evaluate(&self, lid: LocalId, op: Operator, value: &T) -> Result<Option<bool>> {
        self.inner.try_evaluate(lid, op, value)
    }

    fn try_where(&self, op: Operator, value: &T, result: &mut RoaringBitmap) -> Result<bool> {
        let order = self.committed_order();
        match matching_ranges(self.inner.as_ref(), order, op, value)? {
            Some(ranges) => {
                collect_ranges(order, &ranges, result);
                Ok(true)
            }
            None => self.inner.try_where(op, value, result),
        }
    }

    fn sort_order(&self) -> Option<&[LocalId]> {
        Some(self.committed_order())
    }

    fn try_lookup(&self, value: &T) -> Result<Option<LookupResult>> {
        lookup(self.inner.as_ref(), self.committed_order(), value).map(Some)
    }

    fn verify_consistency(&self, level: VerificationLevel, details: &mut ExecutionDetails) {
        verify_permutation(self.inner.as_ref(), &self.order, self.committed, level, details);
        self.inner.verify_consistency(level, details);
    }

    fn write_binary(&self, w: &mut dyn Write) -> Result<()> {
        self.inner.write_binary(w)?;
        binary::write_lids(w, &self.order)?;
        w.write_u32::<LittleEndian>(self.committed as u32)?;
        Ok(())
    }

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()> {
        self.inner.read_binary(r)?;
        let order = read_permutation(r, self.inner.count())?;
        let committed = r.read_u32::<LittleEndian>()? as usize;
        if committed > order.len() {
            return Err(Error::corrupt(format!(
                "committed boundary {} past {} ids",
                committed,
                order.len()
            )));
        }
        self.order = order;
        self.committed = committed;
        Ok(())
    }
}
