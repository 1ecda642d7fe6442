//! Sorted column
//!
//! Keeps a permutation of ids ordered by `(value, id)` next to any inner
//! column, so equality, range and prefix predicates resolve to one
//! contiguous slice of the permutation found by binary search.
//!
//! The search and verification helpers here are shared with
//! [`FastAddSortedColumn`](crate::fast_add::FastAddSortedColumn), which
//! applies them to its committed prefix only.

use std::cmp::Ordering;
use std::io::{Read, Write};
use std::ops::Range;

use roaring::RoaringBitmap;
use tracing::warn;

use quarry_common::{Error, LocalId, Operator, Result};

use crate::binary;
use crate::column::{check_lid, check_size, to_lid, Column, LookupResult, VerificationLevel};
use crate::diagnostics::{DiagnosticCode, ExecutionDetails};
use crate::element::ColumnElement;

// ============================================================================
// Permutation helpers
// ============================================================================

/// First index in `order` for which `pred` is false. `pred` must be true on
/// a prefix and false on the rest.
fn partition_point(
    order: &[LocalId],
    mut pred: impl FnMut(LocalId) -> Result<bool>,
) -> Result<usize> {
    let (mut lo, mut hi) = (0usize, order.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(order[mid])? {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// First position whose value is not below `value`
pub(crate) fn lower_bound<T: ColumnElement>(
    inner: &dyn Column<T>,
    order: &[LocalId],
    value: &T,
) -> Result<usize> {
    partition_point(order, |id| Ok(inner.get(id)?.compare(value) == Ordering::Less))
}

/// First position whose value is above `value`
pub(crate) fn upper_bound<T: ColumnElement>(
    inner: &dyn Column<T>,
    order: &[LocalId],
    value: &T,
) -> Result<usize> {
    partition_point(order, |id| Ok(inner.get(id)?.compare(value) != Ordering::Greater))
}

/// Position at which `(value, lid)` sorts. Valid whether or not `lid` is
/// currently in `order` holding some other value.
pub(crate) fn key_position<T: ColumnElement>(
    inner: &dyn Column<T>,
    order: &[LocalId],
    value: &T,
    lid: LocalId,
) -> Result<usize> {
    partition_point(order, |id| {
        let ord = inner.get(id)?.compare(value).then(id.cmp(&lid));
        Ok(ord == Ordering::Less)
    })
}

/// Ranges of `order` matching `op value`; `None` when the operator has no
/// ordering meaning for this element type.
pub(crate) fn matching_ranges<T: ColumnElement>(
    inner: &dyn Column<T>,
    order: &[LocalId],
    op: Operator,
    value: &T,
) -> Result<Option<Vec<Range<usize>>>> {
    let n = order.len();
    let ranges = match op {
        Operator::Equals => vec![lower_bound(inner, order, value)?..upper_bound(inner, order, value)?],
        Operator::Matches | Operator::MatchesExact if T::MATCHES_IS_EQUALITY => {
            vec![lower_bound(inner, order, value)?..upper_bound(inner, order, value)?]
        }
        Operator::NotEquals => vec![
            0..lower_bound(inner, order, value)?,
            upper_bound(inner, order, value)?..n,
        ],
        Operator::LessThan => vec![0..lower_bound(inner, order, value)?],
        Operator::LessThanOrEqual => vec![0..upper_bound(inner, order, value)?],
        Operator::GreaterThan => vec![upper_bound(inner, order, value)?..n],
        Operator::GreaterThanOrEqual => vec![lower_bound(inner, order, value)?..n],
        Operator::StartsWith => {
            if value.starts_with(value).is_none() {
                return Ok(None);
            }
            // Everything carrying the prefix sorts at or after the prefix itself
            let start = lower_bound(inner, order, value)?;
            let tail = &order[start..];
            let len = partition_point(tail, |id| {
                Ok(inner.get(id)?.starts_with(value).unwrap_or(false))
            })?;
            vec![start..start + len]
        }
        _ => return Ok(None),
    };
    Ok(Some(ranges))
}

/// Add the ids at `ranges` of `order` to `result`
pub(crate) fn collect_ranges(order: &[LocalId], ranges: &[Range<usize>], result: &mut RoaringBitmap) {
    for range in ranges {
        result.extend(order[range.clone()].iter().map(|&id| u32::from(id)));
    }
}

/// Exact lookup on an ordered permutation
pub(crate) fn lookup<T: ColumnElement>(
    inner: &dyn Column<T>,
    order: &[LocalId],
    value: &T,
) -> Result<LookupResult> {
    let pos = lower_bound(inner, order, value)?;
    if let Some(&id) = order.get(pos) {
        if inner.get(id)?.compare(value) == Ordering::Equal {
            return Ok(LookupResult::Found(id));
        }
    }
    Ok(LookupResult::NotFound(pos))
}

/// Sort `ids` by `(value, id)`, reading each value once
pub(crate) fn sort_ids<T: ColumnElement>(
    inner: &dyn Column<T>,
    ids: &[LocalId],
) -> Result<Vec<(T, LocalId)>> {
    let mut keyed = ids
        .iter()
        .map(|&id| Ok((inner.get(id)?, id)))
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by(|a, b| a.0.compare(&b.0).then(a.1.cmp(&b.1)));
    Ok(keyed)
}

/// Check that `order` is a bijection on `0..count` and that `sorted_len`
/// leading entries are in `(value, id)` order.
pub(crate) fn verify_permutation<T: ColumnElement>(
    inner: &dyn Column<T>,
    order: &[LocalId],
    sorted_len: usize,
    level: VerificationLevel,
    details: &mut ExecutionDetails,
) {
    let name = inner.name();
    let count = inner.count();
    if order.len() != count {
        details.add_error(
            DiagnosticCode::SortedCountMismatch,
            name,
            format!("permutation has {} ids, column has {}", order.len(), count),
        );
    }
    if level == VerificationLevel::Quick {
        return;
    }

    let mut seen = vec![false; count];
    for &id in order {
        match seen.get_mut(id as usize) {
            Some(flag) if *flag => details.add_error(
                DiagnosticCode::SortedDuplicateId,
                name,
                format!("id {} appears more than once", id),
            ),
            Some(flag) => *flag = true,
            None => details.add_error(
                DiagnosticCode::SortedCountMismatch,
                name,
                format!("id {} is past count {}", id, count),
            ),
        }
    }
    let missing = seen.iter().filter(|&&flag| !flag).count();
    if missing > 0 {
        details.add_error(
            DiagnosticCode::SortedMissingId,
            name,
            format!("{} ids are missing from the permutation", missing),
        );
    }

    if level < VerificationLevel::Full {
        return;
    }

    let prefix = &order[..sorted_len.min(order.len())];
    let mut previous: Option<(T, LocalId)> = None;
    for &id in prefix {
        let Ok(value) = inner.get(id) else {
            continue;
        };
        if let Some((prev_value, prev_id)) = &previous {
            let ord = prev_value.compare(&value).then(prev_id.cmp(&id));
            if ord != Ordering::Less {
                details.add_error(
                    DiagnosticCode::SortedOutOfOrder,
                    name,
                    format!("id {} sorts after id {}", prev_id, id),
                );
            }
        }
        previous = Some((value, id));
    }
}

/// Read a permutation written by [`binary::write_lids`] and check it fits
/// `count`.
pub(crate) fn read_permutation(r: &mut dyn Read, count: usize) -> Result<Vec<LocalId>> {
    let order = binary::read_lids(r)?;
    if order.len() != count {
        return Err(Error::corrupt(format!(
            "permutation has {} ids, column has {}",
            order.len(),
            count
        )));
    }
    if let Some(&id) = order.iter().find(|&&id| id as usize >= count) {
        return Err(Error::corrupt(format!("permutation id {} past count {}", id, count)));
    }
    Ok(order)
}

/// Move `lid` from `old_pos` to the slot `target` computed against the
/// unmodified array, shifting only the entries in between.
pub(crate) fn reposition(order: &mut [LocalId], old_pos: usize, target: usize) {
    if target > old_pos {
        order[old_pos..target].rotate_left(1);
    } else if target < old_pos {
        order[target..=old_pos].rotate_right(1);
    }
}

/// Locate `lid` in a sorted permutation by its current value
pub(crate) fn find_position<T: ColumnElement>(
    inner: &dyn Column<T>,
    order: &[LocalId],
    lid: LocalId,
) -> Result<usize> {
    let current = inner.get(lid)?;
    let pos = key_position(inner, order, &current, lid)?;
    if order.get(pos) != Some(&lid) {
        return Err(Error::corrupt(format!(
            "{}: id {} is not where its value sorts",
            inner.name(),
            lid
        )));
    }
    Ok(pos)
}

// ============================================================================
// SortedColumn
// ============================================================================

/// Wrapper maintaining an ascending permutation on every mutation
pub struct SortedColumn<T: ColumnElement> {
    inner: Box<dyn Column<T>>,
    order: Vec<LocalId>,
}

impl<T: ColumnElement> SortedColumn<T> {
    /// Wrap `inner`, sorting whatever it already holds
    pub fn new(inner: Box<dyn Column<T>>) -> Result<Self> {
        let ids = (0..inner.count()).map(to_lid).collect::<Result<Vec<_>>>()?;
        let order = sort_ids(inner.as_ref(), &ids)?.into_iter().map(|(_, id)| id).collect();
        Ok(Self { inner, order })
    }

    pub fn inner(&self) -> &dyn Column<T> {
        self.inner.as_ref()
    }
}

impl<T: ColumnElement> Column<T> for SortedColumn<T> {
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
        format!("Sorted:{}", self.inner.descriptor())
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
            let pos = key_position(self.inner.as_ref(), &self.order, &value, lid)?;
            self.inner.set(lid, value)?;
            self.order.insert(pos, lid);
            return Ok(());
        }

        check_lid(lid, count)?;
        let old_pos = find_position(self.inner.as_ref(), &self.order, lid)?;
        let target = key_position(self.inner.as_ref(), &self.order, &value, lid)?;
        self.inner.set(lid, value)?;
        reposition(&mut self.order, old_pos, target);
        Ok(())
    }

    fn set_size(&mut self, size: usize) -> Result<()> {
        check_size(size)?;
        let count = self.inner.count();
        if size > count {
            // New ids carry the default and the largest ids, so they sort as
            // one block after every existing default.
            let pos = upper_bound(self.inner.as_ref(), &self.order, self.inner.default_value())?;
            self.inner.set_size(size)?;
            let added = (count..size).map(to_lid).collect::<Result<Vec<_>>>()?;
            self.order.splice(pos..pos, added);
        } else if size < count {
            self.inner.set_size(size)?;
            self.order.retain(|&id| (id as usize) < size);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn try_evaluate(&self, lid: LocalId, op: Operator, value: &T) -> Result<Option<bool>> {
        self.inner.try_evaluate(lid, op, value)
    }

    fn try_where(&self, op: Operator, value: &T, result: &mut RoaringBitmap) -> Result<bool> {
        match matching_ranges(self.inner.as_ref(), &self.order, op, value)? {
            Some(ranges) => {
                collect_ranges(&self.order, &ranges, result);
                Ok(true)
            }
            None => self.inner.try_where(op, value, result),
        }
    }

    fn sort_order(&self) -> Option<&[LocalId]> {
        Some(&self.order)
    }

    fn try_lookup(&self, value: &T) -> Result<Option<LookupResult>> {
        lookup(self.inner.as_ref(), &self.order, value).map(Some)
    }

    fn verify_consistency(&self, level: VerificationLevel, details: &mut ExecutionDetails) {
        let mut own = ExecutionDetails::new();
        verify_permutation(self.inner.as_ref(), &self.order, self.order.len(), level, &mut own);
        if !own.succeeded() {
            warn!(column = self.name(), findings = own.errors().len(), "sort order inconsistent");
        }
        details.merge(own);
        self.inner.verify_consistency(level, details);
    }

    fn write_binary(&self, w: &mut dyn Write) -> Result<()> {
        self.inner.write_binary(w)?;
        binary::write_lids(w, &self.order)
    }

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()> {
        self.inner.read_binary(r)?;
        self.order = read_permutation(r, self.inner.count())?;
        Ok(())
    }
}
