//! Byte block column
//!
//! Variable-length values packed into a small number of growable byte
//! buffers ("batches"). Every slot is in exactly one of three states:
//!
//! - empty: length 0, no bytes reserved
//! - shared: `length` bytes at `position` inside a shared batch
//! - huge: the whole of a standalone batch, marked with the length sentinel
//!
//! Writes try, in order: overwrite in place, standalone allocation for huge
//! values, append to the active batch (compacting it first when waste is
//! high), and finally opening a new batch.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, trace, warn};

use quarry_common::config::{ByteBlockConfig, HUGE_LENGTH_SENTINEL};
use quarry_common::{metrics, ColumnError, Error, LocalId, Result, MAX_COUNT};

use crate::binary;
use crate::column::{check_lid, check_size, Column, VerificationLevel};
use crate::diagnostics::{DiagnosticCode, ExecutionDetails};
use crate::element::{ByteBlock, ColumnElement};

/// Where one value lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Placement {
    batch: u32,
    position: u32,
    length: u16,
}

impl Placement {
    const EMPTY: Placement = Placement {
        batch: 0,
        position: 0,
        length: 0,
    };

    fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn is_huge(&self) -> bool {
        self.length == HUGE_LENGTH_SENTINEL
    }

    fn is_shared(&self) -> bool {
        !self.is_empty() && !self.is_huge()
    }

    fn range(&self) -> std::ops::Range<usize> {
        let start = self.position as usize;
        start..start + self.length as usize
    }
}

/// One growable byte buffer
#[derive(Debug, Clone, Default)]
struct Batch {
    data: Vec<u8>,
    used: usize,
    waste: usize,
}

impl Batch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            used: 0,
            waste: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn free_space(&self) -> usize {
        self.capacity() - self.used
    }

    fn waste_exceeds(&self, percent: usize) -> bool {
        self.waste > 0 && self.waste * 100 >= self.capacity() * percent
    }
}

/// Space accounting snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteBlockStats {
    pub batches: usize,
    pub huge_values: usize,
    pub capacity: usize,
    pub used: usize,
    pub waste: usize,
}

/// Column of variable-length byte values
pub struct ByteBlockColumn {
    name: String,
    default_value: ByteBlock,
    placements: Vec<Placement>,
    batches: Vec<Batch>,
    active: Option<usize>,
    free_batches: Vec<usize>,
    config: ByteBlockConfig,
}

impl ByteBlockColumn {
    pub fn new(name: impl Into<String>, default_value: ByteBlock) -> Self {
        Self::from_parts(name.into(), default_value, ByteBlockConfig::default())
    }

    /// Column with custom placement settings; rejects settings whose
    /// threshold would not fit a shared placement length.
    pub fn with_config(
        name: impl Into<String>,
        default_value: ByteBlock,
        config: ByteBlockConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(name.into(), default_value, config))
    }

    fn from_parts(name: String, default_value: ByteBlock, config: ByteBlockConfig) -> Self {
        Self {
            name,
            default_value,
            placements: Vec::new(),
            batches: Vec::new(),
            active: None,
            free_batches: Vec::new(),
            config,
        }
    }

    /// Borrow the stored bytes for `lid` without copying
    pub fn bytes(&self, lid: LocalId) -> Result<&[u8]> {
        let index = check_lid(lid, self.placements.len())?;
        let placement = self.placements[index];
        if placement.is_empty() {
            return Ok(&[]);
        }
        let batch = self
            .batches
            .get(placement.batch as usize)
            .ok_or_else(|| Error::corrupt(format!("{}: dangling batch for id {}", self.name, lid)))?;
        if placement.is_huge() {
            return Ok(&batch.data);
        }
        batch
            .data
            .get(placement.range())
            .ok_or_else(|| Error::corrupt(format!("{}: placement past batch end for id {}", self.name, lid)))
    }

    pub fn memory_stats(&self) -> ByteBlockStats {
        let mut stats = ByteBlockStats {
            batches: self.batches.len(),
            ..ByteBlockStats::default()
        };
        for batch in &self.batches {
            stats.capacity += batch.capacity();
            stats.used += batch.used;
            stats.waste += batch.waste;
        }
        stats.huge_values = self.placements.iter().filter(|p| p.is_huge()).count();
        stats
    }

    fn write_value(&mut self, index: usize, bytes: &[u8]) {
        let old = self.placements[index];
        let len = bytes.len();

        // In place: only over a shared reservation at least as long
        if old.is_shared() && old.length as usize >= len {
            let batch = &mut self.batches[old.batch as usize];
            let start = old.position as usize;
            let end = start + old.length as usize;
            batch.data[start..start + len].copy_from_slice(bytes);
            batch.data[start + len..end].fill(0);
            batch.waste += old.length as usize - len;
            self.placements[index] = if len == 0 {
                Placement::EMPTY
            } else {
                Placement {
                    length: len as u16,
                    ..old
                }
            };
            trace!(column = %self.name, id = index, len, "byte block written in place");
            return;
        }

        self.dispose(index);
        if len == 0 {
            return;
        }

        if len >= self.config.huge_value_threshold {
            let batch = self.allocate_batch(0);
            self.batches[batch] = Batch {
                data: bytes.to_vec(),
                used: len,
                waste: 0,
            };
            self.placements[index] = Placement {
                batch: batch as u32,
                position: 0,
                length: HUGE_LENGTH_SENTINEL,
            };
            metrics::record_huge_allocation(len as u64);
            trace!(column = %self.name, id = index, len, batch, "byte block stored alone");
            return;
        }

        let active = self.active;
        let batch = match active {
            Some(active) if self.make_room(active, len) => active,
            _ => {
                let capacity = len.max(self.config.initial_batch_size);
                let batch = self.allocate_batch(capacity);
                self.active = Some(batch);
                batch
            }
        };

        let target = &mut self.batches[batch];
        let position = target.used;
        target.data[position..position + len].copy_from_slice(bytes);
        target.used += len;
        self.placements[index] = Placement {
            batch: batch as u32,
            position: position as u32,
            length: len as u16,
        };
        trace!(column = %self.name, id = index, len, batch, position, "byte block appended");
    }

    /// Ensure the active batch can take `len` more bytes, compacting or
    /// growing it if needed.
    fn make_room(&mut self, batch: usize, len: usize) -> bool {
        if self.batches[batch].free_space() >= len {
            return true;
        }
        if self.batches[batch].waste_exceeds(self.config.compaction_waste_percent) {
            self.compact(batch);
            if self.batches[batch].free_space() >= len {
                return true;
            }
        }

        let target = &mut self.batches[batch];
        let needed = target.used + len;
        if needed > self.config.max_batch_size {
            return false;
        }
        let grown = (target.capacity() * 2).max(needed).min(self.config.max_batch_size);
        target.data.resize(grown, 0);
        true
    }

    /// Release whatever `index` currently occupies and leave it empty.
    fn dispose(&mut self, index: usize) {
        let old = std::mem::replace(&mut self.placements[index], Placement::EMPTY);
        if old.is_empty() {
            return;
        }

        let batch_index = old.batch as usize;
        if old.is_huge() {
            self.batches[batch_index] = Batch::default();
            self.free_batches.push(batch_index);
            return;
        }

        let batch = &mut self.batches[batch_index];
        batch.data[old.range()].fill(0);
        batch.waste += old.length as usize;
        if batch.waste_exceeds(self.config.compaction_waste_percent) {
            self.compact(batch_index);
        }
    }

    /// Rewrite the live values of a shared batch contiguously.
    fn compact(&mut self, batch_index: usize) {
        let mut live: Vec<usize> = self
            .placements
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_shared() && p.batch as usize == batch_index)
            .map(|(i, _)| i)
            .collect();
        live.sort_unstable_by_key(|&i| self.placements[i].position);

        let live_bytes: usize = live.iter().map(|&i| self.placements[i].length as usize).sum();
        let is_active = self.active == Some(batch_index);
        let old = std::mem::take(&mut self.batches[batch_index]);
        let capacity = if is_active {
            old.capacity().max(live_bytes)
        } else {
            live_bytes
        };

        let mut data = vec![0u8; capacity];
        let mut cursor = 0usize;
        for &i in &live {
            let placement = &mut self.placements[i];
            let len = placement.length as usize;
            data[cursor..cursor + len].copy_from_slice(&old.data[placement.range()]);
            placement.position = cursor as u32;
            cursor += len;
        }

        debug!(
            column = %self.name,
            batch = batch_index,
            reclaimed = old.waste,
            live = cursor,
            capacity,
            "compacted byte block batch"
        );
        metrics::record_compaction(old.used as u64, cursor as u64);

        self.batches[batch_index] = Batch {
            data,
            used: cursor,
            waste: 0,
        };
        if capacity == 0 && !is_active {
            self.free_batches.push(batch_index);
        }
    }

    /// Hand out a batch slot, reusing released ones first
    fn allocate_batch(&mut self, capacity: usize) -> usize {
        let batch = Batch::with_capacity(capacity);
        if let Some(index) = self.free_batches.pop() {
            self.batches[index] = batch;
            index
        } else {
            self.batches.push(batch);
            self.batches.len() - 1
        }
    }

    fn check_placements(&self, level: VerificationLevel, details: &mut ExecutionDetails) {
        if let Some(active) = self.active {
            if active >= self.batches.len() {
                details.add_error(
                    DiagnosticCode::DanglingBatchReference,
                    &self.name,
                    format!("active batch {} of {}", active, self.batches.len()),
                );
            }
        }
        if level == VerificationLevel::Quick {
            return;
        }

        let mut live_per_batch = vec![0usize; self.batches.len()];
        let mut ranges: Vec<(usize, usize, usize)> = Vec::new();
        for (lid, placement) in self.placements.iter().enumerate() {
            if placement.is_empty() {
                continue;
            }
            let Some(batch) = self.batches.get(placement.batch as usize) else {
                details.add_error(
                    DiagnosticCode::DanglingBatchReference,
                    &self.name,
                    format!("id {} references batch {}", lid, placement.batch),
                );
                continue;
            };
            if placement.is_huge() {
                if placement.position != 0 || batch.capacity() == 0 {
                    details.add_error(
                        DiagnosticCode::PlacementOutOfRange,
                        &self.name,
                        format!("huge id {} has no standalone batch", lid),
                    );
                }
                continue;
            }
            let range = placement.range();
            if range.end > batch.used {
                details.add_error(
                    DiagnosticCode::PlacementOutOfRange,
                    &self.name,
                    format!("id {} spans {:?} past used {}", lid, range, batch.used),
                );
                continue;
            }
            live_per_batch[placement.batch as usize] += range.len();
            ranges.push((placement.batch as usize, range.start, range.end));
        }

        if level < VerificationLevel::Full {
            return;
        }

        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a.0 == b.0 && b.1 < a.2 {
                details.add_error(
                    DiagnosticCode::OverlappingPlacement,
                    &self.name,
                    format!("batch {} ranges {}..{} and {}..{} overlap", a.0, a.1, a.2, b.1, b.2),
                );
            }
        }

        let huge: Vec<bool> = {
            let mut huge = vec![false; self.batches.len()];
            for placement in self.placements.iter().filter(|p| p.is_huge()) {
                if let Some(flag) = huge.get_mut(placement.batch as usize) {
                    *flag = true;
                }
            }
            huge
        };
        for (index, batch) in self.batches.iter().enumerate() {
            if huge[index] {
                continue;
            }
            if live_per_batch[index] + batch.waste != batch.used {
                details.add_error(
                    DiagnosticCode::BatchAccountingMismatch,
                    &self.name,
                    format!(
                        "batch {}: live {} + waste {} != used {}",
                        index, live_per_batch[index], batch.waste, batch.used
                    ),
                );
            }
        }
    }

    fn rebuild_free_list(&mut self) {
        let mut referenced = vec![false; self.batches.len()];
        for placement in self.placements.iter().filter(|p| !p.is_empty()) {
            referenced[placement.batch as usize] = true;
        }
        self.free_batches = (0..self.batches.len())
            .filter(|&b| !referenced[b] && self.active != Some(b) && self.batches[b].capacity() == 0)
            .collect();
    }
}

impl Column<ByteBlock> for ByteBlockColumn {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_value(&self) -> &ByteBlock {
        &self.default_value
    }

    fn count(&self) -> usize {
        self.placements.len()
    }

    fn descriptor(&self) -> String {
        ByteBlock::TYPE_NAME.to_string()
    }

    fn get(&self, lid: LocalId) -> Result<ByteBlock> {
        self.bytes(lid).map(ByteBlock::from)
    }

    fn set(&mut self, lid: LocalId, value: ByteBlock) -> Result<()> {
        let index = lid as usize;
        if index == self.placements.len() {
            self.placements.push(Placement::EMPTY);
        }
        let index = check_lid(lid, self.placements.len())?;
        self.write_value(index, value.as_bytes());
        Ok(())
    }

    fn set_size(&mut self, size: usize) -> Result<()> {
        check_size(size)?;
        let count = self.placements.len();
        if size < count {
            for index in size..count {
                self.dispose(index);
            }
            self.placements.truncate(size);
        } else if size > count {
            self.placements.resize(size, Placement::EMPTY);
            if !self.default_value.is_empty() {
                let default = self.default_value.clone();
                for index in count..size {
                    self.write_value(index, default.as_bytes());
                }
            }
        }
        Ok(())
    }

    fn verify_consistency(&self, level: VerificationLevel, details: &mut ExecutionDetails) {
        let before = details.errors().len();
        self.check_placements(level, details);
        let findings = details.errors().len() - before;
        if findings > 0 {
            warn!(column = %self.name, findings, "byte block storage inconsistent");
        }
    }

    fn write_binary(&self, w: &mut dyn Write) -> Result<()> {
        binary::write_len(w, self.placements.len())?;
        binary::write_len(w, self.batches.len())?;
        let active = match self.active {
            Some(index) => i32::try_from(index)
                .map_err(|_| Error::Serialization("active batch index too large".into()))?,
            None => -1,
        };
        w.write_i32::<LittleEndian>(active)?;

        for placement in &self.placements {
            w.write_u32::<LittleEndian>(placement.batch)?;
            w.write_u32::<LittleEndian>(placement.position)?;
            w.write_u16::<LittleEndian>(placement.length)?;
        }

        for batch in &self.batches {
            binary::write_len(w, batch.used)?;
            binary::write_len(w, batch.waste)?;
            binary::write_len(w, batch.capacity())?;
            w.write_all(&batch.data)?;
        }
        Ok(())
    }

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()> {
        let count = binary::read_count(r)?;
        let batch_count = binary::read_len(r, u32::MAX as usize, "batch count")?;
        let active = r.read_i32::<LittleEndian>()?;
        let active = match active {
            -1 => None,
            index if index >= 0 && (index as usize) < batch_count => Some(index as usize),
            other => return Err(Error::corrupt(format!("active batch {} of {}", other, batch_count))),
        };

        let mut placements = Vec::with_capacity(count);
        for _ in 0..count {
            let placement = Placement {
                batch: r.read_u32::<LittleEndian>()?,
                position: r.read_u32::<LittleEndian>()?,
                length: r.read_u16::<LittleEndian>()?,
            };
            if !placement.is_empty() && placement.batch as usize >= batch_count {
                return Err(Error::corrupt(format!(
                    "placement references batch {} of {}",
                    placement.batch, batch_count
                )));
            }
            placements.push(placement);
        }

        let mut standalone = vec![false; batch_count];
        for placement in placements.iter().filter(|p| p.is_huge()) {
            standalone[placement.batch as usize] = true;
        }
        let shared_limit = self.config.max_batch_size.max(self.config.huge_value_threshold);

        let mut batches = Vec::with_capacity(batch_count.min(MAX_COUNT));
        for is_standalone in standalone {
            let used = binary::read_len(r, u32::MAX as usize, "used space")?;
            let waste = binary::read_len(r, used, "waste space")?;
            let limit = if is_standalone { u32::MAX as usize } else { shared_limit };
            let capacity = binary::read_len(r, limit, "batch capacity")?;
            if used > capacity {
                return Err(Error::corrupt(format!("used {} exceeds capacity {}", used, capacity)));
            }
            // Standalone lengths are unbounded; let the buffer grow with the stream
            let mut data = Vec::with_capacity(capacity.min(shared_limit));
            Read::take(&mut *r, capacity as u64).read_to_end(&mut data)?;
            if data.len() != capacity {
                return Err(Error::corrupt(format!(
                    "batch truncated at {} of {} bytes",
                    data.len(),
                    capacity
                )));
            }
            batches.push(Batch { data, used, waste });
        }

        for placement in placements.iter().filter(|p| p.is_shared()) {
            if placement.range().end > batches[placement.batch as usize].used {
                return Err(ColumnError::CorruptData(format!(
                    "placement {:?} past used space",
                    placement
                ))
                .into());
            }
        }

        self.placements = placements;
        self.batches = batches;
        self.active = active;
        self.rebuild_free_list();
        Ok(())
    }
}
