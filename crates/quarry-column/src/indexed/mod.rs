//! Indexed column
//!
//! Wraps a byte block stack and keeps a [`WordIndex`] in step with its
//! content. `Matches` (token prefix) and `MatchesExact` (whole token) are
//! answered from the index; everything else goes to the inner column.

mod splitter;
mod word_index;

pub use splitter::{tokens, DefaultSplitter, HtmlSplitter, SetSplitter, SplitterKind, WordSplitter};
pub use word_index::WordIndex;

use std::collections::BTreeSet;
use std::io::{Read, Write};

use roaring::RoaringBitmap;
use tracing::warn;

use quarry_common::config::IndexConfig;
use quarry_common::{LocalId, Operator, Result};

use crate::column::{check_lid, check_size, Column, LookupResult, VerificationLevel};
use crate::diagnostics::{DiagnosticCode, ExecutionDetails};
use crate::element::ByteBlock;

/// Byte block wrapper with an inverted word index
pub struct IndexedColumn {
    inner: Box<dyn Column<ByteBlock>>,
    splitter: Box<dyn WordSplitter>,
    index: WordIndex,
    max_word_length: usize,
}

impl IndexedColumn {
    /// Wrap `inner`, indexing whatever it already holds
    pub fn new(
        inner: Box<dyn Column<ByteBlock>>,
        splitter: Box<dyn WordSplitter>,
        config: &IndexConfig,
    ) -> Result<Self> {
        let mut column = Self {
            inner,
            splitter,
            index: WordIndex::new(),
            max_word_length: config.max_word_length,
        };
        column.index = column.rebuild_index()?;
        Ok(column)
    }

    pub fn word_index(&self) -> &WordIndex {
        &self.index
    }

    fn words(&self, value: &ByteBlock) -> BTreeSet<String> {
        tokens(self.splitter.as_ref(), &value.to_str_lossy(), self.max_word_length)
    }

    fn rebuild_index(&self) -> Result<WordIndex> {
        let mut index = WordIndex::new();
        for lid in 0..self.inner.count() {
            let lid = crate::column::to_lid(lid)?;
            index.add(lid, &self.words(&self.inner.get(lid)?));
        }
        Ok(index)
    }

    /// Ids matching every query token; prefix or whole-token match
    fn search(&self, query: &ByteBlock, prefix: bool) -> RoaringBitmap {
        let mut matched: Option<RoaringBitmap> = None;
        for word in self.words(query) {
            let ids = if prefix {
                self.index.prefix(&word)
            } else {
                self.index.exact(&word)
            };
            matched = Some(match matched {
                Some(acc) => acc & ids,
                None => ids,
            });
        }
        matched.unwrap_or_default()
    }
}

impl Column<ByteBlock> for IndexedColumn {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_value(&self) -> &ByteBlock {
        self.inner.default_value()
    }

    fn count(&self) -> usize {
        self.inner.count()
    }

    fn descriptor(&self) -> String {
        match self.splitter.name() {
            "Default" => format!("Indexed:{}", self.inner.descriptor()),
            name => format!("Indexed[{}]:{}", name, self.inner.descriptor()),
        }
    }

    fn get(&self, lid: LocalId) -> Result<ByteBlock> {
        self.inner.get(lid)
    }

    fn get_many(&self, lids: &[LocalId]) -> Result<Vec<ByteBlock>> {
        self.inner.get_many(lids)
    }

    fn set(&mut self, lid: LocalId, value: ByteBlock) -> Result<()> {
        let count = self.inner.count();
        let old_words = if (lid as usize) < count {
            self.words(&self.inner.get(lid)?)
        } else {
            check_lid(lid, count + 1)?;
            BTreeSet::new()
        };
        let new_words = self.words(&value);
        self.inner.set(lid, value)?;

        self.index.remove(lid, old_words.difference(&new_words));
        self.index.add(lid, new_words.difference(&old_words));
        Ok(())
    }

    fn set_size(&mut self, size: usize) -> Result<()> {
        check_size(size)?;
        let count = self.inner.count();
        self.inner.set_size(size)?;
        if size < count {
            self.index.truncate(size);
        } else if size > count {
            let words = self.words(self.inner.default_value());
            if !words.is_empty() {
                let mut added = RoaringBitmap::new();
                added.insert_range(count as u32..size as u32);
                self.index.add_all(&added, &words);
            }
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn try_evaluate(&self, lid: LocalId, op: Operator, value: &ByteBlock) -> Result<Option<bool>> {
        let prefix = match op {
            Operator::Matches => true,
            Operator::MatchesExact => false,
            _ => return self.inner.try_evaluate(lid, op, value),
        };
        let stored = self.words(&self.inner.get(lid)?);
        let query = self.words(value);
        if query.is_empty() {
            return Ok(Some(false));
        }
        let hit = query.iter().all(|q| {
            if prefix {
                stored.iter().any(|w| w.starts_with(q.as_str()))
            } else {
                stored.contains(q)
            }
        });
        Ok(Some(hit))
    }

    fn try_where(&self, op: Operator, value: &ByteBlock, result: &mut RoaringBitmap) -> Result<bool> {
        match op {
            Operator::Matches => *result |= self.search(value, true),
            Operator::MatchesExact => *result |= self.search(value, false),
            _ => return self.inner.try_where(op, value, result),
        }
        Ok(true)
    }

    fn sort_order(&self) -> Option<&[LocalId]> {
        self.inner.sort_order()
    }

    fn try_lookup(&self, value: &ByteBlock) -> Result<Option<LookupResult>> {
        self.inner.try_lookup(value)
    }

    fn verify_consistency(&self, level: VerificationLevel, details: &mut ExecutionDetails) {
        self.inner.verify_consistency(level, details);
        if level == VerificationLevel::Quick {
            return;
        }

        let count = self.inner.count();
        let mut findings = 0usize;
        for (word, ids) in self.index.iter() {
            if let Some(max) = ids.max() {
                if max as usize >= count {
                    findings += 1;
                    details.add_error(
                        DiagnosticCode::IndexIdOutOfRange,
                        self.name(),
                        format!("word '{}' references id {} past count {}", word, max, count),
                    );
                }
            }
        }

        if level == VerificationLevel::Full {
            match self.rebuild_index() {
                Ok(expected) if expected != self.index => {
                    findings += 1;
                    details.add_error(
                        DiagnosticCode::IndexStorageDesync,
                        self.name(),
                        format!(
                            "index holds {} words, stored values produce {}",
                            self.index.len(),
                            expected.len()
                        ),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    findings += 1;
                    details.add_error(
                        DiagnosticCode::IndexStorageDesync,
                        self.name(),
                        format!("stored values unreadable: {}", e),
                    );
                }
            }
        }

        if findings > 0 {
            warn!(column = self.name(), findings, "word index inconsistent");
        }
    }

    fn write_binary(&self, w: &mut dyn Write) -> Result<()> {
        self.inner.write_binary(w)?;
        self.index.write_to(w)
    }

    fn read_binary(&mut self, r: &mut dyn Read) -> Result<()> {
        self.inner.read_binary(r)?;
        self.index = WordIndex::read_from(r)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_block::ByteBlockColumn;
    use crate::sorted::SortedColumn;
    use std::io::Cursor;

    fn indexed(kind: SplitterKind) -> IndexedColumn {
        let inner = ByteBlockColumn::new("body", ByteBlock::default());
        IndexedColumn::new(Box::new(inner), kind.build(), &IndexConfig::default()).unwrap()
    }

    fn matching(column: &IndexedColumn, op: Operator, query: &str) -> Vec<u32> {
        let mut result = RoaringBitmap::new();
        let mut details = ExecutionDetails::new();
        column
            .where_matches(op, &ByteBlock::from(query), &mut result, &mut details)
            .unwrap();
        assert!(details.succeeded());
        result.iter().collect()
    }

    #[test]
    fn test_exact_and_prefix_token_match() {
        let mut column = indexed(SplitterKind::Default);
        column.set(0, "The quick brown fox".into()).unwrap();
        column.set(1, "Quicksilver moves".into()).unwrap();
        column.set(2, "brown bread".into()).unwrap();

        assert_eq!(matching(&column, Operator::MatchesExact, "QUICK"), vec![0]);
        assert_eq!(matching(&column, Operator::Matches, "quick"), vec![0, 1]);
        assert_eq!(matching(&column, Operator::MatchesExact, "brown fox"), vec![0]);
        assert_eq!(matching(&column, Operator::MatchesExact, "uick"), Vec::<u32>::new());
    }

    #[test]
    fn test_overwrite_retracts_old_words() {
        let mut column = indexed(SplitterKind::Default);
        column.set(0, "alpha beta".into()).unwrap();
        column.set(0, "beta gamma".into()).unwrap();

        assert!(matching(&column, Operator::MatchesExact, "alpha").is_empty());
        assert_eq!(matching(&column, Operator::MatchesExact, "gamma"), vec![0]);
        assert_eq!(matching(&column, Operator::MatchesExact, "beta"), vec![0]);
        assert_eq!(column.try_evaluate(0, Operator::Matches, &"gam".into()).unwrap(), Some(true));

        column.set(1, "alphabet soup".into()).unwrap();
        assert_eq!(matching(&column, Operator::Matches, "alph"), vec![1]);
        column.set(1, "beta".into()).unwrap();
        assert!(matching(&column, Operator::Matches, "alph").is_empty());
        assert!(matching(&column, Operator::Matches, "so").is_empty());
        assert_eq!(matching(&column, Operator::Matches, "bet"), vec![0, 1]);
    }

    #[test]
    fn test_shrink_retracts_removed_ids() {
        let mut column = indexed(SplitterKind::Set);
        column.set(0, "red; blue".into()).unwrap();
        column.set(1, "blue".into()).unwrap();
        column.set_size(1).unwrap();
        assert_eq!(matching(&column, Operator::MatchesExact, "blue"), vec![0]);

        let mut details = ExecutionDetails::new();
        column.verify_consistency(VerificationLevel::Full, &mut details);
        assert!(details.succeeded(), "{:?}", details.errors());
    }

    #[test]
    fn test_grow_indexes_default_words() {
        let inner = ByteBlockColumn::new("state", ByteBlock::from("pending"));
        let mut column =
            IndexedColumn::new(Box::new(inner), SplitterKind::Default.build(), &IndexConfig::default())
                .unwrap();
        column.set_size(3).unwrap();
        assert_eq!(matching(&column, Operator::MatchesExact, "pending"), vec![0, 1, 2]);
    }

    #[test]
    fn test_other_operators_fall_through() {
        let inner = SortedColumn::new(Box::new(ByteBlockColumn::new("t", ByteBlock::default()))).unwrap();
        let mut column =
            IndexedColumn::new(Box::new(inner), SplitterKind::Default.build(), &IndexConfig::default())
                .unwrap();
        column.set(0, "zeta".into()).unwrap();
        column.set(1, "alpha".into()).unwrap();
        assert_eq!(matching(&column, Operator::LessThan, "m"), vec![1]);
        assert_eq!(column.sort_order().unwrap(), &[1, 0]);
        assert_eq!(column.descriptor(), "Indexed:Sorted:string");
    }

    #[test]
    fn test_verify_detects_desync_and_round_trip() {
        let mut column = indexed(SplitterKind::Html);
        column.set(0, "<i>bold</i> claim".into()).unwrap();

        let mut buf = Vec::new();
        column.write_binary(&mut buf).unwrap();
        let mut restored = indexed(SplitterKind::Html);
        restored.read_binary(&mut Cursor::new(buf)).unwrap();
        assert_eq!(restored.word_index(), column.word_index());

        restored.index.add(0, &["stale".to_string()]);
        restored.index.add(9, &["ghost".to_string()]);
        let mut details = ExecutionDetails::new();
        restored.verify_consistency(VerificationLevel::Full, &mut details);
        assert!(details.has(DiagnosticCode::IndexStorageDesync));
        assert!(details.has(DiagnosticCode::IndexIdOutOfRange));
    }
}
