//! Inverted word index: lowercase token -> ids whose value contains it
//!
//! Tokens are kept in an ordered map so prefix queries are a range scan.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::ops::Bound;

use roaring::RoaringBitmap;

use quarry_common::{Error, LocalId, Result};

use crate::binary;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WordIndex {
    words: BTreeMap<String, RoaringBitmap>,
}

impl WordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn add<'a>(&mut self, lid: LocalId, words: impl IntoIterator<Item = &'a String>) {
        for word in words {
            self.words.entry(word.clone()).or_default().insert(u32::from(lid));
        }
    }

    /// Associate every id in `lids` with each word
    pub fn add_all<'a>(&mut self, lids: &RoaringBitmap, words: impl IntoIterator<Item = &'a String>) {
        for word in words {
            *self.words.entry(word.clone()).or_default() |= lids;
        }
    }

    pub fn remove<'a>(&mut self, lid: LocalId, words: impl IntoIterator<Item = &'a String>) {
        for word in words {
            if let Some(ids) = self.words.get_mut(word) {
                ids.remove(u32::from(lid));
                if ids.is_empty() {
                    self.words.remove(word);
                }
            }
        }
    }

    /// Drop every id at or above `count`
    pub fn truncate(&mut self, count: usize) {
        let end = u32::try_from(count).unwrap_or(u32::MAX);
        self.words.retain(|_, ids| {
            ids.remove_range(end..);
            !ids.is_empty()
        });
    }

    pub fn exact(&self, word: &str) -> RoaringBitmap {
        self.words.get(word).cloned().unwrap_or_default()
    }

    /// Union of ids for every word starting with `prefix`
    pub fn prefix(&self, prefix: &str) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        for (_, ids) in self
            .words
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(word, _)| word.starts_with(prefix))
        {
            result |= ids;
        }
        result
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RoaringBitmap)> {
        self.words.iter()
    }

    /// Word count, then per word its length-prefixed UTF-8 text and bitmap
    /// in roaring portable format.
    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        binary::write_len(w, self.words.len())?;
        for (word, ids) in &self.words {
            binary::write_len(w, word.len())?;
            w.write_all(word.as_bytes())?;
            ids.serialize_into(&mut *w)?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut dyn Read) -> Result<Self> {
        let count = binary::read_len(r, u32::MAX as usize, "word count")?;
        let mut words = BTreeMap::new();
        for _ in 0..count {
            let len = binary::read_len(r, u16::MAX as usize, "word length")?;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes)?;
            let word = String::from_utf8(bytes)
                .map_err(|e| Error::corrupt(format!("word is not UTF-8: {}", e)))?;
            let ids = RoaringBitmap::deserialize_from(&mut *r)
                .map_err(|e| Error::corrupt(format!("bitmap for '{}': {}", word, e)))?;
            words.insert(word, ids);
        }
        Ok(Self { words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_add_remove_drops_empty_words() {
        let mut index = WordIndex::new();
        index.add(1, &words(&["red", "fox"]));
        index.add(2, &words(&["red"]));
        index.remove(1, &words(&["red", "fox"]));
        assert_eq!(index.len(), 1);
        assert_eq!(index.exact("red").iter().collect::<Vec<_>>(), vec![2]);
        assert!(index.exact("fox").is_empty());
    }

    #[test]
    fn test_prefix_scans_range_only() {
        let mut index = WordIndex::new();
        index.add(0, &words(&["car"]));
        index.add(1, &words(&["cart"]));
        index.add(2, &words(&["carbon"]));
        index.add(3, &words(&["cat"]));
        index.add(4, &words(&["ca"]));
        assert_eq!(index.prefix("car").iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(index.prefix("ca").len(), 5);
    }

    #[test]
    fn test_truncate_and_round_trip() {
        let mut index = WordIndex::new();
        index.add(0, &words(&["keep"]));
        index.add(5, &words(&["keep", "gone"]));
        index.truncate(3);
        assert_eq!(index.len(), 1);

        let mut buf = Vec::new();
        index.write_to(&mut buf).unwrap();
        let restored = WordIndex::read_from(&mut Cursor::new(buf.clone())).unwrap();
        assert_eq!(restored, index);

        buf.truncate(buf.len() - 2);
        assert!(WordIndex::read_from(&mut Cursor::new(buf)).is_err());
    }
}
