//! Word splitters
//!
//! A splitter turns stored text into the tokens the word index keys on.
//! Query values go through the same splitter as stored values.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use unicode_segmentation::UnicodeSegmentation;

use quarry_common::Error;

/// Tokenizer used by an indexed column
pub trait WordSplitter: Send + Sync {
    /// Name used in descriptors, e.g. `Html` in `Indexed[Html]`
    fn name(&self) -> &'static str;

    /// Raw tokens of `text`, in order, possibly repeated
    fn split<'a>(&self, text: &'a str) -> Vec<&'a str>;
}

/// Unicode word boundaries, refined to runs of alphanumerics
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSplitter;

impl WordSplitter for DefaultSplitter {
    fn name(&self) -> &'static str {
        "Default"
    }

    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.unicode_words()
            .flat_map(|word| word.split(|c: char| !c.is_alphanumeric()))
            .filter(|token| !token.is_empty())
            .collect()
    }
}

/// Text outside markup. Tags and character entities separate words and are
/// never indexed themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSplitter;

impl HtmlSplitter {
    /// Longest entity body recognised, as in `&thetasym;`
    const MAX_ENTITY_LEN: usize = 10;

    fn text_runs(text: &str) -> Vec<&str> {
        let bytes = text.as_bytes();
        let mut runs = Vec::new();
        let mut start = 0usize;
        let mut i = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'<' => {
                    runs.push(&text[start..i]);
                    i = match text[i..].find('>') {
                        Some(end) => i + end + 1,
                        None => bytes.len(),
                    };
                    start = i;
                }
                b'&' => match Self::entity_len(&text[i + 1..]) {
                    Some(len) => {
                        runs.push(&text[start..i]);
                        i += len + 2;
                        start = i;
                    }
                    None => i += 1,
                },
                _ => i += 1,
            }
        }
        runs.push(&text[start..]);
        runs
    }

    /// Length of the entity body before `;`, if `rest` starts with one
    fn entity_len(rest: &str) -> Option<usize> {
        let end = rest.find(';')?;
        let body = &rest[..end];
        let valid = !body.is_empty()
            && body.len() <= Self::MAX_ENTITY_LEN
            && body
                .trim_start_matches('#')
                .chars()
                .all(|c| c.is_ascii_alphanumeric());
        valid.then_some(end)
    }
}

impl WordSplitter for HtmlSplitter {
    fn name(&self) -> &'static str {
        "Html"
    }

    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        Self::text_runs(text)
            .into_iter()
            .flat_map(|run| DefaultSplitter.split(run))
            .collect()
    }
}

/// `;`-separated whole values of a multi-value field
#[derive(Debug, Clone, Copy, Default)]
pub struct SetSplitter;

impl WordSplitter for SetSplitter {
    fn name(&self) -> &'static str {
        "Set"
    }

    fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        text.split(';')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .collect()
    }
}

/// Built-in splitter choice, as written in descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitterKind {
    #[default]
    Default,
    Html,
    Set,
}

impl SplitterKind {
    pub fn build(self) -> Box<dyn WordSplitter> {
        match self {
            SplitterKind::Default => Box::new(DefaultSplitter),
            SplitterKind::Html => Box::new(HtmlSplitter),
            SplitterKind::Set => Box::new(SetSplitter),
        }
    }
}

impl fmt::Display for SplitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SplitterKind::Default => "Default",
            SplitterKind::Html => "Html",
            SplitterKind::Set => "Set",
        };
        f.write_str(name)
    }
}

impl FromStr for SplitterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(SplitterKind::Default),
            "html" => Ok(SplitterKind::Html),
            "set" => Ok(SplitterKind::Set),
            other => Err(Error::Config(format!("unknown word splitter '{}'", other))),
        }
    }
}

/// Distinct lowercase tokens of `text` no longer than `max_len` bytes
pub fn tokens(splitter: &dyn WordSplitter, text: &str, max_len: usize) -> BTreeSet<String> {
    splitter
        .split(text)
        .into_iter()
        .filter(|token| token.len() <= max_len)
        .map(str::to_lowercase)
        .collect()
}
