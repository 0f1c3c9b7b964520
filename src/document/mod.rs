use std::ops::Range;

use bitflags::bitflags;

pub mod codec;

pub use codec::{decode, encode, plain_text_to_document, CodecError};

pub const PARAGRAPH_SEPARATOR: char = '\n';

/// Folds `\r\n` and lone `\r` into [`PARAGRAPH_SEPARATOR`].
pub fn normalize_line_breaks(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

bitflags! {
    /// Character-level styling carried by every run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RunAttributes: u8 {
        const BOLD = 0b0000_0001;
        const ITALIC = 0b0000_0010;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub text: String,
    pub attributes: RunAttributes,
}

impl Run {
    pub fn new(text: impl Into<String>, attributes: RunAttributes) -> Self {
        Self {
            text: text.into(),
            attributes,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// In-memory rich text: an ordered list of styled runs. Paragraphs are
/// delimited by `\n` inside the run text and every offset is a char offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    runs: Vec<Run>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_runs(runs: impl IntoIterator<Item = Run>) -> Self {
        let mut doc = Self {
            runs: runs.into_iter().collect(),
        };
        doc.normalize();
        doc
    }

    pub fn plain(text: &str) -> Self {
        Self::from_runs([Run::new(text, RunAttributes::empty())])
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(Run::char_len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// True when nothing but whitespace is left, which is the rule for
    /// dropping an entry from storage.
    pub fn is_blank(&self) -> bool {
        self.runs.iter().all(|run| run.text.trim().is_empty())
    }

    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    pub fn chars(&self) -> impl Iterator<Item = (char, RunAttributes)> + '_ {
        self.runs
            .iter()
            .flat_map(|run| run.text.chars().map(move |ch| (ch, run.attributes)))
    }

    pub fn char_at(&self, offset: usize) -> Option<char> {
        self.chars().nth(offset).map(|(ch, _)| ch)
    }

    pub fn attributes_at(&self, offset: usize) -> Option<RunAttributes> {
        self.chars().nth(offset).map(|(_, attrs)| attrs)
    }

    pub fn slice(&self, range: Range<usize>) -> String {
        let range = self.clamp(range);
        self.chars()
            .skip(range.start)
            .take(range.end - range.start)
            .map(|(ch, _)| ch)
            .collect()
    }

    pub fn insert(&mut self, offset: usize, text: &str, attributes: RunAttributes) {
        if text.is_empty() {
            return;
        }
        let offset = offset.min(self.len());
        let index = self.split_at(offset);
        self.runs.insert(index, Run::new(text, attributes));
        self.normalize();
    }

    pub fn delete(&mut self, range: Range<usize>) {
        let range = self.clamp(range);
        if range.is_empty() {
            return;
        }
        let start = self.split_at(range.start);
        let end = self.split_at(range.end);
        self.runs.drain(start..end);
        self.normalize();
    }

    pub fn replace(&mut self, range: Range<usize>, text: &str, attributes: RunAttributes) {
        let range = self.clamp(range);
        self.delete(range.clone());
        self.insert(range.start, text, attributes);
    }

    pub fn set_attributes<F>(&mut self, range: Range<usize>, mut f: F)
    where
        F: FnMut(char, RunAttributes) -> RunAttributes,
    {
        let range = self.clamp(range);
        if range.is_empty() {
            return;
        }
        let start = self.split_at(range.start);
        let end = self.split_at(range.end);
        let mut restyled = Vec::new();
        for run in self.runs.drain(start..end) {
            for ch in run.text.chars() {
                restyled.push(Run::new(ch, f(ch, run.attributes)));
            }
        }
        self.runs.splice(start..start, restyled);
        self.normalize();
    }

    /// Content range of the paragraph containing `offset`, excluding its
    /// trailing separator.
    pub fn paragraph_range(&self, offset: usize) -> Range<usize> {
        let offset = offset.min(self.len());
        let mut start = 0;
        for (index, (ch, _)) in self.chars().enumerate() {
            if ch != PARAGRAPH_SEPARATOR {
                continue;
            }
            if index >= offset {
                return start..index;
            }
            start = index + 1;
        }
        start..self.len()
    }

    /// Every paragraph touched by `range`; a collapsed range yields the
    /// enclosing paragraph. A range ending right after a separator does not
    /// touch the following paragraph.
    pub fn paragraph_ranges(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let range = self.clamp(range);
        let last = if range.end > range.start {
            range.end - 1
        } else {
            range.start
        };
        let mut paragraphs = Vec::new();
        let mut current = self.paragraph_range(range.start);
        loop {
            let next_start = current.end + 1;
            let done = current.end >= last || next_start > self.len();
            paragraphs.push(current);
            if done {
                break;
            }
            current = self.paragraph_range(next_start);
        }
        paragraphs
    }

    fn clamp(&self, range: Range<usize>) -> Range<usize> {
        let len = self.len();
        let start = range.start.min(len);
        let end = range.end.clamp(start, len);
        start..end
    }

    /// Splits runs so that a run boundary falls on `offset` and returns the
    /// index of the first run starting there.
    fn split_at(&mut self, offset: usize) -> usize {
        let mut position = 0;
        for index in 0..self.runs.len() {
            let len = self.runs[index].char_len();
            if offset == position {
                return index;
            }
            if offset < position + len {
                let local = offset - position;
                let byte = self.runs[index]
                    .text
                    .char_indices()
                    .nth(local)
                    .map(|(byte, _)| byte)
                    .unwrap_or(self.runs[index].text.len());
                let tail = self.runs[index].text.split_off(byte);
                let attributes = self.runs[index].attributes;
                self.runs.insert(index + 1, Run::new(tail, attributes));
                return index + 1;
            }
            position += len;
        }
        self.runs.len()
    }

    fn normalize(&mut self) {
        let mut merged: Vec<Run> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if run.text.is_empty() {
                continue;
            }
            match merged.last_mut() {
                Some(last) if last.attributes == run.attributes => last.text.push_str(&run.text),
                _ => merged.push(run),
            }
        }
        self.runs = merged;
    }
}
