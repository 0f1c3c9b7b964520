//! Bulleted-list state machine.
//!
//! A bulleted paragraph is `INDENT_UNIT* BULLET_MARKER [' ' | '\t'] content`.
//! The optional separator is the legacy form; the editor only ever writes
//! the canonical form (marker directly followed by content). Markers are
//! atomic: they are inserted and removed whole, always styled bold and
//! upright, and never overtyped.

use std::ops::Range;

use crate::document::{Document, RunAttributes, PARAGRAPH_SEPARATOR};

use super::TextEditor;

pub const BULLET_MARKER: char = '\u{2022}';
pub const INDENT_UNIT: char = '\t';
const SHORTCUT_TRIGGER: char = '*';

/// Location of the indentation and marker at the head of a bulleted
/// paragraph. All offsets are absolute document offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulletPrefix {
    pub paragraph_start: usize,
    pub depth: usize,
    pub marker: usize,
    pub end: usize,
}

impl BulletPrefix {
    pub fn is_legacy(&self) -> bool {
        self.end > self.marker + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeVerdict {
    /// Host applies the edit unchanged.
    Allow,
    /// Host drops the edit.
    Reject,
    /// The editor rewrote the edit itself; host drops its own version.
    Handled,
}

pub fn bullet_prefix(document: &Document, paragraph: Range<usize>) -> Option<BulletPrefix> {
    let text = document.slice(paragraph.clone());
    let mut chars = text.chars().peekable();
    let mut depth = 0;
    while chars.next_if_eq(&INDENT_UNIT).is_some() {
        depth += 1;
    }
    if chars.next() != Some(BULLET_MARKER) {
        return None;
    }
    let marker = paragraph.start + depth;
    let separator = matches!(chars.peek(), Some(' ') | Some('\t'));
    Some(BulletPrefix {
        paragraph_start: paragraph.start,
        depth,
        marker,
        end: marker + 1 + usize::from(separator),
    })
}

fn marker_attributes() -> RunAttributes {
    RunAttributes::BOLD
}

fn is_indentation(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|ch| ch == INDENT_UNIT)
}

#[derive(Debug, Clone, Copy)]
enum Edit {
    /// `push` moves offsets sitting exactly at `at` past the inserted text.
    Insert { at: usize, len: usize, push: bool },
    Remove { at: usize, len: usize },
}

impl Edit {
    fn remap(self, offset: usize) -> usize {
        match self {
            Edit::Insert { at, len, push } => {
                if offset > at || (push && offset == at) {
                    offset + len
                } else {
                    offset
                }
            }
            Edit::Remove { at, len } => {
                if offset <= at {
                    offset
                } else if offset >= at + len {
                    offset - len
                } else {
                    at
                }
            }
        }
    }
}

impl TextEditor {
    pub fn toggle_bulleted_list(&mut self) {
        let paragraphs = self.document.paragraph_ranges(self.selection.clone());
        let prefixes: Vec<Option<BulletPrefix>> = paragraphs
            .iter()
            .map(|paragraph| bullet_prefix(&self.document, paragraph.clone()))
            .collect();
        let remove_only = prefixes.iter().all(Option::is_some);

        let mut edits = Vec::new();
        for (paragraph, prefix) in paragraphs.iter().zip(&prefixes).rev() {
            let depth = match prefix {
                Some(prefix) => {
                    self.document.delete(prefix.marker..prefix.end);
                    edits.push(Edit::Remove {
                        at: prefix.marker,
                        len: prefix.end - prefix.marker,
                    });
                    prefix.depth
                }
                None => self
                    .document
                    .slice(paragraph.clone())
                    .chars()
                    .take_while(|ch| *ch == INDENT_UNIT)
                    .count(),
            };
            if remove_only {
                continue;
            }
            let at = paragraph.start + depth;
            self.document
                .insert(at, &BULLET_MARKER.to_string(), marker_attributes());
            edits.push(Edit::Insert {
                at,
                len: 1,
                push: true,
            });
        }

        self.remap_selection(&edits);
        self.settle_caret();
        self.refresh_typing_attributes();
    }

    /// Nests every bulleted paragraph in the selection one level deeper.
    pub fn indent_selection(&mut self) -> bool {
        let mut edits = Vec::new();
        for paragraph in self.bulleted_paragraphs().into_iter().rev() {
            self.document.insert(
                paragraph.paragraph_start,
                &INDENT_UNIT.to_string(),
                RunAttributes::empty(),
            );
            edits.push(Edit::Insert {
                at: paragraph.paragraph_start,
                len: 1,
                push: false,
            });
        }
        self.remap_selection(&edits);
        !edits.is_empty()
    }

    pub fn outdent_selection(&mut self) -> bool {
        let mut edits = Vec::new();
        for paragraph in self.bulleted_paragraphs().into_iter().rev() {
            if paragraph.depth == 0 {
                continue;
            }
            let at = paragraph.paragraph_start;
            self.document.delete(at..at + 1);
            edits.push(Edit::Remove { at, len: 1 });
        }
        self.remap_selection(&edits);
        !edits.is_empty()
    }

    /// Enter inside a bulleted paragraph. Returns `false` when the host
    /// should insert an ordinary paragraph break instead.
    pub fn handle_newline(&mut self) -> bool {
        if !self.selection.is_empty() {
            return false;
        }
        let caret = self.selection.start;
        let paragraph = self.document.paragraph_range(caret);
        let Some(prefix) = bullet_prefix(&self.document, paragraph.clone()) else {
            return false;
        };

        let content = self.document.slice(prefix.end..paragraph.end);
        if content.trim().is_empty() {
            let edit = Edit::Remove {
                at: paragraph.start,
                len: prefix.end - paragraph.start,
            };
            self.document.delete(paragraph.start..prefix.end);
            let caret = edit.remap(caret);
            self.selection = caret..caret;
            self.refresh_typing_attributes();
            return true;
        }

        let at = caret.max(prefix.end);
        let carried = self.typing_attributes;
        let mut head = String::with_capacity(prefix.depth + 1);
        head.push(PARAGRAPH_SEPARATOR);
        head.extend(std::iter::repeat(INDENT_UNIT).take(prefix.depth));
        self.document.insert(at, &head, carried);
        let marker = at + head.chars().count();
        self.document
            .insert(marker, &BULLET_MARKER.to_string(), marker_attributes());
        let caret = marker + 1;
        self.selection = caret..caret;
        self.typing_attributes = carried;
        true
    }

    pub fn should_allow_change(&mut self, range: Range<usize>, replacement: &str) -> bool {
        self.vet_change(range, replacement) == ChangeVerdict::Allow
    }

    /// Checks a pending host edit against the marker invariants. The `"* "`
    /// shortcut is applied here and reported as [`ChangeVerdict::Handled`].
    pub fn vet_change(&mut self, range: Range<usize>, replacement: &str) -> ChangeVerdict {
        let range = self.clamp(range);
        if range.is_empty() && replacement == " " && self.apply_bullet_shortcut(range.start) {
            return ChangeVerdict::Handled;
        }
        for paragraph in self.document.paragraph_ranges(range.clone()) {
            let Some(prefix) = bullet_prefix(&self.document, paragraph.clone()) else {
                continue;
            };
            if vet_against_prefix(&range, replacement, &paragraph, &prefix) == ChangeVerdict::Reject
            {
                return ChangeVerdict::Reject;
            }
        }
        ChangeVerdict::Allow
    }

    fn apply_bullet_shortcut(&mut self, caret: usize) -> bool {
        let paragraph = self.document.paragraph_range(caret);
        if bullet_prefix(&self.document, paragraph.clone()).is_some() {
            return false;
        }
        let head = self.document.slice(paragraph.start..caret);
        let body = head.trim_start_matches(INDENT_UNIT);
        if body.len() != 1 || !body.starts_with(SHORTCUT_TRIGGER) {
            return false;
        }
        let star = caret - 1;
        self.document.delete(star..caret);
        self.document
            .insert(star, &BULLET_MARKER.to_string(), marker_attributes());
        self.selection = caret..caret;
        self.refresh_typing_attributes();
        tracing::trace!(offset = star, "converted '* ' into a bullet");
        true
    }

    /// Cleans up a paragraph after a deletion: drops markers that ended up
    /// inside content and restores the marker style.
    pub(super) fn normalize_paragraph(&mut self, offset: usize) {
        let paragraph = self.document.paragraph_range(offset);
        let prefix = bullet_prefix(&self.document, paragraph.clone());
        let content_start = prefix.map_or(paragraph.start, |prefix| prefix.end);
        let stray: Vec<usize> = self
            .document
            .slice(content_start..paragraph.end)
            .chars()
            .enumerate()
            .filter(|(_, ch)| *ch == BULLET_MARKER)
            .map(|(index, _)| content_start + index)
            .collect();
        let mut edits = Vec::with_capacity(stray.len());
        for at in stray.into_iter().rev() {
            self.document.delete(at..at + 1);
            edits.push(Edit::Remove { at, len: 1 });
        }
        self.remap_selection(&edits);
        if let Some(prefix) = prefix {
            self.document
                .set_attributes(prefix.marker..prefix.marker + 1, |_, _| marker_attributes());
        }
    }

    fn bulleted_paragraphs(&self) -> Vec<BulletPrefix> {
        self.document
            .paragraph_ranges(self.selection.clone())
            .into_iter()
            .filter_map(|paragraph| bullet_prefix(&self.document, paragraph))
            .collect()
    }

    fn remap_selection(&mut self, edits: &[Edit]) {
        let mut start = self.selection.start;
        let mut end = self.selection.end;
        for edit in edits {
            start = edit.remap(start);
            end = edit.remap(end);
        }
        self.selection = self.clamp(start..end);
    }

    /// Moves a caret that landed inside an indentation+marker prefix to the
    /// start of the paragraph content.
    fn settle_caret(&mut self) {
        if !self.selection.is_empty() {
            return;
        }
        let caret = self.selection.start;
        let paragraph = self.document.paragraph_range(caret);
        if let Some(prefix) = bullet_prefix(&self.document, paragraph) {
            if caret < prefix.end {
                self.selection = prefix.end..prefix.end;
            }
        }
    }
}

fn vet_against_prefix(
    range: &Range<usize>,
    replacement: &str,
    paragraph: &Range<usize>,
    prefix: &BulletPrefix,
) -> ChangeVerdict {
    let tabs_only = is_indentation(replacement);
    if range.is_empty() {
        let at = range.start;
        if at == prefix.marker {
            return ChangeVerdict::Reject;
        }
        if at >= paragraph.start && at < prefix.end && !tabs_only {
            return ChangeVerdict::Reject;
        }
        return ChangeVerdict::Allow;
    }

    let pure_deletion = replacement.is_empty();
    let overlaps_marker = range.start <= prefix.marker && range.end > prefix.marker;
    if overlaps_marker {
        let reaches_past_prefix = range.start < paragraph.start || range.end > prefix.end;
        return if pure_deletion && reaches_past_prefix {
            ChangeVerdict::Allow
        } else {
            ChangeVerdict::Reject
        };
    }

    let overlaps_prefix = range.start < prefix.end && range.end > paragraph.start;
    if overlaps_prefix && !(pure_deletion || tabs_only) {
        return ChangeVerdict::Reject;
    }
    ChangeVerdict::Allow
}
