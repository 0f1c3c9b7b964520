use std::ops::Range;

use crate::document::{Document, RunAttributes, PARAGRAPH_SEPARATOR};

use super::list::{bullet_prefix, BULLET_MARKER};
use super::TextEditor;

/// What the toolbar should show for the current selection. Mixed styling
/// reports `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormattingState {
    pub is_bold: bool,
    pub is_italic: bool,
    pub is_bulleted: bool,
}

pub fn formatting_state(document: &Document, selection: Range<usize>) -> FormattingState {
    let attributes = if selection.is_empty() {
        caret_attributes(document, selection.start)
    } else {
        uniform_attributes(document, selection.clone())
    };
    let is_bulleted = document
        .paragraph_ranges(selection)
        .into_iter()
        .all(|paragraph| bullet_prefix(document, paragraph).is_some());
    FormattingState {
        is_bold: attributes.contains(RunAttributes::BOLD),
        is_italic: attributes.contains(RunAttributes::ITALIC),
        is_bulleted,
    }
}

/// Attributes a character typed at `caret` would pick up. Positions inside
/// or right after a list prefix are neutral so the marker's forced bold
/// never leaks into typed text.
pub fn caret_attributes(document: &Document, caret: usize) -> RunAttributes {
    let paragraph = document.paragraph_range(caret);
    if let Some(prefix) = bullet_prefix(document, paragraph.clone()) {
        if caret <= prefix.end {
            return RunAttributes::empty();
        }
    }
    let probe = if caret > paragraph.start {
        caret - 1
    } else if caret < paragraph.end {
        caret
    } else {
        return RunAttributes::empty();
    };
    match document.chars().nth(probe) {
        Some((BULLET_MARKER, _)) | None => RunAttributes::empty(),
        Some((_, attributes)) => attributes,
    }
}

/// Attributes shared by every content character in `range`; markers and
/// paragraph separators are not content.
pub fn uniform_attributes(document: &Document, range: Range<usize>) -> RunAttributes {
    let mut shared = RunAttributes::all();
    let mut seen = false;
    for (ch, attributes) in document.chars().skip(range.start).take(range.len()) {
        if ch == BULLET_MARKER || ch == PARAGRAPH_SEPARATOR {
            continue;
        }
        seen = true;
        shared &= attributes;
        if shared.is_empty() {
            break;
        }
    }
    if seen {
        shared
    } else {
        RunAttributes::empty()
    }
}

impl TextEditor {
    pub fn toggle_bold(&mut self) -> bool {
        self.toggle_attribute(RunAttributes::BOLD)
    }

    pub fn toggle_italic(&mut self) -> bool {
        self.toggle_attribute(RunAttributes::ITALIC)
    }

    /// Returns whether the document changed; a caret only flips the typing
    /// attributes.
    fn toggle_attribute(&mut self, flag: RunAttributes) -> bool {
        if self.selection.is_empty() {
            self.typing_attributes.toggle(flag);
            return false;
        }
        let enable = !uniform_attributes(&self.document, self.selection.clone()).contains(flag);
        self.document
            .set_attributes(self.selection.clone(), |ch, mut attributes| {
                if ch != BULLET_MARKER {
                    attributes.set(flag, enable);
                }
                attributes
            });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Run;

    fn mixed() -> Document {
        Document::from_runs([
            Run::new("bold", RunAttributes::BOLD),
            Run::new("plain", RunAttributes::empty()),
        ])
    }

    #[test]
    fn mixed_selection_is_not_bold() {
        let state = formatting_state(&mixed(), 1..6);
        assert!(!state.is_bold);
        assert!(!state.is_italic);
        assert!(formatting_state(&mixed(), 0..4).is_bold);
    }

    #[test]
    fn caret_reads_character_before_it() {
        let doc = mixed();
        assert!(formatting_state(&doc, 4..4).is_bold);
        assert!(!formatting_state(&doc, 5..5).is_bold);
        assert!(formatting_state(&doc, 0..0).is_bold);
    }

    #[test]
    fn caret_next_to_marker_is_neutral() {
        let doc = Document::from_runs([
            Run::new("\u{2022}", RunAttributes::BOLD),
            Run::new("it", RunAttributes::ITALIC),
        ]);
        let state = formatting_state(&doc, 1..1);
        assert_eq!(
            state,
            FormattingState {
                is_bold: false,
                is_italic: false,
                is_bulleted: true,
            }
        );
        assert!(formatting_state(&doc, 2..2).is_italic);
    }

    #[test]
    fn range_scan_skips_markers() {
        let doc = Document::from_runs([
            Run::new("\u{2022}", RunAttributes::BOLD),
            Run::new("one\n", RunAttributes::ITALIC),
            Run::new("two", RunAttributes::ITALIC),
        ]);
        let state = formatting_state(&doc, 0..8);
        assert!(state.is_italic);
        assert!(!state.is_bold);
        assert!(!state.is_bulleted);
    }

    #[test]
    fn toggling_bold_on_a_mixed_range_sets_it_everywhere() {
        let mut editor = TextEditor::new(mixed());
        editor.set_selection(0..9);
        assert!(editor.toggle_bold());
        assert_eq!(editor.document().runs().len(), 1);
        assert!(editor.formatting_state().is_bold);

        assert!(editor.toggle_bold());
        assert_eq!(editor.document().runs()[0].attributes, RunAttributes::empty());
    }

    #[test]
    fn toggling_italic_leaves_markers_upright() {
        let mut editor = TextEditor::new(Document::from_runs([
            Run::new("\u{2022}", RunAttributes::BOLD),
            Run::new("item", RunAttributes::empty()),
        ]));
        editor.set_selection(0..5);
        editor.toggle_italic();
        assert_eq!(editor.document().attributes_at(0), Some(RunAttributes::BOLD));
        assert_eq!(editor.document().attributes_at(1), Some(RunAttributes::ITALIC));
        assert!(editor.formatting_state().is_italic);
    }

    #[test]
    fn caret_toggle_only_changes_typing_attributes() {
        let mut editor = TextEditor::new(Document::plain("abc"));
        editor.set_caret(3);
        assert!(!editor.toggle_italic());
        assert!(editor.formatting_state().is_italic);
        assert_eq!(editor.document().runs()[0].attributes, RunAttributes::empty());
    }
}
