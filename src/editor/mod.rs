use std::ops::Range;

use crate::document::{normalize_line_breaks, Document, RunAttributes, PARAGRAPH_SEPARATOR};

mod format;
mod list;

pub use format::{caret_attributes, formatting_state, uniform_attributes, FormattingState};
pub use list::{bullet_prefix, BulletPrefix, ChangeVerdict, BULLET_MARKER, INDENT_UNIT};

/// Editing surface for one diary entry: the document, the current selection
/// and the attributes the next typed character will receive.
#[derive(Debug, Clone, Default)]
pub struct TextEditor {
    document: Document,
    selection: Range<usize>,
    typing_attributes: RunAttributes,
}

impl TextEditor {
    pub fn new(document: Document) -> Self {
        let mut editor = Self {
            document,
            selection: 0..0,
            typing_attributes: RunAttributes::empty(),
        };
        editor.refresh_typing_attributes();
        editor
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }

    pub fn selection(&self) -> Range<usize> {
        self.selection.clone()
    }

    pub fn caret(&self) -> usize {
        self.selection.end
    }

    pub fn typing_attributes(&self) -> RunAttributes {
        self.typing_attributes
    }

    pub fn set_selection(&mut self, selection: Range<usize>) {
        self.selection = self.clamp(selection);
        self.refresh_typing_attributes();
    }

    pub fn set_caret(&mut self, caret: usize) {
        self.set_selection(caret..caret);
    }

    pub fn formatting_state(&self) -> FormattingState {
        let mut state = formatting_state(&self.document, self.selection.clone());
        if self.selection.is_empty() {
            state.is_bold = self.typing_attributes.contains(RunAttributes::BOLD);
            state.is_italic = self.typing_attributes.contains(RunAttributes::ITALIC);
        }
        state
    }

    /// Types `text` over the current selection. Returns whether the
    /// document changed.
    pub fn insert_text(&mut self, text: &str) -> bool {
        self.replace(self.selection.clone(), text)
    }

    /// Enter key: list continuation first, plain paragraph break otherwise.
    pub fn insert_newline(&mut self) -> bool {
        if self.handle_newline() {
            return true;
        }
        self.insert_text(&PARAGRAPH_SEPARATOR.to_string())
    }

    pub fn delete_backward(&mut self) -> bool {
        let range = if self.selection.is_empty() {
            match self.selection.start.checked_sub(1) {
                Some(start) => start..self.selection.start,
                None => return false,
            }
        } else {
            self.selection.clone()
        };
        self.replace(range, "")
    }

    /// Applies a host edit after vetting it against the list invariants.
    /// Carriage returns become paragraph breaks and reserved marker
    /// characters in `text` are dropped.
    pub fn replace(&mut self, range: Range<usize>, text: &str) -> bool {
        let range = self.clamp(range);
        let text = normalize_line_breaks(text);
        match self.vet_change(range.clone(), &text) {
            ChangeVerdict::Reject => return false,
            ChangeVerdict::Handled => return true,
            ChangeVerdict::Allow => {}
        }
        let text: String = text.chars().filter(|ch| *ch != BULLET_MARKER).collect();
        if range.is_empty() && text.is_empty() {
            return false;
        }
        let attributes = self.typing_attributes;
        self.document.replace(range.clone(), &text, attributes);
        let caret = range.start + text.chars().count();
        self.selection = caret..caret;
        if range.is_empty() {
            return true;
        }
        self.normalize_paragraph(range.start);
        if text.is_empty() {
            self.refresh_typing_attributes();
        }
        true
    }

    fn refresh_typing_attributes(&mut self) {
        self.typing_attributes = caret_attributes(&self.document, self.selection.start);
    }

    fn clamp(&self, range: Range<usize>) -> Range<usize> {
        let len = self.document.len();
        let start = range.start.min(len);
        start..range.end.clamp(start, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Run;

    #[test]
    fn pasted_crlf_text_round_trips_through_rtf() -> anyhow::Result<()> {
        let mut editor = TextEditor::new(Document::new());
        assert!(editor.insert_text("line one\r\nline two\rline three"));
        assert_eq!(editor.document().text(), "line one\nline two\nline three");
        assert_eq!(editor.caret(), 28);
        let bytes = crate::document::encode(editor.document())?;
        assert_eq!(&crate::document::decode(&bytes)?, editor.document());
        Ok(())
    }

    #[test]
    fn typing_uses_typing_attributes() {
        let mut editor = TextEditor::new(Document::new());
        editor.insert_text("Hello ");
        editor.toggle_bold();
        editor.insert_text("world");
        assert_eq!(editor.document().text(), "Hello world");
        assert_eq!(editor.document().runs()[1].text, "world");
        assert_eq!(editor.document().runs()[1].attributes, RunAttributes::BOLD);
        assert_eq!(editor.caret(), 11);
        assert!(editor.formatting_state().is_bold);
    }

    #[test]
    fn moving_the_caret_picks_up_neighbouring_style() {
        let mut editor = TextEditor::new(Document::from_runs([
            Run::new("plain ", RunAttributes::empty()),
            Run::new("slanted", RunAttributes::ITALIC),
        ]));
        editor.set_caret(9);
        assert!(editor.formatting_state().is_italic);
        editor.set_caret(3);
        assert!(!editor.formatting_state().is_italic);
    }

    #[test]
    fn reserved_marker_cannot_be_typed() {
        let mut editor = TextEditor::new(Document::new());
        assert!(editor.insert_text("a\u{2022}b"));
        assert_eq!(editor.document().text(), "ab");
    }

    #[test]
    fn backspace_at_document_start_is_a_no_op() {
        let mut editor = TextEditor::new(Document::plain("abc"));
        assert!(!editor.delete_backward());
        editor.set_caret(3);
        assert!(editor.delete_backward());
        assert_eq!(editor.document().text(), "ab");
    }

    #[test]
    fn plain_newline_splits_paragraph() {
        let mut editor = TextEditor::new(Document::plain("ab"));
        editor.set_caret(1);
        assert!(editor.insert_newline());
        assert_eq!(editor.document().text(), "a\nb");
        assert_eq!(editor.caret(), 2);
    }
}
