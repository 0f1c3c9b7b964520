use strum::{Display, EnumString};
use time::Date;

use crate::editor::FormattingState;

/// Lifecycle of the entry currently open in the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionPhase {
    /// No entry is open, e.g. while switching dates.
    Unloaded,
    /// Freshly read from the store, untouched.
    Loaded,
    /// Edited since the last save was queued.
    Dirty,
    Clean,
}

impl SessionPhase {
    pub fn is_dirty(self) -> bool {
        matches!(self, SessionPhase::Dirty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ContentDirection {
    #[strum(to_string = "previous", serialize = "prev")]
    Previous,
    Next,
}

impl ContentDirection {
    pub fn step(self) -> i64 {
        match self {
            ContentDirection::Previous => -1,
            ContentDirection::Next => 1,
        }
    }
}

/// Published to subscribers whenever something a view would render changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiaryEvent {
    DateSelected(Date),
    DocumentChanged,
    FormattingChanged(FormattingState),
    ContentIndexChanged { date: Date, has_content: bool },
    Saved(Date),
}
