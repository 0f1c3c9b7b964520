use strum::{Display, EnumString};

use super::{ContentDirection, DiaryController};

/// Commands an input adapter can bind to shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Command {
    PreviousDay,
    NextDay,
    PreviousMonth,
    NextMonth,
    GoToToday,
    PreviousDateWithContent,
    NextDateWithContent,
    ToggleBold,
    ToggleItalic,
}

pub struct ActionDispatcher<'a> {
    diary: &'a mut DiaryController,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(diary: &'a mut DiaryController) -> Self {
        Self { diary }
    }

    /// Runs `command`. Returns `false` when it had nothing to act on, such
    /// as no entry in the requested direction.
    pub fn dispatch(&mut self, command: Command) -> bool {
        tracing::debug!(%command, "dispatching command");
        match command {
            Command::PreviousDay => {
                self.diary.navigate(-1);
                true
            }
            Command::NextDay => {
                self.diary.navigate(1);
                true
            }
            Command::PreviousMonth => {
                self.diary.navigate_month(-1);
                true
            }
            Command::NextMonth => {
                self.diary.navigate_month(1);
                true
            }
            Command::GoToToday => {
                self.diary.go_to_today();
                true
            }
            Command::PreviousDateWithContent => self
                .diary
                .navigate_to_adjacent_content_date(ContentDirection::Previous)
                .is_some(),
            Command::NextDateWithContent => self
                .diary
                .navigate_to_adjacent_content_date(ContentDirection::Next)
                .is_some(),
            Command::ToggleBold => {
                self.diary.toggle_bold();
                true
            }
            Command::ToggleItalic => {
                self.diary.toggle_italic();
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn commands_use_kebab_case_names() -> anyhow::Result<()> {
        assert_eq!(Command::from_str("next-date-with-content")?, Command::NextDateWithContent);
        assert_eq!(Command::GoToToday.to_string(), "go-to-today");
        assert!(Command::from_str("NextDay").is_err());
        Ok(())
    }
}
