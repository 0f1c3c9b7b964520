use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use time::{Date, Duration, Month, OffsetDateTime};

use crate::config::AppConfig;
use crate::date_key::DateKey;
use crate::document::{self, Document};
use crate::editor::{FormattingState, TextEditor};
use crate::journaling::{AutoSaveStatus, AutoSaveTimer};
use crate::storage::{EntryStore, PendingSave};

mod actions;
pub mod state;

pub use actions::{ActionDispatcher, Command};
pub use state::{ContentDirection, DiaryEvent, SessionPhase};

const SECONDS_PER_DAY: i64 = 86_400;

/// Owns the entry being edited, which date it belongs to, and the set of
/// dates that have content. Single-threaded; only flushing blocks on the
/// store.
pub struct DiaryController {
    config: Arc<AppConfig>,
    store: EntryStore,
    editor: TextEditor,
    selected: DateKey,
    phase: SessionPhase,
    formatting: FormattingState,
    content_index: HashSet<DateKey>,
    auto_save: AutoSaveTimer,
    in_flight: Vec<PendingSave>,
    subscribers: Vec<Sender<DiaryEvent>>,
}

impl DiaryController {
    pub fn new(config: Arc<AppConfig>, store: EntryStore) -> Self {
        Self::open_at(config, store, DateKey::today().date())
    }

    pub fn open_at(config: Arc<AppConfig>, store: EntryStore, date: Date) -> Self {
        let content_index = store.all_keys();
        tracing::debug!(entries = content_index.len(), "seeded content index");
        let auto_save = AutoSaveTimer::new(&config.auto_save);
        let mut controller = Self {
            config,
            store,
            editor: TextEditor::default(),
            selected: DateKey::from(date),
            phase: SessionPhase::Unloaded,
            formatting: FormattingState::default(),
            content_index,
            auto_save,
            in_flight: Vec::new(),
            subscribers: Vec::new(),
        };
        controller.load_selected();
        controller
    }

    pub fn subscribe(&mut self) -> Receiver<DiaryEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn selected_date(&self) -> Date {
        self.selected.date()
    }

    pub fn current_month(&self) -> (i32, Month) {
        let date = self.selected.date();
        (date.year(), date.month())
    }

    pub fn formatting_state(&self) -> FormattingState {
        self.formatting
    }

    pub fn document(&self) -> &Document {
        self.editor.document()
    }

    pub fn editor(&self) -> &TextEditor {
        &self.editor
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn auto_save_status(&self) -> AutoSaveStatus {
        self.auto_save.status()
    }

    /// `true` while an edit waits for its debounce or a queued write has
    /// not been confirmed.
    pub fn has_pending_save(&self) -> bool {
        self.auto_save.is_pending() || !self.in_flight.is_empty()
    }

    pub fn has_content(&self, date: Date) -> bool {
        self.content_index.contains(&DateKey::from(date))
    }

    /// Saves the open entry, then opens `date` with the caret at the start.
    /// Missing or unreadable entries open as an empty document.
    pub fn select_date(&mut self, date: Date) {
        self.flush_pending_save();
        self.phase = SessionPhase::Unloaded;
        self.selected = DateKey::from(date);
        self.load_selected();
    }

    /// Replaces the open document with one edited by the host.
    pub fn on_document_changed(&mut self, document: Document) {
        let selection = self.editor.selection();
        self.editor = TextEditor::new(document);
        self.editor.set_selection(selection);
        self.document_changed();
    }

    /// Runs an editing operation against the open entry. `f` reports
    /// whether the document changed.
    pub fn edit<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut TextEditor) -> bool,
    {
        let changed = f(&mut self.editor);
        if changed {
            self.document_changed();
        } else {
            self.refresh_formatting(false);
        }
        changed
    }

    pub fn set_selection(&mut self, selection: Range<usize>) {
        self.editor.set_selection(selection);
        self.refresh_formatting(false);
    }

    pub fn toggle_bold(&mut self) -> bool {
        self.edit(TextEditor::toggle_bold)
    }

    pub fn toggle_italic(&mut self) -> bool {
        self.edit(TextEditor::toggle_italic)
    }

    pub fn toggle_bulleted_list(&mut self) {
        self.edit(|editor| {
            editor.toggle_bulleted_list();
            true
        });
    }

    /// Writes the open entry now if it has unsaved edits. Blocks until the
    /// store has applied it along with any save queued earlier.
    pub fn flush_pending_save(&mut self) {
        self.auto_save.cancel();
        self.settle_in_flight(true);
        if !self.phase.is_dirty() {
            return;
        }
        let key = self.selected;
        let result = self.encode_current().and_then(|bytes| {
            let has_content = bytes.is_some();
            self.store.save(key, bytes).map(|()| has_content)
        });
        match result {
            Ok(has_content) => {
                self.phase = SessionPhase::Clean;
                self.mark_saved(key, has_content);
            }
            Err(err) => self.handle_save_failure(key, err),
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Collects finished background saves and queues the debounced save
    /// once its deadline has passed.
    pub fn tick_at(&mut self, now: Instant) {
        self.settle_in_flight(false);
        if !self.auto_save.is_due_at(now) {
            return;
        }
        self.auto_save.cancel();
        if !self.phase.is_dirty() {
            return;
        }
        let key = self.selected;
        match self.encode_current() {
            Ok(bytes) => {
                tracing::debug!(date = %key, "queueing debounced save");
                self.in_flight.push(self.store.submit_save(key, bytes));
                self.phase = SessionPhase::Clean;
            }
            Err(err) => self.handle_save_failure(key, err),
        }
    }

    pub fn navigate(&mut self, delta_days: i64) {
        let shifted = delta_days
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|seconds| self.selected.date().checked_add(Duration::seconds(seconds)));
        match shifted {
            Some(date) => self.select_date(date),
            None => tracing::warn!(delta_days, "navigation leaves the supported calendar"),
        }
    }

    /// Moves by whole months, clamping the day to the target month's length.
    pub fn navigate_month(&mut self, delta_months: i32) {
        match shift_month(self.selected.date(), delta_months) {
            Some(date) => self.select_date(date),
            None => tracing::warn!(delta_months, "navigation leaves the supported calendar"),
        }
    }

    pub fn go_to_today(&mut self) {
        self.select_date(DateKey::today().date());
    }

    /// Selects the nearest date with content in `direction`, looking at most
    /// `content_search_horizon_days` away. `None` leaves the selection alone.
    pub fn navigate_to_adjacent_content_date(
        &mut self,
        direction: ContentDirection,
    ) -> Option<Date> {
        let found = self.find_adjacent_content_date(direction)?;
        self.select_date(found);
        Some(found)
    }

    pub fn find_adjacent_content_date(&self, direction: ContentDirection) -> Option<Date> {
        let origin = self.selected.date();
        let horizon = i64::from(self.config.navigation.content_search_horizon_days);
        (1..=horizon)
            .map_while(|step| origin.checked_add(Duration::days(step * direction.step())))
            .find(|date| self.has_content(*date))
    }

    /// App moved to the background: save and request a backup.
    pub fn suspend(&mut self) {
        self.flush_pending_save();
        self.request_exit_backup();
    }

    /// Saves, requests a backup, and waits for the store to finish every
    /// queued job.
    pub fn shutdown(&mut self) {
        self.suspend();
        self.store.shutdown();
        self.phase = SessionPhase::Unloaded;
    }

    fn request_exit_backup(&self) {
        let storage = &self.config.storage;
        if storage.backup_on_exit {
            self.store.backup(storage.backup_retain);
        }
    }

    fn load_selected(&mut self) {
        let key = self.selected;
        let document = match self.store.load(key) {
            Some(bytes) => document::decode(&bytes).unwrap_or_else(|err| {
                tracing::warn!(?err, date = %key, "entry could not be decoded, opening it empty");
                Document::new()
            }),
            None => Document::new(),
        };
        self.editor = TextEditor::new(document);
        self.phase = SessionPhase::Loaded;
        tracing::debug!(date = %key, "entry loaded");
        self.emit(DiaryEvent::DateSelected(key.date()));
        self.emit(DiaryEvent::DocumentChanged);
        self.refresh_formatting(true);
    }

    fn document_changed(&mut self) {
        self.phase = SessionPhase::Dirty;
        let has_content = !self.editor.document().is_blank();
        self.set_indexed(self.selected, has_content);
        self.auto_save.schedule();
        self.emit(DiaryEvent::DocumentChanged);
        self.refresh_formatting(false);
    }

    fn encode_current(&self) -> Result<Option<Vec<u8>>> {
        let document = self.editor.document();
        if document.is_blank() {
            return Ok(None);
        }
        Ok(Some(document::encode(document)?))
    }

    fn settle_in_flight(&mut self, block: bool) {
        for save in std::mem::take(&mut self.in_flight) {
            let key = save.key();
            let has_content = !save.deletes();
            let result = if block {
                save.wait()
            } else {
                match save.poll() {
                    Some(result) => result,
                    None => {
                        self.in_flight.push(save);
                        continue;
                    }
                }
            };
            match result {
                Ok(()) => self.mark_saved(key, has_content),
                Err(err) => self.handle_save_failure(key, err),
            }
        }
    }

    fn mark_saved(&mut self, key: DateKey, has_content: bool) {
        self.auto_save.record_saved(OffsetDateTime::now_utc());
        tracing::debug!(date = %key, "entry saved");
        // Newer unsaved edits already set the index for the open entry.
        if !(key == self.selected && self.phase.is_dirty()) {
            self.set_indexed(key, has_content);
        }
        self.emit(DiaryEvent::Saved(key.date()));
    }

    /// The open entry goes back to `Dirty` and keeps the index its edits
    /// set, so the next flush retries. Other dates are re-read from the store.
    fn handle_save_failure(&mut self, key: DateKey, err: anyhow::Error) {
        tracing::error!(?err, date = %key, "failed to save entry");
        self.auto_save.record_failure(format!("{err:#}"));
        if key == self.selected {
            if self.phase == SessionPhase::Clean {
                self.phase = SessionPhase::Dirty;
            }
            return;
        }
        let persisted = self.store.load(key).is_some();
        self.set_indexed(key, persisted);
    }

    fn set_indexed(&mut self, key: DateKey, has_content: bool) {
        let changed = if has_content {
            self.content_index.insert(key)
        } else {
            self.content_index.remove(&key)
        };
        if changed {
            self.emit(DiaryEvent::ContentIndexChanged {
                date: key.date(),
                has_content,
            });
        }
    }

    fn refresh_formatting(&mut self, force: bool) {
        let state = self.editor.formatting_state();
        if force || state != self.formatting {
            self.formatting = state;
            self.emit(DiaryEvent::FormattingChanged(state));
        }
    }

    fn emit(&mut self, event: DiaryEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn shift_month(date: Date, delta_months: i32) -> Option<Date> {
    let index = date
        .year()
        .checked_mul(12)?
        .checked_add(i32::from(u8::from(date.month())) - 1)?
        .checked_add(delta_months)?;
    let year = index.div_euclid(12);
    let month = Month::try_from(u8::try_from(index.rem_euclid(12) + 1).ok()?).ok()?;
    let day = date.day().min(month.length(year));
    Date::from_calendar_date(year, month, day).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageOptions;
    use crate::storage::{self, list_backups};
    use assert_matches::assert_matches;
    use tempfile::TempDir;
    use time::macros::date;

    struct Harness {
        temp: TempDir,
        store: EntryStore,
        config: Arc<AppConfig>,
    }

    impl Harness {
        fn new() -> anyhow::Result<Self> {
            let temp = TempDir::new()?;
            let mut config = AppConfig::default();
            config.storage = StorageOptions {
                database_path: temp.path().join("diary.sqlite"),
                backup_dir: temp.path().join("Backups"),
                ..StorageOptions::default()
            };
            let store = storage::init(&config.storage)?;
            Ok(Self {
                temp,
                store,
                config: Arc::new(config),
            })
        }

        fn open(&self, date: Date) -> DiaryController {
            DiaryController::open_at(self.config.clone(), self.store.clone(), date)
        }

        fn seed(&self, date: Date, text: &str) -> anyhow::Result<()> {
            let bytes = document::encode(&Document::plain(text))?;
            self.store.save(DateKey::from(date), Some(bytes))
        }

        fn stored_text(&self, date: Date) -> anyhow::Result<Option<String>> {
            match self.store.load(DateKey::from(date)) {
                Some(bytes) => Ok(Some(document::decode(&bytes)?.text())),
                None => Ok(None),
            }
        }

        fn assert_index_matches_store(&self, diary: &DiaryController) {
            assert_eq!(diary.content_index, self.store.all_keys());
        }
    }

    #[test]
    fn typed_text_is_saved_on_flush() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let mut diary = harness.open(date!(2024 - 02 - 29));
        diary.select_date(date!(2024 - 03 - 01));
        assert!(diary.edit(|editor| editor.insert_text("Hello")));
        assert_eq!(diary.phase(), SessionPhase::Dirty);

        diary.flush_pending_save();

        assert_eq!(diary.phase(), SessionPhase::Clean);
        assert_eq!(
            harness.store.all_keys(),
            HashSet::from([DateKey::from(date!(2024 - 03 - 01))])
        );
        assert_eq!(
            harness.stored_text(date!(2024 - 03 - 01))?.as_deref(),
            Some("Hello")
        );
        Ok(())
    }

    #[test]
    fn blank_entries_are_deleted() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let day = date!(2024 - 03 - 02);
        let mut diary = harness.open(day);
        diary.edit(|editor| editor.insert_text("x"));
        diary.flush_pending_save();
        assert!(diary.has_content(day));

        diary.edit(|editor| editor.replace(0..1, " \n "));
        assert!(!diary.has_content(day));
        diary.flush_pending_save();

        assert_eq!(harness.stored_text(day)?, None);
        harness.assert_index_matches_store(&diary);
        Ok(())
    }

    #[test]
    fn navigation_flushes_the_previous_entry() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let mut diary = harness.open(date!(2024 - 05 - 10));
        diary.edit(|editor| editor.insert_text("tenth"));
        diary.navigate(1);

        assert_eq!(diary.selected_date(), date!(2024 - 05 - 11));
        assert!(diary.document().is_empty());
        assert_eq!(diary.phase(), SessionPhase::Loaded);
        assert_eq!(harness.stored_text(date!(2024 - 05 - 10))?.as_deref(), Some("tenth"));

        diary.navigate(-1);
        assert_eq!(diary.document().text(), "tenth");
        assert_eq!(diary.editor().caret(), 0);
        harness.assert_index_matches_store(&diary);
        Ok(())
    }

    #[test]
    fn debounced_save_waits_for_the_quiet_period() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let day = date!(2024 - 06 - 01);
        let mut diary = harness.open(day);
        let events = diary.subscribe();

        diary.edit(|editor| editor.insert_text("a"));
        diary.edit(|editor| editor.insert_text("b"));
        diary.tick_at(Instant::now());
        assert!(diary.in_flight.is_empty());
        assert!(diary.phase().is_dirty());

        diary.tick_at(Instant::now() + std::time::Duration::from_secs(2));
        assert_eq!(diary.in_flight.len(), 1);
        assert_eq!(diary.phase(), SessionPhase::Clean);

        assert!(diary.has_pending_save());
        diary.flush_pending_save();
        assert!(!diary.has_pending_save());
        assert_eq!(harness.stored_text(day)?.as_deref(), Some("ab"));
        let saved: Vec<_> = events
            .try_iter()
            .filter(|event| matches!(event, DiaryEvent::Saved(_)))
            .collect();
        assert_eq!(saved, [DiaryEvent::Saved(day)]);
        Ok(())
    }

    #[test]
    fn retried_save_restores_the_content_index() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let day = date!(2024 - 08 - 12);
        let mut diary = harness.open(day);
        let blocker = rusqlite::Connection::open(&harness.config.storage.database_path)?;
        blocker.execute_batch(
            "CREATE TRIGGER reject_entries BEFORE INSERT ON entries
             BEGIN SELECT RAISE(ABORT, 'entries are read-only'); END;",
        )?;

        diary.edit(|editor| editor.insert_text("kept"));
        diary.flush_pending_save();
        assert_eq!(diary.phase(), SessionPhase::Dirty);
        assert_eq!(harness.stored_text(day)?, None);
        assert!(diary.has_content(day));
        assert_matches!(diary.auto_save_status(), AutoSaveStatus::Error { .. });

        blocker.execute_batch("DROP TRIGGER reject_entries;")?;
        diary.flush_pending_save();

        assert_eq!(diary.phase(), SessionPhase::Clean);
        assert_eq!(harness.stored_text(day)?.as_deref(), Some("kept"));
        assert!(diary.has_content(day));
        harness.assert_index_matches_store(&diary);
        Ok(())
    }

    #[test]
    fn out_of_range_day_navigation_is_ignored() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let mut diary = harness.open(date!(2024 - 01 - 01));
        diary.navigate(i64::MAX);
        diary.navigate(i64::MIN);
        diary.navigate(10_000_000);
        assert_eq!(diary.selected_date(), date!(2024 - 01 - 01));
        diary.navigate(-1);
        assert_eq!(diary.selected_date(), date!(2023 - 12 - 31));
        Ok(())
    }

    #[test]
    fn month_navigation_clamps_the_day() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let mut diary = harness.open(date!(2024 - 01 - 31));
        diary.navigate_month(1);
        assert_eq!(diary.selected_date(), date!(2024 - 02 - 29));
        diary.navigate_month(-2);
        assert_eq!(diary.selected_date(), date!(2023 - 12 - 29));
        diary.navigate_month(14);
        assert_eq!(diary.current_month(), (2025, Month::February));
        Ok(())
    }

    #[test]
    fn adjacent_content_search_is_bounded() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.seed(date!(2024 - 01 - 10), "ten")?;
        harness.seed(date!(2024 - 01 - 20), "twenty")?;
        let mut diary = harness.open(date!(2024 - 01 - 15));

        assert_eq!(
            diary.navigate_to_adjacent_content_date(ContentDirection::Next),
            Some(date!(2024 - 01 - 20))
        );
        assert_eq!(diary.document().text(), "twenty");
        assert_eq!(
            diary.navigate_to_adjacent_content_date(ContentDirection::Previous),
            Some(date!(2024 - 01 - 10))
        );
        assert_eq!(
            diary.navigate_to_adjacent_content_date(ContentDirection::Previous),
            None
        );
        assert_eq!(diary.selected_date(), date!(2024 - 01 - 10));

        let mut config = (*harness.config).clone();
        config.navigation.content_search_horizon_days = 3;
        let mut short = DiaryController::open_at(
            Arc::new(config),
            harness.store.clone(),
            date!(2024 - 01 - 15),
        );
        assert_eq!(short.navigate_to_adjacent_content_date(ContentDirection::Next), None);
        assert_eq!(short.selected_date(), date!(2024 - 01 - 15));
        Ok(())
    }

    #[test]
    fn undecodable_entries_open_empty() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let day = date!(2024 - 02 - 02);
        harness.store.save(DateKey::from(day), Some(b"not rtf".to_vec()))?;
        let diary = harness.open(day);
        assert!(diary.document().is_empty());
        assert!(diary.has_content(day));
        Ok(())
    }

    #[test]
    fn events_describe_selection_and_formatting() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.seed(date!(2024 - 04 - 02), "plain")?;
        let mut diary = harness.open(date!(2024 - 04 - 01));
        let events = diary.subscribe();

        diary.select_date(date!(2024 - 04 - 02));
        diary.set_selection(0..5);
        assert!(diary.toggle_bold());
        assert!(diary.formatting_state().is_bold);

        let received: Vec<DiaryEvent> = events.try_iter().collect();
        assert_eq!(received[0], DiaryEvent::DateSelected(date!(2024 - 04 - 02)));
        assert_eq!(received[1], DiaryEvent::DocumentChanged);
        assert_matches!(received[2], DiaryEvent::FormattingChanged(_));
        assert_matches!(
            received.last(),
            Some(DiaryEvent::FormattingChanged(FormattingState { is_bold: true, .. }))
        );
        Ok(())
    }

    #[test]
    fn dispatcher_routes_commands() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.seed(date!(2024 - 03 - 05), "entry")?;
        let mut diary = harness.open(date!(2024 - 03 - 01));
        let mut dispatcher = ActionDispatcher::new(&mut diary);

        assert!(dispatcher.dispatch(Command::NextDay));
        assert!(dispatcher.dispatch(Command::NextDateWithContent));
        assert!(!dispatcher.dispatch(Command::NextDateWithContent));
        assert!(dispatcher.dispatch(Command::PreviousMonth));
        assert_eq!(diary.selected_date(), date!(2024 - 02 - 05));
        Ok(())
    }

    #[test]
    fn shutdown_flushes_and_backs_up() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let day = date!(2024 - 07 - 04);
        let mut diary = harness.open(day);
        diary.edit(|editor| editor.insert_text("last words"));
        diary.shutdown();

        assert_eq!(diary.phase(), SessionPhase::Unloaded);
        assert_eq!(list_backups(&harness.temp.path().join("Backups"))?.len(), 1);

        let reopened = storage::init(&harness.config.storage)?;
        let bytes = reopened.load(DateKey::from(day)).expect("entry persisted");
        assert_eq!(document::decode(&bytes)?.text(), "last words");
        Ok(())
    }
}
