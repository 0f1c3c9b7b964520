use std::fmt::Write as _;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use time::Date;

use crate::app::{ContentDirection, DiaryController};
use crate::config::{AppConfig, ConfigPaths};
use crate::date_key::DateKey;
use crate::document::{self, Document, PARAGRAPH_SEPARATOR};
use crate::storage::{EntryStore, LegacyPreferences, MigrationOutcome};

const PREVIEW_CHARS: usize = 60;

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only list entries from this month (YYYY-MM)
    #[arg(long)]
    pub month: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ShowArgs {
    /// Entry date (YYYY-MM-DD); defaults to today
    #[arg()]
    pub date: Option<DateKey>,
}

#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Entry date (YYYY-MM-DD)
    #[arg()]
    pub date: DateKey,
    /// Entry text. If omitted, reads from stdin. Empty text deletes the entry.
    #[arg(long)]
    pub text: Option<String>,
    /// Append to the existing entry instead of replacing it
    #[arg(long)]
    pub append: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AdjacentArgs {
    /// Date to search from (YYYY-MM-DD)
    #[arg()]
    pub date: DateKey,
    /// previous or next
    #[arg(long, default_value = "next")]
    pub direction: ContentDirection,
}

pub fn list_entries(store: &EntryStore, args: ListArgs) -> Result<()> {
    print!("{}", render_list(store, &args)?);
    Ok(())
}

pub fn show_entry(store: &EntryStore, args: ShowArgs) -> Result<()> {
    let key = args.date.unwrap_or_else(DateKey::today);
    match load_document(store, key)? {
        Some(document) => println!("{}", document.text()),
        None => println!("No entry for {key}"),
    }
    Ok(())
}

pub fn write_entry(config: Arc<AppConfig>, store: &EntryStore, args: WriteArgs) -> Result<()> {
    let text = match args.text {
        Some(text) => text,
        None => read_stdin()?.unwrap_or_default(),
    };
    let kept = apply_write(config, store, args.date, &text, args.append);
    if kept {
        println!("Saved entry for {}", args.date);
    } else {
        println!("Entry for {} is empty and was removed", args.date);
    }
    Ok(())
}

pub fn adjacent_entry(config: Arc<AppConfig>, store: &EntryStore, args: AdjacentArgs) -> Result<()> {
    let diary = DiaryController::open_at(config, store.clone(), args.date.date());
    match diary.find_adjacent_content_date(args.direction) {
        Some(date) => println!("{}", DateKey::from(date)),
        None => println!("No {} entry within the search horizon", args.direction),
    }
    Ok(())
}

pub fn backup(config: Arc<AppConfig>, store: &EntryStore) -> Result<()> {
    let path = store
        .backup_now(config.storage.backup_retain)
        .context("writing backup")?;
    println!("Backup written to {}", path.display());
    Ok(())
}

pub fn migrate(store: &EntryStore, paths: &ConfigPaths) -> Result<()> {
    let prefs = LegacyPreferences::new(&paths.legacy_preferences);
    println!("{}", describe_migration(&store.migrate_legacy_if_needed(&prefs)));
    Ok(())
}

fn render_list(store: &EntryStore, args: &ListArgs) -> Result<String> {
    let month = args
        .month
        .as_deref()
        .map(parse_month)
        .transpose()?;
    let mut keys: Vec<DateKey> = store.all_keys().into_iter().collect();
    keys.sort();

    let mut output = String::new();
    for key in keys {
        let date = key.date();
        if let Some((year, number)) = month {
            if date.year() != year || u8::from(date.month()) != number {
                continue;
            }
        }
        let summary = load_document(store, key)?
            .map(|document| preview(&document))
            .unwrap_or_default();
        writeln!(output, "{key}  {summary}")?;
    }
    if output.is_empty() {
        output.push_str("No entries\n");
    }
    Ok(output)
}

fn parse_month(raw: &str) -> Result<(i32, u8)> {
    let key = DateKey::parse(&format!("{}-01", raw.trim()))
        .with_context(|| format!("'{raw}' is not a YYYY-MM month"))?;
    let date: Date = key.date();
    Ok((date.year(), u8::from(date.month())))
}

fn preview(document: &Document) -> String {
    let text = document.text();
    let first = text
        .split(PARAGRAPH_SEPARATOR)
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    let mut preview: String = first.chars().take(PREVIEW_CHARS).collect();
    if first.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

fn load_document(store: &EntryStore, key: DateKey) -> Result<Option<Document>> {
    store
        .load(key)
        .map(|bytes| document::decode(&bytes).with_context(|| format!("decoding entry {key}")))
        .transpose()
}

/// Writes through the controller so blank text deletes the entry the same
/// way the editor does. Returns whether the entry still has content.
fn apply_write(
    config: Arc<AppConfig>,
    store: &EntryStore,
    key: DateKey,
    text: &str,
    append: bool,
) -> bool {
    let mut diary = DiaryController::open_at(config, store.clone(), key.date());
    diary.edit(|editor| {
        let end = editor.document().len();
        if append {
            editor.set_caret(end);
            if end > 0 && !text.is_empty() {
                editor.insert_newline();
            }
            editor.insert_text(text)
        } else {
            editor.replace(0..end, text)
        }
    });
    diary.flush_pending_save();
    diary.has_content(key.date())
}

fn describe_migration(outcome: &MigrationOutcome) -> String {
    match outcome {
        MigrationOutcome::AlreadyPopulated => "Store already has entries; nothing to migrate".into(),
        MigrationOutcome::NoLegacyData => "No legacy entries found".into(),
        MigrationOutcome::Migrated { migrated, skipped } => {
            format!("Migrated {migrated} entries ({skipped} skipped)")
        }
        MigrationOutcome::Failed => "Migration failed; see log for details".into(),
    }
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
