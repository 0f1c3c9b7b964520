use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

const BACKUP_PREFIX: &str = "diary-";
const BACKUP_EXTENSION: &str = "sqlite";
const BACKUP_STAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]-[hour][minute][second]");

static BACKUP_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^diary-\d{8}-\d{6}\.sqlite$").expect("valid backup name pattern")
});

pub fn backup_file_name(at: OffsetDateTime) -> Result<String> {
    let stamp = at.format(BACKUP_STAMP).context("formatting backup timestamp")?;
    Ok(format!("{BACKUP_PREFIX}{stamp}.{BACKUP_EXTENSION}"))
}

pub fn is_backup_file_name(name: &str) -> bool {
    BACKUP_NAME.is_match(name)
}

/// Copies the database file into `backup_dir` under a timestamped name. The
/// caller checkpoints the WAL first so the main file is complete.
pub fn copy_database(database: &Path, backup_dir: &Path, at: OffsetDateTime) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir)
        .with_context(|| format!("creating backup directory {}", backup_dir.display()))?;
    let target = backup_dir.join(backup_file_name(at)?);
    let tmp = target.with_extension("sqlite.tmp");
    fs::copy(database, &tmp).with_context(|| {
        format!(
            "copying {} to {}",
            database.display(),
            tmp.display()
        )
    })?;
    fs::rename(&tmp, &target)
        .with_context(|| format!("finalizing backup {}", target.display()))?;
    Ok(target)
}

/// Backups in `dir`, newest first. Timestamped names sort chronologically.
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut backups = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_str().is_some_and(is_backup_file_name) {
            backups.push(entry.path());
        }
    }
    backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(backups)
}

/// Deletes all but the newest `retain` backups. Files that do not look like
/// backups are never touched.
pub fn rotate(dir: &Path, retain: usize) -> Result<usize> {
    let mut removed = 0;
    for stale in list_backups(dir)?.iter().skip(retain.max(1)) {
        match fs::remove_file(stale) {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(?err, path = %stale.display(), "failed to remove old backup"),
        }
    }
    Ok(removed)
}
