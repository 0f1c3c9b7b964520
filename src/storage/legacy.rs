use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::date_key::DateKey;
use crate::document::{self, Document};

use super::entries::SqliteEntries;

pub const LEGACY_ENTRIES_KEY: &str = "diaryEntries";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The table already had rows; nothing was read.
    AlreadyPopulated,
    NoLegacyData,
    Migrated { migrated: usize, skipped: usize },
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyValue {
    Bytes(Vec<u8>),
    Text(String),
}

/// The preferences file older releases kept every entry in, as one JSON
/// object under [`LEGACY_ENTRIES_KEY`].
#[derive(Debug, Clone)]
pub struct LegacyPreferences {
    path: PathBuf,
}

impl LegacyPreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_object(&self) -> Result<Option<IndexMap<String, Value>>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading preferences {}", self.path.display()))
            }
        };
        let object = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing preferences {}", self.path.display()))?;
        Ok(Some(object))
    }

    fn write_object(&self, object: &IndexMap<String, Value>) -> Result<()> {
        let json = serde_json::to_vec_pretty(object).context("serializing preferences")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)
            .with_context(|| format!("writing temporary preferences {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing preferences {}", self.path.display()))?;
        Ok(())
    }

    /// The legacy entry map, or `None` when the file or the key is missing.
    pub fn read_entries(&self) -> Result<Option<IndexMap<String, Value>>> {
        let Some(mut object) = self.read_object()? else {
            return Ok(None);
        };
        match object.shift_remove(LEGACY_ENTRIES_KEY) {
            Some(Value::Object(map)) => Ok(Some(map.into_iter().collect())),
            Some(other) => {
                tracing::warn!(kind = ?other, "legacy entries are not an object, ignoring");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Stores `entries` under the legacy key, keeping every other preference.
    pub fn write_entries(&self, entries: IndexMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut object = self.read_object()?.unwrap_or_default();
        object.insert(
            LEGACY_ENTRIES_KEY.to_string(),
            Value::Object(entries.into_iter().collect()),
        );
        self.write_object(&object)
    }

    pub fn remove_entries(&self) -> Result<()> {
        let Some(mut object) = self.read_object()? else {
            return Ok(());
        };
        if object.shift_remove(LEGACY_ENTRIES_KEY).is_some() {
            self.write_object(&object)?;
        }
        Ok(())
    }
}

/// Moves legacy entries into the table. Runs only against an empty table.
/// Bad keys, undecodable values and blank documents are skipped, as is any
/// key naming a day already taken by an earlier key. The rest is inserted
/// in one transaction before the legacy key is dropped.
pub fn migrate(entries: &mut SqliteEntries, prefs: &LegacyPreferences) -> Result<MigrationOutcome> {
    if entries.has_rows()? {
        return Ok(MigrationOutcome::AlreadyPopulated);
    }
    let Some(legacy) = prefs.read_entries()? else {
        return Ok(MigrationOutcome::NoLegacyData);
    };

    let mut rows = Vec::with_capacity(legacy.len());
    let mut seen = HashSet::with_capacity(legacy.len());
    let mut skipped = 0;
    for (raw_key, value) in legacy {
        match convert_entry(&raw_key, value) {
            Ok(Some((key, _))) if seen.contains(&key) => {
                tracing::warn!(key = %raw_key, date = %key, "skipping duplicate legacy entry");
                skipped += 1;
            }
            Ok(Some(row)) => {
                seen.insert(row.0);
                rows.push(row);
            }
            Ok(None) => skipped += 1,
            Err(err) => {
                tracing::warn!(?err, key = %raw_key, "skipping legacy entry");
                skipped += 1;
            }
        }
    }

    let migrated = entries.insert_batch(&rows)?;
    if let Err(err) = prefs.remove_entries() {
        tracing::warn!(?err, "migrated legacy entries but could not remove them");
    }
    tracing::info!(migrated, skipped, "migrated legacy diary entries");
    Ok(MigrationOutcome::Migrated { migrated, skipped })
}

fn convert_entry(raw_key: &str, value: Value) -> Result<Option<(DateKey, Vec<u8>)>> {
    let key = DateKey::parse(raw_key)?;
    let value: LegacyValue =
        serde_json::from_value(value).context("legacy value is neither text nor bytes")?;
    let doc = legacy_document(value);
    if doc.is_blank() {
        return Ok(None);
    }
    let bytes = document::encode(&doc)?;
    Ok(Some((key, bytes)))
}

// Values carry no format tag; anything that parses as RTF is taken as RTF.
fn legacy_document(value: LegacyValue) -> Document {
    match value {
        LegacyValue::Bytes(bytes) => document::decode(&bytes).unwrap_or_else(|_| {
            document::plain_text_to_document(&String::from_utf8_lossy(&bytes))
        }),
        LegacyValue::Text(text) => document::decode(text.as_bytes())
            .unwrap_or_else(|_| document::plain_text_to_document(&text)),
    }
}
