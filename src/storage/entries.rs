use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::config::StorageOptions;
use crate::date_key::DateKey;

use super::schema;

#[derive(Debug, Clone, Copy)]
pub struct WalCheckpointStats {
    pub busy_frames: i64,
    pub wal_frames: i64,
    pub checkpointed_frames: i64,
}

/// The `entries` table behind one connection. Only the storage worker owns
/// one of these.
pub struct SqliteEntries {
    conn: Connection,
    db_path: PathBuf,
}

impl SqliteEntries {
    pub fn open(options: &StorageOptions) -> Result<Self> {
        let db_path = &options.database_path;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        prepare_connection(&conn, options)?;
        schema::apply(&conn)?;
        Ok(Self {
            conn,
            db_path: db_path.clone(),
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn load(&self, key: &DateKey) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT rtf_data FROM entries WHERE date = ?1",
                params![key.to_string()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .with_context(|| format!("loading entry {key}"))
    }

    /// Upserts `bytes` for `key`, or deletes the row when `bytes` is `None`.
    /// Deleting a missing row is not an error.
    pub fn save(&self, key: &DateKey, bytes: Option<&[u8]>) -> Result<()> {
        match bytes {
            Some(bytes) => {
                self.conn
                    .execute(
                        "INSERT INTO entries (date, rtf_data, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?3)
                         ON CONFLICT(date) DO UPDATE
                         SET rtf_data = excluded.rtf_data,
                             updated_at = excluded.updated_at",
                        params![key.to_string(), bytes, now_seconds()],
                    )
                    .with_context(|| format!("saving entry {key}"))?;
            }
            None => {
                self.conn
                    .execute(
                        "DELETE FROM entries WHERE date = ?1",
                        params![key.to_string()],
                    )
                    .with_context(|| format!("deleting entry {key}"))?;
            }
        }
        Ok(())
    }

    pub fn all_keys(&self) -> Result<HashSet<DateKey>> {
        let mut stmt = self
            .conn
            .prepare("SELECT date FROM entries")
            .context("preparing key listing")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("listing entry keys")?;
        let mut keys = HashSet::new();
        for raw in rows {
            let raw = raw?;
            match DateKey::parse(&raw) {
                Ok(key) => {
                    keys.insert(key);
                }
                Err(err) => tracing::warn!(?err, key = %raw, "ignoring row with malformed date"),
            }
        }
        Ok(keys)
    }

    pub fn has_rows(&self) -> Result<bool> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM entries LIMIT 1", [], |row| row.get(0))
            .optional()
            .context("checking for existing entries")?;
        Ok(existing.is_some())
    }

    /// Inserts every row in one transaction; nothing is written if any
    /// insert fails.
    pub fn insert_batch(&mut self, rows: &[(DateKey, Vec<u8>)]) -> Result<usize> {
        let now = now_seconds();
        let tx = self.conn.transaction().context("starting batch insert")?;
        for (key, bytes) in rows {
            tx.execute(
                "INSERT INTO entries (date, rtf_data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![key.to_string(), bytes, now],
            )
            .with_context(|| format!("inserting entry {key}"))?;
        }
        tx.commit().context("committing batch insert")?;
        Ok(rows.len())
    }

    /// Folds the WAL back into the main file so a plain file copy is a
    /// complete snapshot.
    pub fn checkpoint(&self) -> Result<WalCheckpointStats> {
        let mut stmt = self
            .conn
            .prepare("PRAGMA wal_checkpoint(TRUNCATE)")
            .context("preparing wal checkpoint pragma")?;
        let mut rows = stmt.query([]).context("executing wal checkpoint pragma")?;
        if let Some(row) = rows.next()? {
            Ok(WalCheckpointStats {
                busy_frames: row.get(0)?,
                wal_frames: row.get(1)?,
                checkpointed_frames: row.get(2)?,
            })
        } else {
            bail!("wal checkpoint returned no rows");
        }
    }
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

fn now_seconds() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_entries() -> anyhow::Result<(TempDir, SqliteEntries)> {
        let temp = TempDir::new()?;
        let mut options = StorageOptions::default();
        options.database_path = temp.path().join("data/diary.sqlite");
        options.backup_dir = temp.path().join("data/Backups");
        let entries = SqliteEntries::open(&options)?;
        Ok((temp, entries))
    }

    /// (rtf_data, created_at, updated_at)
    fn row(entries: &SqliteEntries, key: &DateKey) -> anyhow::Result<(Vec<u8>, f64, f64)> {
        Ok(entries.conn.query_row(
            "SELECT rtf_data, created_at, updated_at FROM entries WHERE date = ?1",
            params![key.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?)
    }

    #[test]
    fn upsert_keeps_created_at_and_refreshes_updated_at() -> anyhow::Result<()> {
        let (_temp, entries) = open_entries()?;
        let key = DateKey::parse("2024-03-01")?;
        entries.save(&key, Some(b"first"))?;
        let (_, first_created, first_updated) = row(&entries, &key)?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        entries.save(&key, Some(b"second"))?;
        let (data, created, updated) = row(&entries, &key)?;
        assert_eq!(data, b"second");
        assert_eq!(created, first_created);
        assert!(updated > first_updated);
        Ok(())
    }

    #[test]
    fn saving_twice_matches_saving_once() -> anyhow::Result<()> {
        let (_temp, entries) = open_entries()?;
        let key = DateKey::parse("2024-03-02")?;
        entries.save(&key, Some(b"same"))?;
        entries.save(&key, Some(b"same"))?;
        assert_eq!(entries.load(&key)?, Some(b"same".to_vec()));
        assert_eq!(entries.all_keys()?.len(), 1);
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> anyhow::Result<()> {
        let (_temp, entries) = open_entries()?;
        let key = DateKey::parse("2024-03-03")?;
        entries.save(&key, None)?;
        entries.save(&key, Some(b"x"))?;
        entries.save(&key, None)?;
        entries.save(&key, None)?;
        assert_eq!(entries.load(&key)?, None);
        assert!(!entries.has_rows()?);
        Ok(())
    }

    #[test]
    fn batch_insert_is_all_or_nothing() -> anyhow::Result<()> {
        let (_temp, mut entries) = open_entries()?;
        let key = DateKey::parse("2024-01-01")?;
        let rows = vec![(key, b"a".to_vec()), (key, b"b".to_vec())];
        assert!(entries.insert_batch(&rows).is_err());
        assert!(!entries.has_rows()?);
        Ok(())
    }

    #[test]
    fn checkpoint_reports_frames() -> anyhow::Result<()> {
        let (_temp, entries) = open_entries()?;
        entries.save(&DateKey::parse("2024-01-02")?, Some(b"x"))?;
        let stats = entries.checkpoint()?;
        assert!(stats.busy_frames >= 0 && stats.wal_frames >= 0 && stats.checkpointed_frames >= 0);
        Ok(())
    }
}
