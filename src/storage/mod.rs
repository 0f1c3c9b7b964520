use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::config::StorageOptions;
use crate::date_key::DateKey;

mod backup;
mod entries;
mod legacy;
mod schema;

pub use backup::{backup_file_name, is_backup_file_name, list_backups};
pub use entries::{SqliteEntries, WalCheckpointStats};
pub use legacy::{LegacyPreferences, MigrationOutcome, LEGACY_ENTRIES_KEY};

const WORKER_THREAD_NAME: &str = "diary-storage";

enum Job {
    Load {
        key: DateKey,
        reply: Sender<Option<Vec<u8>>>,
    },
    Save {
        key: DateKey,
        bytes: Option<Vec<u8>>,
        reply: Sender<Result<()>>,
    },
    AllKeys {
        reply: Sender<HashSet<DateKey>>,
    },
    Migrate {
        prefs: LegacyPreferences,
        reply: Sender<MigrationOutcome>,
    },
    Backup {
        retain: usize,
        reply: Option<Sender<Result<PathBuf>>>,
    },
    Shutdown,
}

enum Backend {
    Sqlite(SqliteEntries),
    Inert,
}

/// Handle to the single storage worker. Every operation is queued on one
/// channel and served in order by one thread, so reads observe every write
/// enqueued before them.
#[derive(Clone)]
pub struct EntryStore {
    jobs: Sender<Job>,
    worker: Arc<Worker>,
    inert: bool,
}

struct Worker {
    jobs: Sender<Job>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn stop(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.jobs.send(Job::Shutdown);
        if handle.join().is_err() {
            tracing::error!("storage worker panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A save that has been queued but not necessarily written yet.
#[derive(Debug)]
pub struct PendingSave {
    key: DateKey,
    deletes: bool,
    reply: Receiver<Result<()>>,
}

impl PendingSave {
    pub fn key(&self) -> DateKey {
        self.key
    }

    /// `true` when the queued write removes the entry.
    pub fn deletes(&self) -> bool {
        self.deletes
    }

    /// `None` while the worker has not reached the job.
    pub fn poll(&self) -> Option<Result<()>> {
        match self.reply.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(anyhow!("storage worker stopped"))),
        }
    }

    pub fn wait(self) -> Result<()> {
        self.reply
            .recv()
            .map_err(|_| anyhow!("storage worker stopped"))?
    }
}

impl EntryStore {
    /// `true` when the database could not be opened and the store silently
    /// drops writes.
    pub fn is_inert(&self) -> bool {
        self.inert
    }

    pub fn load(&self, key: DateKey) -> Option<Vec<u8>> {
        let (reply, rx) = bounded(1);
        if self.jobs.send(Job::Load { key, reply }).is_err() {
            tracing::warn!(date = %key, "load after storage shutdown");
            return None;
        }
        rx.recv().ok().flatten()
    }

    pub fn submit_save(&self, key: DateKey, bytes: Option<Vec<u8>>) -> PendingSave {
        let (reply, rx) = bounded(1);
        let deletes = bytes.is_none();
        if let Err(err) = self.jobs.send(Job::Save { key, bytes, reply }) {
            if let Job::Save { reply, .. } = err.into_inner() {
                let _ = reply.send(Err(anyhow!("storage worker stopped")));
            }
        }
        PendingSave {
            key,
            deletes,
            reply: rx,
        }
    }

    /// Upserts or, for `None`, deletes the entry and waits for the write.
    pub fn save(&self, key: DateKey, bytes: Option<Vec<u8>>) -> Result<()> {
        self.submit_save(key, bytes).wait()
    }

    pub fn all_keys(&self) -> HashSet<DateKey> {
        let (reply, rx) = bounded(1);
        if self.jobs.send(Job::AllKeys { reply }).is_err() {
            return HashSet::new();
        }
        rx.recv().unwrap_or_default()
    }

    pub fn migrate_legacy_if_needed(&self, prefs: &LegacyPreferences) -> MigrationOutcome {
        let (reply, rx) = bounded(1);
        let job = Job::Migrate {
            prefs: prefs.clone(),
            reply,
        };
        if self.jobs.send(job).is_err() {
            return MigrationOutcome::Failed;
        }
        rx.recv().unwrap_or(MigrationOutcome::Failed)
    }

    /// Queues a backup with rotation and returns immediately.
    pub fn backup(&self, retain: usize) {
        if self.jobs.send(Job::Backup { retain, reply: None }).is_err() {
            tracing::warn!("backup requested after storage shutdown");
        }
    }

    pub fn backup_now(&self, retain: usize) -> Result<PathBuf> {
        let (reply, rx) = bounded(1);
        self.jobs
            .send(Job::Backup {
                retain,
                reply: Some(reply),
            })
            .map_err(|_| anyhow!("storage worker stopped"))?;
        rx.recv().map_err(|_| anyhow!("storage worker stopped"))?
    }

    /// Runs every job queued so far, then stops the worker. Later calls on
    /// any clone of this handle fail or return empty results.
    pub fn shutdown(&self) {
        self.worker.stop();
    }
}

pub fn init(options: &StorageOptions) -> Result<EntryStore> {
    let (jobs, rx) = unbounded();
    let (ready_tx, ready_rx) = bounded(1);
    let worker_options = options.clone();
    let handle = thread::Builder::new()
        .name(WORKER_THREAD_NAME.into())
        .spawn(move || {
            let backend = match SqliteEntries::open(&worker_options) {
                Ok(entries) => {
                    tracing::debug!(path = %entries.database_path().display(), "opened diary store");
                    Backend::Sqlite(entries)
                }
                Err(err) => {
                    tracing::error!(?err, "diary store unavailable, changes will not be kept");
                    Backend::Inert
                }
            };
            let _ = ready_tx.send(matches!(backend, Backend::Inert));
            run_worker(backend, worker_options.backup_dir, rx);
        })
        .context("spawning storage worker")?;
    let inert = ready_rx
        .recv()
        .context("storage worker exited during startup")?;
    Ok(EntryStore {
        worker: Arc::new(Worker {
            jobs: jobs.clone(),
            handle: Mutex::new(Some(handle)),
        }),
        jobs,
        inert,
    })
}

fn run_worker(mut backend: Backend, backup_dir: PathBuf, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        match job {
            Job::Load { key, reply } => {
                let _ = reply.send(load(&backend, key));
            }
            Job::Save { key, bytes, reply } => {
                let result = match &backend {
                    Backend::Sqlite(entries) => entries.save(&key, bytes.as_deref()),
                    Backend::Inert => Ok(()),
                };
                if let Err(err) = &result {
                    tracing::warn!(?err, date = %key, "save failed");
                }
                let _ = reply.send(result);
            }
            Job::AllKeys { reply } => {
                let keys = match &backend {
                    Backend::Sqlite(entries) => entries.all_keys().unwrap_or_else(|err| {
                        tracing::warn!(?err, "listing entries failed");
                        HashSet::new()
                    }),
                    Backend::Inert => HashSet::new(),
                };
                let _ = reply.send(keys);
            }
            Job::Migrate { prefs, reply } => {
                let outcome = match &mut backend {
                    Backend::Sqlite(entries) => {
                        legacy::migrate(entries, &prefs).unwrap_or_else(|err| {
                            tracing::error!(?err, "legacy migration failed");
                            MigrationOutcome::Failed
                        })
                    }
                    Backend::Inert => MigrationOutcome::Failed,
                };
                let _ = reply.send(outcome);
            }
            Job::Backup { retain, reply } => {
                let result = run_backup(&backend, &backup_dir, retain);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => match result {
                        Ok(path) => tracing::info!(path = %path.display(), "backup written"),
                        Err(err) => tracing::error!(?err, "backup failed"),
                    },
                }
            }
            Job::Shutdown => break,
        }
    }
    tracing::debug!("storage worker stopped");
}

fn load(backend: &Backend, key: DateKey) -> Option<Vec<u8>> {
    match backend {
        Backend::Sqlite(entries) => entries.load(&key).unwrap_or_else(|err| {
            tracing::warn!(?err, date = %key, "load failed");
            None
        }),
        Backend::Inert => None,
    }
}

fn run_backup(backend: &Backend, backup_dir: &Path, retain: usize) -> Result<PathBuf> {
    let Backend::Sqlite(entries) = backend else {
        bail!("diary store is unavailable");
    };
    let stats = entries.checkpoint()?;
    if stats.busy_frames > 0 {
        tracing::warn!(busy = stats.busy_frames, "wal checkpoint incomplete before backup");
    }
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let path = backup::copy_database(entries.database_path(), backup_dir, now)?;
    let removed = backup::rotate(backup_dir, retain)?;
    if removed > 0 {
        tracing::debug!(removed, "rotated old backups");
    }
    Ok(path)
}
