use super::fingerprint::fingerprint;
use crate::control::{lock, ControlToken};
use crate::error::{Error, Result};
use crate::storage::models::{now_timestamp, HashStatus};
use crate::storage::Database;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashState {
    Idle,
    Running,
    Complete,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct HashRunStatus {
    pub state: HashState,
    pub files_total: usize,
    pub files_processed: usize,
    pub files_failed: usize,
    pub queue_size: usize,
    pub current_file: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Default for HashRunStatus {
    fn default() -> Self {
        Self {
            state: HashState::Idle,
            files_total: 0,
            files_processed: 0,
            files_failed: 0,
            queue_size: 0,
            current_file: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Result of fingerprinting one catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct HashOutcome {
    pub file_id: i64,
    pub path: String,
    pub quick_sig: Option<String>,
    pub full_hash: Option<String>,
    pub error: Option<String>,
}

impl HashOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Fingerprint one record and persist the result. A read failure marks the record
/// `error` and is reported in the outcome, not as an `Err`.
pub fn hash_one(db: &Database, file_id: i64) -> Result<HashOutcome> {
    let location = db
        .get_file_location(file_id)?
        .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
    let path = location.absolute_path();
    let display_path = path.to_string_lossy().into_owned();

    match fingerprint(&path) {
        Ok(prints) => {
            db.set_file_hashes(file_id, &prints.quick_sig, &prints.full_hash)?;
            debug!("Hashed {} -> {}", display_path, prints.full_hash);
            Ok(HashOutcome {
                file_id,
                path: display_path,
                quick_sig: Some(prints.quick_sig),
                full_hash: Some(prints.full_hash),
                error: None,
            })
        }
        Err(e) => {
            warn!("Failed to hash {}: {}", display_path, e);
            db.set_hash_status(file_id, HashStatus::Error)?;
            Ok(HashOutcome {
                file_id,
                path: display_path,
                quick_sig: None,
                full_hash: None,
                error: Some(e.to_string()),
            })
        }
    }
}

/// Process-wide hashing singleton, draining a queue of file ids on a worker thread.
pub struct HashEngine {
    db_path: PathBuf,
    status: Arc<Mutex<HashRunStatus>>,
    queue: Arc<Mutex<VecDeque<i64>>>,
    control: Mutex<ControlToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HashEngine {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            status: Arc::new(Mutex::new(HashRunStatus::default())),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            control: Mutex::new(ControlToken::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn status(&self) -> HashRunStatus {
        let mut status = lock(&self.status).clone();
        status.queue_size = lock(&self.queue).len();
        status
    }

    /// Queue the given records, or every `pending` record when `file_ids` is `None`.
    pub fn compute(&self, file_ids: Option<Vec<i64>>) -> Result<HashRunStatus> {
        if lock(&self.status).state == HashState::Running {
            return Err(Error::Conflict("hashing is already running".to_string()));
        }

        let ids = match file_ids {
            Some(ids) => ids,
            None => Database::open(&self.db_path)?.pending_hash_ids()?,
        };
        let token = ControlToken::new();
        {
            let mut status = lock(&self.status);
            if status.state == HashState::Running {
                return Err(Error::Conflict("hashing is already running".to_string()));
            }
            *status = HashRunStatus {
                state: HashState::Running,
                files_total: ids.len(),
                queue_size: ids.len(),
                started_at: Some(now_timestamp()),
                ..HashRunStatus::default()
            };
            *lock(&self.queue) = ids.into_iter().collect();
            *lock(&self.control) = token.clone();
        }

        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }
        let job = HashJob {
            db_path: self.db_path.clone(),
            status: Arc::clone(&self.status),
            queue: Arc::clone(&self.queue),
            token,
        };
        let spawned = thread::Builder::new()
            .name("copykeep-hash".to_string())
            .spawn(move || job.run());
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                lock(&self.status).state = HashState::Stopped;
                return Err(Error::Io(e));
            }
        }
        drop(worker);
        Ok(self.status())
    }

    /// Halt after the file currently in progress. Remaining ids stay queued.
    pub fn stop(&self) -> Result<HashRunStatus> {
        if lock(&self.status).state != HashState::Running {
            return Err(Error::Conflict("hashing is not running".to_string()));
        }
        lock(&self.control).cancel();
        info!("Hash stop requested");
        Ok(self.status())
    }

    pub fn wait(&self) {
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}

struct HashJob {
    db_path: PathBuf,
    status: Arc<Mutex<HashRunStatus>>,
    queue: Arc<Mutex<VecDeque<i64>>>,
    token: ControlToken,
}

impl HashJob {
    fn run(self) {
        let total = lock(&self.status).files_total;
        info!("Hash run started for {} files", total);

        let db = match Database::open(&self.db_path) {
            Ok(db) => db,
            Err(e) => {
                warn!("Hash run could not open catalog: {}", e);
                self.finish(HashState::Stopped);
                return;
            }
        };

        loop {
            if self.token.is_cancelled() {
                break;
            }
            let Some(file_id) = lock(&self.queue).pop_front() else {
                break;
            };

            lock(&self.status).current_file = db
                .get_file_location(file_id)
                .ok()
                .flatten()
                .map(|loc| loc.absolute_path().to_string_lossy().into_owned());

            let failed = match hash_one(&db, file_id) {
                Ok(outcome) => !outcome.is_complete(),
                Err(e) => {
                    warn!("Skipping file {}: {}", file_id, e);
                    true
                }
            };

            let mut status = lock(&self.status);
            status.files_processed += 1;
            if failed {
                status.files_failed += 1;
            }
        }

        let remaining = lock(&self.queue).len();
        let state = if remaining > 0 {
            HashState::Stopped
        } else {
            HashState::Complete
        };
        self.finish(state);
    }

    fn finish(&self, state: HashState) {
        let mut status = lock(&self.status);
        status.state = state;
        status.current_file = None;
        status.finished_at = Some(now_timestamp());
        info!(
            "Hash run {:?}: {} processed, {} failed",
            state, status.files_processed, status.files_failed
        );
    }
}
