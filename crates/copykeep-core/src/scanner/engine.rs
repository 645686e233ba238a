use super::walk::{compile_ignore_patterns, walk_root};
use crate::config::{self, AppConfig};
use crate::control::{lock, ControlToken};
use crate::error::{Error, Result};
use crate::storage::models::{extension_of, now_timestamp, relative_path_string, Observation, ObservedFile, Root};
use crate::storage::queries::ScanRunCounters;
use crate::storage::Database;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const PAUSE_POLL: Duration = Duration::from_millis(50);
const COUNTER_FLUSH_EVERY: i64 = 100;

/// Delay inserted between file visits to bound I/O pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Throttle {
    Low,
    #[default]
    Normal,
    Fast,
}

impl Throttle {
    pub fn delay(&self) -> Duration {
        match self {
            Throttle::Low => Duration::from_millis(100),
            Throttle::Normal => Duration::from_millis(10),
            Throttle::Fast => Duration::ZERO,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Throttle::Low => "low",
            Throttle::Normal => "normal",
            Throttle::Fast => "fast",
        }
    }
}

impl fmt::Display for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Throttle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Throttle::Low),
            "normal" => Ok(Throttle::Normal),
            "fast" => Ok(Throttle::Fast),
            other => Err(Error::Validation(format!("unknown throttle '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl ScanState {
    pub fn is_active(&self) -> bool {
        matches!(self, ScanState::Running | ScanState::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanControl {
    Pause,
    Resume,
    Cancel,
}

/// Snapshot of the scan engine for polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub state: ScanState,
    pub drive_id: Option<i64>,
    pub throttle: Throttle,
    pub scan_run_id: Option<i64>,
    pub current_root: Option<String>,
    pub files_scanned: i64,
    pub files_new: i64,
    pub files_updated: i64,
    pub files_missing: i64,
    pub errors: i64,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    /// Set when the pass stopped on a catalog failure rather than completing.
    pub error: Option<String>,
}

impl Default for ScanStatus {
    fn default() -> Self {
        Self {
            state: ScanState::Idle,
            drive_id: None,
            throttle: Throttle::default(),
            scan_run_id: None,
            current_root: None,
            files_scanned: 0,
            files_new: 0,
            files_updated: 0,
            files_missing: 0,
            errors: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

impl ScanStatus {
    fn counters(&self) -> ScanRunCounters {
        ScanRunCounters {
            files_scanned: self.files_scanned,
            files_new: self.files_new,
            files_updated: self.files_updated,
            files_missing: self.files_missing,
            errors: self.errors,
        }
    }
}

/// Process-wide scan singleton. One pass may be active at a time; the pass runs on its
/// own thread with its own catalog connection.
pub struct ScanEngine {
    db_path: PathBuf,
    ignore_patterns: Vec<String>,
    status: Arc<Mutex<ScanStatus>>,
    control: Mutex<ControlToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScanEngine {
    pub fn new(db_path: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            db_path: db_path.into(),
            ignore_patterns: config.ignore_patterns.clone(),
            status: Arc::new(Mutex::new(ScanStatus::default())),
            control: Mutex::new(ControlToken::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ScanStatus {
        lock(&self.status).clone()
    }

    /// Begin a pass over the active roots, optionally limited to one drive.
    pub fn start(&self, drive_id: Option<i64>, throttle: Throttle) -> Result<ScanStatus> {
        let token = ControlToken::new();
        {
            let mut status = lock(&self.status);
            if status.state.is_active() {
                return Err(Error::Conflict("a scan is already running".to_string()));
            }
            *status = ScanStatus {
                state: ScanState::Running,
                drive_id,
                throttle,
                started_at: Some(now_timestamp()),
                ..ScanStatus::default()
            };
            *lock(&self.control) = token.clone();
        }

        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let job = ScanJob {
            db_path: self.db_path.clone(),
            ignore_patterns: self.ignore_patterns.clone(),
            drive_id,
            throttle,
            status: Arc::clone(&self.status),
            token,
        };
        let spawned = thread::Builder::new()
            .name("copykeep-scan".to_string())
            .spawn(move || job.run());
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                let mut status = lock(&self.status);
                status.state = ScanState::Idle;
                status.error = Some(e.to_string());
                return Err(Error::Io(e));
            }
        }
        drop(worker);
        Ok(self.status())
    }

    pub fn control(&self, action: ScanControl) -> Result<ScanStatus> {
        let mut status = lock(&self.status);
        let token = lock(&self.control).clone();
        match (action, status.state) {
            (ScanControl::Pause, ScanState::Running) => {
                token.pause();
                status.state = ScanState::Paused;
                info!("Scan paused");
            }
            (ScanControl::Resume, ScanState::Paused) => {
                token.resume();
                status.state = ScanState::Running;
                info!("Scan resumed");
            }
            (ScanControl::Cancel, ScanState::Running | ScanState::Paused) => {
                token.cancel();
                info!("Scan cancel requested");
            }
            (action, state) => {
                return Err(Error::Conflict(format!(
                    "cannot {:?} a scan in state {:?}",
                    action, state
                )));
            }
        }
        Ok(status.clone())
    }

    /// Block until the current pass (if any) has finished.
    pub fn wait(&self) {
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}

struct ScanJob {
    db_path: PathBuf,
    ignore_patterns: Vec<String>,
    drive_id: Option<i64>,
    throttle: Throttle,
    status: Arc<Mutex<ScanStatus>>,
    token: ControlToken,
}

enum PassOutcome {
    Completed,
    Cancelled,
}

impl ScanJob {
    fn run(self) {
        info!(
            "Scan started (drive {:?}, throttle {})",
            self.drive_id, self.throttle
        );
        let db = match Database::open(&self.db_path) {
            Ok(db) => db,
            Err(e) => {
                error!("Scan could not open catalog: {}", e);
                self.finish_with_error(e.to_string());
                return;
            }
        };

        let mut run_id = None;
        let result = self.scan_roots(&db, &mut run_id);
        let counters = lock(&self.status).counters();

        match result {
            Ok(outcome) => {
                let state = match outcome {
                    PassOutcome::Completed => ScanState::Completed,
                    PassOutcome::Cancelled => ScanState::Cancelled,
                };
                if let Some(run_id) = run_id {
                    let label = if state == ScanState::Completed { "completed" } else { "cancelled" };
                    if let Err(e) = db.finish_scan_run(run_id, label, &counters) {
                        warn!("Failed to record end of scan run {}: {}", run_id, e);
                    }
                }
                let mut status = lock(&self.status);
                status.state = state;
                status.current_root = None;
                status.finished_at = Some(now_timestamp());
                info!(
                    "Scan {:?}: {} scanned, {} new, {} updated, {} missing, {} errors",
                    state,
                    status.files_scanned,
                    status.files_new,
                    status.files_updated,
                    status.files_missing,
                    status.errors
                );
            }
            Err(e) => {
                error!("Scan aborted: {}", e);
                if let Some(run_id) = run_id {
                    let _ = db.finish_scan_run(run_id, "failed", &counters);
                }
                self.finish_with_error(e.to_string());
            }
        }
    }

    fn finish_with_error(&self, message: String) {
        let mut status = lock(&self.status);
        status.state = ScanState::Idle;
        status.current_root = None;
        status.finished_at = Some(now_timestamp());
        status.error = Some(message);
    }

    fn scan_roots(&self, db: &Database, run_id: &mut Option<i64>) -> Result<PassOutcome> {
        let roots = distinct_roots(db.list_active_roots(self.drive_id)?);
        let root_ids: Vec<i64> = roots.iter().map(|r| r.id).collect();
        let id = db.create_scan_run(self.drive_id, self.throttle.as_str(), &root_ids)?;
        *run_id = Some(id);
        lock(&self.status).scan_run_id = Some(id);
        debug!("Scan run {} covers roots {:?}", id, root_ids);

        let patterns = compile_ignore_patterns(&self.ignore_patterns);
        let delay = self.throttle.delay();

        for root in &roots {
            if self.token.is_cancelled() {
                return Ok(PassOutcome::Cancelled);
            }
            lock(&self.status).current_root = Some(root.path.clone());
            info!("Scanning root {} ({})", root.id, root.path);

            let root_path = Path::new(&root.path);
            for walked in walk_root(root_path, &patterns) {
                match self.token.checkpoint(PAUSE_POLL) {
                    Err(Error::Cancelled) => return Ok(PassOutcome::Cancelled),
                    Err(e) => return Err(e),
                    Ok(()) => {}
                }

                let outcome = walked.map_err(Error::from).and_then(|file| {
                    let relative = relative_path_string(root_path, &file.path).ok_or_else(|| {
                        Error::Other(format!("{} is outside its root", file.path.display()))
                    })?;
                    let observed = ObservedFile {
                        root_id: root.id,
                        ext: extension_of(&file.path),
                        path: relative,
                        size: file.size as i64,
                        mtime: file.mtime,
                    };
                    Ok(db.observe_file(&observed, id)?)
                });

                let flush = {
                    let mut status = lock(&self.status);
                    match outcome {
                        Ok(observation) => {
                            status.files_scanned += 1;
                            match observation {
                                Observation::New => status.files_new += 1,
                                Observation::Updated => status.files_updated += 1,
                                Observation::Unchanged => {}
                            }
                        }
                        Err(Error::Database(e)) => return Err(Error::Database(e)),
                        Err(e) => {
                            warn!("Skipping unreadable entry under {}: {}", root.path, e);
                            status.errors += 1;
                        }
                    }
                    (status.files_scanned + status.errors) % COUNTER_FLUSH_EVERY == 0
                };
                if flush {
                    let counters = lock(&self.status).counters();
                    db.update_scan_run(id, &counters)?;
                }

                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }

            // Only a fully walked root can say what went missing.
            let missing = db.mark_unseen_missing(root.id, id)? as i64;
            let counters = {
                let mut status = lock(&self.status);
                status.files_missing += missing;
                status.counters()
            };
            db.update_scan_run(id, &counters)?;
        }

        if self.token.is_cancelled() {
            return Ok(PassOutcome::Cancelled);
        }
        Ok(PassOutcome::Completed)
    }
}

/// Drop roots nested inside another active root so no file is visited twice.
fn distinct_roots(roots: Vec<Root>) -> Vec<Root> {
    let paths = roots.iter().map(|r| r.path.clone()).collect();
    let keep = config::non_overlapping_directories(paths);
    let mut kept: Vec<Root> = Vec::new();
    for root in roots {
        if keep.contains(&root.path) && !kept.iter().any(|k| k.path == root.path) {
            kept.push(root);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(id: i64, path: &str) -> Root {
        Root {
            id,
            drive_id: 1,
            path: path.to_string(),
            excluded: false,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_throttle_delays() {
        assert_eq!(Throttle::Fast.delay(), Duration::ZERO);
        assert_eq!(Throttle::Normal.delay(), Duration::from_millis(10));
        assert_eq!(Throttle::Low.delay(), Duration::from_millis(100));
        assert_eq!("FAST".parse::<Throttle>().unwrap(), Throttle::Fast);
        assert!("warp".parse::<Throttle>().is_err());
    }

    #[test]
    fn test_nested_roots_are_skipped() {
        let roots = vec![
            root(1, "/mnt/d1/media/movies"),
            root(2, "/mnt/d1/media"),
            root(3, "/mnt/d2/media"),
        ];
        let ids: Vec<i64> = distinct_roots(roots).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_control_without_scan_is_conflict() {
        let engine = ScanEngine::new("unused.db", &AppConfig::default());
        assert!(matches!(
            engine.control(ScanControl::Pause),
            Err(Error::Conflict(_))
        ));
        assert_eq!(engine.status().state, ScanState::Idle);
    }
}
