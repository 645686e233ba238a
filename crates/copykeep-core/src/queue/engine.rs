use super::owner::QueueOwner;
use super::transfer::{copy_resumable, discard_part, part_path, TransferOptions, TransferOutcome};
use crate::config::{clamp_concurrency, QueueConfig};
use crate::control::{lock, ControlToken};
use crate::error::{Error, Result};
use crate::hasher::{self, hash_one};
use crate::storage::models::*;
use crate::storage::operations::OperationCounts;
use crate::storage::Database;
use dashmap::DashMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Running,
    Paused,
    /// Dispatch has ended but claimed operations are still working.
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub state: QueueState,
    pub running: bool,
    pub paused: bool,
    pub concurrency: usize,
    pub active_count: usize,
    pub active_operations: Vec<i64>,
    pub counts: OperationCounts,
}

struct Shared {
    db_path: PathBuf,
    config: QueueConfig,
    running: AtomicBool,
    paused: AtomicBool,
    concurrency: AtomicUsize,
    /// Claimed operations and the token their worker checks between chunks.
    active: DashMap<i64, ControlToken>,
}

/// Dispatcher plus a pool of up to `concurrency` transfer workers, one thread each.
pub struct OperationsQueue {
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    /// Held from `start` until the queue has stopped and drained.
    owner: Mutex<Option<QueueOwner>>,
}

impl OperationsQueue {
    pub fn new(db_path: impl Into<PathBuf>, config: &QueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                db_path: db_path.into(),
                config: config.clone(),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                concurrency: AtomicUsize::new(config.clamped_concurrency()),
                active: DashMap::new(),
            }),
            dispatcher: Mutex::new(None),
            owner: Mutex::new(None),
        }
    }

    /// Operations a dead process left `running` go back to `paused`. Skipped while
    /// another queue owns the catalog, since its rows are still being worked.
    pub fn recover_interrupted(db: &Database, db_path: &Path) -> Result<usize> {
        match QueueOwner::try_acquire(db_path)? {
            Some(_owner) => Ok(db.recover_interrupted_operations()?),
            None => {
                debug!("Queue is owned elsewhere; leaving running operations alone");
                Ok(0)
            }
        }
    }

    fn state(&self) -> QueueState {
        let running = self.shared.running.load(Ordering::SeqCst);
        let paused = self.shared.paused.load(Ordering::SeqCst);
        match (running, paused) {
            (true, true) => QueueState::Paused,
            (true, false) => QueueState::Running,
            (false, _) if !self.shared.active.is_empty() => QueueState::Stopping,
            (false, _) => QueueState::Stopped,
        }
    }

    pub fn status(&self, db: &Database) -> Result<QueueStatus> {
        let mut active_operations: Vec<i64> =
            self.shared.active.iter().map(|entry| *entry.key()).collect();
        active_operations.sort_unstable();
        Ok(QueueStatus {
            state: self.state(),
            running: self.shared.running.load(Ordering::SeqCst),
            paused: self.shared.paused.load(Ordering::SeqCst),
            concurrency: self.shared.concurrency.load(Ordering::SeqCst),
            active_count: active_operations.len(),
            active_operations,
            counts: OperationCounts::from_map(&db.operation_counts()?),
        })
    }

    /// Start dispatching. Fails with a conflict while another process owns the queue.
    pub fn start(&self, db: &Database) -> Result<()> {
        let mut dispatcher = lock(&self.dispatcher);
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        // A stopped dispatcher exits once it sees `running` false, so join it first.
        if let Some(previous) = dispatcher.take() {
            let _ = previous.join();
        }

        let mut owner = lock(&self.owner);
        if owner.is_none() {
            let acquired = QueueOwner::try_acquire(&self.shared.db_path)?.ok_or_else(|| {
                Error::Conflict("operations queue is running in another process".to_string())
            })?;
            db.recover_interrupted_operations()?;
            *owner = Some(acquired);
        }
        drop(owner);

        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("copykeep-dispatch".to_string())
            .spawn(move || dispatch_loop(shared));
        match handle {
            Ok(handle) => *dispatcher = Some(handle),
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(Error::Io(e));
            }
        }
        info!("Queue started");
        Ok(())
    }

    /// End dispatch. Claimed operations run to a terminal or paused state.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        info!(
            "Queue stopping with {} active operations",
            self.shared.active.len()
        );
    }

    pub fn pause(&self) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(Error::Conflict("queue is not running".to_string()));
        }
        self.shared.paused.store(true, Ordering::SeqCst);
        info!("Queue paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(Error::Conflict("queue is not running".to_string()));
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        info!("Queue resumed");
        Ok(())
    }

    pub fn set_concurrency(&self, limit: usize) -> usize {
        let clamped = clamp_concurrency(limit);
        self.shared.concurrency.store(clamped, Ordering::SeqCst);
        info!("Queue concurrency set to {}", clamped);
        clamped
    }

    pub fn is_active(&self, op_id: i64) -> bool {
        self.shared.active.contains_key(&op_id)
    }

    /// Pause one operation. A running transfer stops at its next chunk boundary and
    /// keeps its partial file; a pending one is parked directly.
    pub fn pause_operation(&self, db: &Database, op_id: i64) -> Result<Operation> {
        let op = get_operation(db, op_id)?;
        match op.status {
            OperationStatus::Running => {
                if let Some(token) = self.shared.active.get(&op_id) {
                    token.pause();
                } else if !self.request_remote(db, op_id, OperationControl::Pause)? {
                    db.transition_operation(op_id, &[OperationStatus::Running], OperationStatus::Paused)?;
                }
            }
            OperationStatus::Pending => {
                if !db.transition_operation(op_id, &[OperationStatus::Pending], OperationStatus::Paused)? {
                    return Err(conflict(op_id, "pause"));
                }
            }
            _ => return Err(conflict(op_id, "pause")),
        }
        info!("Operation {} pause requested", op_id);
        get_operation(db, op_id)
    }

    /// Put a paused operation back in line; it continues from its recorded progress.
    pub fn resume_operation(&self, db: &Database, op_id: i64) -> Result<Operation> {
        let op = get_operation(db, op_id)?;
        if op.status != OperationStatus::Paused
            || !db.transition_operation(op_id, &[OperationStatus::Paused], OperationStatus::Pending)?
        {
            return Err(conflict(op_id, "resume"));
        }
        info!("Operation {} resumed from byte {}", op_id, op.progress);
        get_operation(db, op_id)
    }

    pub fn cancel_operation(&self, db: &Database, op_id: i64) -> Result<Operation> {
        let op = get_operation(db, op_id)?;
        if op.status.is_terminal() {
            return Err(conflict(op_id, "cancel"));
        }
        if let Some(token) = self.shared.active.get(&op_id) {
            token.cancel();
            info!("Operation {} cancel requested", op_id);
            return get_operation(db, op_id);
        }
        if op.status == OperationStatus::Running
            && self.request_remote(db, op_id, OperationControl::Cancel)?
        {
            info!("Operation {} cancel requested from its owning process", op_id);
            return get_operation(db, op_id);
        }

        let from = [
            OperationStatus::Pending,
            OperationStatus::Paused,
            OperationStatus::Running,
        ];
        if !db.transition_operation(op_id, &from, OperationStatus::Cancelled)? {
            return Err(conflict(op_id, "cancel"));
        }
        if let Some(dest) = &op.dest_path {
            discard_part(&part_path(Path::new(dest)));
        }
        info!("Operation {} cancelled", op_id);
        get_operation(db, op_id)
    }

    /// Block until the dispatcher has exited and every claimed operation has settled.
    /// Ownership is released once nothing is left running here.
    pub fn wait_stopped(&self) {
        if let Some(handle) = lock(&self.dispatcher).take() {
            let _ = handle.join();
        }
        while !self.shared.active.is_empty() {
            thread::sleep(self.shared.config.poll_interval());
        }
        if !self.shared.running.load(Ordering::SeqCst) {
            if let Some(owner) = lock(&self.owner).take() {
                debug!("Released queue ownership at {}", owner.path().display());
            }
        }
    }

    /// Leave `control` on a running operation that is not ours. Returns false when no
    /// live queue owns the catalog, so the caller may settle the row itself.
    fn request_remote(&self, db: &Database, op_id: i64, control: OperationControl) -> Result<bool> {
        if lock(&self.owner).is_some() {
            return Ok(false);
        }
        match QueueOwner::try_acquire(&self.shared.db_path)? {
            Some(_orphaned) => Ok(false),
            None => {
                if !db.request_operation_control(op_id, control)? {
                    return Err(conflict(op_id, control.as_str()));
                }
                Ok(true)
            }
        }
    }
}

fn get_operation(db: &Database, op_id: i64) -> Result<Operation> {
    db.get_operation(op_id)?
        .ok_or_else(|| Error::NotFound(format!("operation {}", op_id)))
}

fn conflict(op_id: i64, action: &str) -> Error {
    Error::Conflict(format!("cannot {} operation {} in its current state", action, op_id))
}

fn dispatch_loop(shared: Arc<Shared>) {
    let db = match Database::open(&shared.db_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Queue dispatcher could not open catalog: {}", e);
            shared.running.store(false, Ordering::SeqCst);
            return;
        }
    };
    let poll = shared.config.poll_interval();

    while shared.running.load(Ordering::SeqCst) {
        if shared.paused.load(Ordering::SeqCst) {
            thread::sleep(poll);
            continue;
        }
        let limit = shared.concurrency.load(Ordering::SeqCst);
        let free = limit.saturating_sub(shared.active.len());
        if free > 0 {
            if let Err(e) = dispatch_batch(&shared, &db, free) {
                error!("Queue dispatch failed: {}", e);
            }
        }
        thread::sleep(poll);
    }
    debug!("Queue dispatcher exited");
}

fn dispatch_batch(shared: &Arc<Shared>, db: &Database, free: usize) -> Result<()> {
    for op_id in db.next_pending_operations(free as i64)? {
        if !shared.running.load(Ordering::SeqCst) || shared.paused.load(Ordering::SeqCst) {
            break;
        }
        if shared.active.contains_key(&op_id) {
            continue;
        }
        // Register before claiming so control requests never miss a running operation.
        shared.active.insert(op_id, ControlToken::new());
        if !db.claim_operation(op_id)? {
            shared.active.remove(&op_id);
            continue;
        }
        info!("Claimed operation {}", op_id);

        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("copykeep-op-{}", op_id))
            .spawn(move || run_worker(worker_shared, op_id));
        if let Err(e) = spawned {
            db.fail_operation(op_id, &format!("could not start worker: {}", e))?;
            shared.active.remove(&op_id);
        }
    }
    Ok(())
}

fn run_worker(shared: Arc<Shared>, op_id: i64) {
    let token = match shared.active.get(&op_id) {
        Some(entry) => entry.value().clone(),
        None => return,
    };

    match Database::open(&shared.db_path) {
        Ok(db) => {
            let options = TransferOptions::from(&shared.config);
            let result = get_operation(&db, op_id)
                .and_then(|op| execute(&db, &op, &options, &token));
            if let Err(e) = result {
                match db.fail_operation(op_id, &e.to_string()) {
                    Ok(true) => error!("Operation {} failed: {}", op_id, e),
                    Ok(false) => warn!(
                        "Operation {} had already left running when it errored: {}",
                        op_id, e
                    ),
                    Err(db_err) => {
                        error!("Operation {} failed: {}", op_id, e);
                        error!("Could not record failure of operation {}: {}", op_id, db_err);
                    }
                }
            }
        }
        Err(e) => error!("Worker for operation {} could not open catalog: {}", op_id, e),
    }

    shared.active.remove(&op_id);
}

/// Mirror a control request another process left on the row into the worker's token.
fn apply_requested_control(db: &Database, op_id: i64, token: &ControlToken) -> Result<()> {
    match db.operation_control(op_id)? {
        Some(OperationControl::Cancel) => token.cancel(),
        Some(OperationControl::Pause) => token.pause(),
        None => {}
    }
    Ok(())
}

fn execute(db: &Database, op: &Operation, options: &TransferOptions, token: &ControlToken) -> Result<()> {
    apply_requested_control(db, op.id, token)?;
    match op.kind {
        OperationKind::Copy | OperationKind::Move => transfer(db, op, options, token),
        OperationKind::Delete => delete_source(db, op, token),
    }
}

fn transfer(db: &Database, op: &Operation, options: &TransferOptions, token: &ControlToken) -> Result<()> {
    let dest_str = op
        .dest_path
        .as_deref()
        .ok_or_else(|| Error::Validation(format!("operation {} has no destination", op.id)))?;
    let dest = PathBuf::from(dest_str);
    let source = PathBuf::from(&op.source_path);
    if dest.exists() {
        return Err(Error::Conflict(format!("destination {} already exists", dest.display())));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let part = part_path(&dest);
    let part_len = fs::metadata(&part).map(|m| m.len()).unwrap_or(0);
    let recorded = op.progress.max(0) as u64;
    let offset = recorded.min(part_len);
    if offset != recorded {
        warn!(
            "Operation {} partial file holds {} of {} recorded bytes; resuming from there",
            op.id, part_len, recorded
        );
        db.reset_operation_progress(op.id, offset as i64)?;
    }

    let outcome = copy_resumable(&source, &part, offset, options, token, |copied| {
        db.set_operation_progress(op.id, copied as i64)?;
        apply_requested_control(db, op.id, token)
    });
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            discard_part(&part);
            return Err(e);
        }
    };

    let copied = match outcome {
        TransferOutcome::Paused(at) => {
            db.set_operation_progress(op.id, at as i64)?;
            db.transition_operation(op.id, &[OperationStatus::Running], OperationStatus::Paused)?;
            info!("Operation {} paused at byte {}", op.id, at);
            return Ok(());
        }
        TransferOutcome::Cancelled => {
            discard_part(&part);
            db.transition_operation(op.id, &[OperationStatus::Running], OperationStatus::Cancelled)?;
            info!("Operation {} cancelled", op.id);
            return Ok(());
        }
        TransferOutcome::Finished(copied) => copied,
    };

    let verified = match finalize_part(db, op, &source, &part, &dest, copied) {
        Ok(verified) => verified,
        Err(e) => {
            discard_part(&part);
            return Err(e);
        }
    };
    register_destination(db, op, &dest, verified.as_deref())?;

    if op.kind == OperationKind::Move {
        if let Err(e) = fs::remove_file(&source) {
            return Err(Error::Other(format!(
                "copied to {} but could not remove source {}: {}",
                dest.display(),
                source.display(),
                e
            )));
        }
        if let Some(file_id) = op.source_file_id {
            let item_id = db.item_id_for_file(file_id)?;
            db.delete_file_record(file_id)?;
            if let Some(item_id) = item_id {
                db.ensure_primary(item_id)?;
            }
        }
    }

    if db.complete_operation(op.id, copied as i64)? {
        info!("Operation {} completed ({} bytes)", op.id, copied);
    } else {
        warn!("Operation {} finished its copy after leaving running", op.id);
    }
    Ok(())
}

/// Check and verify a fully written part file, then rename it into place.
/// Returns the verified hash when verification ran.
fn finalize_part(
    db: &Database,
    op: &Operation,
    source: &Path,
    part: &Path,
    dest: &Path,
    copied: u64,
) -> Result<Option<String>> {
    db.set_operation_progress(op.id, copied as i64)?;

    let source_len = fs::metadata(source)?.len();
    if copied != source_len {
        return Err(Error::Other(format!(
            "size mismatch: source has {} bytes, copy has {}",
            source_len, copied
        )));
    }

    let verified = if op.verify_hash {
        let expected = source_full_hash(db, op)?;
        let actual = hasher::full_hash(part)?;
        if actual != expected {
            error!(
                "Operation {} verification mismatch: source {} destination {}",
                op.id, expected, actual
            );
            return Err(Error::Other(format!(
                "verification failed: destination hash {} does not match source hash {}",
                actual, expected
            )));
        }
        Some(actual)
    } else {
        None
    };

    fs::rename(part, dest)?;
    Ok(verified)
}

/// The source's recorded strong hash, computing and storing it first when absent.
fn source_full_hash(db: &Database, op: &Operation) -> Result<String> {
    if let Some(file_id) = op.source_file_id {
        if let Some(hash) = db.get_file(file_id)?.and_then(|f| f.full_hash) {
            return Ok(hash);
        }
        let outcome = hash_one(db, file_id)?;
        return match (outcome.full_hash, outcome.error) {
            (Some(hash), _) => Ok(hash),
            (None, error) => Err(Error::Other(format!(
                "could not hash source: {}",
                error.unwrap_or_default()
            ))),
        };
    }
    Ok(hasher::full_hash(Path::new(&op.source_path))?)
}

/// Catalog a finished destination when it lies under a registered root, and link it
/// to the source's media item.
fn register_destination(db: &Database, op: &Operation, dest: &Path, verified_hash: Option<&str>) -> Result<()> {
    let Some(drive_id) = op.dest_drive_id else {
        return Ok(());
    };
    let Some((root, relative)) = db.locate_in_roots(drive_id, dest)? else {
        debug!("Destination {} is outside every registered root", dest.display());
        return Ok(());
    };

    let metadata = fs::metadata(dest)?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let source = match op.source_file_id {
        Some(file_id) => db.get_file(file_id)?,
        None => None,
    };
    let quick_sig = match (verified_hash, &source) {
        (Some(_), Some(source)) => source.quick_sig.clone(),
        _ => None,
    };

    let new_id = db.upsert_file_record(
        root.id,
        &relative,
        metadata.len() as i64,
        mtime,
        quick_sig.as_deref(),
        verified_hash.filter(|_| quick_sig.is_some()),
    )?;

    if let Some(source_id) = op.source_file_id {
        if let Some(item_id) = db.item_id_for_file(source_id)? {
            if db.item_id_for_file(new_id)?.is_none() {
                db.link_file(item_id, new_id, false)?;
            }
        }
    }
    debug!("Catalogued destination {} as file {}", dest.display(), new_id);
    Ok(())
}

fn delete_source(db: &Database, op: &Operation, token: &ControlToken) -> Result<()> {
    if token.is_cancelled() {
        db.transition_operation(op.id, &[OperationStatus::Running], OperationStatus::Cancelled)?;
        return Ok(());
    }
    if token.is_paused() {
        db.transition_operation(op.id, &[OperationStatus::Running], OperationStatus::Paused)?;
        return Ok(());
    }
    fs::remove_file(&op.source_path)?;
    if let Some(file_id) = op.source_file_id {
        let item_id = db.item_id_for_file(file_id)?;
        db.delete_file_record(file_id)?;
        if let Some(item_id) = item_id {
            db.ensure_primary(item_id)?;
        }
    }
    if db.complete_operation(op.id, op.total_size)? {
        info!("Operation {} deleted {}", op.id, op.source_path);
    }
    Ok(())
}
