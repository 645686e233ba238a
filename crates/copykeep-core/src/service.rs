//! Request/response facade over the catalog and the three background engines.
//!
//! Every mutating method passes the write-mode gate first; reads never do.

use crate::analysis::{self, CleanupReport, DestinationCandidate, QuarantineReport};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::hasher::{self, HashEngine, HashOutcome, HashRunStatus};
use crate::matcher::{self, MergeReport, ProcessReport, SplitReport};
use crate::platform;
use crate::queue::{planner, BatchReport, CopyRequest, OperationsQueue, QueueStatus};
use crate::scanner::{ScanControl, ScanEngine, ScanStatus, Throttle};
use crate::storage::files::{FileQuery, FileStats};
use crate::storage::items::{ItemQuery, ItemStats, ItemUpdate};
use crate::storage::models::*;
use crate::storage::operations::OperationQuery;
use crate::storage::Database;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// A page of results plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

impl<T> From<(Vec<T>, i64)> for Page<T> {
    fn from((items, total): (Vec<T>, i64)) -> Self {
        Page { items, total }
    }
}

pub struct Service {
    config: AppConfig,
    db: Database,
    scan: ScanEngine,
    hash: HashEngine,
    queue: OperationsQueue,
}

impl Service {
    /// Open the catalog named by the configuration and build the engines over it.
    ///
    /// Scan runs a previous process left open are closed as cancelled. Running
    /// operations go to `paused` with their progress kept, unless another process
    /// still owns the queue.
    pub fn open(config: AppConfig) -> Result<Self> {
        let db_path = PathBuf::from(&config.database_path);
        let db = Database::open(&db_path)?;

        let abandoned = db.abandon_running_scan_runs()?;
        if abandoned > 0 {
            info!("Closed {} interrupted scan runs", abandoned);
        }
        OperationsQueue::recover_interrupted(&db, &db_path)?;

        Ok(Service {
            scan: ScanEngine::new(&db_path, &config),
            hash: HashEngine::new(&db_path),
            queue: OperationsQueue::new(&db_path, &config.queue),
            config,
            db,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn mode(&self) -> &'static str {
        if self.config.write_mode {
            "write"
        } else {
            "read-only"
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.config.write_mode {
            Ok(())
        } else {
            Err(Error::ReadOnly)
        }
    }

    // ── Drives & Roots ───────────────────────────────────────────

    pub fn register_drive(&self, mount_path: &str) -> Result<Drive> {
        self.ensure_writable()?;
        let mount = Path::new(mount_path);
        if !mount.is_dir() {
            return Err(Error::Validation(format!(
                "mount path {} does not exist or is not a directory",
                mount_path
            )));
        }
        if self.db.find_drive_by_mount(mount_path)?.is_some() {
            return Err(Error::Conflict(format!("drive {} is already registered", mount_path)));
        }
        let volume = platform::volume_info(mount);
        let id = self
            .db
            .insert_drive(mount_path, volume.serial.as_deref(), volume.label.as_deref())?;
        info!("Registered drive {} at {}", id, mount_path);
        self.get_drive(id)
    }

    /// Registered drives with live free/total space (absent when the mount is offline).
    pub fn list_drives(&self) -> Result<Vec<Drive>> {
        let drives = self.db.list_drives()?;
        Ok(drives.into_iter().map(with_space).collect())
    }

    pub fn get_drive(&self, drive_id: i64) -> Result<Drive> {
        self.db
            .get_drive(drive_id)?
            .map(with_space)
            .ok_or_else(|| Error::NotFound(format!("drive {}", drive_id)))
    }

    pub fn delete_drive(&self, drive_id: i64) -> Result<()> {
        self.ensure_writable()?;
        if !self.db.delete_drive(drive_id)? {
            return Err(Error::NotFound(format!("drive {}", drive_id)));
        }
        info!("Deleted drive {}", drive_id);
        Ok(())
    }

    pub fn create_root(&self, drive_id: i64, path: &str, excluded: bool) -> Result<Root> {
        self.ensure_writable()?;
        let drive = self.get_drive(drive_id)?;
        let root_path = Path::new(path);
        if !root_path.starts_with(&drive.mount_path) {
            return Err(Error::Validation(format!(
                "root {} is not under drive mount {}",
                path, drive.mount_path
            )));
        }
        if !root_path.is_dir() {
            return Err(Error::Validation(format!("root {} does not exist", path)));
        }
        if self.db.find_root(drive_id, path)?.is_some() {
            return Err(Error::Conflict(format!("root {} already exists on drive {}", path, drive_id)));
        }
        let id = self.db.insert_root(drive_id, path, excluded)?;
        info!("Created root {} at {}", id, path);
        self.get_root(id)
    }

    pub fn get_root(&self, root_id: i64) -> Result<Root> {
        self.db
            .get_root(root_id)?
            .ok_or_else(|| Error::NotFound(format!("root {}", root_id)))
    }

    pub fn list_roots(&self, drive_id: Option<i64>) -> Result<Vec<Root>> {
        Ok(self.db.list_roots(drive_id)?)
    }

    pub fn set_root_excluded(&self, root_id: i64, excluded: bool) -> Result<Root> {
        self.ensure_writable()?;
        if !self.db.set_root_excluded(root_id, excluded)? {
            return Err(Error::NotFound(format!("root {}", root_id)));
        }
        self.get_root(root_id)
    }

    pub fn delete_root(&self, root_id: i64) -> Result<()> {
        self.ensure_writable()?;
        if !self.db.delete_root(root_id)? {
            return Err(Error::NotFound(format!("root {}", root_id)));
        }
        info!("Deleted root {}", root_id);
        Ok(())
    }

    // ── Settings ─────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.db.get_setting(key)?)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_writable()?;
        Ok(self.db.set_setting(key, value)?)
    }

    // ── Files ────────────────────────────────────────────────────

    pub fn list_files(&self, query: &FileQuery) -> Result<Page<FileRecord>> {
        Ok(self.db.list_files(query)?.into())
    }

    pub fn get_file(&self, file_id: i64) -> Result<FileLocation> {
        self.db
            .get_file_location(file_id)?
            .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))
    }

    pub fn file_stats(&self) -> Result<FileStats> {
        Ok(self.db.file_stats()?)
    }

    pub fn prune_missing(&self, root_id: Option<i64>) -> Result<usize> {
        self.ensure_writable()?;
        let pruned = self.db.prune_missing(root_id)?;
        info!("Pruned {} missing file records", pruned);
        Ok(pruned)
    }

    // ── Scan ─────────────────────────────────────────────────────

    pub fn start_scan(&self, drive_id: Option<i64>, throttle: Throttle) -> Result<ScanStatus> {
        self.ensure_writable()?;
        if let Some(drive_id) = drive_id {
            self.get_drive(drive_id)?;
        }
        self.scan.start(drive_id, throttle)
    }

    pub fn scan_status(&self) -> ScanStatus {
        self.scan.status()
    }

    pub fn control_scan(&self, action: ScanControl) -> Result<ScanStatus> {
        self.ensure_writable()?;
        self.scan.control(action)
    }

    pub fn scan_runs(&self, limit: i64) -> Result<Vec<ScanRun>> {
        Ok(self.db.list_scan_runs(limit)?)
    }

    pub fn wait_for_scan(&self) {
        self.scan.wait();
    }

    // ── Hashing ──────────────────────────────────────────────────

    pub fn compute_hashes(&self, file_ids: Option<Vec<i64>>) -> Result<HashRunStatus> {
        self.ensure_writable()?;
        self.hash.compute(file_ids)
    }

    pub fn hash_status(&self) -> HashRunStatus {
        self.hash.status()
    }

    pub fn stop_hashing(&self) -> Result<HashRunStatus> {
        self.ensure_writable()?;
        self.hash.stop()
    }

    pub fn hash_file(&self, file_id: i64) -> Result<HashOutcome> {
        self.ensure_writable()?;
        hasher::hash_one(&self.db, file_id)
    }

    pub fn wait_for_hashing(&self) {
        self.hash.wait();
    }

    // ── Media Items ──────────────────────────────────────────────

    pub fn process_items(&self) -> Result<ProcessReport> {
        self.ensure_writable()?;
        matcher::process(&self.db)
    }

    pub fn merge_items(&self, target_id: i64, source_ids: &[i64]) -> Result<MergeReport> {
        self.ensure_writable()?;
        matcher::merge_items(&self.db, target_id, source_ids)
    }

    pub fn split_file(&self, file_id: i64) -> Result<SplitReport> {
        self.ensure_writable()?;
        matcher::split_file(&self.db, file_id)
    }

    pub fn update_item(&self, item_id: i64, update: &ItemUpdate) -> Result<MediaItem> {
        self.ensure_writable()?;
        matcher::update_item(&self.db, item_id, update)?;
        self.db
            .get_item(item_id)?
            .ok_or_else(|| Error::NotFound(format!("item {}", item_id)))
    }

    pub fn list_items(&self, query: &ItemQuery) -> Result<Page<MediaItem>> {
        Ok(self.db.list_items(query)?.into())
    }

    pub fn get_item(&self, item_id: i64) -> Result<MediaItemDetail> {
        self.db
            .item_detail(item_id)?
            .ok_or_else(|| Error::NotFound(format!("item {}", item_id)))
    }

    pub fn item_stats(&self) -> Result<ItemStats> {
        Ok(self.db.item_stats()?)
    }

    // ── Cleanup ──────────────────────────────────────────────────

    pub fn cleanup_recommendations(&self, min_copies: i64) -> Result<CleanupReport> {
        analysis::recommendations(&self.db, min_copies, self.config.cleanup.keep_copies)
    }

    pub fn quarantine_files(&self, file_ids: &[i64], base: Option<&Path>) -> Result<QuarantineReport> {
        self.ensure_writable()?;
        analysis::quarantine(&self.db, file_ids, base)
    }

    pub fn restore_files(&self, file_ids: &[i64]) -> Result<QuarantineReport> {
        self.ensure_writable()?;
        analysis::restore(&self.db, file_ids)
    }

    // ── Rules ────────────────────────────────────────────────────

    pub fn list_rules(&self) -> Result<Vec<UserRule>> {
        Ok(self.db.list_rules()?)
    }

    pub fn add_rule(&self, kind: RuleKind, drive_id: i64, priority: i64) -> Result<UserRule> {
        self.ensure_writable()?;
        self.get_drive(drive_id)?;
        let id = self.db.insert_rule(kind, drive_id, priority)?;
        info!("Added {} rule {} for drive {}", kind, id, drive_id);
        self.db
            .list_rules()?
            .into_iter()
            .find(|rule| rule.id == id)
            .ok_or_else(|| Error::NotFound(format!("rule {}", id)))
    }

    pub fn delete_rule(&self, rule_id: i64) -> Result<()> {
        self.ensure_writable()?;
        if !self.db.delete_rule(rule_id)? {
            return Err(Error::NotFound(format!("rule {}", rule_id)));
        }
        Ok(())
    }

    // ── Operations Queue ─────────────────────────────────────────

    pub fn destinations(&self, file_id: i64) -> Result<Vec<DestinationCandidate>> {
        planner::destinations(&self.db, file_id, self.config.min_free_buffer_bytes)
    }

    pub fn enqueue_copy(&self, request: &CopyRequest) -> Result<Operation> {
        self.ensure_writable()?;
        planner::enqueue_transfer(&self.db, OperationKind::Copy, request, self.config.min_free_buffer_bytes)
    }

    pub fn enqueue_move(&self, request: &CopyRequest) -> Result<Operation> {
        self.ensure_writable()?;
        planner::enqueue_transfer(&self.db, OperationKind::Move, request, self.config.min_free_buffer_bytes)
    }

    pub fn enqueue_delete(&self, file_id: i64) -> Result<Operation> {
        self.ensure_writable()?;
        planner::enqueue_delete(&self.db, file_id)
    }

    pub fn enqueue_batch_copy(&self, item_id: i64, verify_hash: bool) -> Result<BatchReport> {
        self.ensure_writable()?;
        planner::enqueue_batch_copy(&self.db, item_id, verify_hash, self.config.min_free_buffer_bytes)
    }

    pub fn list_operations(&self, query: &OperationQuery) -> Result<Page<Operation>> {
        Ok(self.db.list_operations(query)?.into())
    }

    pub fn get_operation(&self, op_id: i64) -> Result<Operation> {
        self.db
            .get_operation(op_id)?
            .ok_or_else(|| Error::NotFound(format!("operation {}", op_id)))
    }

    pub fn queue_status(&self) -> Result<QueueStatus> {
        self.queue.status(&self.db)
    }

    pub fn start_queue(&self) -> Result<QueueStatus> {
        self.ensure_writable()?;
        self.queue.start(&self.db)?;
        self.queue_status()
    }

    pub fn stop_queue(&self) -> Result<QueueStatus> {
        self.ensure_writable()?;
        self.queue.stop();
        self.queue_status()
    }

    pub fn pause_queue(&self) -> Result<QueueStatus> {
        self.ensure_writable()?;
        self.queue.pause()?;
        self.queue_status()
    }

    pub fn resume_queue(&self) -> Result<QueueStatus> {
        self.ensure_writable()?;
        self.queue.resume()?;
        self.queue_status()
    }

    pub fn set_concurrency(&self, limit: usize) -> Result<QueueStatus> {
        self.ensure_writable()?;
        self.queue.set_concurrency(limit);
        self.queue_status()
    }

    pub fn pause_operation(&self, op_id: i64) -> Result<Operation> {
        self.ensure_writable()?;
        self.queue.pause_operation(&self.db, op_id)
    }

    pub fn resume_operation(&self, op_id: i64) -> Result<Operation> {
        self.ensure_writable()?;
        self.queue.resume_operation(&self.db, op_id)
    }

    pub fn cancel_operation(&self, op_id: i64) -> Result<Operation> {
        self.ensure_writable()?;
        self.queue.cancel_operation(&self.db, op_id)
    }

    pub fn clear_finished_operations(&self) -> Result<usize> {
        self.ensure_writable()?;
        Ok(self.db.clear_finished_operations()?)
    }

    /// Stop dispatch and block until every claimed operation has settled.
    pub fn shutdown_queue(&self) {
        self.queue.stop();
        self.queue.wait_stopped();
    }

    /// Empty every catalog table. Refused while any engine is busy.
    pub fn truncate_catalog(&self) -> Result<()> {
        self.ensure_writable()?;
        if self.scan.status().state.is_active() || self.queue.status(&self.db)?.active_count > 0 {
            return Err(Error::Conflict("engines are still running".to_string()));
        }
        self.db.truncate_all()?;
        info!("Catalog truncated");
        Ok(())
    }
}

fn with_space(mut drive: Drive) -> Drive {
    let mount = Path::new(&drive.mount_path);
    drive.free_space = platform::free_space(mount).ok();
    drive.total_space = platform::total_space(mount).ok();
    drive
}
