use crate::analysis::rules::{rank_destinations, DestinationCandidate, RuleSet};
use crate::error::{Error, Result};
use crate::platform;
use crate::storage::models::*;
use crate::storage::Database;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Parameters for a copy or move.
#[derive(Debug, Clone, Deserialize)]
pub struct CopyRequest {
    pub source_file_id: i64,
    /// Chosen from the ranked destinations when absent.
    #[serde(default)]
    pub dest_drive_id: Option<i64>,
    /// Absolute, or relative to the destination mount. Defaults to the source's
    /// path relative to its own mount.
    #[serde(default)]
    pub dest_path: Option<String>,
    #[serde(default = "default_verify")]
    pub verify_hash: bool,
}

fn default_verify() -> bool {
    true
}

impl CopyRequest {
    pub fn new(source_file_id: i64) -> Self {
        Self {
            source_file_id,
            dest_drive_id: None,
            dest_path: None,
            verify_hash: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub file_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub operations: Vec<Operation>,
    pub errors: Vec<BatchFailure>,
}

fn source_location(db: &Database, file_id: i64) -> Result<FileLocation> {
    db.get_file_location(file_id)?
        .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))
}

fn media_kind_of(db: &Database, file_id: i64) -> Result<MediaKind> {
    let kind = match db.item_id_for_file(file_id)? {
        Some(item_id) => db.get_item(item_id)?.map(|item| item.kind),
        None => None,
    };
    Ok(kind.unwrap_or(MediaKind::Unknown))
}

/// Ranked eligible destination drives for copying `file_id`.
pub fn destinations(db: &Database, file_id: i64, buffer: u64) -> Result<Vec<DestinationCandidate>> {
    let location = source_location(db, file_id)?;
    let kind = media_kind_of(db, file_id)?;
    let rules = RuleSet::load(db)?;
    let ranked = rank_destinations(
        db.list_drives()?,
        &rules,
        Some(location.drive_id),
        kind,
        location.file.size.max(0) as u64,
        buffer,
        |drive| platform::free_space(Path::new(&drive.mount_path)).ok(),
    );
    Ok(ranked)
}

fn resolve_dest_path(location: &FileLocation, dest_mount: &str, requested: Option<&str>) -> PathBuf {
    let mount = Path::new(dest_mount);
    match requested {
        Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
        Some(path) => join_relative(mount, path),
        None => {
            let source = location.absolute_path();
            let relative = relative_path_string(Path::new(&location.mount_path), &source)
                .unwrap_or_else(|| location.file.path.clone());
            join_relative(mount, &relative)
        }
    }
}

/// Create a pending copy or move operation.
pub fn enqueue_transfer(
    db: &Database,
    kind: OperationKind,
    request: &CopyRequest,
    buffer: u64,
) -> Result<Operation> {
    if kind == OperationKind::Delete {
        return Err(Error::Validation("delete operations have no destination".to_string()));
    }
    let location = source_location(db, request.source_file_id)?;

    let dest_drive = match request.dest_drive_id {
        Some(drive_id) => db
            .get_drive(drive_id)?
            .ok_or_else(|| Error::NotFound(format!("drive {}", drive_id)))?,
        None => destinations(db, request.source_file_id, buffer)?
            .into_iter()
            .next()
            .map(|candidate| candidate.drive)
            .ok_or_else(|| {
                Error::Validation("no eligible destination drive available".to_string())
            })?,
    };

    let dest = resolve_dest_path(&location, &dest_drive.mount_path, request.dest_path.as_deref());
    if dest == location.absolute_path() {
        return Err(Error::Validation("destination is the source itself".to_string()));
    }
    if dest.exists() {
        return Err(Error::Conflict(format!("destination {} already exists", dest.display())));
    }

    let op_id = db.insert_operation(&NewOperation {
        kind,
        source_file_id: location.file.id,
        source_path: location.absolute_path().to_string_lossy().into_owned(),
        dest_drive_id: Some(dest_drive.id),
        dest_path: Some(dest.to_string_lossy().into_owned()),
        total_size: location.file.size,
        verify_hash: request.verify_hash,
    })?;
    info!(
        "Queued {} {} of file {} to {}",
        kind,
        op_id,
        location.file.id,
        dest.display()
    );
    db.get_operation(op_id)?
        .ok_or_else(|| Error::NotFound(format!("operation {}", op_id)))
}

pub fn enqueue_delete(db: &Database, file_id: i64) -> Result<Operation> {
    let location = source_location(db, file_id)?;
    let op_id = db.insert_operation(&NewOperation {
        kind: OperationKind::Delete,
        source_file_id: location.file.id,
        source_path: location.absolute_path().to_string_lossy().into_owned(),
        dest_drive_id: None,
        dest_path: None,
        total_size: location.file.size,
        verify_hash: false,
    })?;
    info!("Queued delete {} of file {}", op_id, file_id);
    db.get_operation(op_id)?
        .ok_or_else(|| Error::NotFound(format!("operation {}", op_id)))
}

/// One auto-routed copy per file of the item. Per-file failures are collected.
pub fn enqueue_batch_copy(db: &Database, item_id: i64, verify_hash: bool, buffer: u64) -> Result<BatchReport> {
    let files = db.item_files(item_id)?;
    if files.is_empty() {
        return Err(Error::NotFound(format!("no files found for item {}", item_id)));
    }

    let mut report = BatchReport::default();
    for file in files {
        let file_id = file.location.file.id;
        let request = CopyRequest {
            verify_hash,
            ..CopyRequest::new(file_id)
        };
        match enqueue_transfer(db, OperationKind::Copy, &request, buffer) {
            Ok(op) => report.operations.push(op),
            Err(e) => report.errors.push(BatchFailure {
                file_id,
                error: e.to_string(),
            }),
        }
    }
    info!(
        "Batch copy for item {}: {} queued, {} failed",
        item_id,
        report.operations.len(),
        report.errors.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> FileLocation {
        FileLocation {
            file: FileRecord {
                id: 1,
                root_id: 1,
                path: "Heat (1995).mkv".to_string(),
                size: 10,
                mtime: 0,
                ext: Some("mkv".to_string()),
                last_seen: String::new(),
                last_seen_scan_id: None,
                missing: false,
                quick_sig: None,
                full_hash: None,
                hash_status: HashStatus::Pending,
                quarantine_path: None,
            },
            root_path: "/mnt/d1/media/movies".to_string(),
            drive_id: 1,
            mount_path: "/mnt/d1".to_string(),
        }
    }

    #[test]
    fn test_default_dest_mirrors_mount_relative_path() {
        let dest = resolve_dest_path(&location(), "/mnt/d2", None);
        assert_eq!(dest, Path::new("/mnt/d2/media/movies/Heat (1995).mkv"));
    }

    #[test]
    fn test_requested_dest_paths() {
        let relative = resolve_dest_path(&location(), "/mnt/d2", Some("backup/heat.mkv"));
        assert_eq!(relative, Path::new("/mnt/d2/backup/heat.mkv"));
        let absolute = resolve_dest_path(&location(), "/mnt/d2", Some("/elsewhere/heat.mkv"));
        assert_eq!(absolute, Path::new("/elsewhere/heat.mkv"));
    }
}
