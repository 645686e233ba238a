use crate::config::QUARANTINE_DIR;
use crate::error::{Error, Result};
use crate::platform;
use crate::storage::models::{join_relative, relative_path_string, FileLocation};
use crate::storage::Database;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineMove {
    pub file_id: i64,
    pub original_path: String,
    pub quarantine_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarantineFailure {
    pub file_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuarantineReport {
    pub files: Vec<QuarantineMove>,
    pub errors: Vec<QuarantineFailure>,
}

/// Where a file goes when quarantined: `{base}/{path relative to mount}`, with the
/// base defaulting to `{mount}/.quarantine/{YYYY-MM-DD}`.
pub fn quarantine_destination(location: &FileLocation, base: Option<&Path>, date: &str) -> PathBuf {
    let mount = Path::new(&location.mount_path);
    let original = location.absolute_path();
    let relative = relative_path_string(mount, &original).unwrap_or_else(|| location.file.path.clone());
    let base = match base {
        Some(base) => base.to_path_buf(),
        None => mount.join(QUARANTINE_DIR).join(date),
    };
    join_relative(&base, &relative)
}

/// Move files aside, recording where each went. Reversible with [`restore`].
pub fn quarantine(db: &Database, file_ids: &[i64], base: Option<&Path>) -> Result<QuarantineReport> {
    if file_ids.is_empty() {
        return Err(Error::Validation("no file ids given".to_string()));
    }
    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let mut report = QuarantineReport::default();

    for &file_id in file_ids {
        match quarantine_one(db, file_id, base, &date) {
            Ok(moved) => report.files.push(moved),
            Err(e) => {
                error!("Quarantine of file {} failed: {}", file_id, e);
                report.errors.push(QuarantineFailure {
                    file_id,
                    error: e.to_string(),
                });
            }
        }
    }
    info!(
        "Quarantined {} files ({} errors)",
        report.files.len(),
        report.errors.len()
    );
    Ok(report)
}

fn quarantine_one(db: &Database, file_id: i64, base: Option<&Path>, date: &str) -> Result<QuarantineMove> {
    let location = db
        .get_file_location(file_id)?
        .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
    if location.file.quarantine_path.is_some() {
        return Err(Error::Conflict(format!("file {} is already quarantined", file_id)));
    }
    let original = location.absolute_path();
    if !original.exists() {
        return Err(Error::NotFound(format!("{} does not exist on disk", original.display())));
    }

    let destination = quarantine_destination(&location, base, date);
    platform::move_file(&original, &destination)?;
    let destination_str = destination.to_string_lossy().into_owned();
    db.set_quarantine_path(file_id, Some(&destination_str))?;

    Ok(QuarantineMove {
        file_id,
        original_path: original.to_string_lossy().into_owned(),
        quarantine_path: destination_str,
    })
}

/// Move quarantined files back to their catalogued location.
pub fn restore(db: &Database, file_ids: &[i64]) -> Result<QuarantineReport> {
    let mut report = QuarantineReport::default();
    for &file_id in file_ids {
        match restore_one(db, file_id) {
            Ok(moved) => report.files.push(moved),
            Err(e) => {
                error!("Restore of file {} failed: {}", file_id, e);
                report.errors.push(QuarantineFailure {
                    file_id,
                    error: e.to_string(),
                });
            }
        }
    }
    info!(
        "Restored {} files ({} errors)",
        report.files.len(),
        report.errors.len()
    );
    Ok(report)
}

fn restore_one(db: &Database, file_id: i64) -> Result<QuarantineMove> {
    let location = db
        .get_file_location(file_id)?
        .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;
    let quarantined = location
        .file
        .quarantine_path
        .clone()
        .ok_or_else(|| Error::Conflict(format!("file {} is not quarantined", file_id)))?;
    let original = location.absolute_path();
    if original.exists() {
        return Err(Error::Conflict(format!("{} already exists", original.display())));
    }

    platform::move_file(Path::new(&quarantined), &original)?;
    db.set_quarantine_path(file_id, None)?;

    Ok(QuarantineMove {
        file_id,
        original_path: original.to_string_lossy().into_owned(),
        quarantine_path: quarantined,
    })
}
