use super::rules::{DriveStanding, RuleSet};
use crate::error::Result;
use crate::storage::models::{ItemFile, MediaKind};
use crate::storage::Database;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct FileAdvice {
    pub file_id: i64,
    pub path: String,
    pub drive_id: i64,
    pub mount_path: String,
    pub size: i64,
    pub is_primary: bool,
}

impl From<&ItemFile> for FileAdvice {
    fn from(f: &ItemFile) -> Self {
        FileAdvice {
            file_id: f.location.file.id,
            path: f.location.absolute_path().to_string_lossy().into_owned(),
            drive_id: f.location.drive_id,
            mount_path: f.location.mount_path.clone(),
            size: f.location.file.size,
            is_primary: f.is_primary,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemRecommendation {
    pub item_id: i64,
    pub title: Option<String>,
    pub kind: MediaKind,
    pub copy_count: i64,
    pub keep: Vec<FileAdvice>,
    pub delete: Vec<FileAdvice>,
    pub reclaimable_bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub recommendations: Vec<ItemRecommendation>,
    pub total_items: usize,
    pub total_files_to_delete: usize,
    pub total_reclaimable_bytes: i64,
}

/// Keep/delete advice for every item with at least `min_copies` copies.
///
/// Read-only: nothing on disk or in the catalog changes.
pub fn recommendations(db: &Database, min_copies: i64, keep_copies: usize) -> Result<CleanupReport> {
    let rules = RuleSet::load(db)?;
    let keep_copies = keep_copies.max(1);
    let mut report = CleanupReport::default();

    for item in db.items_with_min_copies(min_copies.max(1))? {
        let files = db.item_files(item.id)?;
        let (keep, delete) = partition(files, &rules, item.kind, keep_copies);
        if delete.is_empty() {
            continue;
        }
        let reclaimable_bytes: i64 = delete.iter().map(|f| f.size).sum();
        report.total_files_to_delete += delete.len();
        report.total_reclaimable_bytes += reclaimable_bytes;
        report.recommendations.push(ItemRecommendation {
            item_id: item.id,
            title: item.title,
            kind: item.kind,
            copy_count: item.copy_count,
            keep,
            delete,
            reclaimable_bytes,
        });
    }
    report.total_items = report.recommendations.len();

    info!(
        "Cleanup advice: {} items, {} files, {} bytes reclaimable",
        report.total_items, report.total_files_to_delete, report.total_reclaimable_bytes
    );
    Ok(report)
}

/// Rank an item's copies and split them into the top `keep_copies` and the rest.
///
/// Order: drive standing under the rules, primary copy first, earliest catalogued,
/// then path.
pub fn partition(
    mut files: Vec<ItemFile>,
    rules: &RuleSet,
    kind: MediaKind,
    keep_copies: usize,
) -> (Vec<FileAdvice>, Vec<FileAdvice>) {
    files.sort_by(|a, b| compare_copies(a, b, rules, kind));
    let advice: Vec<FileAdvice> = files.iter().map(FileAdvice::from).collect();
    let split = keep_copies.min(advice.len());
    let (keep, delete) = advice.split_at(split);
    (keep.to_vec(), delete.to_vec())
}

fn compare_copies(a: &ItemFile, b: &ItemFile, rules: &RuleSet, kind: MediaKind) -> Ordering {
    let standing = |f: &ItemFile| -> DriveStanding { rules.standing(f.location.drive_id, kind) };
    standing(a)
        .cmp(&standing(b))
        .then(b.is_primary.cmp(&a.is_primary))
        .then(a.location.file.id.cmp(&b.location.file.id))
        .then(a.location.file.path.cmp(&b.location.file.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{FileLocation, FileRecord, HashStatus, RuleKind, UserRule};

    fn copy(id: i64, drive_id: i64, primary: bool) -> ItemFile {
        ItemFile {
            location: FileLocation {
                file: FileRecord {
                    id,
                    root_id: drive_id,
                    path: format!("movies/copy{}.mkv", id),
                    size: 1000 + id,
                    mtime: 0,
                    ext: Some("mkv".into()),
                    last_seen: String::new(),
                    last_seen_scan_id: None,
                    missing: false,
                    quick_sig: None,
                    full_hash: None,
                    hash_status: HashStatus::Pending,
                    quarantine_path: None,
                },
                root_path: format!("/mnt/d{}", drive_id),
                drive_id,
                mount_path: format!("/mnt/d{}", drive_id),
            },
            is_primary: primary,
        }
    }

    #[test]
    fn test_partition_prefers_primary_then_oldest() {
        let files = vec![copy(4, 1, false), copy(2, 2, false), copy(3, 3, true)];
        let (keep, delete) = partition(files, &RuleSet::default(), MediaKind::Movie, 2);
        let kept: Vec<i64> = keep.iter().map(|f| f.file_id).collect();
        assert_eq!(kept, vec![3, 2]);
        assert_eq!(delete.len(), 1);
        assert_eq!(delete[0].file_id, 4);
    }

    #[test]
    fn test_partition_applies_drive_rules() {
        let rules = RuleSet::from_rules(&[
            UserRule {
                id: 1,
                kind: RuleKind::PreferMovie,
                drive_id: 3,
                priority: 1,
                created_at: String::new(),
            },
            UserRule {
                id: 2,
                kind: RuleKind::Deny,
                drive_id: 1,
                priority: 0,
                created_at: String::new(),
            },
        ]);
        let files = vec![copy(1, 1, true), copy(2, 2, false), copy(3, 3, false)];
        let (keep, delete) = partition(files, &rules, MediaKind::Movie, 2);
        let kept: Vec<i64> = keep.iter().map(|f| f.file_id).collect();
        assert_eq!(kept, vec![3, 2]);
        assert_eq!(delete[0].file_id, 1);
    }

    #[test]
    fn test_partition_never_keeps_more_than_exist() {
        let files = vec![copy(1, 1, true)];
        let (keep, delete) = partition(files, &RuleSet::default(), MediaKind::Movie, 3);
        assert_eq!(keep.len(), 1);
        assert!(delete.is_empty());
    }
}
