use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Text-backed enum stored as its snake_case name.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashStatus {
    Pending,
    Complete,
    Error,
}

text_enum!(HashStatus {
    Pending => "pending",
    Complete => "complete",
    Error => "error",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    TvEpisode,
    Unknown,
}

text_enum!(MediaKind {
    Movie => "movie",
    TvEpisode => "tv_episode",
    Unknown => "unknown",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Auto,
    Verified,
    NeedsVerification,
}

text_enum!(ItemStatus {
    Auto => "auto",
    Verified => "verified",
    NeedsVerification => "needs_verification",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Copy,
    Move,
    Delete,
}

text_enum!(OperationKind {
    Copy => "copy",
    Move => "move",
    Delete => "delete",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(OperationStatus {
    Pending => "pending",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

/// A pause or cancel request left on a running operation for the process whose
/// worker owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationControl {
    Pause,
    Cancel,
}

text_enum!(OperationControl {
    Pause => "pause",
    Cancel => "cancel",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Deny,
    PreferMovie,
    PreferTv,
    PreferAll,
}

text_enum!(RuleKind {
    Deny => "deny",
    PreferMovie => "prefer_movie",
    PreferTv => "prefer_tv",
    PreferAll => "prefer_all",
});

/// A registered mount point.
#[derive(Debug, Clone, Serialize)]
pub struct Drive {
    pub id: i64,
    pub mount_path: String,
    pub volume_serial: Option<String>,
    pub volume_label: Option<String>,
    pub created_at: String,
    /// Live values, filled in by listings; never persisted.
    pub free_space: Option<u64>,
    pub total_space: Option<u64>,
}

/// A folder on a drive that the scan engine walks unless excluded.
#[derive(Debug, Clone, Serialize)]
pub struct Root {
    pub id: i64,
    pub drive_id: i64,
    pub path: String,
    pub excluded: bool,
    pub created_at: String,
}

/// One scan pass over the active roots.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRun {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub state: String,
    pub drive_id: Option<i64>,
    pub throttle: String,
    pub root_ids: String,
    pub files_scanned: i64,
    pub files_new: i64,
    pub files_updated: i64,
    pub files_missing: i64,
    pub errors: i64,
}

/// A catalog entry, unique per (root, relative path).
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub id: i64,
    pub root_id: i64,
    /// Relative to the root, `/`-separated.
    pub path: String,
    pub size: i64,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
    pub ext: Option<String>,
    pub last_seen: String,
    pub last_seen_scan_id: Option<i64>,
    pub missing: bool,
    pub quick_sig: Option<String>,
    pub full_hash: Option<String>,
    pub hash_status: HashStatus,
    pub quarantine_path: Option<String>,
}

/// A file record joined with the root and drive it lives on.
#[derive(Debug, Clone, Serialize)]
pub struct FileLocation {
    pub file: FileRecord,
    pub root_path: String,
    pub drive_id: i64,
    pub mount_path: String,
}

impl FileLocation {
    pub fn absolute_path(&self) -> PathBuf {
        join_relative(Path::new(&self.root_path), &self.file.path)
    }
}

/// Resolve a `/`-separated relative path against a base directory.
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in relative.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// Express `path` relative to `base` as a `/`-separated string.
pub fn relative_path_string(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Lower-cased extension without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Input for inserting or refreshing a catalog entry from a scan.
#[derive(Debug, Clone)]
pub struct ObservedFile {
    pub root_id: i64,
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub ext: Option<String>,
}

/// Outcome of applying an [`ObservedFile`] to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    New,
    Updated,
    Unchanged,
}

/// A logical title identity grouping one or more copies.
#[derive(Debug, Clone, Serialize)]
pub struct MediaItem {
    pub id: i64,
    pub kind: MediaKind,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub status: ItemStatus,
    pub created_at: String,
    /// Number of linked file records, computed on read.
    pub copy_count: i64,
}

/// A linked copy of a media item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFile {
    pub location: FileLocation,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaItemDetail {
    pub item: MediaItem,
    pub files: Vec<ItemFile>,
}

/// Queued copy/move/delete unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: i64,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub source_file_id: Option<i64>,
    /// Absolute source path captured at enqueue time.
    pub source_path: String,
    pub dest_drive_id: Option<i64>,
    pub dest_path: Option<String>,
    pub progress: i64,
    pub total_size: i64,
    pub verify_hash: bool,
    pub error: Option<String>,
    /// Pending control request for the owning worker; cleared on every transition.
    pub control: Option<OperationControl>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub source_file_id: i64,
    pub source_path: String,
    pub dest_drive_id: Option<i64>,
    pub dest_path: Option<String>,
    pub total_size: i64,
    pub verify_hash: bool,
}

/// Destination-selection preference for a drive.
#[derive(Debug, Clone, Serialize)]
pub struct UserRule {
    pub id: i64,
    pub kind: RuleKind,
    pub drive_id: i64,
    pub priority: i64,
    pub created_at: String,
}

/// Sortable UTC timestamp used for every `*_at` column.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enums_round_trip_names() {
        assert_eq!("tv_episode".parse::<MediaKind>().unwrap(), MediaKind::TvEpisode);
        assert_eq!(ItemStatus::NeedsVerification.as_str(), "needs_verification");
        assert!("sideways".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
        assert!(!OperationStatus::Paused.is_terminal());
        assert!(!OperationStatus::Running.is_terminal());
    }

    #[test]
    fn test_join_relative() {
        let joined = join_relative(Path::new("/mnt/d1/media"), "movies/Heat (1995).mkv");
        assert_eq!(joined, Path::new("/mnt/d1/media/movies/Heat (1995).mkv"));
    }

    #[test]
    fn test_relative_path_string() {
        let rel = relative_path_string(
            Path::new("/mnt/d1/media"),
            Path::new("/mnt/d1/media/tv/Show/Season 1/e01.mkv"),
        );
        assert_eq!(rel.as_deref(), Some("tv/Show/Season 1/e01.mkv"));
        assert_eq!(relative_path_string(Path::new("/a"), Path::new("/b/c")), None);
        assert_eq!(relative_path_string(Path::new("/a"), Path::new("/a")), None);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("Movie.MKV")).as_deref(), Some("mkv"));
        assert_eq!(extension_of(Path::new("README")), None);
    }
}
