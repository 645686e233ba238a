use crate::error::Result;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_SUFFIX: &str = ".queue.lock";

/// Exclusive claim on a catalog's operations queue.
///
/// Only the holder runs transfer workers, so only the holder may treat `running`
/// rows as abandoned. Other processes leave control requests on the row instead.
/// The OS releases the lock when the guard drops or the process dies.
#[derive(Debug)]
pub struct QueueOwner {
    _file: File,
    path: PathBuf,
}

/// `{catalog}.queue.lock`, next to the catalog file.
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name: OsString = db_path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

impl QueueOwner {
    /// Take ownership without blocking. `Ok(None)` when another holder has it,
    /// whether in this process or another.
    pub fn try_acquire(db_path: &Path) -> Result<Option<Self>> {
        let path = lock_path_for(db_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("Acquired queue ownership at {}", path.display());
                Ok(Some(Self { _file: file, path }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lock_path_sits_next_to_catalog() {
        assert_eq!(
            lock_path_for(Path::new("/data/catalog.db")),
            Path::new("/data/catalog.db.queue.lock")
        );
    }

    #[test]
    fn test_second_owner_is_refused_until_release() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("catalog.db");

        let first = QueueOwner::try_acquire(&db_path).unwrap().unwrap();
        assert!(first.path().exists());
        assert!(QueueOwner::try_acquire(&db_path).unwrap().is_none());

        drop(first);
        assert!(QueueOwner::try_acquire(&db_path).unwrap().is_some());
    }
}
