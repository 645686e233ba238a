#[cfg(target_os = "windows")]
pub mod windows;

use std::fs;
use std::io;
use std::path::Path;

/// Identity of the volume behind a mount path, where the platform exposes one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub serial: Option<String>,
    pub label: Option<String>,
}

#[cfg(target_os = "windows")]
pub fn volume_info(path: &Path) -> VolumeInfo {
    windows::volume_info(path)
}

#[cfg(not(target_os = "windows"))]
pub fn volume_info(_path: &Path) -> VolumeInfo {
    VolumeInfo::default()
}

/// Bytes available to the current user on the volume holding `path`.
pub fn free_space(path: &Path) -> io::Result<u64> {
    fs2::available_space(path)
}

pub fn total_space(path: &Path) -> io::Result<u64> {
    fs2::total_space(path)
}

/// Rename, falling back to copy-and-remove when the target is on another volume.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_move_file_creates_parents() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.mkv");
        let to = dir.path().join("nested/deeper/a.mkv");
        fs::write(&from, b"data").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"data");
    }

    #[test]
    fn test_free_space_of_tempdir() {
        let dir = tempdir().unwrap();
        assert!(free_space(dir.path()).unwrap() > 0);
        assert!(total_space(dir.path()).unwrap() >= free_space(dir.path()).unwrap());
    }
}
