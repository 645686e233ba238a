use crate::config::QueueConfig;
use crate::control::ControlToken;
use crate::error::Result;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const PART_SUFFIX: &str = ".part";

/// Temporary file a transfer writes into before the final rename.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub chunk_size: usize,
    pub progress_interval: Duration,
    pub chunk_delay: Duration,
}

impl From<&QueueConfig> for TransferOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(4096),
            progress_interval: config.progress_interval(),
            chunk_delay: config.chunk_delay(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every source byte is in the part file; the value is its length.
    Finished(u64),
    /// Stopped at a chunk boundary; the part file holds this many bytes.
    Paused(u64),
    Cancelled,
}

/// Copy `source` into `part` starting at `offset`, in chunks.
///
/// The part file is truncated to `offset` first so it never holds bytes beyond the
/// resume point. `on_progress` receives the running byte count at most once per
/// progress interval. Pause and cancel are observed between chunks.
pub fn copy_resumable<P>(
    source: &Path,
    part: &Path,
    offset: u64,
    options: &TransferOptions,
    control: &ControlToken,
    mut on_progress: P,
) -> Result<TransferOutcome>
where
    P: FnMut(u64) -> Result<()>,
{
    let mut src = File::open(source)?;
    src.seek(SeekFrom::Start(offset))?;

    let mut dst = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(part)?;
    dst.set_len(offset)?;
    dst.seek(SeekFrom::Start(offset))?;

    let mut copied = offset;
    let mut buffer = vec![0u8; options.chunk_size];
    let mut last_report = Instant::now();

    loop {
        if control.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }
        if control.is_paused() {
            dst.flush()?;
            dst.sync_all()?;
            return Ok(TransferOutcome::Paused(copied));
        }

        let n = src.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        dst.write_all(&buffer[..n])?;
        copied += n as u64;

        if last_report.elapsed() >= options.progress_interval {
            on_progress(copied)?;
            last_report = Instant::now();
        }
        if !options.chunk_delay.is_zero() {
            thread::sleep(options.chunk_delay);
        }
    }

    dst.flush()?;
    dst.sync_all()?;
    Ok(TransferOutcome::Finished(copied))
}

/// Best-effort removal of a partial destination.
pub fn discard_part(part: &Path) {
    if part.exists() {
        if let Err(e) = fs::remove_file(part) {
            tracing::warn!("Could not remove partial file {}: {}", part.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(chunk: usize) -> TransferOptions {
        TransferOptions {
            chunk_size: chunk,
            progress_interval: Duration::ZERO,
            chunk_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/mnt/d2/Heat (1995).mkv")),
            Path::new("/mnt/d2/Heat (1995).mkv.part")
        );
    }

    #[test]
    fn test_copy_from_offset_completes_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let part = dir.path().join("dst.bin.part");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &data).unwrap();
        // A stale tail past the resume point must be discarded.
        let mut stale = data[..8192].to_vec();
        stale.extend_from_slice(&[0xFF; 100]);
        fs::write(&part, &stale).unwrap();

        let mut reports = Vec::new();
        let outcome = copy_resumable(
            &source,
            &part,
            8192,
            &options(4096),
            &ControlToken::new(),
            |n| {
                reports.push(n);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(outcome, TransferOutcome::Finished(data.len() as u64));
        assert_eq!(fs::read(&part).unwrap(), data);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert!(reports[0] > 8192);
    }

    #[test]
    fn test_pause_and_cancel_stop_before_copying() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let part = dir.path().join("dst.bin.part");
        fs::write(&source, vec![1u8; 10_000]).unwrap();

        let token = ControlToken::new();
        token.pause();
        let paused = copy_resumable(&source, &part, 0, &options(1024), &token, |_| Ok(())).unwrap();
        assert_eq!(paused, TransferOutcome::Paused(0));
        assert!(part.exists());

        token.cancel();
        let cancelled = copy_resumable(&source, &part, 0, &options(1024), &token, |_| Ok(())).unwrap();
        assert_eq!(cancelled, TransferOutcome::Cancelled);
        discard_part(&part);
        assert!(!part.exists());
    }
}
