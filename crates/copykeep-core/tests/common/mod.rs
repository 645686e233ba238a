#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use copykeep_core::config::{AppConfig, QueueConfig};
use copykeep_core::storage::files::FileQuery;
use copykeep_core::storage::models::{Drive, FileRecord, Root};
use copykeep_core::{HashState, ScanState, ScanStatus, Service, Throttle};

pub const DEADLINE: Duration = Duration::from_secs(20);

pub fn test_config(dir: &Path) -> AppConfig {
    AppConfig {
        database_path: dir.join("catalog.db").to_string_lossy().into_owned(),
        write_mode: true,
        min_free_buffer_bytes: 0,
        queue: QueueConfig {
            progress_interval_ms: 0,
            poll_interval_ms: 10,
            ..QueueConfig::default()
        },
        ..AppConfig::default()
    }
}

/// Transfers slow enough to be caught mid-flight: 4 KiB chunks with a pause after each.
pub fn slow_config(dir: &Path, chunk_delay_ms: u64) -> AppConfig {
    let mut config = test_config(dir);
    config.queue.chunk_size = 4096;
    config.queue.chunk_delay_ms = chunk_delay_ms;
    config
}

pub fn open_service(config: AppConfig) -> Service {
    Service::open(config).unwrap()
}

pub struct Library {
    pub drive: Drive,
    pub root: Root,
    pub mount: PathBuf,
    pub media: PathBuf,
}

/// A registered drive at `{base}/{name}` with one root at `{mount}/media`.
pub fn add_library(service: &Service, base: &Path, name: &str) -> Library {
    let mount = base.join(name);
    let media = mount.join("media");
    fs::create_dir_all(&media).unwrap();
    let drive = service.register_drive(mount.to_str().unwrap()).unwrap();
    let root = service
        .create_root(drive.id, media.to_str().unwrap(), false)
        .unwrap();
    Library {
        drive,
        root,
        mount,
        media,
    }
}

pub fn write_file(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, data).unwrap();
}

/// Deterministic content that differs per seed.
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i % 251) as u8).wrapping_mul(seed | 1).wrapping_add(seed))
        .collect()
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn scan(service: &Service) -> ScanStatus {
    service.start_scan(None, Throttle::Fast).unwrap();
    assert!(wait_until(DEADLINE, || service.scan_status().state == ScanState::Completed));
    service.scan_status()
}

pub fn hash_all(service: &Service) {
    service.compute_hashes(None).unwrap();
    assert!(wait_until(DEADLINE, || service.hash_status().state == HashState::Complete));
}

pub fn all_files(service: &Service) -> Vec<FileRecord> {
    service
        .list_files(&FileQuery {
            limit: 1000,
            ..FileQuery::default()
        })
        .unwrap()
        .items
}

pub fn file_id_by_name(service: &Service, name: &str) -> i64 {
    all_files(service)
        .into_iter()
        .find(|f| f.path.ends_with(name))
        .map(|f| f.id)
        .unwrap()
}
