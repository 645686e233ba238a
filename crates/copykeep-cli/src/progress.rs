use copykeep_core::{HashRunStatus, HashState, QueueStatus, ScanStatus, Service};
use indicatif::{ProgressBar, ProgressStyle};
use std::thread;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(100);
const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_chars(TICK_CHARS));
    }
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn bar(len: u64, template: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("━╸─"));
    }
    pb
}

/// Follow a scan pass until it leaves the running/paused states.
///
/// The engine lives in this process, so returning early would abandon it.
pub fn watch_scan(service: &Service) -> ScanStatus {
    let pb = spinner();
    loop {
        let status = service.scan_status();
        if !status.state.is_active() {
            pb.finish_and_clear();
            return status;
        }
        pb.set_message(format!(
            "Scanning {}... {} files ({} new, {} updated)",
            status.current_root.as_deref().unwrap_or(""),
            status.files_scanned,
            status.files_new,
            status.files_updated,
        ));
        thread::sleep(POLL);
    }
}

pub fn watch_hashing(service: &Service) -> HashRunStatus {
    let initial = service.hash_status();
    let pb = bar(
        initial.files_total as u64,
        "  Hashing [{bar:40.cyan/dim}] {pos}/{len} files ({eta} remaining) {msg}",
    );
    loop {
        let status = service.hash_status();
        pb.set_length(status.files_total as u64);
        pb.set_position(status.files_processed as u64);
        if let Some(current) = &status.current_file {
            pb.set_message(current.clone());
        }
        if status.state != HashState::Running {
            pb.finish_and_clear();
            return status;
        }
        thread::sleep(POLL);
    }
}

/// Follow the queue until nothing is pending or in flight.
pub fn watch_queue(service: &Service) -> copykeep_core::Result<QueueStatus> {
    let initial = service.queue_status()?;
    let settled = |s: &QueueStatus| s.counts.completed + s.counts.failed + s.counts.cancelled;
    let baseline = settled(&initial);
    let pb = bar(
        (initial.counts.pending + initial.counts.running) as u64,
        "  Queue   [{bar:40.green/dim}] {pos}/{len} operations {msg}",
    );
    loop {
        let status = service.queue_status()?;
        pb.set_position((settled(&status) - baseline).max(0) as u64);
        pb.set_message(format!(
            "{} active, {} failed",
            status.active_count, status.counts.failed
        ));
        if status.counts.pending == 0 && status.active_count == 0 {
            pb.finish_and_clear();
            return Ok(status);
        }
        thread::sleep(POLL);
    }
}
