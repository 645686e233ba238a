mod common;

use std::fs;
use tempfile::tempdir;

use common::*;
use copykeep_core::hasher;
use copykeep_core::queue::transfer::part_path;
use copykeep_core::storage::files::FileQuery;
use copykeep_core::storage::items::ItemQuery;
use copykeep_core::storage::models::{HashStatus, MediaKind, OperationStatus};
use copykeep_core::{Error, ErrorStatus, QueueState, ScanState, Throttle};

#[test]
fn test_scan_registers_new_files_and_is_idempotent() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    for i in 0..10 {
        write_file(&d1.media.join(format!("file_{:02}.mkv", i)), &patterned(512, i));
    }

    let first = scan(&service);
    assert_eq!(first.state, ScanState::Completed);
    assert_eq!(first.files_new, 10);
    assert_eq!(first.files_scanned, 10);
    assert_eq!(first.errors, 0);
    assert!(first.scan_run_id.is_some());

    let second = scan(&service);
    assert_eq!(second.files_new, 0);
    assert_eq!(second.files_updated, 0);
    assert_eq!(second.files_missing, 0);
    assert_eq!(second.files_scanned, 10);

    let runs = service.scan_runs(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.state == "completed"));
}

#[test]
fn test_rescan_flags_changed_and_missing_files() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    write_file(&d1.media.join("keep.mkv"), b"keep");
    write_file(&d1.media.join("grow.mkv"), b"small");
    write_file(&d1.media.join("gone.mkv"), b"gone");
    scan(&service);

    write_file(&d1.media.join("grow.mkv"), b"much larger content");
    fs::remove_file(d1.media.join("gone.mkv")).unwrap();
    let status = scan(&service);
    assert_eq!(status.files_updated, 1);
    assert_eq!(status.files_missing, 1);

    let missing = service
        .list_files(&FileQuery {
            missing: Some(true),
            ..FileQuery::default()
        })
        .unwrap();
    assert_eq!(missing.total, 1);
    assert!(missing.items[0].path.ends_with("gone.mkv"));

    assert_eq!(service.prune_missing(None).unwrap(), 1);
    assert_eq!(all_files(&service).len(), 2);
}

#[test]
fn test_scan_skips_ignored_and_quarantine_directories() {
    let tmp = tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.ignore_patterns.push("*/extras/*".to_string());
    let service = open_service(config);
    let d1 = add_library(&service, tmp.path(), "d1");
    write_file(&d1.media.join("movie.mkv"), b"m");
    write_file(&d1.media.join("extras/behind.mkv"), b"x");
    write_file(&d1.media.join(".quarantine/2024-01-01/old.mkv"), b"q");

    let status = scan(&service);
    assert_eq!(status.files_new, 1);
}

#[test]
fn test_second_scan_start_conflicts_while_running() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    for i in 0..30 {
        write_file(&d1.media.join(format!("f{}.mkv", i)), b"x");
    }

    service.start_scan(None, Throttle::Low).unwrap();
    let err = service.start_scan(None, Throttle::Fast).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::Conflict);

    service.control_scan(copykeep_core::ScanControl::Cancel).unwrap();
    assert!(wait_until(DEADLINE, || service.scan_status().state == ScanState::Cancelled));
}

#[test]
fn test_scan_pause_freezes_counters_and_resume_finishes_same_pass() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    for i in 0..20 {
        write_file(&d1.media.join(format!("slow_{:02}.mkv", i)), &patterned(256, i));
    }

    let started = service.start_scan(None, Throttle::Low).unwrap();
    assert_eq!(started.state, ScanState::Running);
    assert!(wait_until(DEADLINE, || service.scan_status().files_scanned >= 2));

    let paused = service.control_scan(copykeep_core::ScanControl::Pause).unwrap();
    assert_eq!(paused.state, ScanState::Paused);
    // Let the file in flight settle, then nothing may move.
    std::thread::sleep(std::time::Duration::from_millis(250));
    let frozen = service.scan_status();
    std::thread::sleep(std::time::Duration::from_millis(400));
    let still = service.scan_status();
    assert_eq!(still.state, ScanState::Paused);
    assert_eq!(still.files_scanned, frozen.files_scanned);
    assert_eq!(still.files_new, frozen.files_new);
    assert!(frozen.files_scanned < 20);

    let resumed = service.control_scan(copykeep_core::ScanControl::Resume).unwrap();
    assert_eq!(resumed.state, ScanState::Running);
    assert!(wait_until(DEADLINE, || service.scan_status().state == ScanState::Completed));

    let done = service.scan_status();
    assert_eq!(done.scan_run_id, started.scan_run_id);
    assert_eq!(done.files_scanned, 20);
    assert_eq!(done.files_new, 20);
    assert_eq!(done.files_updated, 0);
    let runs = service.scan_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].state, "completed");
}

#[test]
fn test_hash_stop_keeps_remaining_ids_queued() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    write_file(&d1.media.join("loop.mkv"), &patterned(64 * 1024, 3));
    scan(&service);
    let file_id = file_id_by_name(&service, "loop.mkv");

    let ids = vec![file_id; 2000];
    service.compute_hashes(Some(ids)).unwrap();
    service.stop_hashing().unwrap();
    assert!(wait_until(DEADLINE, || {
        service.hash_status().state == copykeep_core::HashState::Stopped
    }));
    service.wait_for_hashing();

    let status = service.hash_status();
    assert_eq!(status.state, copykeep_core::HashState::Stopped);
    assert_eq!(status.files_total, 2000);
    assert!(status.queue_size > 0);
    assert_eq!(status.files_processed + status.queue_size, status.files_total);
    assert!(status.finished_at.is_some());
    assert!(matches!(service.stop_hashing(), Err(Error::Conflict(_))));
}

#[test]
fn test_hash_run_drains_queue_and_completes_records() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    for i in 0..10 {
        write_file(&d1.media.join(format!("clip_{}.mp4", i)), &patterned(4096, i));
    }
    scan(&service);

    service.compute_hashes(None).unwrap();
    assert!(wait_until(DEADLINE, || {
        let status = service.hash_status();
        status.queue_size == 0 && status.state == copykeep_core::HashState::Complete
    }));
    let status = service.hash_status();
    assert_eq!(status.files_total, 10);
    assert_eq!(status.files_processed, 10);
    assert_eq!(status.files_failed, 0);

    let complete = service
        .list_files(&FileQuery {
            hash_status: Some(HashStatus::Complete),
            ..FileQuery::default()
        })
        .unwrap();
    assert_eq!(complete.total, 10);

    // Hashing again yields the same fingerprints.
    let file = &complete.items[0];
    let again = service.hash_file(file.id).unwrap();
    assert_eq!(again.quick_sig, file.quick_sig);
    assert_eq!(again.full_hash, file.full_hash);
}

#[test]
fn test_same_title_on_two_drives_becomes_one_item() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    let d2 = add_library(&service, tmp.path(), "d2");
    write_file(&d1.media.join("Movie (2020).mkv"), &patterned(2048, 1));
    write_file(&d2.media.join("Movie (2020).mkv"), &patterned(2048, 2));
    write_file(&d2.media.join("notes.txt"), b"not a video");
    scan(&service);

    let report = service.process_items().unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.new_items, 1);
    assert_eq!(report.linked, 1);
    assert_eq!(report.skipped, 1);

    let items = service.list_items(&ItemQuery::default()).unwrap();
    assert_eq!(items.total, 1);
    let item = &items.items[0];
    assert_eq!(item.copy_count, 2);
    assert_eq!(item.kind, MediaKind::Movie);
    assert_eq!(item.title.as_deref(), Some("Movie"));
    assert_eq!(item.year, Some(2020));
}

#[test]
fn test_batch_copy_completes_with_verified_destination() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    let d2 = add_library(&service, tmp.path(), "d2");
    let source = d1.media.join("Heat (1995).mkv");
    write_file(&source, &patterned(300_000, 7));
    scan(&service);
    hash_all(&service);
    service.process_items().unwrap();

    let item = service.list_items(&ItemQuery::default()).unwrap().items[0].clone();
    assert_eq!(item.copy_count, 1);

    let batch = service.enqueue_batch_copy(item.id, true).unwrap();
    assert!(batch.errors.is_empty());
    assert_eq!(batch.operations.len(), 1);
    let op = &batch.operations[0];
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.dest_drive_id, Some(d2.drive.id));

    service.start_queue().unwrap();
    assert!(wait_until(DEADLINE, || {
        service.get_operation(op.id).unwrap().status == OperationStatus::Completed
    }));

    let done = service.get_operation(op.id).unwrap();
    assert_eq!(done.progress, 300_000);
    let dest = d2.media.join("Heat (1995).mkv");
    assert!(dest.exists());
    assert!(!part_path(&dest).exists());

    let source_hash = service.get_file(op.source_file_id.unwrap()).unwrap().file.full_hash;
    assert_eq!(source_hash, Some(hasher::full_hash(&dest).unwrap()));

    // The new copy is catalogued and linked to the same item.
    let detail = service.get_item(item.id).unwrap();
    assert_eq!(detail.item.copy_count, 2);
    let copy = detail
        .files
        .iter()
        .find(|f| f.location.drive_id == d2.drive.id)
        .unwrap();
    assert_eq!(copy.location.file.full_hash, source_hash);
    assert_eq!(copy.location.file.hash_status, HashStatus::Complete);

    service.shutdown_queue();
    assert_eq!(service.queue_status().unwrap().state, QueueState::Stopped);
}

#[test]
fn test_cancelling_running_copy_removes_partial_file() {
    let tmp = tempdir().unwrap();
    let service = open_service(slow_config(tmp.path(), 10));
    let d1 = add_library(&service, tmp.path(), "d1");
    let d2 = add_library(&service, tmp.path(), "d2");
    write_file(&d1.media.join("Long (2001).mkv"), &patterned(400_000, 3));
    scan(&service);
    let file_id = file_id_by_name(&service, "Long (2001).mkv");

    let mut request = copykeep_core::CopyRequest::new(file_id);
    request.dest_drive_id = Some(d2.drive.id);
    let op = service.enqueue_copy(&request).unwrap();
    service.start_queue().unwrap();

    assert!(wait_until(DEADLINE, || {
        let current = service.get_operation(op.id).unwrap();
        current.status == OperationStatus::Running && current.progress > 0
    }));
    service.cancel_operation(op.id).unwrap();
    assert!(wait_until(DEADLINE, || {
        service.get_operation(op.id).unwrap().status == OperationStatus::Cancelled
    }));
    assert!(wait_until(DEADLINE, || service.queue_status().unwrap().active_count == 0));

    let dest = d2.media.join("Long (2001).mkv");
    assert!(!dest.exists());
    assert!(!part_path(&dest).exists());
    assert!(d1.media.join("Long (2001).mkv").exists());

    let err = service.cancel_operation(op.id).unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    service.shutdown_queue();
}

#[test]
fn test_read_only_mode_rejects_every_mutation() {
    let tmp = tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.write_mode = false;
    let service = open_service(config);
    assert_eq!(service.mode(), "read-only");

    let mount = tmp.path().join("d1");
    fs::create_dir_all(&mount).unwrap();
    let err = service.register_drive(mount.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, Error::ReadOnly));
    assert_eq!(err.status(), ErrorStatus::Forbidden);
    assert_eq!(err.status().code(), 403);

    assert!(matches!(service.start_scan(None, Throttle::Fast), Err(Error::ReadOnly)));
    assert!(matches!(service.compute_hashes(None), Err(Error::ReadOnly)));
    assert!(matches!(service.process_items(), Err(Error::ReadOnly)));
    assert!(matches!(service.merge_items(1, &[2]), Err(Error::ReadOnly)));
    assert!(matches!(service.start_queue(), Err(Error::ReadOnly)));
    assert!(matches!(service.enqueue_batch_copy(1, true), Err(Error::ReadOnly)));
    assert!(matches!(service.cancel_operation(1), Err(Error::ReadOnly)));
    assert!(matches!(service.set_setting("k", "v"), Err(Error::ReadOnly)));
    assert!(matches!(service.truncate_catalog(), Err(Error::ReadOnly)));

    // Reads still work.
    assert!(service.list_drives().unwrap().is_empty());
    assert_eq!(service.queue_status().unwrap().state, QueueState::Stopped);
    assert!(service.cleanup_recommendations(2).unwrap().recommendations.is_empty());
}

#[test]
fn test_registry_validation() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");

    let dup = service.register_drive(d1.mount.to_str().unwrap()).unwrap_err();
    assert!(matches!(dup, Error::Conflict(_)));

    let absent = tmp.path().join("nowhere");
    let err = service.register_drive(absent.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let outside = tmp.path().join("elsewhere");
    fs::create_dir_all(&outside).unwrap();
    let err = service
        .create_root(d1.drive.id, outside.to_str().unwrap(), false)
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = service
        .create_root(d1.drive.id, d1.media.to_str().unwrap(), false)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let drives = service.list_drives().unwrap();
    assert_eq!(drives.len(), 1);
    assert!(drives[0].free_space.is_some());

    service.delete_drive(d1.drive.id).unwrap();
    assert!(service.list_roots(None).unwrap().is_empty());
}

#[test]
fn test_truncate_catalog_empties_every_table() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    write_file(&d1.media.join("Heat (1995).mkv"), b"heat");
    scan(&service);
    service.process_items().unwrap();
    service.set_setting("theme", "dark").unwrap();

    service.truncate_catalog().unwrap();
    assert!(service.list_drives().unwrap().is_empty());
    assert!(all_files(&service).is_empty());
    assert_eq!(service.item_stats().unwrap().total_items, 0);
    assert_eq!(service.get_setting("theme").unwrap(), None);
}
