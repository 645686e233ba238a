mod common;

use std::fs;
use tempfile::tempdir;

use common::*;
use copykeep_core::analysis::DriveStanding;
use copykeep_core::storage::items::ItemQuery;
use copykeep_core::storage::models::RuleKind;
use copykeep_core::Error;

#[test]
fn test_cleanup_recommends_surplus_copies_by_rule_and_primary() {
    let tmp = tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.cleanup.keep_copies = 1;
    let service = open_service(config);
    let d1 = add_library(&service, tmp.path(), "d1");
    let d2 = add_library(&service, tmp.path(), "d2");
    let d3 = add_library(&service, tmp.path(), "d3");
    for (lib, seed) in [(&d1, 1u8), (&d2, 2), (&d3, 3)] {
        write_file(&lib.media.join("Heat (1995).mkv"), &patterned(1000 + seed as usize, seed));
    }
    write_file(&d1.media.join("Alien (1979).mkv"), &patterned(500, 9));
    scan(&service);
    service.process_items().unwrap();

    // Without rules the primary (first catalogued) copy is kept.
    let report = service.cleanup_recommendations(2).unwrap();
    assert_eq!(report.total_items, 1);
    let heat = &report.recommendations[0];
    assert_eq!(heat.copy_count, 3);
    assert_eq!(heat.keep.len(), 1);
    assert_eq!(heat.keep[0].drive_id, d1.drive.id);
    assert!(heat.keep[0].is_primary);
    assert_eq!(heat.delete.len(), 2);
    assert_eq!(heat.reclaimable_bytes, 1002 + 1003);
    assert_eq!(report.total_files_to_delete, 2);
    assert_eq!(report.total_reclaimable_bytes, 2005);

    // A movie preference for d3 outranks the primary flag.
    service.add_rule(RuleKind::PreferMovie, d3.drive.id, 5).unwrap();
    let report = service.cleanup_recommendations(2).unwrap();
    assert_eq!(report.recommendations[0].keep[0].drive_id, d3.drive.id);

    // Advice never touches the catalog or the disk.
    assert_eq!(all_files(&service).len(), 4);
    assert!(d2.media.join("Heat (1995).mkv").exists());

    // Items below the threshold produce nothing.
    assert!(service.cleanup_recommendations(4).unwrap().recommendations.is_empty());
}

#[test]
fn test_destinations_follow_rules() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    let d2 = add_library(&service, tmp.path(), "d2");
    let d3 = add_library(&service, tmp.path(), "d3");
    let d4 = add_library(&service, tmp.path(), "d4");
    write_file(&d1.media.join("Heat (1995).mkv"), b"heat");
    scan(&service);
    service.process_items().unwrap();
    let file_id = file_id_by_name(&service, "Heat (1995).mkv");

    service.add_rule(RuleKind::Deny, d2.drive.id, 0).unwrap();
    service.add_rule(RuleKind::PreferTv, d3.drive.id, 9).unwrap();
    service.add_rule(RuleKind::PreferAll, d4.drive.id, 1).unwrap();

    let ranked = service.destinations(file_id).unwrap();
    let ids: Vec<i64> = ranked.iter().map(|c| c.drive.id).collect();
    assert_eq!(ids, vec![d4.drive.id, d3.drive.id]);
    assert_eq!(ranked[0].standing, DriveStanding::Preferred(0));
    assert_eq!(ranked[1].standing, DriveStanding::Neutral);

    let rules = service.list_rules().unwrap();
    assert_eq!(rules.len(), 3);
    service.delete_rule(rules[0].id).unwrap();
    assert!(matches!(service.delete_rule(rules[0].id), Err(Error::NotFound(_))));
    assert!(matches!(
        service.add_rule(RuleKind::Deny, 9999, 0),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_quarantine_and_restore_round_trip() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    let original = d1.media.join("movies/Heat (1995).mkv");
    write_file(&original, b"heat");
    scan(&service);
    let file_id = file_id_by_name(&service, "Heat (1995).mkv");

    let report = service.quarantine_files(&[file_id, 9999], None).unwrap();
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].file_id, 9999);

    let moved = &report.files[0];
    assert!(!original.exists());
    let quarantined = std::path::PathBuf::from(&moved.quarantine_path);
    assert!(quarantined.exists());
    assert!(quarantined.starts_with(d1.mount.join(".quarantine")));
    assert!(quarantined.ends_with("media/movies/Heat (1995).mkv"));
    assert_eq!(
        service.get_file(file_id).unwrap().file.quarantine_path.as_deref(),
        Some(moved.quarantine_path.as_str())
    );

    // A rescan neither walks the quarantine folder nor prunes the quarantined record.
    let status = scan(&service);
    assert_eq!(status.files_new, 0);
    assert_eq!(service.prune_missing(None).unwrap(), 0);

    let again = service.quarantine_files(&[file_id], None).unwrap();
    assert_eq!(again.errors.len(), 1);

    let restored = service.restore_files(&[file_id]).unwrap();
    assert_eq!(restored.files.len(), 1);
    assert!(original.exists());
    assert!(!quarantined.exists());
    assert_eq!(fs::read(&original).unwrap(), b"heat");
    assert!(service.get_file(file_id).unwrap().file.quarantine_path.is_none());

    assert!(matches!(service.quarantine_files(&[], None), Err(Error::Validation(_))));
}

#[test]
fn test_item_listing_filters_by_copies() {
    let tmp = tempdir().unwrap();
    let service = open_service(test_config(tmp.path()));
    let d1 = add_library(&service, tmp.path(), "d1");
    let d2 = add_library(&service, tmp.path(), "d2");
    write_file(&d1.media.join("Heat (1995).mkv"), b"1");
    write_file(&d2.media.join("Heat (1995).mkv"), b"2");
    write_file(&d1.media.join("Alien (1979).mkv"), b"3");
    scan(&service);
    service.process_items().unwrap();

    let pairs = service
        .list_items(&ItemQuery {
            min_copies: Some(2),
            ..ItemQuery::default()
        })
        .unwrap();
    assert_eq!(pairs.total, 1);
    assert_eq!(pairs.items[0].title.as_deref(), Some("Heat"));

    let singles = service
        .list_items(&ItemQuery {
            max_copies: Some(1),
            search: Some("ali".to_string()),
            ..ItemQuery::default()
        })
        .unwrap();
    assert_eq!(singles.total, 1);

    let stats = service.item_stats().unwrap();
    assert_eq!(stats.total_items, 2);
    assert_eq!(stats.by_copy_count.get(&2), Some(&1));
    assert_eq!(stats.by_copy_count.get(&1), Some(&1));
}
