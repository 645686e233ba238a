use super::parser::{is_video_file, parse_path};
use crate::error::{Error, Result};
use crate::storage::items::{ItemIdentity, ItemUpdate};
use crate::storage::models::{FileLocation, ItemStatus, MediaKind};
use crate::storage::Database;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub processed: usize,
    pub new_items: usize,
    pub linked: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub target_id: i64,
    pub files_moved: usize,
    pub items_merged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub old_item_id: i64,
    pub new_item_id: i64,
    pub file_id: i64,
}

/// How an unlinked record was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attachment {
    NewItem(i64),
    Linked(i64),
}

/// Group every unlinked video record into a media item.
pub fn process(db: &Database) -> Result<ProcessReport> {
    let mut report = ProcessReport::default();
    for file_id in db.unlinked_file_ids()? {
        let Some(location) = db.get_file_location(file_id)? else {
            continue;
        };
        if !is_video_file(&location.absolute_path()) {
            report.skipped += 1;
            continue;
        }
        match attach_file(db, &location)? {
            Attachment::NewItem(_) => report.new_items += 1,
            Attachment::Linked(_) => report.linked += 1,
        }
        report.processed += 1;
    }
    info!(
        "Matching processed {} files: {} new items, {} linked, {} skipped",
        report.processed, report.new_items, report.linked, report.skipped
    );
    Ok(report)
}

/// Link one record to an existing item (by strong hash, then quick fingerprint, then
/// parsed identity) or create a new item for it.
pub fn attach_file(db: &Database, location: &FileLocation) -> Result<Attachment> {
    let file = &location.file;
    let tx = db.connection().unchecked_transaction()?;

    if let Some(hash) = &file.full_hash {
        if let Some(item_id) = db.find_item_by_full_hash(hash)? {
            db.link_file(item_id, file.id, false)?;
            tx.commit()?;
            debug!("File {} joined item {} by content hash", file.id, item_id);
            return Ok(Attachment::Linked(item_id));
        }
    }

    if let Some(sig) = &file.quick_sig {
        if let Some(item_id) = db.find_item_by_quick_sig(sig)? {
            db.link_file(item_id, file.id, false)?;
            db.set_item_status(item_id, ItemStatus::NeedsVerification)?;
            tx.commit()?;
            debug!("File {} joined item {} by quick signature", file.id, item_id);
            return Ok(Attachment::Linked(item_id));
        }
    }

    let identity = parse_path(&location.absolute_path());
    if identity.kind != MediaKind::Unknown {
        if let Some(item_id) = db.find_item_by_identity(&identity)? {
            db.link_file(item_id, file.id, false)?;
            tx.commit()?;
            debug!("File {} joined item {} by title", file.id, item_id);
            return Ok(Attachment::Linked(item_id));
        }
    }

    let status = if identity.kind == MediaKind::Unknown {
        ItemStatus::NeedsVerification
    } else {
        ItemStatus::Auto
    };
    let item_id = db.insert_item(&identity, status)?;
    db.link_file(item_id, file.id, true)?;
    tx.commit()?;
    debug!("File {} started item {}", file.id, item_id);
    Ok(Attachment::NewItem(item_id))
}

/// Move every file of each source item into `target_id` and delete the sources.
pub fn merge_items(db: &Database, target_id: i64, source_ids: &[i64]) -> Result<MergeReport> {
    let tx = db.connection().unchecked_transaction()?;
    if !db.item_exists(target_id)? {
        return Err(Error::Conflict(format!(
            "merge target item {} does not exist",
            target_id
        )));
    }

    let mut files_moved = 0;
    let mut items_merged = 0;
    for &source_id in source_ids {
        if source_id == target_id {
            continue;
        }
        if !db.item_exists(source_id)? {
            return Err(Error::NotFound(format!("item {}", source_id)));
        }
        files_moved += db.move_item_links(source_id, target_id)?;
        db.delete_item(source_id)?;
        items_merged += 1;
    }
    db.set_item_status(target_id, ItemStatus::Verified)?;
    tx.commit()?;

    info!(
        "Merged {} items into {} ({} files moved)",
        items_merged, target_id, files_moved
    );
    Ok(MergeReport {
        target_id,
        files_moved,
        items_merged,
    })
}

/// Move one file out of its item into a new verified singleton item.
pub fn split_file(db: &Database, file_id: i64) -> Result<SplitReport> {
    let tx = db.connection().unchecked_transaction()?;
    let old_item_id = db
        .item_id_for_file(file_id)?
        .ok_or_else(|| Error::Conflict(format!("file {} is not linked to any item", file_id)))?;
    let copies = db
        .get_item(old_item_id)?
        .map(|item| item.copy_count)
        .unwrap_or(0);
    if copies <= 1 {
        return Err(Error::Conflict(format!(
            "file {} is the only copy in item {}",
            file_id, old_item_id
        )));
    }
    let location = db
        .get_file_location(file_id)?
        .ok_or_else(|| Error::NotFound(format!("file {}", file_id)))?;

    let identity: ItemIdentity = parse_path(&location.absolute_path());
    let new_item_id = db.insert_item(&identity, ItemStatus::Verified)?;
    db.relink_file(file_id, new_item_id)?;
    if db.ensure_primary(old_item_id)? {
        debug!("Item {} lost its primary file, promoted the next copy", old_item_id);
    }
    tx.commit()?;

    info!(
        "Split file {} from item {} into item {}",
        file_id, old_item_id, new_item_id
    );
    Ok(SplitReport {
        old_item_id,
        new_item_id,
        file_id,
    })
}

pub fn update_item(db: &Database, item_id: i64, update: &ItemUpdate) -> Result<()> {
    if update.is_empty() {
        return Err(Error::Validation("no fields to update".to_string()));
    }
    if !db.update_item(item_id, update)? {
        return Err(Error::NotFound(format!("item {}", item_id)));
    }
    Ok(())
}
