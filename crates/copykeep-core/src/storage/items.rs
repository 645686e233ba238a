use super::files::{location_from_row, LOCATION_COLUMNS, LOCATION_JOIN};
use super::models::*;
use super::sqlite::Database;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Result, Row};
use serde::Serialize;
use std::collections::BTreeMap;

const ITEM_COLUMNS: &str = "mi.id, mi.kind, mi.title, mi.year, mi.season, mi.episode, \
     mi.status, mi.created_at, \
     (SELECT COUNT(*) FROM media_item_file c WHERE c.media_item_id = mi.id) AS copy_count";

fn item_from_row(row: &Row) -> Result<MediaItem> {
    Ok(MediaItem {
        id: row.get(0)?,
        kind: row.get(1)?,
        title: row.get(2)?,
        year: row.get(3)?,
        season: row.get(4)?,
        episode: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        copy_count: row.get(8)?,
    })
}

/// Title identity used to create or look up an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemIdentity {
    pub kind: MediaKind,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
}

/// Partial update of an item's metadata; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub kind: Option<MediaKind>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub status: Option<ItemStatus>,
}

impl ItemUpdate {
    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.title.is_none()
            && self.year.is_none()
            && self.season.is_none()
            && self.episode.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub kind: Option<MediaKind>,
    pub status: Option<ItemStatus>,
    pub search: Option<String>,
    pub min_copies: Option<i64>,
    pub max_copies: Option<i64>,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemStats {
    pub total_items: i64,
    pub by_kind: BTreeMap<String, i64>,
    pub by_copy_count: BTreeMap<i64, i64>,
    pub needs_verification: i64,
}

impl Database {
    // ── Media Items ──────────────────────────────────────────────

    pub fn insert_item(&self, identity: &ItemIdentity, status: ItemStatus) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO media_item (kind, title, year, season, episode, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                identity.kind,
                identity.title,
                identity.year,
                identity.season,
                identity.episode,
                status,
                now_timestamp()
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn get_item(&self, item_id: i64) -> Result<Option<MediaItem>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM media_item mi WHERE mi.id = ?1", ITEM_COLUMNS),
                params![item_id],
                item_from_row,
            )
            .optional()
    }

    pub fn item_exists(&self, item_id: i64) -> Result<bool> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM media_item WHERE id = ?1",
            params![item_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Oldest item with exactly this identity (NULL-safe comparison).
    pub fn find_item_by_identity(&self, identity: &ItemIdentity) -> Result<Option<i64>> {
        self.connection()
            .query_row(
                "SELECT id FROM media_item \
                 WHERE kind = ?1 AND title IS ?2 AND year IS ?3 AND season IS ?4 AND episode IS ?5 \
                 ORDER BY id LIMIT 1",
                params![
                    identity.kind,
                    identity.title,
                    identity.year,
                    identity.season,
                    identity.episode
                ],
                |row| row.get(0),
            )
            .optional()
    }

    /// Item already holding a linked file with this strong hash.
    pub fn find_item_by_full_hash(&self, full_hash: &str) -> Result<Option<i64>> {
        self.connection()
            .query_row(
                "SELECT mif.media_item_id FROM media_item_file mif \
                 JOIN file_record f ON f.id = mif.file_id \
                 WHERE f.full_hash = ?1 ORDER BY mif.media_item_id LIMIT 1",
                params![full_hash],
                |row| row.get(0),
            )
            .optional()
    }

    /// Item already holding a linked file with this quick fingerprint.
    pub fn find_item_by_quick_sig(&self, quick_sig: &str) -> Result<Option<i64>> {
        self.connection()
            .query_row(
                "SELECT mif.media_item_id FROM media_item_file mif \
                 JOIN file_record f ON f.id = mif.file_id \
                 WHERE f.quick_sig = ?1 ORDER BY mif.media_item_id LIMIT 1",
                params![quick_sig],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn set_item_status(&self, item_id: i64, status: ItemStatus) -> Result<()> {
        self.connection().execute(
            "UPDATE media_item SET status = ?1 WHERE id = ?2",
            params![status, item_id],
        )?;
        Ok(())
    }

    /// Returns false when the item does not exist.
    pub fn update_item(&self, item_id: i64, update: &ItemUpdate) -> Result<bool> {
        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(kind) = update.kind {
            sets.push("kind = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(title) = &update.title {
            sets.push("title = ?");
            values.push(Value::Text(title.clone()));
        }
        if let Some(year) = update.year {
            sets.push("year = ?");
            values.push(Value::Integer(year as i64));
        }
        if let Some(season) = update.season {
            sets.push("season = ?");
            values.push(Value::Integer(season as i64));
        }
        if let Some(episode) = update.episode {
            sets.push("episode = ?");
            values.push(Value::Integer(episode as i64));
        }
        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if sets.is_empty() {
            return self.item_exists(item_id);
        }

        values.push(Value::Integer(item_id));
        let updated = self.connection().execute(
            &format!("UPDATE media_item SET {} WHERE id = ?", sets.join(", ")),
            params_from_iter(values.iter()),
        )?;
        Ok(updated > 0)
    }

    pub fn delete_item(&self, item_id: i64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM media_item WHERE id = ?1", params![item_id])?;
        Ok(deleted > 0)
    }

    // ── Membership ───────────────────────────────────────────────

    pub fn link_file(&self, item_id: i64, file_id: i64, is_primary: bool) -> Result<()> {
        self.connection().execute(
            "INSERT INTO media_item_file (media_item_id, file_id, is_primary) VALUES (?1, ?2, ?3)",
            params![item_id, file_id, is_primary],
        )?;
        Ok(())
    }

    pub fn item_id_for_file(&self, file_id: i64) -> Result<Option<i64>> {
        self.connection()
            .query_row(
                "SELECT media_item_id FROM media_item_file WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()
    }

    /// Re-point every link of `source_id` at `target_id`. Source files never become
    /// primary in the target. Returns the number of links moved.
    pub fn move_item_links(&self, source_id: i64, target_id: i64) -> Result<usize> {
        self.connection().execute(
            "UPDATE media_item_file SET media_item_id = ?1, is_primary = 0 \
             WHERE media_item_id = ?2",
            params![target_id, source_id],
        )
    }

    /// Move a single file's link into another item, making it that item's primary.
    pub fn relink_file(&self, file_id: i64, item_id: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE media_item_file SET media_item_id = ?1, is_primary = 1 WHERE file_id = ?2",
            params![item_id, file_id],
        )?;
        Ok(())
    }

    /// Promote the lowest-id remaining file when an item has lost its primary.
    /// Returns true if a file was promoted.
    pub fn ensure_primary(&self, item_id: i64) -> Result<bool> {
        let promoted = self.connection().execute(
            "UPDATE media_item_file SET is_primary = 1 \
             WHERE media_item_id = ?1 \
               AND file_id = (SELECT MIN(file_id) FROM media_item_file WHERE media_item_id = ?1) \
               AND NOT EXISTS (SELECT 1 FROM media_item_file \
                               WHERE media_item_id = ?1 AND is_primary = 1)",
            params![item_id],
        )?;
        Ok(promoted == 1)
    }

    pub fn unlinked_file_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.connection().prepare(
            "SELECT f.id FROM file_record f \
             LEFT JOIN media_item_file mif ON f.id = mif.file_id \
             WHERE mif.file_id IS NULL ORDER BY f.id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn item_files(&self, item_id: i64) -> Result<Vec<ItemFile>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {}, mif.is_primary FROM {} \
             JOIN media_item_file mif ON mif.file_id = f.id \
             WHERE mif.media_item_id = ?1 ORDER BY f.id",
            LOCATION_COLUMNS, LOCATION_JOIN
        ))?;
        let files = stmt
            .query_map(params![item_id], |row| {
                Ok(ItemFile {
                    location: location_from_row(row)?,
                    is_primary: row.get(16)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(files)
    }

    pub fn item_detail(&self, item_id: i64) -> Result<Option<MediaItemDetail>> {
        let Some(item) = self.get_item(item_id)? else {
            return Ok(None);
        };
        let files = self.item_files(item_id)?;
        Ok(Some(MediaItemDetail { item, files }))
    }

    // ── Listings ─────────────────────────────────────────────────

    /// Filtered, paginated listing ordered by title. Returns (page, total matching).
    pub fn list_items(&self, query: &ItemQuery) -> Result<(Vec<MediaItem>, i64)> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(kind) = query.kind {
            conditions.push("mi.kind = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(status) = query.status {
            conditions.push("mi.status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(search) = &query.search {
            conditions.push("mi.title LIKE ?");
            values.push(Value::Text(format!("%{}%", search)));
        }
        if let Some(min) = query.min_copies {
            conditions.push("copy_count >= ?");
            values.push(Value::Integer(min));
        }
        if let Some(max) = query.max_copies {
            conditions.push("copy_count <= ?");
            values.push(Value::Integer(max));
        }
        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };
        let base = format!(
            "SELECT * FROM (SELECT {} FROM media_item mi) mi WHERE {}",
            ITEM_COLUMNS, where_clause
        );

        let total: i64 = self.connection().query_row(
            &format!("SELECT COUNT(*) FROM ({})", base),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit = if query.limit > 0 { query.limit } else { 50 };
        values.push(Value::Integer(limit));
        values.push(Value::Integer(query.offset.max(0)));
        let mut stmt = self.connection().prepare(&format!(
            "{} ORDER BY mi.title, mi.season, mi.episode, mi.id LIMIT ? OFFSET ?",
            base
        ))?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), item_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok((items, total))
    }

    /// Every item whose copy count is at least `min_copies`, most copies first.
    pub fn items_with_min_copies(&self, min_copies: i64) -> Result<Vec<MediaItem>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT * FROM (SELECT {} FROM media_item mi) mi WHERE copy_count >= ?1 \
             ORDER BY copy_count DESC, mi.id",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![min_copies], item_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn item_stats(&self) -> Result<ItemStats> {
        let total_items: i64 =
            self.connection()
                .query_row("SELECT COUNT(*) FROM media_item", [], |row| row.get(0))?;
        let needs_verification: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM media_item WHERE status = 'needs_verification'",
            [],
            |row| row.get(0),
        )?;

        let mut by_kind = BTreeMap::new();
        let mut stmt = self
            .connection()
            .prepare("SELECT kind, COUNT(*) FROM media_item GROUP BY kind")?;
        for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))? {
            let (kind, count) = row?;
            by_kind.insert(kind, count);
        }

        let mut by_copy_count = BTreeMap::new();
        let mut stmt = self.connection().prepare(
            "SELECT copies, COUNT(*) FROM ( \
                 SELECT mi.id, COUNT(mif.file_id) AS copies FROM media_item mi \
                 LEFT JOIN media_item_file mif ON mi.id = mif.media_item_id GROUP BY mi.id \
             ) GROUP BY copies",
        )?;
        for row in stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get(1)?)))? {
            let (copies, count) = row?;
            by_copy_count.insert(copies, count);
        }

        Ok(ItemStats {
            total_items,
            by_kind,
            by_copy_count,
            needs_verification,
        })
    }
}
