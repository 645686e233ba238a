use super::models::*;
use super::sqlite::Database;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Result, Row};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

pub(crate) const FILE_COLUMNS: &str = "f.id, f.root_id, f.path, f.size, f.mtime, f.ext, \
     f.last_seen, f.last_seen_scan_id, f.missing, f.quick_sig, f.full_hash, f.hash_status, \
     f.quarantine_path";

/// Column list for [`location_from_row`]: file columns followed by root path, drive id, mount.
pub(crate) const LOCATION_COLUMNS: &str = "f.id, f.root_id, f.path, f.size, f.mtime, f.ext, \
     f.last_seen, f.last_seen_scan_id, f.missing, f.quick_sig, f.full_hash, f.hash_status, \
     f.quarantine_path, r.path, r.drive_id, d.mount_path";

pub(crate) const LOCATION_JOIN: &str =
    "file_record f JOIN root r ON f.root_id = r.id JOIN drive d ON r.drive_id = d.id";

pub(crate) fn file_from_row(row: &Row) -> Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        root_id: row.get(1)?,
        path: row.get(2)?,
        size: row.get(3)?,
        mtime: row.get(4)?,
        ext: row.get(5)?,
        last_seen: row.get(6)?,
        last_seen_scan_id: row.get(7)?,
        missing: row.get(8)?,
        quick_sig: row.get(9)?,
        full_hash: row.get(10)?,
        hash_status: row.get(11)?,
        quarantine_path: row.get(12)?,
    })
}

pub(crate) fn location_from_row(row: &Row) -> Result<FileLocation> {
    Ok(FileLocation {
        file: file_from_row(row)?,
        root_path: row.get(13)?,
        drive_id: row.get(14)?,
        mount_path: row.get(15)?,
    })
}

/// Filters for listing catalog entries.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub root_id: Option<i64>,
    pub ext: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub path_contains: Option<String>,
    pub missing: Option<bool>,
    pub hash_status: Option<HashStatus>,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtensionStat {
    pub ext: String,
    pub count: i64,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub total_files: i64,
    pub total_size: i64,
    pub missing_files: i64,
    pub pending_hashes: i64,
    pub by_extension: Vec<ExtensionStat>,
}

impl Database {
    // ── Scan Writes ──────────────────────────────────────────────

    /// Apply one scanned file to the catalog.
    ///
    /// New paths are inserted as `pending`; a size or mtime change refreshes the
    /// stat fields and resets the fingerprints; otherwise only `last_seen` moves.
    pub fn observe_file(&self, file: &ObservedFile, scan_run_id: i64) -> Result<Observation> {
        let now = now_timestamp();
        let existing: Option<(i64, i64, i64)> = self
            .connection()
            .query_row(
                "SELECT id, size, mtime FROM file_record WHERE root_id = ?1 AND path = ?2",
                params![file.root_id, file.path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match existing {
            None => {
                self.connection().execute(
                    "INSERT INTO file_record \
                     (root_id, path, size, mtime, ext, last_seen, last_seen_scan_id, hash_status) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending')",
                    params![
                        file.root_id,
                        file.path,
                        file.size,
                        file.mtime,
                        file.ext,
                        now,
                        scan_run_id
                    ],
                )?;
                Ok(Observation::New)
            }
            Some((id, size, mtime)) if size != file.size || mtime != file.mtime => {
                self.connection().execute(
                    "UPDATE file_record SET size = ?1, mtime = ?2, ext = ?3, last_seen = ?4, \
                     last_seen_scan_id = ?5, missing = 0, quick_sig = NULL, full_hash = NULL, \
                     hash_status = 'pending' WHERE id = ?6",
                    params![file.size, file.mtime, file.ext, now, scan_run_id, id],
                )?;
                Ok(Observation::Updated)
            }
            Some((id, _, _)) => {
                self.connection().execute(
                    "UPDATE file_record SET last_seen = ?1, last_seen_scan_id = ?2, missing = 0 \
                     WHERE id = ?3",
                    params![now, scan_run_id, id],
                )?;
                Ok(Observation::Unchanged)
            }
        }
    }

    /// Flag every record under `root_id` that the given run did not observe.
    /// Returns the number of records flagged.
    pub fn mark_unseen_missing(&self, root_id: i64, scan_run_id: i64) -> Result<usize> {
        let flagged = self.connection().execute(
            "UPDATE file_record SET missing = 1 \
             WHERE root_id = ?1 AND (last_seen_scan_id IS NULL OR last_seen_scan_id != ?2)",
            params![root_id, scan_run_id],
        )?;
        debug!("Flagged {} missing records under root {}", flagged, root_id);
        Ok(flagged)
    }

    /// Explicit prune policy: delete records flagged missing (quarantined ones are kept).
    pub fn prune_missing(&self, root_id: Option<i64>) -> Result<usize> {
        self.connection().execute(
            "DELETE FROM file_record WHERE missing = 1 AND quarantine_path IS NULL \
             AND (?1 IS NULL OR root_id = ?1)",
            params![root_id],
        )
    }

    /// Insert or refresh a record for a file written by the operations queue.
    pub fn upsert_file_record(
        &self,
        root_id: i64,
        path: &str,
        size: i64,
        mtime: i64,
        quick_sig: Option<&str>,
        full_hash: Option<&str>,
    ) -> Result<i64> {
        let status = if quick_sig.is_some() && full_hash.is_some() {
            HashStatus::Complete
        } else {
            HashStatus::Pending
        };
        let ext = extension_of(Path::new(path));
        self.connection().execute(
            "INSERT INTO file_record \
             (root_id, path, size, mtime, ext, last_seen, quick_sig, full_hash, hash_status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(root_id, path) DO UPDATE SET \
                 size = excluded.size, mtime = excluded.mtime, ext = excluded.ext, \
                 last_seen = excluded.last_seen, missing = 0, quick_sig = excluded.quick_sig, \
                 full_hash = excluded.full_hash, hash_status = excluded.hash_status",
            params![
                root_id,
                path,
                size,
                mtime,
                ext,
                now_timestamp(),
                quick_sig,
                full_hash,
                status
            ],
        )?;
        self.connection().query_row(
            "SELECT id FROM file_record WHERE root_id = ?1 AND path = ?2",
            params![root_id, path],
            |row| row.get(0),
        )
    }

    pub fn delete_file_record(&self, file_id: i64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM file_record WHERE id = ?1", params![file_id])?;
        Ok(deleted > 0)
    }

    // ── Hash Writes ──────────────────────────────────────────────

    pub fn pending_hash_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.connection().prepare(
            "SELECT id FROM file_record WHERE hash_status = 'pending' ORDER BY id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>>>()?;
        Ok(ids)
    }

    pub fn set_file_hashes(&self, file_id: i64, quick_sig: &str, full_hash: &str) -> Result<()> {
        self.connection().execute(
            "UPDATE file_record SET quick_sig = ?1, full_hash = ?2, hash_status = 'complete' \
             WHERE id = ?3",
            params![quick_sig, full_hash, file_id],
        )?;
        Ok(())
    }

    pub fn set_hash_status(&self, file_id: i64, status: HashStatus) -> Result<()> {
        self.connection().execute(
            "UPDATE file_record SET hash_status = ?1 WHERE id = ?2",
            params![status, file_id],
        )?;
        Ok(())
    }

    pub fn set_quarantine_path(&self, file_id: i64, quarantine_path: Option<&str>) -> Result<()> {
        self.connection().execute(
            "UPDATE file_record SET quarantine_path = ?1 WHERE id = ?2",
            params![quarantine_path, file_id],
        )?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn get_file(&self, file_id: i64) -> Result<Option<FileRecord>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM file_record f WHERE f.id = ?1", FILE_COLUMNS),
                params![file_id],
                file_from_row,
            )
            .optional()
    }

    pub fn get_file_location(&self, file_id: i64) -> Result<Option<FileLocation>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE f.id = ?1",
                    LOCATION_COLUMNS, LOCATION_JOIN
                ),
                params![file_id],
                location_from_row,
            )
            .optional()
    }

    /// Filtered, paginated listing. Returns (page, total matching).
    pub fn list_files(&self, query: &FileQuery) -> Result<(Vec<FileRecord>, i64)> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(root_id) = query.root_id {
            conditions.push("f.root_id = ?");
            values.push(Value::Integer(root_id));
        }
        if let Some(ext) = &query.ext {
            conditions.push("f.ext = ?");
            values.push(Value::Text(ext.trim_start_matches('.').to_lowercase()));
        }
        if let Some(min_size) = query.min_size {
            conditions.push("f.size >= ?");
            values.push(Value::Integer(min_size));
        }
        if let Some(max_size) = query.max_size {
            conditions.push("f.size <= ?");
            values.push(Value::Integer(max_size));
        }
        if let Some(fragment) = &query.path_contains {
            conditions.push("f.path LIKE ?");
            values.push(Value::Text(format!("%{}%", fragment)));
        }
        if let Some(missing) = query.missing {
            conditions.push("f.missing = ?");
            values.push(Value::Integer(missing as i64));
        }
        if let Some(status) = query.hash_status {
            conditions.push("f.hash_status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };

        let total: i64 = self.connection().query_row(
            &format!("SELECT COUNT(*) FROM file_record f WHERE {}", where_clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit = if query.limit > 0 { query.limit } else { 100 };
        values.push(Value::Integer(limit));
        values.push(Value::Integer(query.offset.max(0)));
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM file_record f WHERE {} ORDER BY f.path, f.id LIMIT ? OFFSET ?",
            FILE_COLUMNS, where_clause
        ))?;
        let files = stmt
            .query_map(params_from_iter(values.iter()), file_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok((files, total))
    }

    pub fn file_stats(&self) -> Result<FileStats> {
        let (total_files, total_size, missing_files, pending_hashes): (i64, i64, i64, i64) =
            self.connection().query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0), \
                        COALESCE(SUM(missing), 0), \
                        COALESCE(SUM(CASE WHEN hash_status = 'pending' THEN 1 ELSE 0 END), 0) \
                 FROM file_record",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let mut stmt = self.connection().prepare(
            "SELECT ext, COUNT(*), COALESCE(SUM(size), 0) FROM file_record \
             WHERE ext IS NOT NULL GROUP BY ext ORDER BY COUNT(*) DESC, ext LIMIT 20",
        )?;
        let by_extension = stmt
            .query_map([], |row| {
                Ok(ExtensionStat {
                    ext: row.get(0)?,
                    count: row.get(1)?,
                    size: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(FileStats {
            total_files,
            total_size,
            missing_files,
            pending_hashes,
            by_extension,
        })
    }

    /// Find the registered root on `drive_id` containing `path`, preferring the deepest.
    /// Returns the root and the path relative to it.
    pub fn locate_in_roots(&self, drive_id: i64, path: &Path) -> Result<Option<(Root, String)>> {
        let mut best: Option<(Root, String)> = None;
        for root in self.list_roots(Some(drive_id))? {
            let Some(relative) = relative_path_string(Path::new(&root.path), path) else {
                continue;
            };
            let deeper = best
                .as_ref()
                .map_or(true, |(current, _)| root.path.len() > current.path.len());
            if deeper {
                best = Some((root, relative));
            }
        }
        Ok(best)
    }
}
