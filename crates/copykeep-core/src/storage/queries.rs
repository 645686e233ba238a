use super::models::*;
use super::sqlite::Database;
use rusqlite::{params, OptionalExtension, Result, Row};
use tracing::debug;

const DRIVE_COLUMNS: &str = "id, mount_path, volume_serial, volume_label, created_at";
const ROOT_COLUMNS: &str = "id, drive_id, path, excluded, created_at";
const SCAN_RUN_COLUMNS: &str = "id, started_at, completed_at, state, drive_id, throttle, \
     root_ids, files_scanned, files_new, files_updated, files_missing, errors";

fn drive_from_row(row: &Row) -> Result<Drive> {
    Ok(Drive {
        id: row.get(0)?,
        mount_path: row.get(1)?,
        volume_serial: row.get(2)?,
        volume_label: row.get(3)?,
        created_at: row.get(4)?,
        free_space: None,
        total_space: None,
    })
}

fn root_from_row(row: &Row) -> Result<Root> {
    Ok(Root {
        id: row.get(0)?,
        drive_id: row.get(1)?,
        path: row.get(2)?,
        excluded: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn scan_run_from_row(row: &Row) -> Result<ScanRun> {
    Ok(ScanRun {
        id: row.get(0)?,
        started_at: row.get(1)?,
        completed_at: row.get(2)?,
        state: row.get(3)?,
        drive_id: row.get(4)?,
        throttle: row.get(5)?,
        root_ids: row.get(6)?,
        files_scanned: row.get(7)?,
        files_new: row.get(8)?,
        files_updated: row.get(9)?,
        files_missing: row.get(10)?,
        errors: row.get(11)?,
    })
}

/// Counters persisted on a scan run as it progresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanRunCounters {
    pub files_scanned: i64,
    pub files_new: i64,
    pub files_updated: i64,
    pub files_missing: i64,
    pub errors: i64,
}

impl Database {
    // ── Drives ───────────────────────────────────────────────────

    pub fn insert_drive(
        &self,
        mount_path: &str,
        volume_serial: Option<&str>,
        volume_label: Option<&str>,
    ) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO drive (mount_path, volume_serial, volume_label, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![mount_path, volume_serial, volume_label, now_timestamp()],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Registered drive {} at {}", id, mount_path);
        Ok(id)
    }

    pub fn get_drive(&self, drive_id: i64) -> Result<Option<Drive>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM drive WHERE id = ?1", DRIVE_COLUMNS),
                params![drive_id],
                drive_from_row,
            )
            .optional()
    }

    pub fn find_drive_by_mount(&self, mount_path: &str) -> Result<Option<Drive>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM drive WHERE mount_path = ?1", DRIVE_COLUMNS),
                params![mount_path],
                drive_from_row,
            )
            .optional()
    }

    pub fn list_drives(&self) -> Result<Vec<Drive>> {
        let mut stmt = self
            .connection()
            .prepare(&format!("SELECT {} FROM drive ORDER BY id", DRIVE_COLUMNS))?;
        let drives = stmt
            .query_map([], drive_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(drives)
    }

    /// Delete a drive; its roots, their file records and item links cascade.
    pub fn delete_drive(&self, drive_id: i64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM drive WHERE id = ?1", params![drive_id])?;
        Ok(deleted > 0)
    }

    // ── Roots ────────────────────────────────────────────────────

    pub fn insert_root(&self, drive_id: i64, path: &str, excluded: bool) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO root (drive_id, path, excluded, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![drive_id, path, excluded, now_timestamp()],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn get_root(&self, root_id: i64) -> Result<Option<Root>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM root WHERE id = ?1", ROOT_COLUMNS),
                params![root_id],
                root_from_row,
            )
            .optional()
    }

    pub fn find_root(&self, drive_id: i64, path: &str) -> Result<Option<Root>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM root WHERE drive_id = ?1 AND path = ?2",
                    ROOT_COLUMNS
                ),
                params![drive_id, path],
                root_from_row,
            )
            .optional()
    }

    pub fn list_roots(&self, drive_id: Option<i64>) -> Result<Vec<Root>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM root WHERE (?1 IS NULL OR drive_id = ?1) ORDER BY id",
            ROOT_COLUMNS
        ))?;
        let roots = stmt
            .query_map(params![drive_id], root_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(roots)
    }

    /// Roots the scan engine should walk, optionally limited to one drive.
    pub fn list_active_roots(&self, drive_id: Option<i64>) -> Result<Vec<Root>> {
        Ok(self
            .list_roots(drive_id)?
            .into_iter()
            .filter(|root| !root.excluded)
            .collect())
    }

    pub fn set_root_excluded(&self, root_id: i64, excluded: bool) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE root SET excluded = ?1 WHERE id = ?2",
            params![excluded, root_id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_root(&self, root_id: i64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM root WHERE id = ?1", params![root_id])?;
        Ok(deleted > 0)
    }

    // ── Scan Runs ────────────────────────────────────────────────

    pub fn create_scan_run(
        &self,
        drive_id: Option<i64>,
        throttle: &str,
        root_ids: &[i64],
    ) -> Result<i64> {
        let mut sorted = root_ids.to_vec();
        sorted.sort();
        let ids_json = serde_json::to_string(&sorted).unwrap_or_default();
        self.connection().execute(
            "INSERT INTO scan_run (started_at, state, drive_id, throttle, root_ids) \
             VALUES (?1, 'running', ?2, ?3, ?4)",
            params![now_timestamp(), drive_id, throttle, ids_json],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn update_scan_run(&self, run_id: i64, counters: &ScanRunCounters) -> Result<()> {
        self.connection().execute(
            "UPDATE scan_run SET files_scanned = ?1, files_new = ?2, files_updated = ?3, \
             files_missing = ?4, errors = ?5 WHERE id = ?6",
            params![
                counters.files_scanned,
                counters.files_new,
                counters.files_updated,
                counters.files_missing,
                counters.errors,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn finish_scan_run(
        &self,
        run_id: i64,
        state: &str,
        counters: &ScanRunCounters,
    ) -> Result<()> {
        self.update_scan_run(run_id, counters)?;
        self.connection().execute(
            "UPDATE scan_run SET completed_at = ?1, state = ?2 WHERE id = ?3",
            params![now_timestamp(), state, run_id],
        )?;
        Ok(())
    }

    pub fn get_scan_run(&self, run_id: i64) -> Result<Option<ScanRun>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM scan_run WHERE id = ?1", SCAN_RUN_COLUMNS),
                params![run_id],
                scan_run_from_row,
            )
            .optional()
    }

    pub fn list_scan_runs(&self, limit: i64) -> Result<Vec<ScanRun>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM scan_run ORDER BY id DESC LIMIT ?1",
            SCAN_RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![limit], scan_run_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Runs left `running` by a process that exited mid-scan.
    pub fn abandon_running_scan_runs(&self) -> Result<usize> {
        self.connection().execute(
            "UPDATE scan_run SET state = 'cancelled', completed_at = ?1 WHERE state IN ('running', 'paused')",
            params![now_timestamp()],
        )
    }

    // ── User Rules ───────────────────────────────────────────────

    pub fn insert_rule(&self, kind: RuleKind, drive_id: i64, priority: i64) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO user_rule (kind, drive_id, priority, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![kind, drive_id, priority, now_timestamp()],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Rules in evaluation order: highest priority first, then oldest first.
    pub fn list_rules(&self) -> Result<Vec<UserRule>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, kind, drive_id, priority, created_at FROM user_rule \
             ORDER BY priority DESC, id ASC",
        )?;
        let rules = stmt
            .query_map([], |row| {
                Ok(UserRule {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    drive_id: row.get(2)?,
                    priority: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rules)
    }

    pub fn delete_rule(&self, rule_id: i64) -> Result<bool> {
        let deleted = self
            .connection()
            .execute("DELETE FROM user_rule WHERE id = ?1", params![rule_id])?;
        Ok(deleted > 0)
    }

    // ── Settings ─────────────────────────────────────────────────

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.connection()
            .query_row(
                "SELECT value FROM setting WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.connection().execute(
            "INSERT INTO setting (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
