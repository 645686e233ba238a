use super::models::*;
use super::sqlite::Database;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Result, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

const OPERATION_COLUMNS: &str = "id, kind, status, source_file_id, source_path, dest_drive_id, \
     dest_path, progress, total_size, verify_hash, error, control, created_at, started_at, \
     completed_at";

fn operation_from_row(row: &Row) -> Result<Operation> {
    Ok(Operation {
        id: row.get(0)?,
        kind: row.get(1)?,
        status: row.get(2)?,
        source_file_id: row.get(3)?,
        source_path: row.get(4)?,
        dest_drive_id: row.get(5)?,
        dest_path: row.get(6)?,
        progress: row.get(7)?,
        total_size: row.get(8)?,
        verify_hash: row.get(9)?,
        error: row.get(10)?,
        control: row.get(11)?,
        created_at: row.get(12)?,
        started_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct OperationQuery {
    pub status: Option<OperationStatus>,
    pub kind: Option<OperationKind>,
    pub offset: i64,
    pub limit: i64,
}

impl Database {
    // ── Operations ───────────────────────────────────────────────

    pub fn insert_operation(&self, op: &NewOperation) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO operation \
             (kind, status, source_file_id, source_path, dest_drive_id, dest_path, \
              total_size, verify_hash, created_at) \
             VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                op.kind,
                op.source_file_id,
                op.source_path,
                op.dest_drive_id,
                op.dest_path,
                op.total_size,
                op.verify_hash,
                now_timestamp()
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn get_operation(&self, op_id: i64) -> Result<Option<Operation>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM operation WHERE id = ?1", OPERATION_COLUMNS),
                params![op_id],
                operation_from_row,
            )
            .optional()
    }

    /// Newest first. Returns (page, total matching).
    pub fn list_operations(&self, query: &OperationQuery) -> Result<(Vec<Operation>, i64)> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(status) = query.status {
            conditions.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(kind) = query.kind {
            conditions.push("kind = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        let where_clause = if conditions.is_empty() {
            "1=1".to_string()
        } else {
            conditions.join(" AND ")
        };

        let total: i64 = self.connection().query_row(
            &format!("SELECT COUNT(*) FROM operation WHERE {}", where_clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        let limit = if query.limit > 0 { query.limit } else { 50 };
        values.push(Value::Integer(limit));
        values.push(Value::Integer(query.offset.max(0)));
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM operation WHERE {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            OPERATION_COLUMNS, where_clause
        ))?;
        let ops = stmt
            .query_map(params_from_iter(values.iter()), operation_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok((ops, total))
    }

    /// Pending operations in dispatch order: oldest first, ties by id.
    pub fn next_pending_operations(&self, limit: i64) -> Result<Vec<i64>> {
        let mut stmt = self.connection().prepare(
            "SELECT id FROM operation WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT ?1",
        )?;
        let ids = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Atomically move a pending operation to running. Only one caller can win.
    pub fn claim_operation(&self, op_id: i64) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE operation SET status = 'running', started_at = COALESCE(started_at, ?1), \
             error = NULL, control = NULL WHERE id = ?2 AND status = 'pending'",
            params![now_timestamp(), op_id],
        )?;
        Ok(changed == 1)
    }

    pub fn set_operation_progress(&self, op_id: i64, progress: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE operation SET progress = MAX(progress, ?1) WHERE id = ?2",
            params![progress, op_id],
        )?;
        Ok(())
    }

    /// Restart byte accounting, e.g. when a partial file is gone or shorter than recorded.
    pub fn reset_operation_progress(&self, op_id: i64, progress: i64) -> Result<()> {
        self.connection().execute(
            "UPDATE operation SET progress = ?1 WHERE id = ?2",
            params![progress, op_id],
        )?;
        Ok(())
    }

    /// Move an operation to `to` only if it is currently in `from`.
    pub fn transition_operation(
        &self,
        op_id: i64,
        from: &[OperationStatus],
        to: OperationStatus,
    ) -> Result<bool> {
        let placeholders = vec!["?"; from.len()].join(", ");
        let completed_at = if to.is_terminal() {
            Some(now_timestamp())
        } else {
            None
        };
        let mut values: Vec<Value> = vec![
            Value::Text(to.as_str().to_string()),
            completed_at.map_or(Value::Null, Value::Text),
            Value::Integer(op_id),
        ];
        values.extend(from.iter().map(|s| Value::Text(s.as_str().to_string())));
        let changed = self.connection().execute(
            &format!(
                "UPDATE operation SET status = ?, completed_at = COALESCE(?, completed_at), \
                 control = NULL WHERE id = ? AND status IN ({})",
                placeholders
            ),
            params_from_iter(values.iter()),
        )?;
        Ok(changed == 1)
    }

    /// Finish a running operation. Returns false when it already left `running`,
    /// e.g. because another process cancelled it.
    pub fn complete_operation(&self, op_id: i64, progress: i64) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE operation SET status = 'completed', progress = ?1, completed_at = ?2, \
             error = NULL, control = NULL WHERE id = ?3 AND status = 'running'",
            params![progress, now_timestamp(), op_id],
        )?;
        Ok(changed == 1)
    }

    /// Fail a running operation. A cancelled or paused one keeps its status.
    pub fn fail_operation(&self, op_id: i64, error: &str) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE operation SET status = 'failed', error = ?1, completed_at = ?2, \
             control = NULL WHERE id = ?3 AND status = 'running'",
            params![error, now_timestamp(), op_id],
        )?;
        Ok(changed == 1)
    }

    /// Leave a pause or cancel request on a running operation for its worker.
    /// A cancel is never downgraded to a pause.
    pub fn request_operation_control(
        &self,
        op_id: i64,
        control: OperationControl,
    ) -> Result<bool> {
        let changed = self.connection().execute(
            "UPDATE operation SET control = ?1 WHERE id = ?2 AND status = 'running' \
             AND (control IS NULL OR control <> 'cancel')",
            params![control, op_id],
        )?;
        Ok(changed == 1)
    }

    pub fn operation_control(&self, op_id: i64) -> Result<Option<OperationControl>> {
        self.connection()
            .query_row(
                "SELECT control FROM operation WHERE id = ?1",
                params![op_id],
                |row| row.get::<_, Option<OperationControl>>(0),
            )
            .optional()
            .map(Option::flatten)
    }

    /// Operations left `running` by an interrupted process become `paused`.
    pub fn recover_interrupted_operations(&self) -> Result<usize> {
        let recovered = self.connection().execute(
            "UPDATE operation SET status = 'paused', control = NULL WHERE status = 'running'",
            [],
        )?;
        if recovered > 0 {
            info!("Recovered {} interrupted operations as paused", recovered);
        }
        Ok(recovered)
    }

    pub fn operation_counts(&self) -> Result<BTreeMap<String, i64>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT status, COUNT(*) FROM operation GROUP BY status")?;
        let mut counts = BTreeMap::new();
        for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))? {
            let (status, count) = row?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// Remove terminal operations. Returns the number deleted.
    pub fn clear_finished_operations(&self) -> Result<usize> {
        self.connection().execute(
            "DELETE FROM operation WHERE status IN ('completed', 'failed', 'cancelled')",
            [],
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationCounts {
    pub pending: i64,
    pub running: i64,
    pub paused: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl OperationCounts {
    pub fn from_map(map: &BTreeMap<String, i64>) -> Self {
        let get = |status: OperationStatus| map.get(status.as_str()).copied().unwrap_or(0);
        OperationCounts {
            pending: get(OperationStatus::Pending),
            running: get(OperationStatus::Running),
            paused: get(OperationStatus::Paused),
            completed: get(OperationStatus::Completed),
            failed: get(OperationStatus::Failed),
            cancelled: get(OperationStatus::Cancelled),
        }
    }
}
