use rusqlite::{Connection, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA_VERSION: i64 = 2;

pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let db = Database {
            conn,
            path: Some(path.as_ref().to_path_buf()),
        };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn, path: None };
        db.configure_pragmas()?;
        db.migrate_schema()?;
        Ok(db)
    }

    /// Open a second connection to the same database file, for use on another thread.
    pub fn reopen(&self) -> Result<Self> {
        match &self.path {
            Some(path) => Database::open(path),
            None => Err(rusqlite::Error::InvalidPath(PathBuf::from(":memory:"))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, foreign keys, 5s busy timeout)");
        Ok(())
    }

    fn migrate_schema(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;

        self.conn.execute_batch(include_str!("schema.sql"))?;
        if version == 1 {
            self.conn
                .execute_batch("ALTER TABLE operation ADD COLUMN control TEXT;")?;
            debug!("Added operation.control column");
        }
        if version < SCHEMA_VERSION {
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
            debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn truncate_all(&self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM operation;
             DELETE FROM media_item_file;
             DELETE FROM media_item;
             DELETE FROM file_record;
             DELETE FROM scan_run;
             DELETE FROM user_rule;
             DELETE FROM root;
             DELETE FROM drive;
             DELETE FROM setting;",
        )?;
        debug!("All tables truncated");
        Ok(())
    }
}
