use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::errors::FleetError;

pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, FleetError> {
        // Ensure parent directory exists
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| FleetError::Database(format!("Failed to open database: {}", e)))?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| FleetError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, FleetError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FleetError::Database(format!("Failed to open in-memory db: {}", e)))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<(), FleetError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(super::schema::CREATE_TABLES)
            .map_err(|e| FleetError::Database(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }
}

impl Database {
    /// Fleet-wide counters for the stats endpoint.
    pub fn fleet_stats(&self) -> Result<serde_json::Value, FleetError> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> Result<i64, FleetError> {
            conn.query_row(sql, [], |row| row.get(0))
                .map_err(|e| FleetError::Database(format!("Query error: {}", e)))
        };

        Ok(serde_json::json!({
            "clients": {
                "total": count("SELECT COUNT(*) FROM clients")?,
                "approved": count("SELECT COUNT(*) FROM clients WHERE state = 'approved'")?,
                "pending": count("SELECT COUNT(*) FROM clients WHERE state = 'pending-approval'")?,
                "offline": count("SELECT COUNT(*) FROM clients WHERE state = 'offline'")?,
                "revoked": count("SELECT COUNT(*) FROM clients WHERE state = 'revoked'")?,
            },
            "scans": count("SELECT COUNT(*) FROM scans")?,
            "results": {
                "total": count("SELECT COUNT(*) FROM scan_results")?,
                "frozen": count("SELECT COUNT(*) FROM scan_results WHERE frozen_at IS NOT NULL")?,
            },
            "reports": {
                "total": count("SELECT COUNT(*) FROM delta_reports")?,
                "with_changes": count("SELECT COUNT(*) FROM delta_reports WHERE has_changes = 1")?,
            },
        }))
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}
