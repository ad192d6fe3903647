use chrono::Utc;
use serde_json::json;

use super::clients::parse_timestamp;
use super::Database;
use crate::errors::FleetError;
use crate::models::ScanDefinition;

impl Database {
    pub fn create_scan(&self, scan: &ScanDefinition) -> Result<(), FleetError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scans (id, name, description, targets, ports, scan_arguments, interval_minutes, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                scan.id,
                scan.name,
                scan.description,
                scan.targets,
                scan.ports,
                scan.scan_arguments,
                scan.interval_minutes,
                scan.is_active,
                scan.created_at.to_rfc3339(),
                scan.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FleetError::Database(format!("Failed to create scan: {}", e)))?;
        Ok(())
    }

    pub fn get_scan(&self, id: &str) -> Result<Option<ScanDefinition>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, targets, ports, scan_arguments, interval_minutes, is_active, created_at, updated_at
                 FROM scans WHERE id = ?1",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let result = stmt.query_row(rusqlite::params![id], |row: &rusqlite::Row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<u32>>(6)?,
                row.get::<_, bool>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        });

        match result {
            Ok((id, name, description, targets, ports, scan_arguments, interval_minutes, is_active, created_at, updated_at)) => {
                Ok(Some(ScanDefinition {
                    id,
                    name,
                    description,
                    targets,
                    ports,
                    scan_arguments,
                    interval_minutes,
                    is_active,
                    created_at: parse_timestamp(&created_at)?,
                    updated_at: parse_timestamp(&updated_at)?,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(FleetError::Database(format!("Query error: {}", e))),
        }
    }

    pub fn list_scans(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<serde_json::Value>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, targets, ports, interval_minutes, is_active, created_at
                 FROM scans ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map(
                rusqlite::params![limit as i64, offset as i64],
                |row: &rusqlite::Row| {
                    Ok(json!({
                        "id": row.get::<_, String>(0)?,
                        "name": row.get::<_, String>(1)?,
                        "targets": row.get::<_, String>(2)?,
                        "ports": row.get::<_, String>(3)?,
                        "interval_minutes": row.get::<_, Option<u32>>(4)?,
                        "is_active": row.get::<_, bool>(5)?,
                        "created_at": row.get::<_, String>(6)?,
                    }))
                },
            )
            .map_err(|e| FleetError::Database(format!("Query error: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| FleetError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }

    pub fn delete_scan(&self, id: &str) -> Result<bool, FleetError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute("DELETE FROM scans WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| FleetError::Database(format!("Delete failed: {}", e)))?;
        Ok(affected > 0)
    }

    pub fn set_scan_active(&self, id: &str, is_active: bool) -> Result<bool, FleetError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn
            .execute(
                "UPDATE scans SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, is_active, Utc::now().to_rfc3339()],
            )
            .map_err(|e| FleetError::Database(format!("Update failed: {}", e)))?;
        Ok(affected > 0)
    }
}
