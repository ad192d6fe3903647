use chrono::{DateTime, Utc};
use serde_json::json;

use super::Database;
use crate::errors::FleetError;
use crate::models::DeltaReport;

impl Database {
    /// Store a computed delta report, stamping the given id and creation
    /// time. The UNIQUE(baseline, current) constraint backs the
    /// once-per-pair guarantee.
    pub fn save_report(
        &self,
        report_id: &str,
        report: &DeltaReport,
        created_at: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        let payload = serde_json::to_string(report)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO delta_reports (report_id, scan_id, baseline_result_id, current_result_id, payload,
                                        new_hosts_count, removed_hosts_count, new_ports_count, closed_ports_count,
                                        changed_services_count, has_changes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                report_id,
                report.scan_id,
                report.baseline_result_id,
                report.current_result_id,
                payload,
                report.new_hosts.len() as i64,
                report.removed_hosts.len() as i64,
                report.new_ports_count() as i64,
                report.closed_ports_count() as i64,
                report.changed_services_count() as i64,
                report.has_changes,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FleetError::Database(format!("Failed to save report: {}", e)))?;
        Ok(())
    }

    pub fn report_exists(
        &self,
        baseline_result_id: &str,
        current_result_id: &str,
    ) -> Result<bool, FleetError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM delta_reports WHERE baseline_result_id = ?1 AND current_result_id = ?2",
                rusqlite::params![baseline_result_id, current_result_id],
                |row| row.get(0),
            )
            .map_err(|e| FleetError::Database(format!("Query error: {}", e)))?;
        Ok(count > 0)
    }

    pub fn get_report(&self, report_id: &str) -> Result<Option<serde_json::Value>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT report_id, scan_id, baseline_result_id, current_result_id, payload, has_changes, created_at
                 FROM delta_reports WHERE report_id = ?1",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let result = stmt.query_row(rusqlite::params![report_id], |row: &rusqlite::Row| {
            let payload: String = row.get(4)?;
            Ok(json!({
                "report_id": row.get::<_, String>(0)?,
                "scan_id": row.get::<_, String>(1)?,
                "baseline_result_id": row.get::<_, String>(2)?,
                "current_result_id": row.get::<_, String>(3)?,
                "delta": serde_json::from_str::<serde_json::Value>(&payload)
                    .unwrap_or_else(|_| json!(null)),
                "has_changes": row.get::<_, bool>(5)?,
                "created_at": row.get::<_, String>(6)?,
            }))
        });

        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(FleetError::Database(format!("Query error: {}", e))),
        }
    }

    pub fn list_reports_for_scan(
        &self,
        scan_id: &str,
        limit: usize,
        only_changes: bool,
    ) -> Result<Vec<serde_json::Value>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let sql = if only_changes {
            "SELECT report_id, baseline_result_id, current_result_id, new_hosts_count, removed_hosts_count,
                    new_ports_count, closed_ports_count, changed_services_count, has_changes, created_at
             FROM delta_reports WHERE scan_id = ?1 AND has_changes = 1
             ORDER BY created_at DESC LIMIT ?2"
        } else {
            "SELECT report_id, baseline_result_id, current_result_id, new_hosts_count, removed_hosts_count,
                    new_ports_count, closed_ports_count, changed_services_count, has_changes, created_at
             FROM delta_reports WHERE scan_id = ?1
             ORDER BY created_at DESC LIMIT ?2"
        };
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map(
                rusqlite::params![scan_id, limit as i64],
                |row: &rusqlite::Row| {
                    Ok(json!({
                        "report_id": row.get::<_, String>(0)?,
                        "baseline_result_id": row.get::<_, String>(1)?,
                        "current_result_id": row.get::<_, String>(2)?,
                        "new_hosts_count": row.get::<_, i64>(3)?,
                        "removed_hosts_count": row.get::<_, i64>(4)?,
                        "new_ports_count": row.get::<_, i64>(5)?,
                        "closed_ports_count": row.get::<_, i64>(6)?,
                        "changed_services_count": row.get::<_, i64>(7)?,
                        "has_changes": row.get::<_, bool>(8)?,
                        "created_at": row.get::<_, String>(9)?,
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
}
