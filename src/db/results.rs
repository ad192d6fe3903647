use serde_json::json;

use super::clients::parse_timestamp;
use super::Database;
use crate::errors::FleetError;
use crate::models::{Completeness, ScanResult};

impl Database {
    /// Create the open (not yet frozen) result row for a starting execution.
    pub fn create_result(&self, result: &ScanResult) -> Result<(), FleetError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scan_results (result_id, scan_id, execution_id, completeness, hosts, task_ids, unassigned, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                result.result_id,
                result.scan_id,
                result.execution_id,
                result.completeness.as_str(),
                serde_json::to_string(&result.hosts)?,
                serde_json::to_string(&result.task_ids)?,
                serde_json::to_string(&result.unassigned)?,
                result.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FleetError::Database(format!("Failed to create result: {}", e)))?;
        Ok(())
    }

    /// Persist the final state of a frozen result.
    pub fn freeze_result(&self, result: &ScanResult) -> Result<(), FleetError> {
        let frozen_at = result.frozen_at.ok_or_else(|| {
            FleetError::Internal(format!("result {} is not frozen", result.result_id))
        })?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scan_results SET completeness = ?2, hosts = ?3, task_ids = ?4, unassigned = ?5, frozen_at = ?6
             WHERE result_id = ?1",
            rusqlite::params![
                result.result_id,
                result.completeness.as_str(),
                serde_json::to_string(&result.hosts)?,
                serde_json::to_string(&result.task_ids)?,
                serde_json::to_string(&result.unassigned)?,
                frozen_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FleetError::Database(format!("Failed to freeze result: {}", e)))?;
        Ok(())
    }

    pub fn get_result(&self, result_id: &str) -> Result<Option<ScanResult>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT result_id, scan_id, execution_id, completeness, hosts, task_ids, unassigned, created_at, frozen_at
                 FROM scan_results WHERE result_id = ?1",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let row = stmt.query_row(rusqlite::params![result_id], row_to_tuple);
        match row {
            Ok(raw) => Ok(Some(tuple_to_result(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(FleetError::Database(format!("Query error: {}", e))),
        }
    }

    /// The most recent frozen result for a scan created strictly before
    /// `before_created_at` (RFC3339). This is the delta baseline lookup.
    pub fn latest_frozen_result_before(
        &self,
        scan_id: &str,
        before_created_at: &str,
    ) -> Result<Option<ScanResult>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT result_id, scan_id, execution_id, completeness, hosts, task_ids, unassigned, created_at, frozen_at
                 FROM scan_results
                 WHERE scan_id = ?1 AND frozen_at IS NOT NULL AND created_at < ?2
                 ORDER BY created_at DESC LIMIT 1",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let row = stmt.query_row(rusqlite::params![scan_id, before_created_at], row_to_tuple);
        match row {
            Ok(raw) => Ok(Some(tuple_to_result(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(FleetError::Database(format!("Query error: {}", e))),
        }
    }

    pub fn get_result_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Option<ScanResult>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT result_id, scan_id, execution_id, completeness, hosts, task_ids, unassigned, created_at, frozen_at
                 FROM scan_results WHERE execution_id = ?1",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let row = stmt.query_row(rusqlite::params![execution_id], row_to_tuple);
        match row {
            Ok(raw) => Ok(Some(tuple_to_result(raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(FleetError::Database(format!("Query error: {}", e))),
        }
    }

    pub fn list_results_for_scan(
        &self,
        scan_id: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT result_id, execution_id, completeness, created_at, frozen_at
                 FROM scan_results WHERE scan_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map(
                rusqlite::params![scan_id, limit as i64],
                |row: &rusqlite::Row| {
                    Ok(json!({
                        "result_id": row.get::<_, String>(0)?,
                        "execution_id": row.get::<_, String>(1)?,
                        "completeness": row.get::<_, String>(2)?,
                        "created_at": row.get::<_, String>(3)?,
                        "frozen_at": row.get::<_, Option<String>>(4)?,
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

type ResultRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
);

fn row_to_tuple(row: &rusqlite::Row) -> rusqlite::Result<ResultRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn tuple_to_result(raw: ResultRow) -> Result<ScanResult, FleetError> {
    let (result_id, scan_id, execution_id, completeness, hosts, task_ids, unassigned, created_at, frozen_at) =
        raw;
    let completeness = Completeness::parse(&completeness).ok_or_else(|| {
        FleetError::Database(format!(
            "Bad completeness for {}: {}",
            result_id, completeness
        ))
    })?;
    Ok(ScanResult {
        result_id,
        scan_id,
        execution_id,
        completeness,
        hosts: serde_json::from_str(&hosts)?,
        task_ids: serde_json::from_str(&task_ids)?,
        unassigned: serde_json::from_str(&unassigned)?,
        created_at: parse_timestamp(&created_at)?,
        frozen_at: frozen_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HostRecord, HostState, ScanDefinition};
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn seed_scan(db: &Database, id: &str) {
        db.create_scan(&ScanDefinition::new(
            id.to_string(),
            "seed".to_string(),
            "10.0.0.1".to_string(),
            "1-1000".to_string(),
            Utc::now(),
        ))
        .unwrap();
    }

    fn open_result(id: &str, scan_id: &str, created_at: chrono::DateTime<Utc>) -> ScanResult {
        ScanResult {
            result_id: id.to_string(),
            scan_id: scan_id.to_string(),
            execution_id: format!("exec-{}", id),
            completeness: Completeness::Partial,
            hosts: BTreeMap::new(),
            task_ids: vec![],
            unassigned: vec![],
            created_at,
            frozen_at: None,
        }
    }

    #[test]
    fn test_db_result_roundtrip_with_hosts() {
        let db = Database::in_memory().unwrap();
        seed_scan(&db, "scan-1");

        let mut result = open_result("res-1", "scan-1", Utc::now());
        db.create_result(&result).unwrap();

        result.hosts.insert(
            "10.0.0.1".parse().unwrap(),
            HostRecord {
                state: HostState::Up,
                open_ports: vec![22, 80],
                port_details: BTreeMap::new(),
            },
        );
        result.completeness = Completeness::Full;
        result.frozen_at = Some(Utc::now());
        db.freeze_result(&result).unwrap();

        let loaded = db.get_result("res-1").unwrap().unwrap();
        assert_eq!(loaded.completeness, Completeness::Full);
        assert!(loaded.is_frozen());
        let addr: std::net::IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(loaded.hosts[&addr].open_ports, vec![22, 80]);
    }

    #[test]
    fn test_db_freeze_requires_frozen_timestamp() {
        let db = Database::in_memory().unwrap();
        seed_scan(&db, "scan-1");
        let result = open_result("res-1", "scan-1", Utc::now());
        db.create_result(&result).unwrap();
        assert!(db.freeze_result(&result).is_err());
    }

    #[test]
    fn test_db_latest_frozen_result_before() {
        let db = Database::in_memory().unwrap();
        seed_scan(&db, "scan-1");
        let now = Utc::now();

        // Older frozen, newer frozen, and an unfrozen row in between.
        let mut oldest = open_result("res-old", "scan-1", now - Duration::hours(3));
        oldest.frozen_at = Some(now - Duration::hours(3));
        db.create_result(&oldest).unwrap();
        db.freeze_result(&oldest).unwrap();

        let unfrozen = open_result("res-open", "scan-1", now - Duration::hours(2));
        db.create_result(&unfrozen).unwrap();

        let mut newest = open_result("res-new", "scan-1", now - Duration::hours(1));
        newest.frozen_at = Some(now - Duration::hours(1));
        db.create_result(&newest).unwrap();
        db.freeze_result(&newest).unwrap();

        let baseline = db
            .latest_frozen_result_before("scan-1", &now.to_rfc3339())
            .unwrap()
            .unwrap();
        assert_eq!(baseline.result_id, "res-new");

        // A lookup scoped before the newest result finds the oldest.
        let earlier = db
            .latest_frozen_result_before("scan-1", &(now - Duration::hours(1)).to_rfc3339())
            .unwrap()
            .unwrap();
        assert_eq!(earlier.result_id, "res-old");
    }

    #[test]
    fn test_db_list_results_for_scan() {
        let db = Database::in_memory().unwrap();
        seed_scan(&db, "scan-1");
        let now = Utc::now();
        for i in 0..3 {
            db.create_result(&open_result(
                &format!("res-{}", i),
                "scan-1",
                now - Duration::minutes(i),
            ))
            .unwrap();
        }

        let rows = db.list_results_for_scan("scan-1", 10).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["result_id"], "res-0");
    }
}
