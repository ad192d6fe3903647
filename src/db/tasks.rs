use serde_json::json;

use super::Database;
use crate::errors::FleetError;
use crate::models::ScanTask;

impl Database {
    pub fn create_task(&self, task: &ScanTask) -> Result<(), FleetError> {
        let targets = serde_json::to_string(&task.targets)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO scan_tasks (task_id, execution_id, scan_id, client_id, targets, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                task.task_id,
                task.execution_id,
                task.scan_id,
                task.client_id,
                targets,
                task.state.as_str(),
                task.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FleetError::Database(format!("Failed to create task: {}", e)))?;
        Ok(())
    }

    /// Persist a task's lifecycle fields after a state transition.
    pub fn update_task(&self, task: &ScanTask) -> Result<(), FleetError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scan_tasks SET state = ?2, dispatched_at = ?3, completed_at = ?4, error = ?5 WHERE task_id = ?1",
            rusqlite::params![
                task.task_id,
                task.state.as_str(),
                task.dispatched_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.error,
            ],
        )
        .map_err(|e| FleetError::Database(format!("Failed to update task: {}", e)))?;
        Ok(())
    }

    pub fn task_exists(&self, task_id: &str) -> Result<bool, FleetError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM scan_tasks WHERE task_id = ?1",
                rusqlite::params![task_id],
                |row| row.get(0),
            )
            .map_err(|e| FleetError::Database(format!("Query error: {}", e)))?;
        Ok(count > 0)
    }

    pub fn list_tasks_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<Vec<serde_json::Value>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT task_id, client_id, targets, state, dispatched_at, completed_at, error
                 FROM scan_tasks WHERE execution_id = ?1 ORDER BY task_id",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map(rusqlite::params![execution_id], |row: &rusqlite::Row| {
                let targets: String = row.get(2)?;
                Ok(json!({
                    "task_id": row.get::<_, String>(0)?,
                    "client_id": row.get::<_, String>(1)?,
                    "targets": serde_json::from_str::<serde_json::Value>(&targets)
                        .unwrap_or_else(|_| json!([])),
                    "state": row.get::<_, String>(3)?,
                    "dispatched_at": row.get::<_, Option<String>>(4)?,
                    "completed_at": row.get::<_, Option<String>>(5)?,
                    "error": row.get::<_, Option<String>>(6)?,
                }))
            })
            .map_err(|e| FleetError::Database(format!("Query error: {}", e)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| FleetError::Database(format!("Row error: {}", e)))?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ScanDefinition, TaskState};
    use chrono::Utc;

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

    #[test]
    fn test_db_task_roundtrip() {
        let db = Database::in_memory().unwrap();
        seed_scan(&db, "scan-1");

        let mut task = ScanTask::new(
            "task-1".into(),
            "exec-1".into(),
            "scan-1".into(),
            "client-1".into(),
            vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()],
            Utc::now(),
        );
        db.create_task(&task).unwrap();

        task.mark_dispatched(Utc::now()).unwrap();
        task.finish(TaskState::Completed, None, Utc::now()).unwrap();
        db.update_task(&task).unwrap();

        let rows = db.list_tasks_for_execution("exec-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["state"], "completed");
        assert_eq!(rows[0]["targets"].as_array().unwrap().len(), 2);
        assert!(rows[0]["completed_at"].is_string());
    }

    #[test]
    fn test_db_tasks_scoped_to_execution() {
        let db = Database::in_memory().unwrap();
        seed_scan(&db, "scan-1");

        for (task_id, exec) in [("t-1", "e-1"), ("t-2", "e-1"), ("t-3", "e-2")] {
            db.create_task(&ScanTask::new(
                task_id.into(),
                exec.into(),
                "scan-1".into(),
                "client-1".into(),
                vec![],
                Utc::now(),
            ))
            .unwrap();
        }

        assert_eq!(db.list_tasks_for_execution("e-1").unwrap().len(), 2);
        assert_eq!(db.list_tasks_for_execution("e-2").unwrap().len(), 1);
    }
}
