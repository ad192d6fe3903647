use chrono::{DateTime, Utc};
use ipnet::IpNet;

use super::Database;
use crate::errors::FleetError;
use crate::models::{Client, ClientState};

impl Database {
    pub fn save_client(&self, client: &Client) -> Result<(), FleetError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO clients (client_id, hostname, address, scan_range, state, capacity, last_seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(client_id) DO UPDATE SET
               hostname = excluded.hostname,
               address = excluded.address,
               scan_range = excluded.scan_range,
               state = excluded.state,
               capacity = excluded.capacity,
               last_seen = excluded.last_seen",
            rusqlite::params![
                client.client_id,
                client.hostname,
                client.address,
                client.scan_range.map(|r| r.to_string()),
                client.state.as_str(),
                client.capacity,
                client.last_seen.to_rfc3339(),
                client.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| FleetError::Database(format!("Failed to save client: {}", e)))?;
        Ok(())
    }

    pub fn load_clients(&self) -> Result<Vec<Client>, FleetError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT client_id, hostname, address, scan_range, state, capacity, last_seen, created_at FROM clients",
            )
            .map_err(|e| FleetError::Database(format!("Query failed: {}", e)))?;

        let rows = stmt
            .query_map([], |row: &rusqlite::Row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(|e| FleetError::Database(format!("Query error: {}", e)))?;

        let mut clients = Vec::new();
        for row in rows {
            let (client_id, hostname, address, scan_range, state, capacity, last_seen, created_at) =
                row.map_err(|e| FleetError::Database(format!("Row error: {}", e)))?;

            let scan_range = match scan_range {
                Some(raw) => Some(raw.parse::<IpNet>().map_err(|e| {
                    FleetError::Database(format!("Bad scan_range for {}: {}", client_id, e))
                })?),
                None => None,
            };
            let state = ClientState::parse(&state).ok_or_else(|| {
                FleetError::Database(format!("Bad client state for {}: {}", client_id, state))
            })?;

            clients.push(Client {
                client_id,
                hostname,
                address,
                scan_range,
                state,
                capacity,
                last_seen: parse_timestamp(&last_seen)?,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(clients)
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, FleetError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| FleetError::Database(format!("Bad timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Heartbeat;

    fn client(id: &str) -> Client {
        Client::register(
            &Heartbeat {
                client_id: id.to_string(),
                hostname: "pi-lab".to_string(),
                address: "10.1.0.2:9090".to_string(),
                scan_range: Some("10.0.0.0/24".parse().unwrap()),
                capacity: 2,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_db_save_and_load_client() {
        let db = Database::in_memory().unwrap();
        db.save_client(&client("aa:bb:cc")).unwrap();

        let loaded = db.load_clients().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].client_id, "aa:bb:cc");
        assert_eq!(loaded[0].state, ClientState::PendingApproval);
        assert_eq!(
            loaded[0].scan_range,
            Some("10.0.0.0/24".parse().unwrap())
        );
    }

    #[test]
    fn test_db_save_client_upserts() {
        let db = Database::in_memory().unwrap();
        let mut c = client("aa:bb:cc");
        db.save_client(&c).unwrap();

        c.approve().unwrap();
        c.hostname = "pi-renamed".to_string();
        db.save_client(&c).unwrap();

        let loaded = db.load_clients().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, ClientState::Approved);
        assert_eq!(loaded[0].hostname, "pi-renamed");
    }

    #[test]
    fn test_db_load_client_without_range() {
        let db = Database::in_memory().unwrap();
        let mut c = client("dd:ee:ff");
        c.scan_range = None;
        db.save_client(&c).unwrap();

        let loaded = db.load_clients().unwrap();
        assert_eq!(loaded[0].scan_range, None);
    }
}
