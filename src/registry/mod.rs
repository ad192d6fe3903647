pub mod sweeper;

pub use sweeper::LivenessSweeper;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::db::Database;
use crate::errors::FleetError;
use crate::models::{Client, ClientState, Heartbeat};

/// Tracks agent identity, approval, and liveness.
///
/// The registry is the only process-wide mutable state: constructed once at
/// startup (re-hydrated from the database) and injected wherever needed.
/// `eligible_clients` takes a consistent snapshot under the read lock so a
/// partitioning decision never observes a half-applied update.
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
    db: Database,
}

impl ClientRegistry {
    pub fn load(db: Database) -> Result<Self, FleetError> {
        let persisted = db.load_clients()?;
        info!(count = persisted.len(), "Loaded clients from database");
        let clients = persisted
            .into_iter()
            .map(|c| (c.client_id.clone(), c))
            .collect();
        Ok(Self {
            clients: RwLock::new(clients),
            db,
        })
    }

    /// Upsert from a heartbeat. Unknown clients register as pending
    /// approval; offline clients recover to approved; revoked clients stay
    /// revoked. Returns the state the caller should report back.
    pub async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> Result<ClientState, FleetError> {
        use std::collections::hash_map::Entry;

        let mut clients = self.clients.write().await;
        let now = Utc::now();

        let client = match clients.entry(heartbeat.client_id.clone()) {
            Entry::Occupied(entry) => {
                let client = entry.into_mut();
                client.touch(heartbeat, now);
                client
            }
            Entry::Vacant(entry) => {
                info!(client_id = %heartbeat.client_id, hostname = %heartbeat.hostname, "New client registered, awaiting approval");
                entry.insert(Client::register(heartbeat, now))
            }
        };

        self.db.save_client(client)?;
        Ok(client.state)
    }

    pub async fn approve(&self, client_id: &str) -> Result<ClientState, FleetError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| FleetError::UnknownClient(client_id.to_string()))?;
        client.approve()?;
        self.db.save_client(client)?;
        info!(client_id = %client_id, "Client approved");
        Ok(client.state)
    }

    /// Revoke immediately excludes the client from future partitioning even
    /// if it keeps sending heartbeats.
    pub async fn revoke(&self, client_id: &str) -> Result<ClientState, FleetError> {
        let mut clients = self.clients.write().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| FleetError::UnknownClient(client_id.to_string()))?;
        client.revoke();
        self.db.save_client(client)?;
        info!(client_id = %client_id, "Client approval revoked");
        Ok(client.state)
    }

    /// Transition approved clients with stale heartbeats to offline.
    /// Returns how many were swept.
    pub async fn sweep_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> usize {
        let mut clients = self.clients.write().await;
        let mut swept = 0;

        for client in clients.values_mut() {
            if client.state == ClientState::Approved && now - client.last_seen > timeout {
                info!(
                    client_id = %client.client_id,
                    hostname = %client.hostname,
                    last_seen = %client.last_seen,
                    "Marking client offline, missed heartbeats"
                );
                if client.mark_offline().is_ok() {
                    swept += 1;
                    if let Err(e) = self.db.save_client(client) {
                        warn!(client_id = %client.client_id, error = %e, "Failed to persist offline transition");
                    }
                }
            }
        }
        swept
    }

    /// Consistent snapshot of clients currently eligible for partitioning.
    pub async fn eligible_clients(&self) -> Vec<Client> {
        let clients = self.clients.read().await;
        let mut eligible: Vec<Client> = clients
            .values()
            .filter(|c| c.state == ClientState::Approved)
            .cloned()
            .collect();
        eligible.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        eligible
    }

    pub async fn list(&self) -> Vec<Client> {
        let clients = self.clients.read().await;
        let mut all: Vec<Client> = clients.values().cloned().collect();
        all.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        all
    }

    pub async fn get(&self, client_id: &str) -> Option<Client> {
        self.clients.read().await.get(client_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(id: &str) -> Heartbeat {
        Heartbeat {
            client_id: id.to_string(),
            hostname: format!("{}-host", id),
            address: "10.1.0.2:9090".to_string(),
            scan_range: None,
            capacity: 4,
        }
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::load(Database::in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_heartbeat_registers_pending() {
        let registry = registry();
        let state = registry.record_heartbeat(&heartbeat("aa")).await.unwrap();
        assert_eq!(state, ClientState::PendingApproval);
        assert!(registry.eligible_clients().await.is_empty());
    }

    #[tokio::test]
    async fn test_approve_makes_eligible() {
        let registry = registry();
        registry.record_heartbeat(&heartbeat("aa")).await.unwrap();
        registry.approve("aa").await.unwrap();

        let eligible = registry.eligible_clients().await;
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].client_id, "aa");
    }

    #[tokio::test]
    async fn test_revoked_client_heartbeat_stays_revoked() {
        let registry = registry();
        registry.record_heartbeat(&heartbeat("aa")).await.unwrap();
        registry.approve("aa").await.unwrap();
        registry.revoke("aa").await.unwrap();

        let state = registry.record_heartbeat(&heartbeat("aa")).await.unwrap();
        assert_eq!(state, ClientState::Revoked);
        assert!(registry.eligible_clients().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_excludes_stale_then_heartbeat_recovers() {
        let registry = registry();
        registry.record_heartbeat(&heartbeat("aa")).await.unwrap();
        registry.approve("aa").await.unwrap();
        assert_eq!(registry.eligible_clients().await.len(), 1);

        // No heartbeat for longer than 3x the interval.
        let later = Utc::now() + chrono::Duration::seconds(200);
        let swept = registry.sweep_stale(later, chrono::Duration::seconds(180)).await;
        assert_eq!(swept, 1);
        assert!(registry.eligible_clients().await.is_empty());
        assert_eq!(registry.get("aa").await.unwrap().state, ClientState::Offline);

        // Heartbeat recovery restores eligibility without operator action.
        let state = registry.record_heartbeat(&heartbeat("aa")).await.unwrap();
        assert_eq!(state, ClientState::Approved);
        assert_eq!(registry.eligible_clients().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_ignores_fresh_and_pending() {
        let registry = registry();
        registry.record_heartbeat(&heartbeat("fresh")).await.unwrap();
        registry.approve("fresh").await.unwrap();
        registry.record_heartbeat(&heartbeat("pending")).await.unwrap();

        let swept = registry
            .sweep_stale(Utc::now(), chrono::Duration::seconds(180))
            .await;
        assert_eq!(swept, 0);
    }

    #[tokio::test]
    async fn test_approve_unknown_client() {
        let registry = registry();
        assert!(matches!(
            registry.approve("ghost").await,
            Err(FleetError::UnknownClient(_))
        ));
    }

    #[tokio::test]
    async fn test_registry_rehydrates_from_db() {
        let db = Database::in_memory().unwrap();
        {
            let registry = ClientRegistry::load(db.clone()).unwrap();
            registry.record_heartbeat(&heartbeat("aa")).await.unwrap();
            registry.approve("aa").await.unwrap();
        }

        let reloaded = ClientRegistry::load(db).unwrap();
        assert_eq!(reloaded.eligible_clients().await.len(), 1);
    }
}
