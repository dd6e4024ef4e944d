//! Client sessions.
//!
//! A session groups calls from one client and remembers which workers it has
//! touched. Sessions created through the API never expire; push connections
//! create one on connect and remove it on disconnect.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = GatewayError;

    /// Anything that is not a UUID cannot name a session.
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| GatewayError::SessionNotFound(s.to_string()))
    }
}

/// Session snapshot for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub workers: BTreeSet<String>,
}

#[derive(Default)]
pub struct SessionTable {
    sessions: DashMap<SessionId, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> SessionId {
        let id = SessionId::new();
        self.sessions.insert(
            id,
            Session {
                id,
                created_at: Utc::now(),
                workers: BTreeSet::new(),
            },
        );
        tracing::debug!(session = %id, "Session created");
        id
    }

    pub fn get(&self, id: SessionId) -> Result<Session> {
        self.sessions
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| GatewayError::SessionNotFound(id.to_string()))
    }

    pub fn exists(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Remember that the session invoked `worker`.
    pub fn record_worker(&self, id: SessionId, worker: &str) -> Result<()> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| GatewayError::SessionNotFound(id.to_string()))?;
        if !entry.workers.contains(worker) {
            entry.workers.insert(worker.to_string());
        }
        Ok(())
    }

    pub fn remove(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            tracing::debug!(session = %id, "Session removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_returns_fresh_ids() {
        let table = SessionTable::new();
        let a = table.create();
        let b = table.create();
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);

        let session = table.get(a).unwrap();
        assert_eq!(session.id, a);
        assert!(session.workers.is_empty());
    }

    #[test]
    fn record_worker_dedups() {
        let table = SessionTable::new();
        let id = table.create();
        table.record_worker(id, "git").unwrap();
        table.record_worker(id, "git").unwrap();
        table.record_worker(id, "fetch").unwrap();

        let workers: Vec<_> = table.get(id).unwrap().workers.into_iter().collect();
        assert_eq!(workers, vec!["fetch".to_string(), "git".to_string()]);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let table = SessionTable::new();
        let stranger = SessionId::new();
        assert!(matches!(
            table.get(stranger),
            Err(GatewayError::SessionNotFound(_))
        ));
        assert!(matches!(
            table.record_worker(stranger, "git"),
            Err(GatewayError::SessionNotFound(_))
        ));
    }

    #[test]
    fn remove_drops_session() {
        let table = SessionTable::new();
        let id = table.create();
        assert!(table.remove(id));
        assert!(!table.remove(id));
        assert!(!table.exists(id));
        assert!(table.is_empty());
    }

    #[test]
    fn parsing_garbage_is_session_not_found() {
        let err = "not-a-uuid".parse::<SessionId>().unwrap_err();
        assert!(matches!(err, GatewayError::SessionNotFound(s) if s == "not-a-uuid"));

        let id = SessionId::new();
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn session_serializes_camel_case() {
        let table = SessionTable::new();
        let id = table.create();
        table.record_worker(id, "time").unwrap();
        let value = serde_json::to_value(table.get(id).unwrap()).unwrap();
        assert_eq!(value["id"], id.to_string());
        assert!(value["createdAt"].is_string());
        assert_eq!(value["workers"], serde_json::json!(["time"]));
    }
}
