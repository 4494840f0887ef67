//! Persistence for scored events.
//!
//! [`RedisStore`] appends one JSON record per event to a Redis list;
//! [`MemoryStore`] keeps records in process and is the default backend.
//! Rows carry location and network data only; IP addresses never reach storage.

use std::sync::Mutex;
use std::sync::PoisonError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use crate::core::event::{Action, CanonicalEvent, Endpoint, GeoPoint, Vector};
use crate::models::{StoreBackend, StoreConfig};

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Store not initialized")]
    NotInitialized,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persisted side of an event, without its address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEndpoint {
    pub country: String,
    pub asn: Option<u32>,
    pub geo: GeoPoint,
}

impl From<&Endpoint> for StoredEndpoint {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            country: endpoint.country.clone(),
            asn: endpoint.asn,
            geo: endpoint.geo,
        }
    }
}

/// Row written for every scored event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    pub timestamp: i64,
    pub source: StoredEndpoint,
    pub destination: StoredEndpoint,
    pub packets_per_second: u64,
    pub bits_per_second: f64,
    pub bytes: f64,
    pub action: Action,
    pub vector: Vector,
    pub reputation_score: u8,
    pub score: f64,
}

impl StoredEvent {
    pub fn new(event: &CanonicalEvent, score: f64) -> Self {
        Self {
            timestamp: event.timestamp,
            source: StoredEndpoint::from(&event.source),
            destination: StoredEndpoint::from(&event.destination),
            packets_per_second: event.packets_per_second,
            bits_per_second: event.bits_per_second,
            bytes: event.bytes,
            action: event.action,
            vector: event.vector,
            reputation_score: event.reputation_score,
            score,
        }
    }
}

/// Append-only sink for scored events
#[async_trait]
pub trait Store: Send + Sync {
    /// Prepare the backend. Failure here aborts pipeline startup.
    async fn init(&self) -> Result<(), StoreError>;

    async fn append(&self, event: &CanonicalEvent, score: f64) -> Result<(), StoreError>;

    /// Number of persisted rows
    async fn row_count(&self) -> Result<u64, StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Redis list-backed store
pub struct RedisStore {
    client: redis::Client,
    key: String,
    conn: OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(client: redis::Client, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            conn: OnceCell::new(),
        }
    }

    fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.conn.get().cloned().ok_or(StoreError::NotInitialized)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn init(&self) -> Result<(), StoreError> {
        let mut conn = ConnectionManager::new(self.client.clone()).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        self.conn
            .set(conn)
            .map_err(|_| StoreError::Unavailable("store already initialized".to_string()))?;
        log::info!("Redis store ready (list key: {})", self.key);
        Ok(())
    }

    async fn append(&self, event: &CanonicalEvent, score: f64) -> Result<(), StoreError> {
        let record = serde_json::to_string(&StoredEvent::new(event, score))?;
        let mut conn = self.connection()?;
        let _: () = conn.rpush(&self.key, record).await?;
        Ok(())
    }

    async fn row_count(&self) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;
        let rows: u64 = conn.llen(&self.key).await?;
        Ok(rows)
    }

    fn backend_type(&self) -> &'static str {
        "redis"
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<StoredEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every persisted row, in append order.
    pub fn rows(&self) -> Vec<StoredEvent> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn append(&self, event: &CanonicalEvent, score: f64) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StoredEvent::new(event, score));
        Ok(())
    }

    async fn row_count(&self) -> Result<u64, StoreError> {
        Ok(self.rows.lock().unwrap_or_else(PoisonError::into_inner).len() as u64)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// Build the configured store. Connection happens later, in [`Store::init`].
pub fn build_store(config: &StoreConfig) -> Result<Box<dyn Store>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Box::new(MemoryStore::new())),
        StoreBackend::Redis => {
            let client = redis::Client::open(config.redis_url.as_str())?;
            Ok(Box::new(RedisStore::new(client, config.key.clone())))
        }
    }
}
