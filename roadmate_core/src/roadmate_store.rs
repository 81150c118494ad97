//! Persistence of consensus deactivations.
//!
//! A deactivation must survive a restart and a dataset refresh, otherwise a
//! bulk reload would resurrect entities the community already retired.

use roadmate_env::EntityId;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Trait for persistent deactivation storage
///
/// Implementations must be thread-safe and persist data across restarts.
pub trait DeactivationStore: Send + Sync {
    /// Record a deactivated entity
    fn insert(&self, id: EntityId) -> Result<(), StoreError>;

    /// Check if an entity was deactivated
    fn contains(&self, id: &EntityId) -> bool;

    /// Load every deactivated entity
    fn load_all(&self) -> Result<HashSet<EntityId>, StoreError>;
}

/// In-memory store (no durability).
#[derive(Debug, Default)]
pub struct MemoryDeactivationStore {
    ids: Mutex<HashSet<EntityId>>,
}

impl MemoryDeactivationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeactivationStore for MemoryDeactivationStore {
    fn insert(&self, id: EntityId) -> Result<(), StoreError> {
        self.ids
            .lock()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?
            .insert(id);
        Ok(())
    }

    fn contains(&self, id: &EntityId) -> bool {
        self.ids.lock().map(|ids| ids.contains(id)).unwrap_or(false)
    }

    fn load_all(&self) -> Result<HashSet<EntityId>, StoreError> {
        self.ids
            .lock()
            .map(|ids| ids.clone())
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))
    }
}

/// Sled-based persistent deactivation store
///
/// Keys are the 16 raw UUID bytes of the entity id.
pub struct SledDeactivationStore {
    db: sled::Db,
}

impl SledDeactivationStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a store that is deleted when dropped (simulation, tests)
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl DeactivationStore for SledDeactivationStore {
    fn insert(&self, id: EntityId) -> Result<(), StoreError> {
        self.db
            .insert(id.as_uuid().as_bytes(), &[1u8])
            .map_err(|e| StoreError::Storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| StoreError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn contains(&self, id: &EntityId) -> bool {
        self.db.contains_key(id.as_uuid().as_bytes()).unwrap_or(false)
    }

    fn load_all(&self) -> Result<HashSet<EntityId>, StoreError> {
        let mut ids = HashSet::new();
        for result in self.db.iter() {
            let (key, _) =
                result.map_err(|e| StoreError::Storage(format!("Iteration failed: {}", e)))?;
            let uuid = Uuid::from_slice(&key)
                .map_err(|e| StoreError::Corrupt(format!("bad key: {}", e)))?;
            ids.insert(EntityId::from_uuid(uuid));
        }
        Ok(ids)
    }
}
