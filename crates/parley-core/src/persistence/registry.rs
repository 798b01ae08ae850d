//! Concurrent mapping from server ID to its `ServerStore`, generalizing
//! REDESIGN FLAG §9: insertion takes the registry-level lock only long
//! enough to get-or-create and clone an `Arc`; every subsequent operation
//! locks the per-server store directly, never the registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::model::ServerId;

use super::ServerStore;

pub struct PersistenceRegistry {
    working_root: PathBuf,
    servers: Mutex<HashMap<ServerId, Arc<ServerStore>>>,
}

impl PersistenceRegistry {
    pub fn new(working_root: impl Into<PathBuf>) -> Self {
        Self {
            working_root: working_root.into(),
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the store for `server_id`, creating and opening its database
    /// file under `<working_root>/<server_id>/` if this is the first time
    /// it's been seen this process.
    pub fn get_or_create(&self, server_id: ServerId) -> Result<Arc<ServerStore>, StorageError> {
        if let Some(store) = self.servers.lock().get(&server_id) {
            return Ok(store.clone());
        }

        let dir = self.server_dir(server_id);
        let store = Arc::new(ServerStore::open(&dir)?);

        let mut servers = self.servers.lock();
        // another task may have raced us; keep whichever was inserted first
        // so callers never observe two live connections to the same file.
        let store = servers.entry(server_id).or_insert(store).clone();
        Ok(store)
    }

    fn server_dir(&self, server_id: ServerId) -> PathBuf {
        self.working_root.join(server_id.get().to_string())
    }
}

impl std::fmt::Debug for PersistenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceRegistry")
            .field("working_root", &self.working_root)
            .field("servers_loaded", &self.servers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snowflake::Snowflake;

    #[test]
    fn get_or_create_returns_same_arc() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PersistenceRegistry::new(dir.path());
        let a = registry.get_or_create(Snowflake(1)).unwrap();
        let b = registry.get_or_create(Snowflake(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
