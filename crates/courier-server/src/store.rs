//! Shared handle to the SQLite database.

use std::sync::Arc;

use tokio::sync::Mutex;

use courier_store::Database;

/// Cloneable handle shared by the gateway, workers and scheduler.
///
/// Every operation holds the lock only for the closure it runs; callers keep
/// network I/O outside of it.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` against the database under the lock.
    pub async fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Database) -> R,
    {
        let db = self.db.lock().await;
        f(&db)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn memory_store() -> Store {
        Store::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_store_runs_closures_against_shared_database() {
        let store = memory_store();
        let other = store.clone();
        let version = other.with(|db| db.schema_version()).await.unwrap();
        assert_eq!(version, store.with(|db| db.schema_version()).await.unwrap());
        assert!(version > 0);
    }
}
