use std::sync::{Arc, Mutex};
use std::time::Instant;

use ddo_registry_common::ddo::DidDocument;
use fjall::{KeyspaceCreateOptions, PersistMode};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::AppError;

use super::{
    BoxFuture, DocumentStore, check_deadline, check_delete_precondition, check_precondition,
};

const DDO_KEYSPACE: &str = "ddo";

fn ddo_key(did: &str) -> String {
    format!("ddo:{did}")
}

// ---------------------------------------------------------------------------
// FjallStore
// ---------------------------------------------------------------------------

pub struct FjallStore {
    db: fjall::Database,
    keyspace: fjall::Keyspace,
    /// Serializes the read-compare-write of `put` and `delete`.
    write_lock: Arc<Mutex<()>>,
}

impl FjallStore {
    pub fn open(config: &StoreConfig) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.data_dir).map_err(AppError::Io)?;

        info!(path = %config.data_dir.display(), "opening fjall store");

        let db = fjall::Database::builder(&config.data_dir)
            .open()
            .map_err(|e| AppError::Store(e.to_string()))?;
        let keyspace = db
            .keyspace(DDO_KEYSPACE, KeyspaceCreateOptions::default)
            .map_err(|e| AppError::Store(e.to_string()))?;

        Ok(Self {
            db,
            keyspace,
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

fn read_doc(ks: &fjall::Keyspace, key: &str) -> Result<Option<DidDocument>, AppError> {
    match ks.get(key).map_err(|e| AppError::Store(e.to_string()))? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn lock_poisoned() -> AppError {
    AppError::Internal("fjall write lock poisoned".into())
}

impl DocumentStore for FjallStore {
    fn get(&self, did: &str) -> BoxFuture<'_, Result<Option<DidDocument>, AppError>> {
        let key = ddo_key(did);
        let ks = self.keyspace.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || read_doc(&ks, &key))
                .await
                .map_err(|e| AppError::Internal(format!("blocking task panicked: {e}")))?
        })
    }

    fn put(
        &self,
        doc: DidDocument,
        expected_updated: Option<String>,
        deadline: Instant,
    ) -> BoxFuture<'_, Result<(), AppError>> {
        let ks = self.keyspace.clone();
        let lock = self.write_lock.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> Result<(), AppError> {
                let bytes = serde_json::to_vec(&doc)?;
                let key = ddo_key(&doc.id);
                let _guard = lock.lock().map_err(|_| lock_poisoned())?;
                check_deadline("put", deadline)?;
                let current = read_doc(&ks, &key)?;
                check_precondition(&doc.id, current.as_ref(), expected_updated.as_deref())?;
                ks.insert(key.into_bytes(), bytes)
                    .map_err(|e| AppError::Store(e.to_string()))
            })
            .await
            .map_err(|e| AppError::Internal(format!("blocking task panicked: {e}")))?
        })
    }

    fn delete(
        &self,
        did: &str,
        expected_updated: Option<String>,
        deadline: Instant,
    ) -> BoxFuture<'_, Result<bool, AppError>> {
        let did = did.to_string();
        let ks = self.keyspace.clone();
        let lock = self.write_lock.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> Result<bool, AppError> {
                let key = ddo_key(&did);
                let _guard = lock.lock().map_err(|_| lock_poisoned())?;
                check_deadline("delete", deadline)?;
                let current = read_doc(&ks, &key)?;
                if !check_delete_precondition(&did, current.as_ref(), expected_updated.as_deref())? {
                    return Ok(false);
                }
                ks.remove(key.into_bytes()).map_err(|e| AppError::Store(e.to_string()))?;
                Ok(true)
            })
            .await
            .map_err(|e| AppError::Internal(format!("blocking task panicked: {e}")))?
        })
    }

    fn list_all(&self) -> BoxFuture<'_, Result<Vec<DidDocument>, AppError>> {
        let ks = self.keyspace.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || -> Result<Vec<DidDocument>, AppError> {
                let mut results = Vec::new();
                for guard in ks.prefix(ddo_key("").into_bytes()) {
                    let (_key, value) = guard
                        .into_inner()
                        .map_err(|e| AppError::Store(e.to_string()))?;
                    results.push(serde_json::from_slice(&value)?);
                }
                Ok(results)
            })
            .await
            .map_err(|e| AppError::Internal(format!("blocking task panicked: {e}")))?
        })
    }

    fn persist(&self) -> BoxFuture<'_, Result<(), AppError>> {
        let db = self.db.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || db.persist(PersistMode::SyncAll))
                .await
                .map_err(|e| AppError::Internal(format!("blocking task panicked: {e}")))?
                .map_err(|e| AppError::Store(e.to_string()))?;
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
