use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use ddo_registry_common::ddo::DidDocument;

use crate::error::AppError;

use super::{
    BoxFuture, DocumentStore, check_deadline, check_delete_precondition, check_precondition,
};

/// Process-local backend. Also counts successful writes so tests can assert
/// that a refused mutation never reached the store.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, DidDocument>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of puts and deletes that changed the store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn poisoned() -> AppError {
    AppError::Internal("memory store lock poisoned".into())
}

impl DocumentStore for MemoryStore {
    fn get(&self, did: &str) -> BoxFuture<'_, Result<Option<DidDocument>, AppError>> {
        let did = did.to_string();
        Box::pin(async move {
            let docs = self.docs.read().map_err(|_| poisoned())?;
            Ok(docs.get(&did).cloned())
        })
    }

    fn put(
        &self,
        doc: DidDocument,
        expected_updated: Option<String>,
        deadline: Instant,
    ) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(async move {
            let mut docs = self.docs.write().map_err(|_| poisoned())?;
            check_deadline("put", deadline)?;
            check_precondition(&doc.id, docs.get(&doc.id), expected_updated.as_deref())?;
            docs.insert(doc.id.clone(), doc);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn delete(
        &self,
        did: &str,
        expected_updated: Option<String>,
        deadline: Instant,
    ) -> BoxFuture<'_, Result<bool, AppError>> {
        let did = did.to_string();
        Box::pin(async move {
            let mut docs = self.docs.write().map_err(|_| poisoned())?;
            check_deadline("delete", deadline)?;
            if !check_delete_precondition(&did, docs.get(&did), expected_updated.as_deref())? {
                return Ok(false);
            }
            docs.remove(&did);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    }

    fn list_all(&self) -> BoxFuture<'_, Result<Vec<DidDocument>, AppError>> {
        Box::pin(async move {
            let docs = self.docs.read().map_err(|_| poisoned())?;
            Ok(docs.values().cloned().collect())
        })
    }
}
