//! Document persistence.
//!
//! [`DocumentStore`] is the contract every backend implements: atomic
//! single-document get/put/delete plus a full scan. `put` and `delete` are
//! conditional on the document's `updated` field, which is what makes the
//! registry's read-modify-write mutations safe under concurrency.
//!
//! [`Store`] wraps a backend and bounds every call. Reads are abandoned when
//! their timeout fires. Writes instead carry a deadline into the backend,
//! which checks it under its write lock before committing, so a write either
//! lands and reports success or reports `Timeout` without landing.

#[cfg(feature = "store-fjall")]
pub mod fjall;
pub mod memory;
pub mod query;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ddo_registry_common::ddo::DidDocument;
use tracing::debug;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::AppError;

pub use memory::MemoryStore;
pub use query::{QueryFilter, QueryHits, QueryModel, SortOrder};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ---------------------------------------------------------------------------
// DocumentStore trait
// ---------------------------------------------------------------------------

pub trait DocumentStore: Send + Sync {
    fn get(&self, did: &str) -> BoxFuture<'_, Result<Option<DidDocument>, AppError>>;

    /// Write `doc` under `doc.id` only if the stored document's `updated`
    /// still equals `expected_updated`. `None` means the DID must not exist
    /// yet. A mismatch is [`AppError::Conflict`] and leaves the store as it
    /// was. Past `deadline` nothing is written and the result is
    /// [`AppError::Timeout`].
    fn put(
        &self,
        doc: DidDocument,
        expected_updated: Option<String>,
        deadline: Instant,
    ) -> BoxFuture<'_, Result<(), AppError>>;

    /// Remove `did`, if `expected_updated` is given only while the stored
    /// `updated` still equals it. Returns `false` when nothing was stored.
    /// Honors `deadline` like `put`.
    fn delete(
        &self,
        did: &str,
        expected_updated: Option<String>,
        deadline: Instant,
    ) -> BoxFuture<'_, Result<bool, AppError>>;

    /// Every stored document, ordered by DID.
    fn list_all(&self) -> BoxFuture<'_, Result<Vec<DidDocument>, AppError>>;

    fn query(&self, model: QueryModel) -> BoxFuture<'_, Result<QueryHits, AppError>> {
        Box::pin(async move {
            let docs = self.list_all().await?;
            Ok(query::execute(docs, &model))
        })
    }

    /// Flush buffered writes to durable storage.
    fn persist(&self) -> BoxFuture<'_, Result<(), AppError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Shared by backends: does the stored `updated` satisfy the caller's
/// precondition?
pub(crate) fn check_precondition(
    did: &str,
    current: Option<&DidDocument>,
    expected_updated: Option<&str>,
) -> Result<(), AppError> {
    match (current, expected_updated) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(AppError::Conflict(format!("{did} is already registered"))),
        (None, Some(_)) => Err(AppError::Conflict(format!(
            "{did} was removed by a concurrent request"
        ))),
        (Some(doc), Some(expected)) if doc.updated.as_deref() == Some(expected) => Ok(()),
        (Some(_), Some(_)) => Err(AppError::Conflict(format!(
            "{did} was modified by a concurrent request, reload and retry"
        ))),
    }
}

/// Delete-side counterpart of [`check_precondition`]: `Ok(false)` when the
/// DID is absent, `Ok(true)` when the delete may proceed.
pub(crate) fn check_delete_precondition(
    did: &str,
    current: Option<&DidDocument>,
    expected_updated: Option<&str>,
) -> Result<bool, AppError> {
    match (current, expected_updated) {
        (None, _) => Ok(false),
        (Some(_), None) => Ok(true),
        (Some(doc), Some(expected)) if doc.updated.as_deref() == Some(expected) => Ok(true),
        (Some(_), Some(_)) => Err(AppError::Conflict(format!(
            "{did} was modified by a concurrent request, reload and retry"
        ))),
    }
}

/// Checked by backends under their write lock, immediately before
/// committing.
pub(crate) fn check_deadline(op: &'static str, deadline: Instant) -> Result<(), AppError> {
    if Instant::now() >= deadline {
        debug!(op, "store write deadline passed before commit");
        return Err(AppError::Timeout(format!(
            "store {op} deadline passed before commit, nothing was written"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl Store {
    pub fn new(backend: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn open(config: &StoreConfig) -> Result<Self, AppError> {
        let backend: Arc<dyn DocumentStore> = match config.backend {
            #[cfg(feature = "store-fjall")]
            StoreBackend::Fjall => Arc::new(fjall::FjallStore::open(config)?),
            #[cfg(not(feature = "store-fjall"))]
            StoreBackend::Fjall => {
                return Err(AppError::Config(
                    "fjall backend requested but the store-fjall feature is disabled".into(),
                ));
            }
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(backend, config.timeout()))
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: BoxFuture<'_, Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(op, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(AppError::Timeout(format!(
                    "store {op} exceeded {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn find(&self, did: &str) -> Result<Option<DidDocument>, AppError> {
        self.bounded("get", self.backend.get(did)).await
    }

    pub async fn get(&self, did: &str) -> Result<DidDocument, AppError> {
        self.find(did)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("DID not found: {did}")))
    }

    /// Conditional write. Once issued it is awaited to completion: the
    /// backend enforces the deadline itself so the outcome is never lost.
    pub async fn put(
        &self,
        doc: DidDocument,
        expected_updated: Option<&str>,
    ) -> Result<(), AppError> {
        let expected = expected_updated.map(String::from);
        let deadline = Instant::now() + self.timeout;
        self.backend.put(doc, expected, deadline).await
    }

    /// Conditional delete; `None` removes whatever is stored.
    pub async fn delete(&self, did: &str, expected_updated: Option<&str>) -> Result<(), AppError> {
        let expected = expected_updated.map(String::from);
        let deadline = Instant::now() + self.timeout;
        if self.backend.delete(did, expected, deadline).await? {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("DID not found: {did}")))
        }
    }

    pub async fn list_all(&self) -> Result<Vec<DidDocument>, AppError> {
        self.bounded("list", self.backend.list_all()).await
    }

    pub async fn query(&self, model: QueryModel) -> Result<QueryHits, AppError> {
        self.bounded("query", self.backend.query(model)).await
    }

    pub async fn persist(&self) -> Result<(), AppError> {
        self.bounded("persist", self.backend.persist()).await
    }
}
