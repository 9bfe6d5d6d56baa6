//! Proof-of-control checks for document mutations.
//!
//! Owner- and updater-gated requests carry a caller-chosen `updated`
//! timestamp and a signature over exactly that string. The signature does
//! not cover the previous document state or the fields being changed, so a
//! captured `(updated, signature)` pair authorizes any payload for the same
//! signer until the document's owner changes.

use std::time::Duration;

use ddo_registry_common::address::{addresses_equal, normalize_address};
use ddo_registry_common::ddo::DidDocument;
use ddo_registry_common::signature::{decode_signature, recover_signer};
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::AppError;

/// What a caller may do beyond signature-gated operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Anonymous,
    Admin,
}

impl Capability {
    pub fn is_admin(self) -> bool {
        self == Capability::Admin
    }
}

pub struct AuthorizationGate {
    admin_token: Option<String>,
    allowed_updaters: Vec<String>,
    signature_timeout: Duration,
}

impl AuthorizationGate {
    pub fn new(config: &AuthConfig) -> Result<Self, AppError> {
        let allowed_updaters: Vec<String> = config
            .allowed_updaters
            .iter()
            .map(|a| {
                normalize_address(a)
                    .map_err(|e| AppError::Config(format!("auth.allowed_updaters: {e}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            admin_token: config.admin_token.clone(),
            allowed_updaters,
            signature_timeout: config.signature_timeout(),
        })
    }

    // ---------- capability ----------

    /// Map a presented bearer token to a capability. No token is an
    /// anonymous caller; a token that does not match (or any token when none
    /// is configured) is refused outright.
    pub fn resolve_capability(&self, bearer: Option<&str>) -> Result<Capability, AppError> {
        let Some(presented) = bearer else {
            return Ok(Capability::Anonymous);
        };
        match &self.admin_token {
            Some(expected) if constant_time_eq(expected.as_bytes(), presented.as_bytes()) => {
                Ok(Capability::Admin)
            }
            _ => {
                warn!("auth rejected: admin token mismatch");
                Err(AppError::Unauthorized("invalid admin token".into()))
            }
        }
    }

    pub fn require_admin(&self, capability: Capability, action: &str) -> Result<(), AppError> {
        if capability.is_admin() {
            Ok(())
        } else {
            warn!(action, "auth rejected: administrative capability required");
            Err(AppError::Unauthorized(format!(
                "administrative capability required to {action}"
            )))
        }
    }

    // ---------- signatures ----------

    /// Recover the signer of `message`. A malformed or unrecoverable
    /// signature yields `None`; only a recovery timeout is an error.
    pub async fn recover(&self, message: &str, signature: &str) -> Result<Option<String>, AppError> {
        let message = message.to_string();
        let signature = signature.to_string();
        let task = tokio::task::spawn_blocking(move || {
            decode_signature(&signature).and_then(|bytes| recover_signer(&message, &bytes))
        });

        let recovered = tokio::time::timeout(self.signature_timeout, task)
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "signature recovery exceeded {}ms",
                    self.signature_timeout.as_millis()
                ))
            })?
            .map_err(|e| AppError::Internal(format!("blocking task panicked: {e}")))?;

        match recovered {
            Ok(address) => Ok(Some(address)),
            Err(e) => {
                debug!(error = %e, "signature did not recover to an address");
                Ok(None)
            }
        }
    }

    /// True iff the signature over `new_updated` recovers to
    /// `publicKey[0].owner`.
    pub async fn authorize_as_owner(
        &self,
        doc: &DidDocument,
        new_updated: &str,
        signature: &str,
    ) -> Result<bool, AppError> {
        let Some(owner) = doc.owner() else {
            warn!(did = %doc.id, "document has no owner, refusing owner-gated mutation");
            return Ok(false);
        };
        let authorized = self
            .recover(new_updated, signature)
            .await?
            .is_some_and(|signer| addresses_equal(&signer, owner));
        if !authorized {
            warn!(did = %doc.id, "auth rejected: signer is not the owner");
        }
        Ok(authorized)
    }

    /// True iff the signature over `new_updated` recovers to a configured
    /// allowed updater.
    pub async fn authorize_as_allowed_updater(
        &self,
        doc: &DidDocument,
        new_updated: &str,
        signature: &str,
    ) -> Result<bool, AppError> {
        let authorized = self
            .recover(new_updated, signature)
            .await?
            .is_some_and(|signer| {
                self.allowed_updaters
                    .iter()
                    .any(|allowed| addresses_equal(allowed, &signer))
            });
        if !authorized {
            warn!(did = %doc.id, "auth rejected: signer is not an allowed updater");
        }
        Ok(authorized)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
