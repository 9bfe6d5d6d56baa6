//! Transport-independent asset registry logic.
//!
//! Every REST handler delegates here so authorization, validation and the
//! compare-and-swap write live in one place. Mutations follow the same
//! shape: resolve every local precondition, load the current document,
//! authorize against it, transform a copy, then persist conditionally on the
//! `updated` value that was read. A concurrent writer that got there first
//! turns the persist into [`AppError::Conflict`]; nothing is retried here.

use ddo_registry_common::address::{addresses_equal, is_valid_address};
use ddo_registry_common::ddo::{
    Curation, DidDocument, Link, Service, format_timestamp, get_timestamp, missing_attributes,
    next_timestamp, parse_timestamp, reorder_services, round_rating,
};
use ddo_registry_common::{
    MetadataUpdateRequest, PaginatedResponse, RatingUpdateRequest, ServicePrice, SignedRequest,
    TransferOwnershipRequest, ValidationIssue, WhitelistRequest,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::auth::{AuthorizationGate, Capability};
use crate::config::{AppConfig, PolicyConfig};
use crate::error::AppError;
use crate::schema::{SchemaMode, SchemaValidator};
use crate::store::{QueryModel, Store};

const WHITELIST_FIELD: &str = "accesssWhiteList";
const FREE_PRICE: &str = "0";

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Outcome of a full update: the stored document and whether it was newly
/// registered.
#[derive(Debug, Clone)]
pub struct FullUpdateOutcome {
    pub document: DidDocument,
    pub created: bool,
}

/// Whose signature a mutation requires.
#[derive(Debug, Clone, Copy)]
enum Signer {
    Owner,
    AllowedUpdater,
}

pub struct AssetRegistry {
    store: Store,
    schema: SchemaValidator,
    gate: AuthorizationGate,
    policy: PolicyConfig,
}

impl AssetRegistry {
    pub fn new(store: Store, config: &AppConfig) -> Result<Self, AppError> {
        Ok(Self {
            store,
            schema: SchemaValidator::new()?,
            gate: AuthorizationGate::new(&config.auth)?,
            policy: config.policy.clone(),
        })
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    // ---------- create ----------

    /// Register a new document. The first writer becomes the owner.
    pub async fn create(&self, payload: Value) -> Result<DidDocument, AppError> {
        let mut raw = into_object(payload)?;
        require_attributes(&raw)?;
        raw.remove("signature");
        let whitelist = sanitize_whitelist(raw.remove(WHITELIST_FIELD));

        let mut doc = parse_document(raw)?;
        doc.access_white_list = whitelist;
        single_metadata_service(&mut doc)?.set_curation(&Curation::default());
        self.normalize(&mut doc, PublishDate::Now)?;
        doc.updated = Some(doc.created.clone());

        self.store.put(doc.clone(), None).await?;

        info!(did = %doc.id, owner = doc.owner().unwrap_or_default(), "asset registered");
        Ok(doc)
    }

    // ---------- full update ----------

    /// Replace a document wholesale. An unregistered DID is registered
    /// instead, which needs the administrative capability.
    pub async fn full_update(
        &self,
        did: &str,
        payload: Value,
        capability: Capability,
    ) -> Result<FullUpdateOutcome, AppError> {
        let mut raw = into_object(payload)?;
        require_attributes(&raw)?;
        if raw.get("id").and_then(Value::as_str) != Some(did) {
            return Err(AppError::Validation(format!(
                "document id does not match the requested DID {did}"
            )));
        }

        let Some(current) = self.store.find(did).await? else {
            self.gate.require_admin(capability, "register through a full update")?;
            let document = self.create(Value::Object(raw)).await?;
            return Ok(FullUpdateOutcome {
                document,
                created: true,
            });
        };

        let proof = take_proof(&mut raw)?;
        self.authorize(&current, &proof, Signer::Owner).await?;

        let whitelist = match raw.remove(WHITELIST_FIELD) {
            Some(value) => sanitize_whitelist(Some(value)),
            None => current.access_white_list.clone(),
        };
        let mut doc = parse_document(raw)?;
        doc.access_white_list = whitelist;

        match (doc.owner(), current.owner()) {
            (Some(new), Some(old)) if addresses_equal(new, old) => {}
            _ => {
                return Err(AppError::Validation(
                    "publicKey[0].owner can only be changed by an ownership transfer".into(),
                ));
            }
        }

        let meta = single_metadata_service(&mut doc)?;
        let has_curation = meta
            .attributes
            .as_ref()
            .is_some_and(|a| a.contains_key("curation"));
        if !has_curation {
            if let Some(existing) = current.metadata_service().and_then(Service::curation) {
                meta.set_curation(&existing);
            }
        } else if let Some(mut curation) = meta.curation() {
            curation.rating = round_rating(curation.rating);
            meta.set_curation(&curation);
        }

        self.normalize(&mut doc, PublishDate::Keep)?;

        let prior = current.updated.as_deref();
        let next = next_timestamp(prior);
        doc.updated = Some(if next < doc.created {
            doc.created.clone()
        } else {
            next
        });

        self.store.put(doc.clone(), prior).await?;

        info!(did = %did, "asset replaced");
        Ok(FullUpdateOutcome {
            document: doc,
            created: false,
        })
    }

    // ---------- transfer ownership ----------

    pub async fn transfer_ownership(
        &self,
        did: &str,
        request: TransferOwnershipRequest,
    ) -> Result<DidDocument, AppError> {
        if !is_valid_address(&request.new_owner) {
            return Err(AppError::Validation(format!(
                "invalid newOwner address: {}",
                request.new_owner
            )));
        }

        let new_owner = request.new_owner;
        let doc = self
            .mutate(did, &request.proof, Signer::Owner, "ownership transferred", |doc| {
                if doc
                    .owner()
                    .is_some_and(|owner| addresses_equal(owner, &new_owner))
                {
                    return Err(AppError::Validation(
                        "newOwner must differ from the current owner".into(),
                    ));
                }
                doc.set_owner(new_owner.clone());
                Ok(())
            })
            .await?;
        info!(did = %did, owner = %new_owner, "new owner recorded");
        Ok(doc)
    }

    // ---------- ratings ----------

    pub async fn update_rating(
        &self,
        did: &str,
        request: RatingUpdateRequest,
    ) -> Result<DidDocument, AppError> {
        let rating = request.rating;
        if !rating.is_finite() || !(0.0..=5.0).contains(&rating) {
            return Err(AppError::Validation(format!(
                "rating must be between 0 and 5, got {rating}"
            )));
        }
        let num_votes = request.num_votes;

        self.mutate(did, &request.proof, Signer::AllowedUpdater, "rating updated", |doc| {
            let meta = single_metadata_service(doc)?;
            let mut curation = meta.curation().unwrap_or_default();
            if num_votes < curation.num_votes {
                return Err(AppError::Validation(format!(
                    "numVotes cannot decrease (stored {}, got {num_votes})",
                    curation.num_votes
                )));
            }
            curation.rating = round_rating(rating);
            curation.num_votes = num_votes;
            meta.set_curation(&curation);
            Ok(())
        })
        .await
    }

    // ---------- whitelist ----------

    pub async fn add_to_whitelist(
        &self,
        did: &str,
        request: WhitelistRequest,
    ) -> Result<DidDocument, AppError> {
        let address = valid_whitelist_address(&request.address)?;
        self.mutate(did, &request.proof, Signer::Owner, "whitelist entry added", |doc| {
            if doc
                .access_white_list
                .iter()
                .any(|a| addresses_equal(a, &address))
            {
                return Err(AppError::Conflict(format!(
                    "{address} is already in the whitelist"
                )));
            }
            doc.access_white_list.push(address.clone());
            Ok(())
        })
        .await
    }

    pub async fn remove_from_whitelist(
        &self,
        did: &str,
        request: WhitelistRequest,
    ) -> Result<DidDocument, AppError> {
        let address = valid_whitelist_address(&request.address)?;
        self.mutate(did, &request.proof, Signer::Owner, "whitelist entry removed", |doc| {
            let Some(pos) = doc
                .access_white_list
                .iter()
                .position(|a| addresses_equal(a, &address))
            else {
                return Err(AppError::Conflict(format!(
                    "{address} is not in the whitelist"
                )));
            };
            doc.access_white_list.remove(pos);
            Ok(())
        })
        .await
    }

    // ---------- partial metadata update ----------

    /// Selectively overwrite name, description, links and per-service
    /// prices. Malformed link or price entries are dropped, not fatal.
    pub async fn update_metadata(
        &self,
        did: &str,
        request: MetadataUpdateRequest,
    ) -> Result<DidDocument, AppError> {
        let links: Vec<Value> = request
            .links
            .unwrap_or_default()
            .into_iter()
            .filter(|link| serde_json::from_value::<Link>(link.clone()).is_ok())
            .collect();
        let prices: Vec<ServicePrice> = request
            .service_prices
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect();

        if self.policy.allow_free_assets_only && prices.iter().any(|p| p.price != FREE_PRICE) {
            warn!(did = %did, "priced asset refused by marketplace policy");
            return Err(priced_asset_error());
        }

        let title = request.title;
        let description = request.description;
        self.mutate(did, &request.proof, Signer::Owner, "metadata updated", |doc| {
            let meta = single_metadata_service(doc)?;
            if let Some(title) = title
                && let Some(main) = meta.main_mut()
            {
                main.insert("name".into(), Value::String(title));
            }
            if let Some(info) = meta.additional_information_mut() {
                if let Some(description) = description {
                    info.insert("description".into(), Value::String(description));
                }
                if !links.is_empty() {
                    info.insert("links".into(), Value::Array(links));
                }
            }

            // serviceIndex is a position in the stored, reordered list.
            for price in &prices {
                let service = usize::try_from(price.service_index)
                    .ok()
                    .and_then(|pos| doc.service.get_mut(pos));
                if let Some(main) = service.and_then(|s| s.main_mut()) {
                    main.insert("price".into(), Value::String(price.price.clone()));
                }
            }

            self.check_metadata(doc)
        })
        .await
    }

    // ---------- retire ----------

    /// Hard-delete a document. Administrative callers skip the signature
    /// check.
    pub async fn retire(
        &self,
        did: &str,
        proof: Option<SignedRequest>,
        capability: Capability,
    ) -> Result<(), AppError> {
        // The owner path deletes only the revision it authorized against.
        let expected = if capability.is_admin() {
            None
        } else {
            let proof = proof.ok_or_else(|| {
                AppError::Validation("\"updated\" and \"signature\" are required to retire".into())
            })?;
            parse_timestamp(&proof.updated)?;
            let current = self.store.get(did).await?;
            self.authorize(&current, &proof, Signer::Owner).await?;
            current.updated
        };

        self.store.delete(did, expected.as_deref()).await?;
        info!(did = %did, admin = capability.is_admin(), "asset retired");
        Ok(())
    }

    /// Delete every document. Returns how many were removed.
    pub async fn retire_all(&self, capability: Capability) -> Result<usize, AppError> {
        self.gate.require_admin(capability, "retire all assets")?;

        let mut removed = 0;
        for doc in self.store.list_all().await? {
            match self.store.delete(&doc.id, None).await {
                Ok(()) => removed += 1,
                // Already gone through a concurrent retire.
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!(count = removed, "all assets retired");
        Ok(removed)
    }

    // ---------- reads ----------

    pub async fn get(&self, did: &str) -> Result<DidDocument, AppError> {
        self.store.get(did).await
    }

    pub async fn get_metadata(&self, did: &str) -> Result<Service, AppError> {
        let doc = self.store.get(did).await?;
        doc.metadata_service()
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("no metadata service for {did}")))
    }

    /// Documents whose curation does not mark them unlisted.
    pub async fn list_listed(&self) -> Result<Vec<DidDocument>, AppError> {
        let docs = self.store.list_all().await?;
        Ok(docs.into_iter().filter(DidDocument::is_listed).collect())
    }

    pub async fn query(&self, model: QueryModel) -> Result<PaginatedResponse, AppError> {
        let page = model.page;
        let page_size = model.page_size;
        let hits = self.store.query(model).await?;

        let results = hits
            .hits
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(total = hits.total, page, "query executed");

        Ok(PaginatedResponse {
            results,
            page,
            total_pages: hits.total.div_ceil(page_size),
            total_results: hits.total,
        })
    }

    /// Validate a whole document without storing it.
    pub fn validate(&self, document: &Value) -> Vec<ValidationIssue> {
        self.schema.list_errors(SchemaMode::Local, document)
    }

    // ---------- internals ----------

    async fn authorize(
        &self,
        current: &DidDocument,
        proof: &SignedRequest,
        signer: Signer,
    ) -> Result<(), AppError> {
        let authorized = match signer {
            Signer::Owner => {
                self.gate
                    .authorize_as_owner(current, &proof.updated, &proof.signature)
                    .await?
            }
            Signer::AllowedUpdater => {
                self.gate
                    .authorize_as_allowed_updater(current, &proof.updated, &proof.signature)
                    .await?
            }
        };
        if authorized {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "not allowed to update {}",
                current.id
            )))
        }
    }

    /// Load, authorize, transform, reorder and conditionally persist.
    async fn mutate<F>(
        &self,
        did: &str,
        proof: &SignedRequest,
        signer: Signer,
        action: &'static str,
        apply: F,
    ) -> Result<DidDocument, AppError>
    where
        F: FnOnce(&mut DidDocument) -> Result<(), AppError>,
    {
        parse_timestamp(&proof.updated)?;
        let current = self.store.get(did).await?;
        self.authorize(&current, proof, signer).await?;

        let mut doc = current.clone();
        apply(&mut doc)?;
        doc.service = reorder_services(std::mem::take(&mut doc.service));

        let prior = current.updated.as_deref();
        doc.updated = Some(next_timestamp(prior));
        self.store.put(doc.clone(), prior).await?;

        info!(did = %did, action, "asset updated");
        Ok(doc)
    }

    /// Canonicalize a submitted document and run every content check that
    /// Create and FullUpdate share.
    fn normalize(&self, doc: &mut DidDocument, publish: PublishDate) -> Result<(), AppError> {
        doc.created = format_timestamp(&doc.created)?;

        match doc.owner() {
            Some(owner) if is_valid_address(owner) => {}
            _ => {
                return Err(AppError::Validation(
                    "publicKey[0].owner must be a valid address".into(),
                ));
            }
        }

        let allow_free_only = self.policy.allow_free_assets_only;
        let meta = single_metadata_service(doc)?;
        if meta.files_contain_urls() {
            return Err(AppError::Validation("url is not allowed in files".into()));
        }
        if allow_free_only && meta.price().is_some_and(|p| p != FREE_PRICE) {
            warn!(did = %doc.id, "priced asset refused by marketplace policy");
            return Err(priced_asset_error());
        }

        let meta = single_metadata_service(doc)?;
        if let Some(main) = meta.main_mut() {
            canonicalize_date(main, "dateCreated")?;
            match publish {
                PublishDate::Now => {
                    main.insert("datePublished".into(), Value::String(get_timestamp()));
                }
                PublishDate::Keep => canonicalize_date(main, "datePublished")?,
            }
        }

        doc.service = reorder_services(std::mem::take(&mut doc.service));
        self.check_metadata(doc)
    }

    fn check_metadata(&self, doc: &DidDocument) -> Result<(), AppError> {
        let attributes = doc
            .metadata_service()
            .and_then(|s| s.attributes.clone())
            .map(Value::Object)
            .unwrap_or(Value::Null);
        self.schema.check(SchemaMode::Remote, &attributes).inspect_err(|_| {
            warn!(did = %doc.id, "metadata attributes failed schema validation");
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum PublishDate {
    Now,
    Keep,
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

fn into_object(payload: Value) -> Result<Map<String, Value>, AppError> {
    match payload {
        Value::Object(map) if !map.is_empty() => Ok(map),
        Value::Object(_) => Err(AppError::Validation("payload seems empty".into())),
        _ => Err(AppError::Validation("payload must be a JSON object".into())),
    }
}

fn require_attributes(raw: &Map<String, Value>) -> Result<(), AppError> {
    let doc = Value::Object(raw.clone());
    match missing_attributes(&doc).first() {
        Some(attr) => Err(AppError::Validation(format!("\"{attr}\" is required"))),
        None => Ok(()),
    }
}

fn parse_document(raw: Map<String, Value>) -> Result<DidDocument, AppError> {
    serde_json::from_value(Value::Object(raw))
        .map_err(|e| AppError::Validation(format!("malformed document: {e}")))
}

/// Pull the `(updated, signature)` proof out of a full-update payload. The
/// submitted `updated` is only the signed message and is never stored.
fn take_proof(raw: &mut Map<String, Value>) -> Result<SignedRequest, AppError> {
    let mut field = |name: &str| match raw.remove(name) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(AppError::Validation(format!("\"{name}\" is required"))),
    };
    let updated = field("updated")?;
    let signature = field("signature")?;
    parse_timestamp(&updated)?;
    Ok(SignedRequest { updated, signature })
}

/// Keep a submitted whitelist only if every entry is a valid address,
/// dropping repeated addresses.
fn sanitize_whitelist(value: Option<Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let mut whitelist: Vec<String> = Vec::with_capacity(items.len());
    for item in &items {
        let Some(address) = item.as_str().filter(|a| is_valid_address(a)) else {
            return Vec::new();
        };
        if !whitelist.iter().any(|a| addresses_equal(a, address)) {
            whitelist.push(address.to_string());
        }
    }
    whitelist
}

fn valid_whitelist_address(address: &str) -> Result<String, AppError> {
    if is_valid_address(address) {
        Ok(address.to_string())
    } else {
        Err(AppError::Validation(format!("invalid address: {address}")))
    }
}

fn single_metadata_service(doc: &mut DidDocument) -> Result<&mut Service, AppError> {
    match doc.service.iter().filter(|s| s.is_metadata()).count() {
        1 => {}
        0 => return Err(AppError::Validation("document has no metadata service".into())),
        _ => {
            return Err(AppError::Validation(
                "document has more than one metadata service".into(),
            ));
        }
    }
    doc.metadata_service_mut()
        .ok_or_else(|| AppError::Internal("metadata service vanished".into()))
}

fn canonicalize_date(main: &mut Map<String, Value>, field: &str) -> Result<(), AppError> {
    if let Some(Value::String(date)) = main.get(field) {
        let canonical = format_timestamp(date)?;
        main.insert(field.to_string(), Value::String(canonical));
    }
    Ok(())
}

fn priced_asset_error() -> AppError {
    AppError::Validation("Priced assets are not supported in this marketplace".into())
}
