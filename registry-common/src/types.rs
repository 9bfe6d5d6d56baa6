use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Proof of control
// ---------------------------------------------------------------------------

/// A caller-chosen `updated` timestamp and the signature over that literal
/// string. Carried by every owner- or updater-gated request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRequest {
    pub updated: String,
    pub signature: String,
}

// ---------------------------------------------------------------------------
// Mutation requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOwnershipRequest {
    pub new_owner: String,
    #[serde(flatten)]
    pub proof: SignedRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingUpdateRequest {
    pub rating: f64,
    pub num_votes: u64,
    #[serde(flatten)]
    pub proof: SignedRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistRequest {
    pub address: String,
    #[serde(flatten)]
    pub proof: SignedRequest,
}

/// Partial metadata update. `links` and `servicePrices` stay untyped per
/// entry so a malformed entry can be dropped without failing the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdateRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_prices: Option<Vec<Value>>,
    #[serde(flatten)]
    pub proof: SignedRequest,
}

/// Entry of `servicePrices`: a new decimal-string price for the service at
/// array position `serviceIndex` in the stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrice {
    pub service_index: i64,
    pub price: String,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Structured query body for `POST /assets/ddo/query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

/// Query string for `GET /assets/ddo/query`. `sort` is a JSON object
/// encoded as a string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextQueryParams {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub page: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse {
    pub results: Vec<Value>,
    pub page: usize,
    pub total_pages: usize,
    pub total_results: usize,
}

// ---------------------------------------------------------------------------
// Misc responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetIdsResponse {
    pub ids: Vec<String>,
}

/// One schema violation: `path` is the `/`-joined location inside the
/// validated object (empty for the root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
