//! DID Document (DDO) data model.
//!
//! The outer document shape is typed. The metadata service's `attributes`
//! stay a JSON object because their structure is governed by the metadata
//! JSON schema, not by this crate; typed accessors cover the parts the
//! registry itself reads or rewrites (`main`, `curation`, links).

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DdoError, Result};

/// Canonical timestamp layout: UTC, second precision, literal `Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// `type` of the service carrying the asset's descriptive attributes.
pub const METADATA_SERVICE: &str = "metadata";

/// Top-level keys a submitted document must carry.
pub const REQUIRED_ATTRIBUTES: [&str; 7] = [
    "@context",
    "created",
    "id",
    "publicKey",
    "authentication",
    "proof",
    "service",
];

// ---------------------------------------------------------------------------
// Document types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: Value,
    pub id: String,
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(rename = "publicKey")]
    pub public_key: Vec<PublicKey>,
    pub authentication: Value,
    pub proof: Value,
    pub service: Vec<Service>,
    #[serde(rename = "accesssWhiteList", default)]
    pub access_white_list: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curation {
    pub rating: f64,
    pub num_votes: u64,
    #[serde(default = "default_true")]
    pub is_listed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Default for Curation {
    fn default() -> Self {
        Self {
            rating: 0.0,
            num_votes: 0,
            is_listed: true,
            extra: Map::new(),
        }
    }
}

/// Entry of `additionalInformation.links`. All three fields must be strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

impl DidDocument {
    /// The authoritative owner address, `publicKey[0].owner`.
    pub fn owner(&self) -> Option<&str> {
        self.public_key.first().and_then(|k| k.owner.as_deref())
    }

    pub fn set_owner(&mut self, owner: String) {
        match self.public_key.first_mut() {
            Some(key) => key.owner = Some(owner),
            None => self.public_key.push(PublicKey {
                owner: Some(owner),
                rest: Map::new(),
            }),
        }
    }

    pub fn metadata_service(&self) -> Option<&Service> {
        self.service.iter().find(|s| s.is_metadata())
    }

    pub fn metadata_service_mut(&mut self) -> Option<&mut Service> {
        self.service.iter_mut().find(|s| s.is_metadata())
    }

    /// Listed unless the curation block explicitly says otherwise.
    pub fn is_listed(&self) -> bool {
        self.metadata_service()
            .and_then(|s| s.attributes.as_ref())
            .and_then(|a| a.get("curation"))
            .and_then(|c| c.get("isListed"))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

impl Service {
    pub fn is_metadata(&self) -> bool {
        self.kind == METADATA_SERVICE
    }

    pub fn main(&self) -> Option<&Map<String, Value>> {
        self.attributes.as_ref()?.get("main")?.as_object()
    }

    pub fn main_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.attributes.as_mut()?.get_mut("main")?.as_object_mut()
    }

    /// `attributes.additionalInformation`, created empty when absent or not
    /// an object.
    pub fn additional_information_mut(&mut self) -> Option<&mut Map<String, Value>> {
        let entry = self
            .attributes
            .get_or_insert_with(Map::new)
            .entry("additionalInformation")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut()
    }

    pub fn curation(&self) -> Option<Curation> {
        let value = self.attributes.as_ref()?.get("curation")?;
        serde_json::from_value(value.clone()).ok()
    }

    pub fn set_curation(&mut self, curation: &Curation) {
        let value = serde_json::to_value(curation).unwrap_or(Value::Null);
        self.attributes
            .get_or_insert_with(Map::new)
            .insert("curation".to_string(), value);
    }

    /// The decimal-string `main.price`, if any.
    pub fn price(&self) -> Option<&str> {
        self.main()?.get("price")?.as_str()
    }

    /// True when any entry of `main.files` exposes a raw `url`.
    pub fn files_contain_urls(&self) -> bool {
        self.main()
            .and_then(|m| m.get("files"))
            .and_then(Value::as_array)
            .is_some_and(|files| files.iter().any(|f| f.get("url").is_some()))
    }
}

/// Required top-level keys absent from a submitted document.
pub fn missing_attributes(doc: &Value) -> Vec<&'static str> {
    REQUIRED_ATTRIBUTES
        .iter()
        .copied()
        .filter(|attr| doc.get(attr).is_none())
        .collect()
}

// ---------------------------------------------------------------------------
// Service ordering
// ---------------------------------------------------------------------------

/// Stable partition: metadata services first, everything else after, both
/// groups keeping their relative order.
pub fn reorder_services(services: Vec<Service>) -> Vec<Service> {
    let (mut ordered, rest): (Vec<_>, Vec<_>) =
        services.into_iter().partition(Service::is_metadata);
    ordered.extend(rest);
    ordered
}

// ---------------------------------------------------------------------------
// Timestamps and ratings
// ---------------------------------------------------------------------------

/// Current UTC time in the canonical format.
pub fn get_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|t| t.and_utc())
        .map_err(|_| DdoError::InvalidTimestamp(s.to_string()))
}

/// Re-render a timestamp canonically. Anything not matching
/// [`TIMESTAMP_FORMAT`] exactly is rejected rather than truncated.
pub fn format_timestamp(s: &str) -> Result<String> {
    Ok(parse_timestamp(s)?.format(TIMESTAMP_FORMAT).to_string())
}

/// Timestamp for a document whose current `updated` is `prior`: now, or one
/// second past `prior` when the clock has not moved beyond it. Successive
/// writes to one document therefore never reuse an `updated` value.
pub fn next_timestamp(prior: Option<&str>) -> String {
    let now = Utc::now().trunc_subsecs(0);
    let next = match prior.and_then(|p| parse_timestamp(p).ok()) {
        Some(prior) if now <= prior => prior + Duration::seconds(1),
        _ => now,
    };
    next.format(TIMESTAMP_FORMAT).to_string()
}

/// Round to one decimal place, working from the exact binary value
/// (`2.45` is stored just above the tie and becomes `2.5`).
pub fn round_rating(rating: f64) -> f64 {
    format!("{rating:.1}").parse().unwrap_or(rating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "@context": "https://w3id.org/did/v1",
            "id": "did:op:123",
            "created": "2020-01-01T00:00:00Z",
            "publicKey": [{"id": "did:op:123", "type": "EthereumECDSAKey",
                           "owner": "0x00Bd138aBD70e2F00903268F3Db08f2D25677C9e"}],
            "authentication": [{"type": "RsaSignatureAuthentication2018", "publicKey": "did:op:123"}],
            "proof": {"type": "DDOIntegritySignature", "creator": "0x00"},
            "service": [
                {"type": "access", "index": 0, "serviceEndpoint": "http://a"},
                {"type": "metadata", "index": 1, "attributes": {
                    "main": {"name": "n", "price": "10", "files": [{"index": 0}]},
                    "curation": {"rating": 3.0, "numVotes": 2}
                }}
            ]
        })
    }

    #[test]
    fn document_roundtrip_keeps_unknown_fields() {
        let mut value = sample();
        value["custom"] = json!({"k": 1});
        value["service"][0]["purchaseEndpoint"] = json!("http://b");
        let doc: DidDocument = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(doc.extra["custom"], json!({"k": 1}));
        assert!(doc.access_white_list.is_empty());

        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["custom"], value["custom"]);
        assert_eq!(back["service"][0]["purchaseEndpoint"], json!("http://b"));
        assert_eq!(back["accesssWhiteList"], json!([]));
        assert!(back.get("updated").is_none());
    }

    #[test]
    fn owner_and_metadata_accessors() {
        let mut doc: DidDocument = serde_json::from_value(sample()).unwrap();
        assert_eq!(doc.owner(), Some("0x00Bd138aBD70e2F00903268F3Db08f2D25677C9e"));
        doc.set_owner("0x1111111111111111111111111111111111111111".into());
        assert_eq!(doc.owner(), Some("0x1111111111111111111111111111111111111111"));
        assert_eq!(doc.public_key[0].rest["type"], json!("EthereumECDSAKey"));

        let meta = doc.metadata_service().unwrap();
        assert_eq!(meta.price(), Some("10"));
        assert!(!meta.files_contain_urls());
        let curation = meta.curation().unwrap();
        assert_eq!(curation.num_votes, 2);
        assert!(curation.is_listed);
        assert!(doc.is_listed());
    }

    #[test]
    fn files_with_urls_detected() {
        let mut value = sample();
        value["service"][1]["attributes"]["main"]["files"] = json!([{"url": "http://x"}]);
        let doc: DidDocument = serde_json::from_value(value).unwrap();
        assert!(doc.metadata_service().unwrap().files_contain_urls());
    }

    #[test]
    fn unlisted_documents() {
        let mut value = sample();
        value["service"][1]["attributes"]["curation"]["isListed"] = json!(false);
        let doc: DidDocument = serde_json::from_value(value).unwrap();
        assert!(!doc.is_listed());
    }

    #[test]
    fn missing_required_attributes() {
        let mut value = sample();
        assert!(missing_attributes(&value).is_empty());
        value.as_object_mut().unwrap().remove("proof");
        value.as_object_mut().unwrap().remove("@context");
        assert_eq!(missing_attributes(&value), vec!["@context", "proof"]);
    }

    #[test]
    fn metadata_service_moves_first() {
        let kinds = |services: &[Service]| -> Vec<(String, Option<i64>)> {
            services.iter().map(|s| (s.kind.clone(), s.index)).collect()
        };
        let services: Vec<Service> = serde_json::from_value(json!([
            {"type": "access", "index": 3},
            {"type": "authorization", "index": 0},
            {"type": "metadata", "index": 7},
            {"type": "compute", "index": 1}
        ]))
        .unwrap();
        let ordered = reorder_services(services);
        assert_eq!(
            kinds(&ordered),
            vec![
                ("metadata".to_string(), Some(7)),
                ("access".to_string(), Some(3)),
                ("authorization".to_string(), Some(0)),
                ("compute".to_string(), Some(1)),
            ]
        );
        assert_eq!(reorder_services(ordered.clone()), ordered);
    }

    #[test]
    fn curation_defaults() {
        let c: Curation = serde_json::from_value(json!({"rating": 1.5, "numVotes": 4})).unwrap();
        assert!(c.is_listed);
        assert_eq!(
            serde_json::to_value(Curation::default()).unwrap(),
            json!({"rating": 0.0, "numVotes": 0, "isListed": true})
        );
    }

    #[test]
    fn additional_information_created_on_demand() {
        let mut service: Service =
            serde_json::from_value(json!({"type": "metadata", "attributes": {"main": {}}})).unwrap();
        service
            .additional_information_mut()
            .unwrap()
            .insert("description".into(), json!("d"));
        assert_eq!(
            service.attributes.unwrap()["additionalInformation"],
            json!({"description": "d"})
        );
    }

    #[test]
    fn link_requires_string_fields() {
        assert!(serde_json::from_value::<Link>(json!({"name": "x", "url": "http://a", "type": "sample"})).is_ok());
        assert!(serde_json::from_value::<Link>(json!({"name": "bad"})).is_err());
        assert!(serde_json::from_value::<Link>(json!({"name": 1, "url": "u", "type": "t"})).is_err());
    }

    #[test]
    fn timestamp_format_is_strict() {
        assert_eq!(format_timestamp("2020-01-01T00:00:00Z").unwrap(), "2020-01-01T00:00:00Z");
        assert!(format_timestamp("2020-01-01T00:00:00.123Z").is_err());
        assert!(format_timestamp("2020-01-01 00:00:00").is_err());
        assert!(format_timestamp("2020-01-01T00:00:00+00:00").is_err());
        assert!(matches!(
            format_timestamp("yesterday"),
            Err(DdoError::InvalidTimestamp(_))
        ));
        assert!(parse_timestamp(&get_timestamp()).is_ok());
    }

    #[test]
    fn next_timestamp_is_strictly_increasing() {
        let future = "2999-01-01T00:00:00Z";
        assert_eq!(next_timestamp(Some(future)), "2999-01-01T00:00:01Z");

        let past = "2000-01-01T00:00:00Z";
        let next = next_timestamp(Some(past));
        assert!(parse_timestamp(&next).unwrap() > parse_timestamp(past).unwrap());
        assert!(parse_timestamp(&next_timestamp(None)).is_ok());
    }

    #[test]
    fn ratings_round_to_one_decimal() {
        assert_eq!(round_rating(2.449), 2.4);
        assert_eq!(round_rating(2.45), 2.5);
        assert_eq!(round_rating(5.0), 5.0);
        assert_eq!(round_rating(0.0), 0.0);
    }
}
