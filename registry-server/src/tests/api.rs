use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::fixtures::*;
use crate::server::{self, AppState};
use crate::store::{MemoryStore, Store};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const DID: &str = "did:op:8d1b4d73e7af4634958f071ab8dfe7ab0df14019755e444090fd392c8ec9c3f4";

struct TestEnv {
    app: axum::Router,
    memory: Arc<MemoryStore>,
}

fn setup() -> TestEnv {
    let config = test_config();
    let memory = Arc::new(MemoryStore::new());
    let store = Store::new(memory.clone(), config.store.timeout());
    let state = AppState::new(&config, store).unwrap();
    TestEnv {
        app: server::app(state),
        memory,
    }
}

fn request(method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(request(method, uri, body, None))
        .await
        .unwrap()
}

async fn send_as_admin(
    app: &axum::Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(request(method, uri, body, Some(ADMIN_TOKEN)))
        .await
        .unwrap()
}

async fn json_body(resp: axum::http::Response<Body>) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register(app: &axum::Router, did: &str) {
    let resp = send(app, Method::POST, "/assets/ddo", Some(sample_ddo(did, &owner_address()))).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

fn proof_body(key: &k256::ecdsa::SigningKey, extra: Value) -> Value {
    let proof = signed(key, SIGNED_AT);
    let mut body = extra;
    body["updated"] = json!(proof.updated);
    body["signature"] = json!(proof.signature);
    body
}

// ===========================================================================
// Health and reads
// ===========================================================================

#[tokio::test]
async fn health_reports_version() {
    let env = setup();
    let resp = send(&env.app, Method::GET, "/health", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn unknown_did_returns_404() {
    let env = setup();
    let resp = send(&env.app, Method::GET, &format!("/assets/ddo/{DID}"), None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(json_body(resp).await["error"].is_string());

    let resp = send(&env.app, Method::GET, &format!("/assets/metadata/{DID}"), None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listings_cover_registered_assets() {
    let env = setup();
    register(&env.app, DID).await;
    register(&env.app, "did:op:second").await;

    let resp = send(&env.app, Method::GET, "/assets", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["ids"], json!(["did:op:8d1b4d73e7af4634958f071ab8dfe7ab0df14019755e444090fd392c8ec9c3f4", "did:op:second"]));

    let resp = send(&env.app, Method::GET, "/assets/ddo", None).await;
    let body = json_body(resp).await;
    assert_eq!(body.as_object().unwrap().len(), 2);
    assert_eq!(body[DID]["id"], DID);

    let resp = send(&env.app, Method::GET, &format!("/assets/metadata/{DID}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["type"], "metadata");
}

// ===========================================================================
// Create
// ===========================================================================

#[tokio::test]
async fn create_returns_201_and_stores_document() {
    let env = setup();
    let resp = send(
        &env.app,
        Method::POST,
        "/assets/ddo",
        Some(sample_ddo(DID, &owner_address())),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = json_body(resp).await;
    assert_eq!(created["service"][0]["type"], "metadata");
    assert_eq!(created["updated"], created["created"]);

    let resp = send(&env.app, Method::GET, &format!("/assets/ddo/{DID}"), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, created);
}

#[tokio::test]
async fn create_duplicate_returns_409() {
    let env = setup();
    register(&env.app, DID).await;
    let resp = send(
        &env.app,
        Method::POST,
        "/assets/ddo",
        Some(sample_ddo(DID, &owner_address())),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_json_returns_400() {
    let env = setup();
    let req = Request::builder()
        .method(Method::POST)
        .uri("/assets/ddo")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = env.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(resp).await["error"].is_string());
}

#[tokio::test]
async fn schema_failure_lists_issues() {
    let env = setup();
    let mut payload = sample_ddo(DID, &owner_address());
    payload["service"][1]["attributes"]["main"]["type"] = json!("spreadsheet");
    let resp = send(&env.app, Method::POST, "/assets/ddo", Some(payload)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    let errors = body["errors"].as_array().unwrap();
    assert!(errors.iter().any(|e| e["path"] == "main/type"));
    assert_eq!(env.memory.write_count(), 0);
}

// ===========================================================================
// Full update and administrative capability
// ===========================================================================

#[tokio::test]
async fn full_update_by_owner_returns_200() {
    let env = setup();
    register(&env.app, DID).await;

    let mut payload = sample_ddo(DID, &owner_address());
    payload["service"][1]["attributes"]["main"]["name"] = json!("Daily weather");
    sign_payload(&mut payload, &owner_key());
    let resp = send(&env.app, Method::PUT, &format!("/assets/ddo/{DID}"), Some(payload)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["service"][0]["attributes"]["main"]["name"], "Daily weather");
    assert!(body.get("signature").is_none());
}

#[tokio::test]
async fn full_update_by_intruder_returns_401_without_writing() {
    let env = setup();
    register(&env.app, DID).await;
    let writes = env.memory.write_count();

    let mut payload = sample_ddo(DID, &owner_address());
    sign_payload(&mut payload, &intruder_key());
    let resp = send(&env.app, Method::PUT, &format!("/assets/ddo/{DID}"), Some(payload)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(env.memory.write_count(), writes);
}

#[tokio::test]
async fn full_update_creates_only_for_admin() {
    let env = setup();
    let payload = sample_ddo(DID, &owner_address());
    let uri = format!("/assets/ddo/{DID}");

    let resp = send(&env.app, Method::PUT, &uri, Some(payload.clone())).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = send_as_admin(&env.app, Method::PUT, &uri, Some(payload)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn wrong_admin_token_returns_401() {
    let env = setup();
    let resp = env
        .app
        .clone()
        .oneshot(request(Method::DELETE, "/assets/ddo", None, Some("nope")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .method(Method::DELETE)
        .uri("/assets/ddo")
        .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    let resp = env.app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// Signed mutations
// ===========================================================================

#[tokio::test]
async fn transfer_ownership_lifecycle() {
    let env = setup();
    register(&env.app, DID).await;
    let uri = format!("/assets/ddo/owner/update/{DID}");

    let body = proof_body(&owner_key(), json!({"newOwner": intruder_address()}));
    let resp = send(&env.app, Method::PUT, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json_body(resp).await["publicKey"][0]["owner"],
        json!(intruder_address())
    );

    // The previous owner's proof no longer counts.
    let body = proof_body(&owner_key(), json!({"newOwner": owner_address()}));
    let resp = send(&env.app, Method::PUT, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rating_update_by_allowed_updater() {
    let env = setup();
    register(&env.app, DID).await;
    let uri = format!("/assets/ddo/ratings/update/{DID}");

    let body = proof_body(&updater_key(), json!({"rating": 4.26, "numVotes": 3}));
    let resp = send(&env.app, Method::PUT, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let curation = &json_body(resp).await["service"][0]["attributes"]["curation"];
    assert_eq!(curation["rating"], json!(4.3));
    assert_eq!(curation["numVotes"], json!(3));

    let body = proof_body(&owner_key(), json!({"rating": 1.0, "numVotes": 4}));
    let resp = send(&env.app, Method::PUT, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body = json!({"rating": "high", "numVotes": 4, "updated": SIGNED_AT, "signature": "0x"});
    let resp = send(&env.app, Method::PUT, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn whitelist_add_and_remove() {
    let env = setup();
    register(&env.app, DID).await;
    let uri = format!("/assets/ddo/accesssWhiteList/{DID}");
    let address = "0x4444444444444444444444444444444444444444";

    let body = proof_body(&owner_key(), json!({"address": address}));
    let resp = send(&env.app, Method::POST, &uri, Some(body.clone())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["accesssWhiteList"], json!([address]));

    let resp = send(&env.app, Method::POST, &uri, Some(body.clone())).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = send(&env.app, Method::DELETE, &uri, Some(body.clone())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["accesssWhiteList"], json!([]));

    let resp = send(&env.app, Method::DELETE, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn partial_metadata_update() {
    let env = setup();
    register(&env.app, DID).await;
    let uri = format!("/assets/ddo/metadata/update/{DID}");

    let body = proof_body(
        &owner_key(),
        json!({"title": "Renamed", "servicePrices": [{"serviceIndex": 1, "price": "5"}]}),
    );
    let resp = send(&env.app, Method::PUT, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let doc = json_body(resp).await;
    assert_eq!(doc["service"][0]["attributes"]["main"]["name"], "Renamed");
    assert_eq!(doc["service"][1]["attributes"]["main"]["price"], "5");

    let body = json!({"title": "Unsigned"});
    let resp = send(&env.app, Method::PUT, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_updated_returns_400_without_writing() {
    let env = setup();
    register(&env.app, DID).await;
    let writes = env.memory.write_count();

    let proof = signed(&owner_key(), "yesterday");
    let with_proof = |mut body: Value| {
        body["updated"] = json!(proof.updated);
        body["signature"] = json!(proof.signature);
        body
    };

    let cases = [
        (Method::PUT, format!("/assets/ddo/{DID}"), with_proof(sample_ddo(DID, &owner_address()))),
        (
            Method::PUT,
            format!("/assets/ddo/owner/update/{DID}"),
            with_proof(json!({"newOwner": intruder_address()})),
        ),
        (
            Method::POST,
            format!("/assets/ddo/accesssWhiteList/{DID}"),
            with_proof(json!({"address": intruder_address()})),
        ),
        (
            Method::PUT,
            format!("/assets/ddo/metadata/update/{DID}"),
            with_proof(json!({"title": "Renamed"})),
        ),
        (Method::DELETE, format!("/assets/ddo/{DID}"), with_proof(json!({}))),
    ];
    for (method, uri, body) in cases {
        let resp = send(&env.app, method, &uri, Some(body)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert!(json_body(resp).await["error"].is_string());
    }

    assert_eq!(env.memory.write_count(), writes);
    let resp = send(&env.app, Method::GET, &format!("/assets/ddo/{DID}"), None).await;
    assert_eq!(json_body(resp).await["publicKey"][0]["owner"], json!(owner_address()));
}

// ===========================================================================
// Retire
// ===========================================================================

#[tokio::test]
async fn retire_by_owner() {
    let env = setup();
    register(&env.app, DID).await;
    let uri = format!("/assets/ddo/{DID}");

    let resp = send(&env.app, Method::DELETE, &uri, None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = proof_body(&intruder_key(), json!({}));
    let resp = send(&env.app, Method::DELETE, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body = proof_body(&owner_key(), json!({}));
    let resp = send(&env.app, Method::DELETE, &uri, Some(body)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = send(&env.app, Method::GET, &uri, None).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Re-registration after retirement is allowed.
    register(&env.app, DID).await;
    let resp = send_as_admin(&env.app, Method::DELETE, &uri, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn retire_all_requires_admin() {
    let env = setup();
    register(&env.app, DID).await;
    register(&env.app, "did:op:second").await;

    let resp = send(&env.app, Method::DELETE, "/assets/ddo", None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = send(&env.app, Method::GET, "/assets", None).await;
    assert_eq!(json_body(resp).await["ids"].as_array().unwrap().len(), 2);

    let resp = send_as_admin(&env.app, Method::DELETE, "/assets/ddo", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["retired"], 2);
    let resp = send(&env.app, Method::GET, "/assets", None).await;
    assert_eq!(json_body(resp).await["ids"], json!([]));
}

// ===========================================================================
// Query and validate
// ===========================================================================

#[tokio::test]
async fn text_query_paginates() {
    let env = setup();
    register(&env.app, DID).await;
    register(&env.app, "did:op:second").await;

    let resp = send(
        &env.app,
        Method::GET,
        "/assets/ddo/query?text=WEATHER&offset=1&page=2",
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["total_results"], 2);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["page"], 2);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);

    let resp = send(&env.app, Method::GET, "/assets/ddo/query?sort=notjson", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn structured_query_filters_fields() {
    let env = setup();
    register(&env.app, DID).await;

    let body = json!({"query": {"price": [5, 20], "type": ["dataset", "algorithm"]}});
    let resp = send(&env.app, Method::POST, "/assets/ddo/query", Some(body)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["total_results"], 1);

    let body = json!({"query": {"price": [0, 1]}});
    let resp = send(&env.app, Method::POST, "/assets/ddo/query", Some(body)).await;
    assert_eq!(json_body(resp).await["total_results"], 0);
}

#[tokio::test]
async fn validate_endpoint() {
    let env = setup();
    let resp = send(
        &env.app,
        Method::POST,
        "/assets/ddo/validate",
        Some(sample_ddo(DID, &owner_address())),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!(true));

    let mut invalid = sample_ddo(DID, &owner_address());
    invalid.as_object_mut().unwrap().remove("created");
    let resp = send(&env.app, Method::POST, "/assets/ddo/validate", Some(invalid)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let issues = json_body(resp).await;
    assert!(issues.as_array().unwrap().iter().all(|i| i["path"].is_string()));
    assert_eq!(env.memory.write_count(), 0);
}
