//! Waitlist integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::{json, Value};

#[tokio::test]
async fn joining_twice_is_idempotent() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/api/waitlist")
        .json(&json!({ "email": "Hopeful@Example.com", "failedCode": "123456" }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["success"], true);

    let response = harness
        .server
        .post("/api/waitlist")
        .json(&json!({ "email": "hopeful@example.com" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"], "Email already on waitlist");
}

#[tokio::test]
async fn email_is_required_and_checked() {
    let harness = TestHarness::new();

    let response = harness.server.post("/api/waitlist").json(&json!({})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "MISSING_EMAIL");

    let response = harness
        .server
        .post("/api/waitlist")
        .json(&json!({ "email": "nope" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "INVALID_EMAIL");
}
