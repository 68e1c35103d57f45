//! Shared harness for the HTTP integration tests.

#![allow(dead_code)] // Not every test file uses every helper

use axum_test::TestServer;
use serde_json::{json, Value};
use uuid::Uuid;

use kollab_backend::auth::jwt;
use kollab_backend::config::Config;
use kollab_backend::models::user::{NewUser, UserRole};
use kollab_backend::store::Store;
use kollab_backend::{app, AppState};

pub const JWT_SECRET: &str = "test-secret";

/// An account that exists in the store, with a session token minted for it.
pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

impl TestUser {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

pub struct TestHarness {
    pub server: TestServer,
    pub store: Store,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Store::memory();
        let config = Config {
            database_url: "memory://".into(),
            host: "127.0.0.1".into(),
            port: 0,
            jwt_secret: JWT_SECRET.into(),
            invite_allowance: 3,
        };

        let server = TestServer::new(app(AppState::new(store.clone(), config)))
            .expect("Failed to create test server");

        Self { server, store }
    }

    /// Seed an account directly, skipping password hashing.
    pub async fn user(&self, email: &str, role: UserRole) -> TestUser {
        let user = self
            .store
            .create_user(&NewUser {
                email: email.to_string(),
                password_hash: "unused".into(),
                role,
            })
            .await
            .expect("Failed to seed user");
        let token = jwt::create_token(user.id, &user.email, user.role, JWT_SECRET)
            .expect("Failed to mint token");
        TestUser { id: user.id, token }
    }

    /// Seed an account and create its creator profile through the API.
    pub async fn creator(&self, email: &str, display_name: &str) -> TestUser {
        let user = self.user(email, UserRole::Member).await;
        self.server
            .post("/api/profile")
            .add_header("authorization", user.bearer())
            .json(&json!({
                "displayName": display_name,
                "niche": "Photography",
                "avatarUrl": format!("https://cdn.example.com/{display_name}.png"),
            }))
            .await
            .assert_status(axum::http::StatusCode::CREATED);
        user
    }

    /// Generate `count` codes as `user` and return them.
    pub async fn generate(&self, user: &TestUser, count: u32) -> Vec<String> {
        let response = self
            .server
            .post("/api/invites/generate")
            .add_header("authorization", user.bearer())
            .json(&json!({ "count": count }))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        let body: Value = response.json();
        body["invites"]
            .as_array()
            .expect("invites array")
            .iter()
            .map(|i| i["code"].as_str().expect("code").to_string())
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
