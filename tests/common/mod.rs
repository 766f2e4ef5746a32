//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use formdesk::config::AppConfig;
use formdesk::{HttpServer, Shutdown, Store};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.admin.api_key = ADMIN_KEY.into();
    config.billing.webhook_secret = WEBHOOK_SECRET.into();
    config
}

/// A server bound to an ephemeral port. Shuts down on drop.
pub struct TestServer {
    pub base: String,
    pub client: Client,
    pub store: Arc<Store>,
    shutdown: Shutdown,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: AppConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let store = Arc::new(Store::new(None));
        let server = HttpServer::new(config, store.clone());
        let shutdown = Shutdown::new();
        let server_shutdown = shutdown.subscribe();
        let (_, config_updates) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let _ = server.run(listener, config_updates, server_shutdown).await;
        });

        let client = Client::builder().no_proxy().build().unwrap();
        Self {
            base: format!("http://{}", addr),
            client,
            store,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    /// A request carrying a customer identity.
    pub fn as_user(&self, method: reqwest::Method, path: &str, user_id: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("x-user-id", user_id)
    }

    pub fn as_admin(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(ADMIN_KEY)
    }

    /// Register a user and return its id.
    pub async fn sign_up(&self, email: &str) -> String {
        let res = self
            .post("/api/users")
            .json(&json!({ "email": email, "name": "Test User" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 201);
        let body: Value = res.json().await.unwrap();
        body["user"]["id"].as_str().unwrap().to_string()
    }

    /// Create a rating form with an optional comment field.
    pub async fn create_form(&self, user_id: &str, title: &str) -> reqwest::Response {
        self.as_user(reqwest::Method::POST, "/api/forms", user_id)
            .json(&json!({
                "title": title,
                "kind": "review",
                "fields": [
                    { "key": "rating", "label": "Rating", "field": { "type": "rating", "max": 5 }, "required": true },
                    { "key": "comment", "label": "Comment", "field": { "type": "long_text" }, "required": false }
                ]
            }))
            .send()
            .await
            .unwrap()
    }

    pub async fn create_form_id(&self, user_id: &str, title: &str) -> String {
        let res = self.create_form(user_id, title).await;
        assert_eq!(res.status(), 201);
        let body: Value = res.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}
