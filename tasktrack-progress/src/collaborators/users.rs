//! User directory client

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Looks up display names by user id
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Display name of `user_id`, `None` when it cannot be resolved
    async fn display_name(&self, user_id: i64, token: Option<&str>) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    name: String,
}

/// `GET {base_url}/users/:id` on the user service, forwarding the caller's token
pub struct HttpUserDirectory {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn display_name(&self, user_id: i64, token: Option<&str>) -> Option<String> {
        let url = format!("{}/users/{}", self.base_url, user_id);
        debug!(url = %url, "Resolving user name");

        let mut request = self.http_client.get(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(user_id, status = %response.status(), "User lookup rejected");
                return None;
            }
            Err(e) => {
                warn!(user_id, error = %e, "User lookup failed");
                return None;
            }
        };

        match response.json::<UserResponse>().await {
            Ok(user) => Some(user.name),
            Err(e) => {
                warn!(user_id, error = %e, "User lookup returned an unexpected body");
                None
            }
        }
    }
}

/// Fixed id → name map, for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    names: HashMap<i64, String>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, user_id: i64, name: &str) -> Self {
        self.names.insert(user_id, name.to_string());
        self
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn display_name(&self, user_id: i64, _token: Option<&str>) -> Option<String> {
        self.names.get(&user_id).cloned()
    }
}
