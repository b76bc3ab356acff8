//! Chiron RPC Client
//!
//! Typed handles for the remote services a Chiron session coordinates:
//! the per-worker manager and the orchestrator of a training run.
//!
//! The [`services`] module defines the contracts as async traits. This crate
//! also ships an HTTP implementation that invokes a remote method `m` of the
//! service `<workspace>/<client>:<service>` as
//! `POST {server}/{workspace}/services/{client}:{service}/{m}` with the
//! keyword arguments as a JSON body.
//!
//! # Example
//!
//! ```no_run
//! use chiron_client::{HttpServiceClient, ServiceBroker};
//!
//! #[tokio::main]
//! async fn main() -> chiron_client::Result<()> {
//!     let client = HttpServiceClient::new("https://hypha.example.org").with_token("secret");
//!
//!     for service_id in client.resolve_managers("acme").await? {
//!         let manager = client.manager(&service_id).await?;
//!         let info = manager.get_worker_info().await?;
//!         println!("{}: {} dataset(s)", service_id, info.datasets.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod manager;
mod orchestrator;
pub mod services;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use manager::HttpManagerService;
pub use orchestrator::HttpOrchestratorService;
pub use services::{
    ManagerService, OrchestratorService, Permission, ServiceBroker, TokenMinter, TokenRequest,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Name under which every worker registers its manager service
pub const MANAGER_SERVICE_NAME: &str = "chiron-manager";

/// HTTP client for remote service calls
///
/// Cheap to clone; the proxies it hands out share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    /// Base URL of the server (e.g., "https://hypha.example.org")
    base_url: String,
    /// Bearer token sent with every request
    token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl HttpServiceClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the server
    ///
    /// # Example
    /// ```
    /// use chiron_client::HttpServiceClient;
    ///
    /// let client = HttpServiceClient::new("http://localhost:9527");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
        }
    }

    /// Attach an access token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of `method` on the service with the given full id
    pub(crate) fn method_url(&self, service_id: &str, method: &str) -> Result<String> {
        let (workspace, service) = service_id.split_once('/').ok_or_else(|| {
            ClientError::InvalidRequest(format!(
                "service id '{}' is not of the form <workspace>/<client>:<service>",
                service_id
            ))
        })?;

        Ok(format!(
            "{}/{}/services/{}/{}",
            self.base_url, workspace, service, method
        ))
    }

    // =============================================================================
    // Remote Calls
    // =============================================================================

    /// Invoke a remote method and deserialize its return value
    pub(crate) async fn call<A, T>(&self, service_id: &str, method: &str, args: &A) -> Result<T>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.method_url(service_id, method)?;
        debug!("Calling {} on {}", method, service_id);

        let response = self.authorized(self.client.post(&url)).json(args).send().await?;

        self.handle_response(response).await
    }

    /// Invoke a remote method that returns nothing
    pub(crate) async fn call_unit<A>(&self, service_id: &str, method: &str, args: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        let url = self.method_url(service_id, method)?;
        debug!("Calling {} on {}", method, service_id);

        let response = self.authorized(self.client.post(&url)).json(args).send().await?;

        self.handle_empty_response(response).await
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle a response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status.as_u16() == 404 {
                return Err(ClientError::NotFound(error_text));
            }
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle a response that carries no return value
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status.as_u16() == 404 {
                return Err(ClientError::NotFound(error_text));
            }
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

/// Entry of a workspace service listing
#[derive(Debug, Deserialize)]
struct ServiceEntry {
    id: String,
}

/// Keeps the manager services from a listing, qualified with the workspace
fn manager_ids(workspace: &str, entries: Vec<ServiceEntry>) -> Vec<String> {
    let suffix = format!(":{}", MANAGER_SERVICE_NAME);
    entries
        .into_iter()
        .filter(|entry| entry.id.ends_with(&suffix))
        .map(|entry| {
            if entry.id.contains('/') {
                entry.id
            } else {
                format!("{}/{}", workspace, entry.id)
            }
        })
        .collect()
}

#[async_trait]
impl ServiceBroker for HttpServiceClient {
    async fn resolve_managers(&self, workspace: &str) -> Result<Vec<String>> {
        let url = format!("{}/{}/services", self.base_url, workspace);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let entries: Vec<ServiceEntry> = self.handle_response(response).await?;

        Ok(manager_ids(workspace, entries))
    }

    async fn manager(&self, service_id: &str) -> Result<Arc<dyn ManagerService>> {
        // Validates the id shape up front
        self.method_url(service_id, "get_worker_info")?;
        Ok(Arc::new(HttpManagerService::new(self.clone(), service_id)))
    }

    async fn orchestrator(&self, service_id: &str) -> Result<Arc<dyn OrchestratorService>> {
        self.method_url(service_id, "get_training_status")?;
        Ok(Arc::new(HttpOrchestratorService::new(
            self.clone(),
            service_id,
        )))
    }
}

#[derive(Debug, Serialize)]
struct GenerateTokenRequest<'a> {
    config: TokenConfig<'a>,
}

#[derive(Debug, Serialize)]
struct TokenConfig<'a> {
    workspace: &'a str,
    permission: Permission,
    /// Seconds
    expires_in: u64,
}

#[async_trait]
impl TokenMinter for HttpServiceClient {
    async fn mint_token(&self, req: TokenRequest) -> Result<String> {
        let url = format!("{}/public/services/ws/generate_token", self.base_url);
        let body = GenerateTokenRequest {
            config: TokenConfig {
                workspace: &req.workspace,
                permission: req.permission,
                expires_in: req.expires_in.as_secs(),
            },
        };

        let response = self.authorized(self.client.post(&url)).json(&body).send().await?;

        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = HttpServiceClient::new("http://localhost:9527/");
        assert_eq!(client.base_url(), "http://localhost:9527");
    }

    #[test]
    fn test_method_url() {
        let client = HttpServiceClient::new("http://localhost:9527");
        let url = client
            .method_url("acme/abc:chiron-manager", "get_worker_info")
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:9527/acme/services/abc:chiron-manager/get_worker_info"
        );
    }

    #[test]
    fn test_method_url_rejects_unqualified_id() {
        let client = HttpServiceClient::new("http://localhost:9527");
        let err = client.method_url("chiron-manager", "ping").unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[test]
    fn test_manager_ids_filters_and_qualifies() {
        let entries = vec![
            ServiceEntry {
                id: "acme/abc:chiron-manager".to_string(),
            },
            ServiceEntry {
                id: "def:chiron-manager".to_string(),
            },
            ServiceEntry {
                id: "acme/abc:chiron-orchestrator".to_string(),
            },
        ];

        assert_eq!(
            manager_ids("acme", entries),
            vec![
                "acme/abc:chiron-manager".to_string(),
                "acme/def:chiron-manager".to_string()
            ]
        );
    }

    #[test]
    fn test_token_request_body() {
        let body = GenerateTokenRequest {
            config: TokenConfig {
                workspace: "acme",
                permission: Permission::ReadWrite,
                expires_in: 3600,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["config"]["permission"], "read_write");
        assert_eq!(json["config"]["expires_in"], 3600);
    }

    #[tokio::test]
    async fn test_broker_rejects_malformed_service_id() {
        let client = HttpServiceClient::new("http://localhost:9527");
        assert!(client.manager("no-workspace").await.is_err());
        assert!(client.orchestrator("acme/abc:chiron-orchestrator").await.is_ok());
    }
}
