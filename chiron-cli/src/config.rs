//! Configuration module
//!
//! Handles CLI configuration: server URL, credentials and the target workspace.

use chiron_client::HttpServiceClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the server hosting the workspace services
    pub server_url: String,
    /// Bearer token for the server
    pub token: Option<String>,
    /// Workspace to connect to
    pub workspace: String,
    /// Skip confirmation prompts
    pub assume_yes: bool,
}

impl Config {
    /// HTTP client for the configured server
    pub fn client(&self) -> HttpServiceClient {
        let client = HttpServiceClient::new(&self.server_url);
        match &self.token {
            Some(token) => client.with_token(token),
            None => client,
        }
    }
}
