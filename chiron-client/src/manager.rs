//! Manager service over HTTP

use async_trait::async_trait;
use chiron_core::domain::worker::WorkerInfo;
use chiron_core::dto::manager::{CreateOrchestrator, CreateTrainer, RemoveTrainer};
use serde_json::json;

use crate::HttpServiceClient;
use crate::error::Result;
use crate::services::ManagerService;

/// Proxy for one worker's manager service
#[derive(Debug, Clone)]
pub struct HttpManagerService {
    client: HttpServiceClient,
    service_id: String,
}

impl HttpManagerService {
    pub fn new(client: HttpServiceClient, service_id: impl Into<String>) -> Self {
        Self {
            client,
            service_id: service_id.into(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

#[async_trait]
impl ManagerService for HttpManagerService {
    async fn get_worker_info(&self) -> Result<WorkerInfo> {
        self.client
            .call(&self.service_id, "get_worker_info", &json!({}))
            .await
    }

    async fn create_orchestrator(&self, req: CreateOrchestrator) -> Result<()> {
        self.client
            .call_unit(&self.service_id, "create_orchestrator", &req)
            .await
    }

    async fn create_trainer(&self, req: CreateTrainer) -> Result<String> {
        self.client
            .call(&self.service_id, "create_trainer", &req)
            .await
    }

    async fn remove_orchestrator(&self) -> Result<()> {
        self.client
            .call_unit(&self.service_id, "remove_orchestrator", &json!({}))
            .await
    }

    async fn remove_trainer(&self, app_id: &str) -> Result<()> {
        let req = RemoveTrainer {
            app_id: app_id.to_string(),
        };
        self.client
            .call_unit(&self.service_id, "remove_trainer", &req)
            .await
    }
}
