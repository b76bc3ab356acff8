//! Orchestrator service over HTTP

use async_trait::async_trait;
use chiron_core::domain::training::{TrainingHistory, TrainingRunStatus};
use chiron_core::dto::orchestrator::{StartTraining, TrainerRef};
use serde_json::json;

use crate::HttpServiceClient;
use crate::error::Result;
use crate::services::OrchestratorService;

/// Proxy for a running orchestrator
#[derive(Debug, Clone)]
pub struct HttpOrchestratorService {
    client: HttpServiceClient,
    service_id: String,
}

impl HttpOrchestratorService {
    pub fn new(client: HttpServiceClient, service_id: impl Into<String>) -> Self {
        Self {
            client,
            service_id: service_id.into(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    fn trainer_ref(trainer_service_id: &str) -> TrainerRef {
        TrainerRef {
            trainer_service_id: trainer_service_id.to_string(),
        }
    }
}

#[async_trait]
impl OrchestratorService for HttpOrchestratorService {
    async fn list_trainers(&self) -> Result<Vec<String>> {
        self.client
            .call(&self.service_id, "list_trainers", &json!({}))
            .await
    }

    async fn add_trainer(&self, trainer_service_id: &str) -> Result<()> {
        self.client
            .call_unit(
                &self.service_id,
                "add_trainer",
                &Self::trainer_ref(trainer_service_id),
            )
            .await
    }

    async fn remove_trainer(&self, trainer_service_id: &str) -> Result<()> {
        self.client
            .call_unit(
                &self.service_id,
                "remove_trainer",
                &Self::trainer_ref(trainer_service_id),
            )
            .await
    }

    async fn start_training(&self, req: StartTraining) -> Result<()> {
        self.client
            .call_unit(&self.service_id, "start_training", &req)
            .await
    }

    async fn stop_training(&self) -> Result<()> {
        self.client
            .call_unit(&self.service_id, "stop_training", &json!({}))
            .await
    }

    async fn get_training_status(&self) -> Result<TrainingRunStatus> {
        self.client
            .call(&self.service_id, "get_training_status", &json!({}))
            .await
    }

    async fn get_training_history(&self) -> Result<TrainingHistory> {
        self.client
            .call(&self.service_id, "get_training_history", &json!({}))
            .await
    }

    async fn reset_training_state(&self) -> Result<()> {
        self.client
            .call_unit(&self.service_id, "reset_training_state", &json!({}))
            .await
    }
}
