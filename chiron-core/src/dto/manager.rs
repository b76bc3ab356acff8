//! Manager service DTOs

use serde::{Deserialize, Serialize};

/// Arguments of `create_orchestrator`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrchestrator {
    pub token: String,
    pub trainer_artifact_id: String,
}

/// Arguments of `create_trainer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTrainer {
    pub token: String,
    pub datasets: Vec<String>,
    pub trainer_artifact_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_weights: Option<String>,
}

/// Arguments of `remove_trainer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveTrainer {
    pub app_id: String,
}
