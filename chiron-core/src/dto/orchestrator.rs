//! Orchestrator service DTOs

use serde::{Deserialize, Serialize};

/// Arguments of `start_training`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartTraining {
    pub num_rounds: u32,
    /// Seconds
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_train_batches: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_eval_batches: Option<f64>,
}

/// Arguments of `add_trainer` / `remove_trainer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerRef {
    pub trainer_service_id: String,
}
