//! Training run types
//!
//! Status and loss history reported by an orchestrator. Both are polled and
//! replaced wholesale; nothing here is edited locally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Phase of the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStage {
    Fit,
    Evaluate,
}

impl std::fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingStage::Fit => write!(f, "fit"),
            TrainingStage::Evaluate => write!(f, "evaluate"),
        }
    }
}

/// Status of a training run as reported by `get_training_status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingRunStatus {
    #[serde(default)]
    pub is_running: bool,

    #[serde(default, alias = "current_training_round")]
    pub current_round: u32,

    #[serde(default)]
    pub target_round: u32,

    #[serde(default)]
    pub stage: Option<TrainingStage>,

    /// Keyed by trainer service id
    #[serde(default, alias = "trainers_progress")]
    pub per_trainer_progress: HashMap<String, TrainerProgress>,
}

/// Batch progress of one trainer within the current stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerProgress {
    #[serde(default)]
    pub current_batch: u64,
    #[serde(default)]
    pub total_batches: u64,
    #[serde(default, alias = "progress")]
    pub progress_fraction: f64,
    #[serde(default)]
    pub error: Option<String>,
}

/// `(round, loss)`
pub type LossPoint = (u32, f64);

/// Loss curves of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    #[serde(default)]
    pub training_losses: Vec<LossPoint>,
    #[serde(default)]
    pub validation_losses: Vec<LossPoint>,
}

impl TrainingHistory {
    pub fn is_empty(&self) -> bool {
        self.training_losses.is_empty() && self.validation_losses.is_empty()
    }

    /// Highest round with any recorded loss
    pub fn last_round(&self) -> Option<u32> {
        self.training_losses
            .iter()
            .chain(self.validation_losses.iter())
            .map(|(round, _)| *round)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accepts_remote_field_names() {
        let status: TrainingRunStatus = serde_json::from_str(
            r#"{
                "is_running": false,
                "current_training_round": 5,
                "target_round": 5,
                "stage": "evaluate",
                "trainers_progress": {
                    "acme/t1:trainer": {"current_batch": 10, "total_batches": 10, "progress": 1.0}
                }
            }"#,
        )
        .unwrap();

        assert!(!status.is_running);
        assert_eq!(status.current_round, 5);
        assert_eq!(status.stage, Some(TrainingStage::Evaluate));
        let progress = &status.per_trainer_progress["acme/t1:trainer"];
        assert_eq!(progress.total_batches, 10);
        assert!(progress.error.is_none());
    }

    #[test]
    fn test_null_stage() {
        let status: TrainingRunStatus =
            serde_json::from_str(r#"{"is_running": true, "stage": null}"#).unwrap();
        assert!(status.is_running);
        assert_eq!(status.stage, None);
    }

    #[test]
    fn test_history_pairs() {
        let history: TrainingHistory = serde_json::from_str(
            r#"{"training_losses": [[1, 0.9], [2, 0.5]], "validation_losses": [[1, 1.1]]}"#,
        )
        .unwrap();

        assert_eq!(history.training_losses, vec![(1, 0.9), (2, 0.5)]);
        assert_eq!(history.last_round(), Some(2));
        assert!(!history.is_empty());
        assert!(TrainingHistory::default().is_empty());
    }
}
