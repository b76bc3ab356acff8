//! Remote service contracts
//!
//! Capability-style handles for the services the session talks to. Every
//! method is a remote call that may fail or hang; callers apply their own
//! timeouts.
//!
//! All traits are object-safe so the session can hold `Arc<dyn ...>` handles
//! and tests can substitute fakes.

use async_trait::async_trait;
use chiron_core::domain::training::{TrainingHistory, TrainingRunStatus};
use chiron_core::domain::worker::WorkerInfo;
use chiron_core::dto::manager::{CreateOrchestrator, CreateTrainer};
use chiron_core::dto::orchestrator::StartTraining;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Per-worker manager service
#[async_trait]
pub trait ManagerService: Send + Sync {
    /// Fetches the worker's resources, datasets and application statuses
    async fn get_worker_info(&self) -> Result<WorkerInfo>;

    /// Deploys the worker's orchestrator
    async fn create_orchestrator(&self, req: CreateOrchestrator) -> Result<()>;

    /// Deploys a trainer and returns its app id
    async fn create_trainer(&self, req: CreateTrainer) -> Result<String>;

    /// Removes the worker's orchestrator
    async fn remove_orchestrator(&self) -> Result<()>;

    /// Removes the trainer with the given app id
    async fn remove_trainer(&self, app_id: &str) -> Result<()>;
}

/// Service exposed by a running orchestrator
#[async_trait]
pub trait OrchestratorService: Send + Sync {
    /// Service ids of the trainers registered with this orchestrator
    async fn list_trainers(&self) -> Result<Vec<String>>;

    async fn add_trainer(&self, trainer_service_id: &str) -> Result<()>;

    async fn remove_trainer(&self, trainer_service_id: &str) -> Result<()>;

    /// Runs a training session; resolves only when the run ends
    async fn start_training(&self, req: StartTraining) -> Result<()>;

    async fn stop_training(&self) -> Result<()>;

    async fn get_training_status(&self) -> Result<TrainingRunStatus>;

    async fn get_training_history(&self) -> Result<TrainingHistory>;

    /// Clears the orchestrator's round counter and loss history
    async fn reset_training_state(&self) -> Result<()>;
}

/// Resolves workspaces to manager services and hands out service proxies
#[async_trait]
pub trait ServiceBroker: Send + Sync {
    /// Service ids (`<workspace>/<client>:<service>`) of the managers in a workspace
    async fn resolve_managers(&self, workspace: &str) -> Result<Vec<String>>;

    async fn manager(&self, service_id: &str) -> Result<Arc<dyn ManagerService>>;

    async fn orchestrator(&self, service_id: &str) -> Result<Arc<dyn OrchestratorService>>;
}

/// Token permission scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    ReadWrite,
    Admin,
}

/// Request for a workspace access token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub workspace: String,
    pub permission: Permission,
    pub expires_in: Duration,
}

/// Mints access tokens that deployed applications use to reach the workspace
#[async_trait]
pub trait TokenMinter: Send + Sync {
    async fn mint_token(&self, req: TokenRequest) -> Result<String>;
}
