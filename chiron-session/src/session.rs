//! Session facade
//!
//! The command surface and observable state a consumer works with. Wires the
//! registry, inventory and controller together and enforces the rules that
//! span them: no trainer removal during a run, confirmation before destroying
//! a visible history or selection.

use chiron_client::{ServiceBroker, TokenMinter};
use chiron_core::domain::application::{AppKey, OrchestratorRecord, TrainerRecord};
use chiron_core::domain::training::{TrainingHistory, TrainingRunStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::confirm::{Confirm, DestructiveAction};
use crate::controller::{RosterDiff, Selection, TrainingParams, TrainingPhase, TrainingSessionController};
use crate::error::{Result, SessionError};
use crate::info::{self, AppInfo, InfoTarget};
use crate::inventory::ApplicationInventory;
use crate::registry::{WorkerConnection, WorkerRegistry};

/// One coordination session over any number of workers
pub struct Session {
    broker: Arc<dyn ServiceBroker>,
    config: SessionConfig,
    registry: Arc<WorkerRegistry>,
    inventory: ApplicationInventory,
    controller: Arc<TrainingSessionController>,
}

impl Session {
    pub fn new(
        broker: Arc<dyn ServiceBroker>,
        minter: Arc<dyn TokenMinter>,
        config: SessionConfig,
    ) -> Self {
        let registry = WorkerRegistry::new(Arc::clone(&broker), config.clone());
        let inventory = ApplicationInventory::new(Arc::clone(&registry), minter, config.clone());
        let controller = TrainingSessionController::new(
            Arc::clone(&registry),
            Arc::clone(&broker),
            config.clone(),
        );

        Self {
            broker,
            config,
            registry,
            inventory,
            controller,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // =============================================================================
    // Workers
    // =============================================================================

    /// Connects every manager of a workspace; returns the new service ids
    pub async fn connect(&self, workspace: &str) -> Result<Vec<String>> {
        self.registry.connect(workspace).await
    }

    /// Disconnects a worker
    ///
    /// If selected applications live on the worker, `confirm` decides; its
    /// selected trainers are then unregistered from the selected orchestrator
    /// on a best-effort basis.
    pub async fn disconnect(&self, worker_id: &str, confirm: &dyn Confirm) -> Result<()> {
        if !self.registry.contains(worker_id) {
            return Err(SessionError::WorkerNotFound(worker_id.to_string()));
        }
        if self
            .controller
            .active_orchestrator()
            .is_some_and(|key| key.worker_id == worker_id)
        {
            return Err(SessionError::precondition(
                "Cannot disconnect the worker hosting the orchestrator of the active training run",
            ));
        }

        let selection = self.controller.raw_selection();
        let selected_orchestrator = selection
            .orchestrator
            .as_ref()
            .is_some_and(|key| key.worker_id == worker_id);
        let selected_trainers = selection
            .trainers
            .iter()
            .filter(|key| key.worker_id == worker_id)
            .count();

        if selected_orchestrator || selected_trainers > 0 {
            let action = DestructiveAction::DisconnectWorker {
                worker_id: worker_id.to_string(),
                selected_orchestrator,
                selected_trainers,
            };
            if !confirm.confirm(&action) {
                return Err(SessionError::Declined(action.to_string()));
            }
            self.controller.release_worker(worker_id).await;
        }

        self.registry.disconnect(worker_id)?;
        Ok(())
    }

    /// Refreshes a worker now and restarts its polling
    pub async fn refresh(&self, worker_id: &str) -> Result<()> {
        self.registry.refresh_now(worker_id).await
    }

    /// Connected workers, ordered by service id
    pub fn workers(&self) -> Vec<WorkerConnection> {
        self.registry.workers()
    }

    pub fn orchestrators(&self) -> Vec<OrchestratorRecord> {
        self.registry.orchestrators()
    }

    pub fn trainers(&self) -> Vec<TrainerRecord> {
        self.registry.trainers()
    }

    // =============================================================================
    // Applications
    // =============================================================================

    pub async fn create_orchestrator(
        &self,
        worker_id: &str,
        trainer_artifact_id: &str,
    ) -> Result<OrchestratorRecord> {
        self.inventory
            .create_orchestrator(worker_id, trainer_artifact_id)
            .await
    }

    pub async fn create_trainer(
        &self,
        worker_id: &str,
        datasets: &[String],
        trainer_artifact_id: &str,
        initial_weights: Option<&str>,
    ) -> Result<TrainerRecord> {
        self.inventory
            .create_trainer(worker_id, datasets, trainer_artifact_id, initial_weights)
            .await
    }

    /// Removes the orchestrator of a worker
    ///
    /// Rejected if it drives the active run. If it has a training history,
    /// `confirm` decides. A selected orchestrator is deselected only once the
    /// remote removal succeeded.
    pub async fn remove_orchestrator(&self, worker_id: &str, confirm: &dyn Confirm) -> Result<()> {
        let key = AppKey::orchestrator(worker_id);
        let selected = self.controller.raw_selection().orchestrator.as_ref() == Some(&key);

        if self.controller.is_busy()
            && (selected || self.controller.active_orchestrator().as_ref() == Some(&key))
        {
            return Err(SessionError::precondition(
                "Cannot remove the orchestrator while it is training",
            ));
        }

        let local = if selected {
            self.controller.history()
        } else {
            Default::default()
        };
        let history = if local.is_empty() {
            self.controller.remote_history(&key).await.unwrap_or_else(|e| {
                warn!("Could not read training history of {}: {}", key, e);
                local
            })
        } else {
            local
        };

        if !history.is_empty() {
            let action = DestructiveAction::RemoveOrchestrator {
                key: key.clone(),
                history_rounds: history.last_round().unwrap_or_default(),
            };
            if !confirm.confirm(&action) {
                return Err(SessionError::Declined(action.to_string()));
            }
        }

        self.inventory.remove_orchestrator(worker_id).await?;
        if selected {
            self.controller.forget_orchestrator(&key);
        }
        Ok(())
    }

    /// Removes a trainer; rejected while a run is active
    pub async fn remove_trainer(&self, key: &AppKey) -> Result<()> {
        if self.controller.is_busy() {
            return Err(SessionError::precondition(
                "Cannot remove a trainer while training is running",
            ));
        }
        if self.registry.trainer(key).is_none() {
            return Err(SessionError::ApplicationNotFound(key.clone()));
        }

        if self.controller.raw_selection().trainers.contains(key)
            && let Err(e) = self.controller.deselect_trainer(key).await
        {
            warn!("Could not unregister trainer {} before removal: {}", key, e);
        }

        self.inventory.remove_trainer(key).await
    }

    /// Detail view of a manager or application
    pub async fn app_info(&self, target: &InfoTarget) -> Result<AppInfo> {
        info::describe(
            &self.registry,
            self.broker.as_ref(),
            self.config.info_timeout,
            target,
        )
        .await
    }

    // =============================================================================
    // Selection
    // =============================================================================

    pub async fn select_orchestrator(&self, key: Option<AppKey>, confirm: &dyn Confirm) -> Result<()> {
        self.controller.select_orchestrator(key, confirm).await
    }

    pub async fn select_trainer(&self, key: AppKey) -> Result<RosterDiff> {
        self.controller.select_trainer(key).await
    }

    pub async fn deselect_trainer(&self, key: &AppKey) -> Result<RosterDiff> {
        self.controller.deselect_trainer(key).await
    }

    pub async fn set_trainers<I>(&self, keys: I) -> Result<RosterDiff>
    where
        I: IntoIterator<Item = AppKey>,
    {
        self.controller.set_trainers(keys).await
    }

    pub fn selection(&self) -> Selection {
        self.controller.selection()
    }

    // =============================================================================
    // Training
    // =============================================================================

    pub async fn start_training(&self, params: TrainingParams) -> Result<()> {
        self.controller.start_training(params).await
    }

    pub async fn stop_training(&self) -> Result<()> {
        self.controller.stop_training().await
    }

    pub async fn reset_training_state(&self) -> Result<()> {
        self.controller.reset_training_state().await
    }

    pub fn phase(&self) -> TrainingPhase {
        self.controller.phase()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrainingPhase> {
        self.controller.subscribe()
    }

    pub fn training_status(&self) -> Option<TrainingRunStatus> {
        self.controller.status()
    }

    pub fn training_history(&self) -> TrainingHistory {
        self.controller.history()
    }

    /// Failure of the last run's background start
    pub fn last_error(&self) -> Option<String> {
        self.controller.last_error()
    }

    /// Cancels every worker poller and run poller
    pub fn shutdown(&self) {
        self.controller.shutdown();
        self.registry.shutdown();
        info!("Session shut down");
    }
}
