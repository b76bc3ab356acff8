//! Application inventory
//!
//! Derives orchestrator and trainer records from worker snapshots and performs
//! create/remove against the worker's manager. Creates wait for the deployment
//! to settle; removals mark the record `DELETING` locally and always reconcile
//! with a forced refresh afterwards.

use chiron_client::{Permission, TokenMinter, TokenRequest};
use chiron_core::domain::application::{
    AppKey, ApplicationStatus, ORCHESTRATOR_APP_ID, OrchestratorRecord, TrainerRecord,
    WorkerApplications,
};
use chiron_core::domain::worker::WorkerInfo;
use chiron_core::dto::manager::{CreateOrchestrator, CreateTrainer};
use std::future::Future;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::registry::WorkerRegistry;

/// Derives the application records of one worker from its snapshot
///
/// An orchestrator record exists only when the snapshot reports a non-empty
/// orchestrator status. Trainers map one-to-one from `trainers_status`; a
/// trainer without a reported status is `NOT_STARTED`.
pub fn derive_from(worker_id: &str, info: &WorkerInfo) -> WorkerApplications {
    let orchestrator = info.orchestrator_status.as_ref().and_then(|o| {
        o.status.map(|status| OrchestratorRecord {
            owner_worker_id: worker_id.to_string(),
            app_id: ORCHESTRATOR_APP_ID.to_string(),
            status,
            service_ids: o.service_ids.clone(),
            artifact_id: o.artifact_id.clone(),
        })
    });

    let trainers = info
        .trainers_status
        .iter()
        .map(|(app_id, t)| {
            let record = TrainerRecord {
                owner_worker_id: worker_id.to_string(),
                app_id: app_id.clone(),
                status: t.status.unwrap_or(ApplicationStatus::NotStarted),
                service_ids: t.service_ids.clone(),
                artifact_id: t.artifact_id.clone(),
                datasets: t.datasets.clone(),
            };
            (app_id.clone(), record)
        })
        .collect();

    WorkerApplications {
        orchestrator,
        trainers,
    }
}

/// Create/remove operations on the applications of connected workers
pub struct ApplicationInventory {
    registry: Arc<WorkerRegistry>,
    minter: Arc<dyn TokenMinter>,
    config: SessionConfig,
}

impl ApplicationInventory {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        minter: Arc<dyn TokenMinter>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            minter,
            config,
        }
    }

    // =============================================================================
    // Create
    // =============================================================================

    /// Deploys the orchestrator of a worker and waits for it to settle
    pub async fn create_orchestrator(
        &self,
        worker_id: &str,
        trainer_artifact_id: &str,
    ) -> Result<OrchestratorRecord> {
        let connection = self
            .registry
            .get(worker_id)
            .ok_or_else(|| SessionError::WorkerNotFound(worker_id.to_string()))?;

        if let Some(existing) = &connection.applications.orchestrator {
            return Err(SessionError::precondition(format!(
                "Worker '{}' already has an orchestrator ({})",
                worker_id, existing.status
            )));
        }

        let key = AppKey::orchestrator(worker_id);
        let token = self.mint_token(&connection.workspace, worker_id).await?;

        info!(
            "Deploying orchestrator on {} with artifact {}",
            worker_id, trainer_artifact_id
        );
        connection
            .proxy()
            .create_orchestrator(CreateOrchestrator {
                token,
                trainer_artifact_id: trainer_artifact_id.to_string(),
            })
            .await
            .map_err(|e| SessionError::command("create orchestrator", worker_id, e))?;

        self.wait_for_deployment(&key, "deploy orchestrator", |info| {
            info.orchestrator_state()
        })
        .await?;

        self.registry.refresh_now(worker_id).await?;
        self.registry
            .orchestrator(&key)
            .ok_or(SessionError::ApplicationNotFound(key))
    }

    /// Deploys a trainer serving `datasets` and waits for it to settle
    pub async fn create_trainer(
        &self,
        worker_id: &str,
        datasets: &[String],
        trainer_artifact_id: &str,
        initial_weights: Option<&str>,
    ) -> Result<TrainerRecord> {
        let connection = self
            .registry
            .get(worker_id)
            .ok_or_else(|| SessionError::WorkerNotFound(worker_id.to_string()))?;

        if datasets.is_empty() {
            return Err(SessionError::precondition(
                "A trainer needs at least one dataset",
            ));
        }
        if let Some(snapshot) = &connection.last_snapshot
            && let Some(unknown) = datasets.iter().find(|d| !snapshot.datasets.contains_key(*d))
        {
            return Err(SessionError::precondition(format!(
                "Dataset '{}' is not available on worker '{}'",
                unknown, worker_id
            )));
        }

        let token = self.mint_token(&connection.workspace, worker_id).await?;

        info!(
            "Deploying trainer on {} for dataset(s) {}",
            worker_id,
            datasets.join(", ")
        );
        let app_id = connection
            .proxy()
            .create_trainer(CreateTrainer {
                token,
                datasets: datasets.to_vec(),
                trainer_artifact_id: trainer_artifact_id.to_string(),
                initial_weights: initial_weights.map(str::to_string),
            })
            .await
            .map_err(|e| SessionError::command("create trainer", worker_id, e))?;

        let key = AppKey::new(worker_id, app_id.clone());
        self.wait_for_deployment(&key, "deploy trainer", move |info| {
            info.trainers_status
                .get(&app_id)
                .map(|t| t.status.unwrap_or(ApplicationStatus::NotStarted))
        })
        .await?;

        self.registry.refresh_now(worker_id).await?;
        self.registry
            .trainer(&key)
            .ok_or(SessionError::ApplicationNotFound(key))
    }

    async fn mint_token(&self, workspace: &str, worker_id: &str) -> Result<String> {
        self.minter
            .mint_token(TokenRequest {
                workspace: workspace.to_string(),
                permission: Permission::ReadWrite,
                expires_in: self.config.token_lifetime,
            })
            .await
            .map_err(|e| SessionError::command("mint deployment token", worker_id, e))
    }

    /// Polls the worker until the application reaches a settled status
    ///
    /// Every snapshot read along the way is applied to the registry. Poll
    /// failures are tolerated; the whole wait, polls included, ends at the
    /// deployment budget.
    async fn wait_for_deployment<F>(
        &self,
        key: &AppKey,
        operation: &'static str,
        status_of: F,
    ) -> Result<ApplicationStatus>
    where
        F: Fn(&WorkerInfo) -> Option<ApplicationStatus>,
    {
        let attempts = self.config.deploy_poll_attempts;
        let started = time::Instant::now();
        let deadline = started + self.config.deploy_wait_budget();

        for attempt in 1..=attempts {
            if time::Instant::now() >= deadline {
                break;
            }
            time::sleep_until((time::Instant::now() + self.config.deploy_poll_interval).min(deadline))
                .await;

            let info = match time::timeout_at(deadline, self.registry.probe(&key.worker_id)).await {
                Ok(Ok(info)) => info,
                Ok(Err(SessionError::WorkerNotFound(id))) => {
                    return Err(SessionError::WorkerNotFound(id));
                }
                Ok(Err(e)) => {
                    debug!("Deployment poll {}/{} for {} failed: {}", attempt, attempts, key, e);
                    continue;
                }
                Err(_) => {
                    debug!("Deployment poll {}/{} for {} ran past the budget", attempt, attempts, key);
                    break;
                }
            };

            let status = status_of(&info);
            self.registry.apply_snapshot(&key.worker_id, info);

            match status {
                Some(ApplicationStatus::DeployFailed) => {
                    warn!("Deployment of {} failed", key);
                    return Err(SessionError::DeploymentFailed(key.clone()));
                }
                Some(status) if !status.is_transitional() => {
                    info!("{} is {} after {} poll(s)", key, status, attempt);
                    return Ok(status);
                }
                status => debug!(
                    "Deployment poll {}/{} for {}: {}",
                    attempt,
                    attempts,
                    key,
                    status.map_or("absent", |s| s.as_str())
                ),
            }
        }

        Err(SessionError::Timeout {
            operation,
            target: key.to_string(),
            waited: started.elapsed(),
        })
    }

    // =============================================================================
    // Remove
    // =============================================================================

    /// Removes the orchestrator of a worker
    pub async fn remove_orchestrator(&self, worker_id: &str) -> Result<()> {
        let key = AppKey::orchestrator(worker_id);
        if self.registry.orchestrator(&key).is_none() {
            return Err(SessionError::ApplicationNotFound(key));
        }
        let proxy = self.registry.proxy(worker_id)?;

        info!("Removing orchestrator {}", key);
        self.optimistic_then_reconcile(
            worker_id,
            |apps| {
                if let Some(orchestrator) = apps.orchestrator.as_mut() {
                    orchestrator.status = ApplicationStatus::Deleting;
                }
            },
            async {
                proxy
                    .remove_orchestrator()
                    .await
                    .map_err(|e| SessionError::command("remove orchestrator", key.to_string(), e))
            },
        )
        .await
    }

    /// Removes one trainer of a worker
    pub async fn remove_trainer(&self, key: &AppKey) -> Result<()> {
        if self.registry.trainer(key).is_none() {
            return Err(SessionError::ApplicationNotFound(key.clone()));
        }
        let proxy = self.registry.proxy(&key.worker_id)?;

        info!("Removing trainer {}", key);
        self.optimistic_then_reconcile(
            &key.worker_id,
            |apps| {
                if let Some(trainer) = apps.trainers.get_mut(&key.app_id) {
                    trainer.status = ApplicationStatus::Deleting;
                }
            },
            async {
                proxy
                    .remove_trainer(&key.app_id)
                    .await
                    .map_err(|e| SessionError::command("remove trainer", key.to_string(), e))
            },
        )
        .await
    }

    /// Applies a tentative local edit, runs the remote command, then refreshes
    ///
    /// The refresh runs whatever the command's outcome; a command error wins
    /// over a refresh error.
    async fn optimistic_then_reconcile<E, Fut>(
        &self,
        worker_id: &str,
        tentative: E,
        remote: Fut,
    ) -> Result<()>
    where
        E: FnOnce(&mut WorkerApplications),
        Fut: Future<Output = Result<()>>,
    {
        self.registry.update_applications(worker_id, tentative)?;

        let outcome = remote.await;
        if let Err(e) = &outcome {
            warn!("{}; reconciling {} with remote state", e, worker_id);
        }

        let reconciled = self.registry.refresh_now(worker_id).await;
        outcome?;
        reconciled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{
        FakeBroker, FakeManager, FakeMinter, WORKER, WORKSPACE, orchestrator_info, running_worker,
    };
    use chiron_core::domain::worker::{OrchestratorStatus, TrainerStatus};
    use tokio::time::Duration;

    struct Fixture {
        registry: Arc<WorkerRegistry>,
        inventory: ApplicationInventory,
        manager: Arc<FakeManager>,
        minter: Arc<FakeMinter>,
    }

    async fn connected(info: WorkerInfo) -> Fixture {
        let manager = FakeManager::new(info);
        let broker = FakeBroker::new();
        broker.add_manager(WORKSPACE, WORKER, manager.clone());
        let minter = FakeMinter::new();
        let config = SessionConfig::default();
        let registry = WorkerRegistry::new(broker, config.clone());
        registry.connect(WORKSPACE).await.unwrap();
        let inventory = ApplicationInventory::new(registry.clone(), minter.clone(), config);
        Fixture {
            registry,
            inventory,
            manager,
            minter,
        }
    }

    fn with_status(status: &str) -> WorkerInfo {
        let mut info = WorkerInfo::default();
        info.orchestrator_status = Some(OrchestratorStatus {
            status: Some(status.parse().unwrap()),
            ..Default::default()
        });
        info
    }

    #[test]
    fn test_derive_from_is_pure() {
        let info = running_worker();

        let first = derive_from(WORKER, &info);
        let second = derive_from(WORKER, &info);

        assert_eq!(first, second);
        assert_eq!(
            first.orchestrator.as_ref().map(|o| o.status),
            Some(ApplicationStatus::Running)
        );
        assert_eq!(first.trainers.len(), 2);
        assert!(first.trainers.values().all(|t| t.owner_worker_id == WORKER));
    }

    #[test]
    fn test_derive_from_empty_orchestrator_status() {
        let mut info = WorkerInfo::default();
        info.orchestrator_status = Some(OrchestratorStatus::default());
        assert!(derive_from(WORKER, &info).orchestrator.is_none());

        info.orchestrator_status = None;
        assert!(derive_from(WORKER, &info).orchestrator.is_none());
    }

    #[test]
    fn test_derive_from_trainer_without_status() {
        let mut info = WorkerInfo::default();
        info.trainers_status
            .insert("trainer-9".to_string(), TrainerStatus::default());

        let apps = derive_from(WORKER, &info);
        assert_eq!(
            apps.trainers["trainer-9"].status,
            ApplicationStatus::NotStarted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_orchestrator_waits_until_running() {
        let f = connected(WorkerInfo::default()).await;
        f.manager.push_info(with_status("DEPLOYING"));
        f.manager.push_info(with_status("DEPLOYING"));
        f.manager.set_info(orchestrator_info(ApplicationStatus::Running));

        let record = f
            .inventory
            .create_orchestrator(WORKER, "org/my-trainer")
            .await
            .unwrap();

        assert_eq!(record.status, ApplicationStatus::Running);
        assert_eq!(record.artifact_id.as_deref(), Some("org/my-trainer"));
        assert_eq!(f.registry.orchestrators().len(), 1);
        assert_eq!(f.manager.call_count("create_orchestrator"), 1);
        // connect + three deployment polls + forced refresh
        assert_eq!(f.manager.info_calls(), 5);
        assert!(f.registry.is_polling(WORKER));

        let requests = f.minter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].workspace, WORKSPACE);
        assert_eq!(requests[0].permission, Permission::ReadWrite);
        assert_eq!(requests[0].expires_in, Duration::from_secs(2_592_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_orchestrator_times_out() {
        let f = connected(WorkerInfo::default()).await;
        f.manager.set_info(with_status("DEPLOYING"));

        let started = time::Instant::now();
        let err = f
            .inventory
            .create_orchestrator(WORKER, "org/my-trainer")
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("background"));
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        // The transitional state is still visible
        assert_eq!(
            f.registry.status_of(&AppKey::orchestrator(WORKER)),
            Some(ApplicationStatus::Deploying)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_orchestrator_hanging_manager_stays_within_budget() {
        let f = connected(WorkerInfo::default()).await;
        f.manager.set_hang(true);

        let started = time::Instant::now();
        let err = f
            .inventory
            .create_orchestrator(WORKER, "org/my-trainer")
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(20));
        assert!(err.to_string().contains("after 20s"));
        assert_eq!(f.manager.call_count("create_orchestrator"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_orchestrator_deploy_failed() {
        let f = connected(WorkerInfo::default()).await;
        f.manager.set_info(with_status("DEPLOY_FAILED"));

        let err = f
            .inventory
            .create_orchestrator(WORKER, "org/my-trainer")
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::DeploymentFailed(key) if key.worker_id == WORKER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_orchestrator_rejects_second_one() {
        let f = connected(orchestrator_info(ApplicationStatus::Running)).await;

        let err = f
            .inventory
            .create_orchestrator(WORKER, "org/my-trainer")
            .await
            .unwrap_err();

        assert!(err.is_precondition());
        assert_eq!(f.manager.call_count("create_orchestrator"), 0);
        assert!(f.minter.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_orchestrator_keeps_remote_error() {
        let f = connected(WorkerInfo::default()).await;
        f.manager.fail_creates("insufficient GPU");

        let err = f
            .inventory
            .create_orchestrator(WORKER, "org/my-trainer")
            .await
            .unwrap_err();

        assert_eq!(err.title(), "Command failed");
        assert!(err.detail().contains("insufficient GPU"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_trainer_waits_for_its_own_app_id() {
        let mut info = running_worker();
        let f = connected(info.clone()).await;
        f.manager.set_next_trainer_id("trainer-new");

        // Other trainers are already running; only the new one counts
        f.manager.push_info(info.clone());
        info.trainers_status.insert(
            "trainer-new".to_string(),
            TrainerStatus {
                status: Some(ApplicationStatus::Deploying),
                ..Default::default()
            },
        );
        f.manager.push_info(info.clone());
        info.trainers_status.insert(
            "trainer-new".to_string(),
            TrainerStatus {
                status: Some(ApplicationStatus::Running),
                service_ids: vec!["acme/t9:trainer".to_string()],
                ..Default::default()
            },
        );
        f.manager.set_info(info);

        let record = f
            .inventory
            .create_trainer(WORKER, &["mnist".to_string()], "org/my-trainer", None)
            .await
            .unwrap();

        assert_eq!(record.app_id, "trainer-new");
        assert_eq!(record.status, ApplicationStatus::Running);
        assert_eq!(record.service_id(), Some("acme/t9:trainer"));
        // connect + three deployment polls + forced refresh
        assert_eq!(f.manager.info_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_trainer_validates_datasets() {
        let f = connected(running_worker()).await;

        let err = f
            .inventory
            .create_trainer(WORKER, &[], "org/my-trainer", None)
            .await
            .unwrap_err();
        assert!(err.is_precondition());

        let err = f
            .inventory
            .create_trainer(WORKER, &["imagenet".to_string()], "org/my-trainer", None)
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("imagenet"));
        assert_eq!(f.manager.call_count("create_trainer"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_orchestrator_converges_after_success() {
        let f = connected(orchestrator_info(ApplicationStatus::Running)).await;
        f.manager.set_latency(Duration::from_millis(100));

        f.inventory.remove_orchestrator(WORKER).await.unwrap();

        assert_eq!(f.manager.call_count("remove_orchestrator"), 1);
        assert!(f.registry.orchestrators().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_orchestrator_reverts_after_failure() {
        let f = connected(orchestrator_info(ApplicationStatus::Running)).await;
        f.manager.fail_removals("orchestrator is busy");

        let err = f.inventory.remove_orchestrator(WORKER).await.unwrap_err();

        assert!(err.detail().contains("orchestrator is busy"));
        // Forced refresh replaced the optimistic DELETING with remote truth
        assert_eq!(
            f.registry.status_of(&AppKey::orchestrator(WORKER)),
            Some(ApplicationStatus::Running)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_trainer_marks_deleting_until_reconciled() {
        let f = connected(running_worker()).await;
        f.manager.set_latency(Duration::from_secs(1));
        let key = AppKey::new(WORKER, "trainer-1");

        let removal = f.inventory.remove_trainer(&key);
        tokio::pin!(removal);
        tokio::select! {
            _ = &mut removal => panic!("removal finished early"),
            _ = time::sleep(Duration::from_millis(500)) => {}
        }
        assert_eq!(
            f.registry.status_of(&key),
            Some(ApplicationStatus::Deleting)
        );

        removal.await.unwrap();
        assert_eq!(f.registry.status_of(&key), None);
        assert_eq!(
            f.registry
                .applications(WORKER)
                .map(|a| a.trainers.len())
                .unwrap_or_default(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_application() {
        let f = connected(WorkerInfo::default()).await;

        assert!(matches!(
            f.inventory.remove_orchestrator(WORKER).await,
            Err(SessionError::ApplicationNotFound(_))
        ));
        assert!(matches!(
            f.inventory
                .remove_trainer(&AppKey::new(WORKER, "ghost"))
                .await,
            Err(SessionError::ApplicationNotFound(_))
        ));
        assert_eq!(f.manager.call_count("remove_trainer"), 0);
    }
}
