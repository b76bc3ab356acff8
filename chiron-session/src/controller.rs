//! Training session controller
//!
//! Holds the selected orchestrator and trainers, keeps the orchestrator's
//! trainer roster in line with the selection and drives a training run
//! through `Idle → Preparing → Running → Idle`.
//!
//! While a run is active two pollers replace the local status and history
//! with the orchestrator's latest values. The remote `start_training` call
//! runs in its own task; its failure ends the run like any other exit.

use chiron_client::{OrchestratorService, ServiceBroker};
use chiron_core::domain::application::{AppKey, ApplicationStatus};
use chiron_core::domain::training::{TrainingHistory, TrainingRunStatus};
use chiron_core::dto::orchestrator::StartTraining;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::confirm::{Confirm, DestructiveAction};
use crate::error::{Result, SessionError};
use crate::registry::WorkerRegistry;
use crate::scheduler::PollingScheduler;

const STATUS_POLLER: &str = "status";
const HISTORY_POLLER: &str = "history";

/// Phase of the training run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    #[default]
    Idle,
    /// Roster confirmed, run being launched
    Preparing,
    Running,
}

impl std::fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingPhase::Idle => write!(f, "idle"),
            TrainingPhase::Preparing => write!(f, "preparing"),
            TrainingPhase::Running => write!(f, "running"),
        }
    }
}

/// Selected orchestrator and trainers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub orchestrator: Option<AppKey>,
    pub trainers: BTreeSet<AppKey>,
}

/// Parameters of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingParams {
    pub num_rounds: u32,
    /// Fraction of training batches used per round
    pub limit_train_batches: Option<f64>,
    /// Fraction of evaluation batches used per round
    pub limit_eval_batches: Option<f64>,
}

impl TrainingParams {
    pub fn new(num_rounds: u32) -> Self {
        Self {
            num_rounds,
            limit_train_batches: None,
            limit_eval_batches: None,
        }
    }

    pub fn with_limits(mut self, train: Option<f64>, eval: Option<f64>) -> Self {
        self.limit_train_batches = train;
        self.limit_eval_batches = eval;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.num_rounds == 0 {
            return Err(SessionError::precondition(
                "Number of rounds must be at least 1",
            ));
        }
        for limit in [self.limit_train_batches, self.limit_eval_batches]
            .into_iter()
            .flatten()
        {
            if !(limit > 0.0 && limit <= 1.0) {
                return Err(SessionError::precondition(format!(
                    "Batch limit {} must be in (0, 1]",
                    limit
                )));
            }
        }
        Ok(())
    }
}

/// Changes made to an orchestrator's roster by one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RosterDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

struct ActiveRun {
    id: u64,
    orchestrator: AppKey,
    proxy: Arc<dyn OrchestratorService>,
    start_task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct ControllerState {
    phase: TrainingPhase,
    /// A start is between its checks and launching the run
    starting: bool,
    next_run_id: u64,
    selection: Selection,
    active: Option<ActiveRun>,
    status: Option<TrainingRunStatus>,
    history: TrainingHistory,
    last_error: Option<String>,
}

impl ControllerState {
    fn is_busy(&self) -> bool {
        self.starting || self.phase != TrainingPhase::Idle
    }

    fn is_current(&self, run_id: u64) -> bool {
        self.active.as_ref().is_some_and(|run| run.id == run_id)
    }
}

/// Clears the `starting` flag when a start attempt ends, however it ends
struct StartingGuard<'a>(&'a Mutex<ControllerState>);

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.starting = false;
        }
    }
}

/// Coordinates selection and training runs
pub struct TrainingSessionController {
    registry: Arc<WorkerRegistry>,
    broker: Arc<dyn ServiceBroker>,
    config: SessionConfig,
    state: Mutex<ControllerState>,
    phase_tx: watch::Sender<TrainingPhase>,
    pollers: PollingScheduler,
}

impl TrainingSessionController {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        broker: Arc<dyn ServiceBroker>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (phase_tx, _) = watch::channel(TrainingPhase::Idle);
        Arc::new(Self {
            registry,
            broker,
            config,
            state: Mutex::new(ControllerState::default()),
            phase_tx,
            pollers: PollingScheduler::new(),
        })
    }

    // =============================================================================
    // Observable state
    // =============================================================================

    pub fn phase(&self) -> TrainingPhase {
        self.state.lock().unwrap().phase
    }

    /// Receiver notified on every phase change
    pub fn subscribe(&self) -> watch::Receiver<TrainingPhase> {
        self.phase_tx.subscribe()
    }

    /// Whether a run is active or being started
    pub fn is_busy(&self) -> bool {
        self.state.lock().unwrap().is_busy()
    }

    pub fn status(&self) -> Option<TrainingRunStatus> {
        self.state.lock().unwrap().status.clone()
    }

    pub fn history(&self) -> TrainingHistory {
        self.state.lock().unwrap().history.clone()
    }

    /// Failure of the last run's background start, if it failed
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().last_error.clone()
    }

    /// Orchestrator of the active run
    pub fn active_orchestrator(&self) -> Option<AppKey> {
        self.state
            .lock()
            .unwrap()
            .active
            .as_ref()
            .map(|run| run.orchestrator.clone())
    }

    /// Current selection, limited to records that are present and running
    ///
    /// The orchestrator of an active run is kept regardless of its status.
    pub fn selection(&self) -> Selection {
        let state = self.state.lock().unwrap();
        let active = state.active.as_ref().map(|run| &run.orchestrator);

        Selection {
            orchestrator: state
                .selection
                .orchestrator
                .clone()
                .filter(|key| Some(key) == active || self.registry.is_running(key)),
            trainers: state
                .selection
                .trainers
                .iter()
                .filter(|key| self.registry.is_running(key))
                .cloned()
                .collect(),
        }
    }

    /// Selection as stored, without pruning
    pub(crate) fn raw_selection(&self) -> Selection {
        self.state.lock().unwrap().selection.clone()
    }

    fn publish(&self) {
        let phase = self.phase();
        self.phase_tx.send_replace(phase);
    }

    // =============================================================================
    // Selection
    // =============================================================================

    /// Selects (or with `None`, clears) the orchestrator
    ///
    /// Rejected while a run is active. Switching away from an orchestrator
    /// whose history is on display asks `confirm` first. The new
    /// orchestrator's existing status and history are loaded and its roster is
    /// reconciled with the selected trainers.
    pub async fn select_orchestrator(
        &self,
        key: Option<AppKey>,
        confirm: &dyn Confirm,
    ) -> Result<()> {
        let (current, has_history) = {
            let state = self.state.lock().unwrap();
            if state.is_busy() {
                return Err(SessionError::precondition(
                    "Cannot change the orchestrator while training is running",
                ));
            }
            if state.selection.orchestrator == key {
                return Ok(());
            }
            (
                state.selection.orchestrator.clone(),
                !state.history.is_empty(),
            )
        };

        if let Some(key) = &key
            && !self.registry.is_running(key)
        {
            return Err(SessionError::precondition(format!(
                "Orchestrator '{}' is not running",
                key
            )));
        }

        if let Some(from) = current
            && has_history
        {
            let action = DestructiveAction::SwitchOrchestrator {
                from,
                to: key.clone(),
            };
            if !confirm.confirm(&action) {
                return Err(SessionError::Declined(action.to_string()));
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            if state.is_busy() {
                return Err(SessionError::precondition(
                    "Cannot change the orchestrator while training is running",
                ));
            }
            state.selection.orchestrator = key.clone();
            state.status = None;
            state.history = TrainingHistory::default();
        }

        match key {
            Some(key) => {
                info!("Selected orchestrator {}", key);
                self.load_training_view(&key).await;
                self.sync_trainers_with_orchestrator().await?;
            }
            None => info!("Cleared orchestrator selection"),
        }
        Ok(())
    }

    /// Loads the status and history an orchestrator already holds
    async fn load_training_view(&self, key: &AppKey) {
        let proxy = match self.orchestrator_proxy(key).await {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("Could not load training state of {}: {}", key, e);
                return;
            }
        };

        let status = match proxy.get_training_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Could not load training status of {}: {}", key, e);
                None
            }
        };
        let history = match proxy.get_training_history().await {
            Ok(history) => Some(history),
            Err(e) => {
                warn!("Could not load training history of {}: {}", key, e);
                None
            }
        };

        let mut state = self.state.lock().unwrap();
        if state.selection.orchestrator.as_ref() != Some(key) || state.is_busy() {
            return;
        }
        if let Some(history) = history {
            debug!(
                "Loaded {} training loss point(s) of {}",
                history.training_losses.len(),
                key
            );
            state.history = history;
        }
        state.status = status;
    }

    /// Adds a running trainer to the selection
    pub async fn select_trainer(&self, key: AppKey) -> Result<RosterDiff> {
        self.ensure_running_trainer(&key)?;
        {
            let mut state = self.state.lock().unwrap();
            if state.is_busy() {
                return Err(SessionError::precondition(
                    "Cannot add trainers while training is running",
                ));
            }
            state.selection.trainers.insert(key.clone());
        }
        debug!("Selected trainer {}", key);
        self.sync_trainers_with_orchestrator().await
    }

    /// Removes a trainer from the selection
    ///
    /// Allowed during a run; the roster is then reconciled before the next start.
    pub async fn deselect_trainer(&self, key: &AppKey) -> Result<RosterDiff> {
        let removed = self.state.lock().unwrap().selection.trainers.remove(key);
        if !removed {
            return Ok(RosterDiff::default());
        }
        debug!("Deselected trainer {}", key);
        self.sync_trainers_with_orchestrator().await
    }

    /// Replaces the whole trainer selection
    pub async fn set_trainers<I>(&self, keys: I) -> Result<RosterDiff>
    where
        I: IntoIterator<Item = AppKey>,
    {
        let keys: BTreeSet<AppKey> = keys.into_iter().collect();
        for key in &keys {
            self.ensure_running_trainer(key)?;
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.is_busy() {
                return Err(SessionError::precondition(
                    "Cannot change trainers while training is running",
                ));
            }
            state.selection.trainers = keys;
        }
        self.sync_trainers_with_orchestrator().await
    }

    fn ensure_running_trainer(&self, key: &AppKey) -> Result<()> {
        match self.registry.trainer(key) {
            None => Err(SessionError::ApplicationNotFound(key.clone())),
            Some(trainer) if trainer.status != ApplicationStatus::Running => Err(
                SessionError::precondition(format!(
                    "Trainer '{}' is not running ({})",
                    key, trainer.status
                )),
            ),
            Some(_) => Ok(()),
        }
    }

    /// Drops every selection that belongs to a worker about to be disconnected
    ///
    /// Selected trainers of that worker are first unregistered from the
    /// selected orchestrator. Unregistering is best-effort.
    pub(crate) async fn release_worker(&self, worker_id: &str) {
        let (orchestrator, trainers) = {
            let state = self.state.lock().unwrap();
            let trainers: Vec<AppKey> = state
                .selection
                .trainers
                .iter()
                .filter(|key| key.worker_id == worker_id)
                .cloned()
                .collect();
            (state.selection.orchestrator.clone(), trainers)
        };

        if let Some(orchestrator) = orchestrator
            && !trainers.is_empty()
            && self.registry.is_running(&orchestrator)
        {
            match self.orchestrator_proxy(&orchestrator).await {
                Ok(proxy) => {
                    for key in &trainers {
                        let Some(service_id) = self
                            .registry
                            .trainer(key)
                            .and_then(|t| t.service_id().map(str::to_string))
                        else {
                            continue;
                        };
                        match proxy.remove_trainer(&service_id).await {
                            Ok(()) => info!("Unregistered trainer {} from {}", key, orchestrator),
                            Err(e) => warn!(
                                "Failed to unregister trainer {} from {}: {}",
                                key, orchestrator, e
                            ),
                        }
                    }
                }
                Err(e) => warn!(
                    "Could not reach {} to unregister trainers of {}: {}",
                    orchestrator, worker_id, e
                ),
            }
        }

        let mut state = self.state.lock().unwrap();
        state
            .selection
            .trainers
            .retain(|key| key.worker_id != worker_id);
        if state
            .selection
            .orchestrator
            .as_ref()
            .is_some_and(|key| key.worker_id == worker_id)
        {
            state.selection.orchestrator = None;
            state.status = None;
            state.history = TrainingHistory::default();
        }
    }

    /// Forgets an orchestrator that is being removed
    pub(crate) fn forget_orchestrator(&self, key: &AppKey) {
        let mut state = self.state.lock().unwrap();
        if state.selection.orchestrator.as_ref() == Some(key) {
            state.selection.orchestrator = None;
            state.status = None;
            state.history = TrainingHistory::default();
        }
    }

    /// Loss history an orchestrator currently reports
    ///
    /// Only running orchestrators are asked; anything else has no history to lose.
    pub(crate) async fn remote_history(&self, key: &AppKey) -> Result<TrainingHistory> {
        if self.registry.status_of(key) != Some(ApplicationStatus::Running) {
            return Ok(TrainingHistory::default());
        }

        let proxy = self.orchestrator_proxy(key).await?;
        time::timeout(self.config.info_timeout, proxy.get_training_history())
            .await
            .map_err(|_| SessionError::Timeout {
                operation: "read training history",
                target: key.to_string(),
                waited: self.config.info_timeout,
            })?
            .map_err(|e| SessionError::command("read training history", key.to_string(), e))
    }

    // =============================================================================
    // Roster reconciliation
    // =============================================================================

    /// Makes the selected orchestrator's roster match the selected running trainers
    ///
    /// Does nothing while a run is active, when no orchestrator is selected,
    /// or when the selected one is not running.
    pub async fn sync_trainers_with_orchestrator(&self) -> Result<RosterDiff> {
        let (orchestrator, selected) = {
            let state = self.state.lock().unwrap();
            if state.phase != TrainingPhase::Idle {
                return Ok(RosterDiff::default());
            }
            (
                state.selection.orchestrator.clone(),
                state.selection.trainers.clone(),
            )
        };

        let Some(orchestrator) = orchestrator else {
            debug!("No orchestrator selected, roster sync deferred");
            return Ok(RosterDiff::default());
        };
        if !self.registry.is_running(&orchestrator) {
            debug!("Orchestrator {} is not running, roster sync deferred", orchestrator);
            return Ok(RosterDiff::default());
        }

        let desired: BTreeSet<String> = selected
            .iter()
            .filter_map(|key| self.registry.trainer(key))
            .filter(|t| t.status == ApplicationStatus::Running)
            .filter_map(|t| t.service_id().map(str::to_string))
            .collect();

        let proxy = self.orchestrator_proxy(&orchestrator).await?;
        let registered: BTreeSet<String> = proxy
            .list_trainers()
            .await
            .map_err(|e| SessionError::command("list trainers", orchestrator.to_string(), e))?
            .into_iter()
            .collect();

        let mut diff = RosterDiff::default();
        for service_id in registered.difference(&desired) {
            proxy
                .remove_trainer(service_id)
                .await
                .map_err(|e| SessionError::command("unregister trainer", service_id.clone(), e))?;
            diff.removed.push(service_id.clone());
        }
        for service_id in desired.difference(&registered) {
            proxy
                .add_trainer(service_id)
                .await
                .map_err(|e| SessionError::command("register trainer", service_id.clone(), e))?;
            diff.added.push(service_id.clone());
        }

        if !diff.is_empty() {
            info!(
                "Roster of {}: +{} -{} trainer(s)",
                orchestrator,
                diff.added.len(),
                diff.removed.len()
            );
        }
        Ok(diff)
    }

    async fn orchestrator_proxy(&self, key: &AppKey) -> Result<Arc<dyn OrchestratorService>> {
        let record = self
            .registry
            .orchestrator(key)
            .ok_or_else(|| SessionError::ApplicationNotFound(key.clone()))?;
        let service_id = record.service_id().ok_or_else(|| {
            SessionError::precondition(format!("Orchestrator '{}' exposes no service yet", key))
        })?;

        self.broker
            .orchestrator(service_id)
            .await
            .map_err(|e| SessionError::command("connect to orchestrator", key.to_string(), e))
    }

    // =============================================================================
    // Training run
    // =============================================================================

    /// Starts a training run on the selected orchestrator
    ///
    /// Returns once the run is launched; `start_training` itself keeps running
    /// in the background.
    pub async fn start_training(self: &Arc<Self>, params: TrainingParams) -> Result<()> {
        params.validate()?;

        let orchestrator = {
            let mut state = self.state.lock().unwrap();
            if state.is_busy() {
                return Err(SessionError::precondition("Training is already running"));
            }

            let orchestrator = state
                .selection
                .orchestrator
                .clone()
                .filter(|key| self.registry.is_running(key))
                .ok_or_else(|| SessionError::precondition("Select a running orchestrator first"))?;

            if !state
                .selection
                .trainers
                .iter()
                .any(|key| self.registry.is_running(key))
            {
                return Err(SessionError::precondition(
                    "Select at least one running trainer first",
                ));
            }

            state.starting = true;
            orchestrator
        };
        let _starting = StartingGuard(&self.state);

        self.sync_trainers_with_orchestrator().await?;

        let proxy = self.orchestrator_proxy(&orchestrator).await?;
        let roster = proxy
            .list_trainers()
            .await
            .map_err(|e| SessionError::command("list trainers", orchestrator.to_string(), e))?;
        if roster.is_empty() {
            return Err(SessionError::precondition(format!(
                "No trainers available: orchestrator '{}' has no registered trainers",
                orchestrator
            )));
        }

        let run_id = {
            let mut state = self.state.lock().unwrap();
            state.next_run_id += 1;
            let run_id = state.next_run_id;
            state.phase = TrainingPhase::Preparing;
            state.active = Some(ActiveRun {
                id: run_id,
                orchestrator: orchestrator.clone(),
                proxy: Arc::clone(&proxy),
                start_task: None,
            });
            state.status = None;
            state.last_error = None;
            run_id
        };
        self.publish();

        self.schedule_pollers(run_id, &proxy);

        let request = StartTraining {
            num_rounds: params.num_rounds,
            timeout: self.config.training_timeout.as_secs(),
            limit_train_batches: params.limit_train_batches,
            limit_eval_batches: params.limit_eval_batches,
        };
        let task = self.spawn_start(run_id, orchestrator.clone(), Arc::clone(&proxy), request);

        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            match state.active.as_mut() {
                Some(run) if run.id == run_id => {
                    run.start_task = Some(task);
                    state.phase = TrainingPhase::Running;
                }
                _ => task.abort(),
            }
        }
        self.publish();

        info!(
            "Started training on {} with {} trainer(s) for {} round(s)",
            orchestrator,
            roster.len(),
            params.num_rounds
        );
        Ok(())
    }

    /// Issues the long-running `start_training`; a rejection ends the run
    fn spawn_start(
        self: &Arc<Self>,
        run_id: u64,
        orchestrator: AppKey,
        proxy: Arc<dyn OrchestratorService>,
        request: StartTraining,
    ) -> JoinHandle<()> {
        let controller: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let result = proxy.start_training(request).await;
            let Some(controller) = controller.upgrade() else {
                return;
            };
            match result {
                Ok(()) => debug!("start_training on {} returned", orchestrator),
                Err(e) => {
                    let err = SessionError::command("start training", orchestrator.to_string(), e);
                    error!("{}", err);
                    controller.abandon_run(run_id, err.detail());
                }
            }
        })
    }

    fn schedule_pollers(self: &Arc<Self>, run_id: u64, proxy: &Arc<dyn OrchestratorService>) {
        let controller: Weak<Self> = Arc::downgrade(self);
        let status_proxy = Arc::clone(proxy);
        self.pollers
            .schedule(STATUS_POLLER, self.config.status_poll_interval, move || {
                let controller = controller.clone();
                let proxy = Arc::clone(&status_proxy);
                async move {
                    match controller.upgrade() {
                        Some(controller) => controller.poll_status(run_id, proxy).await,
                        None => false,
                    }
                }
            });

        let controller: Weak<Self> = Arc::downgrade(self);
        let history_proxy = Arc::clone(proxy);
        self.pollers
            .schedule(HISTORY_POLLER, self.config.history_poll_interval, move || {
                let controller = controller.clone();
                let proxy = Arc::clone(&history_proxy);
                async move {
                    match controller.upgrade() {
                        Some(controller) => controller.poll_history(run_id, proxy).await,
                        None => false,
                    }
                }
            });
    }

    /// One status poll; returns whether polling continues
    async fn poll_status(&self, run_id: u64, proxy: Arc<dyn OrchestratorService>) -> bool {
        if !self.state.lock().unwrap().is_current(run_id) {
            return false;
        }

        let status = match time::timeout(self.config.refresh_timeout, proxy.get_training_status())
            .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Training status poll failed: {}", e);
                return true;
            }
            Err(_) => {
                warn!("Training status poll timed out");
                return true;
            }
        };

        if status.is_running {
            let mut state = self.state.lock().unwrap();
            if !state.is_current(run_id) {
                return false;
            }
            debug!(
                "Round {}/{} ({})",
                status.current_round,
                status.target_round,
                status.stage.map_or("-".to_string(), |s| s.to_string())
            );
            state.status = Some(status);
            return true;
        }

        self.finish_run(run_id, proxy, status).await;
        false
    }

    /// One history poll; returns whether polling continues
    async fn poll_history(&self, run_id: u64, proxy: Arc<dyn OrchestratorService>) -> bool {
        if !self.state.lock().unwrap().is_current(run_id) {
            return false;
        }

        match time::timeout(self.config.refresh_timeout, proxy.get_training_history()).await {
            Ok(Ok(history)) => {
                let mut state = self.state.lock().unwrap();
                if !state.is_current(run_id) {
                    return false;
                }
                state.history = history;
            }
            Ok(Err(e)) => warn!("Training history poll failed: {}", e),
            Err(_) => warn!("Training history poll timed out"),
        }
        true
    }

    /// Ends a run the orchestrator reported as finished
    ///
    /// Runs inside the status poller, which stops itself by returning false.
    async fn finish_run(
        &self,
        run_id: u64,
        proxy: Arc<dyn OrchestratorService>,
        final_status: TrainingRunStatus,
    ) {
        let run = {
            let mut state = self.state.lock().unwrap();
            if !state.is_current(run_id) {
                return;
            }
            state.phase = TrainingPhase::Idle;
            state.status = Some(final_status.clone());
            state.active.take()
        };
        self.pollers.cancel(HISTORY_POLLER);
        if let Some(task) = run.and_then(|run| run.start_task) {
            task.abort();
        }
        self.publish();

        info!(
            "Training finished at round {}/{}",
            final_status.current_round, final_status.target_round
        );

        match proxy.get_training_history().await {
            Ok(history) => {
                let mut state = self.state.lock().unwrap();
                if state.active.is_none() {
                    state.history = history;
                }
            }
            Err(e) => warn!("Could not fetch final training history: {}", e),
        }
    }

    /// Ends a run whose background start failed
    fn abandon_run(&self, run_id: u64, error: String) {
        {
            let mut state = self.state.lock().unwrap();
            if !state.is_current(run_id) {
                return;
            }
            state.phase = TrainingPhase::Idle;
            state.active = None;
            state.last_error = Some(error);
        }
        self.pollers.cancel_all();
        self.publish();
    }

    /// Stops the active run
    ///
    /// The controller returns to `Idle` as soon as the orchestrator accepts
    /// the stop, without waiting for the status poller to confirm it.
    pub async fn stop_training(&self) -> Result<()> {
        let (run_id, orchestrator, proxy) = {
            let state = self.state.lock().unwrap();
            match (&state.active, state.phase) {
                (Some(run), TrainingPhase::Running) => {
                    (run.id, run.orchestrator.clone(), Arc::clone(&run.proxy))
                }
                _ => return Err(SessionError::precondition("Training is not running")),
            }
        };

        proxy
            .stop_training()
            .await
            .map_err(|e| SessionError::command("stop training", orchestrator.to_string(), e))?;

        let run = {
            let mut state = self.state.lock().unwrap();
            if !state.is_current(run_id) {
                return Ok(());
            }
            state.phase = TrainingPhase::Idle;
            state.status = None;
            state.active.take()
        };
        self.pollers.cancel_all();
        if let Some(task) = run.and_then(|run| run.start_task) {
            task.abort();
        }
        self.publish();

        info!("Stopped training on {}", orchestrator);
        Ok(())
    }

    /// Clears the selected orchestrator's round counter and history
    pub async fn reset_training_state(&self) -> Result<()> {
        let orchestrator = {
            let state = self.state.lock().unwrap();
            if state.is_busy() {
                return Err(SessionError::precondition(
                    "Cannot reset training state while training is running",
                ));
            }
            state
                .selection
                .orchestrator
                .clone()
                .ok_or_else(|| SessionError::precondition("No orchestrator selected"))?
        };

        let proxy = self.orchestrator_proxy(&orchestrator).await?;
        proxy.reset_training_state().await.map_err(|e| {
            SessionError::command("reset training state", orchestrator.to_string(), e)
        })?;

        let mut state = self.state.lock().unwrap();
        state.status = None;
        state.history = TrainingHistory::default();
        info!("Reset training state of {}", orchestrator);
        Ok(())
    }

    /// Cancels both run pollers and the background start
    pub fn shutdown(&self) {
        self.pollers.cancel_all();
        let run = {
            let mut state = self.state.lock().unwrap();
            state.phase = TrainingPhase::Idle;
            state.active.take()
        };
        if let Some(task) = run.and_then(|run| run.start_task) {
            task.abort();
        }
        self.publish();
    }
}
