//! Scripted in-memory implementations of the remote service traits

use async_trait::async_trait;
use chiron_client::{
    ClientError, ManagerService, OrchestratorService, Result, ServiceBroker, TokenMinter,
    TokenRequest,
};
use chiron_core::domain::application::ApplicationStatus;
use chiron_core::domain::dataset::DatasetManifest;
use chiron_core::domain::training::{TrainingHistory, TrainingRunStatus};
use chiron_core::domain::worker::{OrchestratorStatus, TrainerStatus, WorkerInfo};
use chiron_core::dto::manager::{CreateOrchestrator, CreateTrainer};
use chiron_core::dto::orchestrator::StartTraining;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{self, Duration};

pub const WORKSPACE: &str = "acme";
pub const WORKER: &str = "acme/abc:chiron-manager";
pub const ORCHESTRATOR_SERVICE: &str = "acme/orch-1:chiron-orchestrator";
pub const TRAINER_1_SERVICE: &str = "acme/t1:trainer";
pub const TRAINER_2_SERVICE: &str = "acme/t2:trainer";

fn dataset(name: &str) -> DatasetManifest {
    DatasetManifest {
        name: name.to_string(),
        description: format!("{} test split", name),
        ..Default::default()
    }
}

/// Worker hosting only an orchestrator in the given state
pub fn orchestrator_info(status: ApplicationStatus) -> WorkerInfo {
    WorkerInfo {
        orchestrator_status: Some(OrchestratorStatus {
            status: Some(status),
            service_ids: vec![ORCHESTRATOR_SERVICE.to_string()],
            artifact_id: Some("org/my-trainer".to_string()),
        }),
        ..Default::default()
    }
}

/// Worker with the `mnist` dataset, a running orchestrator and two running trainers
pub fn running_worker() -> WorkerInfo {
    let mut info = orchestrator_info(ApplicationStatus::Running);
    info.datasets.insert("mnist".to_string(), dataset("mnist"));

    for (app_id, service_id) in [
        ("trainer-1", TRAINER_1_SERVICE),
        ("trainer-2", TRAINER_2_SERVICE),
    ] {
        info.trainers_status.insert(
            app_id.to_string(),
            TrainerStatus {
                status: Some(ApplicationStatus::Running),
                service_ids: vec![service_id.to_string()],
                artifact_id: Some("org/my-trainer".to_string()),
                datasets: HashMap::from([("mnist".to_string(), dataset("mnist"))]),
            },
        );
    }
    info
}

/// Decrements an in-flight counter when the call completes or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Manager
// =============================================================================

#[derive(Default)]
struct ManagerState {
    current: WorkerInfo,
    script: VecDeque<std::result::Result<WorkerInfo, String>>,
    latency: Duration,
    hang: bool,
    fail_creates: Option<String>,
    fail_removals: Option<String>,
    next_trainer_id: Option<String>,
    calls: Vec<String>,
}

/// Manager whose `get_worker_info` answers from a script, then repeats its current snapshot
#[derive(Default)]
pub struct FakeManager {
    state: Mutex<ManagerState>,
    info_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeManager {
    pub fn new(info: WorkerInfo) -> Arc<Self> {
        let manager = Self::default();
        manager.state.lock().unwrap().current = info;
        Arc::new(manager)
    }

    pub fn set_info(&self, info: WorkerInfo) {
        self.state.lock().unwrap().current = info;
    }

    pub fn push_info(&self, info: WorkerInfo) {
        self.state.lock().unwrap().script.push_back(Ok(info));
    }

    pub fn push_error(&self, message: &str) {
        self.state
            .lock()
            .unwrap()
            .script
            .push_back(Err(message.to_string()));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Makes every following `get_worker_info` hang until unset
    pub fn set_hang(&self, hang: bool) {
        self.state.lock().unwrap().hang = hang;
    }

    pub fn fail_creates(&self, message: &str) {
        self.state.lock().unwrap().fail_creates = Some(message.to_string());
    }

    pub fn fail_removals(&self, message: &str) {
        self.state.lock().unwrap().fail_removals = Some(message.to_string());
    }

    pub fn set_next_trainer_id(&self, app_id: &str) {
        self.state.lock().unwrap().next_trainer_id = Some(app_id.to_string());
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of calls to a mutating method
    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    fn record(&self, method: &str) -> (Option<String>, Option<String>) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method.to_string());
        (state.fail_creates.clone(), state.fail_removals.clone())
    }
}

#[async_trait]
impl ManagerService for FakeManager {
    async fn get_worker_info(&self) -> Result<WorkerInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let (latency, hang) = {
            let state = self.state.lock().unwrap();
            (state.latency, state.hang)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !latency.is_zero() {
            time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        match state.script.pop_front() {
            Some(Ok(info)) => Ok(info),
            Some(Err(message)) => Err(ClientError::Remote(message)),
            None => Ok(state.current.clone()),
        }
    }

    async fn create_orchestrator(&self, _req: CreateOrchestrator) -> Result<()> {
        match self.record("create_orchestrator").0 {
            Some(message) => Err(ClientError::Remote(message)),
            None => Ok(()),
        }
    }

    async fn create_trainer(&self, _req: CreateTrainer) -> Result<String> {
        if let Some(message) = self.record("create_trainer").0 {
            return Err(ClientError::Remote(message));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .next_trainer_id
            .clone()
            .unwrap_or_else(|| "trainer-new".to_string()))
    }

    async fn remove_orchestrator(&self) -> Result<()> {
        if let Some(message) = self.record("remove_orchestrator").1 {
            return Err(ClientError::Remote(message));
        }
        self.state.lock().unwrap().current.orchestrator_status = Some(OrchestratorStatus::default());
        Ok(())
    }

    async fn remove_trainer(&self, app_id: &str) -> Result<()> {
        if let Some(message) = self.record("remove_trainer").1 {
            return Err(ClientError::Remote(message));
        }
        self.state
            .lock()
            .unwrap()
            .current
            .trainers_status
            .remove(app_id);
        Ok(())
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Default)]
struct OrchestratorState {
    roster: Vec<String>,
    statuses: VecDeque<TrainingRunStatus>,
    status: TrainingRunStatus,
    history: TrainingHistory,
    start_error: Option<String>,
    last_start: Option<StartTraining>,
    calls: Vec<String>,
}

/// Orchestrator with an in-memory roster
///
/// `start_training` never resolves unless it is scripted to fail, like a
/// remote run that only ends when stopped.
#[derive(Default)]
pub struct FakeOrchestrator {
    state: Mutex<OrchestratorState>,
}

impl FakeOrchestrator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_roster(&self, roster: &[&str]) {
        self.state.lock().unwrap().roster = roster.iter().map(|s| s.to_string()).collect();
    }

    pub fn roster(&self) -> Vec<String> {
        let mut roster = self.state.lock().unwrap().roster.clone();
        roster.sort();
        roster
    }

    /// Queues a status returned by the next `get_training_status`
    pub fn push_status(&self, status: TrainingRunStatus) {
        self.state.lock().unwrap().statuses.push_back(status);
    }

    pub fn set_status(&self, status: TrainingRunStatus) {
        self.state.lock().unwrap().status = status;
    }

    pub fn set_history(&self, history: TrainingHistory) {
        self.state.lock().unwrap().history = history;
    }

    pub fn fail_start(&self, message: &str) {
        self.state.lock().unwrap().start_error = Some(message.to_string());
    }

    pub fn last_start(&self) -> Option<StartTraining> {
        self.state.lock().unwrap().last_start.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    /// Calls to any method
    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    fn record(&self, method: &str) {
        self.state.lock().unwrap().calls.push(method.to_string());
    }
}

#[async_trait]
impl OrchestratorService for FakeOrchestrator {
    async fn list_trainers(&self) -> Result<Vec<String>> {
        self.record("list_trainers");
        Ok(self.state.lock().unwrap().roster.clone())
    }

    async fn add_trainer(&self, trainer_service_id: &str) -> Result<()> {
        self.record("add_trainer");
        let mut state = self.state.lock().unwrap();
        if !state.roster.iter().any(|id| id == trainer_service_id) {
            state.roster.push(trainer_service_id.to_string());
        }
        Ok(())
    }

    async fn remove_trainer(&self, trainer_service_id: &str) -> Result<()> {
        self.record("remove_trainer");
        self.state
            .lock()
            .unwrap()
            .roster
            .retain(|id| id != trainer_service_id);
        Ok(())
    }

    async fn start_training(&self, req: StartTraining) -> Result<()> {
        self.record("start_training");
        let start_error = {
            let mut state = self.state.lock().unwrap();
            state.last_start = Some(req);
            state.start_error.clone()
        };
        match start_error {
            Some(message) => Err(ClientError::Remote(message)),
            None => std::future::pending().await,
        }
    }

    async fn stop_training(&self) -> Result<()> {
        self.record("stop_training");
        self.state.lock().unwrap().status.is_running = false;
        Ok(())
    }

    async fn get_training_status(&self) -> Result<TrainingRunStatus> {
        self.record("get_training_status");
        let mut state = self.state.lock().unwrap();
        match state.statuses.pop_front() {
            Some(status) => Ok(status),
            None => Ok(state.status.clone()),
        }
    }

    async fn get_training_history(&self) -> Result<TrainingHistory> {
        self.record("get_training_history");
        Ok(self.state.lock().unwrap().history.clone())
    }

    async fn reset_training_state(&self) -> Result<()> {
        self.record("reset_training_state");
        let mut state = self.state.lock().unwrap();
        state.history = TrainingHistory::default();
        state.status = TrainingRunStatus::default();
        Ok(())
    }
}

// =============================================================================
// Broker and minter
// =============================================================================

#[derive(Default)]
struct BrokerState {
    workspaces: HashMap<String, Vec<String>>,
    managers: HashMap<String, Arc<FakeManager>>,
    orchestrators: HashMap<String, Arc<FakeOrchestrator>>,
}

#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_manager(&self, workspace: &str, service_id: &str, manager: Arc<FakeManager>) {
        let mut state = self.state.lock().unwrap();
        state
            .workspaces
            .entry(workspace.to_string())
            .or_default()
            .push(service_id.to_string());
        state.managers.insert(service_id.to_string(), manager);
    }

    pub fn add_orchestrator(&self, service_id: &str, orchestrator: Arc<FakeOrchestrator>) {
        self.state
            .lock()
            .unwrap()
            .orchestrators
            .insert(service_id.to_string(), orchestrator);
    }
}

#[async_trait]
impl ServiceBroker for FakeBroker {
    async fn resolve_managers(&self, workspace: &str) -> Result<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .workspaces
            .get(workspace)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(workspace.to_string()))
    }

    async fn manager(&self, service_id: &str) -> Result<Arc<dyn ManagerService>> {
        let manager = self.state.lock().unwrap().managers.get(service_id).cloned();
        match manager {
            Some(manager) => Ok(manager as Arc<dyn ManagerService>),
            None => Err(ClientError::NotFound(service_id.to_string())),
        }
    }

    async fn orchestrator(&self, service_id: &str) -> Result<Arc<dyn OrchestratorService>> {
        let orchestrator = self
            .state
            .lock()
            .unwrap()
            .orchestrators
            .get(service_id)
            .cloned();
        match orchestrator {
            Some(orchestrator) => Ok(orchestrator as Arc<dyn OrchestratorService>),
            None => Err(ClientError::NotFound(service_id.to_string())),
        }
    }
}

#[derive(Default)]
pub struct FakeMinter {
    requests: Mutex<Vec<TokenRequest>>,
}

impl FakeMinter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn requests(&self) -> Vec<TokenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenMinter for FakeMinter {
    async fn mint_token(&self, req: TokenRequest) -> Result<String> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(req);
        Ok(format!("token-{}", requests.len()))
    }
}
