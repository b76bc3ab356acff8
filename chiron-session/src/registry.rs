//! Worker registry
//!
//! Owns the connected workers, their liveness, their latest snapshot and the
//! application records derived from it. Each worker is refreshed by its own
//! polling chain; a failed refresh marks the worker disconnected and ends the
//! chain until the worker is refreshed again explicitly.

use chiron_client::{ManagerService, ServiceBroker};
use chiron_core::domain::application::{
    AppKey, ApplicationStatus, OrchestratorRecord, TrainerRecord, WorkerApplications,
};
use chiron_core::domain::worker::WorkerInfo;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::inventory::derive_from;
use crate::scheduler::PollingScheduler;

/// One connected worker
#[derive(Clone)]
pub struct WorkerConnection {
    pub workspace: String,
    /// `<workspace>/<client>:<service-name>`, unique per worker instance
    pub service_id: String,
    /// Cleared when a refresh fails or times out
    pub connected: bool,
    pub last_snapshot: Option<WorkerInfo>,
    /// Derived from `last_snapshot`, replaced on every successful refresh
    pub applications: WorkerApplications,
    pub connected_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    proxy: Arc<dyn ManagerService>,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl WorkerConnection {
    fn new(workspace: &str, service_id: &str, proxy: Arc<dyn ManagerService>, info: WorkerInfo) -> Self {
        let now = Utc::now();
        Self {
            workspace: workspace.to_string(),
            service_id: service_id.to_string(),
            connected: true,
            applications: derive_from(service_id, &info),
            last_snapshot: Some(info),
            connected_at: now,
            last_refreshed_at: Some(now),
            proxy,
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Handle to the worker's manager service
    pub fn proxy(&self) -> Arc<dyn ManagerService> {
        Arc::clone(&self.proxy)
    }
}

impl std::fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("workspace", &self.workspace)
            .field("service_id", &self.service_id)
            .field("connected", &self.connected)
            .field("applications", &self.applications)
            .field("last_refreshed_at", &self.last_refreshed_at)
            .finish_non_exhaustive()
    }
}

/// Removes a service id from the in-flight connect set when dropped
struct PendingGuard<'a> {
    pending: &'a Mutex<HashSet<String>>,
    service_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.service_id);
        }
    }
}

/// Registry of connected workers
pub struct WorkerRegistry {
    broker: Arc<dyn ServiceBroker>,
    config: SessionConfig,
    connections: Mutex<HashMap<String, WorkerConnection>>,
    /// Service ids with a connect attempt in flight
    pending: Mutex<HashSet<String>>,
    scheduler: PollingScheduler,
}

impl WorkerRegistry {
    pub fn new(broker: Arc<dyn ServiceBroker>, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            broker,
            config,
            connections: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            scheduler: PollingScheduler::new(),
        })
    }

    // =============================================================================
    // Connect / Disconnect
    // =============================================================================

    /// Connects every manager service found in `workspace`
    ///
    /// Managers already connected are skipped; if all of them are, the call
    /// fails with [`SessionError::DuplicateConnection`]. Any other failure
    /// disconnects the managers this call had already connected. Returns the
    /// service ids connected by this call.
    pub async fn connect(self: &Arc<Self>, workspace: &str) -> Result<Vec<String>> {
        let service_ids = self
            .broker
            .resolve_managers(workspace)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    SessionError::WorkspaceNotFound(workspace.to_string())
                } else {
                    SessionError::Unreachable {
                        service_id: workspace.to_string(),
                        source: e,
                    }
                }
            })?;

        if service_ids.is_empty() {
            return Err(SessionError::WorkspaceNotFound(workspace.to_string()));
        }

        info!(
            "Found {} manager(s) in workspace {}",
            service_ids.len(),
            workspace
        );

        let mut connected = Vec::new();
        let mut duplicates = Vec::new();

        for service_id in service_ids {
            match self.connect_one(workspace, &service_id).await {
                Ok(()) => connected.push(service_id),
                Err(SessionError::DuplicateConnection(id)) => {
                    warn!("Worker {} is already connected, skipping", id);
                    duplicates.push(id);
                }
                Err(e) => {
                    for id in &connected {
                        if self.disconnect(id).is_ok() {
                            warn!("Rolled back connection to {} after {} failed", id, service_id);
                        }
                    }
                    return Err(e);
                }
            }
        }

        match (connected.is_empty(), duplicates.into_iter().next()) {
            (true, Some(duplicate)) => Err(SessionError::DuplicateConnection(duplicate)),
            _ => Ok(connected),
        }
    }

    async fn connect_one(self: &Arc<Self>, workspace: &str, service_id: &str) -> Result<()> {
        let _guard = self.reserve(service_id)?;

        let proxy = self
            .broker
            .manager(service_id)
            .await
            .map_err(|e| SessionError::Unreachable {
                service_id: service_id.to_string(),
                source: e,
            })?;

        let info = self.fetch_initial_info(service_id, proxy.as_ref()).await?;

        let connection = WorkerConnection::new(workspace, service_id, proxy, info);
        self.connections
            .lock()
            .unwrap()
            .insert(service_id.to_string(), connection);

        info!("Connected to worker {}", service_id);
        self.schedule(service_id);

        Ok(())
    }

    /// Claims `service_id` for a connect attempt
    ///
    /// Checked against both live connections and attempts still in flight, so
    /// two interleaved connects to the same worker cannot both succeed.
    fn reserve(&self, service_id: &str) -> Result<PendingGuard<'_>> {
        let connections = self.connections.lock().unwrap();
        let mut pending = self.pending.lock().unwrap();

        if connections.contains_key(service_id) || !pending.insert(service_id.to_string()) {
            return Err(SessionError::DuplicateConnection(service_id.to_string()));
        }

        Ok(PendingGuard {
            pending: &self.pending,
            service_id: service_id.to_string(),
        })
    }

    /// First `get_worker_info`, retrying only while the manager is initializing
    async fn fetch_initial_info(
        &self,
        service_id: &str,
        proxy: &dyn ManagerService,
    ) -> Result<WorkerInfo> {
        let max_attempts = self.config.connect_max_attempts;

        for attempt in 1..=max_attempts {
            match self.fetch_info(service_id, proxy).await {
                Ok(info) => {
                    if attempt > 1 {
                        info!(
                            "Worker {} answered after {} attempt(s)",
                            service_id, attempt
                        );
                    }
                    return Ok(info);
                }
                Err(SessionError::Unreachable { source, .. }) if source.is_not_initialized() => {
                    if attempt == max_attempts {
                        break;
                    }
                    info!(
                        "Worker {} is not initialized yet (attempt {}/{}), retrying in {:?}",
                        service_id, attempt, max_attempts, self.config.connect_retry_delay
                    );
                    time::sleep(self.config.connect_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(SessionError::NotInitialized {
            service_id: service_id.to_string(),
            attempts: max_attempts,
        })
    }

    /// One `get_worker_info` bounded by the refresh timeout
    async fn fetch_info(&self, service_id: &str, proxy: &dyn ManagerService) -> Result<WorkerInfo> {
        match time::timeout(self.config.refresh_timeout, proxy.get_worker_info()).await {
            Ok(Ok(info)) => Ok(info),
            Ok(Err(e)) => Err(SessionError::Unreachable {
                service_id: service_id.to_string(),
                source: e,
            }),
            Err(_) => Err(SessionError::Timeout {
                operation: "fetch worker info",
                target: service_id.to_string(),
                waited: self.config.refresh_timeout,
            }),
        }
    }

    /// Removes a worker, its derived records and its polling chain
    pub fn disconnect(&self, service_id: &str) -> Result<WorkerConnection> {
        self.scheduler.cancel(service_id);

        let removed = self.connections.lock().unwrap().remove(service_id);
        match removed {
            Some(connection) => {
                info!("Disconnected worker {}", service_id);
                Ok(connection)
            }
            None => Err(SessionError::WorkerNotFound(service_id.to_string())),
        }
    }

    // =============================================================================
    // Refresh
    // =============================================================================

    /// Re-reads a worker's snapshot
    ///
    /// On failure the worker is marked disconnected and its automatic polling
    /// stops; it resumes only through [`refresh_now`](Self::refresh_now) or a
    /// new connect.
    pub async fn refresh(self: &Arc<Self>, service_id: &str) -> Result<()> {
        let result = self.refresh_once(service_id).await;
        if result.is_err() {
            self.scheduler.cancel(service_id);
        }
        result
    }

    /// Refreshes immediately and, on success, restarts the polling chain
    pub async fn refresh_now(self: &Arc<Self>, service_id: &str) -> Result<()> {
        self.refresh(service_id).await?;
        self.schedule(service_id);
        Ok(())
    }

    /// One refresh, serialized per worker
    async fn refresh_once(&self, service_id: &str) -> Result<()> {
        let (proxy, lock) = {
            let connections = self.connections.lock().unwrap();
            let connection = connections
                .get(service_id)
                .ok_or_else(|| SessionError::WorkerNotFound(service_id.to_string()))?;
            (connection.proxy(), Arc::clone(&connection.refresh_lock))
        };
        let _serialized = lock.lock().await;

        let mut result = self.fetch_info(service_id, proxy.as_ref()).await;
        let initializing = matches!(
            &result,
            Err(SessionError::Unreachable { source, .. }) if source.is_not_initialized()
        );
        if initializing {
            debug!(
                "Worker {} not initialized, retrying refresh in {:?}",
                service_id, self.config.refresh_retry_delay
            );
            time::sleep(self.config.refresh_retry_delay).await;
            result = self.fetch_info(service_id, proxy.as_ref()).await;
        }

        match result {
            Ok(info) => {
                if !self.apply_snapshot(service_id, info) {
                    return Err(SessionError::WorkerNotFound(service_id.to_string()));
                }
                debug!("Refreshed worker {}", service_id);
                Ok(())
            }
            Err(e) => {
                warn!("Refresh of worker {} failed: {}", service_id, e);
                self.mark_disconnected(service_id);
                Err(e)
            }
        }
    }

    /// Reads a snapshot without touching the connection's liveness
    ///
    /// Serialized with the worker's refreshes.
    pub(crate) async fn probe(&self, service_id: &str) -> Result<WorkerInfo> {
        let (proxy, lock) = {
            let connections = self.connections.lock().unwrap();
            let connection = connections
                .get(service_id)
                .ok_or_else(|| SessionError::WorkerNotFound(service_id.to_string()))?;
            (connection.proxy(), Arc::clone(&connection.refresh_lock))
        };
        let _serialized = lock.lock().await;

        self.fetch_info(service_id, proxy.as_ref()).await
    }

    /// Stores a fresh snapshot and replaces the derived records
    ///
    /// Returns false if the worker is no longer connected.
    pub(crate) fn apply_snapshot(&self, service_id: &str, info: WorkerInfo) -> bool {
        let mut connections = self.connections.lock().unwrap();
        let Some(connection) = connections.get_mut(service_id) else {
            return false;
        };

        connection.applications = derive_from(service_id, &info);
        connection.last_snapshot = Some(info);
        connection.connected = true;
        connection.last_refreshed_at = Some(Utc::now());
        true
    }

    fn mark_disconnected(&self, service_id: &str) {
        if let Some(connection) = self.connections.lock().unwrap().get_mut(service_id) {
            connection.connected = false;
        }
    }

    /// Replaces a worker's derived records with an edited copy
    pub(crate) fn update_applications<F>(&self, service_id: &str, edit: F) -> Result<()>
    where
        F: FnOnce(&mut WorkerApplications),
    {
        let mut connections = self.connections.lock().unwrap();
        let connection = connections
            .get_mut(service_id)
            .ok_or_else(|| SessionError::WorkerNotFound(service_id.to_string()))?;

        let mut applications = connection.applications.clone();
        edit(&mut applications);
        connection.applications = applications;
        Ok(())
    }

    // =============================================================================
    // Polling
    // =============================================================================

    /// (Re)arms the polling chain of a worker
    pub fn schedule(self: &Arc<Self>, service_id: &str) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let id = service_id.to_string();

        self.scheduler
            .schedule(service_id, self.config.poll_interval, move || {
                let registry = registry.clone();
                let id = id.clone();
                async move {
                    let Some(registry) = registry.upgrade() else {
                        return false;
                    };
                    match registry.refresh_once(&id).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Stopped polling worker {}: {}", id, e);
                            false
                        }
                    }
                }
            });
    }

    /// Whether the worker's polling chain is armed
    pub fn is_polling(&self, service_id: &str) -> bool {
        self.scheduler.is_scheduled(service_id)
    }

    /// Cancels every polling chain
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
    }

    // =============================================================================
    // Queries
    // =============================================================================

    pub fn get(&self, service_id: &str) -> Option<WorkerConnection> {
        self.connections.lock().unwrap().get(service_id).cloned()
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.connections.lock().unwrap().contains_key(service_id)
    }

    /// All connections, ordered by service id
    pub fn workers(&self) -> Vec<WorkerConnection> {
        let mut workers: Vec<WorkerConnection> =
            self.connections.lock().unwrap().values().cloned().collect();
        workers.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        workers
    }

    pub fn applications(&self, service_id: &str) -> Option<WorkerApplications> {
        self.connections
            .lock()
            .unwrap()
            .get(service_id)
            .map(|c| c.applications.clone())
    }

    pub(crate) fn proxy(&self, service_id: &str) -> Result<Arc<dyn ManagerService>> {
        self.connections
            .lock()
            .unwrap()
            .get(service_id)
            .map(WorkerConnection::proxy)
            .ok_or_else(|| SessionError::WorkerNotFound(service_id.to_string()))
    }

    pub fn orchestrator(&self, key: &AppKey) -> Option<OrchestratorRecord> {
        self.connections
            .lock()
            .unwrap()
            .get(&key.worker_id)
            .and_then(|c| c.applications.orchestrator.clone())
            .filter(|o| o.app_id == key.app_id)
    }

    pub fn trainer(&self, key: &AppKey) -> Option<TrainerRecord> {
        self.connections
            .lock()
            .unwrap()
            .get(&key.worker_id)
            .and_then(|c| c.applications.trainers.get(&key.app_id).cloned())
    }

    /// Current status of any application
    pub fn status_of(&self, key: &AppKey) -> Option<ApplicationStatus> {
        self.connections
            .lock()
            .unwrap()
            .get(&key.worker_id)
            .and_then(|c| c.applications.status_of(&key.app_id))
    }

    pub fn is_running(&self, key: &AppKey) -> bool {
        self.status_of(key) == Some(ApplicationStatus::Running)
    }

    /// Orchestrators across all workers
    pub fn orchestrators(&self) -> Vec<OrchestratorRecord> {
        self.workers()
            .into_iter()
            .filter_map(|c| c.applications.orchestrator)
            .collect()
    }

    /// Trainers across all workers
    pub fn trainers(&self) -> Vec<TrainerRecord> {
        self.workers()
            .into_iter()
            .flat_map(|c| c.applications.trainers.into_values())
            .collect()
    }
}
