//! Detail views of managers and applications

use chiron_client::ServiceBroker;
use chiron_core::domain::application::{
    AppKey, ApplicationStatus, ORCHESTRATOR_APP_ID, OrchestratorRecord, TrainerRecord,
};
use chiron_core::domain::worker::WorkerInfo;
use serde::Serialize;
use std::time::Duration;
use tokio::time;

use crate::error::{Result, SessionError};
use crate::registry::WorkerRegistry;

/// What to describe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoTarget {
    /// A connected worker's manager, by service id
    Manager(String),
    Application(AppKey),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppInfo {
    Manager(ManagerInfo),
    Orchestrator(OrchestratorInfo),
    Trainer(TrainerInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerInfo {
    pub service_id: String,
    pub workspace: String,
    /// Freshly read snapshot
    pub info: WorkerInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorInfo {
    pub record: OrchestratorRecord,
    /// Trainer service ids registered with the orchestrator; empty unless it is running
    pub registered_trainers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerInfo {
    pub record: TrainerRecord,
}

/// Builds the detail view of `target`, bounding every remote call by `timeout`
pub(crate) async fn describe(
    registry: &WorkerRegistry,
    broker: &dyn ServiceBroker,
    timeout: Duration,
    target: &InfoTarget,
) -> Result<AppInfo> {
    match target {
        InfoTarget::Manager(service_id) => {
            let connection = registry
                .get(service_id)
                .ok_or_else(|| SessionError::WorkerNotFound(service_id.clone()))?;

            let info = match time::timeout(timeout, connection.proxy().get_worker_info()).await {
                Ok(Ok(info)) => info,
                Ok(Err(e)) => {
                    return Err(SessionError::Unreachable {
                        service_id: service_id.clone(),
                        source: e,
                    });
                }
                Err(_) => {
                    return Err(SessionError::Timeout {
                        operation: "fetch worker info",
                        target: service_id.clone(),
                        waited: timeout,
                    });
                }
            };

            registry.apply_snapshot(service_id, info.clone());
            Ok(AppInfo::Manager(ManagerInfo {
                service_id: service_id.clone(),
                workspace: connection.workspace,
                info,
            }))
        }
        InfoTarget::Application(key) if key.app_id == ORCHESTRATOR_APP_ID => {
            let record = registry
                .orchestrator(key)
                .ok_or_else(|| SessionError::ApplicationNotFound(key.clone()))?;

            let registered_trainers = match record.service_id() {
                Some(service_id) if record.status == ApplicationStatus::Running => {
                    let proxy = broker.orchestrator(service_id).await.map_err(|e| {
                        SessionError::command("connect to orchestrator", key.to_string(), e)
                    })?;
                    match time::timeout(timeout, proxy.list_trainers()).await {
                        Ok(result) => result.map_err(|e| {
                            SessionError::command("list trainers", key.to_string(), e)
                        })?,
                        Err(_) => {
                            return Err(SessionError::Timeout {
                                operation: "list trainers",
                                target: key.to_string(),
                                waited: timeout,
                            });
                        }
                    }
                }
                _ => Vec::new(),
            };

            Ok(AppInfo::Orchestrator(OrchestratorInfo {
                record,
                registered_trainers,
            }))
        }
        InfoTarget::Application(key) => registry
            .trainer(key)
            .map(|record| AppInfo::Trainer(TrainerInfo { record }))
            .ok_or_else(|| SessionError::ApplicationNotFound(key.clone())),
    }
}
