//! Application records
//!
//! Orchestrator and trainer applications deployed on a worker. Records are
//! derived from the worker's latest [`WorkerInfo`](super::worker::WorkerInfo)
//! snapshot and replaced as a whole on every refresh.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use super::dataset::DatasetManifest;

/// App id under which a worker deploys its (single) orchestrator
pub const ORCHESTRATOR_APP_ID: &str = "chiron-orchestrator";

/// Deployment status of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    NotStarted,
    Deploying,
    DeployFailed,
    Running,
    Unhealthy,
    Deleting,
}

impl ApplicationStatus {
    /// Whether a deployment is still on its way to a settled state
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Deploying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Deploying => "DEPLOYING",
            Self::DeployFailed => "DEPLOY_FAILED",
            Self::Running => "RUNNING",
            Self::Unhealthy => "UNHEALTHY",
            Self::Deleting => "DELETING",
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "DEPLOYING" => Ok(Self::Deploying),
            "DEPLOY_FAILED" => Ok(Self::DeployFailed),
            "RUNNING" => Ok(Self::Running),
            "UNHEALTHY" => Ok(Self::Unhealthy),
            "DELETING" => Ok(Self::Deleting),
            other => Err(format!("unknown application status '{}'", other)),
        }
    }
}

/// Deserializes a status string, treating a missing, null or empty value as "no application"
pub(crate) fn deserialize_optional_status<'de, D>(
    deserializer: D,
) -> Result<Option<ApplicationStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Identifies one application: the owning worker's service id plus the app id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppKey {
    pub worker_id: String,
    pub app_id: String,
}

impl AppKey {
    pub fn new(worker_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            app_id: app_id.into(),
        }
    }

    /// Key of the orchestrator deployed on `worker_id`
    pub fn orchestrator(worker_id: impl Into<String>) -> Self {
        Self::new(worker_id, ORCHESTRATOR_APP_ID)
    }
}

impl std::fmt::Display for AppKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.worker_id, self.app_id)
    }
}

/// Orchestrator application on a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorRecord {
    pub owner_worker_id: String,
    pub app_id: String,
    pub status: ApplicationStatus,
    pub service_ids: Vec<String>,
    pub artifact_id: Option<String>,
}

impl OrchestratorRecord {
    pub fn key(&self) -> AppKey {
        AppKey::new(self.owner_worker_id.clone(), self.app_id.clone())
    }

    /// Service id used to reach the orchestrator's RPC surface
    pub fn service_id(&self) -> Option<&str> {
        self.service_ids.first().map(String::as_str)
    }
}

/// Trainer application on a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerRecord {
    pub owner_worker_id: String,
    pub app_id: String,
    pub status: ApplicationStatus,
    pub service_ids: Vec<String>,
    pub artifact_id: Option<String>,
    pub datasets: HashMap<String, DatasetManifest>,
}

impl TrainerRecord {
    pub fn key(&self) -> AppKey {
        AppKey::new(self.owner_worker_id.clone(), self.app_id.clone())
    }

    /// Service id the orchestrator registers this trainer under
    pub fn service_id(&self) -> Option<&str> {
        self.service_ids.first().map(String::as_str)
    }
}

/// Applications derived from one worker snapshot
///
/// At most one orchestrator; trainers keyed by app id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerApplications {
    pub orchestrator: Option<OrchestratorRecord>,
    pub trainers: BTreeMap<String, TrainerRecord>,
}

impl WorkerApplications {
    /// Status of the application with the given app id, if present
    pub fn status_of(&self, app_id: &str) -> Option<ApplicationStatus> {
        match &self.orchestrator {
            Some(orchestrator) if orchestrator.app_id == app_id => Some(orchestrator.status),
            _ => self.trainers.get(app_id).map(|t| t.status),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.orchestrator.is_none() && self.trainers.is_empty()
    }
}
