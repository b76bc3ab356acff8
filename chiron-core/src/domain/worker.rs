//! Worker snapshot types
//!
//! The payload returned by a manager's `get_worker_info`.

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::application::{ApplicationStatus, deserialize_optional_status};
use super::dataset::DatasetManifest;

/// Snapshot of a worker's resources, datasets and deployed applications
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    #[serde(default, alias = "cluster_status")]
    pub cluster: ClusterResources,

    #[serde(default)]
    pub datasets: HashMap<String, DatasetManifest>,

    /// Present but empty (`{}`) when no orchestrator is deployed
    #[serde(default, deserialize_with = "deserialize_orchestrator_status")]
    pub orchestrator_status: Option<OrchestratorStatus>,

    #[serde(default, deserialize_with = "deserialize_trainers_status")]
    pub trainers_status: HashMap<String, TrainerStatus>,
}

impl WorkerInfo {
    /// Status of the deployed orchestrator, if there is one
    pub fn orchestrator_state(&self) -> Option<ApplicationStatus> {
        self.orchestrator_status.as_ref().and_then(|o| o.status)
    }
}

fn deserialize_orchestrator_status<'de, D>(
    deserializer: D,
) -> Result<Option<OrchestratorStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<OrchestratorStatus>::deserialize(deserializer)
        .map_err(|e| de::Error::custom(format!("orchestrator: {}", e)))
}

/// Deserializes the trainer map, naming the trainer whose record is malformed
fn deserialize_trainers_status<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, TrainerStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TrainersVisitor;

    impl<'de> Visitor<'de> for TrainersVisitor {
        type Value = HashMap<String, TrainerStatus>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of trainer app id to trainer status")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(HashMap::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut trainers = HashMap::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(app_id) = map.next_key::<String>()? {
                let status = map
                    .next_value::<TrainerStatus>()
                    .map_err(|e| de::Error::custom(format!("trainer '{}': {}", app_id, e)))?;
                trainers.insert(app_id, status);
            }
            Ok(trainers)
        }
    }

    deserializer.deserialize_any(TrainersVisitor)
}

/// Cluster resource counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterResources {
    #[serde(default)]
    pub total_cpu: f64,
    #[serde(default)]
    pub available_cpu: f64,
    #[serde(default)]
    pub total_gpu: f64,
    #[serde(default)]
    pub available_gpu: f64,
    /// Bytes
    #[serde(default)]
    pub total_memory: f64,
    /// Bytes
    #[serde(default)]
    pub available_memory: f64,
}

impl ClusterResources {
    pub fn cpu_used_fraction(&self) -> f64 {
        used_fraction(self.total_cpu, self.available_cpu)
    }

    pub fn gpu_used_fraction(&self) -> f64 {
        used_fraction(self.total_gpu, self.available_gpu)
    }

    pub fn memory_used_fraction(&self) -> f64 {
        used_fraction(self.total_memory, self.available_memory)
    }
}

fn used_fraction(total: f64, available: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    ((total - available) / total).clamp(0.0, 1.0)
}

/// Orchestrator status record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    #[serde(default, deserialize_with = "deserialize_optional_status")]
    pub status: Option<ApplicationStatus>,
    #[serde(default)]
    pub service_ids: Vec<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
}

/// Trainer status record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainerStatus {
    #[serde(default, deserialize_with = "deserialize_optional_status")]
    pub status: Option<ApplicationStatus>,
    #[serde(default)]
    pub service_ids: Vec<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub datasets: HashMap<String, DatasetManifest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_orchestrator_status_has_no_state() {
        let info: WorkerInfo =
            serde_json::from_str(r#"{"orchestrator_status": {}, "trainers_status": {}}"#)
                .unwrap();

        assert!(info.orchestrator_status.is_some());
        assert_eq!(info.orchestrator_state(), None);
        assert!(info.trainers_status.is_empty());
    }

    #[test]
    fn test_blank_status_string_is_absent() {
        let info: WorkerInfo =
            serde_json::from_str(r#"{"orchestrator_status": {"status": ""}}"#).unwrap();
        assert_eq!(info.orchestrator_state(), None);
    }

    #[test]
    fn test_full_snapshot() {
        let info: WorkerInfo = serde_json::from_str(
            r#"{
                "cluster": {"total_cpu": 8, "available_cpu": 6, "total_gpu": 0, "available_gpu": 0},
                "datasets": {"mnist": {"name": "MNIST", "description": "digits"}},
                "orchestrator_status": {
                    "status": "RUNNING",
                    "service_ids": ["acme/abc:chiron-orchestrator"],
                    "artifact_id": "org/my-trainer"
                },
                "trainers_status": {
                    "trainer-1": {
                        "status": "DEPLOYING",
                        "service_ids": [],
                        "datasets": {"mnist": {"name": "MNIST", "description": "digits"}}
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(info.orchestrator_state(), Some(ApplicationStatus::Running));
        assert_eq!(
            info.trainers_status["trainer-1"].status,
            Some(ApplicationStatus::Deploying)
        );
        assert!((info.cluster.cpu_used_fraction() - 0.25).abs() < f64::EPSILON);
        assert_eq!(info.cluster.gpu_used_fraction(), 0.0);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = serde_json::from_str::<WorkerInfo>(
            r#"{"orchestrator_status": {"status": "EXPLODED"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("orchestrator"));
        assert!(err.to_string().contains("EXPLODED"));
    }

    #[test]
    fn test_unknown_trainer_status_names_the_trainer() {
        let err = serde_json::from_str::<WorkerInfo>(
            r#"{"trainers_status": {
                "trainer-1": {"status": "RUNNING"},
                "trainer-7": {"status": "MELTED"}
            }}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("trainer 'trainer-7'"));
        assert!(err.to_string().contains("MELTED"));
    }

    #[test]
    fn test_null_trainers_status() {
        let info: WorkerInfo = serde_json::from_str(r#"{"trainers_status": null}"#).unwrap();
        assert!(info.trainers_status.is_empty());
    }
}
