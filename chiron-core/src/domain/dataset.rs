//! Dataset domain types

use serde::{Deserialize, Serialize};

/// Manifest describing a dataset hosted on a worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub id_emoji: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub badges: Option<Vec<Badge>>,
    #[serde(default)]
    pub covers: Option<Vec<String>>,
    #[serde(default, rename = "type")]
    pub dataset_type: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub file_count: Option<u64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub owner: Option<String>,
}

/// Badge shown next to a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub label: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl DatasetManifest {
    /// Display label: the emoji (if any) followed by the name
    pub fn label(&self) -> String {
        match &self.id_emoji {
            Some(emoji) if !emoji.is_empty() => format!("{} {}", emoji, self.name),
            _ => self.name.clone(),
        }
    }
}
