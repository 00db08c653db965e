//! Generation manifest: structured metadata describing saved outputs.

use crate::error::ArtifactError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Manifest written alongside every saved generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// The generation this manifest describes.
    pub generation_id: String,
    /// Owning project.
    pub project_id: String,
    /// Version within the project.
    pub version: i64,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Number of files under `source/`.
    pub file_count: usize,
    /// Total size of all files in bytes.
    pub total_size_bytes: u64,
    /// Relative paths of all files, sorted.
    pub files: Vec<String>,
    /// Free-form metadata (tech stack, domain, provider).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Manifest {
    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, ArtifactError> {
        serde_json::to_string_pretty(self).map_err(|e| ArtifactError::Manifest {
            message: format!("failed to serialize manifest: {e}"),
        })
    }

    /// Parse a manifest from JSON.
    pub fn from_json(raw: &str) -> Result<Self, ArtifactError> {
        serde_json::from_str(raw).map_err(|e| ArtifactError::Manifest {
            message: format!("failed to parse manifest: {e}"),
        })
    }

    /// Read a manifest file from disk.
    pub fn read_from(path: &Path) -> Result<Self, ArtifactError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ArtifactError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "tech_stack".to_string(),
            serde_json::Value::String("fastapi_postgres".to_string()),
        );
        Manifest {
            generation_id: "g1".to_string(),
            project_id: "p1".to_string(),
            version: 2,
            created_at: "2026-08-01T12:00:00Z".to_string(),
            file_count: 2,
            total_size_bytes: 128,
            files: vec!["app/main.py".to_string(), "requirements.txt".to_string()],
            metadata,
        }
    }

    #[test]
    fn json_round_trip() {
        let manifest = sample();
        let json = manifest.to_json().expect("serialize");
        let parsed = Manifest::from_json(&json).expect("parse");
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn missing_metadata_defaults_to_empty() {
        let json = r#"{
            "generation_id": "g1",
            "project_id": "p1",
            "version": 1,
            "created_at": "2026-08-01T12:00:00Z",
            "file_count": 0,
            "total_size_bytes": 0,
            "files": []
        }"#;
        let parsed = Manifest::from_json(json).expect("parse");
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn garbage_is_a_manifest_error() {
        let err = Manifest::from_json("not json").unwrap_err();
        assert!(err.to_string().contains("failed to parse manifest"));
    }
}
