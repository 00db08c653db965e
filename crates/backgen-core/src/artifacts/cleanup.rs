//! Retention pass: archive old generation directories.
//!
//! Archiving moves directories under `archive/` preserving their names.
//! Nothing is ever deleted; moving is the highest-destruction operation
//! the store performs.

use super::{parse_dir_name, ArtifactStore};
use crate::error::ArtifactError;

impl ArtifactStore {
    /// Archive versions outside the latest `keep_latest` that are older than
    /// `archive_age_days`. Returns the archived directory names.
    pub fn cleanup(
        &self,
        project_id: &str,
        keep_latest: usize,
        archive_age_days: i64,
    ) -> Result<Vec<String>, ArtifactError> {
        let base = self.generations_dir(project_id);
        let Ok(entries) = std::fs::read_dir(&base) else {
            return Ok(vec![]);
        };

        let mut versions: Vec<(i64, String)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let version = parse_dir_name(&name).map(|(version, _)| version);
                version.map(|version| (version, name))
            })
            .collect();
        versions.sort_by(|a, b| b.0.cmp(&a.0));

        let now = std::time::SystemTime::now();
        let mut archived = Vec::new();
        for (version, name) in versions.into_iter().skip(keep_latest) {
            let dir = base.join(&name);
            let age_days = std::fs::metadata(&dir)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map_or(0.0, |age| age.as_secs_f64() / 86_400.0);
            if age_days < archive_age_days as f64 {
                continue;
            }

            let archive = self.archive_dir(project_id);
            std::fs::create_dir_all(&archive).map_err(|e| super::io_err(&archive, e))?;
            let destination = archive.join(&name);
            std::fs::rename(&dir, &destination)
                .map_err(|e| super::io_err(&destination, e))?;
            tracing::info!(
                project_id = %project_id,
                version = version,
                dir = %name,
                "generation archived",
            );
            archived.push(name);
        }
        Ok(archived)
    }
}
