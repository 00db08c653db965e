//! Hierarchical on-disk artifact store.
//!
//! Layout under `<root>/projects/<project_id>/`:
//!
//! ```text
//! generations/
//!   v{version}__{generation_id}/
//!     manifest.json
//!     source/
//!     artifacts/
//!     diff_from_v{prev}.patch
//!   active -> v{N}__{id}
//! archive/
//! ```
//!
//! Writes are atomic per generation directory: content lands in a temp
//! sibling and is renamed into place, so a generation directory is either
//! fully present or absent.

mod cleanup;
mod diff;
pub mod manifest;
pub mod openapi;

pub use manifest::Manifest;

use crate::error::ArtifactError;
use crate::provider::FileMap;
use std::path::{Path, PathBuf};

/// Save result returned by the store.
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Absolute path of the generation directory.
    pub path: PathBuf,
    /// Number of files written under `source/`.
    pub file_count: usize,
    /// Total bytes written under `source/`.
    pub total_size_bytes: u64,
}

/// Local-disk artifact store.
pub struct ArtifactStore {
    root: PathBuf,
}

fn io_err(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Directory name for one saved generation.
pub fn generation_dir_name(version: i64, generation_id: &str) -> String {
    format!("v{version}__{generation_id}")
}

/// Parse a generation directory name back into (version, generation id).
pub fn parse_dir_name(name: &str) -> Option<(i64, &str)> {
    let rest = name.strip_prefix('v')?;
    let (version, generation_id) = rest.split_once("__")?;
    Some((version.parse().ok()?, generation_id))
}

impl ArtifactStore {
    /// Create a store rooted at `root` (tilde-expanded).
    pub fn new(root: &str) -> Self {
        Self {
            root: crate::storage::resolve_path(root),
        }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join("projects").join(project_id)
    }

    fn generations_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("generations")
    }

    pub(crate) fn archive_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("archive")
    }

    /// Save a generation's files under the hierarchical layout.
    ///
    /// Atomic per directory: everything is written to a temp sibling first,
    /// then renamed into place. Re-saving the same generation replaces it.
    pub fn save_hierarchical(
        &self,
        project_id: &str,
        generation_id: &str,
        version: i64,
        files: &FileMap,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<SaveReport, ArtifactError> {
        let base = self.generations_dir(project_id);
        std::fs::create_dir_all(&base).map_err(|e| io_err(&base, e))?;

        let tmp = base.join(format!(".tmp-{generation_id}"));
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp).map_err(|e| io_err(&tmp, e))?;
        }

        let source_dir = tmp.join("source");
        write_files_into(&source_dir, files)?;
        let artifacts_dir = tmp.join("artifacts");
        std::fs::create_dir_all(&artifacts_dir).map_err(|e| io_err(&artifacts_dir, e))?;

        let total_size_bytes = files.values().map(|c| c.len() as u64).sum();
        let manifest = Manifest {
            generation_id: generation_id.to_string(),
            project_id: project_id.to_string(),
            version,
            created_at: chrono::Utc::now().to_rfc3339(),
            file_count: files.len(),
            total_size_bytes,
            files: files.keys().cloned().collect(),
            metadata,
        };
        let manifest_path = tmp.join("manifest.json");
        std::fs::write(&manifest_path, manifest.to_json()?)
            .map_err(|e| io_err(&manifest_path, e))?;

        let final_dir = base.join(generation_dir_name(version, generation_id));
        if final_dir.exists() {
            std::fs::remove_dir_all(&final_dir).map_err(|e| io_err(&final_dir, e))?;
        }
        std::fs::rename(&tmp, &final_dir).map_err(|e| io_err(&final_dir, e))?;

        tracing::info!(
            project_id = %project_id,
            generation_id = %generation_id,
            version = version,
            file_count = files.len(),
            total_size_bytes = total_size_bytes,
            "generation saved",
        );

        Ok(SaveReport {
            path: final_dir,
            file_count: files.len(),
            total_size_bytes,
        })
    }

    /// Backward-compatible flat layout: `<root>/projects/<generation_id>/`.
    ///
    /// Used by callers that have no project or version to offer.
    pub fn save_flat_legacy(
        &self,
        generation_id: &str,
        files: &FileMap,
    ) -> Result<SaveReport, ArtifactError> {
        let dir = self.root.join("projects").join(generation_id);
        write_files_into(&dir, files)?;
        let total_size_bytes = files.values().map(|c| c.len() as u64).sum();
        Ok(SaveReport {
            path: dir,
            file_count: files.len(),
            total_size_bytes,
        })
    }

    /// Write files straight into a generation's `source/` directory.
    ///
    /// Incremental-persistence path used by the phased generator so a later
    /// failure preserves completed phases. Skips the temp-sibling dance on
    /// purpose; `save_hierarchical` replaces the directory wholesale at the
    /// end of a successful run.
    pub fn write_source_files(
        &self,
        project_id: &str,
        generation_id: &str,
        version: i64,
        files: &FileMap,
    ) -> Result<(), ArtifactError> {
        let dir = self
            .generations_dir(project_id)
            .join(generation_dir_name(version, generation_id))
            .join("source");
        write_files_into(&dir, files)
    }

    /// Write an auxiliary artifact (openapi.json, ...) for a saved generation.
    pub fn write_artifact(
        &self,
        project_id: &str,
        generation_id: &str,
        version: i64,
        name: &str,
        contents: &str,
    ) -> Result<PathBuf, ArtifactError> {
        let dir = self
            .generations_dir(project_id)
            .join(generation_dir_name(version, generation_id))
            .join("artifacts");
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let path = dir.join(name);
        std::fs::write(&path, contents).map_err(|e| io_err(&path, e))?;
        Ok(path)
    }

    /// Locate a generation's file tree.
    ///
    /// Hierarchical lookups (by project + version, project + generation id,
    /// or generation id alone) return the `source/` subdirectory. When
    /// nothing hierarchical matches, falls back to the flat legacy layout
    /// and returns that directory itself.
    pub fn lookup_generation_dir(
        &self,
        project_id: Option<&str>,
        version: Option<i64>,
        generation_id: Option<&str>,
    ) -> Option<PathBuf> {
        if let Some(pid) = project_id {
            if let Some(dir) = self.find_generation_dir(pid, version, generation_id) {
                return Some(dir.join("source"));
            }
        } else if let Some(gid) = generation_id {
            // No project hint: scan every project for the generation id.
            let projects = self.root.join("projects");
            if let Ok(entries) = std::fs::read_dir(&projects) {
                for entry in entries.flatten() {
                    let pid = entry.file_name().to_string_lossy().to_string();
                    if let Some(dir) = self.find_generation_dir(&pid, version, Some(gid)) {
                        return Some(dir.join("source"));
                    }
                }
            }
        }

        // Flat legacy fallback.
        let gid = generation_id?;
        let flat = self.root.join("projects").join(gid);
        if flat.is_dir() {
            return Some(flat);
        }
        None
    }

    fn find_generation_dir(
        &self,
        project_id: &str,
        version: Option<i64>,
        generation_id: Option<&str>,
    ) -> Option<PathBuf> {
        let base = self.generations_dir(project_id);
        let entries = std::fs::read_dir(&base).ok()?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((dir_version, dir_gid)) = parse_dir_name(&name) else {
                continue;
            };
            let version_matches = version.map_or(true, |v| v == dir_version);
            let gid_matches = generation_id.map_or(true, |g| g == dir_gid);
            if version_matches && gid_matches {
                return Some(base.join(name));
            }
        }
        None
    }

    /// Produce a diff between two versions and write it into the target
    /// version's directory as `diff_from_v{from}.patch`.
    pub fn diff(
        &self,
        project_id: &str,
        from_version: i64,
        to_version: i64,
    ) -> Result<PathBuf, ArtifactError> {
        let from_dir = self
            .find_generation_dir(project_id, Some(from_version), None)
            .ok_or_else(|| ArtifactError::MissingGeneration {
                id: format!("{project_id} v{from_version}"),
            })?;
        let to_dir = self
            .find_generation_dir(project_id, Some(to_version), None)
            .ok_or_else(|| ArtifactError::MissingGeneration {
                id: format!("{project_id} v{to_version}"),
            })?;

        let from_source = from_dir.join("source");
        let to_source = to_dir.join("source");
        let patch = match diff::system_unified_diff(&from_source, &to_source) {
            Some(patch) => patch,
            None => {
                let from_files = read_tree(&from_source)?;
                let to_files = read_tree(&to_source)?;
                diff::fallback_diff(&from_files, &to_files)
            }
        };

        let patch_path = to_dir.join(format!("diff_from_v{from_version}.patch"));
        std::fs::write(&patch_path, patch).map_err(|e| io_err(&patch_path, e))?;
        Ok(patch_path)
    }

    /// Atomically point the project's `active` link at a version.
    ///
    /// Non-fatal by contract: failures (exotic filesystems, permissions) are
    /// logged and swallowed so they never fail a generation.
    pub fn set_active(&self, project_id: &str, version: i64) {
        if let Err(e) = self.try_set_active(project_id, version) {
            tracing::warn!(
                project_id = %project_id,
                version = version,
                error = %e,
                "failed to update active pointer"
            );
        }
    }

    fn try_set_active(&self, project_id: &str, version: i64) -> Result<(), ArtifactError> {
        let base = self.generations_dir(project_id);
        let target = self
            .find_generation_dir(project_id, Some(version), None)
            .ok_or_else(|| ArtifactError::MissingGeneration {
                id: format!("{project_id} v{version}"),
            })?;
        let target_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ArtifactError::MissingGeneration {
                id: format!("{project_id} v{version}"),
            })?;

        let tmp_link = base.join(".active-tmp");
        if tmp_link.exists() || std::fs::symlink_metadata(&tmp_link).is_ok() {
            let _ = std::fs::remove_file(&tmp_link);
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(&target_name, &tmp_link).map_err(|e| io_err(&tmp_link, e))?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_dir(&target_name, &tmp_link)
            .map_err(|e| io_err(&tmp_link, e))?;

        let link = base.join("active");
        std::fs::rename(&tmp_link, &link).map_err(|e| io_err(&link, e))?;
        Ok(())
    }

    /// Resolve the `active` link, if present and valid.
    pub fn resolve_active(&self, project_id: &str) -> Option<PathBuf> {
        let link = self.generations_dir(project_id).join("active");
        let target = std::fs::read_link(&link).ok()?;
        let resolved = self.generations_dir(project_id).join(target);
        resolved.is_dir().then_some(resolved)
    }
}

/// Read a directory tree into a path → content map.
///
/// Paths are relative with forward slashes, matching generated file maps.
pub fn read_tree(dir: &Path) -> Result<FileMap, ArtifactError> {
    let mut files = FileMap::new();
    if !dir.exists() {
        return Ok(files);
    }
    read_tree_into(dir, dir, &mut files)?;
    Ok(files)
}

fn read_tree_into(root: &Path, dir: &Path, files: &mut FileMap) -> Result<(), ArtifactError> {
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            read_tree_into(root, &path, files)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let content = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            files.insert(relative, content);
        }
    }
    Ok(())
}

fn write_files_into(dir: &Path, files: &FileMap) -> Result<(), ArtifactError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    for (relative, content) in files {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::write(&path, content).map_err(|e| io_err(&path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_files() -> FileMap {
        let mut files = FileMap::new();
        files.insert("app/main.py".to_string(), "print('hi')\n".to_string());
        files.insert("app/models/user.py".to_string(), "class User: pass\n".to_string());
        files.insert("requirements.txt".to_string(), "fastapi\n".to_string());
        files
    }

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(&dir.path().display().to_string());
        (dir, store)
    }

    #[test]
    fn dir_name_round_trip() {
        let name = generation_dir_name(3, "abc-123");
        assert_eq!(name, "v3__abc-123");
        assert_eq!(parse_dir_name(&name), Some((3, "abc-123")));
        assert_eq!(parse_dir_name("junk"), None);
        assert_eq!(parse_dir_name("vX__id"), None);
    }

    #[test]
    fn save_and_read_back_is_byte_equal() {
        let (_tmp, store) = store();
        let files = sample_files();
        let report = store
            .save_hierarchical("p1", "g1", 1, &files, serde_json::Map::new())
            .expect("save");

        assert_eq!(report.file_count, 3);
        assert!(report.path.ends_with("v1__g1"));

        let source = store
            .lookup_generation_dir(Some("p1"), Some(1), None)
            .expect("lookup");
        let read_back = read_tree(&source).expect("read");
        assert_eq!(read_back, files);
    }

    #[test]
    fn save_leaves_no_temp_sibling() {
        let (_tmp, store) = store();
        store
            .save_hierarchical("p1", "g1", 1, &sample_files(), serde_json::Map::new())
            .expect("save");

        let base = store.generations_dir("p1");
        let names: Vec<String> = std::fs::read_dir(&base)
            .expect("read dir")
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(".tmp-")));
    }

    #[test]
    fn manifest_matches_saved_files() {
        let (_tmp, store) = store();
        let files = sample_files();
        let report = store
            .save_hierarchical("p1", "g1", 2, &files, serde_json::Map::new())
            .expect("save");

        let manifest = Manifest::read_from(&report.path.join("manifest.json")).expect("manifest");
        assert_eq!(manifest.version, 2);
        assert_eq!(manifest.generation_id, "g1");
        assert_eq!(manifest.file_count, 3);
        assert_eq!(
            manifest.files,
            files.keys().cloned().collect::<Vec<String>>()
        );
    }

    #[test]
    fn resave_replaces_directory() {
        let (_tmp, store) = store();
        store
            .save_hierarchical("p1", "g1", 1, &sample_files(), serde_json::Map::new())
            .expect("first save");

        let mut smaller = FileMap::new();
        smaller.insert("only.py".to_string(), "x = 1\n".to_string());
        store
            .save_hierarchical("p1", "g1", 1, &smaller, serde_json::Map::new())
            .expect("second save");

        let source = store
            .lookup_generation_dir(Some("p1"), Some(1), None)
            .expect("lookup");
        assert_eq!(read_tree(&source).expect("read"), smaller);
    }

    #[test]
    fn lookup_by_generation_id_without_project() {
        let (_tmp, store) = store();
        store
            .save_hierarchical("p1", "g1", 1, &sample_files(), serde_json::Map::new())
            .expect("save");

        let source = store
            .lookup_generation_dir(None, None, Some("g1"))
            .expect("lookup");
        assert!(source.ends_with("v1__g1/source"));
    }

    #[test]
    fn lookup_falls_back_to_flat_layout() {
        let (_tmp, store) = store();
        store
            .save_flat_legacy("legacy-gen", &sample_files())
            .expect("flat save");

        let dir = store
            .lookup_generation_dir(None, None, Some("legacy-gen"))
            .expect("lookup");
        assert!(dir.ends_with("projects/legacy-gen"));
        assert_eq!(read_tree(&dir).expect("read").len(), 3);
    }

    #[test]
    fn lookup_missing_returns_none() {
        let (_tmp, store) = store();
        assert!(store
            .lookup_generation_dir(Some("p1"), Some(9), None)
            .is_none());
        assert!(store.lookup_generation_dir(None, None, Some("ghost")).is_none());
    }

    #[test]
    fn diff_written_into_target_version() {
        let (_tmp, store) = store();
        let v1 = sample_files();
        let mut v2 = v1.clone();
        v2.insert("app/schemas/user.py".to_string(), "class UserRead: pass\n".to_string());
        v2.insert("app/main.py".to_string(), "print('v2')\n".to_string());

        store
            .save_hierarchical("p1", "g1", 1, &v1, serde_json::Map::new())
            .expect("save v1");
        store
            .save_hierarchical("p1", "g2", 2, &v2, serde_json::Map::new())
            .expect("save v2");

        let patch_path = store.diff("p1", 1, 2).expect("diff");
        assert!(patch_path.ends_with("v2__g2/diff_from_v1.patch"));
        let patch = std::fs::read_to_string(&patch_path).expect("read patch");
        assert!(patch.contains("user.py"));
    }

    #[test]
    fn diff_missing_version_errors() {
        let (_tmp, store) = store();
        store
            .save_hierarchical("p1", "g1", 1, &sample_files(), serde_json::Map::new())
            .expect("save");
        assert!(store.diff("p1", 1, 9).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn set_active_resolves_and_is_idempotent() {
        let (_tmp, store) = store();
        store
            .save_hierarchical("p1", "g1", 1, &sample_files(), serde_json::Map::new())
            .expect("save v1");
        store
            .save_hierarchical("p1", "g2", 2, &sample_files(), serde_json::Map::new())
            .expect("save v2");

        store.set_active("p1", 1);
        store.set_active("p1", 1);
        assert!(store
            .resolve_active("p1")
            .expect("active")
            .ends_with("v1__g1"));

        store.set_active("p1", 2);
        assert!(store
            .resolve_active("p1")
            .expect("active")
            .ends_with("v2__g2"));
    }

    #[test]
    fn set_active_missing_version_is_non_fatal() {
        let (_tmp, store) = store();
        // No save at all; must not panic or error.
        store.set_active("p1", 7);
        assert!(store.resolve_active("p1").is_none());
    }

    #[test]
    fn incremental_writes_accumulate() {
        let (_tmp, store) = store();
        let mut phase1 = FileMap::new();
        phase1.insert("app/main.py".to_string(), "one\n".to_string());
        store
            .write_source_files("p1", "g1", 1, &phase1)
            .expect("phase 1");

        let mut phase2 = FileMap::new();
        phase2.insert("app/models/user.py".to_string(), "two\n".to_string());
        store
            .write_source_files("p1", "g1", 1, &phase2)
            .expect("phase 2");

        let source = store
            .lookup_generation_dir(Some("p1"), Some(1), None)
            .expect("lookup");
        let read_back = read_tree(&source).expect("read");
        assert_eq!(read_back.len(), 2);
    }

    #[test]
    fn write_artifact_lands_in_artifacts_dir() {
        let (_tmp, store) = store();
        store
            .save_hierarchical("p1", "g1", 1, &sample_files(), serde_json::Map::new())
            .expect("save");
        let path = store
            .write_artifact("p1", "g1", 1, "openapi.json", "{}")
            .expect("artifact");
        assert!(path.ends_with("v1__g1/artifacts/openapi.json"));
        assert!(path.exists());
    }
}
