//! Generation persistence and status transitions.

use super::{now_rfc3339, DbPool};
use crate::error::StorageError;
use crate::provider::FileMap;

/// Generation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    /// Created, waiting for the orchestrator.
    Pending,
    /// Claimed and running.
    Processing,
    /// Terminal: finished successfully.
    Completed,
    /// Terminal: failed.
    Failed,
}

impl GenerationStatus {
    /// Stable string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are sticky: no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

/// Counts of paths changed by an iteration relative to its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangesSummary {
    /// Paths present in the result but not the parent.
    pub added: usize,
    /// Paths present in the parent but not the result.
    pub removed: usize,
    /// Paths present in both with different content.
    pub modified: usize,
}

/// A generation row.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    /// Opaque generation id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning project.
    pub project_id: String,
    /// 1-based version within the project.
    pub version: i64,
    /// The prompt that drove this generation.
    pub prompt: String,
    /// Free-form context map, stored as JSON.
    pub context: crate::provider::ContextMap,
    /// Lifecycle status string.
    pub status: String,
    /// Whether this generation derives from a parent.
    pub is_iteration: bool,
    /// Parent generation, required iff `is_iteration`.
    pub parent_generation_id: Option<String>,
    /// Artifact store path of the saved outputs.
    pub storage_path: Option<String>,
    /// Number of output files.
    pub file_count: Option<i64>,
    /// Total output size in bytes.
    pub total_size_bytes: Option<i64>,
    /// Output files, when retained inline rather than offloaded.
    pub output_files: Option<FileMap>,
    /// Path to the diff against the previous version.
    pub diff_from_previous: Option<String>,
    /// Change counts for iterations.
    pub changes: ChangesSummary,
    /// Review quality score in `[0.0, 1.0]`.
    pub quality_score: Option<f64>,
    /// Failure description for failed generations.
    pub error_message: Option<String>,
}

/// Fields for creating a generation.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    /// Opaque generation id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning project.
    pub project_id: String,
    /// Version allocated via `projects::next_version`.
    pub version: i64,
    /// The prompt.
    pub prompt: String,
    /// Free-form context map.
    pub context: crate::provider::ContextMap,
    /// Iteration flag.
    pub is_iteration: bool,
    /// Parent generation id, required iff `is_iteration`.
    pub parent_generation_id: Option<String>,
}

/// Output fields recorded after a successful save.
#[derive(Debug, Clone, Default)]
pub struct OutputsUpdate {
    /// Artifact store path.
    pub storage_path: String,
    /// Number of files saved.
    pub file_count: i64,
    /// Total bytes saved.
    pub total_size_bytes: i64,
    /// Inline copy of the outputs, if retained.
    pub output_files: Option<FileMap>,
    /// Diff path, present for versions > 1.
    pub diff_from_previous: Option<String>,
    /// Change counts for iterations.
    pub changes: ChangesSummary,
    /// Review quality score.
    pub quality_score: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct GenerationRow {
    id: String,
    user_id: String,
    project_id: String,
    version: i64,
    prompt: String,
    context: String,
    status: String,
    is_iteration: i64,
    parent_generation_id: Option<String>,
    storage_path: Option<String>,
    file_count: Option<i64>,
    total_size_bytes: Option<i64>,
    output_files: Option<String>,
    diff_from_previous: Option<String>,
    changes_added: i64,
    changes_removed: i64,
    changes_modified: i64,
    quality_score: Option<f64>,
    error_message: Option<String>,
}

impl From<GenerationRow> for GenerationRecord {
    fn from(row: GenerationRow) -> Self {
        GenerationRecord {
            id: row.id,
            user_id: row.user_id,
            project_id: row.project_id,
            version: row.version,
            prompt: row.prompt,
            context: serde_json::from_str(&row.context).unwrap_or_default(),
            status: row.status,
            is_iteration: row.is_iteration != 0,
            parent_generation_id: row.parent_generation_id,
            storage_path: row.storage_path,
            file_count: row.file_count,
            total_size_bytes: row.total_size_bytes,
            output_files: row
                .output_files
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            diff_from_previous: row.diff_from_previous,
            changes: ChangesSummary {
                added: row.changes_added.max(0) as usize,
                removed: row.changes_removed.max(0) as usize,
                modified: row.changes_modified.max(0) as usize,
            },
            quality_score: row.quality_score,
            error_message: row.error_message,
        }
    }
}

const SELECT_COLS: &str = "id, user_id, project_id, version, prompt, context, status, \
    is_iteration, parent_generation_id, storage_path, file_count, total_size_bytes, \
    output_files, diff_from_previous, changes_added, changes_removed, changes_modified, \
    quality_score, error_message";

/// Insert a new generation in pending status.
pub async fn create(pool: &DbPool, new: &NewGeneration) -> Result<(), StorageError> {
    let now = now_rfc3339();
    let context_json = serde_json::to_string(&new.context).unwrap_or_else(|_| "{}".to_string());
    sqlx::query(
        "INSERT INTO generations (id, user_id, project_id, version, prompt, context, status, \
         is_iteration, parent_generation_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?)",
    )
    .bind(&new.id)
    .bind(&new.user_id)
    .bind(&new.project_id)
    .bind(new.version)
    .bind(&new.prompt)
    .bind(&context_json)
    .bind(i64::from(new.is_iteration))
    .bind(&new.parent_generation_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Load a generation by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<GenerationRecord, StorageError> {
    let sql = format!("SELECT {SELECT_COLS} FROM generations WHERE id = ?");
    let row: Option<GenerationRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    row.map(GenerationRecord::from)
        .ok_or_else(|| StorageError::NotFound {
            entity: "generation",
            id: id.to_string(),
        })
}

/// Claim a pending generation for processing.
///
/// Atomic: returns true only for the single caller that flips
/// pending → processing.
pub async fn claim(pool: &DbPool, id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE generations SET status = 'processing', updated_at = ? \
         WHERE id = ? AND status = 'pending'",
    )
    .bind(now_rfc3339())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(result.rows_affected() == 1)
}

/// Transition a generation's status.
///
/// Terminal statuses are sticky: updating an already-completed or
/// already-failed record is a no-op.
pub async fn update_status(
    pool: &DbPool,
    id: &str,
    status: GenerationStatus,
    error_message: Option<&str>,
) -> Result<(), StorageError> {
    let now = now_rfc3339();
    let completed_at = if status.is_terminal() {
        Some(now.clone())
    } else {
        None
    };
    sqlx::query(
        "UPDATE generations SET status = ?, error_message = COALESCE(?, error_message), \
         updated_at = ?, completed_at = COALESCE(?, completed_at) \
         WHERE id = ? AND status NOT IN ('completed', 'failed')",
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(&now)
    .bind(&completed_at)
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Record output metadata after a successful save.
pub async fn record_outputs(
    pool: &DbPool,
    id: &str,
    outputs: &OutputsUpdate,
) -> Result<(), StorageError> {
    let output_files_json = outputs
        .output_files
        .as_ref()
        .map(|files| serde_json::to_string(files).unwrap_or_else(|_| "{}".to_string()));
    sqlx::query(
        "UPDATE generations SET storage_path = ?, file_count = ?, total_size_bytes = ?, \
         output_files = ?, diff_from_previous = ?, changes_added = ?, changes_removed = ?, \
         changes_modified = ?, quality_score = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&outputs.storage_path)
    .bind(outputs.file_count)
    .bind(outputs.total_size_bytes)
    .bind(&output_files_json)
    .bind(&outputs.diff_from_previous)
    .bind(outputs.changes.added as i64)
    .bind(outputs.changes.removed as i64)
    .bind(outputs.changes.modified as i64)
    .bind(outputs.quality_score)
    .bind(now_rfc3339())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// All generations of a project, oldest version first.
pub async fn list_by_project(
    pool: &DbPool,
    project_id: &str,
) -> Result<Vec<GenerationRecord>, StorageError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM generations WHERE project_id = ? ORDER BY version ASC"
    );
    let rows: Vec<GenerationRow> = sqlx::query_as(&sql)
        .bind(project_id)
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows.into_iter().map(GenerationRecord::from).collect())
}
