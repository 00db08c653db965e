//! Project persistence.

use super::{now_rfc3339, DbPool};
use crate::error::StorageError;
use chrono::{DateTime, Utc};

/// Project lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    /// Created, nothing generated yet.
    Draft,
    /// Has at least one completed generation.
    Active,
    /// Administratively archived.
    Archived,
}

impl ProjectStatus {
    /// Stable string stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Active => "active",
            ProjectStatus::Archived => "archived",
        }
    }
}

/// A project row.
#[derive(Debug, Clone)]
pub struct Project {
    /// Opaque project id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Domain tag from classification.
    pub domain: String,
    /// Tech-stack tag.
    pub tech_stack: String,
    /// Lifecycle status string.
    pub status: String,
    /// Whether this project was auto-created for an unattached generation.
    pub auto_created: bool,
    /// Where the auto-creation originated ("api", "playground", ...).
    pub creation_source: Option<String>,
    /// The prompt that triggered auto-creation, truncated to 1000 chars.
    pub original_prompt: Option<String>,
    /// Highest version number assigned so far (0 = none).
    pub latest_version: i64,
    /// The generation shown as current, if any.
    pub active_generation_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    /// Opaque project id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Domain tag.
    pub domain: String,
    /// Tech-stack tag.
    pub tech_stack: String,
    /// Auto-created flag.
    pub auto_created: bool,
    /// Creation source.
    pub creation_source: Option<String>,
    /// Original prompt (will be truncated to 1000 chars).
    pub original_prompt: Option<String>,
}

/// Maximum stored length of `original_prompt`.
const MAX_ORIGINAL_PROMPT_CHARS: usize = 1000;

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    user_id: String,
    name: String,
    domain: String,
    tech_stack: String,
    status: String,
    auto_created: i64,
    creation_source: Option<String>,
    original_prompt: Option<String>,
    latest_version: i64,
    active_generation_id: Option<String>,
    created_at: String,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            domain: row.domain,
            tech_stack: row.tech_stack,
            status: row.status,
            auto_created: row.auto_created != 0,
            creation_source: row.creation_source,
            original_prompt: row.original_prompt,
            latest_version: row.latest_version,
            active_generation_id: row.active_generation_id,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const SELECT_COLS: &str = "id, user_id, name, domain, tech_stack, status, auto_created, \
    creation_source, original_prompt, latest_version, active_generation_id, created_at";

/// Insert a new project in draft status.
pub async fn create(pool: &DbPool, new: &NewProject) -> Result<Project, StorageError> {
    let now = now_rfc3339();
    let truncated_prompt = new.original_prompt.as_ref().map(|p| {
        p.chars().take(MAX_ORIGINAL_PROMPT_CHARS).collect::<String>()
    });
    sqlx::query(
        "INSERT INTO projects (id, user_id, name, domain, tech_stack, status, auto_created, \
         creation_source, original_prompt, latest_version, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, 'draft', ?, ?, ?, 0, ?, ?)",
    )
    .bind(&new.id)
    .bind(&new.user_id)
    .bind(&new.name)
    .bind(&new.domain)
    .bind(&new.tech_stack)
    .bind(i64::from(new.auto_created))
    .bind(&new.creation_source)
    .bind(&truncated_prompt)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    get_by_id(pool, &new.id).await
}

/// Load a project by id.
pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Project, StorageError> {
    let sql = format!("SELECT {SELECT_COLS} FROM projects WHERE id = ?");
    let row: Option<ProjectRow> = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    row.map(Project::from).ok_or_else(|| StorageError::NotFound {
        entity: "project",
        id: id.to_string(),
    })
}

/// Auto-created projects for a user newer than `cutoff`, newest first.
pub async fn recent_auto_projects(
    pool: &DbPool,
    user_id: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Project>, StorageError> {
    let sql = format!(
        "SELECT {SELECT_COLS} FROM projects \
         WHERE user_id = ? AND auto_created = 1 AND created_at >= ? \
         ORDER BY created_at DESC"
    );
    let rows: Vec<ProjectRow> = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(cutoff.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows.into_iter().map(Project::from).collect())
}

/// Atomically increment the project's latest version and return the new value.
///
/// This is the serialization point for version assignment within a project.
pub async fn next_version(pool: &DbPool, project_id: &str) -> Result<i64, StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let updated = sqlx::query(
        "UPDATE projects SET latest_version = latest_version + 1, updated_at = ? WHERE id = ?",
    )
    .bind(now_rfc3339())
    .bind(project_id)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    if updated.rows_affected() == 0 {
        return Err(StorageError::NotFound {
            entity: "project",
            id: project_id.to_string(),
        });
    }

    let row: (i64,) = sqlx::query_as("SELECT latest_version FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(row.0)
}

/// Point the project at its current completed generation and mark it active.
pub async fn set_active_generation(
    pool: &DbPool,
    project_id: &str,
    generation_id: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE projects SET active_generation_id = ?, status = 'active', updated_at = ? \
         WHERE id = ?",
    )
    .bind(generation_id)
    .bind(now_rfc3339())
    .bind(project_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

/// Archive a project administratively.
pub async fn archive(pool: &DbPool, project_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE projects SET status = 'archived', updated_at = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(project_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}
