//! Auto-project creation for unattached generations.
//!
//! When a generation arrives without a project, one is created from the
//! prompt classification — unless the user already has a recent auto-created
//! project with the same suggested name, in which case it is reused.

use crate::classifier::{self, Classification};
use crate::error::StorageError;
use crate::storage::projects::{self, NewProject, Project};
use crate::storage::DbPool;
use chrono::Utc;

/// Result of resolving an auto-project.
#[derive(Debug, Clone)]
pub struct AutoProjectOutcome {
    /// The project to attach the generation to.
    pub project: Project,
    /// Whether this call created the project (false = deduplicated reuse).
    pub created: bool,
    /// The classification that drove naming.
    pub classification: Classification,
}

/// Creates or reuses auto-projects.
pub struct AutoProjectService {
    pool: DbPool,
    dedup_window_s: i64,
}

impl AutoProjectService {
    /// Create a service over the given pool and dedup window.
    pub fn new(pool: DbPool, dedup_window_s: i64) -> Self {
        Self {
            pool,
            dedup_window_s,
        }
    }

    /// Resolve a project for an unattached generation.
    ///
    /// Dedup failures must not block generation: a storage error during the
    /// lookup logs a warning and falls through to creation.
    pub async fn resolve(
        &self,
        user_id: &str,
        prompt: &str,
        tech_stack_hint: Option<&str>,
        creation_source: &str,
    ) -> Result<AutoProjectOutcome, StorageError> {
        let classification = classifier::classify(prompt, tech_stack_hint);

        let cutoff = Utc::now() - chrono::Duration::seconds(self.dedup_window_s);
        match projects::recent_auto_projects(&self.pool, user_id, cutoff).await {
            Ok(recent) => {
                if let Some(existing) = recent
                    .into_iter()
                    .find(|p| p.name == classification.suggested_name)
                {
                    tracing::info!(
                        user_id = %user_id,
                        project_id = %existing.id,
                        name = %existing.name,
                        "reusing recent auto-created project"
                    );
                    return Ok(AutoProjectOutcome {
                        project: existing,
                        created: false,
                        classification,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "auto-project dedup lookup failed, creating a new project"
                );
            }
        }

        let project = projects::create(
            &self.pool,
            &NewProject {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                name: classification.suggested_name.clone(),
                domain: classification.domain.clone(),
                tech_stack: classification.tech_stack.clone(),
                auto_created: true,
                creation_source: Some(creation_source.to_string()),
                original_prompt: Some(prompt.to_string()),
            },
        )
        .await?;

        tracing::info!(
            user_id = %user_id,
            project_id = %project.id,
            name = %project.name,
            domain = %project.domain,
            "auto-created project"
        );

        Ok(AutoProjectOutcome {
            project,
            created: true,
            classification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn creates_project_from_classification() {
        let pool = init_test_db().await.expect("db");
        let service = AutoProjectService::new(pool, 3600);

        let outcome = service
            .resolve("u1", "Blog API with User and Post", None, "api")
            .await
            .expect("resolve");

        assert!(outcome.created);
        assert_eq!(outcome.project.name, "Blog API");
        assert!(outcome.project.auto_created);
        assert_eq!(outcome.project.creation_source.as_deref(), Some("api"));
        assert_eq!(outcome.classification.entities, vec!["User", "Post"]);
    }

    #[tokio::test]
    async fn reuses_recent_project_with_same_name() {
        let pool = init_test_db().await.expect("db");
        let service = AutoProjectService::new(pool, 3600);

        let first = service
            .resolve("u1", "Blog API with User and Post", None, "api")
            .await
            .expect("first");
        let second = service
            .resolve("u1", "Blog API with User and Post", None, "api")
            .await
            .expect("second");

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.project.id, second.project.id);
    }

    #[tokio::test]
    async fn different_names_do_not_dedup() {
        let pool = init_test_db().await.expect("db");
        let service = AutoProjectService::new(pool, 3600);

        let blog = service
            .resolve("u1", "Blog API with posts", None, "api")
            .await
            .expect("blog");
        let shop = service
            .resolve("u1", "Shop API with products", None, "api")
            .await
            .expect("shop");

        assert_ne!(blog.project.id, shop.project.id);
    }

    #[tokio::test]
    async fn other_users_projects_are_not_reused() {
        let pool = init_test_db().await.expect("db");
        let service = AutoProjectService::new(pool, 3600);

        let a = service
            .resolve("u1", "Blog API with posts", None, "api")
            .await
            .expect("a");
        let b = service
            .resolve("u2", "Blog API with posts", None, "api")
            .await
            .expect("b");

        assert!(b.created);
        assert_ne!(a.project.id, b.project.id);
    }

    #[tokio::test]
    async fn zero_window_never_dedups() {
        let pool = init_test_db().await.expect("db");
        let service = AutoProjectService::new(pool, 0);

        let first = service
            .resolve("u1", "Blog API with posts", None, "api")
            .await
            .expect("first");
        let second = service
            .resolve("u1", "Blog API with posts", None, "api")
            .await
            .expect("second");

        assert!(first.created);
        // A zero-second window means nothing is "recent".
        assert!(second.created);
        assert_ne!(first.project.id, second.project.id);
    }

    #[tokio::test]
    async fn long_prompt_is_truncated_on_the_project() {
        let pool = init_test_db().await.expect("db");
        let service = AutoProjectService::new(pool, 3600);

        let prompt = format!("Blog API with posts. {}", "detail ".repeat(400));
        let outcome = service
            .resolve("u1", &prompt, None, "api")
            .await
            .expect("resolve");
        assert_eq!(
            outcome
                .project
                .original_prompt
                .expect("original prompt")
                .len(),
            1000
        );
    }
}
