//! Submission surface for the generation service.
//!
//! The transport layer (HTTP, out of scope here) calls into this module:
//! submit a generation or iteration, subscribe to its event stream, cancel
//! it. Each accepted submission spawns one orchestrator task.

use crate::autoproject::AutoProjectService;
use crate::config::Config;
use crate::error::{ConfigError, PipelineError, StreamError};
use crate::events::EventBus;
use crate::pipeline::Orchestrator;
use crate::provider::{registry::ProviderRegistry, ContextMap};
use crate::storage::generations::{self, GenerationStatus, NewGeneration};
use crate::storage::{projects, DbPool};
use crate::stream::{EventStream, StreamGateway};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Request to create a fresh generation.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    /// The requesting user.
    pub user_id: String,
    /// Natural-language prompt.
    pub prompt: String,
    /// Existing project to attach to; absent means auto-create.
    pub project_id: Option<String>,
    /// Tech-stack override.
    pub tech_stack: Option<String>,
    /// Domain override.
    pub domain: Option<String>,
    /// Extra context forwarded to the pipeline.
    pub context: ContextMap,
    /// Where the submission originated ("api", "playground", ...).
    pub creation_source: Option<String>,
}

/// Request to derive a new version from a completed generation.
#[derive(Debug, Clone)]
pub struct IterateRequest {
    /// The requesting user.
    pub user_id: String,
    /// The completed generation to iterate on.
    pub parent_generation_id: String,
    /// What to change.
    pub modification_prompt: String,
    /// Tech-stack override.
    pub tech_stack: Option<String>,
}

/// Envelope returned for both fresh and iteration submissions.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubmitResponse {
    /// The new generation's id.
    pub generation_id: String,
    /// The owning project.
    pub project_id: String,
    /// Always "pending" at submission time.
    pub status: String,
    /// Single-use token for the event stream.
    pub stream_token: String,
    /// Whether a project was auto-created for this submission.
    pub auto_created_project: bool,
    /// The project's display name.
    pub project_name: String,
    /// The project's domain tag.
    pub project_domain: String,
    /// The allocated version.
    pub version: i64,
    /// Whether this generation is an iteration.
    pub is_iteration: bool,
}

/// Front door of the service: owns the shared state and spawns orchestrators.
pub struct GenerationService {
    pool: DbPool,
    bus: Arc<EventBus>,
    gateway: StreamGateway,
    orchestrator: Arc<Orchestrator>,
    auto_projects: AutoProjectService,
    store: Arc<crate::artifacts::ArtifactStore>,
    config: Arc<Config>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl GenerationService {
    /// Build the service from a database pool and validated configuration.
    pub fn new(pool: DbPool, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);

        let registry = Arc::new(ProviderRegistry::new(config.providers.clone()));
        let store = Arc::new(crate::artifacts::ArtifactStore::new(
            &config.storage.storage_root,
        ));
        let bus = Arc::new(EventBus::with_capacity(config.stream.buffer_capacity));
        let gateway = StreamGateway::new(Arc::clone(&bus), &config.stream);
        let orchestrator = Arc::new(Orchestrator::new(
            pool.clone(),
            registry,
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&config),
        ));
        let auto_projects =
            AutoProjectService::new(pool.clone(), config.auto_project.dedup_window_s);

        Ok(Self {
            pool,
            bus,
            gateway,
            orchestrator,
            auto_projects,
            store,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Apply the retention policy to a project's stored generations.
    ///
    /// Returns the archived directory names.
    pub fn cleanup_project(&self, project_id: &str) -> Result<Vec<String>, crate::error::ArtifactError> {
        self.store.cleanup(
            project_id,
            self.config.retention.keep_latest,
            self.config.retention.archive_age_days,
        )
    }

    /// Submit a fresh generation.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, PipelineError> {
        if request.prompt.trim().is_empty() {
            return Err(PipelineError::InvalidRequest {
                message: "prompt must not be empty".to_string(),
            });
        }
        if request.user_id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest {
                message: "user_id must not be empty".to_string(),
            });
        }

        let (project, auto_created) = match &request.project_id {
            Some(project_id) => {
                let project = projects::get_by_id(&self.pool, project_id).await?;
                if project.user_id != request.user_id {
                    return Err(PipelineError::NotFound {
                        entity: "project",
                        id: project_id.clone(),
                    });
                }
                (project, false)
            }
            None => {
                let outcome = self
                    .auto_projects
                    .resolve(
                        &request.user_id,
                        &request.prompt,
                        request.tech_stack.as_deref(),
                        request.creation_source.as_deref().unwrap_or("api"),
                    )
                    .await?;
                (outcome.project, outcome.created)
            }
        };

        let mut context = request.context.clone();
        context.insert(
            "tech_stack".to_string(),
            request
                .tech_stack
                .clone()
                .unwrap_or_else(|| project.tech_stack.clone()),
        );
        context.insert(
            "domain".to_string(),
            request.domain.clone().unwrap_or_else(|| project.domain.clone()),
        );

        self.start_generation(
            &request.user_id,
            &project,
            &request.prompt,
            context,
            auto_created,
            None,
        )
        .await
    }

    /// Submit an iteration on a completed generation.
    pub async fn iterate(&self, request: IterateRequest) -> Result<SubmitResponse, PipelineError> {
        if request.modification_prompt.trim().is_empty() {
            return Err(PipelineError::InvalidRequest {
                message: "modification_prompt must not be empty".to_string(),
            });
        }

        let parent = generations::get_by_id(&self.pool, &request.parent_generation_id).await?;
        if parent.user_id != request.user_id {
            return Err(PipelineError::NotFound {
                entity: "generation",
                id: request.parent_generation_id.clone(),
            });
        }
        if parent.status != GenerationStatus::Completed.as_str() {
            return Err(PipelineError::InvalidRequest {
                message: format!(
                    "parent generation is {}, only completed generations can be iterated",
                    parent.status
                ),
            });
        }

        let project = projects::get_by_id(&self.pool, &parent.project_id).await?;

        let mut context = ContextMap::new();
        context.insert(
            "tech_stack".to_string(),
            request
                .tech_stack
                .clone()
                .unwrap_or_else(|| project.tech_stack.clone()),
        );
        context.insert("domain".to_string(), project.domain.clone());

        self.start_generation(
            &request.user_id,
            &project,
            &request.modification_prompt,
            context,
            false,
            Some(parent.id),
        )
        .await
    }

    /// Attach to a generation's event stream with a token from submission.
    pub fn subscribe(
        &self,
        generation_id: &str,
        token: &str,
    ) -> Result<EventStream, StreamError> {
        self.gateway.subscribe(generation_id, token)
    }

    /// Issue a fresh stream token (reconnection path).
    pub fn issue_stream_token(&self, user_id: &str, generation_id: &str) -> String {
        self.gateway.issue_token(user_id, generation_id)
    }

    /// Request cooperative cancellation of a running generation.
    ///
    /// Returns false when the generation is not currently running.
    pub fn cancel(&self, generation_id: &str) -> bool {
        let running = self.running.lock().expect("running lock");
        match running.get(generation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// The shared event bus (transport layers publish nothing; read-only use).
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    async fn start_generation(
        &self,
        user_id: &str,
        project: &projects::Project,
        prompt: &str,
        context: ContextMap,
        auto_created: bool,
        parent_generation_id: Option<String>,
    ) -> Result<SubmitResponse, PipelineError> {
        let version = projects::next_version(&self.pool, &project.id).await?;
        let generation_id = uuid::Uuid::new_v4().to_string();
        let is_iteration = parent_generation_id.is_some();

        generations::create(
            &self.pool,
            &NewGeneration {
                id: generation_id.clone(),
                user_id: user_id.to_string(),
                project_id: project.id.clone(),
                version,
                prompt: prompt.to_string(),
                context,
                is_iteration,
                parent_generation_id,
            },
        )
        .await?;

        let stream_token = self.gateway.issue_token(user_id, &generation_id);

        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock().expect("running lock");
            running.insert(generation_id.clone(), cancel.clone());
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let running = Arc::clone(&self.running);
        let spawned_id = generation_id.clone();
        tokio::spawn(async move {
            orchestrator.run(&spawned_id, cancel).await;
            running.lock().expect("running lock").remove(&spawned_id);
        });

        tracing::info!(
            generation_id = %generation_id,
            project_id = %project.id,
            version = version,
            is_iteration = is_iteration,
            "generation submitted"
        );

        Ok(SubmitResponse {
            generation_id,
            project_id: project.id.clone(),
            status: GenerationStatus::Pending.as_str().to_string(),
            stream_token,
            auto_created_project: auto_created,
            project_name: project.name.clone(),
            project_domain: project.domain.clone(),
            version,
            is_iteration,
        })
    }
}
