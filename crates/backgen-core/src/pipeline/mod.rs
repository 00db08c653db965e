//! Per-generation orchestration.
//!
//! One orchestrator instance drives one generation at a time through claim,
//! dispatch (fresh pipeline or iteration), staged provider calls, artifact
//! persistence, and terminal event emission. Concurrency across generations
//! comes from running one orchestrator task per generation.

pub mod phased;


use crate::artifacts::{openapi, ArtifactStore};
use crate::config::Config;
use crate::error::{PipelineError, ProviderError};
use crate::events::{EventBus, EventSink, GenerationEvent, PhaseInfo};
use crate::iteration::{IterationEngine, ParentLocks};
use crate::provider::{registry::ProviderRegistry, FileMap, ProviderTask};
use crate::storage::generations::{
    self, ChangesSummary, GenerationRecord, GenerationStatus, OutputsUpdate,
};
use crate::storage::{projects, DbPool};
use self::phased::{IncrementalWriter, PhasedCodeGenerator};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff schedule for retryable provider failures.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(4)];

/// Call a provider operation with the standard retry policy.
///
/// Transient and rate-limited failures are retried with backoff; everything
/// else returns immediately.
pub(crate) async fn call_with_retries<T, F, Fut>(
    operation: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < RETRY_BACKOFF.len() => {
                let delay = RETRY_BACKOFF[attempt];
                attempt += 1;
                tracing::warn!(
                    operation = %operation,
                    attempt = attempt,
                    delay_s = delay.as_secs(),
                    error = %e,
                    "retryable provider failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

struct Finished {
    file_count: usize,
    is_iteration: bool,
}

/// Top-level state machine for one generation.
pub struct Orchestrator {
    pool: DbPool,
    registry: Arc<ProviderRegistry>,
    store: Arc<ArtifactStore>,
    bus: Arc<EventBus>,
    config: Arc<Config>,
    parent_locks: Arc<ParentLocks>,
}

impl Orchestrator {
    /// Create an orchestrator over shared service state.
    pub fn new(
        pool: DbPool,
        registry: Arc<ProviderRegistry>,
        store: Arc<ArtifactStore>,
        bus: Arc<EventBus>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            registry,
            store,
            bus,
            config,
            parent_locks: Arc::new(ParentLocks::new()),
        }
    }

    /// Drive one generation to a terminal state.
    ///
    /// Claims the pending record, runs the pipeline, finalizes repository
    /// status, and always ends the event channel with exactly one terminal
    /// event.
    pub async fn run(&self, generation_id: &str, cancel: CancellationToken) {
        let record = match generations::get_by_id(&self.pool, generation_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(generation_id = %generation_id, error = %e, "generation not loadable");
                return;
            }
        };

        match generations::claim(&self.pool, generation_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(generation_id = %generation_id, "generation already claimed, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(generation_id = %generation_id, error = %e, "claim failed");
                return;
            }
        }

        match self.execute(&record, &cancel).await {
            Ok(finished) => {
                if let Err(e) = generations::update_status(
                    &self.pool,
                    generation_id,
                    GenerationStatus::Completed,
                    None,
                )
                .await
                {
                    tracing::error!(generation_id = %generation_id, error = %e, "failed to finalize status");
                }
                let event = if finished.is_iteration {
                    GenerationEvent::completed(
                        generation_id,
                        "iteration_complete",
                        &format!("Iteration complete: {} files", finished.file_count),
                    )
                    .with_phase_info(PhaseInfo {
                        total_phases: 0,
                        current_phase: 0,
                        name: "iteration".to_string(),
                        files_generated: None,
                        total_files: Some(finished.file_count),
                        entities_count: None,
                    })
                } else {
                    GenerationEvent::completed(generation_id, "completed", "Generation complete!")
                };
                self.bus.publish(event);
            }
            Err(e) => {
                let correlation_id = uuid::Uuid::new_v4().to_string();
                tracing::error!(
                    generation_id = %generation_id,
                    correlation_id = %correlation_id,
                    error = %e,
                    "generation failed"
                );
                let message = e.user_message();
                if let Err(update_err) = generations::update_status(
                    &self.pool,
                    generation_id,
                    GenerationStatus::Failed,
                    Some(&message),
                )
                .await
                {
                    tracing::error!(
                        generation_id = %generation_id,
                        error = %update_err,
                        "failed to record failure status"
                    );
                }
                self.bus.publish(GenerationEvent::failed(
                    generation_id,
                    "Generation failed",
                    &message,
                ));
            }
        }
    }

    async fn execute(
        &self,
        record: &GenerationRecord,
        cancel: &CancellationToken,
    ) -> Result<Finished, PipelineError> {
        if record.is_iteration {
            self.execute_iteration(record, cancel).await
        } else {
            self.execute_fresh(record, cancel).await
        }
    }

    // -----------------------------------------------------------------
    // Fresh pipeline
    // -----------------------------------------------------------------

    async fn execute_fresh(
        &self,
        record: &GenerationRecord,
        cancel: &CancellationToken,
    ) -> Result<Finished, PipelineError> {
        let gid = record.id.as_str();
        let stage_timeout = Duration::from_secs(self.config.timeouts.stage_timeout_s);
        let codegen_timeout = Duration::from_secs(self.config.timeouts.codegen_timeout_s);

        self.bus.publish(GenerationEvent::progress(
            gid,
            "initialization",
            0.02,
            "Starting code generation pipeline...",
        ));

        if record.context.get("enhanced").is_some_and(|v| v == "true") {
            self.bus.publish(GenerationEvent::progress(
                gid,
                "context_analysis",
                0.05,
                "Analyzing project context...",
            ));
        }

        ensure_not_cancelled(cancel)?;
        self.bus.publish(GenerationEvent::progress(
            gid,
            "schema_extraction",
            0.10,
            "Extracting project schema...",
        ));
        let schema_provider = self.registry.get(ProviderTask::SchemaExtraction)?;
        let schema = with_timeout(stage_timeout, "schema_extraction", async {
            call_with_retries("extract_schema", || {
                schema_provider.extract_schema(&record.prompt, &record.context)
            })
            .await
        })
        .await?;
        tracing::info!(
            generation_id = %gid,
            entities = schema.entities.len(),
            "schema extracted"
        );

        ensure_not_cancelled(cancel)?;
        self.bus.publish(GenerationEvent::progress(
            gid,
            "code_generation_start",
            0.15,
            "Starting code generation...",
        ));
        let codegen_provider = self.registry.get(ProviderTask::CodeGeneration)?;
        let generator = PhasedCodeGenerator::new(Arc::clone(&codegen_provider));
        let writer = IncrementalWriter::new(&self.store, &record.project_id, gid, record.version);
        let mut files = with_timeout(codegen_timeout, "code_generation", async {
            generator
                .generate(
                    gid,
                    &record.prompt,
                    &schema,
                    &record.context,
                    self.bus.as_ref(),
                    Some(&writer),
                )
                .await
        })
        .await?;

        self.bus.publish(GenerationEvent::progress(
            gid,
            "code_generation_complete",
            0.85,
            &format!("Generated {} files", files.len()),
        ));

        // Review is advisory: a failure costs the quality score, never the run.
        ensure_not_cancelled(cancel)?;
        self.bus.publish(GenerationEvent::progress(
            gid,
            "code_review",
            0.92,
            "Reviewing generated code...",
        ));
        let quality_score = match self.review(&files, stage_timeout).await {
            Ok(report) => {
                tracing::info!(
                    generation_id = %gid,
                    issues = report.issues.len(),
                    quality_score = report.quality_score,
                    "review complete"
                );
                Some(report.quality_score)
            }
            Err(e) => {
                tracing::warn!(generation_id = %gid, error = %e, "review failed, continuing");
                None
            }
        };

        ensure_not_cancelled(cancel)?;
        self.bus.publish(GenerationEvent::progress(
            gid,
            "documentation",
            0.95,
            "Generating documentation...",
        ));
        let docs_provider = self.registry.get(ProviderTask::Documentation)?;
        let mut docs_context = record.context.clone();
        if let Ok(project) = projects::get_by_id(&self.pool, &record.project_id).await {
            docs_context.insert("project_name".to_string(), project.name);
        }
        let docs = with_timeout(stage_timeout, "documentation", async {
            call_with_retries("generate_documentation", || {
                docs_provider.generate_documentation(&files, &schema, &docs_context)
            })
            .await
        })
        .await?;
        files.extend(docs);

        ensure_not_cancelled(cancel)?;
        self.bus.publish(GenerationEvent::progress(
            gid,
            "saving",
            0.98,
            "Saving generation...",
        ));
        let file_count = files.len();
        self.persist(record, &files, ChangesSummary::default(), quality_score, Some(&schema))
            .await?;

        Ok(Finished {
            file_count,
            is_iteration: false,
        })
    }

    async fn review(
        &self,
        files: &FileMap,
        stage_timeout: Duration,
    ) -> Result<crate::provider::ReviewReport, PipelineError> {
        let provider = self.registry.get(ProviderTask::CodeReview)?;
        let report = with_timeout(stage_timeout, "code_review", async {
            call_with_retries("review_code", || provider.review_code(files)).await
        })
        .await?;
        Ok(report)
    }

    // -----------------------------------------------------------------
    // Iteration pipeline
    // -----------------------------------------------------------------

    async fn execute_iteration(
        &self,
        record: &GenerationRecord,
        cancel: &CancellationToken,
    ) -> Result<Finished, PipelineError> {
        let gid = record.id.as_str();
        let parent_id = record.parent_generation_id.as_deref().ok_or_else(|| {
            PipelineError::InvalidRequest {
                message: "iteration without parent_generation_id".to_string(),
            }
        })?;

        let parent = generations::get_by_id(&self.pool, parent_id).await?;
        if parent.project_id != record.project_id {
            return Err(PipelineError::InvalidRequest {
                message: "parent generation belongs to a different project".to_string(),
            });
        }
        if parent.status != GenerationStatus::Completed.as_str() {
            return Err(PipelineError::InvalidRequest {
                message: format!("parent generation is {}, not completed", parent.status),
            });
        }

        let existing = self.load_parent_files(&parent)?;
        ensure_not_cancelled(cancel)?;

        let provider = self.registry.get(ProviderTask::CodeGeneration)?;
        let engine = IterationEngine::new(
            provider,
            self.config.iteration.clone(),
            Arc::clone(&self.parent_locks),
        );
        let codegen_timeout = Duration::from_secs(self.config.timeouts.codegen_timeout_s);
        let outcome = tokio::time::timeout(
            codegen_timeout,
            engine.run(
                gid,
                parent_id,
                &existing,
                &record.prompt,
                &record.context,
                self.bus.as_ref(),
            ),
        )
        .await
        .map_err(|_| {
            PipelineError::Provider(ProviderError::Transient {
                message: "iteration timed out".to_string(),
            })
        })??;

        ensure_not_cancelled(cancel)?;
        let file_count = outcome.files.len();
        self.persist(record, &outcome.files, outcome.changes, None, None)
            .await?;

        Ok(Finished {
            file_count,
            is_iteration: true,
        })
    }

    fn load_parent_files(&self, parent: &GenerationRecord) -> Result<FileMap, PipelineError> {
        if let Some(files) = &parent.output_files {
            if !files.is_empty() {
                return Ok(files.clone());
            }
        }
        let source = self
            .store
            .lookup_generation_dir(Some(&parent.project_id), Some(parent.version), Some(&parent.id))
            .ok_or_else(|| PipelineError::NotFound {
                entity: "parent outputs",
                id: parent.id.clone(),
            })?;
        Ok(crate::artifacts::read_tree(&source)?)
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    async fn persist(
        &self,
        record: &GenerationRecord,
        files: &FileMap,
        changes: ChangesSummary,
        quality_score: Option<f64>,
        schema: Option<&crate::provider::ProjectSchema>,
    ) -> Result<(), PipelineError> {
        let gid = record.id.as_str();
        let project = projects::get_by_id(&self.pool, &record.project_id).await?;

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "tech_stack".to_string(),
            serde_json::Value::String(project.tech_stack.clone()),
        );
        metadata.insert(
            "domain".to_string(),
            serde_json::Value::String(project.domain.clone()),
        );
        metadata.insert(
            "is_iteration".to_string(),
            serde_json::Value::Bool(record.is_iteration),
        );

        let report = self.store.save_hierarchical(
            &record.project_id,
            gid,
            record.version,
            files,
            metadata,
        )?;

        if let Some(schema) = schema {
            let doc = openapi::render_openapi(schema, &project.name);
            let rendered = serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string());
            if let Err(e) =
                self.store
                    .write_artifact(&record.project_id, gid, record.version, "openapi.json", &rendered)
            {
                tracing::warn!(generation_id = %gid, error = %e, "openapi artifact not written");
            }
        }

        let diff_from_previous = if record.version > 1 {
            match self
                .store
                .diff(&record.project_id, record.version - 1, record.version)
            {
                Ok(path) => Some(path.display().to_string()),
                Err(e) => {
                    // Previous version may already be archived; the diff is
                    // best effort.
                    tracing::warn!(generation_id = %gid, error = %e, "diff not produced");
                    None
                }
            }
        } else {
            None
        };

        self.store.set_active(&record.project_id, record.version);

        generations::record_outputs(
            &self.pool,
            gid,
            &OutputsUpdate {
                storage_path: report.path.display().to_string(),
                file_count: report.file_count as i64,
                total_size_bytes: report.total_size_bytes as i64,
                output_files: Some(files.clone()),
                diff_from_previous,
                changes,
                quality_score,
            },
        )
        .await?;

        projects::set_active_generation(&self.pool, &record.project_id, gid).await?;
        Ok(())
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

async fn with_timeout<T>(
    duration: Duration,
    stage: &str,
    fut: impl std::future::Future<Output = Result<T, ProviderError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::Provider(ProviderError::Transient {
            message: format!("stage '{stage}' timed out after {}s", duration.as_secs()),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_recover_from_transient_failures() {
        tokio::time::pause();
        let attempts = AtomicUsize::new(0);
        let task = call_with_retries("op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient {
                        message: "flaky".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        });
        tokio::pin!(task);

        // Paused time: advance through both backoff sleeps.
        let result = loop {
            tokio::select! {
                r = &mut task => break r,
                () = tokio::time::advance(Duration::from_secs(1)) => {}
            }
        };
        assert_eq!(result.expect("recovered"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhausted_surfaces_error() {
        tokio::time::pause();
        let task = call_with_retries("op", || async {
            Err::<(), _>(ProviderError::Transient {
                message: "always".to_string(),
            })
        });
        tokio::pin!(task);

        let result = loop {
            tokio::select! {
                r = &mut task => break r,
                () = tokio::time::advance(Duration::from_secs(1)) => {}
            }
        };
        assert!(matches!(result, Err(ProviderError::Transient { .. })));
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let attempts = AtomicUsize::new(0);
        let result = call_with_retries("op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(ProviderError::Unavailable {
                    message: "no key".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Unavailable { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_maps_to_transient() {
        let err = with_timeout(Duration::from_millis(10), "slow_stage", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), ProviderError>(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("slow_stage"));
    }
}
