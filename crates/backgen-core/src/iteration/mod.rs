//! Context-aware iteration on an existing generation.
//!
//! Loads the parent's files, detects the user's intent, assembles a context
//! prompt, invokes the provider, merges the returned changes, and validates
//! the merge against accidental data loss before anything is persisted.

pub mod context;
pub mod intent;
pub mod schema_infer;

pub use intent::{detect_intent, Intent};

use crate::config::IterationConfig;
use crate::error::IterationError;
use crate::events::{EventSink, GenerationEvent};
use crate::provider::{ContextMap, FileMap, ProviderPort};
use crate::storage::generations::ChangesSummary;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Entrypoint paths whose rewrite marks a response as a full regeneration.
const ENTRYPOINT_PATHS: &[&str] = &["app/main.py", "main.py", "app.py", "src/main.py"];

/// Keyed mutexes serializing iterations per parent generation.
///
/// Iterations against different parents proceed in parallel; two against the
/// same parent queue behind each other.
#[derive(Default)]
pub struct ParentLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ParentLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, parent_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inner = self.inner.lock().expect("parent locks");
        Arc::clone(
            inner
                .entry(parent_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

/// Result of a completed iteration run.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    /// The merged file set to persist.
    pub files: FileMap,
    /// The detected intent.
    pub intent: Intent,
    /// Change counts relative to the parent.
    pub changes: ChangesSummary,
    /// True when the provider returned no changes at all.
    pub no_changes: bool,
}

/// The iteration engine.
pub struct IterationEngine {
    provider: Arc<dyn ProviderPort>,
    config: IterationConfig,
    locks: Arc<ParentLocks>,
}

impl IterationEngine {
    /// Create an engine over a provider and merge-safety configuration.
    pub fn new(
        provider: Arc<dyn ProviderPort>,
        config: IterationConfig,
        locks: Arc<ParentLocks>,
    ) -> Self {
        Self {
            provider,
            config,
            locks,
        }
    }

    /// Run one iteration against the parent's files.
    ///
    /// Emits the engine's progress ladder on `sink` (terminal events are the
    /// orchestrator's responsibility). Serialized per parent id.
    pub async fn run(
        &self,
        generation_id: &str,
        parent_generation_id: &str,
        existing: &FileMap,
        modification_prompt: &str,
        base_context: &ContextMap,
        sink: &dyn EventSink,
    ) -> Result<IterationOutcome, IterationError> {
        let parent_lock = self.locks.lock_for(parent_generation_id);
        let _guard = parent_lock.lock().await;

        sink.publish(GenerationEvent::progress(
            generation_id,
            "iteration_start",
            0.05,
            &format!("Starting iteration on {} existing files", existing.len()),
        ));

        let intent = detect_intent(modification_prompt);
        sink.publish(GenerationEvent::progress(
            generation_id,
            "intent_detection",
            0.10,
            &format!("Detected intent: {}", intent.as_str()),
        ));

        sink.publish(GenerationEvent::progress(
            generation_id,
            "context_building",
            0.20,
            "Building project context",
        ));
        let prompt = context::build_context_prompt(existing, modification_prompt, intent);
        let schema = schema_infer::schema_from_files(existing);

        let mut provider_context = base_context.clone();
        provider_context.insert("is_iteration".to_string(), "true".to_string());
        provider_context.insert("generation_id".to_string(), generation_id.to_string());
        provider_context.insert("iteration_intent".to_string(), intent.as_str().to_string());
        provider_context.insert(
            "existing_paths".to_string(),
            existing.keys().cloned().collect::<Vec<_>>().join("\n"),
        );

        sink.publish(GenerationEvent::progress(
            generation_id,
            "code_generation",
            0.40,
            "Generating changes",
        ));
        let changes = self
            .provider
            .generate_code(&prompt, &schema, &provider_context, sink)
            .await?;

        if changes.is_empty() {
            tracing::info!(
                generation_id = %generation_id,
                "provider returned no changes, keeping parent files"
            );
            sink.publish(GenerationEvent::progress(
                generation_id,
                "no_changes",
                0.80,
                "No changes were necessary",
            ));
            return Ok(IterationOutcome {
                files: existing.clone(),
                intent,
                changes: ChangesSummary::default(),
                no_changes: true,
            });
        }

        sink.publish(GenerationEvent::progress(
            generation_id,
            "merging_files",
            0.80,
            &format!("Merging {} changed files", changes.len()),
        ));
        let result = merge(existing, &changes, intent);

        if result.is_empty() {
            return Err(IterationError::EmptyResult);
        }

        let threshold = self.config.data_loss_threshold;
        let shrunk_below_threshold =
            (result.len() as f64) < threshold * (existing.len() as f64);
        if intent != Intent::Remove && shrunk_below_threshold {
            sink.publish(
                GenerationEvent::progress(
                    generation_id,
                    "validation",
                    0.85,
                    &format!(
                        "Merge would keep {} of {} files (threshold {:.0}%)",
                        result.len(),
                        existing.len(),
                        threshold * 100.0
                    ),
                )
                .with_warning("data_loss_detection"),
            );
            if self.config.data_loss_abort {
                return Err(IterationError::DataLossDetected {
                    result_count: result.len(),
                    existing_count: existing.len(),
                });
            }
            tracing::warn!(
                generation_id = %generation_id,
                result_count = result.len(),
                existing_count = existing.len(),
                "data loss threshold crossed, proceeding per configuration"
            );
        }

        let changes_summary = summarize_changes(existing, &result);
        Ok(IterationOutcome {
            files: result,
            intent,
            changes: changes_summary,
            no_changes: false,
        })
    }
}

/// Merge provider changes into the existing file set.
///
/// - `add` / `modify`: union, with changes overwriting on collision. A
///   multi-file change set that rewrites an existing entrypoint is treated
///   as a full regeneration and replaces the project outright (the data-loss
///   guard then judges it).
/// - `remove`: the returned keys are paths to drop.
pub fn merge(existing: &FileMap, changes: &FileMap, intent: Intent) -> FileMap {
    match intent {
        Intent::Remove => {
            let mut result = existing.clone();
            for path in changes.keys() {
                result.remove(path);
            }
            result
        }
        Intent::Add | Intent::Modify => {
            if is_full_regeneration(existing, changes) {
                return changes.clone();
            }
            let mut result = existing.clone();
            for (path, content) in changes {
                result.insert(path.clone(), content.clone());
            }
            result
        }
    }
}

/// A delta should not rewrite the project entrypoint alongside other files;
/// that shape means the provider regenerated from scratch.
fn is_full_regeneration(existing: &FileMap, changes: &FileMap) -> bool {
    changes.len() > 1
        && ENTRYPOINT_PATHS
            .iter()
            .any(|p| changes.contains_key(*p) && existing.contains_key(*p))
}

fn summarize_changes(existing: &FileMap, result: &FileMap) -> ChangesSummary {
    let mut summary = ChangesSummary::default();
    for (path, content) in result {
        match existing.get(path) {
            None => summary.added += 1,
            Some(old) if old != content => summary.modified += 1,
            Some(_) => {}
        }
    }
    for path in existing.keys() {
        if !result.contains_key(path) {
            summary.removed += 1;
        }
    }
    summary
}
