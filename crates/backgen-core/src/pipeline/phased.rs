//! Phased code generation.
//!
//! Splits a full-project generation into ordered phases (core infrastructure,
//! one phase per schema entity, router integration, utilities), emits a
//! progress event at every phase boundary, and optionally persists each
//! phase's output so a late failure keeps the partial project on disk.

use crate::artifacts::ArtifactStore;
use crate::error::ProviderError;
use crate::events::{EventSink, GenerationEvent, PhaseInfo};
use crate::provider::{ContextMap, FileMap, ProjectSchema, ProviderPort};
use std::sync::Arc;

/// Writes phase outputs into a generation's `source/` directory as they land.
pub struct IncrementalWriter<'a> {
    store: &'a ArtifactStore,
    project_id: &'a str,
    generation_id: &'a str,
    version: i64,
}

impl<'a> IncrementalWriter<'a> {
    /// Create a writer for one generation.
    pub fn new(
        store: &'a ArtifactStore,
        project_id: &'a str,
        generation_id: &'a str,
        version: i64,
    ) -> Self {
        Self {
            store,
            project_id,
            generation_id,
            version,
        }
    }

    fn persist(&self, files: &FileMap) {
        // Best effort: incremental persistence exists for post-mortems, a
        // write failure must not fail the phase that produced the files.
        if let Err(e) = self.store.write_source_files(
            self.project_id,
            self.generation_id,
            self.version,
            files,
        ) {
            tracing::warn!(
                generation_id = %self.generation_id,
                error = %e,
                "incremental persistence failed"
            );
        }
    }
}

/// Generates a project in ordered phases through a provider.
pub struct PhasedCodeGenerator {
    provider: Arc<dyn ProviderPort>,
}

impl PhasedCodeGenerator {
    /// Create a generator over a provider.
    pub fn new(provider: Arc<dyn ProviderPort>) -> Self {
        Self { provider }
    }

    /// Run all phases and return the union of their outputs.
    ///
    /// Progress moves from 0.18 (`phased_generation_started`, placed just
    /// above the orchestrator's `code_generation_start` so a stream never
    /// goes backwards) to 0.80 (`phased_generation_complete`). With zero
    /// entities the per-entity phase is skipped but the start/complete
    /// envelope is still emitted.
    pub async fn generate(
        &self,
        generation_id: &str,
        prompt: &str,
        schema: &ProjectSchema,
        context: &ContextMap,
        sink: &dyn EventSink,
        writer: Option<&IncrementalWriter<'_>>,
    ) -> Result<FileMap, ProviderError> {
        let entity_count = schema.entities.len();
        let total_phases = entity_count + 3;
        let mut all_files = FileMap::new();
        let mut current_phase = 0usize;

        sink.publish(
            GenerationEvent::progress(
                generation_id,
                "phased_generation_started",
                0.18,
                &format!("Starting phased generation for {entity_count} entities"),
            )
            .with_phase_info(PhaseInfo {
                total_phases,
                current_phase,
                name: "phased_generation".to_string(),
                files_generated: None,
                total_files: None,
                entities_count: Some(entity_count),
            }),
        );

        // Phase 1: core infrastructure.
        current_phase += 1;
        let phase_files = self
            .run_phase(
                &format!("{prompt}\n\nGenerate the core infrastructure: application entrypoint, configuration, and database wiring."),
                schema,
                context,
                "core_infrastructure",
                sink,
            )
            .await?;
        let generated = phase_files.len();
        merge_into(&mut all_files, phase_files, writer);
        sink.publish(
            GenerationEvent::progress(
                generation_id,
                "phase_1_complete",
                0.20,
                "Core infrastructure generated",
            )
            .with_phase_info(PhaseInfo {
                total_phases,
                current_phase,
                name: "core_infrastructure".to_string(),
                files_generated: Some(generated),
                total_files: Some(all_files.len()),
                entities_count: None,
            }),
        );

        // Phase 2: one sub-phase per entity.
        for (i, entity) in schema.entities.iter().enumerate() {
            current_phase += 1;
            let phase_files = self
                .run_phase(
                    &format!("{prompt}\n\nGenerate the model, schema, repository, service, and router files for the {} entity.", entity.name),
                    schema,
                    context,
                    &format!("entity:{}", entity.name),
                    sink,
                )
                .await?;
            let generated = phase_files.len();
            merge_into(&mut all_files, phase_files, writer);

            let ordinal = i + 1;
            let progress = 0.20 + 0.40 * (ordinal as f64 / entity_count as f64);
            sink.publish(
                GenerationEvent::progress(
                    generation_id,
                    &format!("entity_processing_{ordinal}"),
                    progress,
                    &format!("Generated files for {}", entity.name),
                )
                .with_phase_info(PhaseInfo {
                    total_phases,
                    current_phase,
                    name: format!("entity_{}", entity.snake_name()),
                    files_generated: Some(generated),
                    total_files: Some(all_files.len()),
                    entities_count: None,
                }),
            );
        }

        // Phase 5: router integration.
        current_phase += 1;
        sink.publish(GenerationEvent::progress(
            generation_id,
            "phase_5_start",
            0.65,
            "Integrating routers",
        ));
        let phase_files = self
            .run_phase(
                &format!("{prompt}\n\nGenerate the router aggregation and application composition files."),
                schema,
                context,
                "router_integration",
                sink,
            )
            .await?;
        let generated = phase_files.len();
        merge_into(&mut all_files, phase_files, writer);
        sink.publish(
            GenerationEvent::progress(
                generation_id,
                "phase_5_complete",
                0.70,
                "Routers integrated",
            )
            .with_phase_info(PhaseInfo {
                total_phases,
                current_phase,
                name: "router_integration".to_string(),
                files_generated: Some(generated),
                total_files: Some(all_files.len()),
                entities_count: None,
            }),
        );

        // Phase 6: utilities.
        current_phase += 1;
        sink.publish(GenerationEvent::progress(
            generation_id,
            "phase_6_start",
            0.75,
            "Generating utilities",
        ));
        let phase_files = self
            .run_phase(
                &format!("{prompt}\n\nGenerate auxiliary modules: security helpers, logging setup, and environment templates."),
                schema,
                context,
                "utilities",
                sink,
            )
            .await?;
        let generated = phase_files.len();
        merge_into(&mut all_files, phase_files, writer);
        sink.publish(
            GenerationEvent::progress(
                generation_id,
                "phase_6_complete",
                0.80,
                "Utilities generated",
            )
            .with_phase_info(PhaseInfo {
                total_phases,
                current_phase,
                name: "utilities".to_string(),
                files_generated: Some(generated),
                total_files: Some(all_files.len()),
                entities_count: None,
            }),
        );

        sink.publish(
            GenerationEvent::progress(
                generation_id,
                "phased_generation_complete",
                0.80,
                &format!("Phased generation produced {} files", all_files.len()),
            )
            .with_phase_info(PhaseInfo {
                total_phases,
                current_phase,
                name: "phased_generation".to_string(),
                files_generated: None,
                total_files: Some(all_files.len()),
                entities_count: Some(entity_count),
            }),
        );

        Ok(all_files)
    }

    /// Invoke the provider for one phase.
    ///
    /// Malformed output gets one retry with a stricter instruction; a second
    /// malformed response marks the phase failed as provider-unavailable.
    async fn run_phase(
        &self,
        prompt: &str,
        schema: &ProjectSchema,
        context: &ContextMap,
        phase: &str,
        sink: &dyn EventSink,
    ) -> Result<FileMap, ProviderError> {
        let mut phase_context = context.clone();
        phase_context.insert("generation_phase".to_string(), phase.to_string());

        let first = super::call_with_retries("generate_code", || {
            self.provider
                .generate_code(prompt, schema, &phase_context, sink)
        })
        .await;

        match first {
            Err(ProviderError::Malformed { message }) => {
                tracing::warn!(
                    phase = %phase,
                    error = %message,
                    "malformed phase output, retrying with stricter instruction"
                );
                let stricter = format!(
                    "{prompt}\n\nIMPORTANT: respond with ONLY a valid JSON object mapping \
                     file paths to file contents. No commentary, no code fences."
                );
                super::call_with_retries("generate_code", || {
                    self.provider
                        .generate_code(&stricter, schema, &phase_context, sink)
                })
                .await
                .map_err(|e| match e {
                    ProviderError::Malformed { message } => ProviderError::Unavailable {
                        message: format!(
                            "phase '{phase}' output remained malformed after retry: {message}"
                        ),
                    },
                    other => other,
                })
            }
            other => other,
        }
    }
}

fn merge_into(all: &mut FileMap, phase_files: FileMap, writer: Option<&IncrementalWriter<'_>>) {
    if let Some(writer) = writer {
        writer.persist(&phase_files);
    }
    all.extend(phase_files);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::events::CollectingSink;
    use crate::provider::local::LocalProvider;
    use crate::provider::{Entity, ProviderInfo, ReviewReport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema_with(names: &[&str]) -> ProjectSchema {
        ProjectSchema {
            entities: names.iter().map(|n| Entity::with_defaults(n)).collect(),
            endpoints: vec![],
            constraints: vec![],
        }
        .with_crud_endpoints()
    }

    #[tokio::test]
    async fn two_entities_emit_full_ladder() {
        let generator = PhasedCodeGenerator::new(Arc::new(LocalProvider::new()));
        let sink = CollectingSink::new();

        let files = generator
            .generate(
                "g1",
                "Blog API",
                &schema_with(&["User", "Post"]),
                &ContextMap::new(),
                &sink,
                None,
            )
            .await
            .expect("generate");

        assert!(files.len() >= 10);

        let stages: Vec<String> = sink.events().iter().map(|e| e.stage.clone()).collect();
        assert_eq!(
            stages,
            vec![
                "phased_generation_started",
                "phase_1_complete",
                "entity_processing_1",
                "entity_processing_2",
                "phase_5_start",
                "phase_5_complete",
                "phase_6_start",
                "phase_6_complete",
                "phased_generation_complete",
            ]
        );

        let events = sink.events();
        let started = &events[0];
        assert_eq!(started.progress, 0.18);
        assert_eq!(
            started.phase_info.as_ref().expect("info").entities_count,
            Some(2)
        );
        let complete = events.last().expect("last");
        assert_eq!(complete.progress, 0.80);
        assert_eq!(
            complete.phase_info.as_ref().expect("info").total_files,
            Some(files.len())
        );

        // Progress never decreases across the ladder.
        assert!(events
            .windows(2)
            .all(|pair| pair[0].progress <= pair[1].progress));
    }

    #[tokio::test]
    async fn zero_entities_skip_entity_phase() {
        let generator = PhasedCodeGenerator::new(Arc::new(LocalProvider::new()));
        let sink = CollectingSink::new();

        let files = generator
            .generate(
                "g1",
                "something vague",
                &ProjectSchema::default(),
                &ContextMap::new(),
                &sink,
                None,
            )
            .await
            .expect("generate");

        assert!(files.contains_key("app/main.py"));
        let stages: Vec<String> = sink.events().iter().map(|e| e.stage.clone()).collect();
        assert!(stages.contains(&"phased_generation_started".to_string()));
        assert!(stages.contains(&"phased_generation_complete".to_string()));
        assert!(!stages.iter().any(|s| s.starts_with("entity_processing")));
    }

    #[tokio::test]
    async fn incremental_writer_preserves_partial_output() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(&tmp.path().display().to_string());
        let writer = IncrementalWriter::new(&store, "p1", "g1", 1);

        let generator = PhasedCodeGenerator::new(Arc::new(LocalProvider::new()));
        generator
            .generate(
                "g1",
                "Blog API",
                &schema_with(&["User"]),
                &ContextMap::new(),
                &crate::events::NullSink,
                Some(&writer),
            )
            .await
            .expect("generate");

        let source = store
            .lookup_generation_dir(Some("p1"), Some(1), None)
            .expect("source dir");
        let tree = crate::artifacts::read_tree(&source).expect("read");
        assert!(tree.contains_key("app/main.py"));
        assert!(tree.contains_key("app/models/user.py"));
    }

    /// Provider failing with malformed output a fixed number of times.
    struct FlakyProvider {
        failures: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ProviderPort for FlakyProvider {
        async fn extract_schema(
            &self,
            _prompt: &str,
            _context: &ContextMap,
        ) -> Result<ProjectSchema, ProviderError> {
            Ok(ProjectSchema::default())
        }

        async fn generate_code(
            &self,
            _prompt: &str,
            _schema: &ProjectSchema,
            _context: &ContextMap,
            _sink: &dyn EventSink,
        ) -> Result<FileMap, ProviderError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            }).is_ok()
            {
                return Err(ProviderError::Malformed {
                    message: "not json".to_string(),
                });
            }
            let mut files = FileMap::new();
            files.insert("app/main.py".to_string(), "ok\n".to_string());
            Ok(files)
        }

        async fn review_code(&self, _files: &FileMap) -> Result<ReviewReport, ProviderError> {
            Ok(ReviewReport::default())
        }

        async fn generate_documentation(
            &self,
            _files: &FileMap,
            _schema: &ProjectSchema,
            _context: &ContextMap,
        ) -> Result<FileMap, ProviderError> {
            Ok(FileMap::new())
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "flaky".to_string(),
                model: String::new(),
                capabilities: vec![],
            }
        }
    }

    #[tokio::test]
    async fn malformed_output_retried_once() {
        let generator = PhasedCodeGenerator::new(Arc::new(FlakyProvider {
            failures: AtomicUsize::new(1),
        }));

        let files = generator
            .generate(
                "g1",
                "x",
                &ProjectSchema::default(),
                &ContextMap::new(),
                &crate::events::NullSink,
                None,
            )
            .await
            .expect("retry recovers");
        assert!(files.contains_key("app/main.py"));
    }

    #[tokio::test]
    async fn persistent_malformed_output_is_unavailable() {
        let generator = PhasedCodeGenerator::new(Arc::new(FlakyProvider {
            failures: AtomicUsize::new(10),
        }));

        let err = generator
            .generate(
                "g1",
                "x",
                &ProjectSchema::default(),
                &ContextMap::new(),
                &crate::events::NullSink,
                None,
            )
            .await
            .unwrap_err();

        match err {
            ProviderError::Unavailable { message } => {
                assert!(message.contains("remained malformed"));
            }
            other => panic!("expected Unavailable, got {other}"),
        }
    }
}
