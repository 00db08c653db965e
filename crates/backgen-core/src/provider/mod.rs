//! Code-generation provider abstraction and implementations.
//!
//! Provides a trait-based abstraction over LLM backends (Gemini, Hugging Face,
//! local templates) with four capabilities: schema extraction, code
//! generation, code review, and documentation. The orchestrator only ever
//! talks to the trait; wire protocols stay inside the implementations.

pub mod gemini;
pub mod huggingface;
pub mod local;
mod parse;
pub mod registry;

use crate::error::ProviderError;
use crate::events::EventSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relative path → UTF-8 file content.
///
/// Ordered so manifests, trees, and diffs are deterministic.
pub type FileMap = BTreeMap<String, String>;

/// Free-form generation context threaded through the pipeline.
///
/// Well-known keys: `tech_stack`, `domain`, `is_iteration`, `generation_id`,
/// `generation_phase`, `existing_paths`, `enhanced`.
pub type ContextMap = BTreeMap<String, String>;

/// A field on a schema entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name (snake_case).
    pub name: String,
    /// Logical type: "string", "integer", "float", "boolean", "datetime", "text".
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    /// Constraints such as "primary_key", "unique", "nullable".
    #[serde(default)]
    pub constraints: Vec<String>,
}

fn default_field_type() -> String {
    "string".to_string()
}

/// A relation between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// The related entity name.
    pub target: String,
    /// Relation kind: "one_to_many", "many_to_one", "many_to_many".
    pub kind: String,
}

/// One domain entity extracted from the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name (PascalCase).
    pub name: String,
    /// Fields on the entity.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Relations to other entities.
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl Entity {
    /// An entity with the standard id/created_at skeleton.
    pub fn with_defaults(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: vec![
                FieldDef {
                    name: "id".to_string(),
                    field_type: "integer".to_string(),
                    constraints: vec!["primary_key".to_string()],
                },
                FieldDef {
                    name: "created_at".to_string(),
                    field_type: "datetime".to_string(),
                    constraints: vec![],
                },
            ],
            relations: vec![],
        }
    }

    /// snake_case form of the entity name, used for file paths.
    pub fn snake_name(&self) -> String {
        to_snake_case(&self.name)
    }
}

/// One HTTP endpoint implied by the schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// HTTP method, uppercase.
    pub method: String,
    /// Route path, e.g. "/users/{id}".
    pub path: String,
    /// Owning entity, if any.
    #[serde(default)]
    pub entity: Option<String>,
}

/// Project schema produced by schema extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSchema {
    /// Domain entities.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Derived endpoints.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Cross-cutting constraints ("auth required", "soft deletes", ...).
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl ProjectSchema {
    /// Standard CRUD endpoints for every entity, for providers that extract
    /// entities but no explicit routes.
    pub fn with_crud_endpoints(mut self) -> Self {
        if self.endpoints.is_empty() {
            for entity in &self.entities {
                let base = format!("/{}s", entity.snake_name());
                for (method, path) in [
                    ("GET", base.clone()),
                    ("POST", base.clone()),
                    ("GET", format!("{base}/{{id}}")),
                    ("PUT", format!("{base}/{{id}}")),
                    ("DELETE", format!("{base}/{{id}}")),
                ] {
                    self.endpoints.push(Endpoint {
                        method: method.to_string(),
                        path,
                        entity: Some(entity.name.clone()),
                    });
                }
            }
        }
        self
    }
}

/// Issue severity in a review report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational note.
    Info,
    /// Should be addressed.
    Warn,
    /// Likely defect.
    Error,
}

/// One issue found during code review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    /// Issue severity.
    pub severity: Severity,
    /// File the issue was found in.
    pub path: String,
    /// Free-form description.
    pub message: String,
}

/// Output of the review capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewReport {
    /// Issues found, possibly empty.
    pub issues: Vec<ReviewIssue>,
    /// Aggregate quality in `[0.0, 1.0]`.
    pub quality_score: f64,
}

/// Static description of a provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name: "gemini", "huggingface", or "local".
    pub name: String,
    /// Model identifier, empty for the template backend.
    pub model: String,
    /// Capability tags.
    pub capabilities: Vec<String>,
}

/// The tasks a provider can be selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderTask {
    /// Schema extraction from a prompt.
    SchemaExtraction,
    /// Full or phased code generation.
    CodeGeneration,
    /// Review of generated files.
    CodeReview,
    /// Documentation generation.
    Documentation,
}

impl ProviderTask {
    /// Stable name used in logs and configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTask::SchemaExtraction => "schema_extraction",
            ProviderTask::CodeGeneration => "code_generation",
            ProviderTask::CodeReview => "code_review",
            ProviderTask::Documentation => "documentation",
        }
    }
}

/// Uniform capability surface over an LLM backend.
///
/// All four operations are async and may fail with one of the
/// [`ProviderError`] kinds. Implementations must return an empty, well-formed
/// schema (not an error) when the prompt is too vague, and must treat
/// `context["is_iteration"] == "true"` as an instruction to return only
/// changed files.
#[async_trait::async_trait]
pub trait ProviderPort: Send + Sync {
    /// Extract a project schema from a natural-language prompt.
    async fn extract_schema(
        &self,
        prompt: &str,
        context: &ContextMap,
    ) -> Result<ProjectSchema, ProviderError>;

    /// Generate project files for the prompt and schema.
    ///
    /// Implementations emit progress events through `sink` at meaningful
    /// boundaries.
    async fn generate_code(
        &self,
        prompt: &str,
        schema: &ProjectSchema,
        context: &ContextMap,
        sink: &dyn EventSink,
    ) -> Result<FileMap, ProviderError>;

    /// Review a set of generated files. Must tolerate arbitrary input.
    async fn review_code(&self, files: &FileMap) -> Result<ReviewReport, ProviderError>;

    /// Produce documentation artifacts (README, API docs) for the files.
    async fn generate_documentation(
        &self,
        files: &FileMap,
        schema: &ProjectSchema,
        context: &ContextMap,
    ) -> Result<FileMap, ProviderError>;

    /// Static description of this provider.
    fn info(&self) -> ProviderInfo;
}

/// Convert PascalCase or camelCase to snake_case.
pub(crate) fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == ' ' || c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}
