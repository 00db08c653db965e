//! Hugging Face provider using the OpenAI-compatible chat completions route.
//!
//! The HF inference router exposes `/v1/chat/completions` with bearer
//! authentication. Cold models return 503 while loading, which maps to a
//! retryable transient error.

use super::parse;
use super::{
    ContextMap, FileMap, ProjectSchema, ProviderInfo, ProviderPort, ReviewReport,
};
use crate::config::ProviderCredentials;
use crate::error::ProviderError;
use crate::events::EventSink;
use serde::{Deserialize, Serialize};

/// The Hugging Face inference router base URL.
const HF_BASE_URL: &str = "https://router.huggingface.co";

/// Code-generation provider backed by Hugging Face hosted models.
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl HuggingFaceProvider {
    /// Create a provider from resolved credentials.
    pub fn new(credentials: &ProviderCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: credentials
                .endpoint
                .clone()
                .unwrap_or_else(|| HF_BASE_URL.to_string()),
            api_key: credentials.api_key.clone(),
            model: credentials.model_id.clone(),
            temperature: credentials.temperature,
            max_output_tokens: credentials.max_output_tokens,
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        tracing::debug!(
            provider = "huggingface",
            model = %self.model,
            prompt_chars = user.len(),
            "provider request",
        );

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(ProviderError::RateLimited {
                    retry_after_secs: retry_after,
                });
            }

            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ChatErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            return Err(match status {
                // Model cold start; the router serves it once loaded.
                503 => ProviderError::Transient {
                    message: format!("model loading: {message}"),
                },
                400 if message.contains("token") || message.contains("length") => {
                    ProviderError::ContextTooLarge { message }
                }
                400 => ProviderError::InvalidInput { message },
                401 | 403 | 404 => ProviderError::Unavailable {
                    message: format!("HTTP {status}: {message}"),
                },
                _ => ProviderError::Transient {
                    message: format!("HTTP {status}: {message}"),
                },
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed {
                message: format!("failed to parse chat completion: {e}"),
            })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::Malformed {
                message: "chat completion returned no choices".to_string(),
            });
        }

        if let Some(usage) = body.usage {
            tracing::debug!(
                input_tokens = usage.prompt_tokens.unwrap_or(0),
                output_tokens = usage.completion_tokens.unwrap_or(0),
                chars = text.len(),
                "provider response",
            );
        }

        Ok(text)
    }
}

#[async_trait::async_trait]
impl ProviderPort for HuggingFaceProvider {
    async fn extract_schema(
        &self,
        prompt: &str,
        context: &ContextMap,
    ) -> Result<ProjectSchema, ProviderError> {
        let tech_stack = context
            .get("tech_stack")
            .map_or("fastapi_postgres", String::as_str);
        let system = "Extract a backend project schema from the description. Reply with one \
             JSON object: {\"entities\": [...], \"endpoints\": [...], \"constraints\": [...]}. \
             Empty arrays are acceptable for vague descriptions.";
        let user = format!("Tech stack: {tech_stack}\n\nProject description:\n{prompt}");

        let text = self.complete(system, &user).await?;
        parse::parse_schema(&text)
    }

    async fn generate_code(
        &self,
        prompt: &str,
        schema: &ProjectSchema,
        context: &ContextMap,
        _sink: &dyn EventSink,
    ) -> Result<FileMap, ProviderError> {
        let is_iteration = context.get("is_iteration").is_some_and(|v| v == "true");
        let system = if is_iteration {
            "You modify an existing backend project. Reply with one JSON object mapping \
             file paths to full contents, containing ONLY the files that change."
        } else {
            "You generate a complete backend project. Reply with one JSON object mapping \
             relative file paths to full file contents."
        };

        let schema_json =
            serde_json::to_string(schema).map_err(|e| ProviderError::InvalidInput {
                message: format!("unserializable schema: {e}"),
            })?;
        let user = format!("Schema:\n{schema_json}\n\nInstructions:\n{prompt}");

        let text = self.complete(system, &user).await?;
        parse::parse_file_map(&text)
    }

    async fn review_code(&self, files: &FileMap) -> Result<ReviewReport, ProviderError> {
        let system = "Review the following files. Reply with one JSON object: \
             {\"issues\": [{\"severity\", \"path\", \"message\"}], \"quality_score\": 0.0-1.0}.";
        let listing = files
            .iter()
            .map(|(path, content)| format!("=== {path} ===\n{content}"))
            .collect::<Vec<_>>()
            .join("\n\n");

        let text = self.complete(system, &listing).await?;
        let cleaned = parse::strip_code_fences(&text);
        let json =
            parse::extract_json_object(cleaned).ok_or_else(|| ProviderError::Malformed {
                message: "no JSON object in review response".to_string(),
            })?;
        serde_json::from_str(json).map_err(|e| ProviderError::Malformed {
            message: format!("review report is not valid JSON: {e}"),
        })
    }

    async fn generate_documentation(
        &self,
        files: &FileMap,
        schema: &ProjectSchema,
        _context: &ContextMap,
    ) -> Result<FileMap, ProviderError> {
        let system = "Write documentation for the project. Reply with one JSON object mapping \
             documentation file paths (README.md, docs/api.md) to contents.";
        let schema_json = serde_json::to_string(schema).unwrap_or_default();
        let paths = files.keys().cloned().collect::<Vec<_>>().join("\n");
        let user = format!("Schema:\n{schema_json}\n\nProject files:\n{paths}");

        let text = self.complete(system, &user).await?;
        parse::parse_file_map(&text)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "huggingface".to_string(),
            model: self.model.clone(),
            capabilities: vec![
                "schema_extraction".to_string(),
                "code_generation".to_string(),
                "code_review".to_string(),
                "documentation".to_string(),
            ],
        }
    }
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatErrorResponse {
    error: ChatErrorDetail,
}

#[derive(Deserialize)]
struct ChatErrorDetail {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(server: &MockServer) -> ProviderCredentials {
        ProviderCredentials {
            api_key: "hf-token".to_string(),
            endpoint: Some(server.uri()),
            model_id: "Qwen/Qwen2.5-Coder-32B-Instruct".to_string(),
            temperature: 0.2,
            max_output_tokens: 4096,
            safety_level: "standard".to_string(),
        }
    }

    fn chat_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": text}}],
            "usage": {"prompt_tokens": 200, "completion_tokens": 80}
        })
    }

    #[tokio::test]
    async fn extract_schema_sends_bearer_auth() {
        let server = MockServer::start().await;
        let schema_text = "{\"entities\": [], \"endpoints\": [], \"constraints\": []}";

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer hf-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(schema_text)))
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(&credentials(&server));
        let schema = provider
            .extract_schema("something vague", &ContextMap::new())
            .await
            .expect("extract schema");

        assert!(schema.entities.is_empty());
    }

    #[tokio::test]
    async fn error_503_maps_to_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": {"message": "Model is currently loading"}
            })))
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(&credentials(&server));
        let err = provider
            .extract_schema("prompt", &ContextMap::new())
            .await
            .unwrap_err();

        match err {
            ProviderError::Transient { message } => {
                assert!(message.contains("Model is currently loading"));
            }
            other => panic!("expected Transient, got: {other}"),
        }
    }

    #[tokio::test]
    async fn error_401_maps_to_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Invalid token"}
            })))
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(&credentials(&server));
        let err = provider
            .extract_schema("prompt", &ContextMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn review_parses_report() {
        let server = MockServer::start().await;
        let report = "{\"issues\": [{\"severity\": \"warn\", \"path\": \"app/main.py\", \
                      \"message\": \"missing error handling\"}], \"quality_score\": 0.85}";

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(report)))
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(&credentials(&server));
        let mut files = FileMap::new();
        files.insert("app/main.py".to_string(), "print()".to_string());
        let report = provider.review_code(&files).await.expect("review");

        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].path, "app/main.py");
        assert!((report.quality_score - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn info_reports_model() {
        let creds = ProviderCredentials {
            api_key: "k".to_string(),
            endpoint: None,
            model_id: "Qwen/Qwen2.5-Coder-32B-Instruct".to_string(),
            temperature: 0.2,
            max_output_tokens: 1024,
            safety_level: "standard".to_string(),
        };
        let provider = HuggingFaceProvider::new(&creds);
        assert_eq!(provider.info().name, "huggingface");
        assert!(provider.info().model.starts_with("Qwen/"));
    }
}
