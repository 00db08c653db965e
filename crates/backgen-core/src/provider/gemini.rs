//! Gemini provider using the Google Generative Language API.
//!
//! Uses the `generateContent` endpoint which has a distinct request format,
//! authentication mechanism, and response structure from OpenAI-compatible
//! endpoints.

use super::parse;
use super::{
    ContextMap, FileMap, ProjectSchema, ProviderInfo, ProviderPort, ReviewReport,
};
use crate::config::ProviderCredentials;
use crate::error::ProviderError;
use crate::events::EventSink;
use serde::{Deserialize, Serialize};

/// The Generative Language API base URL.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Code-generation provider backed by the Gemini API.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    safety_level: String,
}

impl GeminiProvider {
    /// Create a provider from resolved credentials.
    pub fn new(credentials: &ProviderCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: credentials
                .endpoint
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            api_key: credentials.api_key.clone(),
            model: credentials.model_id.clone(),
            temperature: credentials.temperature,
            max_output_tokens: credentials.max_output_tokens,
            safety_level: credentials.safety_level.clone(),
        }
    }

    /// Harm threshold for the configured safety level.
    fn harm_threshold(&self) -> &'static str {
        match self.safety_level.as_str() {
            "strict" => "BLOCK_LOW_AND_ABOVE",
            "relaxed" => "BLOCK_ONLY_HIGH",
            _ => "BLOCK_MEDIUM_AND_ABOVE",
        }
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        tracing::debug!(
            provider = "gemini",
            model = %self.model,
            prompt_chars = user.len(),
            "provider request",
        );

        let threshold = self.harm_threshold();
        let request = GeminiRequest {
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            }),
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart {
                    text: user.to_string(),
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
            safety_settings: [
                "HARM_CATEGORY_HARASSMENT",
                "HARM_CATEGORY_HATE_SPEECH",
                "HARM_CATEGORY_DANGEROUS_CONTENT",
            ]
            .into_iter()
            .map(|category| GeminiSafetySetting {
                category,
                threshold,
            })
            .collect(),
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self.client.post(&url).json(&request).send().await?;

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
            let message = serde_json::from_str::<GeminiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            return Err(match status {
                400 if message.contains("token") => ProviderError::ContextTooLarge { message },
                400 => ProviderError::InvalidInput { message },
                401 | 403 | 404 => ProviderError::Unavailable {
                    message: format!("HTTP {status}: {message}"),
                },
                _ => ProviderError::Transient {
                    message: format!("HTTP {status}: {message}"),
                },
            });
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed {
                message: format!("failed to parse Gemini response: {e}"),
            })?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::Malformed {
                message: "Gemini returned no candidates".to_string(),
            });
        }

        if let Some(usage) = body.usage_metadata {
            tracing::debug!(
                input_tokens = usage.prompt_token_count.unwrap_or(0),
                output_tokens = usage.candidates_token_count.unwrap_or(0),
                chars = text.len(),
                "provider response",
            );
        }

        Ok(text)
    }
}

#[async_trait::async_trait]
impl ProviderPort for GeminiProvider {
    async fn extract_schema(
        &self,
        prompt: &str,
        context: &ContextMap,
    ) -> Result<ProjectSchema, ProviderError> {
        let tech_stack = context
            .get("tech_stack")
            .map_or("fastapi_postgres", String::as_str);
        let system = "You are a backend architect. Extract a project schema from the user's \
             description. Respond with a single JSON object: \
             {\"entities\": [{\"name\", \"fields\": [{\"name\", \"type\", \"constraints\"}], \
             \"relations\": [{\"target\", \"kind\"}]}], \
             \"endpoints\": [{\"method\", \"path\", \"entity\"}], \"constraints\": []}. \
             If the description is too vague, return the object with empty arrays.";
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
            "You are a senior backend engineer modifying an existing project. \
             Respond with a single JSON object mapping file paths to full file contents. \
             Return ONLY the files that change; do not restate unchanged files."
        } else {
            "You are a senior backend engineer generating a production backend project. \
             Respond with a single JSON object mapping relative file paths to full file \
             contents. No commentary outside the JSON object."
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
        let system = "You are a code reviewer. Respond with a single JSON object: \
             {\"issues\": [{\"severity\": \"info\"|\"warn\"|\"error\", \"path\", \"message\"}], \
             \"quality_score\": 0.0-1.0}.";
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
        let system = "You are a technical writer. Produce documentation for the project below. \
             Respond with a single JSON object mapping documentation file paths \
             (README.md, docs/api.md) to their contents.";
        let schema_json = serde_json::to_string(schema).unwrap_or_default();
        let paths = files.keys().cloned().collect::<Vec<_>>().join("\n");
        let user = format!("Schema:\n{schema_json}\n\nProject files:\n{paths}");

        let text = self.complete(system, &user).await?;
        parse::parse_file_map(&text)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "gemini".to_string(),
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
struct GeminiRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<GeminiSafetySetting>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct GeminiSafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(server: &MockServer) -> ProviderCredentials {
        ProviderCredentials {
            api_key: "test-key".to_string(),
            endpoint: Some(server.uri()),
            model_id: "gemini-2.0-flash".to_string(),
            temperature: 0.2,
            max_output_tokens: 4096,
            safety_level: "standard".to_string(),
        }
    }

    fn text_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}],
            "usageMetadata": {"promptTokenCount": 100, "candidatesTokenCount": 50}
        })
    }

    #[tokio::test]
    async fn extract_schema_parses_fenced_json() {
        let server = MockServer::start().await;
        let schema_text = "```json\n{\"entities\": [{\"name\": \"User\", \"fields\": [], \"relations\": []}], \"endpoints\": [], \"constraints\": []}\n```";

        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(schema_text)))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(&credentials(&server));
        let schema = provider
            .extract_schema("Blog API with User", &ContextMap::new())
            .await
            .expect("extract schema");

        assert_eq!(schema.entities.len(), 1);
        assert_eq!(schema.entities[0].name, "User");
    }

    #[tokio::test]
    async fn generate_code_parses_file_map() {
        let server = MockServer::start().await;
        let files_text = "{\"app/main.py\": \"from fastapi import FastAPI\"}";

        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(files_text)))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(&credentials(&server));
        let files = provider
            .generate_code(
                "build it",
                &ProjectSchema::default(),
                &ContextMap::new(),
                &NullSink,
            )
            .await
            .expect("generate code");

        assert_eq!(files.len(), 1);
        assert!(files.contains_key("app/main.py"));
    }

    #[tokio::test]
    async fn error_429_maps_to_rate_limited() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(
                ResponseTemplate::new(429)
                    .append_header("retry-after", "45")
                    .set_body_json(serde_json::json!({
                        "error": {"message": "Resource exhausted"}
                    })),
            )
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(&credentials(&server));
        let err = provider
            .extract_schema("prompt", &ContextMap::new())
            .await
            .unwrap_err();

        match err {
            ProviderError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 45),
            other => panic!("expected RateLimited, got: {other}"),
        }
    }

    #[tokio::test]
    async fn error_403_maps_to_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"message": "API key not valid"}
            })))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(&credentials(&server));
        let err = provider
            .extract_schema("prompt", &ContextMap::new())
            .await
            .unwrap_err();

        match err {
            ProviderError::Unavailable { message } => {
                assert!(message.contains("API key not valid"));
            }
            other => panic!("expected Unavailable, got: {other}"),
        }
    }

    #[tokio::test]
    async fn error_500_maps_to_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(&credentials(&server));
        let err = provider
            .extract_schema("prompt", &ContextMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Transient { .. }));
    }

    #[tokio::test]
    async fn prose_without_json_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path_regex(r":generateContent$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(text_response("I cannot produce that project.")),
            )
            .mount(&server)
            .await;

        let provider = GeminiProvider::new(&credentials(&server));
        let err = provider
            .generate_code(
                "build",
                &ProjectSchema::default(),
                &ContextMap::new(),
                &NullSink,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[test]
    fn info_reports_model() {
        let creds = ProviderCredentials {
            api_key: "k".to_string(),
            endpoint: None,
            model_id: "gemini-2.0-flash".to_string(),
            temperature: 0.2,
            max_output_tokens: 1024,
            safety_level: "strict".to_string(),
        };
        let provider = GeminiProvider::new(&creds);
        let info = provider.info();
        assert_eq!(info.name, "gemini");
        assert_eq!(info.model, "gemini-2.0-flash");
        assert_eq!(provider.harm_threshold(), "BLOCK_LOW_AND_ABOVE");
    }
}
