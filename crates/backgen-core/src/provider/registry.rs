//! Provider selection and instance caching.
//!
//! Resolves a provider name per task from configuration (default plus
//! optional per-task overrides), constructs instances lazily, and caches
//! them by name so repeated lookups return the same instance.

use super::gemini::GeminiProvider;
use super::huggingface::HuggingFaceProvider;
use super::local::LocalProvider;
use super::{ProviderPort, ProviderTask};
use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Selects and caches provider instances per task.
///
/// Constructed explicitly from config; tests build isolated registries.
pub struct ProviderRegistry {
    config: ProvidersConfig,
    cache: Mutex<HashMap<String, Arc<dyn ProviderPort>>>,
}

impl ProviderRegistry {
    /// Create a registry over the given provider configuration.
    pub fn new(config: ProvidersConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The provider name that configuration selects for a task.
    pub fn provider_name_for(&self, task: ProviderTask) -> &str {
        let override_name = match task {
            ProviderTask::SchemaExtraction => &self.config.schema_extraction_provider,
            ProviderTask::CodeGeneration => &self.config.code_generation_provider,
            ProviderTask::CodeReview => &self.config.code_review_provider,
            ProviderTask::Documentation => &self.config.documentation_provider,
        };
        override_name
            .as_deref()
            .unwrap_or(&self.config.default_provider)
    }

    /// Resolve the provider for a task, constructing it on first use.
    ///
    /// Credential validation happens at construction; failures surface as
    /// `ProviderError::Unavailable`. Repeated calls with identical config
    /// return the same cached instance.
    pub fn get(&self, task: ProviderTask) -> Result<Arc<dyn ProviderPort>, ProviderError> {
        let name = self.provider_name_for(task).to_string();

        let mut cache = self.cache.lock().expect("registry lock");
        if let Some(provider) = cache.get(&name) {
            return Ok(Arc::clone(provider));
        }

        let provider = self.build(&name)?;
        tracing::info!(provider = %name, task = task.as_str(), "provider initialized");
        cache.insert(name, Arc::clone(&provider));
        Ok(provider)
    }

    fn build(&self, name: &str) -> Result<Arc<dyn ProviderPort>, ProviderError> {
        match name {
            "local" => Ok(Arc::new(LocalProvider::new())),
            "gemini" => {
                let credentials = &self.config.gemini;
                if credentials.api_key.is_empty() {
                    return Err(ProviderError::Unavailable {
                        message: "gemini selected but no API key configured".to_string(),
                    });
                }
                if credentials.model_id.is_empty() {
                    return Err(ProviderError::Unavailable {
                        message: "gemini selected but no model configured".to_string(),
                    });
                }
                Ok(Arc::new(GeminiProvider::new(credentials)))
            }
            "huggingface" => {
                let credentials = &self.config.huggingface;
                if credentials.api_key.is_empty() {
                    return Err(ProviderError::Unavailable {
                        message: "huggingface selected but no API key configured".to_string(),
                    });
                }
                if credentials.model_id.is_empty() {
                    return Err(ProviderError::Unavailable {
                        message: "huggingface selected but no model configured".to_string(),
                    });
                }
                Ok(Arc::new(HuggingFaceProvider::new(credentials)))
            }
            other => Err(ProviderError::Unavailable {
                message: format!("unknown provider '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvidersConfig;

    fn config_with_default(name: &str) -> ProvidersConfig {
        ProvidersConfig {
            default_provider: name.to_string(),
            ..ProvidersConfig::default()
        }
    }

    #[test]
    fn get_returns_cached_instance() {
        let registry = ProviderRegistry::new(config_with_default("local"));
        let first = registry.get(ProviderTask::CodeGeneration).expect("get");
        let second = registry.get(ProviderTask::CodeGeneration).expect("get");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn tasks_sharing_a_provider_share_the_instance() {
        let registry = ProviderRegistry::new(config_with_default("local"));
        let a = registry.get(ProviderTask::SchemaExtraction).expect("get");
        let b = registry.get(ProviderTask::Documentation).expect("get");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn per_task_override_wins() {
        let mut config = config_with_default("local");
        config.code_review_provider = Some("gemini".to_string());
        config.gemini.api_key = "key".to_string();
        let registry = ProviderRegistry::new(config);

        assert_eq!(
            registry.provider_name_for(ProviderTask::CodeReview),
            "gemini"
        );
        assert_eq!(
            registry.provider_name_for(ProviderTask::CodeGeneration),
            "local"
        );
        let provider = registry.get(ProviderTask::CodeReview).expect("get");
        assert_eq!(provider.info().name, "gemini");
    }

    #[test]
    fn missing_api_key_is_unavailable() {
        let registry = ProviderRegistry::new(config_with_default("gemini"));
        let err = registry.get(ProviderTask::CodeGeneration).unwrap_err();
        match err {
            ProviderError::Unavailable { message } => {
                assert!(message.contains("no API key"));
            }
            other => panic!("expected Unavailable, got: {other}"),
        }
    }

    #[test]
    fn unknown_provider_is_unavailable() {
        let registry = ProviderRegistry::new(config_with_default("mystery"));
        let err = registry.get(ProviderTask::CodeGeneration).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }
}
