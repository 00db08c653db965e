//! Default values for all configuration sections.
//!
//! The service runs out of the box against the local template provider;
//! users only need to supply credentials when selecting a hosted backend.

use super::ProviderCredentials;

pub(super) fn default_provider() -> String {
    "local".to_string()
}

pub(super) fn gemini_credentials() -> ProviderCredentials {
    ProviderCredentials {
        api_key: String::new(),
        endpoint: None,
        model_id: "gemini-2.0-flash".to_string(),
        temperature: temperature(),
        max_output_tokens: max_output_tokens(),
        safety_level: safety_level(),
    }
}

pub(super) fn huggingface_credentials() -> ProviderCredentials {
    ProviderCredentials {
        api_key: String::new(),
        endpoint: None,
        model_id: "Qwen/Qwen2.5-Coder-32B-Instruct".to_string(),
        temperature: temperature(),
        max_output_tokens: max_output_tokens(),
        safety_level: safety_level(),
    }
}

pub(super) fn temperature() -> f32 {
    0.2
}

pub(super) fn max_output_tokens() -> u32 {
    8192
}

pub(super) fn safety_level() -> String {
    "standard".to_string()
}

pub(super) fn db_path() -> String {
    "~/.backgen/backgen.db".to_string()
}

pub(super) fn storage_root() -> String {
    "~/.backgen/artifacts".to_string()
}

pub(super) fn keep_latest() -> usize {
    5
}

pub(super) fn archive_age_days() -> i64 {
    30
}

pub(super) fn data_loss_threshold() -> f64 {
    0.8
}

pub(super) fn data_loss_abort() -> bool {
    true
}

pub(super) fn heartbeat_s() -> u64 {
    15
}

pub(super) fn idle_timeout_s() -> u64 {
    300
}

pub(super) fn token_ttl_s() -> i64 {
    900
}

pub(super) fn buffer_capacity() -> usize {
    64
}

pub(super) fn stage_timeout_s() -> u64 {
    300
}

pub(super) fn codegen_timeout_s() -> u64 {
    600
}

pub(super) fn dedup_window_s() -> i64 {
    3600
}
