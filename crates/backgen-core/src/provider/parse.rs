//! Shared parsing helpers for LLM output.
//!
//! Hosted models wrap JSON in prose and code fences; these helpers pull the
//! payload out and map failures to `ProviderError::Malformed`.

use crate::error::ProviderError;
use crate::provider::{FileMap, ProjectSchema};

/// Strip markdown code fences from a response, if present.
///
/// Handles ```json ... ``` and bare ``` ... ``` blocks; returns the original
/// text when no fence is found.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    // Skip the language tag on the opening fence line.
    let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
    let body = &after_fence[body_start..];
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Locate the outermost JSON object in a text blob.
///
/// Models sometimes preface the payload with commentary; scanning for the
/// first `{` and matching braces (string-aware) recovers it.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a path → content file map out of raw model output.
pub(crate) fn parse_file_map(text: &str) -> Result<FileMap, ProviderError> {
    let cleaned = strip_code_fences(text);
    let json = extract_json_object(cleaned).ok_or_else(|| ProviderError::Malformed {
        message: "no JSON object found in response".to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| ProviderError::Malformed {
            message: format!("file map is not valid JSON: {e}"),
        })?;
    let object = value.as_object().ok_or_else(|| ProviderError::Malformed {
        message: "file map is not a JSON object".to_string(),
    })?;

    let mut files = FileMap::new();
    for (path, content) in object {
        let Some(content) = content.as_str() else {
            return Err(ProviderError::Malformed {
                message: format!("file '{path}' content is not a string"),
            });
        };
        files.insert(normalize_path(path), content.to_string());
    }
    Ok(files)
}

/// Parse a project schema out of raw model output.
pub(crate) fn parse_schema(text: &str) -> Result<ProjectSchema, ProviderError> {
    let cleaned = strip_code_fences(text);
    let json = extract_json_object(cleaned).ok_or_else(|| ProviderError::Malformed {
        message: "no JSON object found in schema response".to_string(),
    })?;
    serde_json::from_str(json).map_err(|e| ProviderError::Malformed {
        message: format!("schema is not valid JSON: {e}"),
    })
}

/// Normalize a generated path: forward slashes, no leading "./" or "/".
pub(crate) fn normalize_path(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    p.trim_start_matches('/').to_string()
}
