//! Rule-based prompt classification.
//!
//! Infers domain, tech stack, a suggested project name, and entity hints
//! from a natural-language prompt. Deterministic keyword and pattern
//! matching only; no I/O and no model calls.

use serde::{Deserialize, Serialize};

/// Result of classifying a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Domain tag, e.g. "ecommerce" or "general".
    pub domain: String,
    /// Tech-stack tag, e.g. "fastapi_postgres".
    pub tech_stack: String,
    /// Suggested project name.
    pub suggested_name: String,
    /// Entity hints extracted from structural phrases.
    pub entities: Vec<String>,
    /// Match confidence in `[0.0, 1.0]`.
    pub confidence: f64,
}

/// Default tech stack when nothing can be inferred.
pub const DEFAULT_TECH_STACK: &str = "fastapi_postgres";

/// Keyword tables per domain. Score is the number of distinct keyword hits.
const DOMAIN_PATTERNS: &[(&str, &[&str])] = &[
    (
        "ecommerce",
        &[
            "shop", "store", "cart", "product", "order", "checkout", "inventory",
            "catalog", "ecommerce", "e-commerce", "sku", "shipping",
        ],
    ),
    (
        "social_media",
        &[
            "social", "follow", "follower", "friend", "feed", "like", "comment",
            "share", "profile", "message", "chat", "timeline",
        ],
    ),
    (
        "fintech",
        &[
            "bank", "banking", "payment", "transaction", "wallet", "finance",
            "loan", "invoice", "ledger", "currency", "trading", "portfolio",
        ],
    ),
    (
        "task_management",
        &[
            "task", "todo", "to-do", "kanban", "sprint", "ticket", "assignment",
            "deadline", "board", "backlog", "milestone",
        ],
    ),
    (
        "content_management",
        &[
            "blog", "article", "cms", "content", "page", "publish", "editor",
            "post", "category", "tag", "media library",
        ],
    ),
];

/// Words never treated as entity names.
const ENTITY_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "api", "backend", "service", "app",
    "authentication", "auth", "crud", "endpoint", "endpoints", "database",
    "support", "features", "for", "of", "to", "in", "on", "with", "management",
];

/// Words that end the leading title phrase of a prompt.
const TITLE_BOUNDARY: &[&str] = &["with", "that", "for", "using", "which", "where", "to"];

/// Classify a prompt.
///
/// `tech_stack_hint` is the project's configured stack, used when the prompt
/// itself names no stack tokens.
pub fn classify(prompt: &str, tech_stack_hint: Option<&str>) -> Classification {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Classification {
            domain: "general".to_string(),
            tech_stack: tech_stack_hint.unwrap_or(DEFAULT_TECH_STACK).to_string(),
            suggested_name: "Untitled API".to_string(),
            entities: vec![],
            confidence: 0.0,
        };
    }

    let lower = trimmed.to_lowercase();
    let (domain, score) = match_domain(&lower);
    let confidence = if score == 0 {
        0.0
    } else {
        (0.3 + 0.15 * score as f64).min(1.0)
    };

    Classification {
        domain: domain.to_string(),
        tech_stack: infer_tech_stack(&lower, tech_stack_hint),
        suggested_name: suggest_name(trimmed, domain),
        entities: extract_entity_hints(trimmed),
        confidence,
    }
}

fn match_domain(lower: &str) -> (&'static str, usize) {
    let mut best = ("general", 0usize);
    for (domain, keywords) in DOMAIN_PATTERNS {
        let score = keywords.iter().filter(|k| lower.contains(**k)).count();
        if score > best.1 {
            best = (domain, score);
        }
    }
    best
}

fn infer_tech_stack(lower: &str, hint: Option<&str>) -> String {
    let framework = if lower.contains("django") {
        Some("django")
    } else if lower.contains("flask") {
        Some("flask")
    } else if lower.contains("express") || lower.contains("node.js") || lower.contains("nodejs") {
        Some("node")
    } else if lower.contains("fastapi") {
        Some("fastapi")
    } else {
        None
    };

    let db = if lower.contains("mongo") {
        Some("mongo")
    } else if lower.contains("mysql") {
        Some("mysql")
    } else if lower.contains("sqlite") {
        Some("sqlite")
    } else if lower.contains("postgres") {
        Some("postgres")
    } else {
        None
    };

    if framework.is_none() && db.is_none() {
        return hint.unwrap_or(DEFAULT_TECH_STACK).to_string();
    }
    if framework == Some("node") {
        return "node_express".to_string();
    }
    format!(
        "{}_{}",
        framework.unwrap_or("fastapi"),
        db.unwrap_or("postgres")
    )
}

fn suggest_name(prompt: &str, domain: &str) -> String {
    // An explicitly quoted name always wins.
    if let Some(name) = quoted_name(prompt) {
        return name;
    }

    // Leading title phrase: "Blog API with ..." names the project itself.
    // Only a short, capitalized head counts as a deliberate title.
    let head: Vec<&str> = prompt
        .split_whitespace()
        .take_while(|w| {
            !TITLE_BOUNDARY.contains(&w.to_lowercase().trim_matches(|c: char| !c.is_alphanumeric()))
        })
        .take(5)
        .collect();
    let looks_like_title = !head.is_empty()
        && head.len() <= 4
        && head
            .iter()
            .all(|w| w.chars().next().is_some_and(char::is_uppercase));
    if looks_like_title {
        let title = head
            .iter()
            .map(|w| title_word(w))
            .collect::<Vec<_>>()
            .join(" ");
        let cleaned = title.trim_matches(|c: char| !c.is_alphanumeric()).to_string();
        if !cleaned.is_empty() {
            if cleaned.to_lowercase().contains("api") {
                return cleaned;
            }
            return format!("{cleaned} API");
        }
    }

    if domain == "general" {
        "Untitled API".to_string()
    } else {
        format!("{} API", title_domain(domain))
    }
}

fn quoted_name(prompt: &str) -> Option<String> {
    let lower = prompt.to_lowercase();
    for marker in ["called", "named"] {
        let Some(idx) = lower.find(marker) else {
            continue;
        };
        let rest = &prompt[idx + marker.len()..];
        for quote in ['"', '\''] {
            let mut parts = rest.splitn(3, quote);
            let before = parts.next().unwrap_or("");
            // The quote must open right after the marker, not somewhere later.
            if before.trim().is_empty() {
                if let Some(name) = parts.next() {
                    if !name.trim().is_empty() {
                        return Some(name.trim().to_string());
                    }
                }
            }
        }
    }
    None
}

fn title_word(word: &str) -> String {
    if word.chars().all(|c| c.is_uppercase() || !c.is_alphabetic()) {
        return word.to_string();
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn title_domain(domain: &str) -> String {
    domain
        .split('_')
        .map(title_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract entity hints from a prompt's structural phrases.
///
/// Looks at the clause after "with" ("with users, posts, and comments") and
/// keeps simple nouns, singularized and capitalized.
pub fn extract_entity_hints(prompt: &str) -> Vec<String> {
    let lower = prompt.to_lowercase();
    let Some(idx) = lower.find(" with ") else {
        return vec![];
    };
    let tail = &prompt[idx + " with ".len()..];
    // Stop at the first sentence boundary.
    let clause = tail
        .split(['.', ';', '!', '?'])
        .next()
        .unwrap_or(tail);

    let mut entities = Vec::new();
    for chunk in clause.split(',') {
        for part in chunk.split(" and ") {
            let word = part
                .trim()
                .trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() || word.contains(' ') {
                continue;
            }
            if !word.chars().all(|c| c.is_alphabetic()) {
                continue;
            }
            if ENTITY_STOPWORDS.contains(&word.to_lowercase().as_str()) {
                continue;
            }
            let singular = singularize(word);
            let name = title_word(&singular);
            if name.len() >= 2 && !entities.contains(&name) {
                entities.push(name);
            }
        }
        if entities.len() >= 8 {
            break;
        }
    }
    entities.truncate(8);
    entities
}

fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() > 3 && lower.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt_defaults() {
        let c = classify("", None);
        assert_eq!(c.domain, "general");
        assert_eq!(c.tech_stack, DEFAULT_TECH_STACK);
        assert_eq!(c.suggested_name, "Untitled API");
        assert!(c.entities.is_empty());
        assert_eq!(c.confidence, 0.0);
    }

    #[test]
    fn blog_prompt_classification() {
        let c = classify("Blog API with User and Post", None);
        assert!(c.domain == "content_management" || c.domain == "social_media");
        assert_eq!(c.suggested_name, "Blog API");
        assert_eq!(c.entities, vec!["User", "Post"]);
        assert!(c.confidence > 0.0);
    }

    #[test]
    fn ecommerce_prompt_classification() {
        let c = classify(
            "Online store backend with products, orders, and carts. Include checkout.",
            None,
        );
        assert_eq!(c.domain, "ecommerce");
        assert_eq!(c.entities, vec!["Product", "Order", "Cart"]);
    }

    #[test]
    fn quoted_name_wins() {
        let c = classify("A shop backend called \"MarketMate\" with products", None);
        assert_eq!(c.suggested_name, "MarketMate");
    }

    #[test]
    fn single_quoted_name() {
        let c = classify("Service named 'LedgerLite' for invoices", None);
        assert_eq!(c.suggested_name, "LedgerLite");
    }

    #[test]
    fn tech_stack_from_tokens() {
        assert_eq!(
            classify("Task tracker using fastapi and postgres", None).tech_stack,
            "fastapi_postgres"
        );
        assert_eq!(
            classify("CMS with mongodb storage", None).tech_stack,
            "fastapi_mongo"
        );
        assert_eq!(
            classify("express server for chats", None).tech_stack,
            "node_express"
        );
        assert_eq!(
            classify("django shop with postgres", None).tech_stack,
            "django_postgres"
        );
    }

    #[test]
    fn tech_stack_hint_used_when_no_tokens() {
        let c = classify("Blog API with posts", Some("flask_postgres"));
        assert_eq!(c.tech_stack, "flask_postgres");
    }

    #[test]
    fn domain_name_fallback_for_long_prompts() {
        let c = classify(
            "I would like you to please generate an inventory and order tracking backend with products",
            None,
        );
        assert_eq!(c.domain, "ecommerce");
        // Leading phrase is too long to be a title, fall back to the domain.
        assert_eq!(c.suggested_name, "Ecommerce API");
    }

    #[test]
    fn entity_extraction_singularizes() {
        let entities = extract_entity_hints("Platform with users, stories, and categories");
        assert_eq!(entities, vec!["User", "Story", "Category"]);
    }

    #[test]
    fn entity_extraction_skips_stopwords_and_phrases() {
        let entities =
            extract_entity_hints("Backend with authentication, users and role based access");
        assert_eq!(entities, vec!["User"]);
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classify("Blog API with User and Post", None);
        let b = classify("Blog API with User and Post", None);
        assert_eq!(a, b);
    }
}
