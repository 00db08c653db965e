//! Schema inference from existing project files.
//!
//! Rebuilds a project schema from paths and lightweight file tokens so an
//! iteration never depends on re-running schema extraction through a model.

use crate::provider::{Endpoint, Entity, FieldDef, FileMap, ProjectSchema};
use regex::Regex;
use std::sync::OnceLock;

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^class\s+([A-Z][A-Za-z0-9_]*)\b").expect("class regex"))
}

fn column_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s+([a-z_][a-z0-9_]*)\s*=\s*Column\(([A-Za-z]+)").expect("column regex")
    })
}

fn route_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@router\.(get|post|put|patch|delete)\(\s*"([^"]*)""#).expect("route regex")
    })
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"APIRouter\([^)]*prefix\s*=\s*"([^"]*)""#).expect("prefix regex"))
}

/// Infer a schema from an existing file tree. Pure function; no I/O.
pub fn schema_from_files(files: &FileMap) -> ProjectSchema {
    let mut entities = Vec::new();
    let mut endpoints = Vec::new();

    for (path, content) in files {
        if let Some(stem) = model_file_stem(path) {
            entities.push(infer_entity(stem, content));
        }
        if path.contains("routers/") {
            endpoints.extend(infer_endpoints(path, content));
        }
    }

    entities.sort_by(|a, b| a.name.cmp(&b.name));
    ProjectSchema {
        entities,
        endpoints,
        constraints: vec![],
    }
}

fn model_file_stem(path: &str) -> Option<&str> {
    let rest = path.split("models/").nth(1)?;
    // Only direct children of models/ count as model files.
    if rest.contains('/') {
        return None;
    }
    let stem = rest.strip_suffix(".py")?;
    (!stem.is_empty() && stem != "__init__").then_some(stem)
}

fn infer_entity(stem: &str, content: &str) -> Entity {
    // A class declaration inside the file beats the filename.
    let name = class_re()
        .captures(content)
        .map_or_else(|| pascal_case(stem), |c| c[1].to_string());

    let mut fields: Vec<FieldDef> = column_re()
        .captures_iter(content)
        .map(|c| {
            let field_name = c[1].to_string();
            let mut constraints = Vec::new();
            if field_name == "id" {
                constraints.push("primary_key".to_string());
            }
            FieldDef {
                name: field_name,
                field_type: column_to_field_type(&c[2]),
                constraints,
            }
        })
        .collect();
    if fields.is_empty() {
        return Entity::with_defaults(&name);
    }
    fields.dedup_by(|a, b| a.name == b.name);
    Entity {
        name,
        fields,
        relations: vec![],
    }
}

fn infer_endpoints(path: &str, content: &str) -> Vec<Endpoint> {
    let prefix = prefix_re()
        .captures(content)
        .map_or(String::new(), |c| c[1].to_string());
    let entity = path
        .split('/')
        .next_back()
        .and_then(|f| f.strip_suffix(".py"))
        .map(pascal_case);

    route_re()
        .captures_iter(content)
        .map(|c| {
            let route = &c[2];
            let full = if route == "/" || route.is_empty() {
                prefix.clone()
            } else {
                format!("{prefix}{route}")
            };
            Endpoint {
                method: c[1].to_uppercase(),
                path: if full.is_empty() { "/".to_string() } else { full },
                entity: entity.clone(),
            }
        })
        .collect()
}

fn column_to_field_type(column: &str) -> String {
    match column {
        "Integer" => "integer",
        "Float" => "float",
        "Boolean" => "boolean",
        "DateTime" => "datetime",
        "Text" => "text",
        _ => "string",
    }
    .to_string()
}

fn pascal_case(stem: &str) -> String {
    stem.split('_')
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_from_model_paths() {
        let mut files = FileMap::new();
        files.insert("app/models/user.py".to_string(), String::new());
        files.insert("app/models/blog_post.py".to_string(), String::new());
        files.insert("app/models/__init__.py".to_string(), String::new());
        files.insert("app/models/nested/skip.py".to_string(), String::new());
        files.insert("app/main.py".to_string(), String::new());

        let schema = schema_from_files(&files);
        let names: Vec<&str> = schema.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["BlogPost", "User"]);
    }

    #[test]
    fn class_name_beats_filename() {
        let mut files = FileMap::new();
        files.insert(
            "app/models/user.py".to_string(),
            "class Account(Base):\n    id = Column(Integer, primary_key=True)\n".to_string(),
        );

        let schema = schema_from_files(&files);
        assert_eq!(schema.entities[0].name, "Account");
    }

    #[test]
    fn columns_become_typed_fields() {
        let mut files = FileMap::new();
        files.insert(
            "app/models/user.py".to_string(),
            "class User(Base):\n    id = Column(Integer, primary_key=True)\n    email = Column(String(255), unique=True)\n    active = Column(Boolean)\n    joined = Column(DateTime(timezone=True))\n".to_string(),
        );

        let schema = schema_from_files(&files);
        let entity = &schema.entities[0];
        let field = |name: &str| {
            entity
                .fields
                .iter()
                .find(|f| f.name == name)
                .unwrap_or_else(|| panic!("field {name}"))
        };
        assert_eq!(field("id").field_type, "integer");
        assert!(field("id").constraints.contains(&"primary_key".to_string()));
        assert_eq!(field("email").field_type, "string");
        assert_eq!(field("active").field_type, "boolean");
        assert_eq!(field("joined").field_type, "datetime");
    }

    #[test]
    fn model_without_columns_gets_default_skeleton() {
        let mut files = FileMap::new();
        files.insert("app/models/tag.py".to_string(), "# placeholder\n".to_string());

        let schema = schema_from_files(&files);
        assert_eq!(schema.entities[0].name, "Tag");
        assert_eq!(schema.entities[0].fields[0].name, "id");
    }

    #[test]
    fn routes_resolved_against_prefix() {
        let mut files = FileMap::new();
        files.insert(
            "app/routers/user.py".to_string(),
            "router = APIRouter(prefix=\"/users\", tags=[\"users\"])\n\n@router.get(\"/\")\ndef list_users(): ...\n\n@router.post(\"/\")\ndef create_user(): ...\n\n@router.get(\"/{user_id}\")\ndef get_user(user_id: int): ...\n".to_string(),
        );

        let schema = schema_from_files(&files);
        assert_eq!(schema.endpoints.len(), 3);
        assert!(schema
            .endpoints
            .iter()
            .any(|e| e.method == "GET" && e.path == "/users"));
        assert!(schema
            .endpoints
            .iter()
            .any(|e| e.method == "GET" && e.path == "/users/{user_id}"));
        assert_eq!(schema.endpoints[0].entity.as_deref(), Some("User"));
    }

    #[test]
    fn empty_tree_yields_empty_schema() {
        let schema = schema_from_files(&FileMap::new());
        assert!(schema.entities.is_empty());
        assert!(schema.endpoints.is_empty());
    }
}
