//! Minimal OpenAPI 3 rendering from a project schema.
//!
//! Written into the generation's `artifacts/` directory so external tooling
//! (doc portals, client generators) can consume the surface without parsing
//! the generated source.

use crate::provider::{Endpoint, ProjectSchema};
use serde_json::{json, Map, Value};

/// Render an OpenAPI 3.0 document for the schema.
pub fn render_openapi(schema: &ProjectSchema, title: &str) -> Value {
    let mut paths = Map::new();
    for endpoint in &schema.endpoints {
        let entry = paths
            .entry(endpoint.path.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(operations) = entry {
            operations.insert(endpoint.method.to_lowercase(), operation_for(endpoint));
        }
    }

    let mut schemas = Map::new();
    for entity in &schema.entities {
        let mut properties = Map::new();
        for field in &entity.fields {
            properties.insert(
                field.name.clone(),
                json!({"type": openapi_type(&field.field_type)}),
            );
        }
        schemas.insert(
            entity.name.clone(),
            json!({"type": "object", "properties": properties}),
        );
    }

    json!({
        "openapi": "3.0.3",
        "info": {"title": title, "version": "1.0.0"},
        "paths": paths,
        "components": {"schemas": schemas},
    })
}

fn operation_for(endpoint: &Endpoint) -> Value {
    let summary = match endpoint.entity.as_deref() {
        Some(entity) => format!("{} {}", endpoint.method, entity),
        None => format!("{} {}", endpoint.method, endpoint.path),
    };
    let mut operation = json!({
        "summary": summary,
        "responses": {"200": {"description": "Success"}},
    });
    if let Some(entity) = &endpoint.entity {
        operation["tags"] = json!([entity]);
    }
    operation
}

fn openapi_type(field_type: &str) -> &'static str {
    match field_type {
        "integer" => "integer",
        "float" => "number",
        "boolean" => "boolean",
        _ => "string",
    }
}
