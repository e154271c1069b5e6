//! API description document
//!
//! Builds an OpenAPI-shaped JSON document from the configured resources.
//! Each resource becomes a `/{name}` path with one entry per operation.
//! Object keys come out sorted because `serde_json::Map` is ordered.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::memo::ArtifactBuilder;
use crate::config::{DocumentConfig, ResourceConfig};
use crate::error::BuildError;

const OPENAPI_VERSION: &str = "3.0.3";

const SUPPORTED_OPERATIONS: &[&str] = &["get", "put", "post", "delete", "patch", "head", "options"];

/// Generates the API document served at `/openapi.json`
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    title: String,
    version: String,
    resources: Vec<ResourceConfig>,
}

impl DocumentBuilder {
    pub fn new(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
            resources: Vec::new(),
        }
    }

    pub fn from_config(config: &DocumentConfig) -> Self {
        Self {
            title: config.title.clone(),
            version: config.version.clone(),
            resources: config.resources.clone(),
        }
    }

    /// Add a resource with the given operations
    pub fn resource<I, S>(mut self, name: &str, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources.push(ResourceConfig {
            name: name.to_string(),
            operations: operations.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Render the document
    pub fn render(&self) -> Result<Value, BuildError> {
        let mut paths = Map::new();

        for resource in &self.resources {
            let name = resource.name.trim().trim_matches('/');
            if name.is_empty() {
                return Err(BuildError::Failed("resource without a name".to_string()));
            }

            let path = format!("/{}", name);
            let entry = paths
                .entry(path.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(operations) = entry else {
                return Err(BuildError::Failed(format!("malformed path entry {}", path)));
            };

            for operation in &resource.operations {
                let method = operation.trim().to_lowercase();
                if !SUPPORTED_OPERATIONS.contains(&method.as_str()) {
                    return Err(BuildError::Failed(format!(
                        "unsupported operation '{}' on {}",
                        operation, path
                    )));
                }
                operations.insert(method.clone(), operation_object(name, &method));
            }
        }

        Ok(json!({
            "openapi": OPENAPI_VERSION,
            "info": {
                "title": self.title,
                "version": self.version,
            },
            "paths": paths,
        }))
    }
}

fn operation_object(resource: &str, method: &str) -> Value {
    json!({
        "operationId": format!("{}_{}", method, resource.replace('/', "_")),
        "tags": [resource],
        "responses": {
            "200": { "description": "OK" },
            "401": { "description": "Missing or invalid API key" },
            "429": { "description": "Too many failed attempts" },
        },
    })
}

#[async_trait]
impl ArtifactBuilder<Value> for DocumentBuilder {
    async fn build(&self) -> Result<Value, BuildError> {
        let document = self.render()?;
        tracing::debug!(resources = self.resources.len(), "API document generated");
        Ok(document)
    }
}
