//! Tool descriptors, execution handles and the source adapters that produce them

pub mod functions;
pub mod genie;
mod registry;
pub mod schema;
pub mod vector_search;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use registry::ToolRegistry;

use crate::Result;
use crate::config::CatalogSettings;
use crate::gateway::ScopedCredential;
use crate::protocol::{Tool, ToolAnnotations};

/// Backend family a tool belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    /// Natural-language query space (Genie)
    QuerySpace,
    /// Similarity-search index
    VectorSearch,
    /// Catalog function executed through a SQL warehouse
    Function,
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::QuerySpace => "query_space",
            Self::VectorSearch => "vector_search",
            Self::Function => "function",
        };
        f.write_str(name)
    }
}

/// Execution handle owned by the adapter that created the tool.
///
/// The handle receives the caller's scoped credential on every call and must
/// not hold or reach for any other credential.
#[async_trait]
pub trait ToolHandle: Send + Sync {
    /// Backend family
    fn kind(&self) -> ToolKind;

    /// Run the tool as the caller
    async fn execute(&self, credential: &ScopedCredential, arguments: Value) -> Result<Value>;
}

/// Enumerates the tools of one backend family
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Adapter name used in logs and startup errors
    fn name(&self) -> &str;

    /// List the tools this adapter contributes for `settings`
    async fn list(&self, settings: &CatalogSettings) -> Result<Vec<ToolDescriptor>>;
}

/// Immutable tool description plus its execution handle
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: Option<String>,
    input_schema: Value,
    handle: Arc<dyn ToolHandle>,
}

impl ToolDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, input_schema: Value, handle: Arc<dyn ToolHandle>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
            handle,
        }
    }

    /// Attach a description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    /// Tool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// JSON Schema of accepted arguments
    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    /// Execution handle
    pub fn handle(&self) -> &Arc<dyn ToolHandle> {
        &self.handle
    }

    /// Backend family of the handle
    pub fn kind(&self) -> ToolKind {
        self.handle.kind()
    }

    /// Protocol representation for `tools/list`
    pub fn to_mcp_tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            annotations: Some(ToolAnnotations {
                title: None,
                read_only_hint: Some(self.kind() != ToolKind::Function),
                open_world_hint: Some(false),
            }),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Schema for tools that take a single natural-language `query`
pub(crate) fn query_input_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": description
            }
        },
        "required": ["query"]
    })
}

/// Pull the required `query` string out of the arguments
pub(crate) fn query_argument(arguments: &Value) -> Result<&str> {
    arguments
        .get("query")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| crate::Error::InvalidArguments("'query' must be a non-empty string".into()))
}
