//! Catalog function tools
//!
//! Functions in the selected schema are listed through the catalog API and
//! executed as a single `SELECT` on the configured SQL warehouse, binding
//! every argument as a named statement parameter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use super::{SourceAdapter, ToolDescriptor, ToolHandle, ToolKind};
use crate::config::CatalogSettings;
use crate::gateway::ScopedCredential;
use crate::workspace::{WorkspaceClient, WorkspaceEndpoint};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct FunctionPage {
    #[serde(default)]
    functions: Vec<FunctionInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionInfo {
    name: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    input_params: Option<ParameterList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ParameterList {
    #[serde(default)]
    parameters: Vec<FunctionParameter>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionParameter {
    name: String,
    #[serde(default)]
    type_name: String,
    #[serde(default)]
    type_text: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    parameter_default: Option<String>,
}

impl FunctionParameter {
    fn json_type(&self) -> &'static str {
        match self.type_name.to_ascii_uppercase().as_str() {
            "BYTE" | "SHORT" | "INT" | "LONG" => "integer",
            "FLOAT" | "DOUBLE" | "DECIMAL" => "number",
            "BOOLEAN" => "boolean",
            "ARRAY" => "array",
            "MAP" | "STRUCT" => "object",
            _ => "string",
        }
    }

    /// SQL type for scalar parameters; complex values are bound as strings
    fn sql_type(&self) -> Option<&str> {
        match self.json_type() {
            "array" | "object" => None,
            _ => self.type_text.as_deref().or(Some(self.type_name.as_str())),
        }
    }

    fn is_required(&self) -> bool {
        self.parameter_default.is_none()
    }
}

/// Derive a tool input schema from the function's parameters
fn input_schema(params: &[FunctionParameter]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in params {
        let mut prop = Map::new();
        prop.insert("type".into(), json!(param.json_type()));
        if let Some(comment) = param.comment.as_deref().filter(|c| !c.is_empty()) {
            prop.insert("description".into(), json!(comment));
        }
        properties.insert(param.name.clone(), Value::Object(prop));
        if param.is_required() {
            required.push(json!(param.name));
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Lists the functions under `catalog.schema`
pub struct FunctionAdapter {
    service: WorkspaceClient,
}

impl FunctionAdapter {
    /// Create the adapter with the service client used for enumeration
    pub fn new(service: WorkspaceClient) -> Self {
        Self { service }
    }
}

#[async_trait]
impl SourceAdapter for FunctionAdapter {
    fn name(&self) -> &str {
        "functions"
    }

    async fn list(&self, settings: &CatalogSettings) -> Result<Vec<ToolDescriptor>> {
        let (Some(catalog), Some(schema)) = (settings.catalog_name(), settings.schema_name()) else {
            return Ok(Vec::new());
        };

        let mut functions = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![("catalog_name", catalog), ("schema_name", schema)];
            if let Some(t) = token.as_deref() {
                query.push(("page_token", t));
            }
            let page: FunctionPage = self
                .service
                .get_json("/api/2.1/unity-catalog/functions", &query)
                .await?;
            functions.extend(page.functions);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let tools = functions
            .into_iter()
            .map(|function| {
                let params = function.input_params.clone().unwrap_or_default().parameters;
                let full_name = function
                    .full_name
                    .clone()
                    .unwrap_or_else(|| format!("{catalog}.{schema}.{}", function.name));
                debug!(function = %full_name, params = params.len(), "Found catalog function");

                let description = function
                    .comment
                    .clone()
                    .unwrap_or_else(|| format!("Catalog function {full_name}"));
                let handle = FunctionTool {
                    endpoint: self.service.endpoint().clone(),
                    qualified_name: qualified_name(catalog, schema, &function.name),
                    params,
                    warehouse_id: settings.warehouse_id.clone(),
                };
                ToolDescriptor::new(function.name, input_schema(&handle.params), Arc::new(handle))
                    .with_description(description)
            })
            .collect();

        Ok(tools)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Backtick-quoted three-part function name
fn qualified_name(catalog: &str, schema: &str, name: &str) -> String {
    format!(
        "{}.{}.{}",
        quote_ident(catalog),
        quote_ident(schema),
        quote_ident(name)
    )
}

/// Execution handle for one catalog function
struct FunctionTool {
    endpoint: WorkspaceEndpoint,
    qualified_name: String,
    params: Vec<FunctionParameter>,
    warehouse_id: Option<String>,
}

impl FunctionTool {
    /// `SELECT f(a => :a, ...) AS result` over the supplied arguments only, so
    /// omitted parameters fall back to their declared defaults
    fn statement_for(&self, arguments: &Map<String, Value>) -> String {
        let args: Vec<String> = self
            .params
            .iter()
            .filter(|p| arguments.contains_key(&p.name))
            .map(|p| format!("{} => :{}", quote_ident(&p.name), p.name))
            .collect();
        format!("SELECT {}({}) AS result", self.qualified_name, args.join(", "))
    }

    fn statement_parameters(&self, arguments: &Map<String, Value>) -> Vec<Value> {
        self.params
            .iter()
            .filter_map(|p| {
                let value = arguments.get(&p.name)?;
                let mut param = json!({
                    "name": p.name,
                    "value": parameter_value(value),
                });
                if let Some(ty) = p.sql_type() {
                    param["type"] = json!(ty);
                }
                Some(param)
            })
            .collect()
    }
}

fn parameter_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => json!(s),
        other => json!(other.to_string()),
    }
}

#[async_trait]
impl ToolHandle for FunctionTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Function
    }

    async fn execute(&self, credential: &ScopedCredential, arguments: Value) -> Result<Value> {
        let Some(warehouse_id) = self.warehouse_id.as_deref() else {
            return Err(Error::Execution(
                "No SQL warehouse configured for catalog functions (set catalog.warehouse_id)".into(),
            ));
        };
        let empty = Map::new();
        let args = arguments.as_object().unwrap_or(&empty);

        let client = self.endpoint.authorize(credential.secret());
        let response: Value = client
            .post_json(
                "/api/2.0/sql/statements",
                &json!({
                    "warehouse_id": warehouse_id,
                    "statement": self.statement_for(args),
                    "parameters": self.statement_parameters(args),
                    "wait_timeout": "30s",
                    "on_wait_timeout": "CANCEL",
                    "format": "JSON_ARRAY",
                    "disposition": "INLINE",
                }),
            )
            .await?;

        let state = response["status"]["state"].as_str().unwrap_or("UNKNOWN");
        if state != "SUCCEEDED" {
            let message = response["status"]["error"]["message"]
                .as_str()
                .unwrap_or(state);
            return Err(Error::Execution(format!("Statement {state}: {message}")));
        }

        Ok(response["result"]["data_array"][0][0].clone())
    }
}
