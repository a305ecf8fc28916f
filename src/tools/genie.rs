//! Query-space (Genie) tools
//!
//! One tool per configured space. A call starts a conversation with the
//! caller's question, polls the reply until it settles and returns the text
//! answer together with any generated query and its result rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{SourceAdapter, ToolDescriptor, ToolHandle, ToolKind, query_argument, query_input_schema};
use crate::config::{CatalogSettings, GenieConfig};
use crate::gateway::ScopedCredential;
use crate::workspace::{WorkspaceClient, WorkspaceEndpoint};
use crate::{Error, Result};

/// Tool name prefix for query spaces
pub const TOOL_PREFIX: &str = "genie_";

#[derive(Debug, Deserialize)]
struct GenieSpace {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartConversation {
    conversation_id: String,
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct GenieMessage {
    #[serde(default)]
    status: String,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(default)]
    attachment_id: Option<String>,
    #[serde(default)]
    text: Option<TextAttachment>,
    #[serde(default)]
    query: Option<QueryAttachment>,
}

#[derive(Debug, Deserialize)]
struct TextAttachment {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct QueryAttachment {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Lists one tool per configured query space
pub struct GenieAdapter {
    service: WorkspaceClient,
    config: GenieConfig,
}

impl GenieAdapter {
    /// Create the adapter with the service client used for enumeration
    pub fn new(service: WorkspaceClient, config: GenieConfig) -> Self {
        Self { service, config }
    }
}

#[async_trait]
impl SourceAdapter for GenieAdapter {
    fn name(&self) -> &str {
        "genie"
    }

    async fn list(&self, settings: &CatalogSettings) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::with_capacity(settings.genie_space_ids.len());

        for space_id in &settings.genie_space_ids {
            let space: GenieSpace = self
                .service
                .get_json(&format!("/api/2.0/genie/spaces/{space_id}"), &[])
                .await?;

            let handle = GenieSpaceTool {
                endpoint: self.service.endpoint().clone(),
                space_id: space_id.clone(),
                config: self.config.clone(),
            };
            tools.push(
                ToolDescriptor::new(
                    format!("{TOOL_PREFIX}{space_id}"),
                    query_input_schema("Natural-language question for the query space"),
                    Arc::new(handle),
                )
                .with_description(space_description(space_id, &space)),
            );
        }

        Ok(tools)
    }
}

fn space_description(space_id: &str, space: &GenieSpace) -> String {
    let title = space.title.as_deref().filter(|t| !t.is_empty());
    let description = space.description.as_deref().filter(|d| !d.is_empty());
    match (title, description) {
        (Some(t), Some(d)) => format!("{t}: {d}"),
        (Some(t), None) => format!("Ask the '{t}' Genie space a question"),
        (None, Some(d)) => d.to_string(),
        (None, None) => format!("Ask Genie space {space_id} a question"),
    }
}

/// Execution handle for one query space
struct GenieSpaceTool {
    endpoint: WorkspaceEndpoint,
    space_id: String,
    config: GenieConfig,
}

impl GenieSpaceTool {
    fn message_path(&self, conversation_id: &str, message_id: &str) -> String {
        format!(
            "/api/2.0/genie/spaces/{}/conversations/{conversation_id}/messages/{message_id}",
            self.space_id
        )
    }

    fn max_polls(&self) -> u32 {
        let interval = self.config.poll_interval.max(Duration::from_millis(1));
        let polls = self.config.max_wait.as_millis() / interval.as_millis();
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }

    async fn wait_for_reply(
        &self,
        client: &WorkspaceClient,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<GenieMessage> {
        let path = self.message_path(conversation_id, message_id);
        let max_polls = self.max_polls();
        for attempt in 1..=max_polls {
            let message: GenieMessage = client.get_json(&path, &[]).await?;
            debug!(space = %self.space_id, attempt, status = %message.status, "Polled Genie message");
            if message.status == "COMPLETED" {
                return Ok(message);
            }
            match message.status.as_str() {
                "FAILED" | "CANCELLED" | "QUERY_RESULT_EXPIRED" => {
                    let detail = message
                        .error
                        .as_ref()
                        .map_or_else(|| message.status.clone(), error_text);
                    return Err(Error::Execution(format!("Genie message {}: {detail}", message.status)));
                }
                _ if attempt < max_polls => tokio::time::sleep(self.config.poll_interval).await,
                _ => {}
            }
        }
        Err(Error::Execution(format!(
            "Genie did not answer within {}s",
            self.config.max_wait.as_secs()
        )))
    }

    async fn query_result(
        &self,
        client: &WorkspaceClient,
        conversation_id: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Value> {
        let path = format!(
            "{}/attachments/{attachment_id}/query-result",
            self.message_path(conversation_id, message_id)
        );
        let body: Value = client.get_json(&path, &[]).await?;
        Ok(statement_rows(&body["statement_response"]))
    }
}

#[async_trait]
impl ToolHandle for GenieSpaceTool {
    fn kind(&self) -> ToolKind {
        ToolKind::QuerySpace
    }

    async fn execute(&self, credential: &ScopedCredential, arguments: Value) -> Result<Value> {
        let question = query_argument(&arguments)?;
        let client = self.endpoint.authorize(credential.secret());

        let started: StartConversation = client
            .post_json(
                &format!("/api/2.0/genie/spaces/{}/start-conversation", self.space_id),
                &json!({ "content": question }),
            )
            .await?;

        let message = self
            .wait_for_reply(&client, &started.conversation_id, &started.message_id)
            .await?;

        let mut answer = Vec::new();
        let mut queries = Vec::new();
        for attachment in message.attachments {
            if let Some(text) = attachment.text {
                answer.push(text.content);
            }
            if let Some(query) = attachment.query {
                let mut entry = Map::new();
                entry.insert("query".into(), json!(query.query));
                entry.insert("description".into(), json!(query.description));
                if let Some(id) = attachment.attachment_id.as_deref() {
                    match self
                        .query_result(&client, &started.conversation_id, &started.message_id, id)
                        .await
                    {
                        Ok(result) => {
                            entry.insert("result".into(), result);
                        }
                        Err(e) => warn!(space = %self.space_id, error = %e, "Failed to fetch Genie query result"),
                    }
                }
                queries.push(Value::Object(entry));
            }
        }

        Ok(json!({
            "conversation_id": started.conversation_id,
            "answer": answer.join("\n"),
            "queries": queries,
        }))
    }
}

fn error_text(error: &Value) -> String {
    error
        .get("error")
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), String::from)
}

/// Turn a statement response (`manifest.schema.columns` + `result.data_array`) into row objects
pub(crate) fn statement_rows(response: &Value) -> Value {
    let columns: Vec<&str> = response["manifest"]["schema"]["columns"]
        .as_array()
        .map(|cols| cols.iter().filter_map(|c| c["name"].as_str()).collect())
        .unwrap_or_default();
    let rows = response["result"]["data_array"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    Value::Array(rows.iter().map(|row| zip_row(&columns, row)).collect())
}

/// Pair positional row values with column names
pub(crate) fn zip_row(columns: &[&str], row: &Value) -> Value {
    let Some(values) = row.as_array() else {
        return row.clone();
    };
    let mut object = Map::new();
    for (i, value) in values.iter().enumerate() {
        let key = columns.get(i).map_or_else(|| format!("col_{i}"), |c| (*c).to_string());
        object.insert(key, value.clone());
    }
    Value::Object(object)
}
