//! Similarity-search tools, one per vector index in the selected schema

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::genie::zip_row;
use super::{SourceAdapter, ToolDescriptor, ToolHandle, ToolKind, query_argument, query_input_schema};
use crate::Result;
use crate::config::CatalogSettings;
use crate::gateway::ScopedCredential;
use crate::workspace::{WorkspaceClient, WorkspaceEndpoint};

#[derive(Debug, Deserialize)]
struct EndpointPage {
    #[serde(default)]
    endpoints: Vec<NamedItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexPage {
    #[serde(default)]
    vector_indexes: Vec<NamedItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedItem {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct IndexDetails {
    #[serde(default)]
    primary_key: Option<String>,
    #[serde(default)]
    delta_sync_index_spec: Option<IndexSpec>,
    #[serde(default)]
    direct_access_index_spec: Option<IndexSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct IndexSpec {
    #[serde(default)]
    embedding_source_columns: Vec<NamedItem>,
}

impl IndexDetails {
    /// Primary key followed by the text columns the index embeds
    fn result_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self.primary_key.iter().cloned().collect();
        let specs = [&self.delta_sync_index_spec, &self.direct_access_index_spec];
        for spec in specs.into_iter().flatten() {
            for column in &spec.embedding_source_columns {
                if !columns.contains(&column.name) {
                    columns.push(column.name.clone());
                }
            }
        }
        columns
    }
}

/// Lists the vector indexes under `catalog.schema`
pub struct VectorSearchAdapter {
    service: WorkspaceClient,
}

impl VectorSearchAdapter {
    /// Create the adapter with the service client used for enumeration
    pub fn new(service: WorkspaceClient) -> Self {
        Self { service }
    }

    async fn paged<P, T>(
        &self,
        path: &str,
        base_query: &[(&str, &str)],
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = base_query.to_vec();
            if let Some(t) = token.as_deref() {
                query.push(("page_token", t));
            }
            let page: P = self.service.get_json(path, &query).await?;
            let (batch, next) = split(page);
            items.extend(batch);
            match next.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => return Ok(items),
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for VectorSearchAdapter {
    fn name(&self) -> &str {
        "vector_search"
    }

    async fn list(&self, settings: &CatalogSettings) -> Result<Vec<ToolDescriptor>> {
        let Some(schema) = settings.schema_full_name.as_deref() else {
            return Ok(Vec::new());
        };
        let prefix = format!("{schema}.");

        let endpoints = self
            .paged("/api/2.0/vector-search/endpoints", &[], |p: EndpointPage| {
                (p.endpoints, p.next_page_token)
            })
            .await?;

        let mut tools = Vec::new();
        for endpoint in endpoints {
            let indexes = self
                .paged(
                    "/api/2.0/vector-search/indexes",
                    &[("endpoint_name", endpoint.name.as_str())],
                    |p: IndexPage| (p.vector_indexes, p.next_page_token),
                )
                .await?;

            let selected: Vec<NamedItem> = indexes
                .into_iter()
                .filter(|i| i.name.starts_with(&prefix))
                .collect();
            let details = try_join_all(selected.iter().map(|index| {
                let path = format!("/api/2.0/vector-search/indexes/{}", index.name);
                async move { self.service.get_json::<IndexDetails>(&path, &[]).await }
            }))
            .await?;

            for (index, details) in selected.into_iter().zip(details) {
                let short_name = index.name[prefix.len()..].to_string();
                debug!(index = %index.name, endpoint = %endpoint.name, "Found vector index");

                let handle = VectorIndexTool {
                    endpoint: self.service.endpoint().clone(),
                    index_name: index.name.clone(),
                    columns: details.result_columns(),
                    num_results: settings.vector_search_num_results,
                };
                tools.push(
                    ToolDescriptor::new(
                        short_name,
                        query_input_schema("Text to search the index for"),
                        Arc::new(handle),
                    )
                    .with_description(format!(
                        "Similarity search over vector index {}",
                        index.name
                    )),
                );
            }
        }

        Ok(tools)
    }
}

/// Execution handle for one vector index
struct VectorIndexTool {
    endpoint: WorkspaceEndpoint,
    index_name: String,
    columns: Vec<String>,
    num_results: u32,
}

#[async_trait]
impl ToolHandle for VectorIndexTool {
    fn kind(&self) -> ToolKind {
        ToolKind::VectorSearch
    }

    async fn execute(&self, credential: &ScopedCredential, arguments: Value) -> Result<Value> {
        let query = query_argument(&arguments)?;
        let client = self.endpoint.authorize(credential.secret());

        let response: Value = client
            .post_json(
                &format!("/api/2.0/vector-search/indexes/{}/query", self.index_name),
                &json!({
                    "query_text": query,
                    "columns": self.columns,
                    "num_results": self.num_results,
                }),
            )
            .await?;

        Ok(search_rows(&response))
    }
}

fn search_rows(response: &Value) -> Value {
    let columns: Vec<&str> = response["manifest"]["columns"]
        .as_array()
        .map(|cols| cols.iter().filter_map(|c| c["name"].as_str()).collect())
        .unwrap_or_default();
    let rows = response["result"]["data_array"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    Value::Array(rows.iter().map(|row| zip_row(&columns, row)).collect())
}
