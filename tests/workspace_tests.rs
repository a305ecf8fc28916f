//! Workspace integration tests against an in-process fake workspace
//!
//! Tests:
//! - token exchange and SCIM identity lookups
//! - service login with client credentials
//! - Genie, vector search and function adapters (listing + execution)
//! - the full gateway wired to the fake workspace

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, Bytes, to_bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use uc_mcp_gateway::Error;
use uc_mcp_gateway::config::{CatalogSettings, Config, GenieConfig, WorkspaceConfig};
use uc_mcp_gateway::gateway::{
    ExchangeGateway, ExchangeRequest, Gateway, IdentityProvider, ScopedCredential, TokenExchanger,
    WorkspaceIdentityProvider, WorkspaceTokenExchanger,
};
use uc_mcp_gateway::tools::functions::FunctionAdapter;
use uc_mcp_gateway::tools::genie::GenieAdapter;
use uc_mcp_gateway::tools::vector_search::VectorSearchAdapter;
use uc_mcp_gateway::tools::{SourceAdapter, ToolDescriptor};
use uc_mcp_gateway::workspace::{WorkspaceClient, WorkspaceEndpoint, http_client, service_client};

// ============================================================================
// Fake workspace
// ============================================================================

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    auth: Option<String>,
    body: Value,
}

#[derive(Default)]
struct FakeWorkspace {
    requests: Mutex<Vec<Recorded>>,
    polls: AtomicUsize,
}

impl FakeWorkspace {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    fn find(&self, method: Method, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({"error_code": code, "message": message}))).into_response()
}

async fn workspace_handler(
    State(ws): State<Arc<FakeWorkspace>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query: HashMap<String, String> = url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let parsed: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_string();
    ws.requests.lock().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        auth: auth.clone(),
        body: parsed,
    });

    let genie = "/api/2.0/genie/spaces/s1";
    let message = format!("{genie}/conversations/c1/messages/m1");
    let page = query.get("page_token").map(String::as_str);

    let reply = match (method, path.as_str()) {
        (Method::POST, "/api/2.0/token/create") => {
            if auth.as_deref() != Some("Bearer user-token") {
                return api_error(StatusCode::FORBIDDEN, "PERMISSION_DENIED", "Token creation is not allowed");
            }
            json!({
                "token_value": "scoped-1",
                "token_info": {"token_id": "tid-1", "expiry_time": 1_900_000_000_000_i64, "comment": "tool execution"}
            })
        }
        (Method::GET, "/api/2.0/preview/scim/v2/Me") => {
            if auth.as_deref() != Some("Bearer fwd-token") {
                return api_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Invalid access token");
            }
            json!({"id": "1001", "userName": "ada@example.com", "displayName": "Ada Lovelace", "active": true})
        }
        (Method::POST, "/oidc/v1/token") => {
            let basic = auth.as_deref().is_some_and(|a| a.starts_with("Basic "));
            let form = String::from_utf8_lossy(&body);
            if !basic || !form.contains("grant_type=client_credentials") {
                return api_error(StatusCode::UNAUTHORIZED, "invalid_client", "bad client");
            }
            json!({"access_token": "m2m-token", "token_type": "Bearer", "expires_in": 3600})
        }
        (Method::GET, p) if p == genie => {
            json!({"space_id": "s1", "title": "Sales", "description": "Quarterly numbers"})
        }
        (Method::GET, "/api/2.0/genie/spaces/slow") => json!({"space_id": "slow", "title": "Slow"}),
        (Method::POST, "/api/2.0/genie/spaces/slow/start-conversation") => {
            json!({"conversation_id": "c2", "message_id": "m2"})
        }
        (Method::GET, "/api/2.0/genie/spaces/slow/conversations/c2/messages/m2") => {
            ws.polls.fetch_add(1, Ordering::SeqCst);
            json!({"status": "EXECUTING_QUERY"})
        }
        (Method::GET, "/api/2.0/genie/spaces/missing") => {
            return api_error(StatusCode::NOT_FOUND, "RESOURCE_DOES_NOT_EXIST", "Space missing not found");
        }
        (Method::POST, p) if p == format!("{genie}/start-conversation") => {
            json!({"conversation_id": "c1", "message_id": "m1"})
        }
        (Method::GET, p) if p == message => {
            if ws.polls.fetch_add(1, Ordering::SeqCst) == 0 {
                json!({"status": "EXECUTING_QUERY"})
            } else {
                json!({
                    "status": "COMPLETED",
                    "attachments": [
                        {"attachment_id": "a1", "text": {"content": "EU leads with 10."}},
                        {"attachment_id": "a2", "query": {"query": "SELECT region, total FROM sales", "description": "Totals"}}
                    ]
                })
            }
        }
        (Method::GET, p) if p == format!("{message}/attachments/a2/query-result") => json!({
            "statement_response": {
                "manifest": {"schema": {"columns": [{"name": "region"}, {"name": "total"}]}},
                "result": {"data_array": [["EU", "10"]]}
            }
        }),
        (Method::GET, "/api/2.0/vector-search/endpoints") => match page {
            None => json!({"endpoints": [{"name": "ep1"}], "next_page_token": "p2"}),
            Some(_) => json!({"endpoints": [{"name": "ep2"}]}),
        },
        (Method::GET, "/api/2.0/vector-search/indexes") => {
            match query.get("endpoint_name").map(String::as_str) {
                Some("ep1") => json!({"vector_indexes": [{"name": "main.default.docs"}, {"name": "other.default.skip"}]}),
                _ => json!({"vector_indexes": [{"name": "main.defaultish.nope"}]}),
            }
        }
        (Method::GET, "/api/2.0/vector-search/indexes/main.default.docs") => json!({
            "name": "main.default.docs",
            "primary_key": "id",
            "delta_sync_index_spec": {"embedding_source_columns": [{"name": "text"}]}
        }),
        (Method::POST, "/api/2.0/vector-search/indexes/main.default.docs/query") => json!({
            "manifest": {"columns": [{"name": "id"}, {"name": "text"}, {"name": "score"}]},
            "result": {"row_count": 1, "data_array": [[1, "hello world", 0.92]]}
        }),
        (Method::GET, "/api/2.1/unity-catalog/functions") => match page {
            None => json!({
                "functions": [{
                    "name": "add",
                    "full_name": "main.default.add",
                    "comment": "Adds two numbers",
                    "input_params": {"parameters": [
                        {"name": "x", "type_name": "INT", "type_text": "int"},
                        {"name": "y", "type_name": "INT", "type_text": "int", "parameter_default": "1"}
                    ]}
                }],
                "next_page_token": "f2"
            }),
            Some(_) => json!({
                "functions": [{
                    "name": "greet",
                    "input_params": {"parameters": [{"name": "who", "type_name": "STRING", "type_text": "string"}]}
                }]
            }),
        },
        (Method::POST, "/api/2.0/sql/statements") => json!({
            "statement_id": "st-1",
            "status": {"state": "SUCCEEDED"},
            "result": {"data_array": [["3"]]}
        }),
        _ => return api_error(StatusCode::NOT_FOUND, "ENDPOINT_NOT_FOUND", "No such endpoint"),
    };
    Json(reply).into_response()
}

async fn spawn_workspace() -> (String, Arc<FakeWorkspace>) {
    let ws = Arc::new(FakeWorkspace::default());
    let app = Router::new()
        .fallback(workspace_handler)
        .with_state(Arc::clone(&ws));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), ws)
}

fn endpoint(base: &str) -> WorkspaceEndpoint {
    WorkspaceEndpoint::new(http_client(Duration::from_secs(5)).unwrap(), base).unwrap()
}

fn service(base: &str) -> WorkspaceClient {
    endpoint(base).authorize("svc-token")
}

fn settings() -> CatalogSettings {
    CatalogSettings {
        schema_full_name: Some("main.default".to_string()),
        genie_space_ids: vec!["s1".to_string()],
        vector_search_num_results: 3,
        warehouse_id: Some("wh1".to_string()),
    }
}

fn fast_genie() -> GenieConfig {
    GenieConfig {
        poll_interval: Duration::from_millis(5),
        max_wait: Duration::from_secs(2),
    }
}

fn find_tool<'a>(tools: &'a [ToolDescriptor], name: &str) -> &'a ToolDescriptor {
    tools
        .iter()
        .find(|t| t.name() == name)
        .unwrap_or_else(|| panic!("tool {name} not listed"))
}

// ============================================================================
// Exchange and identity
// ============================================================================

/// The exchange authenticates as the caller and sends the configured lifetime
#[tokio::test]
async fn test_token_exchange_as_caller() {
    let (base, ws) = spawn_workspace().await;
    let exchanger = WorkspaceTokenExchanger::new(endpoint(&base));
    let request = ExchangeRequest {
        lifetime: Duration::from_secs(600),
        comment: "mcp tool call".to_string(),
    };

    let credential = exchanger.exchange("user-token", &request).await.unwrap();

    assert_eq!(credential.secret(), "scoped-1");
    assert_eq!(credential.token_id(), Some("tid-1"));
    assert_eq!(
        credential.expires_at().map(|t| t.timestamp_millis()),
        Some(1_900_000_000_000)
    );

    let calls = ws.find(Method::POST, "/api/2.0/token/create");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].auth.as_deref(), Some("Bearer user-token"));
    assert_eq!(calls[0].body, json!({"lifetime_seconds": 600, "comment": "mcp tool call"}));
}

/// A refused exchange surfaces as an exchange failure carrying the workspace message
#[tokio::test]
async fn test_token_exchange_refused() {
    let (base, _ws) = spawn_workspace().await;
    let gateway = ExchangeGateway::new(
        Arc::new(WorkspaceTokenExchanger::new(endpoint(&base))),
        ExchangeRequest::default(),
    );

    let err = gateway
        .scoped_credential(Some("Bearer someone-else"))
        .await
        .unwrap_err();

    match err {
        Error::ExchangeFailed(message) => {
            assert!(message.contains("PERMISSION_DENIED"), "{message}");
            assert!(message.contains("403"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// SCIM Me resolves the forwarded token's owner
#[tokio::test]
async fn test_identity_lookup() {
    let (base, _ws) = spawn_workspace().await;
    let provider = WorkspaceIdentityProvider::new(http_client(Duration::from_secs(5)).unwrap());

    let user = provider.current_user(&base, "fwd-token").await.unwrap();
    assert_eq!(user.id, "1001");
    assert_eq!(user.user_name, "ada@example.com");
    assert_eq!(user.display_name.as_deref(), Some("Ada Lovelace"));
    assert!(user.active);

    let err = provider.current_user(&base, "stale").await.unwrap_err();
    assert!(matches!(err, Error::Backend { status: 401, .. }), "{err}");
}

/// Client credentials are traded for a service token used on later calls
#[tokio::test]
async fn test_service_login_with_client_credentials() {
    let (base, ws) = spawn_workspace().await;
    let config = WorkspaceConfig {
        host: Some(base.clone()),
        client_id: Some("sp-id".to_string()),
        client_secret: Some("sp-secret".to_string()),
        ..WorkspaceConfig::default()
    };

    let client = service_client(&config, http_client(Duration::from_secs(5)).unwrap())
        .await
        .unwrap();
    let _: Value = client.get_json("/api/2.0/genie/spaces/s1", &[]).await.unwrap();

    assert_eq!(ws.find(Method::POST, "/oidc/v1/token").len(), 1);
    let space = ws.find(Method::GET, "/api/2.0/genie/spaces/s1");
    assert_eq!(space[0].auth.as_deref(), Some("Bearer m2m-token"));
}

/// Without any service credential the client cannot be built
#[tokio::test]
async fn test_service_client_requires_credential() {
    let config = WorkspaceConfig {
        host: Some("https://adb-1.azuredatabricks.net".to_string()),
        ..WorkspaceConfig::default()
    };
    let err = service_client(&config, http_client(Duration::from_secs(1)).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}

// ============================================================================
// Adapters
// ============================================================================

/// Genie spaces list with the service token and execute with the scoped one
#[tokio::test]
async fn test_genie_space_tool() {
    let (base, ws) = spawn_workspace().await;
    let adapter = GenieAdapter::new(service(&base), fast_genie());

    let tools = adapter.list(&settings()).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name(), "genie_s1");
    assert_eq!(tools[0].description(), Some("Sales: Quarterly numbers"));

    let output = tools[0]
        .handle()
        .execute(&ScopedCredential::new("scoped-1"), json!({"query": "Which region leads?"}))
        .await
        .unwrap();

    assert_eq!(output["conversation_id"], "c1");
    assert_eq!(output["answer"], "EU leads with 10.");
    assert_eq!(output["queries"][0]["query"], "SELECT region, total FROM sales");
    assert_eq!(output["queries"][0]["result"], json!([{"region": "EU", "total": "10"}]));
    assert!(ws.polls.load(Ordering::SeqCst) >= 2);

    let start = ws.find(Method::POST, "/api/2.0/genie/spaces/s1/start-conversation");
    assert_eq!(start[0].body, json!({"content": "Which region leads?"}));

    for request in ws.requests() {
        let expected = if request.path == "/api/2.0/genie/spaces/s1" {
            "Bearer svc-token"
        } else {
            "Bearer scoped-1"
        };
        assert_eq!(request.auth.as_deref(), Some(expected), "{}", request.path);
    }
}

/// An unknown space fails the listing with the workspace status
#[tokio::test]
async fn test_genie_unknown_space() {
    let (base, _ws) = spawn_workspace().await;
    let adapter = GenieAdapter::new(service(&base), fast_genie());
    let mut selection = settings();
    selection.genie_space_ids = vec!["missing".to_string()];

    let err = adapter.list(&selection).await.unwrap_err();
    assert!(matches!(err, Error::Backend { status: 404, .. }), "{err}");
}

/// An unanswered question gives up after the last poll without a trailing wait
#[tokio::test]
async fn test_genie_gives_up_after_max_wait() {
    let (base, ws) = spawn_workspace().await;
    let adapter = GenieAdapter::new(
        service(&base),
        GenieConfig {
            poll_interval: Duration::from_millis(300),
            max_wait: Duration::from_millis(600),
        },
    );
    let mut selection = settings();
    selection.genie_space_ids = vec!["slow".to_string()];
    let tools = adapter.list(&selection).await.unwrap();

    let started = std::time::Instant::now();
    let err = tools[0]
        .handle()
        .execute(&ScopedCredential::new("scoped-1"), json!({"query": "Anything?"}))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Execution(_)), "{err}");
    assert_eq!(ws.polls.load(Ordering::SeqCst), 2);
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(550), "{elapsed:?}");
}

/// Vector indexes are listed across endpoint pages and filtered by schema
#[tokio::test]
async fn test_vector_search_tool() {
    let (base, ws) = spawn_workspace().await;
    let adapter = VectorSearchAdapter::new(service(&base));

    let tools = adapter.list(&settings()).await.unwrap();
    let names: Vec<&str> = tools.iter().map(ToolDescriptor::name).collect();
    assert_eq!(names, vec!["docs"]);
    assert_eq!(ws.find(Method::GET, "/api/2.0/vector-search/indexes").len(), 2);

    let rows = tools[0]
        .handle()
        .execute(&ScopedCredential::new("scoped-1"), json!({"query": "hello"}))
        .await
        .unwrap();
    assert_eq!(rows, json!([{"id": 1, "text": "hello world", "score": 0.92}]));

    let query = ws.find(Method::POST, "/api/2.0/vector-search/indexes/main.default.docs/query");
    assert_eq!(query[0].auth.as_deref(), Some("Bearer scoped-1"));
    assert_eq!(
        query[0].body,
        json!({"query_text": "hello", "columns": ["id", "text"], "num_results": 3})
    );
}

/// Without a schema no vector or function tools are listed
#[tokio::test]
async fn test_schema_sources_need_schema() {
    let (base, ws) = spawn_workspace().await;
    let mut selection = settings();
    selection.schema_full_name = None;

    assert!(VectorSearchAdapter::new(service(&base)).list(&selection).await.unwrap().is_empty());
    assert!(FunctionAdapter::new(service(&base)).list(&selection).await.unwrap().is_empty());
    assert!(ws.requests().is_empty());
}

/// Functions are listed across pages and run as a parameterized statement
#[tokio::test]
async fn test_function_tool() {
    let (base, ws) = spawn_workspace().await;
    let adapter = FunctionAdapter::new(service(&base));

    let tools = adapter.list(&settings()).await.unwrap();
    let names: Vec<&str> = tools.iter().map(ToolDescriptor::name).collect();
    assert_eq!(names, vec!["add", "greet"]);

    let pages = ws.find(Method::GET, "/api/2.1/unity-catalog/functions");
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].query.get("catalog_name").map(String::as_str), Some("main"));
    assert_eq!(pages[1].query.get("page_token").map(String::as_str), Some("f2"));

    let add = find_tool(&tools, "add");
    assert_eq!(add.description(), Some("Adds two numbers"));
    assert_eq!(add.input_schema()["required"], json!(["x"]));
    assert_eq!(add.input_schema()["properties"]["x"]["type"], "integer");

    let output = add
        .handle()
        .execute(&ScopedCredential::new("scoped-1"), json!({"x": 2}))
        .await
        .unwrap();
    assert_eq!(output, json!("3"));

    let statement = &ws.find(Method::POST, "/api/2.0/sql/statements")[0];
    assert_eq!(statement.auth.as_deref(), Some("Bearer scoped-1"));
    assert_eq!(statement.body["warehouse_id"], "wh1");
    assert_eq!(
        statement.body["statement"],
        "SELECT `main`.`default`.`add`(`x` => :x) AS result"
    );
    assert_eq!(
        statement.body["parameters"],
        json!([{"name": "x", "value": "2", "type": "int"}])
    );
}

// ============================================================================
// Full gateway
// ============================================================================

async fn mcp(router: &Router, auth: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/mcp")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// Every source is aggregated and calls run with the caller's scoped token
#[tokio::test]
async fn test_gateway_over_workspace() {
    let (base, ws) = spawn_workspace().await;
    let mut config = Config::default();
    config.workspace.host = Some(base);
    config.workspace.token = Some("svc-token".to_string());
    config.catalog = settings();
    config.genie = fast_genie();

    let gateway = Gateway::new(config).await.unwrap();
    let names: Vec<&str> = gateway.registry().names().collect();
    assert_eq!(names, vec!["genie_s1", "docs", "add", "greet"]);
    let router = gateway.router();

    let (status, body) = mcp(
        &router,
        Some("Bearer user-token"),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "add", "arguments": {"x": 2}}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["isError"], false);
    assert_eq!(body["result"]["content"][0]["text"], "3");

    let exchanges = ws.find(Method::POST, "/api/2.0/token/create");
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].auth.as_deref(), Some("Bearer user-token"));
    assert_eq!(exchanges[0].body["lifetime_seconds"], 3600);
    let statements = ws.find(Method::POST, "/api/2.0/sql/statements");
    assert_eq!(statements[0].auth.as_deref(), Some("Bearer scoped-1"));

    // A caller the workspace refuses never reaches the warehouse
    let (status, body) = mcp(
        &router,
        Some("Bearer someone-else"),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "add", "arguments": {"x": 2}}}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], -32002);
    assert_eq!(ws.find(Method::POST, "/api/2.0/sql/statements").len(), 1);
}
