//! Shared fakes for integration tests
#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use uc_mcp_gateway::config::CatalogSettings;
use uc_mcp_gateway::gateway::{
    ExchangeRequest, IdentityProvider, ScopedCredential, TokenExchanger, UserInfo,
};
use uc_mcp_gateway::tools::{SourceAdapter, ToolDescriptor, ToolHandle, ToolKind};
use uc_mcp_gateway::{Error, Result};

// ============================================================================
// Tool handles
// ============================================================================

/// Handle that records every call and returns a fixed output
#[derive(Default)]
pub struct RecordingHandle {
    output: Value,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingHandle {
    pub fn returning(output: Value) -> Arc<Self> {
        Arc::new(Self {
            output,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(scoped token, arguments)` per call
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ToolHandle for RecordingHandle {
    fn kind(&self) -> ToolKind {
        ToolKind::Function
    }

    async fn execute(&self, credential: &ScopedCredential, arguments: Value) -> Result<Value> {
        self.calls
            .lock()
            .push((credential.secret().to_string(), arguments));
        Ok(self.output.clone())
    }
}

/// Handle whose backend always refuses
pub struct FailingHandle {
    pub status: u16,
    pub message: String,
}

#[async_trait]
impl ToolHandle for FailingHandle {
    fn kind(&self) -> ToolKind {
        ToolKind::VectorSearch
    }

    async fn execute(&self, _credential: &ScopedCredential, _arguments: Value) -> Result<Value> {
        Err(Error::Backend {
            status: self.status,
            message: self.message.clone(),
        })
    }
}

pub fn open_schema() -> Value {
    json!({"type": "object"})
}

pub fn descriptor(name: &str, handle: Arc<dyn ToolHandle>) -> ToolDescriptor {
    ToolDescriptor::new(name, open_schema(), handle).with_description(format!("{name} tool"))
}

// ============================================================================
// Source adapters
// ============================================================================

/// Adapter returning a fixed list and counting calls
pub struct FakeAdapter {
    name: String,
    tools: Vec<ToolDescriptor>,
    fail: bool,
    calls: AtomicUsize,
    order: Option<Arc<Mutex<Vec<String>>>>,
}

impl FakeAdapter {
    pub fn new(name: &str, tools: Vec<ToolDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools,
            fail: false,
            calls: AtomicUsize::new(0),
            order: None,
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
            order: None,
        })
    }

    /// Adapter that appends its name to `order` when listed
    pub fn tracked(name: &str, tools: Vec<ToolDescriptor>, order: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools,
            fail: false,
            calls: AtomicUsize::new(0),
            order: Some(order),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, _settings: &CatalogSettings) -> Result<Vec<ToolDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(order) = &self.order {
            order.lock().push(self.name.clone());
        }
        if self.fail {
            return Err(Error::Backend {
                status: 503,
                message: "catalog unavailable".to_string(),
            });
        }
        Ok(self.tools.clone())
    }
}

// ============================================================================
// Exchange and identity providers
// ============================================================================

/// Exchanger that mints `scoped-<bearer>` or fails
#[derive(Default)]
pub struct FakeExchanger {
    fail: bool,
    calls: Mutex<Vec<(String, ExchangeRequest)>>,
}

impl FakeExchanger {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(String, ExchangeRequest)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TokenExchanger for FakeExchanger {
    async fn exchange(&self, bearer: &str, request: &ExchangeRequest) -> Result<ScopedCredential> {
        self.calls.lock().push((bearer.to_string(), request.clone()));
        if self.fail {
            return Err(Error::Backend {
                status: 403,
                message: "PERMISSION_DENIED: token creation disabled".to_string(),
            });
        }
        Ok(ScopedCredential::new(format!("scoped-{bearer}")))
    }
}

/// Identity provider returning a fixed user or failing
pub struct FakeIdentity {
    user: Option<UserInfo>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeIdentity {
    pub fn returning(user: UserInfo) -> Arc<Self> {
        Arc::new(Self {
            user: Some(user),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            user: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(host, token)` per lookup
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_user(&self, host: &str, token: &str) -> Result<UserInfo> {
        self.calls.lock().push((host.to_string(), token.to_string()));
        self.user
            .clone()
            .ok_or_else(|| Error::IdentityLookup("invalid access token".to_string()))
    }
}

pub fn ada() -> UserInfo {
    UserInfo {
        id: "1001".to_string(),
        user_name: "ada@example.com".to_string(),
        display_name: Some("Ada Lovelace".to_string()),
        active: true,
    }
}

// ============================================================================
// Log capture
// ============================================================================

/// One captured tracing event
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Message plus every field value, for "never logged" checks
    pub fn rendered(&self) -> String {
        let mut out = self.message.clone();
        for (k, v) in &self.fields {
            out.push_str(&format!(" {k}={v}"));
        }
        out
    }
}

/// Layer that keeps every event in memory
#[derive(Clone, Default)]
pub struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureLayer {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    pub fn at(&self, level: Level) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }

    /// Subscriber to scope around the code under test
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        tracing_subscriber::registry().with(self.clone())
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}
