//! Name-keyed tool registry built once at startup

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{SourceAdapter, ToolDescriptor};
use crate::config::CatalogSettings;
use crate::{Error, Result};

/// Immutable registry of every tool the server exposes.
///
/// When two descriptors share a name, the first one encountered is kept;
/// adapters are consulted in the order they are passed to [`ToolRegistry::build`].
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    duplicates: Vec<String>,
}

impl ToolRegistry {
    /// Call each adapter once, in order, and aggregate the results.
    ///
    /// # Errors
    ///
    /// Returns `Error::SourceAdapter` for the first adapter that fails; no
    /// partially built registry is returned.
    pub async fn build(adapters: &[Arc<dyn SourceAdapter>], settings: &CatalogSettings) -> Result<Self> {
        let mut descriptors = Vec::new();

        for adapter in adapters {
            let listed = adapter.list(settings).await.map_err(|e| Error::SourceAdapter {
                adapter: adapter.name().to_string(),
                message: e.to_string(),
            })?;
            debug!(adapter = %adapter.name(), count = listed.len(), "Tool source listed");
            descriptors.extend(listed);
        }

        let registry = Self::from_descriptors(descriptors)?;
        info!(tools = registry.len(), "Tool registry built");
        Ok(registry)
    }

    /// Build a registry from already-listed descriptors.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a descriptor has an empty name.
    pub fn from_descriptors(descriptors: Vec<ToolDescriptor>) -> Result<Self> {
        let mut registry = Self::default();

        for descriptor in descriptors {
            if descriptor.name().trim().is_empty() {
                return Err(Error::Config("Tool descriptor with empty name".to_string()));
            }
            if registry.index.contains_key(descriptor.name()) {
                if !registry.duplicates.iter().any(|d| d == descriptor.name()) {
                    registry.duplicates.push(descriptor.name().to_string());
                }
                continue;
            }
            registry
                .index
                .insert(descriptor.name().to_string(), registry.tools.len());
            registry.tools.push(descriptor);
        }

        for name in &registry.duplicates {
            warn!(tool = %name, "Duplicate tool name, keeping the first definition");
        }

        Ok(registry)
    }

    /// All tools in registration order
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Look up a tool by exact name
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Names that were defined more than once
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// Registered tool names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(ToolDescriptor::name)
    }

    /// Number of tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
