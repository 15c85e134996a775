//! The interface a registry routes through when it reaches a mounted child.
//!
//! Both [`Registry`] and [`RegistryProxy`](super::proxy::RegistryProxy)
//! implement [`CapabilityProvider`], so a parent treats direct and proxied
//! children identically.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use rmcp::model::{Content, GetPromptResult};

use super::registry::Registry;
use crate::{
    error::RegistryResult,
    inventory::{JsonObject, Prompt, ReadResourceContents, Resource, ResourceTemplate, Tool},
};

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Upper bound for calls that cross a session. Overrides the proxy's
    /// default when set.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Every tool reachable through this provider, keyed by the name a caller
    /// must use.
    async fn list_tools(&self) -> RegistryResult<IndexMap<String, Tool>>;

    async fn list_resources(&self) -> RegistryResult<IndexMap<String, Resource>>;

    async fn list_resource_templates(&self) -> RegistryResult<IndexMap<String, ResourceTemplate>>;

    async fn list_prompts(&self) -> RegistryResult<IndexMap<String, Prompt>>;

    async fn call_tool(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<Vec<Content>>;

    async fn read_resource(
        &self,
        uri: &str,
        options: &CallOptions,
    ) -> RegistryResult<Vec<ReadResourceContents>>;

    async fn render_prompt(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<GetPromptResult>;

    /// Whether the provider has startup/shutdown hooks of its own.
    fn has_lifespan(&self) -> bool {
        false
    }

    /// The in-process registry behind this provider, if there is one.
    fn inner_registry(&self) -> Option<Arc<Registry>> {
        None
    }

    /// Called when the provider is mounted into `parent`. Providers whose
    /// capabilities can change behind the registry's back use it to
    /// invalidate the parent.
    fn watch_changes(&self, _parent: Weak<Registry>) {}

    /// Called when the provider is unmounted from `parent`.
    fn unwatch_changes(&self, _parent: &Weak<Registry>) {}

    /// Release whatever the provider holds open.
    async fn close(&self) -> RegistryResult<()> {
        Ok(())
    }
}
