//! The registry: local managers plus a mount table of child providers.
//!
//! A request is resolved against the local managers first. Otherwise the
//! mount table is walked in mount order; the first mount whose prefix the
//! key carries gets the stripped key. Listings fan out over every mount and
//! are memoized in a [`TimedCache`] that any mutation in the tree clears.

use std::{
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Instant,
};

use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rmcp::model::{Content, GetPromptResult};
use tracing::{debug, info, warn};

use super::{
    cache::TimedCache,
    config::{DuplicatePolicy, PrefixFormat, RegistryConfig},
    metrics::{CapabilityId, RegistryMetrics},
    prefix::{
        add_resource_prefix, prefix_name, strip_name_prefix, strip_resource_prefix,
        validate_resource_prefix,
    },
    provider::{CallOptions, CapabilityProvider},
    proxy::{infer_transport, ProxyTarget, RegistryProxy},
    session::InProcessSession,
};
use crate::{
    error::{CapabilityKind, RegistryError, RegistryResult},
    inventory::{
        JsonObject, Prompt, PromptManager, ReadResourceContents, Resource, ResourceManager,
        ResourceTemplate, Tool, ToolManager,
    },
};

/// Startup and shutdown hooks run around a registry's serving lifetime.
#[async_trait]
pub trait Lifespan: Send + Sync {
    async fn startup(&self, registry: &Registry) -> anyhow::Result<()>;

    async fn shutdown(&self, _registry: &Registry) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One entry of a registry's mount table.
#[derive(Clone)]
pub struct MountedServer {
    pub prefix: String,
    /// Reached through a session rather than by direct calls.
    pub proxied: bool,
    provider: Arc<dyn CapabilityProvider>,
}

impl MountedServer {
    pub fn provider(&self) -> &Arc<dyn CapabilityProvider> {
        &self.provider
    }
}

impl fmt::Debug for MountedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountedServer")
            .field("prefix", &self.prefix)
            .field("provider", &self.provider.name())
            .field("proxied", &self.proxied)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ListingKind {
    Tools,
    Resources,
    Templates,
    Prompts,
}

#[derive(Clone)]
enum Listing {
    Tools(IndexMap<String, Tool>),
    Resources(IndexMap<String, Resource>),
    Templates(IndexMap<String, ResourceTemplate>),
    Prompts(IndexMap<String, Prompt>),
}

pub struct Registry {
    config: RegistryConfig,
    tools: ToolManager,
    resources: ResourceManager,
    prompts: PromptManager,
    mounts: RwLock<Vec<MountedServer>>,
    listings: TimedCache<ListingKind, Listing>,
    generation: AtomicU64,
    parents: Mutex<Vec<Weak<Registry>>>,
    lifespan: Option<Arc<dyn Lifespan>>,
    running: tokio::sync::Mutex<bool>,
    metrics: Arc<RegistryMetrics>,
    self_ref: Weak<Registry>,
}

pub struct RegistryBuilder {
    config: RegistryConfig,
    lifespan: Option<Arc<dyn Lifespan>>,
}

impl RegistryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: RegistryConfig::named(name),
            lifespan: None,
        }
    }

    /// Replace the whole configuration, name included.
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn lifespan(mut self, lifespan: impl Lifespan + 'static) -> Self {
        self.lifespan = Some(Arc::new(lifespan));
        self
    }

    /// Same duplicate policy for tools, resources and prompts.
    pub fn on_duplicate(mut self, policy: DuplicatePolicy) -> Self {
        self.config.on_duplicate_tools = policy;
        self.config.on_duplicate_resources = policy;
        self.config.on_duplicate_prompts = policy;
        self
    }

    pub fn prefix_format(mut self, format: PrefixFormat) -> Self {
        self.config.resource_prefix_format = format;
        self
    }

    pub fn cache_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.config.cache_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn mask_error_details(mut self, mask: bool) -> Self {
        self.config.mask_error_details = mask;
        self
    }

    pub fn proxy_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.proxy_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn build(self) -> Arc<Registry> {
        let RegistryBuilder { config, lifespan } = self;
        Arc::new_cyclic(|self_ref| Registry {
            tools: ToolManager::new(config.on_duplicate_tools, config.mask_error_details),
            resources: ResourceManager::new(
                config.on_duplicate_resources,
                config.mask_error_details,
            ),
            prompts: PromptManager::new(config.on_duplicate_prompts, config.mask_error_details),
            mounts: RwLock::new(Vec::new()),
            listings: TimedCache::new(config.cache_ttl()),
            generation: AtomicU64::new(0),
            parents: Mutex::new(Vec::new()),
            lifespan,
            running: tokio::sync::Mutex::new(false),
            metrics: Arc::new(RegistryMetrics::new()),
            self_ref: self_ref.clone(),
            config,
        })
    }
}

impl Registry {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        RegistryBuilder::new(name).build()
    }

    pub fn with_config(config: RegistryConfig) -> Arc<Self> {
        RegistryBuilder::new(config.name.clone()).config(config).build()
    }

    pub fn builder(name: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn prefix_format(&self) -> PrefixFormat {
        self.config.resource_prefix_format
    }

    pub fn metrics(&self) -> Arc<RegistryMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn has_lifespan(&self) -> bool {
        self.lifespan.is_some()
    }

    // ========================================================================
    // Local registration
    // ========================================================================

    pub fn add_tool(&self, tool: Tool) -> RegistryResult<Tool> {
        let stored = self.tools.add_tool(tool)?;
        self.invalidate();
        Ok(stored)
    }

    pub fn add_tool_with_key(&self, tool: Tool, key: impl Into<String>) -> RegistryResult<Tool> {
        let stored = self.tools.add_tool_with_key(tool, key)?;
        self.invalidate();
        Ok(stored)
    }

    pub fn remove_tool(&self, key: &str) -> RegistryResult<Tool> {
        let removed = self.tools.remove_tool(key)?;
        self.invalidate();
        Ok(removed)
    }

    pub fn add_resource(&self, resource: Resource) -> RegistryResult<Resource> {
        let stored = self.resources.add_resource(resource)?;
        self.invalidate();
        Ok(stored)
    }

    pub fn remove_resource(&self, uri: &str) -> RegistryResult<Resource> {
        let removed = self.resources.remove_resource(uri)?;
        self.invalidate();
        Ok(removed)
    }

    pub fn add_template(&self, template: ResourceTemplate) -> RegistryResult<ResourceTemplate> {
        let stored = self.resources.add_template(template)?;
        self.invalidate();
        Ok(stored)
    }

    pub fn remove_template(&self, uri_template: &str) -> RegistryResult<ResourceTemplate> {
        let removed = self.resources.remove_template(uri_template)?;
        self.invalidate();
        Ok(removed)
    }

    pub fn add_prompt(&self, prompt: Prompt) -> RegistryResult<Prompt> {
        let stored = self.prompts.add_prompt(prompt)?;
        self.invalidate();
        Ok(stored)
    }

    pub fn remove_prompt(&self, key: &str) -> RegistryResult<Prompt> {
        let removed = self.prompts.remove_prompt(key)?;
        self.invalidate();
        Ok(removed)
    }

    /// Drop memoized listings here and in every registry this one is
    /// mounted into.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.listings.clear();
        self.metrics.record_invalidation();

        let parents: Vec<Arc<Registry>> = {
            let mut parents = self.parents.lock();
            parents.retain(|p| p.strong_count() > 0);
            parents.iter().filter_map(Weak::upgrade).collect()
        };
        for parent in parents {
            parent.invalidate();
        }
    }

    // ========================================================================
    // Aggregated listings
    // ========================================================================

    fn cached(&self, kind: ListingKind) -> Option<Listing> {
        let hit = self.listings.get(&kind);
        if hit.is_some() {
            self.metrics.record_cache_hit();
        } else {
            self.metrics.record_cache_miss();
        }
        hit
    }

    fn store(&self, generation: u64, listing: Listing, kind: ListingKind) {
        // A mutation raced with the fan-out; the result may be stale.
        if self.generation.load(Ordering::SeqCst) == generation {
            self.listings.set(kind, listing);
        }
    }

    fn mount_table(&self) -> Vec<MountedServer> {
        self.mounts.read().clone()
    }

    /// List `kind` from every mount concurrently. Failed mounts are logged
    /// and left out.
    async fn fan_out(&self, kind: ListingKind) -> Vec<(MountedServer, Listing)> {
        let mounts = self.mount_table();
        let results =
            join_all(mounts.iter().map(|m| fetch_listing(m.provider.as_ref(), kind))).await;

        mounts
            .into_iter()
            .zip(results)
            .filter_map(|(mount, result)| match result {
                Ok(listing) => Some((mount, listing)),
                Err(e) => {
                    warn!(
                        "Failed to list {:?} from server mounted at '{}': {}",
                        kind, mount.prefix, e
                    );
                    None
                }
            })
            .collect()
    }

    /// Mounted entries in mount order, then local entries. Local entries
    /// replace mounted ones under the same key.
    pub async fn list_tools(&self) -> RegistryResult<IndexMap<String, Tool>> {
        if let Some(Listing::Tools(tools)) = self.cached(ListingKind::Tools) {
            return Ok(tools);
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let mut tools = IndexMap::new();
        for (mount, listing) in self.fan_out(ListingKind::Tools).await {
            if let Listing::Tools(child) = listing {
                for (key, tool) in child {
                    tools.insert(prefix_name(&mount.prefix, &key), tool);
                }
            }
        }
        tools.extend(self.tools.tools());

        self.store(generation, Listing::Tools(tools.clone()), ListingKind::Tools);
        Ok(tools)
    }

    pub async fn list_resources(&self) -> RegistryResult<IndexMap<String, Resource>> {
        if let Some(Listing::Resources(resources)) = self.cached(ListingKind::Resources) {
            return Ok(resources);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let format = self.prefix_format();

        let mut resources = IndexMap::new();
        for (mount, listing) in self.fan_out(ListingKind::Resources).await {
            if let Listing::Resources(child) = listing {
                for (uri, resource) in child {
                    match add_resource_prefix(&uri, &mount.prefix, format) {
                        Ok(key) => {
                            resources.insert(key, resource);
                        }
                        Err(e) => warn!("Skipping resource '{}': {}", uri, e),
                    }
                }
            }
        }
        resources.extend(self.resources.resources());

        self.store(
            generation,
            Listing::Resources(resources.clone()),
            ListingKind::Resources,
        );
        Ok(resources)
    }

    pub async fn list_resource_templates(
        &self,
    ) -> RegistryResult<IndexMap<String, ResourceTemplate>> {
        if let Some(Listing::Templates(templates)) = self.cached(ListingKind::Templates) {
            return Ok(templates);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let format = self.prefix_format();

        let mut templates = IndexMap::new();
        for (mount, listing) in self.fan_out(ListingKind::Templates).await {
            if let Listing::Templates(child) = listing {
                for (key, template) in child {
                    match add_resource_prefix(&key, &mount.prefix, format) {
                        Ok(prefixed) => {
                            templates.insert(prefixed, template);
                        }
                        Err(e) => warn!("Skipping resource template '{}': {}", key, e),
                    }
                }
            }
        }
        templates.extend(self.resources.templates());

        self.store(
            generation,
            Listing::Templates(templates.clone()),
            ListingKind::Templates,
        );
        Ok(templates)
    }

    pub async fn list_prompts(&self) -> RegistryResult<IndexMap<String, Prompt>> {
        if let Some(Listing::Prompts(prompts)) = self.cached(ListingKind::Prompts) {
            return Ok(prompts);
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let mut prompts = IndexMap::new();
        for (mount, listing) in self.fan_out(ListingKind::Prompts).await {
            if let Listing::Prompts(child) = listing {
                for (key, prompt) in child {
                    prompts.insert(prefix_name(&mount.prefix, &key), prompt);
                }
            }
        }
        prompts.extend(self.prompts.prompts());

        self.store(generation, Listing::Prompts(prompts.clone()), ListingKind::Prompts);
        Ok(prompts)
    }

    pub async fn get_tool(&self, key: &str) -> RegistryResult<Tool> {
        if let Ok(tool) = self.tools.get_tool(key) {
            return Ok(tool);
        }
        self.list_tools()
            .await?
            .swap_remove(key)
            .ok_or_else(|| RegistryError::ToolNotFound(key.to_string()))
    }

    pub async fn get_resource(&self, uri: &str) -> RegistryResult<Resource> {
        if let Ok(resource) = self.resources.get_resource(uri) {
            return Ok(resource);
        }
        self.list_resources()
            .await?
            .swap_remove(uri)
            .ok_or_else(|| RegistryError::ResourceNotFound(uri.to_string()))
    }

    pub async fn get_resource_template(
        &self,
        uri_template: &str,
    ) -> RegistryResult<ResourceTemplate> {
        if let Ok(template) = self.resources.get_template(uri_template) {
            return Ok(template);
        }
        self.list_resource_templates()
            .await?
            .swap_remove(uri_template)
            .ok_or_else(|| RegistryError::ResourceNotFound(uri_template.to_string()))
    }

    pub async fn get_prompt(&self, key: &str) -> RegistryResult<Prompt> {
        if let Ok(prompt) = self.prompts.get_prompt(key) {
            return Ok(prompt);
        }
        self.list_prompts()
            .await?
            .swap_remove(key)
            .ok_or_else(|| RegistryError::PromptNotFound(key.to_string()))
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Run a routed call with metrics. `id` is only built for calls that
    /// reached a capability, so unknown keys never enter the latency map.
    async fn instrumented<T>(
        &self,
        fut: impl Future<Output = RegistryResult<T>>,
        id: impl FnOnce() -> CapabilityId,
    ) -> RegistryResult<T> {
        self.metrics.record_call_start();
        let start = Instant::now();
        let result = fut.await;
        if result.as_ref().is_err_and(RegistryError::is_not_found) {
            self.metrics.record_unresolved_call_end();
            return result;
        }
        if matches!(result, Err(RegistryError::Timeout(_))) {
            self.metrics.record_timeout();
        }
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.metrics.record_call_end(&id(), result.is_ok(), elapsed_ms);
        result
    }

    /// Latency key for a resource read: the concrete URI, or the visible key
    /// of the template that served it. Reads through a mount without an
    /// in-process registry behind it are grouped under the mount.
    fn resource_latency_key(&self, uri: &str) -> String {
        if let Some(key) = self.resources.resolved_key(uri) {
            return key;
        }
        let format = self.prefix_format();
        for mount in self.mount_table() {
            let Some(child_uri) = strip_resource_prefix(uri, &mount.prefix, format) else {
                continue;
            };
            let mount_key = format!("{}/*", mount.prefix);
            return match mount.provider.inner_registry() {
                Some(child) => {
                    let child_key = child.resource_latency_key(&child_uri);
                    add_resource_prefix(&child_key, &mount.prefix, format)
                        .unwrap_or(mount_key)
                }
                None => mount_key,
            };
        }
        uri.to_string()
    }

    pub async fn call_tool(
        &self,
        key: &str,
        arguments: JsonObject,
    ) -> RegistryResult<Vec<Content>> {
        self.call_tool_with(key, arguments, &CallOptions::default())
            .await
    }

    pub async fn call_tool_with(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<Vec<Content>> {
        self.instrumented(self.route_tool(key, arguments, options), || {
            CapabilityId::new(CapabilityKind::Tool, key)
        })
        .await
    }

    async fn route_tool(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<Vec<Content>> {
        if self.tools.has_tool(key) {
            return self.tools.call_tool(key, arguments).await;
        }
        for mount in self.mount_table() {
            if let Some(child_key) = strip_name_prefix(&mount.prefix, key) {
                debug!("Routing tool '{}' to mount '{}'", key, mount.prefix);
                return mount
                    .provider
                    .call_tool(child_key, arguments, options)
                    .await
                    .map_err(|e| rekey_not_found(e, CapabilityKind::Tool, key));
            }
        }
        Err(RegistryError::ToolNotFound(key.to_string()))
    }

    pub async fn read_resource(&self, uri: &str) -> RegistryResult<Vec<ReadResourceContents>> {
        self.read_resource_with(uri, &CallOptions::default()).await
    }

    pub async fn read_resource_with(
        &self,
        uri: &str,
        options: &CallOptions,
    ) -> RegistryResult<Vec<ReadResourceContents>> {
        self.instrumented(self.route_resource(uri, options), || {
            CapabilityId::new(CapabilityKind::Resource, self.resource_latency_key(uri))
        })
        .await
    }

    async fn route_resource(
        &self,
        uri: &str,
        options: &CallOptions,
    ) -> RegistryResult<Vec<ReadResourceContents>> {
        if self.resources.has_resource(uri) {
            return self.resources.read_resource(uri).await;
        }
        let format = self.prefix_format();
        for mount in self.mount_table() {
            if let Some(child_uri) = strip_resource_prefix(uri, &mount.prefix, format) {
                debug!("Routing resource '{}' to mount '{}'", uri, mount.prefix);
                return mount
                    .provider
                    .read_resource(&child_uri, options)
                    .await
                    .map_err(|e| rekey_not_found(e, CapabilityKind::Resource, uri));
            }
        }
        Err(RegistryError::ResourceNotFound(uri.to_string()))
    }

    pub async fn render_prompt(
        &self,
        key: &str,
        arguments: JsonObject,
    ) -> RegistryResult<GetPromptResult> {
        self.render_prompt_with(key, arguments, &CallOptions::default())
            .await
    }

    pub async fn render_prompt_with(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<GetPromptResult> {
        self.instrumented(self.route_prompt(key, arguments, options), || {
            CapabilityId::new(CapabilityKind::Prompt, key)
        })
        .await
    }

    async fn route_prompt(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<GetPromptResult> {
        if self.prompts.has_prompt(key) {
            return self.prompts.render_prompt(key, arguments).await;
        }
        for mount in self.mount_table() {
            if let Some(child_key) = strip_name_prefix(&mount.prefix, key) {
                debug!("Routing prompt '{}' to mount '{}'", key, mount.prefix);
                return mount
                    .provider
                    .render_prompt(child_key, arguments, options)
                    .await
                    .map_err(|e| rekey_not_found(e, CapabilityKind::Prompt, key));
            }
        }
        Err(RegistryError::PromptNotFound(key.to_string()))
    }

    // ========================================================================
    // Composition
    // ========================================================================

    /// Mount `child` live under `prefix`.
    ///
    /// With `as_proxy` unset the child is proxied exactly when it has a
    /// lifespan, so its startup runs before the first forwarded request.
    pub fn mount(
        &self,
        prefix: &str,
        child: Arc<Registry>,
        as_proxy: Option<bool>,
    ) -> RegistryResult<()> {
        let as_proxy = as_proxy.unwrap_or_else(|| child.has_lifespan());
        let provider: Arc<dyn CapabilityProvider> = if as_proxy {
            let session = Arc::new(InProcessSession::new(child));
            Arc::new(RegistryProxy::new(session, self.config.proxy_timeout()))
        } else {
            child
        };
        self.attach(prefix, provider, as_proxy)
    }

    /// Mount an arbitrary provider live under `prefix`.
    pub fn mount_provider(
        &self,
        prefix: &str,
        provider: Arc<dyn CapabilityProvider>,
    ) -> RegistryResult<()> {
        self.attach(prefix, provider, false)
    }

    /// Resolve `target` to a session and mount a proxy over it.
    pub async fn mount_proxy(&self, prefix: &str, target: ProxyTarget) -> RegistryResult<()> {
        let session = infer_transport(target).await?;
        let proxy = RegistryProxy::new(session, self.config.proxy_timeout());
        self.attach(prefix, Arc::new(proxy), true)
    }

    pub(crate) fn attach(
        &self,
        prefix: &str,
        provider: Arc<dyn CapabilityProvider>,
        proxied: bool,
    ) -> RegistryResult<()> {
        validate_resource_prefix(prefix, self.prefix_format())?;

        let child = provider.inner_registry();
        let watched = Arc::clone(&provider);
        if let Some(child) = &child {
            if child.reaches(self) {
                return Err(RegistryError::MountCycle(prefix.to_string()));
            }
        }

        {
            let mut mounts = self.mounts.write();
            if mounts.iter().any(|m| m.prefix == prefix) {
                return Err(RegistryError::DuplicateMount(prefix.to_string()));
            }
            info!(
                "Mounted '{}' into '{}' under prefix '{}'{}",
                provider.name(),
                self.name(),
                prefix,
                if proxied { " (proxied)" } else { "" }
            );
            mounts.push(MountedServer {
                prefix: prefix.to_string(),
                proxied,
                provider,
            });
        }

        if let Some(child) = child {
            child.parents.lock().push(self.self_ref.clone());
        }
        watched.watch_changes(self.self_ref.clone());
        self.invalidate();
        Ok(())
    }

    /// Remove the mount registered under `prefix`. The child itself is left
    /// untouched and is returned.
    pub fn unmount(&self, prefix: &str) -> RegistryResult<Arc<dyn CapabilityProvider>> {
        let removed = {
            let mut mounts = self.mounts.write();
            let index = mounts
                .iter()
                .position(|m| m.prefix == prefix)
                .ok_or_else(|| RegistryError::MountNotFound(prefix.to_string()))?;
            mounts.remove(index)
        };

        if let Some(child) = removed.provider.inner_registry() {
            let mut parents = child.parents.lock();
            if let Some(pos) = parents
                .iter()
                .position(|p| std::ptr::eq(p.as_ptr(), self))
            {
                parents.remove(pos);
            }
        }
        removed.provider.unwatch_changes(&self.self_ref);

        info!("Unmounted prefix '{}' from '{}'", prefix, self.name());
        self.invalidate();
        Ok(removed.provider)
    }

    pub fn mounts(&self) -> Vec<MountedServer> {
        self.mount_table()
    }

    /// Whether `target` is this registry or is mounted anywhere below it.
    fn reaches(&self, target: &Registry) -> bool {
        if std::ptr::eq(self, target) {
            return true;
        }
        let children: Vec<Arc<Registry>> = self
            .mounts
            .read()
            .iter()
            .filter_map(|m| m.provider.inner_registry())
            .collect();
        children.iter().any(|child| child.reaches(target))
    }

    /// Copy everything `source` currently exposes into the local managers.
    ///
    /// Tool and prompt keys become `{prefix}_{key}` and resource URIs are
    /// prefixed in this registry's format. No link to `source` is kept.
    /// Collisions go through the local duplicate policy.
    pub async fn import_server(
        &self,
        prefix: Option<&str>,
        source: &dyn CapabilityProvider,
    ) -> RegistryResult<()> {
        let format = self.prefix_format();
        if let Some(prefix) = prefix {
            validate_resource_prefix(prefix, format)?;
        }
        let name_key = |key: &str| match prefix {
            Some(p) => prefix_name(p, key),
            None => key.to_string(),
        };
        let uri_key = |uri: &str| match prefix {
            Some(p) => add_resource_prefix(uri, p, format),
            None => Ok(uri.to_string()),
        };

        let tools = source.list_tools().await?;
        let resources = source.list_resources().await?;
        let templates = source.list_resource_templates().await?;
        let prompts = source.list_prompts().await?;
        let counts = (tools.len(), resources.len(), templates.len(), prompts.len());

        let result = (|| -> RegistryResult<()> {
            for (key, tool) in tools {
                self.tools.add_tool_with_key(tool, name_key(&key))?;
            }
            for (uri, resource) in resources {
                self.resources.add_resource_with_key(resource, uri_key(&uri)?)?;
            }
            for (key, template) in templates {
                self.resources.add_template_with_key(template, uri_key(&key)?)?;
            }
            for (key, prompt) in prompts {
                self.prompts.add_prompt_with_key(prompt, name_key(&key))?;
            }
            Ok(())
        })();
        self.invalidate();
        result?;

        info!(
            "Imported {} tools, {} resources, {} templates and {} prompts from '{}' into '{}'{}",
            counts.0,
            counts.1,
            counts.2,
            counts.3,
            source.name(),
            self.name(),
            prefix.map(|p| format!(" with prefix '{p}'")).unwrap_or_default()
        );
        Ok(())
    }

    // ========================================================================
    // Lifespan
    // ========================================================================

    /// Run the lifespan startup hook. Calling it again while running is a
    /// no-op.
    pub async fn startup(&self) -> RegistryResult<()> {
        let mut running = self.running.lock().await;
        if *running {
            return Ok(());
        }
        if let Some(lifespan) = &self.lifespan {
            lifespan.startup(self).await.map_err(|e| {
                RegistryError::Lifespan(format!("startup of '{}': {e:#}", self.name()))
            })?;
            info!("Started registry '{}'", self.name());
        }
        *running = true;
        Ok(())
    }

    /// Close every mounted provider, then run the lifespan shutdown hook if
    /// startup ran.
    pub async fn shutdown(&self) -> RegistryResult<()> {
        self.close_mounts().await;

        let mut running = self.running.lock().await;
        if !*running {
            return Ok(());
        }
        *running = false;
        if let Some(lifespan) = &self.lifespan {
            lifespan.shutdown(self).await.map_err(|e| {
                RegistryError::Lifespan(format!("shutdown of '{}': {e:#}", self.name()))
            })?;
            info!("Shut down registry '{}'", self.name());
        }
        Ok(())
    }

    async fn close_mounts(&self) {
        for mount in self.mount_table() {
            if let Err(e) = mount.provider.close().await {
                warn!("Error closing server mounted at '{}': {}", mount.prefix, e);
            }
        }
    }
}

async fn fetch_listing(
    provider: &dyn CapabilityProvider,
    kind: ListingKind,
) -> RegistryResult<Listing> {
    Ok(match kind {
        ListingKind::Tools => Listing::Tools(provider.list_tools().await?),
        ListingKind::Resources => Listing::Resources(provider.list_resources().await?),
        ListingKind::Templates => Listing::Templates(provider.list_resource_templates().await?),
        ListingKind::Prompts => Listing::Prompts(provider.list_prompts().await?),
    })
}

/// A child reports keys without the parent's prefix; callers should see the
/// key they asked for.
fn rekey_not_found(err: RegistryError, kind: CapabilityKind, key: &str) -> RegistryError {
    if err.is_not_found() {
        RegistryError::not_found(kind, key)
    } else {
        err
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.config.name)
            .field("tools", &self.tools.len())
            .field("mounts", &*self.mounts.read())
            .field("has_lifespan", &self.lifespan.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CapabilityProvider for Registry {
    fn name(&self) -> &str {
        Registry::name(self)
    }

    async fn list_tools(&self) -> RegistryResult<IndexMap<String, Tool>> {
        Registry::list_tools(self).await
    }

    async fn list_resources(&self) -> RegistryResult<IndexMap<String, Resource>> {
        Registry::list_resources(self).await
    }

    async fn list_resource_templates(&self) -> RegistryResult<IndexMap<String, ResourceTemplate>> {
        Registry::list_resource_templates(self).await
    }

    async fn list_prompts(&self) -> RegistryResult<IndexMap<String, Prompt>> {
        Registry::list_prompts(self).await
    }

    async fn call_tool(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<Vec<Content>> {
        self.call_tool_with(key, arguments, options).await
    }

    async fn read_resource(
        &self,
        uri: &str,
        options: &CallOptions,
    ) -> RegistryResult<Vec<ReadResourceContents>> {
        self.read_resource_with(uri, options).await
    }

    async fn render_prompt(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<GetPromptResult> {
        self.render_prompt_with(key, arguments, options).await
    }

    fn has_lifespan(&self) -> bool {
        Registry::has_lifespan(self)
    }

    fn inner_registry(&self) -> Option<Arc<Registry>> {
        self.self_ref.upgrade()
    }

    async fn close(&self) -> RegistryResult<()> {
        self.close_mounts().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::inventory::ResourceContent;

    fn echo(name: &str) -> Tool {
        let reply = name.to_string();
        Tool::from_fn(name, move |_| {
            let reply = reply.clone();
            async move { Ok(vec![Content::text(reply)]) }
        })
    }

    fn text(content: &[Content]) -> String {
        content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_local_call_and_metrics() {
        let registry = Registry::new("root");
        registry.add_tool(echo("ping")).unwrap();

        let out = registry.call_tool("ping", JsonObject::new()).await.unwrap();
        assert_eq!(text(&out), "ping");
        let _ = registry.call_tool("nope", JsonObject::new()).await;

        let snapshot = registry.metrics().snapshot();
        assert_eq!(snapshot.total_calls, 2);
        assert_eq!(snapshot.successful_calls, 1);
        assert_eq!(snapshot.failed_calls, 1);
    }

    #[tokio::test]
    async fn test_latency_keys_stay_bounded() {
        let child = Registry::new("child");
        child
            .add_template(
                ResourceTemplate::from_fn("users://{id}", "user", |p| async move {
                    Ok(ResourceContent::Text(format!("user {}", p["id"])))
                })
                .unwrap(),
            )
            .unwrap();
        let registry = Registry::new("root");
        registry.add_tool(echo("ping")).unwrap();
        registry.mount("direct", Arc::clone(&child), Some(false)).unwrap();
        registry.mount("proxied", child, Some(true)).unwrap();

        for i in 0..50 {
            for key in [format!("bogus_{i}"), format!("direct_bogus_{i}")] {
                let result = registry.call_tool(&key, JsonObject::new()).await;
                assert!(result.is_err());
            }
            let result = registry.read_resource(&format!("nothing://{i}")).await;
            assert!(result.is_err());
            for uri in [format!("users://direct/{i}"), format!("users://proxied/{i}")] {
                registry.read_resource(&uri).await.unwrap();
            }
        }
        registry.call_tool("ping", JsonObject::new()).await.unwrap();

        let metrics = registry.metrics();
        let mut keys: Vec<String> = metrics
            .all_latencies()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "Resource:users://direct/{id}",
                "Resource:users://proxied/{id}",
                "Tool:ping",
            ]
        );
        let id = CapabilityId::new(CapabilityKind::Resource, "users://direct/{id}");
        let latency = metrics.latency(&id).unwrap();
        assert_eq!(latency.count, 50);
        assert_eq!(metrics.snapshot().failed_calls, 150);
    }

    #[tokio::test]
    async fn test_mount_routes_by_prefix() {
        let parent = Registry::new("parent");
        let child = Registry::new("child");
        child.add_tool(echo("foo")).unwrap();
        parent.mount("bar", Arc::clone(&child), None).unwrap();

        let out = parent.call_tool("bar_foo", JsonObject::new()).await.unwrap();
        assert_eq!(text(&out), "foo");
        let err = parent.call_tool("foo", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::ToolNotFound(_)));
        let err = parent.call_tool("bar_missing", JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::ToolNotFound(ref k) if k == "bar_missing"));
    }

    #[tokio::test]
    async fn test_local_tool_shadows_mounted() {
        let parent = Registry::new("parent");
        let child = Registry::new("child");
        child.add_tool(echo("foo")).unwrap();
        parent.mount("bar", child, None).unwrap();
        parent
            .add_tool_with_key(echo("local"), "bar_foo")
            .unwrap();

        let out = parent.call_tool("bar_foo", JsonObject::new()).await.unwrap();
        assert_eq!(text(&out), "local");
        let tools = parent.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools["bar_foo"].name, "local");
    }

    #[test]
    fn test_mount_errors() {
        let a = Registry::new("a");
        let b = Registry::new("b");
        a.mount("b", Arc::clone(&b), None).unwrap();

        assert!(matches!(
            a.mount("b", Registry::new("c"), None),
            Err(RegistryError::DuplicateMount(_))
        ));
        assert!(matches!(
            b.mount("a", Arc::clone(&a), None),
            Err(RegistryError::MountCycle(_))
        ));
        assert!(matches!(
            a.mount("self", Arc::clone(&a), None),
            Err(RegistryError::MountCycle(_))
        ));
        assert!(matches!(a.unmount("zzz"), Err(RegistryError::MountNotFound(_))));
        assert!(matches!(
            a.mount("bad prefix", Registry::new("d"), None),
            Err(RegistryError::InvalidPrefix { .. })
        ));
    }

    #[tokio::test]
    async fn test_unmount_drops_parent_link() {
        let parent = Registry::builder("parent")
            .cache_ttl(Duration::from_secs(60))
            .build();
        let child = Registry::new("child");
        parent.mount("c", Arc::clone(&child), None).unwrap();
        parent.unmount("c").unwrap();
        assert!(child.parents.lock().is_empty());

        // Mutations in the former child no longer reach the parent
        let before = parent.metrics().snapshot().cache_invalidations;
        child.add_tool(echo("t")).unwrap();
        assert_eq!(parent.metrics().snapshot().cache_invalidations, before);
    }

    #[tokio::test]
    async fn test_resource_routing_in_both_formats() {
        for (format, uri) in [
            (PrefixFormat::Path, "data://shop/items/42"),
            (PrefixFormat::Protocol, "shop+data://items/42"),
        ] {
            let parent = Registry::builder("parent").prefix_format(format).build();
            let child = Registry::new("child");
            child
                .add_template(
                    ResourceTemplate::from_fn("data://items/{id}", "item", |p| async move {
                        Ok(ResourceContent::Text(format!("item {}", p["id"])))
                    })
                    .unwrap(),
                )
                .unwrap();
            parent.mount("shop", child, None).unwrap();

            let contents = parent.read_resource(uri).await.unwrap();
            assert_eq!(contents[0].as_text(), Some("item 42"), "{format:?}");

            let templates = parent.list_resource_templates().await.unwrap();
            let expected = if format == PrefixFormat::Path {
                "data://shop/items/{id}"
            } else {
                "shop+data://items/{id}"
            };
            assert!(templates.contains_key(expected));
        }
    }

    #[tokio::test]
    async fn test_prompt_routing() {
        use rmcp::model::{PromptMessage, PromptMessageRole};

        let parent = Registry::new("parent");
        let child = Registry::new("child");
        child
            .add_prompt(Prompt::from_fn("hello", |args| async move {
                let who = args.get("who").and_then(|v| v.as_str()).unwrap_or("?").to_string();
                Ok(vec![PromptMessage::new_text(PromptMessageRole::User, who)])
            }))
            .unwrap();
        parent.mount("greet", child, None).unwrap();

        let mut args = JsonObject::new();
        args.insert("who".into(), json!("Ada"));
        let result = parent.render_prompt("greet_hello", args).await.unwrap();
        assert_eq!(result.messages.len(), 1);
        assert!(parent
            .list_prompts()
            .await
            .unwrap()
            .contains_key("greet_hello"));
    }

    #[tokio::test]
    async fn test_get_tool_through_mount() {
        let parent = Registry::new("parent");
        let child = Registry::new("child");
        child.add_tool(echo("foo")).unwrap();
        parent.mount("bar", child, None).unwrap();

        let tool = parent.get_tool("bar_foo").await.unwrap();
        assert_eq!(tool.name, "foo");
        let direct = tool.invoke(JsonObject::new()).await.unwrap();
        let routed = parent.call_tool("bar_foo", JsonObject::new()).await.unwrap();
        assert_eq!(direct, routed);
    }

    #[tokio::test]
    async fn test_lifespan_runs_once() {
        use std::sync::atomic::AtomicUsize;

        struct Counting(Arc<AtomicUsize>, Arc<AtomicUsize>);

        #[async_trait]
        impl Lifespan for Counting {
            async fn startup(&self, _: &Registry) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            async fn shutdown(&self, _: &Registry) -> anyhow::Result<()> {
                self.1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let registry = Registry::builder("svc")
            .lifespan(Counting(Arc::clone(&started), Arc::clone(&stopped)))
            .build();

        registry.startup().await.unwrap();
        registry.startup().await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);

        registry.shutdown().await.unwrap();
        registry.shutdown().await.unwrap();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }
}
