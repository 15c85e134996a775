//! Proxy adapter: a [`CapabilityProvider`] that forwards every operation over
//! an [`McpSession`].
//!
//! Names cross the proxy unprefixed; the registry the proxy is mounted into
//! adds the visible prefix. Nothing is cached here, so every call is a round
//! trip.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use indexmap::IndexMap;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam,
        GetPromptResult, PromptMessage, ReadResourceRequestParam,
    },
    ServiceError,
};
use tracing::{debug, info, warn};

use super::{
    config::{McpServerConfig, McpServersConfig, McpTransport},
    provider::{CallOptions, CapabilityProvider},
    registry::Registry,
    session::{InProcessSession, McpSession, RemoteSession},
    uri_template::UriTemplate,
};
use crate::{
    error::{
        is_not_found_data, CapabilityKind, ExecutionError, RegistryError, RegistryResult,
        ToolError,
    },
    inventory::{
        JsonObject, Prompt, PromptRenderer, ReadResourceContents, Resource, ResourceFactory,
        ResourceReader, ResourceTemplate, Tool, ToolHandler,
    },
};

/// Something a proxy can be built over.
pub enum ProxyTarget {
    /// An in-process registry, reached through an [`InProcessSession`].
    Registry(Arc<Registry>),
    /// An existing session, used as-is.
    Session(Arc<dyn McpSession>),
    /// A single remote server.
    Server(McpServerConfig),
    /// An `mcpServers` document. Several servers are combined into one
    /// registry with each server mounted under its name.
    Config(McpServersConfig),
    /// A bare http(s) URL; the transport is picked from the path.
    Url(String),
}

impl From<Arc<Registry>> for ProxyTarget {
    fn from(registry: Arc<Registry>) -> Self {
        ProxyTarget::Registry(registry)
    }
}

impl From<McpServersConfig> for ProxyTarget {
    fn from(config: McpServersConfig) -> Self {
        ProxyTarget::Config(config)
    }
}

/// Resolve a [`ProxyTarget`] to a session.
pub async fn infer_transport(target: ProxyTarget) -> RegistryResult<Arc<dyn McpSession>> {
    match target {
        ProxyTarget::Registry(registry) => Ok(Arc::new(InProcessSession::new(registry))),
        ProxyTarget::Session(session) => Ok(session),
        ProxyTarget::Server(config) => Ok(Arc::new(RemoteSession::connect(&config).await?)),
        ProxyTarget::Url(url) => {
            let config = McpServerConfig {
                name: url.clone(),
                transport: McpTransport::from_url(&url)?,
            };
            Ok(Arc::new(RemoteSession::connect(&config).await?))
        }
        ProxyTarget::Config(config) => {
            let mut servers: Vec<McpServerConfig> = config.servers().collect();
            match servers.len() {
                0 => Err(RegistryError::Config(
                    "mcpServers must name at least one server".to_string(),
                )),
                1 => {
                    let server = servers.remove(0);
                    Ok(Arc::new(RemoteSession::connect(&server).await?))
                }
                _ => {
                    let composite = Registry::new("composite");
                    for server in servers {
                        let session = Arc::new(RemoteSession::connect(&server).await?);
                        let proxy = RegistryProxy::new(session, None);
                        composite.attach(&server.name, Arc::new(proxy), true)?;
                    }
                    info!(
                        "Combined {} servers into a composite registry",
                        composite.mounts().len()
                    );
                    Ok(Arc::new(InProcessSession::new(composite)))
                }
            }
        }
    }
}

async fn bounded<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = RegistryResult<T>>,
) -> RegistryResult<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RegistryError::Timeout(limit))?,
        None => fut.await,
    }
}

/// Message of an error coming back over a session, without transport noise.
fn remote_message(err: &RegistryError) -> String {
    if let RegistryError::Service(service) = err {
        if let ServiceError::McpError(data) = service.as_ref() {
            return data.message.to_string();
        }
    }
    err.to_string()
}

/// Re-wrap a forwarded failure at the mounting boundary. Timeouts and
/// not-found results keep their identity.
fn forwarded(err: RegistryError, kind: CapabilityKind, key: &str) -> RegistryError {
    if let RegistryError::Service(service) = &err {
        if let ServiceError::McpError(data) = service.as_ref() {
            if is_not_found_data(data) {
                return RegistryError::not_found(kind, key);
            }
        }
    }
    match err {
        RegistryError::Timeout(_) | RegistryError::Execution(_) => err,
        err if err.is_not_found() => err,
        other => ExecutionError::declared(kind, key, remote_message(&other)).into(),
    }
}

fn error_text(result: &CallToolResult) -> String {
    let text: Vec<&str> = result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
        .collect();
    if text.is_empty() {
        "Tool call failed".to_string()
    } else {
        text.join("\n")
    }
}

struct ProxyToolHandler {
    session: Arc<dyn McpSession>,
    name: String,
    timeout: Option<Duration>,
}

#[async_trait]
impl ToolHandler for ProxyToolHandler {
    async fn call(&self, arguments: JsonObject) -> anyhow::Result<Vec<Content>> {
        let params = CallToolRequestParam {
            name: self.name.clone().into(),
            arguments: Some(arguments),
        };
        let result = bounded(self.timeout, self.session.call_tool(params)).await?;
        if result.is_error == Some(true) {
            return Err(ToolError(error_text(&result)).into());
        }
        Ok(result.content)
    }
}

struct ProxyResourceReader {
    session: Arc<dyn McpSession>,
    uri: String,
    timeout: Option<Duration>,
}

#[async_trait]
impl ResourceReader for ProxyResourceReader {
    async fn read(&self) -> anyhow::Result<Vec<ReadResourceContents>> {
        let params = ReadResourceRequestParam {
            uri: self.uri.clone(),
        };
        let result = bounded(self.timeout, self.session.read_resource(params)).await?;
        let contents = result
            .contents
            .into_iter()
            .map(ReadResourceContents::from_rmcp)
            .collect::<RegistryResult<Vec<_>>>()?;
        Ok(contents)
    }
}

/// Rebuilds the remote URI from the extracted parameters, so the locally
/// visible template may carry a prefix the remote side never sees.
struct ProxyTemplateFactory {
    session: Arc<dyn McpSession>,
    remote: UriTemplate,
    name: String,
    timeout: Option<Duration>,
}

#[async_trait]
impl ResourceFactory for ProxyTemplateFactory {
    async fn create(&self, uri: &str, params: HashMap<String, String>) -> anyhow::Result<Resource> {
        let remote_uri = self.remote.expand(&params)?;
        Ok(Resource::new(
            uri,
            self.name.clone(),
            ProxyResourceReader {
                session: Arc::clone(&self.session),
                uri: remote_uri,
                timeout: self.timeout,
            },
        ))
    }
}

struct ProxyPromptRenderer {
    session: Arc<dyn McpSession>,
    name: String,
    timeout: Option<Duration>,
}

#[async_trait]
impl PromptRenderer for ProxyPromptRenderer {
    async fn render(&self, arguments: JsonObject) -> anyhow::Result<Vec<PromptMessage>> {
        let params = GetPromptRequestParam {
            name: self.name.clone(),
            arguments: Some(arguments),
        };
        let result = bounded(self.timeout, self.session.get_prompt(params)).await?;
        Ok(result.messages)
    }
}

pub struct RegistryProxy {
    session: Arc<dyn McpSession>,
    default_timeout: Option<Duration>,
}

impl RegistryProxy {
    pub fn new(session: Arc<dyn McpSession>, default_timeout: Option<Duration>) -> Self {
        Self {
            session,
            default_timeout,
        }
    }

    /// Build a proxy over whatever `target` resolves to.
    pub async fn connect(
        target: ProxyTarget,
        default_timeout: Option<Duration>,
    ) -> RegistryResult<Self> {
        Ok(Self::new(infer_transport(target).await?, default_timeout))
    }

    pub fn session(&self) -> &Arc<dyn McpSession> {
        &self.session
    }

    fn timeout(&self, options: &CallOptions) -> Option<Duration> {
        options.timeout.or(self.default_timeout)
    }

    fn log_timeout(&self, err: &RegistryError, kind: CapabilityKind, key: &str) {
        if let RegistryError::Timeout(limit) = err {
            warn!(
                "{} '{}' on '{}' timed out after {:?}",
                kind,
                key,
                self.session.name(),
                limit
            );
        }
    }
}

#[async_trait]
impl CapabilityProvider for RegistryProxy {
    fn name(&self) -> &str {
        self.session.name()
    }

    async fn list_tools(&self) -> RegistryResult<IndexMap<String, Tool>> {
        let tools = bounded(self.default_timeout, self.session.list_tools()).await?;
        Ok(tools
            .into_iter()
            .map(|tool| {
                let name = tool.name.to_string();
                let handler = ProxyToolHandler {
                    session: Arc::clone(&self.session),
                    name: name.clone(),
                    timeout: self.default_timeout,
                };
                (name, Tool::from_rmcp(tool, handler))
            })
            .collect())
    }

    async fn list_resources(&self) -> RegistryResult<IndexMap<String, Resource>> {
        let resources = bounded(self.default_timeout, self.session.list_resources()).await?;
        Ok(resources
            .into_iter()
            .map(|resource| {
                let uri = resource.raw.uri.clone();
                let reader = ProxyResourceReader {
                    session: Arc::clone(&self.session),
                    uri: uri.clone(),
                    timeout: self.default_timeout,
                };
                (uri, Resource::from_rmcp(resource, reader))
            })
            .collect())
    }

    async fn list_resource_templates(&self) -> RegistryResult<IndexMap<String, ResourceTemplate>> {
        let templates =
            bounded(self.default_timeout, self.session.list_resource_templates()).await?;

        let mut out = IndexMap::with_capacity(templates.len());
        for template in templates {
            let key = template.raw.uri_template.clone();
            let remote = match UriTemplate::compile(&key) {
                Ok(remote) => remote,
                Err(e) => {
                    warn!("Skipping resource template from '{}': {}", self.name(), e);
                    continue;
                }
            };
            let factory = ProxyTemplateFactory {
                session: Arc::clone(&self.session),
                remote,
                name: template.raw.name.clone(),
                timeout: self.default_timeout,
            };
            out.insert(key, ResourceTemplate::from_rmcp(template, factory)?);
        }
        Ok(out)
    }

    async fn list_prompts(&self) -> RegistryResult<IndexMap<String, Prompt>> {
        let prompts = bounded(self.default_timeout, self.session.list_prompts()).await?;
        Ok(prompts
            .into_iter()
            .map(|prompt| {
                let name = prompt.name.clone();
                let renderer = ProxyPromptRenderer {
                    session: Arc::clone(&self.session),
                    name: name.clone(),
                    timeout: self.default_timeout,
                };
                (name, Prompt::from_rmcp(prompt, renderer))
            })
            .collect())
    }

    async fn call_tool(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<Vec<Content>> {
        debug!("Forwarding tool '{}' to '{}'", key, self.session.name());
        let params = CallToolRequestParam {
            name: key.to_string().into(),
            arguments: Some(arguments),
        };
        let result = bounded(self.timeout(options), self.session.call_tool(params))
            .await
            .map_err(|e| {
                self.log_timeout(&e, CapabilityKind::Tool, key);
                forwarded(e, CapabilityKind::Tool, key)
            })?;

        if result.is_error == Some(true) {
            return Err(
                ExecutionError::declared(CapabilityKind::Tool, key, error_text(&result)).into(),
            );
        }
        Ok(result.content)
    }

    async fn read_resource(
        &self,
        uri: &str,
        options: &CallOptions,
    ) -> RegistryResult<Vec<ReadResourceContents>> {
        debug!("Forwarding resource '{}' to '{}'", uri, self.session.name());
        let params = ReadResourceRequestParam {
            uri: uri.to_string(),
        };
        let result = bounded(self.timeout(options), self.session.read_resource(params))
            .await
            .map_err(|e| {
                self.log_timeout(&e, CapabilityKind::Resource, uri);
                forwarded(e, CapabilityKind::Resource, uri)
            })?;

        result
            .contents
            .into_iter()
            .map(ReadResourceContents::from_rmcp)
            .collect()
    }

    async fn render_prompt(
        &self,
        key: &str,
        arguments: JsonObject,
        options: &CallOptions,
    ) -> RegistryResult<GetPromptResult> {
        debug!("Forwarding prompt '{}' to '{}'", key, self.session.name());
        let params = GetPromptRequestParam {
            name: key.to_string(),
            arguments: Some(arguments),
        };
        bounded(self.timeout(options), self.session.get_prompt(params))
            .await
            .map_err(|e| {
                self.log_timeout(&e, CapabilityKind::Prompt, key);
                forwarded(e, CapabilityKind::Prompt, key)
            })
    }

    fn inner_registry(&self) -> Option<Arc<Registry>> {
        self.session.registry()
    }

    fn watch_changes(&self, parent: Weak<Registry>) {
        self.session.add_change_listener(parent);
    }

    fn unwatch_changes(&self, parent: &Weak<Registry>) {
        self.session.remove_change_listener(parent);
    }

    async fn close(&self) -> RegistryResult<()> {
        self.session.close().await
    }
}
