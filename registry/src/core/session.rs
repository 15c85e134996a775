//! Protocol sessions consumed by [`RegistryProxy`](super::proxy::RegistryProxy).
//!
//! A session speaks in wire types. [`InProcessSession`] answers from a local
//! [`Registry`] and gives it an isolated lifespan; [`RemoteSession`] forwards
//! over an rmcp client connection.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, GetPromptRequestParam, GetPromptResult,
        Prompt as RmcpPrompt, ReadResourceRequestParam, ReadResourceResult,
        Resource as RmcpResource, ResourceTemplate as RmcpResourceTemplate, Tool as RmcpTool,
    },
    service::RunningService,
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        ConfigureCommandExt, SseClientTransport, StreamableHttpClientTransport, TokioChildProcess,
    },
    RoleClient, ServiceExt,
};
use tracing::{debug, error, info, warn};

use super::{
    config::{McpServerConfig, McpTransport},
    handler::RegistryClientHandler,
    registry::Registry,
};
use crate::error::{RegistryError, RegistryResult};

/// Client connection to a remote MCP server.
pub type McpClient = RunningService<RoleClient, RegistryClientHandler>;

#[async_trait]
pub trait McpSession: Send + Sync {
    fn name(&self) -> &str;

    async fn list_tools(&self) -> RegistryResult<Vec<RmcpTool>>;

    async fn list_resources(&self) -> RegistryResult<Vec<RmcpResource>>;

    async fn list_resource_templates(&self) -> RegistryResult<Vec<RmcpResourceTemplate>>;

    async fn list_prompts(&self) -> RegistryResult<Vec<RmcpPrompt>>;

    async fn call_tool(&self, params: CallToolRequestParam) -> RegistryResult<CallToolResult>;

    async fn read_resource(
        &self,
        params: ReadResourceRequestParam,
    ) -> RegistryResult<ReadResourceResult>;

    async fn get_prompt(&self, params: GetPromptRequestParam) -> RegistryResult<GetPromptResult>;

    /// The local registry answering this session, if any.
    fn registry(&self) -> Option<Arc<Registry>> {
        None
    }

    /// Ask to have `registry` invalidated when the capabilities behind this
    /// session change.
    fn add_change_listener(&self, _registry: Weak<Registry>) {}

    fn remove_change_listener(&self, _registry: &Weak<Registry>) {}

    async fn close(&self) -> RegistryResult<()>;
}

/// Wire-level results of a registry call. Execution failures become
/// `is_error` results; everything else stays an error.
pub(crate) fn tool_result(result: RegistryResult<Vec<Content>>) -> RegistryResult<CallToolResult> {
    match result {
        Ok(content) => Ok(CallToolResult::success(content)),
        Err(RegistryError::Execution(e)) => {
            Ok(CallToolResult::error(vec![Content::text(e.message())]))
        }
        Err(e) => Err(e),
    }
}

pub(crate) async fn read_result(
    registry: &Registry,
    uri: &str,
) -> RegistryResult<ReadResourceResult> {
    let contents = registry.read_resource(uri).await?;
    Ok(ReadResourceResult {
        contents: contents.into_iter().map(|c| c.into_rmcp(uri)).collect(),
    })
}

pub struct InProcessSession {
    registry: Arc<Registry>,
    /// Whether this session ran the registry's startup. Reset by `close`, so
    /// a later call starts the registry again.
    started: tokio::sync::Mutex<bool>,
}

impl InProcessSession {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            started: tokio::sync::Mutex::new(false),
        }
    }

    async fn ensure_started(&self) -> RegistryResult<()> {
        let mut started = self.started.lock().await;
        if !*started {
            self.registry.startup().await?;
            *started = true;
        }
        Ok(())
    }
}

#[async_trait]
impl McpSession for InProcessSession {
    fn name(&self) -> &str {
        self.registry.name()
    }

    async fn list_tools(&self) -> RegistryResult<Vec<RmcpTool>> {
        self.ensure_started().await?;
        let tools = self.registry.list_tools().await?;
        Ok(tools.iter().map(|(key, tool)| tool.to_rmcp(key)).collect())
    }

    async fn list_resources(&self) -> RegistryResult<Vec<RmcpResource>> {
        self.ensure_started().await?;
        let resources = self.registry.list_resources().await?;
        Ok(resources.iter().map(|(uri, r)| r.to_rmcp(uri)).collect())
    }

    async fn list_resource_templates(&self) -> RegistryResult<Vec<RmcpResourceTemplate>> {
        self.ensure_started().await?;
        let templates = self.registry.list_resource_templates().await?;
        Ok(templates.iter().map(|(key, t)| t.to_rmcp(key)).collect())
    }

    async fn list_prompts(&self) -> RegistryResult<Vec<RmcpPrompt>> {
        self.ensure_started().await?;
        let prompts = self.registry.list_prompts().await?;
        Ok(prompts.iter().map(|(key, p)| p.to_rmcp(key)).collect())
    }

    async fn call_tool(&self, params: CallToolRequestParam) -> RegistryResult<CallToolResult> {
        self.ensure_started().await?;
        let result = self
            .registry
            .call_tool(&params.name, params.arguments.unwrap_or_default())
            .await;
        tool_result(result)
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParam,
    ) -> RegistryResult<ReadResourceResult> {
        self.ensure_started().await?;
        read_result(&self.registry, &params.uri).await
    }

    async fn get_prompt(&self, params: GetPromptRequestParam) -> RegistryResult<GetPromptResult> {
        self.ensure_started().await?;
        self.registry
            .render_prompt(&params.name, params.arguments.unwrap_or_default())
            .await
    }

    fn registry(&self) -> Option<Arc<Registry>> {
        Some(Arc::clone(&self.registry))
    }

    async fn close(&self) -> RegistryResult<()> {
        let mut started = self.started.lock().await;
        if std::mem::take(&mut *started) {
            self.registry.shutdown().await?;
        }
        Ok(())
    }
}

pub struct RemoteSession {
    name: String,
    client: McpClient,
}

impl RemoteSession {
    /// Wrap an already-initialized client.
    pub fn from_client(name: impl Into<String>, client: McpClient) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// Connect to the server described by `config`.
    ///
    /// Remote transports (SSE and streamable HTTP) are retried with
    /// exponential backoff; stdio is attempted once.
    pub async fn connect(config: &McpServerConfig) -> RegistryResult<Self> {
        let client = if config.transport.is_remote() {
            Self::connect_with_retry(config).await?
        } else {
            Self::connect_impl(config).await?
        };
        Ok(Self::from_client(config.name.clone(), client))
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    async fn connect_with_retry(config: &McpServerConfig) -> RegistryResult<McpClient> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(30))
            .with_max_elapsed_time(Some(Duration::from_secs(30)))
            .build();

        backoff::future::retry(backoff, || async {
            match Self::connect_impl(config).await {
                Ok(client) => Ok(client),
                Err(e) => {
                    if is_permanent_error(&e) {
                        error!(
                            "Permanent error connecting to '{}': {} - not retrying",
                            config.name, e
                        );
                        Err(backoff::Error::permanent(e))
                    } else {
                        warn!("Failed to connect to '{}', retrying: {}", config.name, e);
                        Err(backoff::Error::transient(e))
                    }
                }
            }
        })
        .await
    }

    async fn connect_impl(config: &McpServerConfig) -> RegistryResult<McpClient> {
        info!(
            "Connecting to MCP server '{}' via {:?}",
            config.name, config.transport
        );
        let handler = RegistryClientHandler::new(&config.name);

        match &config.transport {
            McpTransport::Stdio {
                command,
                args,
                envs,
            } => {
                let transport = TokioChildProcess::new(
                    tokio::process::Command::new(command).configure(|cmd| {
                        cmd.args(args)
                            .envs(envs.iter())
                            .stderr(std::process::Stdio::inherit());
                    }),
                )
                .map_err(|e| RegistryError::Transport(format!("create stdio transport: {e}")))?;

                let client = handler.serve(transport).await.map_err(|e| {
                    RegistryError::ConnectionFailed(format!("initialize stdio client: {e}"))
                })?;

                info!("Connected to stdio server '{}'", config.name);
                Ok(client)
            }

            McpTransport::Sse {
                url,
                token,
                headers,
            } => {
                let http = build_http_client(token.as_deref(), headers)?;
                let cfg = SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                };

                let transport = SseClientTransport::start_with_client(http, cfg)
                    .await
                    .map_err(|e| RegistryError::ConnectionFailed(format!("open SSE stream: {e}")))?;

                let client = handler.serve(transport).await.map_err(|e| {
                    RegistryError::ConnectionFailed(format!("initialize SSE client: {e}"))
                })?;

                info!("Connected to SSE server '{}' at {}", config.name, url);
                Ok(client)
            }

            McpTransport::Streamable {
                url,
                token,
                headers,
            } => {
                let mut cfg = StreamableHttpClientTransportConfig::with_uri(url.as_str());
                cfg.auth_header = token.clone();
                let transport = if headers.is_empty() {
                    StreamableHttpClientTransport::from_config(cfg)
                } else {
                    StreamableHttpClientTransport::with_client(
                        build_http_client(None, headers)?,
                        cfg,
                    )
                };

                let client = handler.serve(transport).await.map_err(|e| {
                    RegistryError::ConnectionFailed(format!("initialize streamable client: {e}"))
                })?;

                info!(
                    "Connected to streamable HTTP server '{}' at {}",
                    config.name, url
                );
                Ok(client)
            }
        }
    }
}

/// Errors that retrying won't fix.
fn is_permanent_error(error: &RegistryError) -> bool {
    match error {
        RegistryError::Config(_) | RegistryError::Transport(_) => true,
        RegistryError::ConnectionFailed(msg) => {
            msg.contains("initialize")
                || msg.contains("connection closed")
                || msg.contains("connection refused")
                || msg.contains("invalid URL")
                || msg.contains("not found")
        }
        _ => false,
    }
}

fn build_http_client(
    token: Option<&str>,
    headers: &HashMap<String, String>,
) -> RegistryResult<reqwest::Client> {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};

    let mut map = HeaderMap::new();
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| RegistryError::Transport(format!("auth token: {e}")))?;
        map.insert(AUTHORIZATION, value);
    }
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RegistryError::Config(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RegistryError::Config(format!("header value for '{name}': {e}")))?;
        map.insert(name, value);
    }

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .default_headers(map)
        .build()
        .map_err(|e| RegistryError::Transport(format!("build HTTP client: {e}")))
}

#[async_trait]
impl McpSession for RemoteSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> RegistryResult<Vec<RmcpTool>> {
        let tools = self.client.list_all_tools().await?;
        debug!("Discovered {} tools from '{}'", tools.len(), self.name);
        Ok(tools)
    }

    async fn list_resources(&self) -> RegistryResult<Vec<RmcpResource>> {
        let resources = self.client.list_all_resources().await?;
        debug!("Discovered {} resources from '{}'", resources.len(), self.name);
        Ok(resources)
    }

    async fn list_resource_templates(&self) -> RegistryResult<Vec<RmcpResourceTemplate>> {
        Ok(self.client.list_all_resource_templates().await?)
    }

    async fn list_prompts(&self) -> RegistryResult<Vec<RmcpPrompt>> {
        let prompts = self.client.list_all_prompts().await?;
        debug!("Discovered {} prompts from '{}'", prompts.len(), self.name);
        Ok(prompts)
    }

    async fn call_tool(&self, params: CallToolRequestParam) -> RegistryResult<CallToolResult> {
        Ok(self.client.call_tool(params).await?)
    }

    async fn read_resource(
        &self,
        params: ReadResourceRequestParam,
    ) -> RegistryResult<ReadResourceResult> {
        Ok(self.client.read_resource(params).await?)
    }

    async fn get_prompt(&self, params: GetPromptRequestParam) -> RegistryResult<GetPromptResult> {
        Ok(self.client.get_prompt(params).await?)
    }

    fn add_change_listener(&self, registry: Weak<Registry>) {
        self.client.service().add_listener(registry);
    }

    fn remove_change_listener(&self, registry: &Weak<Registry>) {
        self.client.service().remove_listener(registry);
    }

    async fn close(&self) -> RegistryResult<()> {
        info!("Disconnecting from MCP server '{}'", self.name);
        self.client.cancellation_token().cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        core::registry::Lifespan,
        inventory::{JsonObject, Tool},
    };

    #[tokio::test]
    async fn test_in_process_tool_results() {
        let registry = Registry::new("local");
        registry
            .add_tool(Tool::from_fn("ok", |_| async { Ok(vec![Content::text("fine")]) }))
            .unwrap();
        registry
            .add_tool(Tool::from_fn("boom", |_| async {
                Err::<Vec<Content>, _>(anyhow::anyhow!("internal detail"))
            }))
            .unwrap();
        let session = InProcessSession::new(registry);

        let ok = session
            .call_tool(CallToolRequestParam {
                name: "ok".into(),
                arguments: None,
            })
            .await
            .unwrap();
        assert_eq!(ok.is_error, Some(false));

        let failed = session
            .call_tool(CallToolRequestParam {
                name: "boom".into(),
                arguments: Some(JsonObject::new()),
            })
            .await
            .unwrap();
        assert_eq!(failed.is_error, Some(true));
        let text = failed.content[0].as_text().unwrap().text.clone();
        assert_eq!(text, "Error calling tool 'boom'");

        let missing = session
            .call_tool(CallToolRequestParam {
                name: "nope".into(),
                arguments: None,
            })
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_in_process_listing_uses_keys() {
        let parent = Registry::new("parent");
        let child = Registry::new("child");
        child
            .add_tool(Tool::from_fn("t", |_| async { Ok(vec![]) }))
            .unwrap();
        parent.mount("c", child, Some(false)).unwrap();

        let session = InProcessSession::new(parent);
        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "c_t");
        assert!(session.registry().is_some());
    }

    #[derive(Default)]
    struct Counts {
        started: AtomicUsize,
        stopped: AtomicUsize,
    }

    struct Counting(Arc<Counts>);

    #[async_trait]
    impl Lifespan for Counting {
        async fn startup(&self, _registry: &Registry) -> anyhow::Result<()> {
            self.0.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self, _registry: &Registry) -> anyhow::Result<()> {
            self.0.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_in_process_restarts_after_close() {
        let counts = Arc::new(Counts::default());
        let registry = Registry::builder("svc")
            .lifespan(Counting(Arc::clone(&counts)))
            .build();
        let session = InProcessSession::new(registry);

        // Closing a session that never started leaves the lifespan alone
        session.close().await.unwrap();
        assert_eq!(counts.stopped.load(Ordering::SeqCst), 0);

        session.list_tools().await.unwrap();
        session.list_tools().await.unwrap();
        assert_eq!(counts.started.load(Ordering::SeqCst), 1);

        session.close().await.unwrap();
        assert_eq!(counts.stopped.load(Ordering::SeqCst), 1);

        session.list_tools().await.unwrap();
        assert_eq!(counts.started.load(Ordering::SeqCst), 2);
        session.close().await.unwrap();
        assert_eq!(counts.stopped.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_permanent_errors() {
        assert!(is_permanent_error(&RegistryError::Config("bad".into())));
        assert!(is_permanent_error(&RegistryError::ConnectionFailed(
            "initialize SSE client: boom".into()
        )));
        assert!(!is_permanent_error(&RegistryError::ConnectionFailed(
            "timed out".into()
        )));
    }

    #[test]
    fn test_http_client_headers() {
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_string(), "secret".to_string());
        assert!(build_http_client(Some("tok"), &headers).is_ok());

        headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            build_http_client(None, &headers),
            Err(RegistryError::Config(_))
        ));
    }
}
