//! Serves a registry (or any [`CapabilityProvider`]) to MCP clients.

use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
        Implementation, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
        ListToolsResult, PaginatedRequestParam, ReadResourceRequestParam, ReadResourceResult,
        ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    ErrorData, RoleServer, ServerHandler,
};
use tracing::debug;

use super::{
    provider::{CallOptions, CapabilityProvider},
    registry::Registry,
    session::tool_result,
};
use crate::error::RegistryError;

pub struct RegistryServer {
    provider: Arc<dyn CapabilityProvider>,
    info: ServerInfo,
}

impl RegistryServer {
    /// Advertise `registry` under its configured name and instructions.
    pub fn new(registry: Arc<Registry>) -> Self {
        let config = registry.config();
        let info = server_info(&config.name, config.instructions.clone());
        Self {
            provider: registry,
            info,
        }
    }

    pub fn from_provider(provider: Arc<dyn CapabilityProvider>) -> Self {
        let info = server_info(provider.name(), None);
        Self { provider, info }
    }

    pub fn provider(&self) -> &Arc<dyn CapabilityProvider> {
        &self.provider
    }
}

fn server_info(name: &str, instructions: Option<String>) -> ServerInfo {
    ServerInfo {
        capabilities: ServerCapabilities::builder()
            .enable_tools()
            .enable_resources()
            .enable_prompts()
            .build(),
        server_info: Implementation {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        },
        instructions,
        ..Default::default()
    }
}

fn wire_error(err: RegistryError) -> ErrorData {
    debug!("Request failed: {}", err);
    err.to_error_data()
}

impl ServerHandler for RegistryServer {
    fn get_info(&self) -> ServerInfo {
        self.info.clone()
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = self.provider.list_tools().await.map_err(wire_error)?;
        Ok(ListToolsResult::with_all_items(
            tools.iter().map(|(key, tool)| tool.to_rmcp(key)).collect(),
        ))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = self
            .provider
            .call_tool(
                &request.name,
                request.arguments.unwrap_or_default(),
                &CallOptions::default(),
            )
            .await;
        tool_result(result).map_err(wire_error)
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let resources = self.provider.list_resources().await.map_err(wire_error)?;
        Ok(ListResourcesResult::with_all_items(
            resources.iter().map(|(uri, r)| r.to_rmcp(uri)).collect(),
        ))
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, ErrorData> {
        let templates = self
            .provider
            .list_resource_templates()
            .await
            .map_err(wire_error)?;
        Ok(ListResourceTemplatesResult::with_all_items(
            templates.iter().map(|(key, t)| t.to_rmcp(key)).collect(),
        ))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let contents = self
            .provider
            .read_resource(&request.uri, &CallOptions::default())
            .await
            .map_err(wire_error)?;
        Ok(ReadResourceResult {
            contents: contents
                .into_iter()
                .map(|c| c.into_rmcp(&request.uri))
                .collect(),
        })
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        let prompts = self.provider.list_prompts().await.map_err(wire_error)?;
        Ok(ListPromptsResult::with_all_items(
            prompts.iter().map(|(key, p)| p.to_rmcp(key)).collect(),
        ))
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        self.provider
            .render_prompt(
                &request.name,
                request.arguments.unwrap_or_default(),
                &CallOptions::default(),
            )
            .await
            .map_err(wire_error)
    }
}
