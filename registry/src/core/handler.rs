//! Client-side handler for sessions to remote MCP servers.
//!
//! Implements RMCP's `ClientHandler` so that list-change notifications from
//! a remote server flush the listing caches of every registry the server is
//! mounted into, and server log messages land in `tracing`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rmcp::{
    model::{
        ClientInfo, LoggingLevel, LoggingMessageNotificationParam, ResourceUpdatedNotificationParam,
    },
    service::NotificationContext,
    ClientHandler, RoleClient,
};
use tracing::{debug, error, info, warn};

use super::registry::Registry;

#[derive(Clone)]
pub struct RegistryClientHandler {
    server_name: Arc<str>,
    client_info: ClientInfo,
    listeners: Arc<Mutex<Vec<Weak<Registry>>>>,
}

impl RegistryClientHandler {
    pub fn new(server_name: impl AsRef<str>) -> Self {
        let mut client_info = ClientInfo::default();
        client_info.client_info.name = "mcp-registry".to_string();
        client_info.client_info.version = env!("CARGO_PKG_VERSION").to_string();

        Self {
            server_name: Arc::from(server_name.as_ref()),
            client_info,
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn with_client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Invalidate `registry` whenever the remote capability lists change.
    /// One entry is kept per call, so a registry that mounts the same
    /// session twice stays registered until both mounts are gone.
    pub fn add_listener(&self, registry: Weak<Registry>) {
        self.listeners.lock().push(registry);
    }

    /// Undo one `add_listener` for `registry`.
    pub fn remove_listener(&self, registry: &Weak<Registry>) {
        let mut listeners = self.listeners.lock();
        if let Some(pos) = listeners.iter().position(|l| Weak::ptr_eq(l, registry)) {
            listeners.remove(pos);
        }
    }

    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.len()
    }

    fn notify_changed(&self) {
        let registries: Vec<Arc<Registry>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            let mut registries: Vec<Arc<Registry>> = Vec::with_capacity(listeners.len());
            for registry in listeners.iter().filter_map(Weak::upgrade) {
                if !registries.iter().any(|r| Arc::ptr_eq(r, &registry)) {
                    registries.push(registry);
                }
            }
            registries
        };
        for registry in registries {
            registry.invalidate();
        }
    }
}

impl ClientHandler for RegistryClientHandler {
    async fn on_resource_updated(
        &self,
        params: ResourceUpdatedNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        info!(
            server = %self.server_name,
            uri = %params.uri,
            "MCP server resource updated"
        );
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(server = %self.server_name, "MCP server resource list changed");
        self.notify_changed();
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(server = %self.server_name, "MCP server tool list changed");
        self.notify_changed();
    }

    async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(server = %self.server_name, "MCP server prompt list changed");
        self.notify_changed();
    }

    fn get_info(&self) -> ClientInfo {
        self.client_info.clone()
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let logger = params.logger.as_deref().unwrap_or("mcp");

        match params.level {
            LoggingLevel::Emergency
            | LoggingLevel::Alert
            | LoggingLevel::Critical
            | LoggingLevel::Error => {
                error!(server = %self.server_name, logger = %logger, "MCP: {}", params.data);
            }
            LoggingLevel::Warning => {
                warn!(server = %self.server_name, logger = %logger, "MCP: {}", params.data);
            }
            LoggingLevel::Notice | LoggingLevel::Info => {
                info!(server = %self.server_name, logger = %logger, "MCP: {}", params.data);
            }
            LoggingLevel::Debug => {
                debug!(server = %self.server_name, logger = %logger, "MCP: {}", params.data);
            }
        }
    }
}
