//! Capability registry and composition engine for Model Context Protocol
//! servers.
//!
//! ## Modules
//!
//! - [`inventory`]: tools, resources, resource templates, prompts and their
//!   managers
//! - [`core`]: the [`Registry`], mounting and importing, proxies over MCP
//!   sessions, configuration and serving
//!
//! ## Composition
//!
//! A registry can `mount` another registry (live: later changes in the child
//! show through) or `import_server` it (a one-time copy). Tools and prompts
//! of a child mounted under `p` are visible as `p_name`; resource URIs get
//! the prefix in the configured [`PrefixFormat`].

pub mod annotations;
pub mod error;

pub mod core;
pub mod inventory;

pub use crate::core::{
    config, CallOptions, CapabilityProvider, DuplicatePolicy, InProcessSession, Lifespan,
    McpServerConfig, McpServersConfig, McpSession, McpTransport, MetricsSnapshot, MountedServer,
    PrefixFormat, ProxyTarget, Registry, RegistryBuilder, RegistryClientHandler, RegistryConfig,
    RegistryMetrics, RegistryProxy, RegistryServer, RemoteSession, TimedCache, UriTemplate,
};

pub use annotations::ToolAnnotations;
pub use error::{
    CapabilityKind, ExecutionError, PromptError, RegistryError, RegistryResult, ResourceError,
    ToolError,
};
pub use inventory::{
    CapabilityBundle, JsonObject, Prompt, PromptArgument, ReadResourceContents, Resource,
    ResourceContent, ResourceTemplate, Tool,
};
