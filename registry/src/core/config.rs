//! Registry configuration types.
//!
//! Covers per-registry behavior (duplicate handling, resource prefix format,
//! listing cache, error masking, proxy timeouts) and the description of
//! remote MCP servers reached through proxies.

use std::{collections::HashMap, fmt, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RegistryError, RegistryResult};

/// What to do when a key is registered twice in the same manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first entry and log a warning.
    #[default]
    Warn,
    /// Reject the second registration.
    Error,
    /// Overwrite the stored entry, keeping the registration key.
    Replace,
    /// Keep the first entry silently.
    Ignore,
}

/// Textual form used to prefix resource URIs of composed servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixFormat {
    /// `scheme://path` becomes `scheme://{prefix}/path`.
    #[default]
    Path,
    /// `scheme://path` becomes `{prefix}+scheme://path`.
    Protocol,
}

impl std::str::FromStr for PrefixFormat {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "path" => Ok(PrefixFormat::Path),
            "protocol" => Ok(PrefixFormat::Protocol),
            other => Err(RegistryError::Config(format!(
                "unknown resource prefix format '{other}', expected 'path' or 'protocol'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Optional instructions advertised to clients on initialize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    #[serde(default)]
    pub on_duplicate_tools: DuplicatePolicy,

    #[serde(default)]
    pub on_duplicate_resources: DuplicatePolicy,

    #[serde(default)]
    pub on_duplicate_prompts: DuplicatePolicy,

    #[serde(default)]
    pub resource_prefix_format: PrefixFormat,

    /// TTL of aggregated listings (milliseconds). 0 disables memoization.
    #[serde(default)]
    pub cache_ttl_ms: u64,

    /// Replace the message of undeclared handler failures with a generic notice.
    #[serde(default = "default_true")]
    pub mask_error_details: bool,

    /// Default bound for calls forwarded through a proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_timeout_ms: Option<u64>,
}

fn default_name() -> String {
    "mcp-registry".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            instructions: None,
            on_duplicate_tools: DuplicatePolicy::default(),
            on_duplicate_resources: DuplicatePolicy::default(),
            on_duplicate_prompts: DuplicatePolicy::default(),
            resource_prefix_format: PrefixFormat::default(),
            cache_ttl_ms: 0,
            mask_error_details: true,
            proxy_timeout_ms: None,
        }
    }
}

impl RegistryConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a YAML file
    pub async fn from_file(path: &str) -> RegistryResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> RegistryResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| RegistryError::Config(format!("invalid registry config: {e}")))
    }

    /// Apply `MCP_REGISTRY_*` environment overrides.
    ///
    /// Unparseable values are logged and ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(ttl) = std::env::var("MCP_REGISTRY_CACHE_TTL_MS") {
            match ttl.parse() {
                Ok(ms) => self.cache_ttl_ms = ms,
                Err(e) => warn!("Ignoring MCP_REGISTRY_CACHE_TTL_MS={}: {}", ttl, e),
            }
        }
        if let Ok(mask) = std::env::var("MCP_REGISTRY_MASK_ERROR_DETAILS") {
            match mask.parse() {
                Ok(v) => self.mask_error_details = v,
                Err(e) => warn!("Ignoring MCP_REGISTRY_MASK_ERROR_DETAILS={}: {}", mask, e),
            }
        }
        if let Ok(format) = std::env::var("MCP_REGISTRY_RESOURCE_PREFIX_FORMAT") {
            match format.parse() {
                Ok(v) => self.resource_prefix_format = v,
                Err(e) => warn!("Ignoring MCP_REGISTRY_RESOURCE_PREFIX_FORMAT: {}", e),
            }
        }
        if let Ok(timeout) = std::env::var("MCP_REGISTRY_PROXY_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.proxy_timeout_ms = Some(ms),
                Err(e) => warn!("Ignoring MCP_REGISTRY_PROXY_TIMEOUT_MS={}: {}", timeout, e),
            }
        }
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn proxy_timeout(&self) -> Option<Duration> {
        self.proxy_timeout_ms.map(Duration::from_millis)
    }
}

/// A remote MCP server reached through a proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransport,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        envs: HashMap<String, String>,
    },
    Sse {
        url: String,
        /// Bearer token for Authorization header
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
    Streamable {
        url: String,
        /// Bearer token for Authorization header
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        headers: HashMap<String, String>,
    },
}

impl McpTransport {
    /// Pick a transport for a bare URL.
    ///
    /// Paths ending in `/sse` (or containing an `/sse/` segment) use SSE,
    /// every other http(s) URL uses streamable HTTP.
    pub fn from_url(raw: &str) -> RegistryResult<Self> {
        let parsed = url::Url::parse(raw)
            .map_err(|e| RegistryError::Config(format!("invalid server URL '{raw}': {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RegistryError::Config(format!(
                    "unsupported URL scheme '{other}' in '{raw}'"
                )))
            }
        }
        let path = parsed.path().trim_end_matches('/');
        let url = raw.to_string();
        if path.ends_with("/sse") || parsed.path().contains("/sse/") {
            Ok(McpTransport::Sse {
                url,
                token: None,
                headers: HashMap::new(),
            })
        } else {
            Ok(McpTransport::Streamable {
                url,
                token: None,
                headers: HashMap::new(),
            })
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, McpTransport::Stdio { .. })
    }
}

impl fmt::Debug for McpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpTransport::Stdio {
                command,
                args,
                envs,
            } => f
                .debug_struct("Stdio")
                .field("command", command)
                .field("args", args)
                .field("envs", &format!("{} vars", envs.len()))
                .finish(),
            McpTransport::Sse {
                url,
                token,
                headers,
            } => f
                .debug_struct("Sse")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .field("headers", &format!("{} headers", headers.len()))
                .finish(),
            McpTransport::Streamable {
                url,
                token,
                headers,
            } => f
                .debug_struct("Streamable")
                .field("url", url)
                .field("token", &token.as_ref().map(|_| "****"))
                .field("headers", &format!("{} headers", headers.len()))
                .finish(),
        }
    }
}

/// An `mcpServers` document: server name to transport, in declaration order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpServersConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: IndexMap<String, McpTransport>,
}

impl McpServersConfig {
    /// Load from a YAML (or JSON) file.
    pub async fn from_file(path: &str) -> RegistryResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_yaml::from_str(&content)
            .map_err(|e| RegistryError::Config(format!("invalid mcpServers document: {e}")))
    }

    pub fn servers(&self) -> impl Iterator<Item = McpServerConfig> + '_ {
        self.mcp_servers
            .iter()
            .map(|(name, transport)| McpServerConfig {
                name: name.clone(),
                transport: transport.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.mcp_servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mcp_servers.is_empty()
    }
}
