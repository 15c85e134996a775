//! Registry core: configuration, composition, sessions and serving.

pub mod cache;
pub mod config;
pub mod handler;
pub mod metrics;
pub mod prefix;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod session;
pub mod uri_template;

pub use cache::TimedCache;
pub use config::{
    DuplicatePolicy, McpServerConfig, McpServersConfig, McpTransport, PrefixFormat,
    RegistryConfig,
};
pub use handler::RegistryClientHandler;
pub use metrics::{CapabilityId, LatencySnapshot, MetricsSnapshot, RegistryMetrics};
pub use provider::{CallOptions, CapabilityProvider};
pub use proxy::{infer_transport, ProxyTarget, RegistryProxy};
pub use registry::{Lifespan, MountedServer, Registry, RegistryBuilder};
pub use server::RegistryServer;
pub use session::{InProcessSession, McpClient, McpSession, RemoteSession};
pub use uri_template::UriTemplate;
