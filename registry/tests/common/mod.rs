//! Shared helpers for registry integration tests.

#![allow(dead_code)]

use std::sync::Once;

use mcp_registry::{JsonObject, Tool};
use rmcp::model::Content;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

static INIT: Once = Once::new();

/// Initialize test logging infrastructure
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .try_init();
    });
}

/// A tool that replies with `reply`.
pub fn echo_tool(name: &str, reply: &str) -> Tool {
    let reply = reply.to_string();
    Tool::from_fn(name, move |_| {
        let reply = reply.clone();
        async move { Ok(vec![Content::text(reply)]) }
    })
}

/// Adds the integer arguments `a` and `b`.
pub fn add_tool() -> Tool {
    Tool::from_fn("add", |args: JsonObject| async move {
        let a = args.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
        let b = args.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(vec![Content::text((a + b).to_string())])
    })
    .with_description("Add two integers")
}

pub fn args(pairs: &[(&str, serde_json::Value)]) -> JsonObject {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect::<Vec<_>>()
        .join("\n")
}
