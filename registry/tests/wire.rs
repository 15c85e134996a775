//! A registry served over an rmcp transport and mounted back through a
//! remote session.

mod common;

use std::{sync::Arc, time::Duration};

use common::{add_tool, args, echo_tool, init_test_logging, text};
use mcp_registry::{
    error::ToolError, JsonObject, McpSession, Prompt, PromptArgument, ProxyTarget, Registry,
    RegistryClientHandler, RegistryError, RegistryServer, RemoteSession, Resource,
    ResourceContent, ResourceTemplate, Tool,
};
use rmcp::{
    model::{Content, PromptMessage, PromptMessageRole},
    ServiceExt,
};
use serde_json::json;

fn backend() -> Arc<Registry> {
    let registry = Registry::new("backend");
    registry.add_tool(add_tool()).unwrap();
    registry
        .add_tool(Tool::from_fn("reject", |_| async {
            Err::<Vec<Content>, _>(ToolError("not allowed".into()).into())
        }))
        .unwrap();
    registry
        .add_resource(Resource::from_static("docs://readme", "readme", "read me"))
        .unwrap();
    registry
        .add_resource(
            Resource::from_static("docs://logo", "logo", vec![0x89u8, 0x50, 0x4e, 0x47])
                .with_mime_type("image/png"),
        )
        .unwrap();
    registry
        .add_template(
            ResourceTemplate::from_fn("users://{id}/profile", "profile", |p| async move {
                Ok(ResourceContent::Text(format!("user {}", p["id"])))
            })
            .unwrap(),
        )
        .unwrap();
    registry
        .add_prompt(
            Prompt::from_fn("summarize", |args| async move {
                let topic = args
                    .get("topic")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(vec![PromptMessage::new_text(
                    PromptMessageRole::User,
                    format!("Summarize {topic}"),
                )])
            })
            .with_argument(PromptArgument::required("topic")),
        )
        .unwrap();
    registry
}

/// Serve `registry` on one end of an in-memory pipe and connect a client to
/// the other.
async fn connect(registry: Arc<Registry>, handler: RegistryClientHandler) -> RemoteSession {
    let (server_transport, client_transport) = tokio::io::duplex(4096);
    tokio::spawn(async move {
        let server = RegistryServer::new(registry)
            .serve(server_transport)
            .await?;
        server.waiting().await?;
        anyhow::Ok(())
    });
    let client = handler.serve(client_transport).await.unwrap();
    RemoteSession::from_client("backend", client)
}

async fn mounted_root() -> Arc<Registry> {
    init_test_logging();
    let session = connect(backend(), RegistryClientHandler::new("backend")).await;
    let root = Registry::new("root");
    root.mount_proxy("be", ProxyTarget::Session(Arc::new(session)))
        .await
        .unwrap();
    root
}

#[tokio::test]
async fn test_listings_over_the_wire() {
    let root = mounted_root().await;

    let tools = root.list_tools().await.unwrap();
    assert_eq!(tools.keys().collect::<Vec<_>>(), vec!["be_add", "be_reject"]);
    assert_eq!(
        tools["be_add"].description.as_deref(),
        Some("Add two integers")
    );

    let resources = root.list_resources().await.unwrap();
    assert!(resources.contains_key("docs://be/readme"));
    assert_eq!(
        resources["docs://be/logo"].mime_type.as_deref(),
        Some("image/png")
    );

    let templates = root.list_resource_templates().await.unwrap();
    assert!(templates.contains_key("users://be/{id}/profile"));

    let prompts = root.list_prompts().await.unwrap();
    assert!(prompts["be_summarize"].arguments[0].required);
}

#[tokio::test]
async fn test_calls_over_the_wire() {
    let root = mounted_root().await;

    let out = root
        .call_tool("be_add", args(&[("a", json!(40)), ("b", json!(2))]))
        .await
        .unwrap();
    assert_eq!(text(&out), "42");

    match root.call_tool("be_reject", JsonObject::new()).await {
        Err(RegistryError::Execution(e)) => assert_eq!(e.message(), "not allowed"),
        other => panic!("unexpected {other:?}"),
    }

    let err = root
        .call_tool("be_missing", JsonObject::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ToolNotFound(ref k) if k == "be_missing"));
}

#[tokio::test]
async fn test_resources_over_the_wire() {
    let root = mounted_root().await;

    let contents = root.read_resource("docs://be/readme").await.unwrap();
    assert_eq!(contents[0].as_text(), Some("read me"));

    let contents = root.read_resource("docs://be/logo").await.unwrap();
    assert_eq!(
        contents[0].content,
        ResourceContent::Binary(vec![0x89, 0x50, 0x4e, 0x47])
    );
    assert_eq!(contents[0].mime_type.as_deref(), Some("image/png"));

    let contents = root.read_resource("users://be/7/profile").await.unwrap();
    assert_eq!(contents[0].as_text(), Some("user 7"));

    let err = root.read_resource("docs://be/nothing").await.unwrap_err();
    assert!(matches!(err, RegistryError::ResourceNotFound(ref u) if u == "docs://be/nothing"));
}

#[tokio::test]
async fn test_prompts_over_the_wire() {
    let root = mounted_root().await;

    let result = root
        .render_prompt("be_summarize", args(&[("topic", json!("rust"))]))
        .await
        .unwrap();
    assert_eq!(result.messages.len(), 1);

    let err = root
        .render_prompt("be_summarize", JsonObject::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Execution(ref e) if e.message().contains("topic")));
}

#[tokio::test]
async fn test_list_changed_notification_invalidates_mounts() {
    init_test_logging();
    let backend = backend();
    let (server_transport, client_transport) = tokio::io::duplex(4096);
    let (server, client) = tokio::join!(
        RegistryServer::new(Arc::clone(&backend)).serve(server_transport),
        RegistryClientHandler::new("backend").serve(client_transport),
    );
    let server = server.unwrap();
    let session = RemoteSession::from_client("backend", client.unwrap());

    let root = Registry::builder("root")
        .cache_ttl(Duration::from_secs(300))
        .build();
    root.mount_proxy("be", ProxyTarget::Session(Arc::new(session)))
        .await
        .unwrap();
    assert_eq!(root.list_tools().await.unwrap().len(), 2);

    backend.add_tool(echo_tool("late", "late")).unwrap();
    let before = root.metrics().snapshot().cache_invalidations;
    server.peer().notify_tool_list_changed().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while root.metrics().snapshot().cache_invalidations == before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(root.list_tools().await.unwrap().contains_key("be_late"));
}

#[tokio::test]
async fn test_unmount_stops_change_notifications() {
    init_test_logging();
    let handler = RegistryClientHandler::new("backend");
    let session = connect(backend(), handler.clone()).await;
    let session: Arc<dyn McpSession> = Arc::new(session);

    let root = Registry::new("root");
    root.mount_proxy("a", ProxyTarget::Session(Arc::clone(&session)))
        .await
        .unwrap();
    root.mount_proxy("b", ProxyTarget::Session(session))
        .await
        .unwrap();
    assert_eq!(handler.listener_count(), 2);

    root.unmount("a").unwrap();
    assert_eq!(handler.listener_count(), 1);
    root.unmount("b").unwrap();
    assert_eq!(handler.listener_count(), 0);
}
