//! Tools and the tool manager.

use std::{borrow::Cow, collections::BTreeSet, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rmcp::model::{Content, Tool as RmcpTool};
use serde_json::json;
use tracing::{debug, warn};

use super::types::{insert_with_policy, ArgumentValidator, JsonObject};
use crate::{
    annotations::ToolAnnotations,
    core::config::DuplicatePolicy,
    error::{CapabilityKind, ExecutionError, RegistryError, RegistryResult},
};

/// Invocation handle of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: JsonObject) -> anyhow::Result<Vec<Content>>;
}

struct FnToolHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(JsonObject) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<Content>>> + Send,
{
    async fn call(&self, arguments: JsonObject) -> anyhow::Result<Vec<Content>> {
        (self.0)(arguments).await
    }
}

pub(crate) fn empty_object_schema() -> Arc<JsonObject> {
    let mut schema = JsonObject::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), json!({}));
    Arc::new(schema)
}

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_schema: Arc<JsonObject>,
    pub output_schema: Option<Arc<JsonObject>>,
    pub annotations: Option<ToolAnnotations>,
    pub tags: BTreeSet<String>,
    handler: Arc<dyn ToolHandler>,
    validator: Option<Arc<dyn ArgumentValidator>>,
}

impl Tool {
    pub fn new(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            input_schema: empty_object_schema(),
            output_schema: None,
            annotations: None,
            tags: BTreeSet::new(),
            handler: Arc::new(handler),
            validator: None,
        }
    }

    /// Build a tool from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JsonObject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<Content>>> + Send + 'static,
    {
        Self::new(name, FnToolHandler(f))
    }

    /// Describe a tool advertised by a remote server.
    pub fn from_rmcp(tool: RmcpTool, handler: impl ToolHandler + 'static) -> Self {
        Self {
            name: tool.name.into_owned(),
            title: tool.title,
            description: tool.description.map(Cow::into_owned),
            input_schema: tool.input_schema,
            output_schema: tool.output_schema,
            annotations: tool.annotations.as_ref().map(ToolAnnotations::from_rmcp),
            tags: BTreeSet::new(),
            handler: Arc::new(handler),
            validator: None,
        }
    }

    /// Wire form of this tool, advertised under `key`.
    pub fn to_rmcp(&self, key: &str) -> RmcpTool {
        RmcpTool {
            name: Cow::Owned(key.to_string()),
            title: self.title.clone(),
            description: self.description.clone().map(Cow::Owned),
            input_schema: Arc::clone(&self.input_schema),
            output_schema: self.output_schema.clone(),
            annotations: self.annotations.as_ref().map(ToolAnnotations::to_rmcp),
            icons: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonObject) -> Self {
        self.input_schema = Arc::new(schema);
        self
    }

    #[must_use]
    pub fn with_output_schema(mut self, schema: JsonObject) -> Self {
        self.output_schema = Some(Arc::new(schema));
        self
    }

    #[must_use]
    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = Some(annotations);
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ArgumentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    /// Run the attached validator, if any.
    pub fn validate_arguments(&self, arguments: JsonObject) -> RegistryResult<JsonObject> {
        match &self.validator {
            Some(validator) => validator
                .validate(&self.input_schema, arguments)
                .map_err(RegistryError::InvalidArguments),
            None => Ok(arguments),
        }
    }

    /// Invoke the handler directly, without validation or error mapping.
    pub async fn invoke(&self, arguments: JsonObject) -> anyhow::Result<Vec<Content>> {
        self.handler.call(arguments).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("tags", &self.tags)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

/// Keyed tool storage for one registry.
pub struct ToolManager {
    tools: RwLock<IndexMap<String, Tool>>,
    on_duplicate: DuplicatePolicy,
    mask_error_details: bool,
}

impl ToolManager {
    pub fn new(on_duplicate: DuplicatePolicy, mask_error_details: bool) -> Self {
        Self {
            tools: RwLock::new(IndexMap::new()),
            on_duplicate,
            mask_error_details,
        }
    }

    /// Register under the tool's own name.
    pub fn add_tool(&self, tool: Tool) -> RegistryResult<Tool> {
        let key = tool.name.clone();
        self.add_tool_with_key(tool, key)
    }

    /// Register under an explicit key, which may differ from `tool.name`.
    pub fn add_tool_with_key(&self, tool: Tool, key: impl Into<String>) -> RegistryResult<Tool> {
        let key = key.into();
        debug!("Registering tool '{}' as '{}'", tool.name, key);
        insert_with_policy(
            &mut self.tools.write(),
            CapabilityKind::Tool,
            key,
            tool,
            self.on_duplicate,
        )
    }

    pub fn get_tool(&self, key: &str) -> RegistryResult<Tool> {
        self.tools
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::ToolNotFound(key.to_string()))
    }

    pub fn has_tool(&self, key: &str) -> bool {
        self.tools.read().contains_key(key)
    }

    /// All tools keyed by registration key, in registration order.
    pub fn tools(&self) -> IndexMap<String, Tool> {
        self.tools.read().clone()
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.read().values().cloned().collect()
    }

    pub fn remove_tool(&self, key: &str) -> RegistryResult<Tool> {
        self.tools
            .write()
            .shift_remove(key)
            .ok_or_else(|| RegistryError::ToolNotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Look up `key` and invoke it. Handler failures become
    /// [`ExecutionError`]s.
    pub async fn call_tool(
        &self,
        key: &str,
        arguments: JsonObject,
    ) -> RegistryResult<Vec<Content>> {
        let tool = self.get_tool(key)?;
        let arguments = tool.validate_arguments(arguments)?;

        tool.invoke(arguments).await.map_err(|e| {
            let err = ExecutionError::from_failure(
                CapabilityKind::Tool,
                key,
                &e,
                self.mask_error_details,
            );
            if err.is_declared() {
                warn!("Tool '{}' reported an error: {}", key, err);
            } else {
                warn!("Error calling tool '{}': {:#}", key, e);
            }
            err.into()
        })
    }
}
