//! Prompts and the prompt manager.

use std::{collections::BTreeSet, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rmcp::model::{
    GetPromptResult, Prompt as RmcpPrompt, PromptArgument as RmcpPromptArgument, PromptMessage,
};
use tracing::{debug, warn};

use super::types::{insert_with_policy, JsonObject};
use crate::{
    core::config::DuplicatePolicy,
    error::{CapabilityKind, ExecutionError, RegistryError, RegistryResult},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptArgument {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
}

impl PromptArgument {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn to_rmcp(&self) -> RmcpPromptArgument {
        RmcpPromptArgument {
            name: self.name.clone(),
            title: None,
            description: self.description.clone(),
            required: Some(self.required),
        }
    }

    fn from_rmcp(arg: RmcpPromptArgument) -> Self {
        Self {
            name: arg.name,
            description: arg.description,
            required: arg.required.unwrap_or(false),
        }
    }
}

#[async_trait]
pub trait PromptRenderer: Send + Sync {
    async fn render(&self, arguments: JsonObject) -> anyhow::Result<Vec<PromptMessage>>;
}

struct FnPromptRenderer<F>(F);

#[async_trait]
impl<F, Fut> PromptRenderer for FnPromptRenderer<F>
where
    F: Fn(JsonObject) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<PromptMessage>>> + Send,
{
    async fn render(&self, arguments: JsonObject) -> anyhow::Result<Vec<PromptMessage>> {
        (self.0)(arguments).await
    }
}

#[derive(Clone)]
pub struct Prompt {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    pub tags: BTreeSet<String>,
    renderer: Arc<dyn PromptRenderer>,
}

impl Prompt {
    pub fn new(name: impl Into<String>, renderer: impl PromptRenderer + 'static) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            arguments: Vec::new(),
            tags: BTreeSet::new(),
            renderer: Arc::new(renderer),
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(JsonObject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<PromptMessage>>> + Send + 'static,
    {
        Self::new(name, FnPromptRenderer(f))
    }

    pub fn from_rmcp(prompt: RmcpPrompt, renderer: impl PromptRenderer + 'static) -> Self {
        Self {
            name: prompt.name,
            title: prompt.title,
            description: prompt.description,
            arguments: prompt
                .arguments
                .unwrap_or_default()
                .into_iter()
                .map(PromptArgument::from_rmcp)
                .collect(),
            tags: BTreeSet::new(),
            renderer: Arc::new(renderer),
        }
    }

    pub fn to_rmcp(&self, key: &str) -> RmcpPrompt {
        let arguments = (!self.arguments.is_empty())
            .then(|| self.arguments.iter().map(PromptArgument::to_rmcp).collect());
        RmcpPrompt {
            name: key.to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            arguments,
            icons: None,
        }
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
    pub fn with_argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
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

    /// Names of required arguments absent from `arguments`.
    pub fn missing_arguments(&self, arguments: &JsonObject) -> Vec<String> {
        self.arguments
            .iter()
            .filter(|a| a.required && !arguments.contains_key(&a.name))
            .map(|a| a.name.clone())
            .collect()
    }

    pub async fn render(&self, arguments: JsonObject) -> anyhow::Result<Vec<PromptMessage>> {
        self.renderer.render(arguments).await
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

pub struct PromptManager {
    prompts: RwLock<IndexMap<String, Prompt>>,
    on_duplicate: DuplicatePolicy,
    mask_error_details: bool,
}

impl PromptManager {
    pub fn new(on_duplicate: DuplicatePolicy, mask_error_details: bool) -> Self {
        Self {
            prompts: RwLock::new(IndexMap::new()),
            on_duplicate,
            mask_error_details,
        }
    }

    pub fn add_prompt(&self, prompt: Prompt) -> RegistryResult<Prompt> {
        let key = prompt.name.clone();
        self.add_prompt_with_key(prompt, key)
    }

    pub fn add_prompt_with_key(
        &self,
        prompt: Prompt,
        key: impl Into<String>,
    ) -> RegistryResult<Prompt> {
        let key = key.into();
        debug!("Registering prompt '{}' as '{}'", prompt.name, key);
        insert_with_policy(
            &mut self.prompts.write(),
            CapabilityKind::Prompt,
            key,
            prompt,
            self.on_duplicate,
        )
    }

    pub fn get_prompt(&self, key: &str) -> RegistryResult<Prompt> {
        self.prompts
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::PromptNotFound(key.to_string()))
    }

    pub fn has_prompt(&self, key: &str) -> bool {
        self.prompts.read().contains_key(key)
    }

    pub fn prompts(&self) -> IndexMap<String, Prompt> {
        self.prompts.read().clone()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.prompts.read().values().cloned().collect()
    }

    pub fn remove_prompt(&self, key: &str) -> RegistryResult<Prompt> {
        self.prompts
            .write()
            .shift_remove(key)
            .ok_or_else(|| RegistryError::PromptNotFound(key.to_string()))
    }

    pub async fn render_prompt(
        &self,
        key: &str,
        arguments: JsonObject,
    ) -> RegistryResult<GetPromptResult> {
        let prompt = self.get_prompt(key)?;

        let missing = prompt.missing_arguments(&arguments);
        if !missing.is_empty() {
            return Err(RegistryError::InvalidArguments(format!(
                "Missing required arguments: {missing:?}"
            )));
        }

        let messages = prompt.render(arguments).await.map_err(|e| {
            let err = ExecutionError::from_failure(
                CapabilityKind::Prompt,
                key,
                &e,
                self.mask_error_details,
            );
            if err.is_declared() {
                warn!("Prompt '{}' reported an error: {}", key, err);
            } else {
                warn!("Error rendering prompt '{}': {:#}", key, e);
            }
            RegistryError::from(err)
        })?;

        Ok(GetPromptResult {
            description: prompt.description.clone(),
            messages,
        })
    }
}
