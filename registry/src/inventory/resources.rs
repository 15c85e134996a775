//! Concrete resources, resource templates and the resource manager.
//!
//! Concrete resources are keyed by URI. Templates are keyed by their URI
//! template string and compiled once at registration. A read checks the
//! concrete map first, then each template in registration order; the first
//! template that matches creates the resource.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    future::Future,
    sync::Arc,
};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rmcp::model::{
    AnnotateAble, RawResource, RawResourceTemplate, Resource as RmcpResource,
    ResourceContents, ResourceTemplate as RmcpResourceTemplate,
};
use serde_json::json;
use tracing::{debug, warn};

use super::types::{insert_with_policy, JsonObject};
use crate::{
    core::{config::DuplicatePolicy, uri_template::UriTemplate},
    error::{CapabilityKind, ExecutionError, RegistryError, RegistryResult},
};

pub const DEFAULT_TEXT_MIME: &str = "text/plain";
pub const DEFAULT_BINARY_MIME: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceContent {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for ResourceContent {
    fn from(s: String) -> Self {
        ResourceContent::Text(s)
    }
}

impl From<&str> for ResourceContent {
    fn from(s: &str) -> Self {
        ResourceContent::Text(s.to_string())
    }
}

impl From<Vec<u8>> for ResourceContent {
    fn from(bytes: Vec<u8>) -> Self {
        ResourceContent::Binary(bytes)
    }
}

/// One piece of content returned by a resource read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResourceContents {
    pub content: ResourceContent,
    pub mime_type: Option<String>,
}

impl ReadResourceContents {
    pub fn text(text: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            content: ResourceContent::Text(text.into()),
            mime_type,
        }
    }

    pub fn binary(bytes: Vec<u8>, mime_type: Option<String>) -> Self {
        Self {
            content: ResourceContent::Binary(bytes),
            mime_type,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            ResourceContent::Text(s) => Some(s),
            ResourceContent::Binary(_) => None,
        }
    }

    /// Wire form, with binary content base64-encoded.
    pub fn into_rmcp(self, uri: &str) -> ResourceContents {
        match self.content {
            ResourceContent::Text(text) => ResourceContents::TextResourceContents {
                uri: uri.to_string(),
                mime_type: self.mime_type,
                text,
                meta: None,
            },
            ResourceContent::Binary(bytes) => ResourceContents::BlobResourceContents {
                uri: uri.to_string(),
                mime_type: self.mime_type,
                blob: STANDARD.encode(bytes),
                meta: None,
            },
        }
    }

    pub fn from_rmcp(contents: ResourceContents) -> RegistryResult<Self> {
        match contents {
            ResourceContents::TextResourceContents {
                text, mime_type, ..
            } => Ok(Self::text(text, mime_type)),
            ResourceContents::BlobResourceContents {
                uri,
                blob,
                mime_type,
                ..
            } => {
                let bytes = STANDARD.decode(blob.as_bytes()).map_err(|e| {
                    RegistryError::Transport(format!("invalid base64 blob for '{uri}': {e}"))
                })?;
                Ok(Self::binary(bytes, mime_type))
            }
        }
    }
}

/// Produces the contents of a concrete resource.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn read(&self) -> anyhow::Result<Vec<ReadResourceContents>>;
}

struct FnResourceReader<F>(F);

#[async_trait]
impl<F, Fut> ResourceReader for FnResourceReader<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ResourceContent>> + Send,
{
    async fn read(&self) -> anyhow::Result<Vec<ReadResourceContents>> {
        let content = (self.0)().await?;
        Ok(vec![ReadResourceContents {
            content,
            mime_type: None,
        }])
    }
}

struct StaticReader(ResourceContent);

#[async_trait]
impl ResourceReader for StaticReader {
    async fn read(&self) -> anyhow::Result<Vec<ReadResourceContents>> {
        Ok(vec![ReadResourceContents {
            content: self.0.clone(),
            mime_type: None,
        }])
    }
}

#[derive(Clone)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub tags: BTreeSet<String>,
    reader: Arc<dyn ResourceReader>,
}

impl Resource {
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        reader: impl ResourceReader + 'static,
    ) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            title: None,
            description: None,
            mime_type: None,
            tags: BTreeSet::new(),
            reader: Arc::new(reader),
        }
    }

    /// A resource whose contents never change.
    pub fn from_static(
        uri: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<ResourceContent>,
    ) -> Self {
        Self::new(uri, name, StaticReader(content.into()))
    }

    /// Build a resource from an async closure.
    pub fn from_fn<F, Fut>(uri: impl Into<String>, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ResourceContent>> + Send + 'static,
    {
        Self::new(uri, name, FnResourceReader(f))
    }

    pub fn from_rmcp(resource: RmcpResource, reader: impl ResourceReader + 'static) -> Self {
        let raw = resource.raw;
        Self {
            uri: raw.uri,
            name: raw.name,
            title: raw.title,
            description: raw.description,
            mime_type: raw.mime_type,
            tags: BTreeSet::new(),
            reader: Arc::new(reader),
        }
    }

    pub fn to_rmcp(&self, key: &str) -> RmcpResource {
        RawResource {
            uri: key.to_string(),
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            size: None,
            icons: None,
        }
        .no_annotation()
    }

    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
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
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
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

    /// Read the contents, filling in the resource's MIME type where the
    /// reader left it unset.
    pub async fn read(&self) -> anyhow::Result<Vec<ReadResourceContents>> {
        let mut contents = self.reader.read().await?;
        for item in &mut contents {
            if item.mime_type.is_none() {
                item.mime_type = Some(self.mime_type.clone().unwrap_or_else(|| {
                    match item.content {
                        ResourceContent::Text(_) => DEFAULT_TEXT_MIME.to_string(),
                        ResourceContent::Binary(_) => DEFAULT_BINARY_MIME.to_string(),
                    }
                }));
            }
        }
        Ok(contents)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

/// Creates a concrete resource from a URI that matched a template.
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn create(&self, uri: &str, params: HashMap<String, String>)
        -> anyhow::Result<Resource>;
}

struct FnResourceFactory<F> {
    name: String,
    mime_type: Option<String>,
    f: Arc<F>,
}

#[async_trait]
impl<F, Fut> ResourceFactory for FnResourceFactory<F>
where
    F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ResourceContent>> + Send + 'static,
{
    async fn create(&self, uri: &str, params: HashMap<String, String>) -> anyhow::Result<Resource> {
        let content = (self.f)(params).await?;
        let mut resource = Resource::from_static(uri, self.name.clone(), content);
        resource.mime_type = self.mime_type.clone();
        Ok(resource)
    }
}

#[derive(Clone)]
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    /// JSON schema describing the template parameters.
    pub parameters: JsonObject,
    pub tags: BTreeSet<String>,
    factory: Arc<dyn ResourceFactory>,
}

impl ResourceTemplate {
    /// Fails when `uri_template` doesn't compile.
    pub fn new(
        uri_template: impl Into<String>,
        name: impl Into<String>,
        factory: impl ResourceFactory + 'static,
    ) -> RegistryResult<Self> {
        let uri_template = uri_template.into();
        let compiled = UriTemplate::compile(&uri_template)?;
        let parameters = parameters_schema(&compiled);
        Ok(Self {
            uri_template,
            name: name.into(),
            title: None,
            description: None,
            mime_type: None,
            parameters,
            tags: BTreeSet::new(),
            factory: Arc::new(factory),
        })
    }

    /// Build a template whose resources are produced by an async closure over
    /// the extracted parameters.
    pub fn from_fn<F, Fut>(
        uri_template: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> RegistryResult<Self>
    where
        F: Fn(HashMap<String, String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ResourceContent>> + Send + 'static,
    {
        let name = name.into();
        Self::new(
            uri_template,
            name.clone(),
            FnResourceFactory {
                name,
                mime_type: None,
                f: Arc::new(f),
            },
        )
    }

    pub fn from_rmcp(
        template: RmcpResourceTemplate,
        factory: impl ResourceFactory + 'static,
    ) -> RegistryResult<Self> {
        let raw = template.raw;
        let mut out = Self::new(raw.uri_template, raw.name, factory)?;
        out.title = raw.title;
        out.description = raw.description;
        out.mime_type = raw.mime_type;
        Ok(out)
    }

    pub fn to_rmcp(&self, key: &str) -> RmcpResourceTemplate {
        RawResourceTemplate {
            uri_template: key.to_string(),
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
        .no_annotation()
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
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
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

    /// Same template under a different template string. The factory is shared.
    pub fn with_uri_template(&self, uri_template: impl Into<String>) -> RegistryResult<Self> {
        let uri_template = uri_template.into();
        UriTemplate::compile(&uri_template)?;
        let mut out = self.clone();
        out.uri_template = uri_template;
        Ok(out)
    }

    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        UriTemplate::compile(&self.uri_template).ok()?.matches(uri)
    }

    pub async fn create_resource(
        &self,
        uri: &str,
        params: HashMap<String, String>,
    ) -> anyhow::Result<Resource> {
        let mut resource = self.factory.create(uri, params).await?;
        if resource.mime_type.is_none() {
            resource.mime_type = self.mime_type.clone();
        }
        Ok(resource)
    }
}

impl fmt::Debug for ResourceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTemplate")
            .field("uri_template", &self.uri_template)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn parameters_schema(template: &UriTemplate) -> JsonObject {
    let names: Vec<&str> = template.param_names().collect();
    let properties: serde_json::Map<String, serde_json::Value> = names
        .iter()
        .map(|n| (n.to_string(), json!({ "type": "string" })))
        .collect();
    let mut schema = JsonObject::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), properties.into());
    schema.insert("required".into(), json!(names));
    schema
}

#[derive(Clone)]
struct TemplateEntry {
    compiled: UriTemplate,
    template: ResourceTemplate,
}

/// Keyed resource and template storage for one registry.
pub struct ResourceManager {
    resources: RwLock<IndexMap<String, Resource>>,
    templates: RwLock<IndexMap<String, TemplateEntry>>,
    on_duplicate: DuplicatePolicy,
    mask_error_details: bool,
}

impl ResourceManager {
    pub fn new(on_duplicate: DuplicatePolicy, mask_error_details: bool) -> Self {
        Self {
            resources: RwLock::new(IndexMap::new()),
            templates: RwLock::new(IndexMap::new()),
            on_duplicate,
            mask_error_details,
        }
    }

    pub fn add_resource(&self, resource: Resource) -> RegistryResult<Resource> {
        let key = resource.uri.clone();
        self.add_resource_with_key(resource, key)
    }

    pub fn add_resource_with_key(
        &self,
        resource: Resource,
        key: impl Into<String>,
    ) -> RegistryResult<Resource> {
        let key = key.into();
        debug!("Registering resource '{}' as '{}'", resource.uri, key);
        insert_with_policy(
            &mut self.resources.write(),
            CapabilityKind::Resource,
            key,
            resource,
            self.on_duplicate,
        )
    }

    pub fn add_template(&self, template: ResourceTemplate) -> RegistryResult<ResourceTemplate> {
        let key = template.uri_template.clone();
        self.add_template_with_key(template, key)
    }

    /// Register under `key`, which is itself compiled as the matching
    /// template.
    pub fn add_template_with_key(
        &self,
        template: ResourceTemplate,
        key: impl Into<String>,
    ) -> RegistryResult<ResourceTemplate> {
        let key = key.into();
        let compiled = UriTemplate::compile(&key)?;
        debug!(
            "Registering resource template '{}' as '{}'",
            template.uri_template, key
        );
        insert_with_policy(
            &mut self.templates.write(),
            CapabilityKind::ResourceTemplate,
            key,
            TemplateEntry { compiled, template },
            self.on_duplicate,
        )
        .map(|entry| entry.template)
    }

    /// Concrete resource stored under exactly `uri`.
    pub fn get_resource(&self, uri: &str) -> RegistryResult<Resource> {
        self.resources
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| RegistryError::ResourceNotFound(uri.to_string()))
    }

    pub fn get_template(&self, key: &str) -> RegistryResult<ResourceTemplate> {
        self.templates
            .read()
            .get(key)
            .map(|e| e.template.clone())
            .ok_or_else(|| RegistryError::ResourceNotFound(key.to_string()))
    }

    /// Whether `uri` resolves to a concrete resource or matches a template.
    pub fn has_resource(&self, uri: &str) -> bool {
        self.resources.read().contains_key(uri) || self.match_template(uri).is_some()
    }

    pub fn resources(&self) -> IndexMap<String, Resource> {
        self.resources.read().clone()
    }

    pub fn templates(&self) -> IndexMap<String, ResourceTemplate> {
        self.templates
            .read()
            .iter()
            .map(|(k, e)| (k.clone(), e.template.clone()))
            .collect()
    }

    pub fn remove_resource(&self, uri: &str) -> RegistryResult<Resource> {
        self.resources
            .write()
            .shift_remove(uri)
            .ok_or_else(|| RegistryError::ResourceNotFound(uri.to_string()))
    }

    pub fn remove_template(&self, key: &str) -> RegistryResult<ResourceTemplate> {
        self.templates
            .write()
            .shift_remove(key)
            .map(|e| e.template)
            .ok_or_else(|| RegistryError::ResourceNotFound(key.to_string()))
    }

    /// Key `uri` is served under: the URI itself for a concrete resource, or
    /// the key of the first template that matches it.
    pub fn resolved_key(&self, uri: &str) -> Option<String> {
        if self.resources.read().contains_key(uri) {
            return Some(uri.to_string());
        }
        self.templates
            .read()
            .iter()
            .find(|(_, entry)| entry.compiled.matches(uri).is_some())
            .map(|(key, _)| key.clone())
    }

    /// First template, in registration order, whose key matches `uri`.
    fn match_template(&self, uri: &str) -> Option<(ResourceTemplate, HashMap<String, String>)> {
        self.templates.read().values().find_map(|entry| {
            entry
                .compiled
                .matches(uri)
                .map(|params| (entry.template.clone(), params))
        })
    }

    /// Resolve `uri` to a concrete resource, creating it from a template if
    /// needed.
    pub async fn resolve(&self, uri: &str) -> RegistryResult<Resource> {
        if let Ok(resource) = self.get_resource(uri) {
            return Ok(resource);
        }
        let Some((template, params)) = self.match_template(uri) else {
            return Err(RegistryError::ResourceNotFound(uri.to_string()));
        };
        template
            .create_resource(uri, params)
            .await
            .map_err(|e| self.execution_error(uri, &e))
    }

    pub async fn read_resource(&self, uri: &str) -> RegistryResult<Vec<ReadResourceContents>> {
        let resource = self.resolve(uri).await?;
        resource.read().await.map_err(|e| self.execution_error(uri, &e))
    }

    fn execution_error(&self, uri: &str, err: &anyhow::Error) -> RegistryError {
        let err_out = ExecutionError::from_failure(
            CapabilityKind::Resource,
            uri,
            err,
            self.mask_error_details,
        );
        if err_out.is_declared() {
            warn!("Resource '{}' reported an error: {}", uri, err_out);
        } else {
            warn!("Error reading resource '{}': {:#}", uri, err);
        }
        err_out.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceError;

    fn echo_template(template: &str, label: &'static str) -> ResourceTemplate {
        ResourceTemplate::from_fn(template, label, move |params| async move {
            let mut keys: Vec<_> = params.into_iter().collect();
            keys.sort();
            Ok(ResourceContent::Text(format!("{label}:{keys:?}")))
        })
        .unwrap()
    }

    async fn read_text(manager: &ResourceManager, uri: &str) -> String {
        let contents = manager.read_resource(uri).await.unwrap();
        contents[0].as_text().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_concrete_read() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager
            .add_resource(Resource::from_static("data://config", "config", "{\"a\":1}"))
            .unwrap();
        let contents = manager.read_resource("data://config").await.unwrap();
        assert_eq!(contents[0].as_text(), Some("{\"a\":1}"));
        assert_eq!(contents[0].mime_type.as_deref(), Some(DEFAULT_TEXT_MIME));
    }

    #[tokio::test]
    async fn test_binary_default_mime() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager
            .add_resource(Resource::from_static("data://blob", "blob", vec![0u8, 1, 2]))
            .unwrap();
        let contents = manager.read_resource("data://blob").await.unwrap();
        assert_eq!(contents[0].content, ResourceContent::Binary(vec![0, 1, 2]));
        assert_eq!(contents[0].mime_type.as_deref(), Some(DEFAULT_BINARY_MIME));
    }

    #[tokio::test]
    async fn test_template_read_extracts_params() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager
            .add_template(
                ResourceTemplate::from_fn(
                    "weather://{city}/current",
                    "current",
                    |params| async move {
                        Ok(ResourceContent::Text(format!("sunny in {}", params["city"])))
                    },
                )
                .unwrap(),
            )
            .unwrap();

        assert_eq!(read_text(&manager, "weather://paris/current").await, "sunny in paris");
        assert!(manager.has_resource("weather://paris/current"));
        assert!(!manager.has_resource("weather://paris/tomorrow"));
    }

    #[tokio::test]
    async fn test_concrete_wins_over_template() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager.add_template(echo_template("data://{id}", "tmpl")).unwrap();
        manager
            .add_resource(Resource::from_static("data://fixed", "fixed", "concrete"))
            .unwrap();

        assert_eq!(read_text(&manager, "data://fixed").await, "concrete");
        assert!(read_text(&manager, "data://other").await.starts_with("tmpl:"));
    }

    #[tokio::test]
    async fn test_first_registered_template_wins() {
        let uri = "files://a/b";

        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager.add_template(echo_template("files://{x}/{y}", "pair")).unwrap();
        manager.add_template(echo_template("files://{p*}", "path")).unwrap();
        assert!(read_text(&manager, uri).await.starts_with("pair:"));

        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager.add_template(echo_template("files://{p*}", "path")).unwrap();
        manager.add_template(echo_template("files://{x}/{y}", "pair")).unwrap();
        assert!(read_text(&manager, uri).await.starts_with("path:"));
    }

    #[test]
    fn test_resolved_key() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager
            .add_resource(Resource::from_static("files://a/b", "ab", "x"))
            .unwrap();
        manager.add_template(echo_template("files://{x}/{y}", "pair")).unwrap();

        assert_eq!(manager.resolved_key("files://a/b").as_deref(), Some("files://a/b"));
        assert_eq!(
            manager.resolved_key("files://c/d").as_deref(),
            Some("files://{x}/{y}")
        );
        assert_eq!(manager.resolved_key("files://c"), None);
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        let err = manager.read_resource("data://nope").await.unwrap_err();
        assert!(matches!(err, RegistryError::ResourceNotFound(ref u) if u == "data://nope"));
    }

    #[tokio::test]
    async fn test_read_errors_masked_or_declared() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager
            .add_resource(Resource::from_fn("data://generic", "g", || async {
                Err::<ResourceContent, _>(anyhow::anyhow!("disk on fire"))
            }))
            .unwrap();
        manager
            .add_resource(Resource::from_fn("data://declared", "d", || async {
                Err::<ResourceContent, _>(ResourceError("quota exceeded".into()).into())
            }))
            .unwrap();

        let err = manager.read_resource("data://generic").await.unwrap_err();
        assert_eq!(err.to_string(), "Error reading resource 'data://generic'");
        let err = manager.read_resource("data://declared").await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");

        let unmasked = ResourceManager::new(DuplicatePolicy::Warn, false);
        unmasked
            .add_resource(Resource::from_fn("data://generic", "g", || async {
                Err::<ResourceContent, _>(anyhow::anyhow!("disk on fire"))
            }))
            .unwrap();
        let err = unmasked.read_resource("data://generic").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error reading resource 'data://generic': disk on fire"
        );
    }

    #[test]
    fn test_duplicate_template_policy() {
        let manager = ResourceManager::new(DuplicatePolicy::Error, true);
        manager.add_template(echo_template("data://{id}", "a")).unwrap();
        let err = manager.add_template(echo_template("data://{id}", "b")).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Duplicate {
                kind: CapabilityKind::ResourceTemplate,
                ..
            }
        ));
        assert_eq!(manager.templates().len(), 1);
    }

    #[test]
    fn test_invalid_template_rejected() {
        assert!(ResourceTemplate::from_fn("data://{id", "bad", |_| async {
            Ok(ResourceContent::Text(String::new()))
        })
        .is_err());

        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        let err = manager
            .add_template_with_key(echo_template("data://{id}", "a"), "data://{id*}/x")
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_template_parameters_schema() {
        let template = echo_template("users://{id}/files/{path*}", "files");
        assert_eq!(template.parameters["required"], json!(["id", "path"]));
        assert_eq!(
            template.parameters["properties"]["id"],
            json!({ "type": "string" })
        );
    }

    #[test]
    fn test_remove() {
        let manager = ResourceManager::new(DuplicatePolicy::Warn, true);
        manager
            .add_resource(Resource::from_static("data://a", "a", "x"))
            .unwrap();
        manager.add_template(echo_template("data://t/{id}", "t")).unwrap();

        manager.remove_resource("data://a").unwrap();
        manager.remove_template("data://t/{id}").unwrap();
        assert!(!manager.has_resource("data://a"));
        assert!(!manager.has_resource("data://t/1"));
        assert!(manager.remove_resource("data://a").is_err());
    }

    #[test]
    fn test_contents_wire_form() {
        let text = ReadResourceContents::text("hi", Some("text/plain".into())).into_rmcp("a://b");
        assert!(matches!(
            text,
            ResourceContents::TextResourceContents { ref uri, ref text, .. }
                if uri == "a://b" && text == "hi"
        ));

        let blob = ReadResourceContents::binary(vec![1, 2, 3], None).into_rmcp("a://c");
        let back = ReadResourceContents::from_rmcp(blob).unwrap();
        assert_eq!(back.content, ResourceContent::Binary(vec![1, 2, 3]));
    }
}
