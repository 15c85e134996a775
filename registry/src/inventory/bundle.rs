//! Grouped registration.
//!
//! A [`CapabilityBundle`] is a plain list of capabilities assembled up front
//! and registered together, optionally under a prefix.

use crate::{
    core::{
        config::PrefixFormat,
        prefix::{add_resource_prefix, prefix_name},
        registry::Registry,
    },
    error::RegistryResult,
};

use super::{prompts::Prompt, resources::Resource, resources::ResourceTemplate, tools::Tool};

#[derive(Debug, Clone)]
pub enum BundleEntry {
    Tool(Tool),
    Resource(Resource),
    Template(ResourceTemplate),
    Prompt(Prompt),
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityBundle {
    entries: Vec<BundleEntry>,
}

impl CapabilityBundle {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tool(mut self, tool: Tool) -> Self {
        self.entries.push(BundleEntry::Tool(tool));
        self
    }

    #[must_use]
    pub fn resource(mut self, resource: Resource) -> Self {
        self.entries.push(BundleEntry::Resource(resource));
        self
    }

    #[must_use]
    pub fn template(mut self, template: ResourceTemplate) -> Self {
        self.entries.push(BundleEntry::Template(template));
        self
    }

    #[must_use]
    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.entries.push(BundleEntry::Prompt(prompt));
        self
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register every entry with `registry`.
    ///
    /// With a prefix, tools and prompts are renamed `{prefix}_{name}` and
    /// resource URIs become `{prefix}+{uri}`. Stops at the first
    /// registration error; entries registered before it stay registered.
    pub fn register_all(&self, registry: &Registry, prefix: Option<&str>) -> RegistryResult<()> {
        for entry in &self.entries {
            match entry.clone() {
                BundleEntry::Tool(tool) => {
                    let tool = match prefix {
                        Some(p) => {
                            let name = prefix_name(p, &tool.name);
                            tool.with_name(name)
                        }
                        None => tool,
                    };
                    registry.add_tool(tool)?;
                }
                BundleEntry::Resource(resource) => {
                    let resource = match prefix {
                        Some(p) => {
                            let uri =
                                add_resource_prefix(&resource.uri, p, PrefixFormat::Protocol)?;
                            resource.with_uri(uri)
                        }
                        None => resource,
                    };
                    registry.add_resource(resource)?;
                }
                BundleEntry::Template(template) => {
                    let template = match prefix {
                        Some(p) => template.with_uri_template(add_resource_prefix(
                            &template.uri_template,
                            p,
                            PrefixFormat::Protocol,
                        )?)?,
                        None => template,
                    };
                    registry.add_template(template)?;
                }
                BundleEntry::Prompt(mut prompt) => {
                    if let Some(p) = prefix {
                        prompt.name = prefix_name(p, &prompt.name);
                    }
                    registry.add_prompt(prompt)?;
                }
            }
        }
        Ok(())
    }
}
