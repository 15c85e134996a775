//! Per-kind capability storage.
//!
//! Each manager owns one kind of capability under a registration key and
//! applies the configured [`DuplicatePolicy`](crate::core::DuplicatePolicy)
//! on collisions.

pub mod bundle;
pub mod prompts;
pub mod resources;
pub mod tools;
pub mod types;

pub use bundle::{BundleEntry, CapabilityBundle};
pub use prompts::{Prompt, PromptArgument, PromptManager, PromptRenderer};
pub use resources::{
    ReadResourceContents, Resource, ResourceContent, ResourceFactory, ResourceManager,
    ResourceReader, ResourceTemplate, DEFAULT_BINARY_MIME, DEFAULT_TEXT_MIME,
};
pub use tools::{Tool, ToolHandler, ToolManager};
pub use types::{ArgumentValidator, JsonObject, PassthroughValidator};
