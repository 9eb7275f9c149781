//! Configuration: values, placeholders, loading, validation
//!
//! The pipeline runs `placeholder` pass 1 over raw bytes, parses, gathers
//! `configs:`, runs pass 2 over the tree, merges documents, normalizes the
//! server shorthand, and validates against the embedded schema. See
//! [`loader::load_files`] for the entry point.

pub mod loader;
pub mod model;
pub mod placeholder;
pub mod value;

pub use loader::{load_documents, load_files, LoadedConfig};
pub use model::RootConfig;
pub use placeholder::{EnvProvider, PlaceholderProvider, ProviderRegistry};
pub use value::{ConfigTree, ConfigValue, FromConfig};
