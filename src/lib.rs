//! # Lokstra - Topology-Aware Service Framework
//!
//! Lokstra assembles a running service graph in two stages: a build-time
//! annotation processor (the `lokstra-codegen` crate, re-exported behind the
//! `codegen` feature) turns comment annotations into generated registration
//! files, and this crate - the deployment engine - loads a YAML topology,
//! wires a lazy dependency-injection graph, and serves routed services.
//!
//! The contract the two halves share: the same annotated type, referenced by
//! the same logical name, behaves identically whether it is invoked locally
//! in-process or through an HTTP proxy on another server - selected purely
//! by topology.
//!
//! ## Features
//!
//! - **Two-step config resolution** - external providers first, then
//!   internal `${@cfg:...}` references, types preserved
//! - **Declarative topology** - deployments → servers → apps, with a
//!   shorthand for the single-deployment case
//! - **Lazy DI** - per-service one-shot barriers, at-most-once factories,
//!   cycle detection, missing deps surface at first use
//! - **Local or remote by topology** - a dependency published on another
//!   server resolves to an HTTP proxy, with no change to user code
//! - **Deferred routers** - router/service construction cycles resolve on
//!   first consumption
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lokstra::config::{load_files, ProviderRegistry};
//! use lokstra::registry::Registry;
//!
//! # async fn run() -> lokstra::Result<()> {
//! let providers = ProviderRegistry::new();
//! let loaded = load_files(&["deploy.yaml"], &providers)?;
//!
//! let registry = Registry::new();
//! // zz_registrations::register_all(&registry);   // generated barrel
//! lokstra::server::serve(registry, loaded, "dev.api").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Service lookup
//!
//! ```rust
//! use lokstra::registry::{Registry, ServiceTypeDef, ServiceInstance};
//! use std::sync::Arc;
//!
//! let registry = Registry::new();
//! registry.register_service_type(
//!     "greeter",
//!     ServiceTypeDef::local(Arc::new(|_deps, _config| {
//!         Ok(Arc::new("hello".to_string()) as ServiceInstance)
//!     })),
//! );
//! registry.register_lazy_service("hello", "greeter", &[]);
//!
//! let greeting = registry.get_service("hello").unwrap();
//! assert_eq!(*greeting.downcast::<String>().unwrap(), "hello");
//! ```

pub mod config;
mod error;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod server;
pub mod topology;

pub use error::{Error, Result};

#[cfg(feature = "codegen")]
pub use lokstra_codegen as codegen;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{ConfigValue, FromConfig, LoadedConfig, ProviderRegistry};
    pub use crate::registry::{
        route_handler, ConfigMap, DepsMap, Lazy, LazyService, Registry, ServiceInstance,
        ServiceTypeDef, ServiceTypeMeta,
    };
    pub use crate::proxy::RemoteProxy;
    pub use crate::{Error, Result};
    pub use std::sync::Arc;
}
