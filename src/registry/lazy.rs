//! Lazy handles and dependency specs
//!
//! A [`LazyService`] is a memoised, thread-safe one-shot wrapper around
//! "instantiate this named service": at most one factory invocation, safe
//! concurrent `get()` with identical results, and a `must_get()` that fails
//! loudly. [`Lazy<T>`] adds the typed view generated factories inject into
//! struct fields.
//!
//! Dep-spec grammar (one entry of `depends-on`):
//!
//! ```text
//! <service>                  direct service reference
//! <param>:<service>          same, bound to the parameter name
//! <param>:@<cfg-key>         the config at the key names the service
//! <param>:cfg:<cfg-key>      inject the configured value, not a service
//! <param>:cfg:@<cfg-key>     the config at the key names a second config key
//! ```

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;

use crate::config::value::{ConfigValue, FromConfig};
use crate::error::{Error, Result};
use crate::registry::{Registry, ServiceInstance};

// =============================================================================
// Dep specs
// =============================================================================

/// What one dependency resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepTarget {
    /// A service, by name.
    Service(String),
    /// `@key` - the config at `key` holds the service name.
    ServiceFromConfig(String),
    /// `cfg:key` - the configured value itself.
    ConfigValue(String),
    /// `cfg:@key` - the config at `key` names a second config key.
    ConfigIndirect(String),
}

/// A parsed dep-spec: optional parameter name plus the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepSpec {
    pub param: Option<String>,
    pub target: DepTarget,
}

impl DepSpec {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.starts_with('@') || spec.starts_with("cfg:") {
            return Self {
                param: None,
                target: Self::parse_target(spec),
            };
        }
        match spec.split_once(':') {
            Some((param, rest)) => Self {
                param: Some(param.to_string()),
                target: Self::parse_target(rest),
            },
            None => Self {
                param: None,
                target: DepTarget::Service(spec.to_string()),
            },
        }
    }

    fn parse_target(target: &str) -> DepTarget {
        if let Some(key) = target.strip_prefix("cfg:@") {
            DepTarget::ConfigIndirect(key.to_string())
        } else if let Some(key) = target.strip_prefix("cfg:") {
            DepTarget::ConfigValue(key.to_string())
        } else if let Some(key) = target.strip_prefix('@') {
            DepTarget::ServiceFromConfig(key.to_string())
        } else {
            DepTarget::Service(target.to_string())
        }
    }

    /// The deps-map key this entry binds to.
    pub fn key(&self) -> String {
        if let Some(param) = &self.param {
            return param.clone();
        }
        match &self.target {
            DepTarget::Service(s) => s.clone(),
            DepTarget::ServiceFromConfig(k)
            | DepTarget::ConfigValue(k)
            | DepTarget::ConfigIndirect(k) => k.clone(),
        }
    }

    /// The statically known service name, when this is a direct reference.
    /// Config-driven targets cannot be resolved before runtime.
    pub fn service_name(&self) -> Option<&str> {
        match &self.target {
            DepTarget::Service(s) => Some(s),
            _ => None,
        }
    }

    /// Re-render the dep-spec with a replacement direct service name.
    pub fn with_service_name(&self, service: &str) -> String {
        match &self.param {
            Some(param) => format!("{param}:{service}"),
            None => service.to_string(),
        }
    }
}

// =============================================================================
// Lazy handles
// =============================================================================

/// A shared, memoised handle to a named service.
pub struct LazyService {
    name: String,
    registry: Registry,
    cell: OnceCell<ServiceInstance>,
}

impl LazyService {
    pub(crate) fn new(name: impl Into<String>, registry: Registry) -> Self {
        Self {
            name: name.into(),
            registry,
            cell: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the service, invoking its factory on first use. Subsequent
    /// calls return the cached instance.
    pub fn get(&self) -> Result<ServiceInstance> {
        self.cell
            .get_or_try_init(|| self.registry.get_service(&self.name))
            .cloned()
    }

    /// Like [`get`](Self::get), but fails fast when unavailable.
    pub fn must_get(&self) -> ServiceInstance {
        match self.get() {
            Ok(instance) => instance,
            Err(err) => panic!("service {:?} unavailable: {err}", self.name),
        }
    }
}

impl std::fmt::Debug for LazyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyService")
            .field("name", &self.name)
            .field("resolved", &self.cell.get().is_some())
            .finish()
    }
}

/// Typed view over a [`LazyService`].
pub struct Lazy<T> {
    handle: Arc<LazyService>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Lazy<T> {
    pub fn from_handle(handle: Arc<LazyService>) -> Self {
        Self {
            handle,
            _marker: PhantomData,
        }
    }

    pub fn get(&self) -> Result<Arc<T>> {
        let instance = self.handle.get()?;
        instance.downcast::<T>().map_err(|_| {
            Error::dependency(
                self.handle.name(),
                format!(
                    "instance is not a {}",
                    std::any::type_name::<T>()
                ),
            )
        })
    }

    pub fn must_get(&self) -> Arc<T> {
        match self.get() {
            Ok(instance) => instance,
            Err(err) => panic!("{err}"),
        }
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy").field("name", &self.handle.name).finish()
    }
}

// =============================================================================
// Deps map
// =============================================================================

/// One resolved dependency entry: a lazy service handle, or a config value
/// (absent when the key was missing and a generated default may apply).
#[derive(Debug, Clone)]
pub enum DepEntry {
    Service(Arc<LazyService>),
    Value(Option<ConfigValue>),
}

/// The dependency map handed to factories. Entries are keyed by parameter
/// name and stay lazy until the factory (or the instance it builds) asks.
#[derive(Debug, Default)]
pub struct DepsMap {
    entries: BTreeMap<String, DepEntry>,
}

impl DepsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: DepEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// The untyped lazy handle for a service dependency.
    pub fn handle(&self, key: &str) -> Result<Arc<LazyService>> {
        match self.entries.get(key) {
            Some(DepEntry::Service(handle)) => Ok(Arc::clone(handle)),
            Some(DepEntry::Value(_)) => Err(Error::dependency(
                key,
                "dependency is a config value, not a service",
            )),
            None => Err(Error::dependency(key, "missing dependency")),
        }
    }

    /// A typed lazy handle; resolution happens on first `get()`.
    pub fn lazy<T: Send + Sync + 'static>(&self, key: &str) -> Result<Lazy<T>> {
        Ok(Lazy::from_handle(self.handle(key)?))
    }

    /// Resolve a service dependency now and downcast it.
    pub fn resolve<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        Lazy::<T>::from_handle(self.handle(key)?).get()
    }

    pub fn value(&self, key: &str) -> Option<&ConfigValue> {
        match self.entries.get(key) {
            Some(DepEntry::Value(v)) => v.as_ref(),
            _ => None,
        }
    }

    /// A typed config injection with an optional generated default.
    pub fn config_value<T: FromConfig>(&self, key: &str, default: Option<&str>) -> Result<T> {
        match self.entries.get(key) {
            Some(DepEntry::Value(Some(value))) => T::from_config(value),
            Some(DepEntry::Value(None)) | None => match default {
                Some(d) => T::from_config(&ConfigValue::Str(d.to_string())),
                None => Err(Error::resolution(key, "config value missing and no default")),
            },
            Some(DepEntry::Service(_)) => Err(Error::dependency(
                key,
                "dependency is a service, not a config value",
            )),
        }
    }

    /// A structured config injection (nested structs, lists of maps) through
    /// serde.
    pub fn config_de<T: DeserializeOwned>(&self, key: &str, default: Option<&str>) -> Result<T> {
        let json = match self.entries.get(key) {
            Some(DepEntry::Value(Some(value))) => value.to_json(),
            Some(DepEntry::Value(None)) | None => match default {
                Some(d) => serde_json::from_str(d)
                    .unwrap_or(serde_json::Value::String(d.to_string())),
                None => {
                    return Err(Error::resolution(key, "config value missing and no default"))
                }
            },
            Some(DepEntry::Service(_)) => {
                return Err(Error::dependency(
                    key,
                    "dependency is a service, not a config value",
                ))
            }
        };
        serde_json::from_value(json).map_err(Error::encode)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
