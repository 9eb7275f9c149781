//! The process-wide registry
//!
//! One store for everything the deployment engine knows at run time:
//! resolved configs, service/router/middleware definitions, service-type
//! factories, lazy service entries, and the write-once instance caches.
//!
//! A single reader/writer lock guards the definition sections; the instance
//! caches are concurrent maps whose entries memoise independently. The write
//! lock is never held across a factory invocation: factories may call
//! [`Registry::get_service`] recursively.
//!
//! The registry is fully instantiable - tests build their own - and a
//! process-wide handle is available through [`global`]; [`replace_global`]
//! swaps it wholesale, which is the reset-for-testing operation.

pub mod factory;
pub mod lazy;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy as LazyCell;

use crate::config::model::{RouterDef, ServiceDef};
use crate::config::value::{ConfigTree, ConfigValue, FromConfig};
use crate::error::{Error, Result};
use crate::router::SharedRouter;

pub use factory::{
    middleware, route_handler, ConfigMap, Middleware, MiddlewareFactory, RequestInfo, RouteHandler,
    RouteMeta, ServiceFactory, ServiceTypeDef, ServiceTypeMeta,
};
pub use lazy::{DepEntry, DepSpec, DepTarget, DepsMap, Lazy, LazyService};

/// A type-erased service singleton.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// A deferred router build, retried on first consumption.
pub type DeferredRouter = Arc<dyn Fn() -> Result<SharedRouter> + Send + Sync>;

thread_local! {
    /// Names currently being instantiated on this thread, for cycle detection.
    static RESOLVING: std::cell::RefCell<Vec<String>> = const { std::cell::RefCell::new(Vec::new()) };
}

/// One lazy service: type key, dep-specs, config, and the one-shot barrier.
struct LazyEntry {
    name: String,
    type_key: String,
    depends_on: Vec<String>,
    config: ConfigMap,
    cell: once_cell::sync::OnceCell<ServiceInstance>,
}

#[derive(Default)]
struct Definitions {
    service_types: HashMap<String, ServiceTypeDef>,
    middleware_types: HashMap<String, MiddlewareFactory>,
    service_defs: HashMap<String, ServiceDef>,
    router_defs: HashMap<String, RouterDef>,
    configs: ConfigTree,
    flat_configs: BTreeMap<String, ConfigValue>,
    /// Service name -> base URL, for the server currently being run.
    remote_services: BTreeMap<String, String>,
}

struct Inner {
    defs: RwLock<Definitions>,
    lazy: DashMap<String, Arc<LazyEntry>, RandomState>,
    instances: DashMap<String, ServiceInstance, RandomState>,
    routers: DashMap<String, SharedRouter, RandomState>,
    deferred_routers: DashMap<String, DeferredRouter, RandomState>,
    middlewares: DashMap<String, Middleware, RandomState>,
}

/// The registry handle. Cloning is cheap and shares the same store.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                defs: RwLock::new(Definitions::default()),
                lazy: DashMap::with_hasher(RandomState::new()),
                instances: DashMap::with_hasher(RandomState::new()),
                routers: DashMap::with_hasher(RandomState::new()),
                deferred_routers: DashMap::with_hasher(RandomState::new()),
                middlewares: DashMap::with_hasher(RandomState::new()),
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Definitions> {
        self.inner.defs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Definitions> {
        self.inner.defs.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Definition registration (boot-time, single-threaded)
    // =========================================================================

    /// Register a service-type: the local/remote factory pair and route
    /// metadata, under one key.
    pub fn register_service_type(&self, key: &str, def: ServiceTypeDef) {
        tracing::debug!(target: "lokstra", type_key = key, "registering service type");
        self.write().service_types.insert(key.to_lowercase(), def);
    }

    pub fn service_type(&self, key: &str) -> Option<ServiceTypeDef> {
        self.read().service_types.get(&key.to_lowercase()).cloned()
    }

    pub fn register_middleware_type(&self, key: &str, factory: MiddlewareFactory) {
        self.write()
            .middleware_types
            .insert(key.to_lowercase(), factory);
    }

    pub fn middleware_type(&self, key: &str) -> Option<MiddlewareFactory> {
        self.read().middleware_types.get(&key.to_lowercase()).cloned()
    }

    /// Register a lazy service from generated code. Idempotent: an existing
    /// entry of the same name is kept (a configuration-declared definition
    /// takes precedence over the annotation default).
    pub fn register_lazy_service(&self, name: &str, type_key: &str, depends_on: &[&str]) {
        let key = name.to_lowercase();
        if self.inner.lazy.contains_key(&key) {
            return;
        }
        self.inner.lazy.insert(
            key,
            Arc::new(LazyEntry {
                name: name.to_string(),
                type_key: type_key.to_string(),
                depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
                config: ConfigMap::new(),
                cell: once_cell::sync::OnceCell::new(),
            }),
        );
    }

    /// Register (or replace) a service from a configuration definition.
    pub fn register_service_def(&self, name: &str, def: &ServiceDef) {
        let key = name.to_lowercase();
        let config: ConfigMap = def
            .config
            .iter()
            .map(|(k, v)| (k.clone(), ConfigValue::from_yaml(v)))
            .collect();
        self.write().service_defs.insert(key.clone(), def.clone());
        if let Some(router) = &def.router {
            self.write()
                .router_defs
                .entry(key.clone())
                .or_insert_with(|| router.clone());
        }
        self.inner.lazy.insert(
            key,
            Arc::new(LazyEntry {
                name: name.to_string(),
                type_key: def.type_key.clone(),
                depends_on: def.depends_on.clone(),
                config,
                cell: once_cell::sync::OnceCell::new(),
            }),
        );
    }

    pub fn service_def(&self, name: &str) -> Option<ServiceDef> {
        self.read().service_defs.get(&name.to_lowercase()).cloned()
    }

    pub fn register_router_def(&self, name: &str, def: &RouterDef) {
        self.write()
            .router_defs
            .insert(name.to_lowercase(), def.clone());
    }

    pub fn router_def(&self, name: &str) -> Option<RouterDef> {
        self.read().router_defs.get(&name.to_lowercase()).cloned()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.inner.lazy.contains_key(&name.to_lowercase())
    }

    /// The service-type key of a registered service.
    pub fn service_type_key(&self, name: &str) -> Option<String> {
        self.inner
            .lazy
            .get(&name.to_lowercase())
            .map(|e| e.type_key.clone())
    }

    // =========================================================================
    // Configs
    // =========================================================================

    /// Install the resolved configuration tree.
    pub fn set_configs(&self, configs: ConfigTree) {
        let flat = crate::config::value::flatten(&configs);
        let mut defs = self.write();
        defs.configs = configs;
        defs.flat_configs = flat;
    }

    /// Layer an override tree (deployment-level, then server-level) on top
    /// of the installed configs. Keys may be dotted paths.
    pub fn apply_config_overrides(&self, overrides: &ConfigTree) {
        let mut defs = self.write();
        for (key, value) in overrides {
            merge_override(&mut defs.configs, key, value);
        }
        defs.flat_configs = crate::config::value::flatten(&defs.configs);
    }

    /// Case-insensitive dot-path config lookup.
    pub fn get_config(&self, path: &str) -> Option<ConfigValue> {
        self.read().flat_configs.get(&path.to_lowercase()).cloned()
    }

    /// Typed config lookup with a fallback.
    pub fn get_config_or<T: FromConfig>(&self, path: &str, default: T) -> T {
        match self.get_config(path) {
            Some(value) => T::from_config(&value).unwrap_or(default),
            None => default,
        }
    }

    /// Install the current server's remote-service map.
    pub fn set_remote_services(&self, map: BTreeMap<String, String>) {
        self.write().remote_services = map
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
    }

    pub fn remote_service_url(&self, name: &str) -> Option<String> {
        self.read().remote_services.get(&name.to_lowercase()).cloned()
    }

    // =========================================================================
    // Service instantiation (lazy DI)
    // =========================================================================

    /// Resolve a named service, instantiating it (and, lazily, its
    /// dependencies) on first use. Concurrent callers share one factory
    /// invocation and observe the same instance.
    pub fn get_service(&self, name: &str) -> Result<ServiceInstance> {
        let key = name.to_lowercase();
        if let Some(instance) = self.inner.instances.get(&key) {
            return Ok(instance.clone());
        }

        let cycle = RESOLVING.with(|stack| {
            let stack = stack.borrow();
            stack
                .iter()
                .any(|n| *n == key)
                .then(|| format!("{} -> {key}", stack.join(" -> ")))
        });
        if let Some(path) = cycle {
            return Err(Error::dependency(
                name,
                format!("circular dependency: {path}"),
            ));
        }

        let entry = self
            .inner
            .lazy
            .get(&key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::dependency(name, "no such service"))?;

        let instance = entry
            .cell
            .get_or_try_init(|| {
                RESOLVING.with(|s| s.borrow_mut().push(key.clone()));
                let result = self.instantiate(&key, &entry);
                RESOLVING.with(|s| {
                    s.borrow_mut().pop();
                });
                result
            })?
            .clone();
        self.inner.instances.insert(key, instance.clone());
        Ok(instance)
    }

    /// An untyped lazy handle to a named service.
    pub fn lazy_handle(&self, name: &str) -> Arc<LazyService> {
        Arc::new(LazyService::new(name.to_string(), self.clone()))
    }

    fn instantiate(&self, key: &str, entry: &LazyEntry) -> Result<ServiceInstance> {
        // Snapshot what the factory decision needs, then release the lock:
        // the factory is free to re-enter the registry.
        let (type_def, remote_url) = {
            let defs = self.read();
            let type_def = defs
                .service_types
                .get(&entry.type_key.to_lowercase())
                .cloned()
                .ok_or_else(|| {
                    Error::dependency(
                        &entry.name,
                        format!("no factory registered for service type {:?}", entry.type_key),
                    )
                })?;
            (type_def, defs.remote_services.get(key).cloned())
        };

        let deps = self.resolve_deps(&entry.name, &entry.depends_on)?;

        match remote_url {
            Some(url) => {
                let factory = type_def.remote.ok_or_else(|| {
                    Error::dependency(
                        &entry.name,
                        "published remotely but its service type has no remote factory",
                    )
                })?;
                tracing::debug!(
                    target: "lokstra",
                    service = %entry.name,
                    base_url = %url,
                    "instantiating remote proxy"
                );
                let mut config = entry.config.clone();
                config.insert("remote".to_string(), ConfigValue::Str(url.clone()));
                config.insert("base-url".to_string(), ConfigValue::Str(url));
                factory(&deps, &config)
            }
            None => {
                tracing::debug!(
                    target: "lokstra",
                    service = %entry.name,
                    type_key = %entry.type_key,
                    "instantiating local service"
                );
                (type_def.local)(&deps, &entry.config)
            }
        }
    }

    /// Build the deps map for a service: service deps become lazy handles,
    /// config deps materialise typed values. Missing `@`-indirections fail
    /// here, synchronously.
    fn resolve_deps(&self, service: &str, specs: &[String]) -> Result<DepsMap> {
        let mut deps = DepsMap::new();
        for raw in specs {
            let spec = DepSpec::parse(raw);
            let dep_key = spec.key();
            let entry = match &spec.target {
                DepTarget::Service(target) => {
                    DepEntry::Service(self.lazy_handle(target))
                }
                DepTarget::ServiceFromConfig(cfg_key) => {
                    let target = self
                        .get_config(cfg_key)
                        .and_then(|v| v.as_str().map(str::to_string))
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| {
                            Error::resolution(
                                cfg_key.clone(),
                                format!("must name the service for dependency {dep_key:?} of {service:?}"),
                            )
                        })?;
                    DepEntry::Service(self.lazy_handle(&target))
                }
                DepTarget::ConfigValue(cfg_key) => DepEntry::Value(self.get_config(cfg_key)),
                DepTarget::ConfigIndirect(cfg_key) => {
                    let second = self
                        .get_config(cfg_key)
                        .and_then(|v| v.as_str().map(str::to_string))
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| {
                            Error::resolution(
                                cfg_key.clone(),
                                format!("must name a config key for dependency {dep_key:?} of {service:?}"),
                            )
                        })?;
                    DepEntry::Value(self.get_config(&second))
                }
            };
            deps.insert(dep_key, entry);
        }
        Ok(deps)
    }

    // =========================================================================
    // Routers and middlewares (write-once instances)
    // =========================================================================

    pub fn register_router(&self, name: &str, router: SharedRouter) {
        self.inner
            .routers
            .entry(name.to_lowercase())
            .or_insert(router);
    }

    /// Register a zero-argument router build to retry on first consumption.
    pub fn register_deferred_router(&self, name: &str, build: DeferredRouter) {
        self.inner
            .deferred_routers
            .insert(name.to_lowercase(), build);
    }

    /// Fetch a router, driving a deferred build if one is pending. Safe
    /// against concurrent first consumers: the first completed build wins.
    pub fn get_router(&self, name: &str) -> Result<SharedRouter> {
        let key = name.to_lowercase();
        if let Some(router) = self.inner.routers.get(&key) {
            return Ok(router.clone());
        }
        let Some(build) = self.inner.deferred_routers.get(&key).map(|b| b.clone()) else {
            return Err(Error::wiring(name, "no such router"));
        };
        let built = build()?;
        let router = self
            .inner
            .routers
            .entry(key.clone())
            .or_insert(built)
            .clone();
        self.inner.deferred_routers.remove(&key);
        Ok(router)
    }

    pub fn router_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .routers
            .iter()
            .map(|r| r.key().clone())
            .chain(self.inner.deferred_routers.iter().map(|r| r.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn register_middleware(&self, name: &str, mw: Middleware) {
        self.inner
            .middlewares
            .entry(name.to_lowercase())
            .or_insert(mw);
    }

    pub fn get_middleware(&self, name: &str) -> Result<Middleware> {
        self.inner
            .middlewares
            .get(&name.to_lowercase())
            .map(|m| m.clone())
            .ok_or_else(|| Error::wiring(name, "no such middleware"))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("services", &self.inner.lazy.len())
            .field("instances", &self.inner.instances.len())
            .field("routers", &self.inner.routers.len())
            .finish()
    }
}

/// Deep-merge one override into the tree. Dotted keys descend.
fn merge_override(tree: &mut ConfigTree, key: &str, value: &ConfigValue) {
    match key.split_once('.') {
        None => match (tree.get_mut(key), value) {
            (Some(ConfigValue::Map(existing)), ConfigValue::Map(incoming)) => {
                for (k, v) in incoming {
                    merge_override(existing, k, v);
                }
            }
            _ => {
                tree.insert(key.to_string(), value.clone());
            }
        },
        Some((head, rest)) => {
            let child = tree
                .entry(head.to_string())
                .or_insert_with(|| ConfigValue::Map(ConfigTree::new()));
            if !matches!(child, ConfigValue::Map(_)) {
                *child = ConfigValue::Map(ConfigTree::new());
            }
            if let ConfigValue::Map(map) = child {
                merge_override(map, rest, value);
            }
        }
    }
}

// =============================================================================
// Process-wide handle
// =============================================================================

static GLOBAL: LazyCell<RwLock<Registry>> = LazyCell::new(|| RwLock::new(Registry::new()));

/// The process-wide registry.
pub fn global() -> Registry {
    GLOBAL
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Replace the process-wide registry wholesale and return the previous one.
/// This is the reset-for-testing operation; nothing carries across.
pub fn replace_global(registry: Registry) -> Registry {
    std::mem::replace(
        &mut *GLOBAL.write().unwrap_or_else(PoisonError::into_inner),
        registry,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Pool {
        port: u16,
    }

    fn pool_factory(count: &'static AtomicU32) -> ServiceFactory {
        Arc::new(move |deps: &DepsMap, _config: &ConfigMap| {
            count.fetch_add(1, Ordering::SeqCst);
            let port: u16 = deps.config_value("port", Some("5432"))?;
            Ok(Arc::new(Pool { port }) as ServiceInstance)
        })
    }

    fn registry_with_pool(count: &'static AtomicU32) -> Registry {
        let reg = Registry::new();
        reg.register_service_type("pool", ServiceTypeDef::local(pool_factory(count)));
        reg.register_lazy_service("db", "pool", &["port:cfg:db.port"]);
        reg.set_configs(
            [(
                "DB".to_string(),
                ConfigValue::Map([("PORT".to_string(), ConfigValue::Int(9001))].into()),
            )]
            .into(),
        );
        reg
    }

    #[test]
    fn test_factory_runs_once_and_memoises() {
        static COUNT: AtomicU32 = AtomicU32::new(0);
        let reg = registry_with_pool(&COUNT);

        let a = reg.get_service("db").unwrap();
        let b = reg.get_service("DB").unwrap();
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        let pool = a.downcast::<Pool>().unwrap();
        assert_eq!(pool.port, 9001);
    }

    #[test]
    fn test_concurrent_get_is_single_flight() {
        static COUNT: AtomicU32 = AtomicU32::new(0);
        let reg = registry_with_pool(&COUNT);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let reg = reg.clone();
            handles.push(std::thread::spawn(move || {
                reg.get_service("db").unwrap()
            }));
        }
        let instances: Vec<ServiceInstance> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(COUNT.load(Ordering::SeqCst), 1, "exactly one factory call");
        for instance in &instances[1..] {
            assert!(Arc::ptr_eq(&instances[0], instance));
        }
    }

    #[test]
    fn test_missing_type_surfaces_on_first_use() {
        let reg = Registry::new();
        reg.register_lazy_service("ghost", "never-registered", &[]);
        let err = reg.get_service("ghost").unwrap_err();
        assert!(err.to_string().contains("never-registered"));
    }

    #[test]
    fn test_unknown_service() {
        let reg = Registry::new();
        let err = reg.get_service("nope").unwrap_err();
        assert!(matches!(err, Error::Dependency { .. }));
    }

    #[test]
    fn test_cycle_detection() {
        let reg = Registry::new();
        let factory: ServiceFactory = Arc::new(|deps: &DepsMap, _| {
            // Force the dependency immediately.
            let _ = deps.resolve::<Pool>("other")?;
            Ok(Arc::new(()) as ServiceInstance)
        });
        reg.register_service_type("looper", ServiceTypeDef::local(factory));
        reg.register_lazy_service("a", "looper", &["other:b"]);
        reg.register_lazy_service("b", "looper", &["other:a"]);

        let err = reg.get_service("a").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("circular dependency"), "got: {msg}");
        assert!(msg.contains("a -> b -> a"), "cycle path spelled out: {msg}");
    }

    #[test]
    fn test_remote_switch_uses_remote_factory() {
        let reg = Registry::new();
        let local: ServiceFactory =
            Arc::new(|_, _| Ok(Arc::new("local".to_string()) as ServiceInstance));
        let remote: ServiceFactory = Arc::new(|_, config: &ConfigMap| {
            let url = config["base-url"].as_str().unwrap_or_default().to_string();
            Ok(Arc::new(format!("remote:{url}")) as ServiceInstance)
        });
        reg.register_service_type(
            "svc",
            ServiceTypeDef::endpoint(local, remote, ServiceTypeMeta::new(None)),
        );
        reg.register_lazy_service("users", "svc", &[]);

        // Same definitions, no remote map: local.
        let instance = reg.get_service("users").unwrap();
        assert_eq!(*instance.downcast::<String>().unwrap(), "local");

        // Fresh registry, same definitions, users published elsewhere.
        let reg2 = Registry::new();
        let local: ServiceFactory =
            Arc::new(|_, _| Ok(Arc::new("local".to_string()) as ServiceInstance));
        let remote: ServiceFactory = Arc::new(|_, config: &ConfigMap| {
            let url = config["base-url"].as_str().unwrap_or_default().to_string();
            Ok(Arc::new(format!("remote:{url}")) as ServiceInstance)
        });
        reg2.register_service_type(
            "svc",
            ServiceTypeDef::endpoint(local, remote, ServiceTypeMeta::new(None)),
        );
        reg2.register_lazy_service("users", "svc", &[]);
        reg2.set_remote_services(
            [("users".to_string(), "http://alpha:4000".to_string())].into(),
        );
        let instance = reg2.get_service("users").unwrap();
        assert_eq!(
            *instance.downcast::<String>().unwrap(),
            "remote:http://alpha:4000"
        );
    }

    #[test]
    fn test_indirect_config_injection() {
        // cfg:@secrets.key -> configs[secrets.key] names the real key.
        let reg = Registry::new();
        let factory: ServiceFactory = Arc::new(|deps: &DepsMap, _| {
            let key: String = deps.config_value("key", None)?;
            Ok(Arc::new(key) as ServiceInstance)
        });
        reg.register_service_type("vaulted", ServiceTypeDef::local(factory));
        reg.register_lazy_service("secret-user", "vaulted", &["key:cfg:@secrets.key"]);
        reg.set_configs(
            [
                (
                    "secrets".to_string(),
                    ConfigValue::Map(
                        [("key".to_string(), ConfigValue::Str("vault.db-password".into()))].into(),
                    ),
                ),
                (
                    "vault".to_string(),
                    ConfigValue::Map(
                        [("db-password".to_string(), ConfigValue::Str("s3cret".into()))].into(),
                    ),
                ),
            ]
            .into(),
        );

        let instance = reg.get_service("secret-user").unwrap();
        assert_eq!(*instance.downcast::<String>().unwrap(), "s3cret");
    }

    #[test]
    fn test_service_named_by_config() {
        let reg = Registry::new();
        let factory: ServiceFactory = Arc::new(|deps: &DepsMap, _| {
            let dep = deps.resolve::<String>("transport")?;
            Ok(Arc::new(format!("using {dep}")) as ServiceInstance)
        });
        let leaf: ServiceFactory =
            Arc::new(|_, _| Ok(Arc::new("smtp-transport".to_string()) as ServiceInstance));
        reg.register_service_type("mailer", ServiceTypeDef::local(factory));
        reg.register_service_type("smtp", ServiceTypeDef::local(leaf));
        reg.register_lazy_service("mail", "mailer", &["transport:@app.transport"]);
        reg.register_lazy_service("smtp-main", "smtp", &[]);
        reg.set_configs(
            [(
                "app".to_string(),
                ConfigValue::Map(
                    [("transport".to_string(), ConfigValue::Str("smtp-main".into()))].into(),
                ),
            )]
            .into(),
        );

        let instance = reg.get_service("mail").unwrap();
        assert_eq!(*instance.downcast::<String>().unwrap(), "using smtp-transport");

        // Missing config key surfaces synchronously with the path.
        let reg2 = Registry::new();
        let factory: ServiceFactory = Arc::new(|_, _| Ok(Arc::new(()) as ServiceInstance));
        reg2.register_service_type("mailer", ServiceTypeDef::local(factory));
        reg2.register_lazy_service("mail", "mailer", &["transport:@app.transport"]);
        let err = reg2.get_service("mail").unwrap_err();
        assert!(err.to_string().contains("app.transport"));
    }

    #[test]
    fn test_config_overrides_layering() {
        let reg = Registry::new();
        reg.set_configs(
            [(
                "db".to_string(),
                ConfigValue::Map(
                    [
                        ("port".to_string(), ConfigValue::Int(5432)),
                        ("host".to_string(), ConfigValue::Str("localhost".into())),
                    ]
                    .into(),
                ),
            )]
            .into(),
        );
        // Deployment layer overrides one leaf; server layer another.
        reg.apply_config_overrides(
            &[("db.port".to_string(), ConfigValue::Int(6000))].into(),
        );
        reg.apply_config_overrides(
            &[(
                "db".to_string(),
                ConfigValue::Map([("host".to_string(), ConfigValue::Str("db-1".into()))].into()),
            )]
            .into(),
        );

        assert_eq!(reg.get_config("db.port"), Some(ConfigValue::Int(6000)));
        assert_eq!(
            reg.get_config("db.host"),
            Some(ConfigValue::Str("db-1".into()))
        );
    }

    #[test]
    fn test_generated_registration_skips_existing() {
        let reg = Registry::new();
        let def = ServiceDef {
            type_key: "pool".into(),
            depends_on: vec![],
            config: [("port".to_string(), serde_yaml::Value::from(7000))].into(),
            router: None,
        };
        reg.register_service_def("db", &def);
        // The annotation-derived registration must not clobber it.
        reg.register_lazy_service("db", "pool", &[]);
        assert_eq!(reg.service_type_key("db").as_deref(), Some("pool"));

        static COUNT: AtomicU32 = AtomicU32::new(0);
        reg.register_service_type("pool", ServiceTypeDef::local(pool_factory(&COUNT)));
        let pool = reg.get_service("db").unwrap().downcast::<Pool>().unwrap();
        assert_eq!(pool.port, 7000, "config-defined service kept its config");
    }

    #[test]
    fn test_replace_global_resets() {
        let fresh = Registry::new();
        fresh.register_lazy_service("marker", "t", &[]);
        let old = replace_global(fresh);
        assert!(global().has_service("marker"));
        // Restore to keep other tests oblivious.
        replace_global(old);
    }

    #[test]
    fn test_lazy_handle_memoises() {
        static COUNT: AtomicU32 = AtomicU32::new(0);
        let reg = registry_with_pool(&COUNT);
        let handle = reg.lazy_handle("db");
        assert_eq!(COUNT.load(Ordering::SeqCst), 0, "nothing runs before get");
        let a = handle.get().unwrap();
        let b = handle.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
    }
}
