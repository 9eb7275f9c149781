//! Service-type factories and metadata
//!
//! A *service type* is registered once per annotated struct (or hand-written
//! integration) and carries up to three things: the local factory, the
//! remote-proxy factory, and the routing metadata harvested at build time.
//! Which factory runs for a given service name is decided by topology alone,
//! at instantiation time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::config::value::ConfigValue;
use crate::error::Result;
use crate::registry::lazy::DepsMap;
use crate::registry::ServiceInstance;

/// Resolved configuration handed to a factory.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// A factory producing one service instance from its lazy deps and config.
pub type ServiceFactory =
    Arc<dyn Fn(&DepsMap, &ConfigMap) -> Result<ServiceInstance> + Send + Sync>;

/// One routed method: name, verb, path, per-route middleware names.
#[derive(Debug, Clone)]
pub struct RouteMeta {
    pub method_name: String,
    pub http_method: String,
    pub path: String,
    pub middlewares: Vec<String>,
}

/// An invocation thunk for one routed method: instance + JSON payload in,
/// JSON result out. Generated code materialises these so dispatch needs no
/// reflection.
pub type RouteHandler = Arc<
    dyn Fn(ServiceInstance, Option<serde_json::Value>) -> BoxFuture<'static, Result<Option<serde_json::Value>>>
        + Send
        + Sync,
>;

/// Wrap an async closure into a [`RouteHandler`].
pub fn route_handler<F, Fut>(f: F) -> RouteHandler
where
    F: Fn(ServiceInstance, Option<serde_json::Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<serde_json::Value>>> + Send + 'static,
{
    Arc::new(move |svc, payload| Box::pin(f(svc, payload)))
}

/// Routing metadata for an endpoint service type.
#[derive(Clone, Default)]
pub struct ServiceTypeMeta {
    pub path_prefix: Option<String>,
    pub middlewares: Vec<String>,
    pub routes: Vec<RouteMeta>,
    pub handlers: HashMap<String, RouteHandler>,
}

impl ServiceTypeMeta {
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            path_prefix: prefix.map(str::to_string),
            ..Default::default()
        }
    }

    /// Router-level middleware names, applied to every route.
    pub fn router_middlewares(&mut self, names: &[&str]) {
        self.middlewares = names.iter().map(|s| s.to_string()).collect();
    }

    pub fn route(&mut self, method: &str, verb: &str, path: &str, middlewares: &[&str]) {
        self.routes.push(RouteMeta {
            method_name: method.to_string(),
            http_method: verb.to_string(),
            path: path.to_string(),
            middlewares: middlewares.iter().map(|s| s.to_string()).collect(),
        });
    }

    pub fn handler(&mut self, method: &str, handler: RouteHandler) {
        self.handlers.insert(method.to_string(), handler);
    }

    pub fn find_route(&self, method: &str) -> Option<&RouteMeta> {
        self.routes.iter().find(|r| r.method_name == method)
    }
}

impl std::fmt::Debug for ServiceTypeMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTypeMeta")
            .field("path_prefix", &self.path_prefix)
            .field("middlewares", &self.middlewares)
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// The factory pair (plus metadata) registered under one service-type key.
#[derive(Clone)]
pub struct ServiceTypeDef {
    pub local: ServiceFactory,
    pub remote: Option<ServiceFactory>,
    pub meta: Option<ServiceTypeMeta>,
}

impl ServiceTypeDef {
    /// A plain service: local construction only.
    pub fn local(factory: ServiceFactory) -> Self {
        Self {
            local: factory,
            remote: None,
            meta: None,
        }
    }

    /// An endpoint service: local factory, remote-proxy factory, and the
    /// route metadata both sides share.
    pub fn endpoint(local: ServiceFactory, remote: ServiceFactory, meta: ServiceTypeMeta) -> Self {
        Self {
            local,
            remote: Some(remote),
            meta: Some(meta),
        }
    }
}

impl std::fmt::Debug for ServiceTypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTypeDef")
            .field("remote", &self.remote.is_some())
            .field("meta", &self.meta)
            .finish()
    }
}

// =============================================================================
// Middlewares
// =============================================================================

/// What a middleware gets to see before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
}

/// A middleware interceptor: inspect the request, allow or fail it.
pub type Middleware =
    Arc<dyn Fn(RequestInfo) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Builds a middleware instance from its configuration.
pub type MiddlewareFactory = Arc<dyn Fn(&ConfigMap) -> Result<Middleware> + Send + Sync>;

/// Wrap an async closure into a [`Middleware`].
pub fn middleware<F, Fut>(f: F) -> Middleware
where
    F: Fn(RequestInfo) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |info| Box::pin(f(info)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_routes() {
        let mut meta = ServiceTypeMeta::new(Some("/api/users"));
        meta.router_middlewares(&["auth"]);
        meta.route("get", "GET", "/{id}", &[]);
        meta.route("remove", "DELETE", "/{id}", &["audit"]);

        assert_eq!(meta.path_prefix.as_deref(), Some("/api/users"));
        assert_eq!(meta.find_route("get").unwrap().http_method, "GET");
        assert_eq!(meta.find_route("remove").unwrap().middlewares, vec!["audit"]);
        assert!(meta.find_route("missing").is_none());
    }

    #[tokio::test]
    async fn test_route_handler_wraps() {
        let handler = route_handler(|_svc, payload| async move {
            Ok(payload)
        });
        let svc: ServiceInstance = Arc::new(42u32);
        let out = handler(svc, Some(serde_json::json!({"a": 1}))).await.unwrap();
        assert_eq!(out, Some(serde_json::json!({"a": 1})));
    }
}
