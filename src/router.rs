//! Router assembly
//!
//! For each published service, routing metadata (annotation-derived, merged
//! with any explicit router definition) becomes a [`ServiceRouter`]: full
//! paths under the effective prefix, middleware chains resolved by name, and
//! one dispatch envelope per route that feeds the service's invocation
//! thunks.
//!
//! The HTTP matcher itself is external; [`Router::axum_router`] hands the
//! assembled routes to it. When a service cannot be instantiated at
//! assembly time, a deferred build is registered instead and retried on
//! first consumption - this tolerates cycles between router construction
//! and service readiness.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{RawPathParams, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodFilter;

use crate::config::model::RouterDef;
use crate::error::{Error, Result};
use crate::registry::{
    Middleware, Registry, RequestInfo, RouteHandler, ServiceInstance, ServiceTypeMeta,
};
use crate::topology;

/// The router seam: a named set of mountable routes.
pub trait Router: Send + Sync {
    fn name(&self) -> &str;
    /// The paths this router serves, `"<VERB> <path>"`, for diagnostics.
    fn route_specs(&self) -> Vec<String>;
    /// Hand the routes to the underlying matcher.
    fn axum_router(&self) -> axum::Router;
}

pub type SharedRouter = Arc<dyn Router>;

/// One assembled route.
#[derive(Clone)]
struct BuiltRoute {
    verb: String,
    path: String,
    thunk: RouteHandler,
    instance: ServiceInstance,
    middlewares: Vec<Middleware>,
}

/// A service's routes, assembled and ready to mount.
pub struct ServiceRouter {
    name: String,
    routes: Vec<BuiltRoute>,
}

impl std::fmt::Debug for ServiceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRouter")
            .field("name", &self.name)
            .field("route_count", &self.routes.len())
            .finish()
    }
}

impl Router for ServiceRouter {
    fn name(&self) -> &str {
        &self.name
    }

    fn route_specs(&self) -> Vec<String> {
        self.routes
            .iter()
            .map(|r| format!("{} {}", r.verb, r.path))
            .collect()
    }

    fn axum_router(&self) -> axum::Router {
        let mut router = axum::Router::new();
        for route in &self.routes {
            let Some(filter) = method_filter(&route.verb) else {
                tracing::warn!(
                    target: "lokstra",
                    router = %self.name,
                    verb = %route.verb,
                    "skipping route with unsupported verb"
                );
                continue;
            };
            let built = route.clone();
            let handler = move |params: RawPathParams, req: Request| {
                let built = built.clone();
                let params: Vec<(String, String)> = params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                async move { dispatch(built, params, req).await }
            };
            router = router.route(&route.path, axum::routing::on(filter, handler));
        }
        router
    }
}

fn method_filter(verb: &str) -> Option<MethodFilter> {
    match verb {
        "GET" => Some(MethodFilter::GET),
        "POST" => Some(MethodFilter::POST),
        "PUT" => Some(MethodFilter::PUT),
        "PATCH" => Some(MethodFilter::PATCH),
        "DELETE" => Some(MethodFilter::DELETE),
        "HEAD" => Some(MethodFilter::HEAD),
        "OPTIONS" => Some(MethodFilter::OPTIONS),
        _ => None,
    }
}

// =============================================================================
// Dispatch envelope
// =============================================================================

async fn dispatch(route: BuiltRoute, params: Vec<(String, String)>, req: Request) -> Response {
    let info = RequestInfo {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    };
    for middleware in &route.middlewares {
        if let Err(err) = middleware(info.clone()).await {
            return error_response(err);
        }
    }

    let query_payload = req
        .uri()
        .query()
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == "payload")
                .map(|(_, v)| v.into_owned())
        })
        .and_then(|raw| serde_json::from_str(&raw).ok());

    let body = match axum::body::to_bytes(req.into_body(), 2 * 1024 * 1024).await {
        Ok(bytes) => bytes,
        Err(err) => return error_response(Error::runtime(err.to_string())),
    };

    // Payload precedence: body, then the `payload` query parameter, then
    // path parameters (a single parameter travels as a bare string).
    let payload = if !body.is_empty() {
        match serde_json::from_slice(&body) {
            Ok(value) => Some(value),
            Err(err) => return error_response(Error::encode(err)),
        }
    } else if query_payload.is_some() {
        query_payload
    } else if params.len() == 1 {
        Some(serde_json::Value::String(params[0].1.clone()))
    } else if !params.is_empty() {
        Some(serde_json::Value::Object(
            params
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect(),
        ))
    } else {
        None
    };

    match (route.thunk)(route.instance.clone(), payload).await {
        Ok(Some(value)) => axum::Json(value).into_response(),
        Ok(None) => axum::http::StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: Error) -> Response {
    let status = err
        .status()
        .and_then(|s| axum::http::StatusCode::from_u16(s).ok())
        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    tracing::debug!(target: "lokstra", error = %err, status = %status, "request failed");
    (status, axum::Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

// =============================================================================
// Assembly
// =============================================================================

/// Build the router for one service from its metadata and the optional
/// explicit router definition (which overrides prefix and middlewares, hides
/// methods, rewrites paths, and contributes custom routes).
pub fn build_service_router(
    registry: &Registry,
    service: &str,
    meta: &ServiceTypeMeta,
    router_def: Option<&RouterDef>,
) -> Result<ServiceRouter> {
    let instance = registry.get_service(service)?;

    let prefix = router_def
        .and_then(|d| d.path_prefix.clone())
        .or_else(|| meta.path_prefix.clone())
        .unwrap_or_default();
    let hidden: BTreeSet<&str> = router_def
        .map(|d| d.hidden.iter().map(String::as_str).collect())
        .unwrap_or_default();
    let router_mw_names: Vec<String> = match router_def {
        Some(d) if !d.middlewares.is_empty() => d.middlewares.clone(),
        _ => meta.middlewares.clone(),
    };
    let router_mws = resolve_middlewares(registry, service, &router_mw_names)?;

    let mut routes = Vec::new();
    for route in &meta.routes {
        if hidden.contains(route.method_name.as_str()) {
            continue;
        }
        let thunk = meta.handlers.get(&route.method_name).ok_or_else(|| {
            Error::wiring(
                service,
                format!("route {:?} has no invocation thunk", route.method_name),
            )
        })?;
        let path = router_def
            .and_then(|d| d.path_rewrites.get(&route.path).cloned())
            .unwrap_or_else(|| route.path.clone());
        let mut middlewares = router_mws.clone();
        middlewares.extend(resolve_middlewares(registry, service, &route.middlewares)?);
        routes.push(BuiltRoute {
            verb: route.http_method.clone(),
            path: join_path(&prefix, &path),
            thunk: Arc::clone(thunk),
            instance: instance.clone(),
            middlewares,
        });
    }
    if let Some(def) = router_def {
        for custom in &def.custom {
            let thunk = meta.handlers.get(&custom.name).ok_or_else(|| {
                Error::wiring(
                    service,
                    format!("custom route {:?} has no matching method", custom.name),
                )
            })?;
            let mut middlewares = router_mws.clone();
            middlewares.extend(resolve_middlewares(registry, service, &custom.middlewares)?);
            routes.push(BuiltRoute {
                verb: custom.http_method.to_uppercase(),
                path: join_path(&prefix, &custom.path),
                thunk: Arc::clone(thunk),
                instance: instance.clone(),
                middlewares,
            });
        }
    }

    Ok(ServiceRouter {
        name: format!("{service}-router"),
        routes,
    })
}

fn resolve_middlewares(
    registry: &Registry,
    service: &str,
    names: &[String],
) -> Result<Vec<Middleware>> {
    names
        .iter()
        .map(|name| {
            registry
                .get_middleware(name)
                .map_err(|_| Error::wiring(service, format!("unknown middleware {name:?}")))
        })
        .collect()
}

fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if path.is_empty() || path == "/" {
        if prefix.is_empty() {
            return "/".to_string();
        }
        return prefix.to_string();
    }
    if path.starts_with('/') {
        format!("{prefix}{path}")
    } else {
        format!("{prefix}/{path}")
    }
}

/// Assemble (or defer) the router of every published service on a server.
/// Returns the router names created, in app order.
pub fn assemble_routers(registry: &Registry, server: &topology::Server) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for app in &server.apps {
        for service in &app.published_services {
            let Some(type_key) = registry.service_type_key(service) else {
                return Err(Error::wiring(
                    service.clone(),
                    "published service has no definition",
                ));
            };
            let meta = registry.service_type(&type_key).and_then(|d| d.meta);
            let router_def = registry.router_def(service);
            let Some(meta) = meta else {
                // No routing metadata and no way to dispatch: not routed.
                continue;
            };
            if meta.routes.is_empty()
                && router_def.as_ref().map_or(true, |d| d.custom.is_empty())
            {
                // An endpoint service with no routes carries no router.
                continue;
            }

            let router_name = format!("{service}-router");
            match build_service_router(registry, service, &meta, router_def.as_ref()) {
                Ok(router) => {
                    tracing::debug!(
                        target: "lokstra",
                        router = %router_name,
                        routes = router.routes.len(),
                        "router assembled"
                    );
                    registry.register_router(&router_name, Arc::new(router));
                }
                Err(err) => {
                    // The service was not ready; retry on first consumption.
                    tracing::warn!(
                        target: "lokstra",
                        router = %router_name,
                        error = %err,
                        "deferring router build"
                    );
                    let registry2 = registry.clone();
                    let service2 = service.clone();
                    let meta2 = meta.clone();
                    let def2 = router_def.clone();
                    registry.register_deferred_router(
                        &router_name,
                        Arc::new(move || {
                            build_service_router(&registry2, &service2, &meta2, def2.as_ref())
                                .map(|r| Arc::new(r) as SharedRouter)
                        }),
                    );
                }
            }
            names.push(router_name);
        }
    }
    Ok(names)
}
