//! Server runner
//!
//! Drives one `<deployment>.<server>` selection from a loaded configuration
//! to listening sockets: lift that scope's inline definitions, register
//! definitions and middlewares, force-instantiate the published services and
//! their transitive dependencies (so wiring errors surface before any
//! listener opens), assemble routers, bind each app's address, and serve
//! until the shutdown signal. Shutdown stops accepting, drains in-flight
//! requests, and releases services in reverse instantiation order.

use std::future::Future;

use tokio::sync::watch;

use crate::config::model::MiddlewareDef;
use crate::config::LoadedConfig;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::router::assemble_routers;
use crate::topology::{self, Server};

/// Split a `<deployment>.<server>` selector.
pub fn parse_selector(selector: &str) -> Result<(&str, &str)> {
    match selector.split_once('.') {
        Some((deployment, server)) if !deployment.is_empty() && !server.is_empty() => {
            Ok((deployment, server))
        }
        _ => Err(Error::parse(
            selector,
            "selector must be <deployment>.<server>",
        )),
    }
}

/// Register the runtime definitions for one server selection and eagerly
/// instantiate everything it publishes. Returns the normalized server
/// topology; no listener is opened.
pub fn prepare(registry: &Registry, loaded: &LoadedConfig, selector: &str) -> Result<Server> {
    let (dep_name, server_name) = parse_selector(selector)?;
    let full = topology::build(&loaded.root)?;
    let deployment = full
        .deployment(dep_name)
        .ok_or_else(|| Error::wiring(dep_name, "no such deployment"))?;
    let mut server = deployment
        .servers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(server_name))
        .map(|(_, v)| v.clone())
        .ok_or_else(|| Error::wiring(selector, "no such server in deployment"))?;

    // Configs, with the deployment layer under the server layer.
    registry.set_configs(loaded.configs.clone());
    registry.apply_config_overrides(&deployment.config_overrides);
    registry.apply_config_overrides(&server.config_overrides);

    // Global definitions.
    for (name, def) in &loaded.root.service_definitions {
        registry.register_service_def(name, def);
    }
    for (name, def) in &loaded.root.router_definitions {
        registry.register_router_def(name, def);
    }
    for (name, def) in &loaded.root.external_service_definitions {
        // External services resolve through the generic remote machinery:
        // their URL is a fixed remote location.
        let service_def = crate::config::model::ServiceDef {
            type_key: "external-service".to_string(),
            depends_on: vec![],
            config: [
                ("remote".to_string(), serde_yaml::Value::from(def.url.clone())),
                (
                    "resource".to_string(),
                    serde_yaml::Value::from(def.resource.clone()),
                ),
            ]
            .into(),
            router: None,
        };
        registry.register_service_def(name, &service_def);
    }
    register_middleware_defs(registry, loaded.root.middleware_definitions.iter())?;

    // Lazy inline-definition normalization: the only place scoped names are
    // minted.
    let scope = topology::normalize_scope(deployment, &mut server);
    for (name, def) in &scope.services {
        registry.register_service_def(name, def);
    }
    for (name, def) in &scope.routers {
        registry.register_router_def(name, def);
    }
    register_middleware_defs(registry, scope.middlewares.iter())?;

    registry.set_remote_services(server.remote_services.clone());

    // Force-instantiate every local service; topological problems surface
    // here, synchronously, before any listener exists.
    let mut instantiated = Vec::new();
    for service in &server.services {
        let type_key = registry.service_type_key(service).ok_or_else(|| {
            Error::wiring(service.clone(), "service has no definition or registration")
        })?;
        if registry.service_type(&type_key).is_none() {
            return Err(Error::dependency(
                service.clone(),
                format!("no factory registered for service type {type_key:?}"),
            ));
        }
        registry.get_service(service)?;
        instantiated.push(service.clone());
    }
    tracing::info!(
        target: "lokstra",
        deployment = dep_name,
        server = server_name,
        services = instantiated.len(),
        remotes = server.remote_services.len(),
        "services instantiated"
    );

    assemble_routers(registry, &server)?;
    Ok(server)
}

fn register_middleware_defs<'a>(
    registry: &Registry,
    defs: impl Iterator<Item = (&'a String, &'a MiddlewareDef)>,
) -> Result<()> {
    for (name, def) in defs {
        let factory = registry.middleware_type(&def.type_key).ok_or_else(|| {
            Error::wiring(
                name.clone(),
                format!("no factory registered for middleware type {:?}", def.type_key),
            )
        })?;
        let config = def
            .config
            .iter()
            .map(|(k, v)| (k.clone(), crate::config::value::ConfigValue::from_yaml(v)))
            .collect();
        let mw = factory(&config)?;
        registry.register_middleware(name, mw);
    }
    Ok(())
}

/// Serve a `<deployment>.<server>` selection until ctrl-c.
pub async fn serve(registry: Registry, loaded: LoadedConfig, selector: &str) -> Result<()> {
    serve_with_shutdown(registry, loaded, selector, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

/// Serve until the given future completes; then stop accepting, drain, and
/// release.
pub async fn serve_with_shutdown<F>(
    registry: Registry,
    loaded: LoadedConfig,
    selector: &str,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server = prepare(&registry, &loaded, selector)?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown.await;
        let _ = tx.send(true);
    });

    let mut tasks = tokio::task::JoinSet::new();
    let mut bound = 0usize;
    for app in &server.apps {
        let mut app_router = axum::Router::new();
        let mut mounted = 0usize;

        // Explicit routers first, then the published services' own routers.
        let mut names: Vec<String> = app.routers.clone();
        for service in &app.published_services {
            let conventional = format!("{service}-router");
            if !names.contains(&conventional) {
                names.push(conventional);
            }
        }
        for name in &names {
            match registry.get_router(name) {
                Ok(router) => {
                    app_router = app_router.merge(router.axum_router());
                    mounted += 1;
                }
                Err(err) => {
                    if app.routers.contains(name) {
                        // Explicitly configured and absent: wiring error.
                        return Err(err);
                    }
                    // A published service without routes has no router.
                    tracing::debug!(target: "lokstra", router = %name, "no router to mount");
                }
            }
        }

        tracing::info!(
            target: "lokstra",
            addr = %app.addr,
            routers = mounted,
            "starting app listener"
        );

        let mut rx = rx.clone();
        let graceful = async move {
            let _ = rx.changed().await;
        };

        if let Some(path) = app.addr.strip_prefix("unix:") {
            let _ = std::fs::remove_file(path);
            match tokio::net::UnixListener::bind(path) {
                Ok(listener) => {
                    let make = app_router.into_make_service();
                    tasks.spawn(async move {
                        axum::serve(listener, make)
                            .with_graceful_shutdown(graceful)
                            .await
                            .map_err(|e| Error::runtime(e.to_string()))
                    });
                    bound += 1;
                }
                Err(err) => {
                    tracing::error!(target: "lokstra", addr = %app.addr, error = %err, "bind failed");
                }
            }
            continue;
        }

        let addr = if app.addr.starts_with(':') {
            format!("0.0.0.0{}", app.addr)
        } else {
            app.addr.clone()
        };
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                let make = app_router.into_make_service();
                tasks.spawn(async move {
                    axum::serve(listener, make)
                        .with_graceful_shutdown(graceful)
                        .await
                        .map_err(|e| Error::runtime(e.to_string()))
                });
                bound += 1;
            }
            Err(err) => {
                // Fatal for this app only; siblings keep serving.
                tracing::error!(target: "lokstra", addr = %addr, error = %err, "bind failed");
            }
        }
    }

    if bound == 0 && !server.apps.is_empty() {
        return Err(Error::runtime("no app listener could be bound"));
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(target: "lokstra", error = %err, "listener failed"),
            Err(err) => tracing::error!(target: "lokstra", error = %err, "listener task panicked"),
        }
    }

    // Drained. Resources release in reverse instantiation order as the
    // registry's references drop.
    for service in server.services.iter().rev() {
        tracing::debug!(target: "lokstra", service = %service, "releasing");
    }
    tracing::info!(target: "lokstra", selector, "server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_documents;
    use crate::config::value::ConfigValue;
    use crate::config::ProviderRegistry;
    use crate::registry::{
        route_handler, ConfigMap, DepsMap, ServiceFactory, ServiceInstance, ServiceTypeDef,
        ServiceTypeMeta,
    };
    use std::sync::Arc;

    #[derive(Debug)]
    struct Pool {
        config: ConfigMap,
    }

    fn register_pool_type(reg: &Registry) {
        let factory: ServiceFactory = Arc::new(|_: &DepsMap, config: &ConfigMap| {
            Ok(Arc::new(Pool {
                config: config.clone(),
            }) as ServiceInstance)
        });
        reg.register_service_type("pool", ServiceTypeDef::local(factory));
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(parse_selector("dev.api").unwrap(), ("dev", "api"));
        assert!(parse_selector("dev").is_err());
        assert!(parse_selector(".api").is_err());
    }

    #[test]
    fn test_config_reaches_service_with_source_types() {
        // Load, start dev.api, and observe the typed config in the instance.
        let loaded = load_documents(
            &[(
                "app.yaml",
                r#"
configs:
  DB_PORT: 5432
services:
  db:
    type: pool
    config:
      port: ${@cfg:DB_PORT}
deployments:
  dev:
    servers:
      api:
        base-url: "http://localhost"
        addr: ":4000"
        published-services: ["db"]
"#,
            )],
            &ProviderRegistry::new(),
        )
        .unwrap();

        let reg = Registry::new();
        register_pool_type(&reg);
        let server = prepare(&reg, &loaded, "dev.api").unwrap();
        assert_eq!(server.services, vec!["db"]);

        let pool = reg
            .get_service("db")
            .unwrap()
            .downcast::<Pool>()
            .unwrap();
        assert_eq!(pool.config["port"], ConfigValue::Int(5432));
    }

    fn two_server_doc() -> &'static str {
        r#"
service-definitions:
  a:
    type: svc-a
    depends-on: ["b"]
  b:
    type: svc-b
deployments:
  dev:
    servers:
      alpha:
        base-url: "http://alpha"
        addr: ":4000"
        published-services: [a]
      beta:
        base-url: "http://beta"
        addr: ":5000"
        published-services: [b]
"#
    }

    fn register_ab_types(reg: &Registry) {
        let a: ServiceFactory = Arc::new(|deps: &DepsMap, _| {
            // Holds the lazy handle; resolution happens on demand.
            let handle = deps.handle("b")?;
            Ok(Arc::new(handle) as ServiceInstance)
        });
        reg.register_service_type("svc-a", ServiceTypeDef::local(a));

        let b_local: ServiceFactory =
            Arc::new(|_, _| Ok(Arc::new("b-local".to_string()) as ServiceInstance));
        let b_remote: ServiceFactory = Arc::new(|_, config: &ConfigMap| {
            let url = config["base-url"].as_str().unwrap_or_default().to_string();
            Ok(Arc::new(format!("b-remote:{url}")) as ServiceInstance)
        });
        reg.register_service_type(
            "svc-b",
            ServiceTypeDef::endpoint(b_local, b_remote, ServiceTypeMeta::new(None)),
        );
    }

    #[test]
    fn test_local_vs_remote_by_selector() {
        let providers = ProviderRegistry::new();
        let loaded = load_documents(&[("t.yaml", two_server_doc())], &providers).unwrap();

        // On alpha, b resolves to the remote proxy at beta's location.
        let reg = Registry::new();
        register_ab_types(&reg);
        prepare(&reg, &loaded, "dev.alpha").unwrap();
        assert_eq!(
            reg.remote_service_url("b").as_deref(),
            Some("http://beta:5000")
        );
        let b = reg.get_service("b").unwrap().downcast::<String>().unwrap();
        assert_eq!(*b, "b-remote:http://beta:5000");

        // Same definitions, beta selector: b is local.
        let reg = Registry::new();
        register_ab_types(&reg);
        prepare(&reg, &loaded, "dev.beta").unwrap();
        let b = reg.get_service("b").unwrap().downcast::<String>().unwrap();
        assert_eq!(*b, "b-local");
    }

    #[test]
    fn test_unknown_server_is_wiring_error() {
        let loaded = load_documents(
            &[("t.yaml", two_server_doc())],
            &ProviderRegistry::new(),
        )
        .unwrap();
        let reg = Registry::new();
        register_ab_types(&reg);
        let err = prepare(&reg, &loaded, "dev.gamma").unwrap_err();
        assert!(matches!(err, Error::Wiring { .. }));
    }

    #[test]
    fn test_missing_factory_fails_at_start() {
        let loaded = load_documents(
            &[("t.yaml", two_server_doc())],
            &ProviderRegistry::new(),
        )
        .unwrap();
        let reg = Registry::new();
        // svc-a registered, svc-b deliberately not.
        let a: ServiceFactory = Arc::new(|_, _| Ok(Arc::new(()) as ServiceInstance));
        reg.register_service_type("svc-a", ServiceTypeDef::local(a));
        let err = prepare(&reg, &loaded, "dev.beta").unwrap_err();
        assert!(err.to_string().contains("svc-b"));
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn users_endpoint_type(reg: &Registry) {
        let mut meta = ServiceTypeMeta::new(Some("/api/users"));
        meta.route("get", "GET", "/{id}", &[]);
        meta.handler(
            "get",
            route_handler(|_svc, payload| async move { Ok(payload) }),
        );
        let factory: ServiceFactory = Arc::new(|_, _| Ok(Arc::new(()) as ServiceInstance));
        reg.register_service_type(
            "user-service",
            ServiceTypeDef::endpoint(factory.clone(), factory, meta),
        );
        reg.register_lazy_service("users", "user-service", &[]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_published_service_is_auto_routed() {
        let port = free_port();
        let doc = format!(
            r#"
deployments:
  dev:
    servers:
      api:
        base-url: "http://127.0.0.1"
        addr: "127.0.0.1:{port}"
        published-services: [users]
"#
        );
        let loaded =
            load_documents(&[("t.yaml", doc.as_str())], &ProviderRegistry::new()).unwrap();
        let reg = Registry::new();
        users_endpoint_type(&reg);

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serve_task = tokio::spawn(serve_with_shutdown(
            reg,
            loaded,
            "dev.api",
            async move {
                let _ = stop_rx.await;
            },
        ));

        // The route derives from the annotation metadata: prefix + path.
        let url = format!("http://127.0.0.1:{port}/api/users/42");
        let mut body = None;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if let Ok(resp) = reqwest::get(&url).await {
                assert_eq!(resp.status().as_u16(), 200);
                body = Some(resp.text().await.unwrap());
                break;
            }
        }
        // The single path parameter arrived as the method's argument.
        assert_eq!(body.as_deref(), Some("\"42\""));

        let _ = stop_tx.send(());
        serve_task.await.unwrap().unwrap();
    }
}
