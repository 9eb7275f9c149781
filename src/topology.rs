//! Topology: deployments, servers, apps
//!
//! Translates the validated document into the in-memory topology the runner
//! consumes. Three concerns live here:
//!
//! * **Server shorthand** - a top-level `servers:` block is reinterpreted as
//!   `deployments.default.servers`, and per-server helper fields (`addr`,
//!   `routers`, `published-services`) fold into the apps list.
//! * **Materialization** - per deployment, the service-location map
//!   (published service -> publishing server's `base-url` + `addr`) and, per
//!   server, the local-service set (published services plus transitive
//!   dependencies) and the remote-service map.
//! * **Inline scoping** - deployment- and server-scoped inline definitions
//!   are lifted into globally unique names (`<deployment>.<name>`,
//!   `<deployment>.<server>.<name>`) through a single renaming table, applied
//!   lazily just before a server starts.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::model::{
    MiddlewareDef, RootConfig, RouterDef, ServerCfg, ServiceDef,
};
use crate::config::value::{ConfigTree, ConfigValue};
use crate::error::Result;
use crate::registry::lazy::DepSpec;

// =============================================================================
// Materialized topology
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub deployments: BTreeMap<String, Deployment>,
}

#[derive(Debug, Clone, Default)]
pub struct Deployment {
    pub name: String,
    pub config_overrides: ConfigTree,
    /// Published service name -> `<base-url><addr>` of its publishing server.
    pub locations: BTreeMap<String, String>,
    pub inline_middlewares: BTreeMap<String, MiddlewareDef>,
    pub inline_services: BTreeMap<String, ServiceDef>,
    pub inline_routers: BTreeMap<String, RouterDef>,
    pub servers: BTreeMap<String, Server>,
}

#[derive(Debug, Clone, Default)]
pub struct Server {
    pub name: String,
    pub base_url: String,
    pub config_overrides: ConfigTree,
    /// Services instantiated locally: the apps' published services plus
    /// their transitive dependencies.
    pub services: Vec<String>,
    /// Dependencies published by another server of the same deployment,
    /// with the base URL they are reachable at.
    pub remote_services: BTreeMap<String, String>,
    pub inline_middlewares: BTreeMap<String, MiddlewareDef>,
    pub inline_services: BTreeMap<String, ServiceDef>,
    pub inline_routers: BTreeMap<String, RouterDef>,
    pub apps: Vec<App>,
}

#[derive(Debug, Clone, Default)]
pub struct App {
    pub addr: String,
    pub routers: Vec<String>,
    pub published_services: Vec<String>,
}

impl Topology {
    pub fn deployment(&self, name: &str) -> Option<&Deployment> {
        self.deployments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

// =============================================================================
// Shorthand normalization
// =============================================================================

/// Reinterpret top-level `servers:` as `deployments.default.servers` and fold
/// helper fields into the apps list. Runs after merging, before validation.
pub fn apply_server_shorthand(root: &mut RootConfig) {
    if !root.servers.is_empty() {
        let servers = std::mem::take(&mut root.servers);
        let deployment = root.deployments.entry("default".to_string()).or_default();
        for (name, server) in servers {
            deployment.servers.entry(name).or_insert(server);
        }
    }
    for deployment in root.deployments.values_mut() {
        for server in deployment.servers.values_mut() {
            normalize_helper_fields(server);
        }
    }
}

fn normalize_helper_fields(server: &mut ServerCfg) {
    let routers = std::mem::take(&mut server.routers);
    let published = std::mem::take(&mut server.published_services);
    if let Some(addr) = server.addr.take() {
        // Helper fields with an addr become a new app, prepended.
        server.apps.insert(
            0,
            crate::config::model::AppCfg {
                addr,
                routers,
                published_services: published,
            },
        );
        return;
    }
    if routers.is_empty() && published.is_empty() {
        return;
    }
    // No addr: helper fields merge into the first app.
    if let Some(first) = server.apps.first_mut() {
        merge_dedup(&mut first.routers, routers);
        merge_dedup(&mut first.published_services, published);
    }
}

/// Append `extra` entries not already present, preserving order.
fn merge_dedup(into: &mut Vec<String>, extra: Vec<String>) {
    for item in extra {
        if !into.iter().any(|x| x.eq_ignore_ascii_case(&item)) {
            into.push(item);
        }
    }
}

/// Address grammar: `:PORT`, `HOST:PORT`, or `unix:/path`, ports 1..=65535.
pub fn validate_addr(addr: &str) -> std::result::Result<(), String> {
    if let Some(path) = addr.strip_prefix("unix:") {
        if path.starts_with('/') {
            return Ok(());
        }
        return Err(format!("unix socket address must carry an absolute path: {addr:?}"));
    }
    let Some((_, port)) = addr.rsplit_once(':') else {
        return Err(format!("address must be :PORT, HOST:PORT, or unix:/path: {addr:?}"));
    };
    match port.parse::<u32>() {
        Ok(p) if (1..=65535).contains(&p) => Ok(()),
        Ok(p) => Err(format!("port out of range: {p}")),
        Err(_) => Err(format!("invalid port in address: {addr:?}")),
    }
}

// =============================================================================
// Materialization
// =============================================================================

/// Build the topology for a validated, shorthand-normalized document.
pub fn build(root: &RootConfig) -> Result<Topology> {
    let mut topology = Topology::default();

    for (dep_name, dep_cfg) in &root.deployments {
        let mut deployment = Deployment {
            name: dep_name.clone(),
            config_overrides: overrides_tree(&dep_cfg.config_overrides),
            inline_middlewares: dep_cfg.inline_middlewares.clone(),
            inline_services: dep_cfg.inline_services.clone(),
            inline_routers: dep_cfg.inline_routers.clone(),
            ..Default::default()
        };

        // Location map first: who publishes what, and where.
        for server_cfg in dep_cfg.servers.values() {
            for app in &server_cfg.apps {
                for svc in &app.published_services {
                    deployment.locations.insert(
                        svc.to_lowercase(),
                        format!("{}{}", server_cfg.base_url, app.addr),
                    );
                }
            }
        }

        for (server_name, server_cfg) in &dep_cfg.servers {
            let server = materialize_server(root, dep_cfg, &deployment, server_name, server_cfg)?;
            deployment.servers.insert(server_name.clone(), server);
        }
        topology.deployments.insert(dep_name.clone(), deployment);
    }
    Ok(topology)
}

fn overrides_tree(map: &BTreeMap<String, serde_yaml::Value>) -> ConfigTree {
    map.iter()
        .map(|(k, v)| (k.clone(), ConfigValue::from_yaml(v)))
        .collect()
}

fn materialize_server(
    root: &RootConfig,
    dep_cfg: &crate::config::model::DeploymentCfg,
    deployment: &Deployment,
    server_name: &str,
    server_cfg: &ServerCfg,
) -> Result<Server> {
    let apps: Vec<App> = server_cfg
        .apps
        .iter()
        .map(|a| App {
            addr: a.addr.clone(),
            routers: a.routers.clone(),
            published_services: a.published_services.clone(),
        })
        .collect();

    // Published services of this server, lower-cased.
    let own_published: BTreeSet<String> = apps
        .iter()
        .flat_map(|a| a.published_services.iter())
        .map(|s| s.to_lowercase())
        .collect();

    let find_def = |name: &str| -> Option<&ServiceDef> {
        lookup_ci(&server_cfg.inline_services, name)
            .or_else(|| lookup_ci(&dep_cfg.inline_services, name))
            .or_else(|| lookup_ci(&root.service_definitions, name))
    };

    // Walk published services through their transitive dependencies.
    let mut local: Vec<String> = Vec::new();
    let mut remote: BTreeMap<String, String> = BTreeMap::new();
    let mut queue: VecDeque<String> = own_published.iter().cloned().collect();
    let mut seen: BTreeSet<String> = own_published.clone();

    while let Some(name) = queue.pop_front() {
        local.push(name.clone());
        let Some(def) = find_def(&name) else {
            // Unknown published service is a wiring error at server start,
            // not here; generated registrations may still provide it.
            continue;
        };
        for spec in &def.depends_on {
            let parsed = DepSpec::parse(spec);
            let Some(service) = parsed.service_name() else {
                continue;
            };
            let service = service.to_lowercase();
            if seen.contains(&service) {
                continue;
            }
            seen.insert(service.clone());
            if !own_published.contains(&service) {
                if let Some(location) = deployment.locations.get(&service) {
                    // Published by a sibling server: reach it over HTTP.
                    remote.insert(service, location.clone());
                    continue;
                }
            }
            queue.push_back(service);
        }
    }

    Ok(Server {
        name: server_name.to_string(),
        base_url: server_cfg.base_url.clone(),
        config_overrides: overrides_tree(&server_cfg.config_overrides),
        services: local,
        remote_services: remote,
        inline_middlewares: server_cfg.inline_middlewares.clone(),
        inline_services: server_cfg.inline_services.clone(),
        inline_routers: server_cfg.inline_routers.clone(),
        apps,
    })
}

fn lookup_ci<'a, V>(map: &'a BTreeMap<String, V>, name: &str) -> Option<&'a V> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

// =============================================================================
// Inline-definition scoping
// =============================================================================

/// The result of lifting a deployment/server scope: the renaming table and
/// the scoped definitions to register globally.
#[derive(Debug, Default)]
pub struct ScopeNormalization {
    /// lower-cased short name -> scoped name
    pub renames: BTreeMap<String, String>,
    pub services: BTreeMap<String, ServiceDef>,
    pub middlewares: BTreeMap<String, MiddlewareDef>,
    pub routers: BTreeMap<String, RouterDef>,
}

impl ScopeNormalization {
    /// Rewrite one reference through the table (case-insensitive). Names not
    /// in the table pass through unchanged.
    pub fn rename(&self, name: &str) -> String {
        self.renames
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn rename_all(&self, names: &mut [String]) {
        for name in names {
            *name = self.rename(name);
        }
    }

    fn rewrite_service_def(&self, def: &mut ServiceDef) {
        for spec in &mut def.depends_on {
            let parsed = DepSpec::parse(spec);
            if let Some(service) = parsed.service_name() {
                let renamed = self.rename(service);
                if renamed != service {
                    *spec = parsed.with_service_name(&renamed);
                }
            }
        }
        if let Some(router) = &mut def.router {
            self.rename_all(&mut router.middlewares);
        }
    }
}

/// Lift a deployment's and one server's inline definitions into scoped
/// global names and rewrite every reference in that server's topology.
///
/// This runs lazily, exactly once, for the `<deployment>.<server>` being
/// started; the server's own inline names override the deployment's on clash.
pub fn normalize_scope(deployment: &Deployment, server: &mut Server) -> ScopeNormalization {
    let mut scope = ScopeNormalization::default();

    let dep_prefix = deployment.name.to_lowercase();
    let server_prefix = format!("{dep_prefix}.{}", server.name.to_lowercase());

    for name in deployment.inline_middlewares.keys() {
        scope
            .renames
            .insert(name.to_lowercase(), format!("{dep_prefix}.{}", name.to_lowercase()));
    }
    for name in deployment.inline_services.keys() {
        scope
            .renames
            .insert(name.to_lowercase(), format!("{dep_prefix}.{}", name.to_lowercase()));
    }
    for name in deployment.inline_routers.keys() {
        scope
            .renames
            .insert(name.to_lowercase(), format!("{dep_prefix}.{}", name.to_lowercase()));
    }
    // Server scope overrides deployment scope on clash.
    for name in server.inline_middlewares.keys() {
        scope
            .renames
            .insert(name.to_lowercase(), format!("{server_prefix}.{}", name.to_lowercase()));
    }
    for name in server.inline_services.keys() {
        scope
            .renames
            .insert(name.to_lowercase(), format!("{server_prefix}.{}", name.to_lowercase()));
    }
    for name in server.inline_routers.keys() {
        scope
            .renames
            .insert(name.to_lowercase(), format!("{server_prefix}.{}", name.to_lowercase()));
    }

    // Scoped copies of the definitions, internal references rewritten
    // through the same table.
    for (name, def) in &deployment.inline_middlewares {
        scope
            .middlewares
            .insert(scope.rename(name), def.clone());
    }
    for (name, def) in &server.inline_middlewares {
        scope
            .middlewares
            .insert(scope.rename(name), def.clone());
    }
    for (name, def) in deployment
        .inline_services
        .iter()
        .chain(server.inline_services.iter())
    {
        let mut def = def.clone();
        scope.rewrite_service_def(&mut def);
        scope.services.insert(scope.rename(name), def);
    }
    for (name, def) in deployment
        .inline_routers
        .iter()
        .chain(server.inline_routers.iter())
    {
        let mut def = def.clone();
        scope.rename_all(&mut def.middlewares);
        scope.routers.insert(scope.rename(name), def);
    }

    // Rewrite the server's own topology through the table.
    scope.rename_all(&mut server.services);
    for app in &mut server.apps {
        scope.rename_all(&mut app.published_services);
        scope.rename_all(&mut app.routers);
    }
    server.remote_services = std::mem::take(&mut server.remote_services)
        .into_iter()
        .map(|(k, v)| (scope.rename(&k), v))
        .collect();

    tracing::debug!(
        target: "lokstra",
        deployment = %deployment.name,
        server = %server.name,
        renamed = scope.renames.len(),
        "inline definitions lifted"
    );
    scope
}
