//! The deployment document
//!
//! serde model of the YAML surface: configs, the definition maps, and the
//! server/deployment topology blocks. Field names are kebab-case on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One loaded (and merged) deployment document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RootConfig {
    #[serde(default)]
    pub configs: serde_yaml::Mapping,

    #[serde(default)]
    pub middleware_definitions: BTreeMap<String, MiddlewareDef>,

    /// `services:` is accepted as a shorthand spelling.
    #[serde(default, alias = "services")]
    pub service_definitions: BTreeMap<String, ServiceDef>,

    #[serde(default)]
    pub router_definitions: BTreeMap<String, RouterDef>,

    #[serde(default)]
    pub dbpool_definitions: BTreeMap<String, DbPoolDef>,

    #[serde(default)]
    pub external_service_definitions: BTreeMap<String, ExternalServiceDef>,

    /// Shorthand for `deployments.default.servers`.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerCfg>,

    #[serde(default)]
    pub deployments: BTreeMap<String, DeploymentCfg>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceDef {
    #[serde(rename = "type")]
    pub type_key: String,

    /// Dep-specs: `<param>:<service>`, `<service>`, `@<cfg>`, `cfg:<cfg>`,
    /// `cfg:@<cfg>`.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub config: BTreeMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub router: Option<RouterDef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouterDef {
    #[serde(default)]
    pub path_prefix: Option<String>,

    #[serde(default)]
    pub path_rewrites: BTreeMap<String, String>,

    #[serde(default)]
    pub middlewares: Vec<String>,

    /// Method names excluded from routing.
    #[serde(default)]
    pub hidden: Vec<String>,

    #[serde(default)]
    pub custom: Vec<CustomRoute>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CustomRoute {
    pub name: String,
    pub http_method: String,
    pub path: String,
    #[serde(default)]
    pub middlewares: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MiddlewareDef {
    #[serde(rename = "type")]
    pub type_key: String,
    #[serde(default)]
    pub config: BTreeMap<String, serde_yaml::Value>,
}

/// Connection-pool definition. The pool driver itself is an external
/// collaborator; this is configuration only.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DbPoolDef {
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub sslmode: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub min_conns: Option<u32>,
    #[serde(default)]
    pub max_conns: Option<u32>,
    #[serde(default)]
    pub max_idle_time: Option<String>,
    #[serde(default)]
    pub max_lifetime: Option<String>,
    #[serde(default)]
    pub rls_context: Option<String>,
}

/// A service living outside every deployment, reachable only over HTTP.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExternalServiceDef {
    pub url: String,
    pub resource: String,
    #[serde(default)]
    pub resource_plural: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerCfg {
    pub base_url: String,

    /// Helper fields: shorthand for (or a merge into) the first app.
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub routers: Vec<String>,
    #[serde(default)]
    pub published_services: Vec<String>,

    #[serde(default)]
    pub apps: Vec<AppCfg>,

    #[serde(default)]
    pub config_overrides: BTreeMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub inline_middlewares: BTreeMap<String, MiddlewareDef>,
    #[serde(default)]
    pub inline_services: BTreeMap<String, ServiceDef>,
    #[serde(default)]
    pub inline_routers: BTreeMap<String, RouterDef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AppCfg {
    pub addr: String,
    #[serde(default)]
    pub routers: Vec<String>,
    #[serde(default)]
    pub published_services: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentCfg {
    #[serde(default)]
    pub config_overrides: BTreeMap<String, serde_yaml::Value>,

    #[serde(default)]
    pub inline_middlewares: BTreeMap<String, MiddlewareDef>,
    #[serde(default)]
    pub inline_services: BTreeMap<String, ServiceDef>,
    #[serde(default)]
    pub inline_routers: BTreeMap<String, RouterDef>,

    #[serde(default)]
    pub servers: BTreeMap<String, ServerCfg>,
}

impl RootConfig {
    /// Merge another document over this one. Maps union entries with the
    /// later document overriding same-named ones; list fields inside an
    /// overridden entry are replaced wholesale with it.
    pub fn merge(&mut self, other: RootConfig) {
        for (k, v) in other.configs {
            self.configs.insert(k, v);
        }
        self.middleware_definitions.extend(other.middleware_definitions);
        self.service_definitions.extend(other.service_definitions);
        self.router_definitions.extend(other.router_definitions);
        self.dbpool_definitions.extend(other.dbpool_definitions);
        self.external_service_definitions
            .extend(other.external_service_definitions);
        self.servers.extend(other.servers);
        self.deployments.extend(other.deployments);
    }
}
