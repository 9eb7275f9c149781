//! Multi-file configuration loading
//!
//! Files load in the order given. Each file goes through pass 1 (external
//! providers, textual), a first parse that contributes its `configs:` block,
//! pass 2 (`@cfg:` references against everything gathered so far), and a
//! final parse into the document model. Documents merge with override
//! semantics, the server shorthand is normalized, and the result is checked
//! against the embedded schema before anything touches the registry.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::config::model::RootConfig;
use crate::config::placeholder::{resolve_pass1, resolve_pass2, ProviderRegistry};
use crate::config::value::{self, ConfigTree, ConfigValue};
use crate::error::{Error, Result};
use crate::topology;

static SCHEMA: Lazy<jsonschema::Validator> = Lazy::new(|| {
    let schema: serde_json::Value =
        serde_json::from_str(include_str!("schema.json")).expect("embedded schema is valid JSON");
    jsonschema::validator_for(&schema).expect("embedded schema compiles")
});

/// A fully loaded, merged, validated configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub root: RootConfig,
    /// Nested `configs:` tree.
    pub configs: ConfigTree,
    /// Flattened, lower-cased dot-path view of the same tree.
    pub flat_configs: BTreeMap<String, ConfigValue>,
}

/// Load and merge YAML files from disk.
pub fn load_files<P: AsRef<Path>>(paths: &[P], providers: &ProviderRegistry) -> Result<LoadedConfig> {
    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::parse(path.display().to_string(), e.to_string()))?;
        docs.push((path.display().to_string(), text));
    }
    let borrowed: Vec<(&str, &str)> = docs.iter().map(|(n, t)| (n.as_str(), t.as_str())).collect();
    load_documents(&borrowed, providers)
}

/// Load and merge YAML documents already in memory (name, text).
pub fn load_documents(docs: &[(&str, &str)], providers: &ProviderRegistry) -> Result<LoadedConfig> {
    let mut merged = RootConfig::default();
    let mut configs: ConfigTree = ConfigTree::new();

    for (name, text) in docs {
        let pass1 = resolve_pass1(text, providers);
        let mut doc: serde_yaml::Value = serde_yaml::from_str(&pass1)
            .map_err(|e| Error::parse(*name, e.to_string()))?;
        if doc.is_null() {
            continue;
        }

        // This document's configs join the pool before its own pass 2 runs,
        // so a file can reference the configs it declares.
        if let Some(map) = doc.get("configs").and_then(|c| c.as_mapping()) {
            for (k, v) in value::tree_from_yaml(map) {
                configs.insert(k, v);
            }
        }
        let flat = value::flatten(&configs);
        resolve_pass2(&mut doc, &flat)?;

        let root: RootConfig =
            serde_yaml::from_value(doc).map_err(|e| Error::parse(*name, e.to_string()))?;
        merged.merge(root);
    }

    // Refresh the tree from the merged document: pass 2 may have rewritten
    // values inside `configs:` itself.
    configs = value::tree_from_yaml(&merged.configs);
    let flat_configs = value::flatten(&configs);

    topology::apply_server_shorthand(&mut merged);
    validate(&merged)?;

    tracing::debug!(
        target: "lokstra",
        services = merged.service_definitions.len(),
        routers = merged.router_definitions.len(),
        deployments = merged.deployments.len(),
        "configuration loaded"
    );

    Ok(LoadedConfig {
        root: merged,
        configs,
        flat_configs,
    })
}

/// Schema validation plus the address checks the schema cannot express.
pub fn validate(root: &RootConfig) -> Result<()> {
    let instance =
        serde_json::to_value(root).map_err(|e| Error::validation(e.to_string()))?;
    let mut errors = SCHEMA.iter_errors(&instance).peekable();
    if errors.peek().is_some() {
        let rendered: Vec<String> = errors
            .take(5)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        return Err(Error::validation(rendered.join("; ")));
    }

    for (dep_name, deployment) in &root.deployments {
        for (server_name, server) in &deployment.servers {
            let context = format!("{dep_name}.{server_name}");
            if let Some(addr) = &server.addr {
                topology::validate_addr(addr)
                    .map_err(|m| Error::validation(format!("{context}: {m}")))?;
            }
            for app in &server.apps {
                topology::validate_addr(&app.addr)
                    .map_err(|m| Error::validation(format!("{context}: {m}")))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(docs: &[(&str, &str)]) -> Result<LoadedConfig> {
        load_documents(docs, &ProviderRegistry::new())
    }

    #[test]
    fn test_configs_survive_with_types() {
        let loaded = load(&[(
            "app.yaml",
            "configs:\n  DB_PORT: 5432\nservices:\n  db:\n    type: pool\n    config:\n      port: ${@cfg:DB_PORT}\n",
        )])
        .unwrap();
        assert_eq!(loaded.flat_configs["db_port"], ConfigValue::Int(5432));
        // The service config kept the integer through pass 2.
        let port = &loaded.root.service_definitions["db"].config["port"];
        assert_eq!(port, &serde_yaml::Value::from(5432));
    }

    #[test]
    fn test_later_file_overrides() {
        let loaded = load(&[
            (
                "base.yaml",
                "configs:\n  MODE: dev\nservices:\n  db:\n    type: pool-v1\n",
            ),
            (
                "prod.yaml",
                "configs:\n  MODE: prod\nservices:\n  db:\n    type: pool-v2\n",
            ),
        ])
        .unwrap();
        assert_eq!(loaded.flat_configs["mode"], ConfigValue::Str("prod".into()));
        assert_eq!(loaded.root.service_definitions["db"].type_key, "pool-v2");
    }

    #[test]
    fn test_cross_file_cfg_reference() {
        let loaded = load(&[
            ("one.yaml", "configs:\n  LIMIT: 10\n"),
            (
                "two.yaml",
                "services:\n  q:\n    type: queue\n    config:\n      limit: ${@cfg:LIMIT}\n",
            ),
        ])
        .unwrap();
        assert_eq!(
            loaded.root.service_definitions["q"].config["limit"],
            serde_yaml::Value::from(10)
        );
    }

    #[test]
    fn test_shorthand_becomes_default_deployment() {
        let loaded = load(&[(
            "app.yaml",
            "services:\n  db:\n    type: pool\nservers:\n  api:\n    base-url: \"http://localhost\"\n    addr: \":4000\"\n    published-services: [db]\n",
        )])
        .unwrap();
        let dep = &loaded.root.deployments["default"];
        let api = &dep.servers["api"];
        assert_eq!(api.apps.len(), 1);
        assert_eq!(api.apps[0].addr, ":4000");
        assert_eq!(api.apps[0].published_services, vec!["db"]);
        assert!(loaded.root.servers.is_empty());
    }

    #[test]
    fn test_bad_service_name_rejected() {
        let err = load(&[(
            "app.yaml",
            "services:\n  BadName:\n    type: pool\n",
        )])
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }), "got {err}");
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let err = load(&[(
            "app.yaml",
            "deployments:\n  dev:\n    servers:\n      api:\n        base-url: \"ftp://x\"\n        addr: \":4000\"\n",
        )])
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        let err = load(&[(
            "app.yaml",
            "deployments:\n  dev:\n    servers:\n      api:\n        base-url: \"http://x\"\n        addr: \":99999\"\n",
        )])
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_yaml_error_names_file() {
        let err = load(&[("broken.yaml", "configs: [not: a map\n")]).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
