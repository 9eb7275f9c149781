//! Build-time service records
//!
//! [`ServiceGeneration`] is the bridge between the annotation lexer and the
//! code generator: one record per annotated struct, carrying everything the
//! generator needs to emit factories, remote proxies, and registration.

use std::collections::BTreeMap;

use crate::annotation::{ParsedAnnotation, TargetKind, Value};
use crate::error::{GenError, Result};
use crate::source::SourceInfo;

/// How a dependency field is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    /// A service, referenced by name.
    Direct,
    /// `@key` - the config at `key` names the service.
    IndirectService,
    /// `cfg:key` - a configured value, not a service.
    ConfigValue,
    /// `cfg:@key` - the config at `key` names a second config key.
    IndirectConfig,
}

/// One `@Inject` binding on a struct field.
#[derive(Debug, Clone)]
pub struct DepBinding {
    pub field_name: String,
    pub field_type: String,
    pub kind: DepKind,
    /// Service name or config key, depending on `kind`.
    pub target: String,
    pub default: Option<String>,
}

impl DepBinding {
    /// The dep-spec string handed to the registry (`field:target` with the
    /// kind prefix preserved).
    pub fn spec(&self) -> String {
        let target = match self.kind {
            DepKind::Direct => self.target.clone(),
            DepKind::IndirectService => format!("@{}", self.target),
            DepKind::ConfigValue => format!("cfg:{}", self.target),
            DepKind::IndirectConfig => format!("cfg:@{}", self.target),
        };
        format!("{}:{}", self.field_name, target)
    }
}

/// The signature shape of a routed method.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub param_name: Option<String>,
    pub param_type: Option<String>,
    pub return_type: Option<String>,
    pub has_data: bool,
    pub is_async: bool,
}

/// Everything the generator needs for one annotated struct.
#[derive(Debug, Clone)]
pub struct ServiceGeneration {
    pub service_name: String,
    pub struct_name: String,
    pub remote_type_name: String,
    pub source_file: String,
    pub is_endpoint_service: bool,
    pub path_prefix: Option<String>,
    pub router_middlewares: Vec<String>,
    /// method name -> "<VERB> <PATH>"
    pub routes: BTreeMap<String, String>,
    pub route_middlewares: BTreeMap<String, Vec<String>>,
    pub methods: BTreeMap<String, MethodSig>,
    /// In declaration order of the struct fields.
    pub deps: Vec<DepBinding>,
    pub has_init: bool,
    pub init_returns_error: bool,
    /// True when the struct has fields beyond the injected ones; those are
    /// filled from `Default::default()` by the generated factory.
    pub has_unbound_fields: bool,
    /// alias -> path, harvested from the source file's `use` lines.
    pub imports: BTreeMap<String, String>,
}

/// Assemble the generation records for one source file.
pub fn collect(
    file: &str,
    annotations: &[ParsedAnnotation],
    info: &SourceInfo,
) -> Result<Vec<ServiceGeneration>> {
    let imports: BTreeMap<String, String> = info
        .uses
        .iter()
        .map(|u| (u.alias.clone(), u.path.clone()))
        .collect();

    let mut generations: BTreeMap<String, ServiceGeneration> = BTreeMap::new();

    for ann in annotations {
        let is_endpoint = ann.name == "EndpointService";
        if !is_endpoint && ann.name != "Service" {
            continue;
        }
        if ann.target_kind != Some(TargetKind::Type) || !info.structs.contains_key(&ann.target_name)
        {
            return Err(GenError::invalid_target(
                file,
                ann.line,
                &ann.target_name,
                format!("@{} must be attached to a struct declaration", ann.name),
            ));
        }
        let expected: &[&str] = if is_endpoint {
            &["name", "prefix", "middlewares"]
        } else {
            &["name"]
        };
        let args = ann.read_args(file, expected)?;
        let service_name = args
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GenError::parse(file, ann.line, format!("@{}: missing service name", ann.name))
            })?;

        let struct_name = ann.target_name.clone();
        let init = info.init_method(&struct_name);
        generations.insert(
            struct_name.clone(),
            ServiceGeneration {
                service_name,
                remote_type_name: format!("{struct_name}Remote"),
                struct_name,
                source_file: file.to_string(),
                is_endpoint_service: is_endpoint,
                path_prefix: args
                    .get("prefix")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                router_middlewares: args
                    .get("middlewares")
                    .and_then(Value::as_list)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default(),
                routes: BTreeMap::new(),
                route_middlewares: BTreeMap::new(),
                methods: BTreeMap::new(),
                deps: Vec::new(),
                has_init: init.is_some(),
                init_returns_error: init.is_some_and(|m| m.returns_result),
                has_unbound_fields: false,
                imports: imports.clone(),
            },
        );
    }

    for ann in annotations {
        match ann.name.as_str() {
            "Inject" => attach_inject(file, ann, info, &mut generations)?,
            "Route" => attach_route(file, ann, info, &mut generations)?,
            _ => {}
        }
    }

    // Deps in field-declaration order, regardless of annotation order.
    for generation in generations.values_mut() {
        if let Some(s) = info.structs.get(&generation.struct_name) {
            let order: Vec<&str> = s.fields.iter().map(|f| f.name.as_str()).collect();
            generation
                .deps
                .sort_by_key(|d| order.iter().position(|n| *n == d.field_name));
            generation.has_unbound_fields = s.fields.len() > generation.deps.len();
        }
    }

    Ok(generations.into_values().collect())
}

fn attach_inject(
    file: &str,
    ann: &ParsedAnnotation,
    info: &SourceInfo,
    generations: &mut BTreeMap<String, ServiceGeneration>,
) -> Result<()> {
    if ann.target_kind != Some(TargetKind::Field) {
        return Err(GenError::invalid_target(
            file,
            ann.line,
            &ann.target_name,
            "@Inject must be attached to a struct field",
        ));
    }
    let args = ann.read_args(file, &["target", "default"])?;
    let target = args
        .get("target")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GenError::parse(file, ann.line, "@Inject: missing target"))?;
    let default = args
        .get("default")
        .and_then(Value::as_str)
        .map(str::to_string);

    // The owning struct is the one whose field declaration follows the
    // annotation most closely.
    let owner = info
        .structs
        .values()
        .filter_map(|s| {
            s.fields
                .iter()
                .find(|f| f.name == ann.target_name && f.line > ann.line)
                .map(|f| (s.name.clone(), f.ty.clone(), f.line))
        })
        .min_by_key(|(_, _, line)| *line);
    let Some((struct_name, field_type, _)) = owner else {
        return Err(GenError::invalid_target(
            file,
            ann.line,
            &ann.target_name,
            "@Inject field not found in any struct",
        ));
    };
    let Some(generation) = generations.get_mut(&struct_name) else {
        // Injects on unannotated structs are inert.
        return Ok(());
    };

    let (kind, key) = if let Some(rest) = target.strip_prefix("cfg:@") {
        (DepKind::IndirectConfig, rest.to_string())
    } else if let Some(rest) = target.strip_prefix("cfg:") {
        (DepKind::ConfigValue, rest.to_string())
    } else if let Some(rest) = target.strip_prefix('@') {
        (DepKind::IndirectService, rest.to_string())
    } else {
        (DepKind::Direct, target)
    };

    generation.deps.push(DepBinding {
        field_name: ann.target_name.clone(),
        field_type,
        kind,
        target: key,
        default,
    });
    Ok(())
}

fn attach_route(
    file: &str,
    ann: &ParsedAnnotation,
    info: &SourceInfo,
    generations: &mut BTreeMap<String, ServiceGeneration>,
) -> Result<()> {
    if ann.target_kind != Some(TargetKind::Func) {
        return Err(GenError::invalid_target(
            file,
            ann.line,
            &ann.target_name,
            "@Route must be attached to a method",
        ));
    }
    let args = ann.read_args(file, &["route", "middlewares"])?;
    let route = args
        .get("route")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GenError::parse(file, ann.line, "@Route: missing route"))?;

    let Some(struct_name) = info.struct_of_method(&ann.target_name) else {
        return Err(GenError::invalid_target(
            file,
            ann.line,
            &ann.target_name,
            "@Route method not found in any impl block",
        ));
    };
    let struct_name = struct_name.to_string();
    let Some(generation) = generations.get_mut(&struct_name) else {
        return Ok(());
    };

    let (verb, path) = split_route(&route).ok_or_else(|| {
        GenError::parse(file, ann.line, format!("@Route: malformed route {route:?}"))
    })?;
    generation
        .routes
        .insert(ann.target_name.clone(), format!("{verb} {path}"));
    if let Some(mws) = args.get("middlewares").and_then(Value::as_list) {
        generation
            .route_middlewares
            .insert(ann.target_name.clone(), mws.to_vec());
    }
    if let Some(m) = info.method(&struct_name, &ann.target_name) {
        generation.methods.insert(
            ann.target_name.clone(),
            MethodSig {
                param_name: m.param_name.clone(),
                param_type: m.param_type.clone(),
                return_type: m.return_type.clone(),
                has_data: m.has_data,
                is_async: m.is_async,
            },
        );
    }
    Ok(())
}

/// Split `"GET /path?query"` into verb and query-stripped path.
fn split_route(route: &str) -> Option<(String, String)> {
    let mut parts = route.split_whitespace();
    let verb = parts.next()?.to_uppercase();
    let path = parts.next()?;
    let path = path.split('?').next().unwrap_or(path);
    Some((verb, path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{annotation, source};

    const SAMPLE: &str = r#"
use std::time::Duration;
use lokstra::registry::Lazy;
use crate::db::DbPool;
use crate::models::User;

// @EndpointService name="users", prefix="/api/users", middlewares=["auth"]
pub struct UserService {
    // @Inject "db"
    pub db: Lazy<DbPool>,
    // @Inject "cfg:app.timeout", "30s"
    pub timeout: Duration,
}

impl UserService {
    // @Route "GET /list?full=1"
    pub async fn list(&self) -> Result<Vec<User>, String> {
        Ok(vec![])
    }

    // @Route route="POST /", middlewares=["audit"]
    pub async fn create(&self, user: User) -> Result<(), String> {
        let _ = user;
        Ok(())
    }
}

// @Service name="mailer"
pub struct Mailer {
    // @Inject "@app.transport"
    pub transport: Lazy<Transport>,
    // @Inject "cfg:@secrets.key"
    pub key: String,
}
"#;

    fn collect_sample() -> Vec<ServiceGeneration> {
        let anns = annotation::scan("svc.rs", SAMPLE).unwrap();
        let info = source::harvest(SAMPLE);
        collect("svc.rs", &anns, &info).unwrap()
    }

    #[test]
    fn test_collect_endpoint_service() {
        let gens = collect_sample();
        let users = gens.iter().find(|g| g.service_name == "users").unwrap();
        assert!(users.is_endpoint_service);
        assert_eq!(users.path_prefix.as_deref(), Some("/api/users"));
        assert_eq!(users.router_middlewares, vec!["auth"]);
        assert_eq!(users.remote_type_name, "UserServiceRemote");
    }

    #[test]
    fn test_route_query_stripped() {
        let gens = collect_sample();
        let users = gens.iter().find(|g| g.service_name == "users").unwrap();
        assert_eq!(users.routes["list"], "GET /list");
        assert_eq!(users.routes["create"], "POST /");
        assert_eq!(users.route_middlewares["create"], vec!["audit"]);
    }

    #[test]
    fn test_dep_kinds() {
        let gens = collect_sample();
        let users = gens.iter().find(|g| g.service_name == "users").unwrap();
        assert_eq!(users.deps[0].kind, DepKind::Direct);
        assert_eq!(users.deps[0].spec(), "db:db");
        assert_eq!(users.deps[1].kind, DepKind::ConfigValue);
        assert_eq!(users.deps[1].spec(), "timeout:cfg:app.timeout");
        assert_eq!(users.deps[1].default.as_deref(), Some("30s"));

        let mailer = gens.iter().find(|g| g.service_name == "mailer").unwrap();
        assert_eq!(mailer.deps[0].kind, DepKind::IndirectService);
        assert_eq!(mailer.deps[0].spec(), "transport:@app.transport");
        assert_eq!(mailer.deps[1].kind, DepKind::IndirectConfig);
        assert_eq!(mailer.deps[1].spec(), "key:cfg:@secrets.key");
    }

    #[test]
    fn test_service_on_non_struct_rejected() {
        let text = "// @Service name=\"x\"\npub fn run() {}\n";
        let anns = annotation::scan("bad.rs", text).unwrap();
        let info = source::harvest(text);
        let err = collect("bad.rs", &anns, &info).unwrap_err();
        assert!(err.to_string().contains("struct declaration"));
        assert!(err.to_string().contains("run"));
    }

    #[test]
    fn test_method_signatures_recorded() {
        let gens = collect_sample();
        let users = gens.iter().find(|g| g.service_name == "users").unwrap();
        let list = &users.methods["list"];
        assert!(list.has_data);
        assert_eq!(list.return_type.as_deref(), Some("Vec<User>"));
        let create = &users.methods["create"];
        assert!(!create.has_data);
        assert_eq!(create.param_type.as_deref(), Some("User"));
    }
}
