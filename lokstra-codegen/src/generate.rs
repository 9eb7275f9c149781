//! Generated-file emission
//!
//! For each folder the generator emits exactly one `zz_generated.lokstra.rs`
//! containing, per annotated struct: the local factory, the remote proxy type
//! (endpoint services only), and a `register_<struct>` function. A single
//! `register(reg)` entry point calls every registration in sorted order.
//!
//! The import block is computed, not copied: only paths actually referenced
//! by the emitted code are imported, the canonical alias for a path is the
//! longest source-side alias (ties broken lexicographically), and alias
//! collisions between distinct paths are renamed `alias_1`, `alias_2`, ...
//! with every emitted type occurrence rewritten through the same remap.
//!
//! When a folder is regenerated while some of its files are unchanged, the
//! unchanged files' sections are preserved verbatim from the previous
//! generated file, split on the `// FILE:` banners.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::model::{DepKind, ServiceGeneration};

pub const HEADER: &str = "// Code generated by lokstra-codegen. DO NOT EDIT.";
const BANNER: &str =
    "// ============================================================================";

/// One updated source file and the records generated from it.
pub struct FileGeneration {
    pub file_name: String,
    pub generations: Vec<ServiceGeneration>,
    /// Every struct declared in the file (for qualifying local types).
    pub local_structs: Vec<String>,
}

/// A section re-emitted verbatim from the previous generated file.
pub struct PreservedSection {
    pub file_name: String,
    pub text: String,
    pub struct_names: Vec<String>,
}

// =============================================================================
// Import resolution
// =============================================================================

/// Maps (source alias, per file) to the final alias of the required path.
struct ImportResolver {
    /// path -> final alias
    final_alias: BTreeMap<String, String>,
}

impl ImportResolver {
    /// `required` is path -> set of source-side aliases seen for it.
    fn new(required: &BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut canonical: BTreeMap<String, String> = BTreeMap::new();
        for (path, aliases) in required {
            // Longest alias wins; ties break lexicographically.
            let best = aliases
                .iter()
                .max_by(|a, b| a.len().cmp(&b.len()).then(b.cmp(a)))
                .cloned()
                .unwrap_or_else(|| last_segment(path).to_string());
            canonical.insert(path.clone(), best);
        }

        let mut taken: BTreeMap<String, usize> = BTreeMap::new();
        let mut final_alias = BTreeMap::new();
        for (path, alias) in &canonical {
            let n = taken.entry(alias.clone()).or_insert(0);
            let assigned = if *n == 0 {
                alias.clone()
            } else {
                format!("{alias}_{n}")
            };
            *n += 1;
            final_alias.insert(path.clone(), assigned);
        }
        Self { final_alias }
    }

    fn alias_of(&self, path: &str) -> Option<&str> {
        self.final_alias.get(path).map(String::as_str)
    }

    /// Emit the `use` block, sorted by path, std first.
    fn emit(&self) -> String {
        let mut std_lines = Vec::new();
        let mut other_lines = Vec::new();
        for (path, alias) in &self.final_alias {
            let line = if last_segment(path) == alias {
                format!("use {path};")
            } else {
                format!("use {path} as {alias};")
            };
            if path.starts_with("std::") {
                std_lines.push(line);
            } else {
                other_lines.push(line);
            }
        }
        let mut out = String::new();
        for line in &std_lines {
            out.push_str(line);
            out.push('\n');
        }
        if !std_lines.is_empty() && !other_lines.is_empty() {
            out.push('\n');
        }
        for line in &other_lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Imports the generated header always emits itself.
fn is_fixed_import(path: &str) -> bool {
    matches!(
        path,
        "std::sync::Arc" | "lokstra::Error" | "lokstra::proxy::RemoteProxy"
    )
}

/// Replace leading identifier tokens of type text through `map`.
/// A token prefixed by `::` is a later path segment and is left alone.
fn rewrite_tokens(text: &str, map: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if !(c.is_ascii_alphabetic() || c == '_') {
            out.push(c);
            continue;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || next == '_' {
                chars.next();
                end = i + next.len_utf8();
            } else {
                break;
            }
        }
        let token = &text[start..end];
        let qualified = start >= 2 && text.as_bytes()[start - 2..start] == *b"::";
        if !qualified {
            if let Some(repl) = map(token) {
                out.push_str(&repl);
                continue;
            }
        }
        out.push_str(token);
    }
    out
}

/// Identifier tokens in leading (unqualified) position.
fn leading_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    rewrite_tokens(text, &|t| {
        tokens.push(t.to_string());
        None
    });
    tokens
}

// =============================================================================
// Per-file alias environment
// =============================================================================

/// The alias -> path environment of one source file: its `use` lines plus
/// its own structs qualified by the file's module path.
fn file_env(prefix: &str, file: &FileGeneration) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = BTreeMap::new();
    if let Some(generation) = file.generations.first() {
        for (alias, path) in &generation.imports {
            env.insert(alias.clone(), path.clone());
        }
    }
    let module = file_module(prefix, &file.file_name);
    for s in &file.local_structs {
        env.insert(s.clone(), format!("{module}::{s}"));
    }
    env
}

/// Module path of a source file under a folder's module prefix.
fn file_module(prefix: &str, file_name: &str) -> String {
    let stem = file_name.strip_suffix(".rs").unwrap_or(file_name);
    match stem {
        "mod" | "lib" | "main" => prefix.to_string(),
        _ => format!("{prefix}::{stem}"),
    }
}

// =============================================================================
// Folder generation
// =============================================================================

/// Emit the full generated file for one folder.
///
/// `module_prefix` is the folder's module path (`crate`, `crate::users`, ...).
/// `prev_imports` are the alias/path pairs parsed from the previous generated
/// file, used to re-establish imports referenced by preserved sections.
pub fn generate_folder(
    module_prefix: &str,
    updated: &[FileGeneration],
    preserved: &[PreservedSection],
    prev_imports: &[(String, String)],
) -> String {
    // Step 1: collect the set of paths actually referenced by emitted code.
    let mut required: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut require = |env: &BTreeMap<String, String>, text: &str| {
        for token in leading_tokens(text) {
            if let Some(path) = env.get(&token) {
                required
                    .entry(path.clone())
                    .or_default()
                    .insert(token.clone());
            }
        }
    };

    for file in updated {
        let env = file_env(module_prefix, file);
        for generation in &file.generations {
            require(&env, &generation.struct_name);
            for dep in &generation.deps {
                // Service deps emit only the inner type of the Lazy/Arc
                // wrapper; requiring the wrapper would import unused paths.
                let referenced = match dep.kind {
                    DepKind::Direct | DepKind::IndirectService => generic_inner(&dep.field_type, "Lazy")
                        .or_else(|| generic_inner(&dep.field_type, "Arc"))
                        .unwrap_or(&dep.field_type),
                    DepKind::ConfigValue | DepKind::IndirectConfig => &dep.field_type,
                };
                require(&env, referenced);
            }
            for sig in generation.methods.values() {
                if let Some(t) = &sig.param_type {
                    require(&env, t);
                }
                if let Some(t) = &sig.return_type {
                    require(&env, t);
                }
            }
        }
    }

    // Preserved text re-establishes its imports, minus the fixed runtime
    // imports the file header always carries.
    let prev_env: BTreeMap<String, String> = prev_imports
        .iter()
        .filter(|(_, path)| !is_fixed_import(path))
        .cloned()
        .collect();
    for section in preserved {
        require(&prev_env, &section.text);
    }

    let resolver = ImportResolver::new(&required);

    // Steps 2-4 live in the resolver; render emitted type text through it.
    let render = |env: &BTreeMap<String, String>, text: &str| -> String {
        rewrite_tokens(text, &|token| {
            env.get(token)
                .and_then(|path| resolver.alias_of(path))
                .map(str::to_string)
        })
    };

    // Body sections, sorted by file name.
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut register_calls: BTreeMap<String, String> = BTreeMap::new();
    let mut uses_duration = false;
    let mut any_endpoint = false;

    for file in updated {
        let env = file_env(module_prefix, file);
        let mut body = String::new();
        let mut generations: Vec<&ServiceGeneration> = file.generations.iter().collect();
        generations.sort_by(|a, b| a.struct_name.cmp(&b.struct_name));
        for generation in generations {
            register_calls.insert(
                generation.struct_name.clone(),
                format!("register_{}", snake_case(&generation.struct_name)),
            );
            any_endpoint |= generation.is_endpoint_service;
            emit_struct(&mut body, generation, &env, &render, &mut uses_duration);
        }
        sections.push((file.file_name.clone(), body));
    }
    for section in preserved {
        for name in &section.struct_names {
            register_calls.insert(name.clone(), format!("register_{}", snake_case(name)));
        }
        let text = rewrite_tokens(&section.text, &|token| {
            prev_env
                .get(token)
                .and_then(|path| resolver.alias_of(path))
                .filter(|a| *a != token)
                .map(str::to_string)
        });
        sections.push((section.file_name.clone(), strip_section_banner(&text)));
        if section.text.contains("Duration") {
            uses_duration = true;
        }
        if section.text.contains("RemoteProxy") {
            any_endpoint = true;
        }
    }
    sections.sort_by(|a, b| a.0.cmp(&b.0));

    // Step 5: standard imports only when the emitted code uses them.
    let mut out = String::new();
    out.push_str(HEADER);
    out.push_str("\n\n");
    out.push_str("use std::sync::Arc;\n");
    if uses_duration && !required.contains_key("std::time::Duration") {
        out.push_str("use std::time::Duration;\n");
    }
    out.push('\n');
    out.push_str("use lokstra::registry::{ConfigMap, DepsMap, Registry, ServiceInstance, ServiceTypeDef};\n");
    if any_endpoint {
        out.push_str("use lokstra::registry::{route_handler, ServiceTypeMeta};\n");
        out.push_str("use lokstra::proxy::RemoteProxy;\n");
    }
    out.push_str("use lokstra::Error;\n");
    let user_imports = resolver.emit();
    if !user_imports.is_empty() {
        out.push('\n');
        out.push_str(&user_imports);
    }
    out.push('\n');

    out.push_str("pub fn register(reg: &Registry) {\n");
    for call in register_calls.values() {
        let _ = writeln!(out, "    {call}(reg);");
    }
    out.push_str("}\n");

    for (file_name, body) in &sections {
        out.push('\n');
        out.push_str(BANNER);
        out.push('\n');
        let _ = writeln!(out, "// FILE: {file_name}");
        out.push_str(BANNER);
        out.push('\n');
        out.push_str(body);
    }
    out
}

fn strip_section_banner(text: &str) -> String {
    // Preserved sections arrive with their banner attached; the banner is
    // re-emitted by the caller so the stored text drops it here.
    let mut lines = text.lines().peekable();
    let mut skipped = 0;
    while skipped < 3 {
        match lines.peek() {
            Some(l) if l.starts_with("// ====") || l.starts_with("// FILE:") => {
                lines.next();
                skipped += 1;
            }
            _ => break,
        }
    }
    let rest: Vec<&str> = lines.collect();
    let mut out = rest.join("\n");
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

// =============================================================================
// Per-struct emission
// =============================================================================

type RenderFn<'a> = dyn Fn(&BTreeMap<String, String>, &str) -> String + 'a;

fn emit_struct(
    out: &mut String,
    generation: &ServiceGeneration,
    env: &BTreeMap<String, String>,
    render: &RenderFn<'_>,
    uses_duration: &mut bool,
) {
    let snake = snake_case(&generation.struct_name);
    let type_key = kebab_case(&generation.struct_name);
    let struct_ref = render(env, &generation.struct_name);
    let service = &generation.service_name;

    // ---- local factory ----
    let deps_param = if generation.deps.is_empty() {
        "_deps"
    } else {
        "deps"
    };
    out.push('\n');
    let _ = writeln!(
        out,
        "pub fn {snake}_factory({deps_param}: &DepsMap, _config: &ConfigMap) -> Result<ServiceInstance, Error> {{"
    );
    let binding = if generation.has_init { "let mut svc" } else { "let svc" };
    let _ = writeln!(out, "    {binding} = {struct_ref} {{");
    for dep in &generation.deps {
        let line = match dep.kind {
            DepKind::Direct | DepKind::IndirectService => {
                if let Some(inner) = generic_inner(&dep.field_type, "Lazy") {
                    format!(
                        "        {}: deps.lazy::<{}>(\"{}\")?,",
                        dep.field_name,
                        render(env, inner),
                        dep.field_name
                    )
                } else if let Some(inner) = generic_inner(&dep.field_type, "Arc") {
                    format!(
                        "        {}: deps.resolve::<{}>(\"{}\")?,",
                        dep.field_name,
                        render(env, inner),
                        dep.field_name
                    )
                } else {
                    format!(
                        "        {}: deps.resolve::<{}>(\"{}\")?,",
                        dep.field_name,
                        render(env, &dep.field_type),
                        dep.field_name
                    )
                }
            }
            DepKind::ConfigValue | DepKind::IndirectConfig => {
                if dep.field_type.contains("Duration") {
                    *uses_duration = true;
                }
                let helper = if is_plain_config_type(&dep.field_type) {
                    "config_value"
                } else {
                    "config_de"
                };
                let default = match &dep.default {
                    Some(d) => format!("Some(\"{d}\")"),
                    None => "None".to_string(),
                };
                format!(
                    "        {}: deps.{helper}::<{}>(\"{}\", {default})?,",
                    dep.field_name,
                    render(env, &dep.field_type),
                    dep.field_name
                )
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    if generation.has_unbound_fields {
        out.push_str("        ..Default::default()\n");
    }
    out.push_str("    };\n");
    if generation.has_init {
        if generation.init_returns_error {
            let _ = writeln!(
                out,
                "    svc.init().map_err(|e| Error::dependency(\"{service}\", e.to_string()))?;"
            );
        } else {
            out.push_str("    svc.init();\n");
        }
    }
    out.push_str("    Ok(Arc::new(svc))\n");
    out.push_str("}\n");

    // ---- remote proxy type + factory ----
    if generation.is_endpoint_service {
        emit_remote(out, generation, env, render);
    }

    // ---- registration ----
    out.push('\n');
    let _ = writeln!(out, "pub fn register_{snake}(reg: &Registry) {{");
    if generation.is_endpoint_service {
        let prefix = match &generation.path_prefix {
            Some(p) => format!("Some(\"{p}\")"),
            None => "None".to_string(),
        };
        let _ = writeln!(out, "    let mut meta = ServiceTypeMeta::new({prefix});");
        if !generation.router_middlewares.is_empty() {
            let _ = writeln!(
                out,
                "    meta.router_middlewares(&[{}]);",
                quote_list(&generation.router_middlewares)
            );
        }
        for (method, route) in &generation.routes {
            let (verb, path) = route.split_once(' ').unwrap_or((route.as_str(), ""));
            let mws = generation
                .route_middlewares
                .get(method)
                .map(|m| quote_list(m))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "    meta.route(\"{method}\", \"{verb}\", \"{path}\", &[{mws}]);"
            );
        }
        for (method, sig) in &generation.methods {
            emit_handler(out, generation, method, sig, env, render);
        }
        let _ = writeln!(
            out,
            "    reg.register_service_type(\n        \"{type_key}\",\n        ServiceTypeDef::endpoint(Arc::new({snake}_factory), Arc::new({snake}_remote_factory), meta),\n    );"
        );
    } else {
        let _ = writeln!(
            out,
            "    reg.register_service_type(\"{type_key}\", ServiceTypeDef::local(Arc::new({snake}_factory)));"
        );
    }
    let specs = generation
        .deps
        .iter()
        .map(|d| format!("\"{}\"", d.spec()))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(
        out,
        "    reg.register_lazy_service(\"{service}\", \"{type_key}\", &[{specs}]);"
    );
    out.push_str("}\n");
}

fn emit_remote(
    out: &mut String,
    generation: &ServiceGeneration,
    env: &BTreeMap<String, String>,
    render: &RenderFn<'_>,
) {
    let snake = snake_case(&generation.struct_name);
    let remote = &generation.remote_type_name;
    let service = &generation.service_name;

    out.push('\n');
    let _ = writeln!(out, "pub struct {remote} {{");
    out.push_str("    proxy: RemoteProxy,\n");
    out.push_str("}\n\n");
    let _ = writeln!(out, "impl {remote} {{");
    let mut first = true;
    for (method, sig) in &generation.methods {
        if !first {
            out.push('\n');
        }
        first = false;
        let param = match (&sig.param_name, &sig.param_type) {
            (Some(name), Some(ty)) => format!(", {name}: {}", render(env, ty)),
            _ => String::new(),
        };
        let payload = match &sig.param_name {
            Some(name) => {
                format!("Some(serde_json::to_value(&{name}).map_err(Error::encode)?)")
            }
            None => "None".to_string(),
        };
        if sig.has_data {
            let ret = render(env, sig.return_type.as_deref().unwrap_or("()"));
            let _ = writeln!(
                out,
                "    pub async fn {method}(&self{param}) -> Result<{ret}, Error> {{"
            );
            let _ = writeln!(
                out,
                "        self.proxy.call_with_data::<{ret}>(\"{method}\", {payload}).await"
            );
        } else {
            let _ = writeln!(
                out,
                "    pub async fn {method}(&self{param}) -> Result<(), Error> {{"
            );
            let _ = writeln!(out, "        self.proxy.call(\"{method}\", {payload}).await");
        }
        out.push_str("    }\n");
    }
    out.push_str("}\n\n");

    let _ = writeln!(
        out,
        "pub fn {snake}_remote_factory(_deps: &DepsMap, config: &ConfigMap) -> Result<ServiceInstance, Error> {{"
    );
    let _ = writeln!(
        out,
        "    let mut proxy = RemoteProxy::from_config(\"{service}\", config)?;"
    );
    if let Some(prefix) = &generation.path_prefix {
        let _ = writeln!(out, "    proxy.set_prefix(\"{prefix}\");");
    }
    for (method, route) in &generation.routes {
        let (verb, path) = route.split_once(' ').unwrap_or((route.as_str(), ""));
        let _ = writeln!(out, "    proxy.add_route(\"{method}\", \"{verb}\", \"{path}\");");
    }
    let _ = writeln!(out, "    Ok(Arc::new({remote} {{ proxy }}))");
    out.push_str("}\n");
}

fn emit_handler(
    out: &mut String,
    generation: &ServiceGeneration,
    method: &str,
    sig: &crate::model::MethodSig,
    env: &BTreeMap<String, String>,
    render: &RenderFn<'_>,
) {
    let struct_ref = render(env, &generation.struct_name);
    let service = &generation.service_name;

    let _ = writeln!(
        out,
        "    meta.handler(\"{method}\", route_handler(|svc: ServiceInstance, payload| async move {{"
    );
    let _ = writeln!(
        out,
        "        let svc = svc\n            .downcast::<{struct_ref}>()\n            .map_err(|_| Error::dependency(\"{service}\", \"instance type mismatch\"))?;"
    );
    let call_args = match (&sig.param_name, &sig.param_type) {
        (Some(name), Some(ty)) => {
            let _ = writeln!(
                out,
                "        let {name}: {} = serde_json::from_value(payload.unwrap_or(serde_json::Value::Null))\n            .map_err(Error::encode)?;",
                render(env, ty)
            );
            name.clone()
        }
        _ => {
            out.push_str("        let _ = payload;\n");
            String::new()
        }
    };
    let awaited = if sig.is_async { ".await" } else { "" };
    let call = format!("svc.{method}({call_args}){awaited}");
    let call = if sig.returns_result {
        format!("{call}.map_err(|e| Error::handler(\"{service}\", e.to_string()))?")
    } else {
        call
    };
    if sig.has_data {
        let _ = writeln!(out, "        let out = {call};");
        out.push_str("        Ok(Some(serde_json::to_value(out).map_err(Error::encode)?))\n");
    } else {
        let _ = writeln!(out, "        {call};");
        out.push_str("        Ok(None)\n");
    }
    out.push_str("    }));\n");
}

// =============================================================================
// Previous-file parsing (for preservation)
// =============================================================================

/// Parse the previous generated file into its import pairs and its
/// per-source-file sections (banner included).
pub fn split_generated(text: &str) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let mut imports = Vec::new();
    let mut sections: Vec<(String, String)> = Vec::new();

    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("// FILE:") || (line.starts_with("// ====") && matches!(lines.get(i + 1), Some(l) if l.starts_with("// FILE:"))) {
            break;
        }
        if let Some(rest) = line.strip_prefix("use ") {
            let body = rest.trim_end_matches(';').trim();
            // The generated import block only ever emits single-item lines.
            if !body.contains('{') {
                match body.split_once(" as ") {
                    Some((path, alias)) => {
                        imports.push((alias.trim().to_string(), path.trim().to_string()));
                    }
                    None => {
                        imports.push((last_segment(body).to_string(), body.to_string()));
                    }
                }
            }
        }
        i += 1;
    }

    while i < lines.len() {
        // At a banner or FILE line; find the file name.
        let mut name = None;
        let start = i;
        let mut j = i;
        while j < lines.len() && j < i + 3 {
            if let Some(n) = lines[j].strip_prefix("// FILE:") {
                name = Some(n.trim().to_string());
            }
            j += 1;
        }
        let Some(name) = name else { break };
        // Section runs until the next banner-introduced FILE line.
        let mut end = j;
        while end < lines.len() {
            if lines[end].starts_with("// ====")
                && matches!(lines.get(end + 1), Some(l) if l.starts_with("// FILE:"))
            {
                break;
            }
            end += 1;
        }
        let mut body = lines[start..end].join("\n");
        while body.ends_with('\n') {
            body.pop();
        }
        body.push('\n');
        sections.push((name, body));
        i = end;
    }

    (imports, sections)
}

// =============================================================================
// Small helpers
// =============================================================================

pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

pub fn kebab_case(name: &str) -> String {
    snake_case(name).replace('_', "-")
}

fn quote_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Types handled by the primitive config reader; everything else goes
/// through serde.
fn is_plain_config_type(ty: &str) -> bool {
    matches!(
        ty,
        "String"
            | "bool"
            | "i8"
            | "i16"
            | "i32"
            | "i64"
            | "isize"
            | "u8"
            | "u16"
            | "u32"
            | "u64"
            | "usize"
            | "f32"
            | "f64"
            | "Duration"
            | "std::time::Duration"
            | "Vec<String>"
            | "Vec<u8>"
    )
}

/// The `T` of `Wrapper<T>`, tolerating a path-qualified wrapper.
fn generic_inner<'a>(ty: &'a str, wrapper: &str) -> Option<&'a str> {
    let start = ty.find(&format!("{wrapper}<"))?;
    let prefix = &ty[..start];
    if !(prefix.is_empty() || prefix.ends_with("::")) {
        return None;
    }
    let inner = &ty[start + wrapper.len() + 1..];
    let inner = inner.strip_suffix('>')?;
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{annotation, model, source};

    const SAMPLE: &str = r#"
use std::time::Duration;
use lokstra::registry::Lazy;
use crate::db::DbPool;
use crate::models::User;

// @EndpointService name="users", prefix="/api/users"
pub struct UserService {
    // @Inject "db"
    pub db: Lazy<DbPool>,
    // @Inject "cfg:app.timeout", "30s"
    pub timeout: Duration,
}

impl UserService {
    // @Route "GET /list"
    pub async fn list(&self) -> Result<Vec<User>, String> {
        Ok(vec![])
    }

    // @Route "POST /"
    pub async fn create(&self, user: User) -> Result<(), String> {
        let _ = user;
        Ok(())
    }

    // @Route "DELETE /{id}"
    pub async fn remove(&self, id: String) -> Result<(), String> {
        let _ = id;
        Ok(())
    }
}
"#;

    fn file_generation(name: &str, text: &str) -> FileGeneration {
        let anns = annotation::scan(name, text).unwrap();
        let info = source::harvest(text);
        let generations = model::collect(name, &anns, &info).unwrap();
        FileGeneration {
            file_name: name.to_string(),
            generations,
            local_structs: info.structs.keys().cloned().collect(),
        }
    }

    #[test]
    fn test_generated_file_shape() {
        let file = file_generation("user_service.rs", SAMPLE);
        let out = generate_folder("crate::users", &[file], &[], &[]);

        assert!(out.starts_with(HEADER));
        assert!(out.contains("pub fn register(reg: &Registry)"));
        assert!(out.contains("register_user_service(reg);"));
        assert!(out.contains("// FILE: user_service.rs"));
        assert!(out.contains("use crate::users::user_service::UserService;"));
        assert!(out.contains("use crate::db::DbPool;"));
        assert!(out.contains("deps.lazy::<DbPool>(\"db\")?"));
        assert!(out.contains("deps.config_value::<Duration>(\"timeout\", Some(\"30s\"))?"));
    }

    #[test]
    fn test_remote_method_selection() {
        let file = file_generation("user_service.rs", SAMPLE);
        let out = generate_folder("crate::users", &[file], &[], &[]);

        // Data-returning method goes through call_with_data with the
        // harvested return type; error-only methods go through call.
        assert!(out.contains("pub async fn list(&self) -> Result<Vec<User>, Error>"));
        assert!(out.contains("call_with_data::<Vec<User>>(\"list\", None)"));
        assert!(out.contains("pub async fn create(&self, user: User) -> Result<(), Error>"));
        assert!(out.contains("self.proxy.call(\"create\","));
        assert!(out.contains("pub async fn remove(&self, id: String) -> Result<(), Error>"));
        assert!(out.contains("self.proxy.call(\"remove\","));
    }

    #[test]
    fn test_registration_content() {
        let file = file_generation("user_service.rs", SAMPLE);
        let out = generate_folder("crate::users", &[file], &[], &[]);

        assert!(out.contains("ServiceTypeMeta::new(Some(\"/api/users\"))"));
        assert!(out.contains("meta.route(\"list\", \"GET\", \"/list\", &[]);"));
        assert!(out.contains("meta.route(\"remove\", \"DELETE\", \"/{id}\", &[]);"));
        assert!(out.contains(
            "reg.register_lazy_service(\"users\", \"user-service\", &[\"db:db\", \"timeout:cfg:app.timeout\"]);"
        ));
    }

    #[test]
    fn test_plain_service_has_no_remote() {
        let text = "// @Service name=\"mailer\"\npub struct Mailer {\n    pub retries: u32,\n}\n";
        let file = file_generation("mailer.rs", text);
        let out = generate_folder("crate", &[file], &[], &[]);
        assert!(out.contains("ServiceTypeDef::local(Arc::new(mailer_factory))"));
        assert!(!out.contains("RemoteProxy"));
        assert!(!out.contains("MailerRemote"));
        assert!(out.contains("..Default::default()"));
    }

    #[test]
    fn test_determinism() {
        let a = generate_folder(
            "crate::users",
            &[file_generation("user_service.rs", SAMPLE)],
            &[],
            &[],
        );
        let b = generate_folder(
            "crate::users",
            &[file_generation("user_service.rs", SAMPLE)],
            &[],
            &[],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_alias_collision_renamed() {
        let one = "use crate::alpha::Widget;\n// @Service name=\"a\"\npub struct SvcA {\n    // @Inject \"w\"\n    pub w: Lazy<Widget>,\n}\n";
        let two = "use crate::beta::Widget;\n// @Service name=\"b\"\npub struct SvcB {\n    // @Inject \"w\"\n    pub w: Lazy<Widget>,\n}\n";
        let out = generate_folder(
            "crate",
            &[file_generation("one.rs", one), file_generation("two.rs", two)],
            &[],
            &[],
        );
        assert!(out.contains("use crate::alpha::Widget;"));
        assert!(out.contains("use crate::beta::Widget as Widget_1;"));
        assert!(out.contains("deps.lazy::<Widget>(\"w\")?"));
        assert!(out.contains("deps.lazy::<Widget_1>(\"w\")?"));
    }

    #[test]
    fn test_longest_alias_wins() {
        let one = "use crate::conf::DbConfig as PoolConfig;\n// @Service name=\"a\"\npub struct SvcA {\n    // @Inject \"cfg:pool\"\n    pub pool: PoolConfig,\n}\n";
        let two = "use crate::conf::DbConfig;\n// @Service name=\"b\"\npub struct SvcB {\n    // @Inject \"cfg:pool\"\n    pub pool: DbConfig,\n}\n";
        let out = generate_folder(
            "crate",
            &[file_generation("one.rs", one), file_generation("two.rs", two)],
            &[],
            &[],
        );
        // Both files' occurrences funnel through the single canonical alias.
        assert!(out.contains("use crate::conf::DbConfig as PoolConfig;"));
        assert!(!out.contains("use crate::conf::DbConfig;\n"));
        assert_eq!(out.matches("config_de::<PoolConfig>").count(), 2);
    }

    #[test]
    fn test_preserved_section_roundtrip() {
        let file = file_generation("user_service.rs", SAMPLE);
        let first = generate_folder("crate::users", &[file], &[], &[]);

        let (imports, sections) = split_generated(&first);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].0, "user_service.rs");
        assert!(imports.iter().any(|(a, p)| a == "DbPool" && p == "crate::db::DbPool"));

        let preserved = PreservedSection {
            file_name: sections[0].0.clone(),
            text: sections[0].1.clone(),
            struct_names: vec!["UserService".into()],
        };
        let second = generate_folder("crate::users", &[], &[preserved], &imports);
        // Unchanged folder content regenerates to the identical file.
        assert_eq!(first, second);
    }

    #[test]
    fn test_init_propagation() {
        let text = r#"
// @Service name="pool"
pub struct Pool {
    pub size: u32,
}

impl Pool {
    pub fn init(&mut self) -> Result<(), String> {
        Ok(())
    }
}
"#;
        let out = generate_folder("crate", &[file_generation("pool.rs", text)], &[], &[]);
        assert!(out.contains("let mut svc = Pool"));
        assert!(out.contains("svc.init().map_err(|e| Error::dependency(\"pool\", e.to_string()))?;"));
    }

    #[test]
    fn test_snake_and_kebab() {
        assert_eq!(snake_case("UserService"), "user_service");
        assert_eq!(kebab_case("UserService"), "user-service");
        assert_eq!(snake_case("DB"), "d_b");
    }
}
