//! Lightweight type harvesting from source text
//!
//! The generator needs a small amount of type information alongside the
//! annotations: struct fields (for dependency injection), `use` aliases (for
//! the generated import block), and method signatures (for proxy generation).
//! This module extracts that information with line-based scanning; it is not
//! a Rust parser and does not try to be one.

use std::collections::BTreeMap;

/// One `use` item: the local alias and the full path it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseImport {
    pub alias: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub ty: String,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct StructInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
    pub line: usize,
}

/// A method signature, reduced to what proxy generation needs.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub is_async: bool,
    pub param_name: Option<String>,
    pub param_type: Option<String>,
    /// The `T` of `Result<T, E>` (or the plain return type).
    pub return_type: Option<String>,
    pub returns_result: bool,
    /// True when the method produces data beyond success/failure.
    pub has_data: bool,
    pub line: usize,
}

/// Everything harvested from one source file.
#[derive(Debug, Default)]
pub struct SourceInfo {
    pub uses: Vec<UseImport>,
    pub structs: BTreeMap<String, StructInfo>,
    /// Methods grouped by the struct their `impl` block names.
    pub methods: BTreeMap<String, Vec<MethodInfo>>,
}

impl SourceInfo {
    /// The `init` method of a struct, if declared.
    pub fn init_method(&self, struct_name: &str) -> Option<&MethodInfo> {
        self.methods
            .get(struct_name)?
            .iter()
            .find(|m| m.name == "init")
    }

    pub fn method(&self, struct_name: &str, method: &str) -> Option<&MethodInfo> {
        self.methods
            .get(struct_name)?
            .iter()
            .find(|m| m.name == method)
    }

    /// The struct that declares a given method, for attaching `@Route`
    /// annotations to their service.
    pub fn struct_of_method(&self, method: &str) -> Option<&str> {
        self.methods
            .iter()
            .find(|(_, ms)| ms.iter().any(|m| m.name == method))
            .map(|(s, _)| s.as_str())
    }
}

/// Harvest imports, structs, and impl-block method signatures.
pub fn harvest(text: &str) -> SourceInfo {
    let mut info = SourceInfo::default();
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0usize;

    while i < lines.len() {
        let raw = lines[i];
        let trimmed = raw.trim();

        if trimmed.starts_with("use ") && trimmed.ends_with(';') {
            parse_use(trimmed, &mut info.uses);
            i += 1;
            continue;
        }

        if let Some(name) = struct_decl(trimmed) {
            let (fields, consumed) = parse_struct_body(&lines, i);
            info.structs.insert(
                name.clone(),
                StructInfo {
                    name,
                    fields,
                    line: i + 1,
                },
            );
            i += consumed.max(1);
            continue;
        }

        if let Some(name) = impl_decl(trimmed) {
            let (methods, consumed) = parse_impl_body(&lines, i);
            info.methods.entry(name).or_default().extend(methods);
            i += consumed.max(1);
            continue;
        }

        i += 1;
    }
    info
}

// =============================================================================
// use lines
// =============================================================================

fn parse_use(line: &str, out: &mut Vec<UseImport>) {
    let body = line["use ".len()..].trim_end_matches(';').trim();
    if let Some(open) = body.find('{') {
        // `use prefix::{A, B as C};`
        let prefix = body[..open].trim_end_matches("::").trim();
        let inner = body[open + 1..].trim_end_matches('}');
        for item in inner.split(',') {
            let item = item.trim();
            if item.is_empty() || item == "*" || item == "self" {
                continue;
            }
            push_use(&format!("{prefix}::{item}"), out);
        }
        return;
    }
    push_use(body, out);
}

fn push_use(item: &str, out: &mut Vec<UseImport>) {
    if item.ends_with("::*") {
        return;
    }
    let (path, alias) = match item.split_once(" as ") {
        Some((p, a)) => (p.trim().to_string(), a.trim().to_string()),
        None => {
            let path = item.trim().to_string();
            let alias = path.rsplit("::").next().unwrap_or(&path).to_string();
            (path, alias)
        }
    };
    if alias.is_empty() {
        return;
    }
    out.push(UseImport { alias, path });
}

// =============================================================================
// declarations
// =============================================================================

fn struct_decl(line: &str) -> Option<String> {
    let mut rest = strip_visibility(line);
    rest = rest.strip_prefix("struct")?.trim_start();
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

fn impl_decl(line: &str) -> Option<String> {
    let rest = line.strip_prefix("impl")?;
    if !rest.starts_with(char::is_whitespace) && !rest.starts_with('<') {
        return None;
    }
    // `impl Name {` or `impl Trait for Name {` -- generics stripped.
    let rest = rest.trim();
    let subject = match rest.split_once(" for ") {
        Some((_, after)) => after,
        None => rest,
    };
    let name: String = subject
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }
    Some(name)
}

fn strip_visibility(line: &str) -> &str {
    let mut rest = line.trim_start();
    if let Some(after) = rest.strip_prefix("pub") {
        rest = after.trim_start();
        if rest.starts_with('(') {
            if let Some(close) = rest.find(')') {
                rest = rest[close + 1..].trim_start();
            }
        }
    }
    rest
}

// =============================================================================
// struct bodies
// =============================================================================

fn parse_struct_body(lines: &[&str], start: usize) -> (Vec<FieldInfo>, usize) {
    let mut fields = Vec::new();
    let mut depth = 0i32;
    let mut opened = false;

    for (offset, raw) in lines[start..].iter().enumerate() {
        depth += brace_delta(raw);
        if depth > 0 {
            opened = true;
        }
        if opened && offset > 0 && depth == 1 {
            if let Some(field) = field_decl(raw, start + offset + 1) {
                fields.push(field);
            }
        }
        if opened && depth <= 0 {
            return (fields, offset + 1);
        }
        // Unit or tuple struct on one line.
        if !opened && raw.trim_end().ends_with(';') {
            return (fields, offset + 1);
        }
    }
    (fields, lines.len() - start)
}

fn field_decl(line: &str, line_no: usize) -> Option<FieldInfo> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with("#[") {
        return None;
    }
    let rest = strip_visibility(trimmed);
    let colon = rest.find(':')?;
    let name = rest[..colon].trim();
    if name.is_empty()
        || !name.chars().all(|c| c.is_alphanumeric() || c == '_')
        || name.chars().next().is_some_and(|c| c.is_ascii_digit())
    {
        return None;
    }
    let ty = rest[colon + 1..].trim().trim_end_matches(',').trim();
    if ty.is_empty() {
        return None;
    }
    Some(FieldInfo {
        name: name.to_string(),
        ty: ty.to_string(),
        line: line_no,
    })
}

// =============================================================================
// impl bodies
// =============================================================================

fn parse_impl_body(lines: &[&str], start: usize) -> (Vec<MethodInfo>, usize) {
    let mut methods = Vec::new();
    let mut depth = 0i32;
    let mut opened = false;
    let mut offset = 0usize;

    while start + offset < lines.len() {
        let raw = lines[start + offset];
        let trimmed = raw.trim();

        if opened && depth == 1 && trimmed.contains("fn ") && !trimmed.starts_with("//") {
            // A signature may span lines; join until its body opens.
            let mut sig = trimmed.to_string();
            let mut extra = 0usize;
            while !sig.contains('{') && !sig.trim_end().ends_with(';') {
                extra += 1;
                match lines.get(start + offset + extra) {
                    Some(next) => {
                        sig.push(' ');
                        sig.push_str(next.trim());
                    }
                    None => break,
                }
            }
            if let Some(method) = parse_method_sig(&sig, start + offset + 1) {
                methods.push(method);
            }
        }

        depth += brace_delta(raw);
        if depth > 0 {
            opened = true;
        }
        offset += 1;
        if opened && depth <= 0 {
            return (methods, offset);
        }
    }
    (methods, offset)
}

fn parse_method_sig(sig: &str, line_no: usize) -> Option<MethodInfo> {
    let fn_pos = sig.find("fn ")?;
    let is_async = sig[..fn_pos].contains("async");
    let after = &sig[fn_pos + 3..];
    let name: String = after
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        return None;
    }

    let open = after.find('(')?;
    let close = matching_paren(&after[open..])? + open;
    let params = &after[open + 1..close];
    let (param_name, param_type) = first_data_param(params);

    let tail = &after[close + 1..];
    let ret_text = tail.split_once("->").map(|(_, r)| {
        r.split('{')
            .next()
            .unwrap_or(r)
            .trim()
            .trim_end_matches("where")
            .trim()
            .to_string()
    });

    let (return_type, returns_result, has_data) = match ret_text {
        None => (None, false, false),
        Some(ret) => match result_ok_type(&ret) {
            Some(ok) => {
                let has_data = ok != "()";
                (has_data.then_some(ok), true, has_data)
            }
            None => {
                let has_data = ret != "()";
                (has_data.then_some(ret), false, has_data)
            }
        },
    };

    Some(MethodInfo {
        name,
        is_async,
        param_name,
        param_type,
        return_type,
        returns_result,
        has_data,
        line: line_no,
    })
}

/// First parameter that is not a `self` receiver.
fn first_data_param(params: &str) -> (Option<String>, Option<String>) {
    for item in split_top_level(params) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let bare = item.trim_start_matches('&').trim_start();
        let bare = bare.strip_prefix("mut ").unwrap_or(bare);
        if bare == "self" || bare.starts_with("self ") || bare.starts_with("self,") {
            continue;
        }
        if let Some((name, ty)) = item.split_once(':') {
            return (
                Some(name.trim().trim_start_matches("mut ").to_string()),
                Some(ty.trim().to_string()),
            );
        }
    }
    (None, None)
}

/// The `T` of `Result<T, E>` (also single-parameter `Result<T>` aliases).
fn result_ok_type(ret: &str) -> Option<String> {
    let start = ret.find("Result<")?;
    let prefix = &ret[..start];
    if !(prefix.is_empty() || prefix.ends_with("::")) {
        return None;
    }
    let inner = ret[start + "Result<".len()..].strip_suffix('>')?;
    let parts = split_top_level(inner);
    parts.first().map(|s| s.trim().to_string())
}

/// Split by commas at angle/paren/bracket depth zero.
fn split_top_level(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '<' | '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            '>' | ')' | ']' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn brace_delta(line: &str) -> i32 {
    let mut delta = 0i32;
    let code = line.split("//").next().unwrap_or(line);
    for c in code.chars() {
        match c {
            '{' => delta += 1,
            '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
use std::time::Duration;
use lokstra::registry::Lazy;
use crate::db::{DbPool, DbConfig as PoolConfig};
use crate::models::User;

// @EndpointService name="users", prefix="/api/users"
pub struct UserService {
    // @Inject "db"
    pub db: Lazy<DbPool>,
    // @Inject "cfg:app.timeout", "30s"
    pub timeout: Duration,
    count: u64,
}

impl UserService {
    pub fn init(&mut self) -> Result<(), String> {
        Ok(())
    }

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
    pub async fn remove(
        &self,
        id: String,
    ) -> Result<(), String> {
        let _ = id;
        Ok(())
    }
}
"#;

    #[test]
    fn test_harvest_uses() {
        let info = harvest(SAMPLE);
        assert!(info.uses.contains(&UseImport {
            alias: "Duration".into(),
            path: "std::time::Duration".into(),
        }));
        assert!(info.uses.contains(&UseImport {
            alias: "PoolConfig".into(),
            path: "crate::db::DbConfig".into(),
        }));
        assert!(info.uses.contains(&UseImport {
            alias: "DbPool".into(),
            path: "crate::db::DbPool".into(),
        }));
    }

    #[test]
    fn test_harvest_fields() {
        let info = harvest(SAMPLE);
        let s = &info.structs["UserService"];
        let names: Vec<_> = s.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["db", "timeout", "count"]);
        assert_eq!(s.fields[0].ty, "Lazy<DbPool>");
    }

    #[test]
    fn test_harvest_methods() {
        let info = harvest(SAMPLE);
        let list = info.method("UserService", "list").unwrap();
        assert!(list.returns_result);
        assert!(list.has_data);
        assert_eq!(list.return_type.as_deref(), Some("Vec<User>"));
        assert!(list.param_type.is_none());

        let create = info.method("UserService", "create").unwrap();
        assert!(!create.has_data);
        assert_eq!(create.param_type.as_deref(), Some("User"));
        assert_eq!(create.param_name.as_deref(), Some("user"));
    }

    #[test]
    fn test_multiline_signature() {
        let info = harvest(SAMPLE);
        let remove = info.method("UserService", "remove").unwrap();
        assert_eq!(remove.param_type.as_deref(), Some("String"));
        assert!(!remove.has_data);
    }

    #[test]
    fn test_init_detection() {
        let info = harvest(SAMPLE);
        let init = info.init_method("UserService").unwrap();
        assert!(init.returns_result);
    }

    #[test]
    fn test_struct_of_method() {
        let info = harvest(SAMPLE);
        assert_eq!(info.struct_of_method("list"), Some("UserService"));
        assert_eq!(info.struct_of_method("missing"), None);
    }

    #[test]
    fn test_plain_return_type() {
        let info = harvest("struct S { x: u8 }\nimpl S {\n    pub fn answer(&self) -> u32 { 42 }\n}\n");
        let m = info.method("S", "answer").unwrap();
        assert!(!m.returns_result);
        assert!(m.has_data);
        assert_eq!(m.return_type.as_deref(), Some("u32"));
    }
}
