//! Annotation lexer
//!
//! Turns comment lines of the form `// @Name args...` into [`ParsedAnnotation`]
//! records. The lexer works on plain text, one line at a time; it knows just
//! enough about the surrounding source to attach each annotation to the
//! declaration that follows it (type, function, or field).
//!
//! Indented annotations (a tab, or more than one space, between the comment
//! introducer and the `@`) are ignored. This keeps annotation examples inside
//! doc comments from being picked up as real directives.

use std::collections::BTreeMap;

use crate::error::{GenError, Result};

/// A single annotation argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl Value {
    /// String form of the value, for arguments where only strings make sense.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

/// What kind of declaration an annotation was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Type,
    Func,
    Field,
}

/// One parsed annotation, with the target it was attached to.
///
/// Named and positional arguments are mutually exclusive per instance;
/// mixing them is a parse error.
#[derive(Debug, Clone)]
pub struct ParsedAnnotation {
    pub name: String,
    pub named: BTreeMap<String, Value>,
    pub positional: Vec<Value>,
    /// 1-based source line of the annotation comment.
    pub line: usize,
    pub target_kind: Option<TargetKind>,
    pub target_name: String,
}

impl ParsedAnnotation {
    /// Read the arguments against an expected parameter list.
    ///
    /// Named form: every key must appear in `expected`, otherwise
    /// "unexpected argument". Positional form: values are assigned to
    /// `expected` in order; more values than parameters is
    /// "too many arguments".
    pub fn read_args(&self, file: &str, expected: &[&str]) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        if !self.named.is_empty() {
            for (key, value) in &self.named {
                if !expected.contains(&key.as_str()) {
                    return Err(GenError::parse(
                        file,
                        self.line,
                        format!("@{}: unexpected argument {key}", self.name),
                    ));
                }
                out.insert(key.clone(), value.clone());
            }
            return Ok(out);
        }
        if self.positional.len() > expected.len() {
            return Err(GenError::parse(
                file,
                self.line,
                format!("@{}: too many arguments", self.name),
            ));
        }
        for (i, value) in self.positional.iter().enumerate() {
            out.insert(expected[i].to_string(), value.clone());
        }
        Ok(out)
    }
}

// =============================================================================
// Line scanning
// =============================================================================

/// Scan a source file's text and return every annotation with its target.
pub fn scan(file: &str, text: &str) -> Result<Vec<ParsedAnnotation>> {
    let mut out = Vec::new();
    let mut pending: Vec<ParsedAnnotation> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim_start();

        if let Some(body) = annotation_body(trimmed) {
            pending.push(parse_annotation(file, line_no, body)?);
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("//") {
            // Blank lines and ordinary comments between annotations and
            // their target do not reset the pending list.
            continue;
        }
        if !pending.is_empty() {
            let (kind, name) = extract_target(trimmed);
            for mut ann in pending.drain(..) {
                ann.target_kind = kind;
                ann.target_name = name.clone();
                out.push(ann);
            }
        }
    }
    // Annotations at end of file with no following declaration are dropped;
    // they annotate nothing.
    Ok(out)
}

/// Returns the annotation body (starting at `@`) if this trimmed line opens
/// one. Indented annotations are rejected here.
fn annotation_body(trimmed: &str) -> Option<&str> {
    let rest = trimmed.strip_prefix("//")?;
    if let Some(after_space) = rest.strip_prefix(' ') {
        // `//  @...` (two or more spaces) is an indented example, not real.
        if after_space.starts_with('@') {
            return Some(after_space);
        }
        return None;
    }
    // `//@...` with no space at all is accepted; a tab is an indent.
    if rest.starts_with('@') {
        return Some(rest);
    }
    None
}

fn parse_annotation(file: &str, line: usize, body: &str) -> Result<ParsedAnnotation> {
    debug_assert!(body.starts_with('@'));
    let body = &body[1..];
    let name_end = body
        .find(|c: char| !c.is_alphanumeric() && c != '_')
        .unwrap_or(body.len());
    let name = &body[..name_end];
    if name.is_empty() {
        return Err(GenError::parse(file, line, "annotation name missing after @"));
    }

    let mut args = body[name_end..].trim();
    // Both `@Name args` and `@Name(args)` are accepted; a trailing `)` with
    // no opener is tolerated.
    if let Some(stripped) = args.strip_prefix('(') {
        args = stripped;
    }
    if let Some(stripped) = args.strip_suffix(')') {
        args = stripped.trim_end();
    }

    let mut named = BTreeMap::new();
    let mut positional = Vec::new();
    for item in split_args(args) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        match split_named(item) {
            Some((key, value)) => {
                if !positional.is_empty() {
                    return Err(GenError::parse(
                        file,
                        line,
                        format!("@{name}: cannot mix named and positional arguments"),
                    ));
                }
                named.insert(key.trim().to_string(), parse_value(value.trim()));
            }
            None => {
                if !named.is_empty() {
                    return Err(GenError::parse(
                        file,
                        line,
                        format!("@{name}: cannot mix named and positional arguments"),
                    ));
                }
                positional.push(parse_value(item));
            }
        }
    }

    Ok(ParsedAnnotation {
        name: name.to_string(),
        named,
        positional,
        line,
        target_kind: None,
        target_name: String::new(),
    })
}

/// Split a comma-separated argument string. Commas inside quotes (double,
/// single, or backtick) or inside `[...]` brackets are not separators.
fn split_args(args: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for c in args.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => {
                    quote = Some(c);
                    current.push(c);
                }
                '[' => {
                    depth += 1;
                    current.push(c);
                }
                ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                ',' if depth == 0 => {
                    items.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        items.push(current);
    }
    items
}

/// An item is named iff it contains an unquoted, unbracketed `=`.
fn split_named(item: &str) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (i, c) in item.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => quote = Some(c),
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '=' if depth == 0 => return Some((&item[..i], &item[i + 1..])),
                _ => {}
            },
        }
    }
    None
}

fn parse_value(raw: &str) -> Value {
    if let Some(inner) = unquote(raw) {
        return Value::Str(inner);
    }
    if raw.starts_with('[') && raw.ends_with(']') {
        let inner = &raw[1..raw.len() - 1];
        let items = split_args(inner)
            .into_iter()
            .map(|s| {
                let s = s.trim().to_string();
                unquote(&s).unwrap_or(s)
            })
            .filter(|s| !s.is_empty())
            .collect();
        return Value::List(items);
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Int(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    Value::Str(raw.to_string())
}

/// Strip one level of matching quotes. Backtick quoting preserves embedded
/// double quotes; no escape processing happens inside any quote kind.
fn unquote(raw: &str) -> Option<String> {
    let mut chars = raw.chars();
    let first = chars.next()?;
    if !matches!(first, '"' | '\'' | '`') {
        return None;
    }
    if raw.len() >= 2 && raw.ends_with(first) {
        return Some(raw[1..raw.len() - 1].to_string());
    }
    None
}

// =============================================================================
// Target extraction
// =============================================================================

/// Recognize the declaration that follows a run of annotations.
///
/// Three forms are understood: type declarations, function/method
/// declarations, and struct fields. Anything else yields no kind and the
/// line's first token as the observed target, so validation can report what
/// it actually saw.
pub fn extract_target(line: &str) -> (Option<TargetKind>, String) {
    let mut rest = line.trim();
    // Visibility does not change the target.
    if rest.starts_with("pub") {
        rest = rest[3..].trim_start();
        if rest.starts_with('(') {
            if let Some(close) = rest.find(')') {
                rest = rest[close + 1..].trim_start();
            }
        }
    }

    for kw in ["struct", "enum", "trait", "union"] {
        if let Some(after) = rest.strip_prefix(kw) {
            if after.starts_with(char::is_whitespace) {
                return (Some(TargetKind::Type), first_ident(after));
            }
        }
    }
    if let Some(after) = rest.strip_prefix("type") {
        if after.starts_with(char::is_whitespace) {
            return (Some(TargetKind::Type), first_ident(after));
        }
    }

    let mut fn_rest = rest;
    for modifier in ["const", "async", "unsafe"] {
        if let Some(after) = fn_rest.strip_prefix(modifier) {
            if after.starts_with(char::is_whitespace) {
                fn_rest = after.trim_start();
            }
        }
    }
    if let Some(after) = fn_rest.strip_prefix("fn") {
        if after.starts_with(char::is_whitespace) || after.starts_with('(') {
            return (Some(TargetKind::Func), first_ident(after));
        }
    }

    // Field form: `name: Type` with an identifier before the colon.
    if let Some(colon) = rest.find(':') {
        let name = rest[..colon].trim();
        if !name.is_empty()
            && name.chars().all(|c| c.is_alphanumeric() || c == '_')
            && !name.chars().next().is_some_and(|c| c.is_ascii_digit())
            && rest.len() > colon + 1
            && !rest[colon + 1..].starts_with(':')
        {
            return (Some(TargetKind::Field), name.to_string());
        }
    }

    (None, first_ident(rest))
}

fn first_ident(s: &str) -> String {
    s.trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_one(text: &str) -> ParsedAnnotation {
        let anns = scan("test.rs", text).unwrap();
        assert_eq!(anns.len(), 1, "expected one annotation in {text:?}");
        anns.into_iter().next().unwrap()
    }

    #[test]
    fn test_named_args() {
        let ann = scan_one(
            "// @EndpointService name=\"users\", prefix=\"/api/users\"\npub struct UserService {",
        );
        assert_eq!(ann.name, "EndpointService");
        assert_eq!(ann.named["name"], Value::Str("users".into()));
        assert_eq!(ann.named["prefix"], Value::Str("/api/users".into()));
        assert_eq!(ann.target_kind, Some(TargetKind::Type));
        assert_eq!(ann.target_name, "UserService");
    }

    #[test]
    fn test_positional_args() {
        let ann = scan_one("// @EndpointService \"users\", \"/api/users\"\nstruct U {");
        assert!(ann.named.is_empty());
        assert_eq!(ann.positional.len(), 2);
        assert_eq!(ann.positional[0], Value::Str("users".into()));
    }

    #[test]
    fn test_paren_form_and_trailing_paren() {
        let ann = scan_one("// @Service(name=\"db\")\nstruct Db {");
        assert_eq!(ann.named["name"], Value::Str("db".into()));
        let ann = scan_one("// @Service name=\"db\")\nstruct Db {");
        assert_eq!(ann.named["name"], Value::Str("db".into()));
    }

    #[test]
    fn test_no_args() {
        let ann = scan_one("// @Service\nstruct Db {");
        assert!(ann.named.is_empty());
        assert!(ann.positional.is_empty());
    }

    #[test]
    fn test_list_value() {
        let ann = scan_one("// @Route route=\"GET /x\", middlewares=[\"auth\", \"log\"]\nfn get_x(&self) {");
        assert_eq!(
            ann.named["middlewares"],
            Value::List(vec!["auth".into(), "log".into()])
        );
        assert_eq!(ann.target_kind, Some(TargetKind::Func));
        assert_eq!(ann.target_name, "get_x");
    }

    #[test]
    fn test_comma_inside_quotes_and_brackets() {
        let ann = scan_one("// @X a=\"one, two\", b=[\"x, y\", \"z\"]\nstruct S {");
        assert_eq!(ann.named["a"], Value::Str("one, two".into()));
        assert_eq!(
            ann.named["b"],
            Value::List(vec!["x, y".into(), "z".into()])
        );
    }

    #[test]
    fn test_backtick_preserves_double_quotes() {
        let ann = scan_one("// @X a=`say \"hi\"`\nstruct S {");
        assert_eq!(ann.named["a"], Value::Str("say \"hi\"".into()));
    }

    #[test]
    fn test_scalar_values() {
        let ann = scan_one("// @X a=42, b=1.5, c=true, d=bare\nstruct S {");
        assert_eq!(ann.named["a"], Value::Int(42));
        assert_eq!(ann.named["b"], Value::Float(1.5));
        assert_eq!(ann.named["c"], Value::Bool(true));
        assert_eq!(ann.named["d"], Value::Str("bare".into()));
    }

    #[test]
    fn test_mixed_args_rejected() {
        let err = scan("t.rs", "// @X a=1, \"pos\"\nstruct S {").unwrap_err();
        assert!(err.to_string().contains("cannot mix"));
    }

    #[test]
    fn test_indented_annotations_ignored() {
        assert!(scan("t.rs", "//\t@Service\nstruct S {").unwrap().is_empty());
        assert!(scan("t.rs", "//   @Service\nstruct S {").unwrap().is_empty());
        // Exactly one space is the canonical form.
        assert_eq!(scan("t.rs", "// @Service\nstruct S {").unwrap().len(), 1);
        // No space at all is tolerated.
        assert_eq!(scan("t.rs", "//@Service\nstruct S {").unwrap().len(), 1);
    }

    #[test]
    fn test_doc_comment_not_annotation() {
        assert!(scan("t.rs", "/// @Service\nstruct S {").unwrap().is_empty());
    }

    #[test]
    fn test_stacked_annotations_share_target() {
        let anns = scan(
            "t.rs",
            "// @Service name=\"a\"\n// @Tag x=1\n\n// plain comment\npub struct Svc {",
        )
        .unwrap();
        assert_eq!(anns.len(), 2);
        assert!(anns.iter().all(|a| a.target_name == "Svc"));
    }

    #[test]
    fn test_field_target() {
        let anns = scan("t.rs", "// @Inject \"db\"\n    pub db: Lazy<DbPool>,").unwrap();
        assert_eq!(anns[0].target_kind, Some(TargetKind::Field));
        assert_eq!(anns[0].target_name, "db");
    }

    #[test]
    fn test_fn_modifiers() {
        let (kind, name) = extract_target("pub async fn list(&self) -> Vec<User> {");
        assert_eq!(kind, Some(TargetKind::Func));
        assert_eq!(name, "list");
        let (kind, name) = extract_target("pub(crate) struct Thing {");
        assert_eq!(kind, Some(TargetKind::Type));
        assert_eq!(name, "Thing");
    }

    #[test]
    fn test_unrecognized_target() {
        let (kind, name) = extract_target("impl Foo {");
        assert_eq!(kind, None);
        assert_eq!(name, "impl");
    }

    #[test]
    fn test_read_args_named_unknown_key() {
        let ann = scan_one("// @Service nome=\"x\"\nstruct S {");
        let err = ann.read_args("t.rs", &["name"]).unwrap_err();
        assert!(err.to_string().contains("unexpected argument nome"));
    }

    #[test]
    fn test_read_args_too_many_positional() {
        let ann = scan_one("// @Service \"a\", \"b\", \"c\"\nstruct S {");
        let err = ann.read_args("t.rs", &["name", "prefix"]).unwrap_err();
        assert!(err.to_string().contains("too many arguments"));
    }

    #[test]
    fn test_read_args_positional_mapping() {
        let ann = scan_one("// @EndpointService \"users\", \"/api\"\nstruct S {");
        let args = ann.read_args("t.rs", &["name", "prefix"]).unwrap();
        assert_eq!(args["name"], Value::Str("users".into()));
        assert_eq!(args["prefix"], Value::Str("/api".into()));
    }

    #[test]
    fn test_quoted_colon_key() {
        let ann = scan_one("// @Inject 'cfg:app.timeout', \"30s\"\nx: Duration,");
        assert_eq!(ann.positional[0], Value::Str("cfg:app.timeout".into()));
        assert_eq!(ann.positional[1], Value::Str("30s".into()));
    }
}
