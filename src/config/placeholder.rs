//! Placeholder resolution
//!
//! Two passes over the configuration. Pass 1 is textual, over the raw YAML
//! bytes, and consults external providers (`${NAME}`, `${NAME:default}`,
//! `${@provider:key}`, `${@provider:key:default}`). Pass 2 runs over the
//! parsed tree and substitutes `${@cfg:KEY}` references against the configs
//! gathered in pass 1; a scalar that is entirely one placeholder keeps the
//! source type of the referenced value, so integers stay integers.
//!
//! Keys containing literal `:` are single-quoted:
//! `${@vault:'secret/data/db:password':fallback}`. The default, when present,
//! sits after the last unquoted `:`.
//!
//! A pass-1 placeholder that cannot be resolved and has no default is left
//! textually intact, which keeps the failure visible in the loaded document.
//! A pass-2 miss without a default is a hard resolution error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::config::value::ConfigValue;
use crate::error::{Error, Result};

/// An external value source for pass 1.
pub trait PlaceholderProvider: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

// =============================================================================
// env provider
// =============================================================================

/// Process-wide `-KEY=value` / `--KEY value` flags, parsed once.
static FLAG_ARGS: Lazy<HashMap<String, String>> = Lazy::new(|| {
    let args: Vec<String> = std::env::args().skip(1).collect();
    parse_flag_args(&args)
});

/// Parse command-line flags into a lower-cased key map. Accepted forms:
/// `-KEY=value`, `--KEY=value`, `-KEY value`, `--KEY value`.
pub fn parse_flag_args(args: &[String]) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let Some(body) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            i += 1;
            continue;
        };
        if body.is_empty() {
            i += 1;
            continue;
        }
        if let Some((key, value)) = body.split_once('=') {
            out.insert(key.to_lowercase(), value.to_string());
        } else if let Some(next) = args.get(i + 1) {
            if !next.starts_with('-') {
                out.insert(body.to_lowercase(), next.clone());
                i += 2;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// The default provider: command-line flags first (case-insensitive), then
/// the process environment.
pub struct EnvProvider {
    flags: HashMap<String, String>,
}

impl EnvProvider {
    pub fn new() -> Self {
        Self {
            flags: FLAG_ARGS.clone(),
        }
    }

    /// For tests: an env provider with explicit flag arguments.
    pub fn with_flags(flags: HashMap<String, String>) -> Self {
        Self { flags }
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderProvider for EnvProvider {
    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(v) = self.flags.get(&key.to_lowercase()) {
            return Some(v.clone());
        }
        std::env::var(key).ok()
    }
}

// =============================================================================
// provider registry
// =============================================================================

/// Named providers for pass 1, extensible at startup.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn PlaceholderProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        let mut providers: HashMap<String, Arc<dyn PlaceholderProvider>> = HashMap::new();
        providers.insert("env".to_string(), Arc::new(EnvProvider::new()));
        Self { providers }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn PlaceholderProvider>) {
        self.providers.insert(name.into(), provider);
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn PlaceholderProvider>> {
        self.providers.get(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// placeholder grammar
// =============================================================================

/// One parsed `${...}` body.
#[derive(Debug, PartialEq, Eq)]
pub struct PlaceholderRef {
    /// `None` means the default `env` provider.
    pub provider: Option<String>,
    pub key: String,
    pub default: Option<String>,
}

/// Parse a placeholder body (the text between `${` and `}`).
pub fn parse_body(body: &str) -> Option<PlaceholderRef> {
    let (provider, rest) = match body.strip_prefix('@') {
        Some(after) => {
            let (name, rest) = after.split_once(':')?;
            (Some(name.to_string()), rest)
        }
        None => (None, body),
    };
    let (key, default) = split_key_default(rest)?;
    Some(PlaceholderRef {
        provider,
        key,
        default,
    })
}

/// Split `key[:default]` honoring single-quoted keys. An unquoted key splits
/// at the last `:`.
fn split_key_default(rest: &str) -> Option<(String, Option<String>)> {
    if let Some(after_quote) = rest.strip_prefix('\'') {
        let close = after_quote.find('\'')?;
        let key = after_quote[..close].to_string();
        let tail = &after_quote[close + 1..];
        if tail.is_empty() {
            return Some((key, None));
        }
        let default = tail.strip_prefix(':')?;
        return Some((key, Some(default.to_string())));
    }
    match rest.rfind(':') {
        Some(pos) => Some((
            rest[..pos].to_string(),
            Some(rest[pos + 1..].to_string()),
        )),
        None => Some((rest.to_string(), None)),
    }
}

/// Locate the next `${...}` placeholder at or after `from`; the end index is
/// past the closing brace. Single-quoted stretches may contain `}`.
fn find_placeholder(text: &str, from: usize) -> Option<(usize, usize)> {
    let start = text[from..].find("${")? + from;
    let mut quoted = false;
    for (i, c) in text[start + 2..].char_indices() {
        match c {
            '\'' => quoted = !quoted,
            '}' if !quoted => return Some((start, start + 2 + i + 1)),
            _ => {}
        }
    }
    None
}

// =============================================================================
// pass 1
// =============================================================================

/// Resolve every non-`@cfg:` placeholder through the provider registry.
/// Unresolvable placeholders without defaults stay in the text.
pub fn resolve_pass1(text: &str, providers: &ProviderRegistry) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some((start, end)) = find_placeholder(text, cursor) {
        out.push_str(&text[cursor..start]);
        let raw = &text[start..end];
        let body = &text[start + 2..end - 1];
        if body.starts_with("@cfg:") {
            out.push_str(raw);
            cursor = end;
            continue;
        }
        match parse_body(body) {
            Some(reference) => {
                let provider_name = reference.provider.as_deref().unwrap_or("env");
                let looked_up = providers
                    .get(provider_name)
                    .and_then(|p| p.lookup(&reference.key));
                match looked_up.or(reference.default) {
                    Some(value) => out.push_str(&value),
                    None => {
                        tracing::warn!(
                            target: "lokstra",
                            provider = provider_name,
                            key = %reference.key,
                            "placeholder left unresolved"
                        );
                        out.push_str(raw);
                    }
                }
            }
            None => out.push_str(raw),
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

// =============================================================================
// pass 2
// =============================================================================

/// Resolve `${@cfg:KEY}` references against the flattened configs, in place.
///
/// A string node that is exactly one placeholder takes the referenced value
/// with its type preserved; any other occurrence interpolates as text.
pub fn resolve_pass2(
    value: &mut serde_yaml::Value,
    configs: &BTreeMap<String, ConfigValue>,
) -> Result<()> {
    match value {
        serde_yaml::Value::String(s) => {
            if !s.contains("${@cfg:") {
                return Ok(());
            }
            if let Some((start, end)) = find_placeholder(s, 0) {
                if start == 0 && end == s.len() {
                    let body = &s[2..s.len() - 1];
                    *value = resolve_cfg_typed(body, configs)?;
                    return Ok(());
                }
            }
            *s = interpolate_cfg(s, configs)?;
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                resolve_pass2(item, configs)?;
            }
            Ok(())
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                resolve_pass2(v, configs)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn cfg_lookup(
    body: &str,
    configs: &BTreeMap<String, ConfigValue>,
) -> Result<std::result::Result<ConfigValue, String>> {
    let reference = parse_body(body)
        .filter(|r| r.provider.as_deref() == Some("cfg"))
        .ok_or_else(|| Error::resolution(body, "malformed @cfg placeholder"))?;
    if let Some(found) = configs.get(&reference.key.to_lowercase()) {
        return Ok(Ok(found.clone()));
    }
    match reference.default {
        Some(default) => Ok(Err(default)),
        None => Err(Error::resolution(
            reference.key,
            "no such config key and no default",
        )),
    }
}

/// Whole-value substitution: the source type of the config value survives.
fn resolve_cfg_typed(
    body: &str,
    configs: &BTreeMap<String, ConfigValue>,
) -> Result<serde_yaml::Value> {
    match cfg_lookup(body, configs)? {
        Ok(found) => Ok(found.to_yaml()),
        Err(default) => {
            // Defaults are written as scalars; let YAML type them.
            Ok(serde_yaml::from_str(&default)
                .unwrap_or(serde_yaml::Value::String(default)))
        }
    }
}

fn interpolate_cfg(s: &str, configs: &BTreeMap<String, ConfigValue>) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut cursor = 0;
    while let Some((start, end)) = find_placeholder(s, cursor) {
        out.push_str(&s[cursor..start]);
        let body = &s[start + 2..end - 1];
        if body.starts_with("@cfg:") {
            match cfg_lookup(body, configs)? {
                Ok(found) => out.push_str(&found.render()),
                Err(default) => out.push_str(&default),
            }
        } else {
            // Leftover pass-1 text stays as-is.
            out.push_str(&s[start..end]);
        }
        cursor = end;
    }
    out.push_str(&s[cursor..]);
    Ok(out)
}
