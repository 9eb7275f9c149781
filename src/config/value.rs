//! Configuration values
//!
//! Config trees are stored twice: as the nested tree (the shape the YAML
//! had) and as a flattened, lower-cased dot-path map for `get_config("a.b")`
//! style lookups. Lookups are case-insensitive.
//!
//! Typed access goes through [`FromConfig`]; durations accept the
//! `<number><ns|us|ms|s|m|h>` grammar.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// A heterogeneous configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Duration(Duration),
    Bytes(Vec<u8>),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
}

/// A nested configuration tree.
pub type ConfigTree = BTreeMap<String, ConfigValue>;

impl ConfigValue {
    pub fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Null => Self::Str(String::new()),
            serde_yaml::Value::Bool(b) => Self::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_yaml::Value::String(s) => Self::Str(s.clone()),
            serde_yaml::Value::Sequence(seq) => {
                Self::List(seq.iter().map(Self::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(map) => Self::Map(
                map.iter()
                    .filter_map(|(k, v)| {
                        k.as_str().map(|k| (k.to_string(), Self::from_yaml(v)))
                    })
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml(&tagged.value),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Str(String::new()),
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(seq) => Self::List(seq.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Duration(d) => serde_json::Value::String(humantime::format_duration(*d).to_string()),
            Self::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|x| serde_json::Value::from(*x)).collect(),
            ),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            Self::Str(s) => serde_yaml::Value::String(s.clone()),
            Self::Int(i) => serde_yaml::Value::from(*i),
            Self::Float(f) => serde_yaml::Value::from(*f),
            Self::Bool(b) => serde_yaml::Value::Bool(*b),
            Self::Duration(d) => {
                serde_yaml::Value::String(humantime::format_duration(*d).to_string())
            }
            Self::Bytes(b) => {
                serde_yaml::Value::Sequence(b.iter().map(|x| serde_yaml::Value::from(*x)).collect())
            }
            Self::List(items) => {
                serde_yaml::Value::Sequence(items.iter().map(Self::to_yaml).collect())
            }
            Self::Map(map) => serde_yaml::Value::Mapping(
                map.iter()
                    .map(|(k, v)| (serde_yaml::Value::String(k.clone()), v.to_yaml()))
                    .collect(),
            ),
        }
    }

    /// Render as the string form used for interpolation.
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Duration(d) => humantime::format_duration(*d).to_string(),
            other => serde_json::to_string(&other.to_json()).unwrap_or_default(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Build a nested tree from a YAML mapping.
pub fn tree_from_yaml(map: &serde_yaml::Mapping) -> ConfigTree {
    map.iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), ConfigValue::from_yaml(v))))
        .collect()
}

/// Flatten a tree into lower-cased dot-path keys. Every node appears, maps
/// included, so both `get("db")` and `get("db.port")` resolve.
pub fn flatten(tree: &ConfigTree) -> BTreeMap<String, ConfigValue> {
    let mut out = BTreeMap::new();
    for (key, value) in tree {
        flatten_into(&key.to_lowercase(), value, &mut out);
    }
    out
}

fn flatten_into(prefix: &str, value: &ConfigValue, out: &mut BTreeMap<String, ConfigValue>) {
    out.insert(prefix.to_string(), value.clone());
    if let ConfigValue::Map(map) = value {
        for (key, child) in map {
            flatten_into(&format!("{prefix}.{}", key.to_lowercase()), child, out);
        }
    }
}

/// Case-insensitive dot-path descent through a nested tree.
pub fn lookup<'a>(tree: &'a ConfigTree, path: &str) -> Option<&'a ConfigValue> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = tree
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(first))
        .map(|(_, v)| v)?;
    for segment in segments {
        let ConfigValue::Map(map) = current else {
            return None;
        };
        current = map
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(segment))
            .map(|(_, v)| v)?;
    }
    Some(current)
}

// =============================================================================
// Typed access
// =============================================================================

/// Conversion from a [`ConfigValue`] into a concrete field type.
pub trait FromConfig: Sized {
    fn from_config(value: &ConfigValue) -> Result<Self>;
}

impl FromConfig for String {
    fn from_config(value: &ConfigValue) -> Result<Self> {
        match value {
            ConfigValue::Map(_) | ConfigValue::List(_) | ConfigValue::Bytes(_) => Err(
                Error::validation(format!("expected a string, found {value:?}")),
            ),
            other => Ok(other.render()),
        }
    }
}

impl FromConfig for bool {
    fn from_config(value: &ConfigValue) -> Result<Self> {
        match value {
            ConfigValue::Bool(b) => Ok(*b),
            ConfigValue::Str(s) => s
                .parse()
                .map_err(|_| Error::validation(format!("not a bool: {s:?}"))),
            other => Err(Error::validation(format!("expected a bool, found {other:?}"))),
        }
    }
}

macro_rules! int_from_config {
    ($($ty:ty),*) => {$(
        impl FromConfig for $ty {
            fn from_config(value: &ConfigValue) -> Result<Self> {
                let n = match value {
                    ConfigValue::Int(i) => *i,
                    ConfigValue::Str(s) => s
                        .parse::<i64>()
                        .map_err(|_| Error::validation(format!("not an integer: {s:?}")))?,
                    other => {
                        return Err(Error::validation(format!(
                            "expected an integer, found {other:?}"
                        )))
                    }
                };
                <$ty>::try_from(n)
                    .map_err(|_| Error::validation(format!("integer out of range: {n}")))
            }
        }
    )*};
}

int_from_config!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromConfig for f64 {
    fn from_config(value: &ConfigValue) -> Result<Self> {
        match value {
            ConfigValue::Float(f) => Ok(*f),
            ConfigValue::Int(i) => Ok(*i as f64),
            ConfigValue::Str(s) => s
                .parse()
                .map_err(|_| Error::validation(format!("not a float: {s:?}"))),
            other => Err(Error::validation(format!(
                "expected a float, found {other:?}"
            ))),
        }
    }
}

impl FromConfig for f32 {
    fn from_config(value: &ConfigValue) -> Result<Self> {
        f64::from_config(value).map(|f| f as f32)
    }
}

impl FromConfig for Duration {
    fn from_config(value: &ConfigValue) -> Result<Self> {
        match value {
            ConfigValue::Duration(d) => Ok(*d),
            // Bare integers count seconds.
            ConfigValue::Int(i) if *i >= 0 => Ok(Duration::from_secs(*i as u64)),
            ConfigValue::Str(s) => humantime::parse_duration(s)
                .map_err(|e| Error::validation(format!("not a duration: {s:?} ({e})"))),
            other => Err(Error::validation(format!(
                "expected a duration, found {other:?}"
            ))),
        }
    }
}

impl FromConfig for Vec<String> {
    fn from_config(value: &ConfigValue) -> Result<Self> {
        match value {
            ConfigValue::List(items) => items.iter().map(String::from_config).collect(),
            ConfigValue::Str(s) if s.is_empty() => Ok(Vec::new()),
            // A bare scalar is a one-element list.
            other => Ok(vec![String::from_config(other)?]),
        }
    }
}

impl FromConfig for Vec<u8> {
    fn from_config(value: &ConfigValue) -> Result<Self> {
        match value {
            ConfigValue::Bytes(b) => Ok(b.clone()),
            ConfigValue::Str(s) => Ok(s.as_bytes().to_vec()),
            ConfigValue::List(items) => items.iter().map(u8::from_config).collect(),
            other => Err(Error::validation(format!(
                "expected bytes, found {other:?}"
            ))),
        }
    }
}
