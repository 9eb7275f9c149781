//! HTTP remote proxy
//!
//! The client half of the wire contract. A request goes to
//! `<base-url><prefix><route-path>` with the verb declared by the method's
//! route. A single method parameter travels as the JSON body, or - for
//! GET-like verbs - as the `payload` query parameter; a scalar parameter
//! fills the path template directly when the route has one. A 2xx response
//! decodes as the return type (empty for error-only methods); anything else
//! becomes an error carrying the status code and response body.
//!
//! Every call honours the proxy's deadline.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::value::{ConfigValue, FromConfig};
use crate::error::{Error, Result};
use crate::registry::ConfigMap;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Verbs whose payload rides in the query string instead of the body.
fn is_query_verb(verb: &str) -> bool {
    matches!(verb, "GET" | "HEAD" | "DELETE")
}

/// An HTTP client bound to one remote service.
pub struct RemoteProxy {
    service: String,
    base_url: String,
    prefix: String,
    timeout: Duration,
    /// method name -> (verb, path template)
    routes: HashMap<String, (String, String)>,
    client: reqwest::Client,
}

impl RemoteProxy {
    pub fn new(service: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::runtime(e.to_string()))?;
        Ok(Self {
            service: service.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix: String::new(),
            timeout: DEFAULT_TIMEOUT,
            routes: HashMap::new(),
            client,
        })
    }

    /// Build from a factory config map. The `remote` key (the publishing
    /// server's base URL, injected by the instantiator) is required.
    pub fn from_config(service: &str, config: &ConfigMap) -> Result<Self> {
        let base_url = config
            .get("remote")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::dependency(service, "remote factory requires a `remote` config key")
            })?
            .to_string();
        let mut proxy = Self::new(service, &base_url)?;
        if let Some(value) = config.get("timeout") {
            proxy.timeout = Duration::from_config(value)
                .map_err(|e| Error::dependency(service, e.to_string()))?;
        }
        Ok(proxy)
    }

    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.trim_end_matches('/').to_string();
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn add_route(&mut self, method: &str, verb: &str, path: &str) {
        self.routes
            .insert(method.to_string(), (verb.to_uppercase(), path.to_string()));
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Invoke an error-only method.
    pub async fn call(&self, method: &str, payload: Option<serde_json::Value>) -> Result<()> {
        self.execute(method, payload).await.map(|_| ())
    }

    /// Invoke a data-returning method and decode the 2xx body.
    pub async fn call_with_data<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<T> {
        let body = self.execute(method, payload).await?;
        serde_json::from_slice(&body).map_err(Error::encode)
    }

    async fn execute(
        &self,
        method: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Vec<u8>> {
        let (verb, path) = self.routes.get(method).ok_or_else(|| {
            Error::wiring(
                &self.service,
                format!("remote proxy has no route for method {method:?}"),
            )
        })?;

        let (path, payload) = fill_path_template(path, payload);
        // Joined the same way the serving side mounts routes: a bare "/"
        // lands on the prefix itself.
        let path = match path.as_str() {
            "" | "/" => String::new(),
            p if p.starts_with('/') => path.clone(),
            _ => format!("/{path}"),
        };
        let mut url = format!("{}{}{}", self.base_url, self.prefix, path);

        let http_method: reqwest::Method = verb
            .parse()
            .map_err(|_| Error::wiring(&self.service, format!("invalid verb {verb:?}")))?;

        let mut request = if is_query_verb(verb) {
            if let Some(value) = &payload {
                let encoded: String = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("payload", &value.to_string())
                    .finish();
                url.push('?');
                url.push_str(&encoded);
            }
            self.client.request(http_method, &url)
        } else {
            let mut req = self.client.request(http_method, &url);
            if let Some(value) = &payload {
                req = req.json(value);
            }
            req
        };
        request = request.timeout(self.timeout);

        tracing::debug!(
            target: "lokstra",
            service = %self.service,
            method,
            %url,
            "remote call"
        );

        let response = request
            .send()
            .await
            .map_err(|e| Error::runtime(format!("remote call to {url}: {e}")))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::runtime(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::remote(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        Ok(body.to_vec())
    }
}

impl std::fmt::Debug for RemoteProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .field("prefix", &self.prefix)
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// A scalar payload fills the first `{...}` template segment of the path;
/// structured payloads stay in the body or query.
fn fill_path_template(
    path: &str,
    payload: Option<serde_json::Value>,
) -> (String, Option<serde_json::Value>) {
    let Some(open) = path.find('{') else {
        return (path.to_string(), payload);
    };
    let Some(close) = path[open..].find('}') else {
        return (path.to_string(), payload);
    };
    let scalar = match &payload {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    };
    match scalar {
        Some(value) => {
            let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
            let filled = format!("{}{}{}", &path[..open], encoded, &path[open + close + 1..]);
            (filled, None)
        }
        None => (path.to_string(), payload),
    }
}
