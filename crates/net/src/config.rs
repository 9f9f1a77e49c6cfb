use std::{collections::HashMap, sync::Arc};

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::backend::{ApiVariant, Backend, Credentials, DEFAULT_SESSION_EXPIRED_MARKER};
use crate::context::NetContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginEntry {
    pub username: String,
    pub password: String,
}

/// One backend record as it appears in the configuration JSON. Field names
/// follow the drive-list format; unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct BackendEntry {
    pub name: String,
    #[serde(alias = "base_url")]
    pub server: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub login: Option<LoginEntry>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "api")]
    pub api_variant: ApiVariant,
    #[serde(default = "default_searchable", alias = "search")]
    pub searchable: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub passwords: HashMap<String, String>,
    #[serde(default = "default_session_expired_marker")]
    pub session_expired_marker: String,
}

fn default_searchable() -> bool {
    true
}

fn default_session_expired_marker() -> String {
    DEFAULT_SESSION_EXPIRED_MARKER.to_string()
}

impl BackendEntry {
    fn into_backend(self) -> Result<Backend> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("backend entry has an empty name".to_string()));
        }
        let credentials = match (self.token, self.login) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(format!(
                    "backend {} declares both a token and a login, which are mutually exclusive",
                    self.name
                )));
            }
            (Some(token), None) => Credentials::Token(token),
            (None, Some(login)) => {
                Credentials::Password { username: login.username, password: login.password }
            }
            (None, None) => Credentials::None,
        };
        let base_url = Url::parse(&self.server)
            .map_err(|err| Error::Config(format!("backend {}: bad server url: {err}", self.name)))?;

        Ok(Backend::new(self.name, base_url)
            .with_path(self.path)
            .with_credentials(credentials)
            .with_variant(self.api_variant)
            .with_searchable(self.searchable)
            .with_hidden(self.hidden)
            .with_headers(self.headers)
            .with_passwords(self.passwords)
            .with_session_expired_marker(self.session_expired_marker))
    }
}

/// Parses the JSON backend list. Malformed entries and duplicate names are
/// skipped with a warning; only an unparseable list as a whole is an error.
pub fn parse_backends(raw: &str) -> Result<Vec<Arc<Backend>>> {
    let entries: Vec<Value> = serde_json::from_str(raw).map_err(|err| Error::JsonDecode {
        err,
        raw: raw.chars().take(256).collect(),
    })?;

    let mut backends: Vec<Arc<Backend>> = Vec::with_capacity(entries.len());
    for entry in entries {
        let parsed = match serde_json::from_value::<BackendEntry>(entry) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "skipping malformed backend entry");
                continue;
            }
        };
        match parsed.into_backend() {
            Ok(backend) => {
                if backends.iter().any(|b| b.name() == backend.name()) {
                    warn!(name = backend.name(), "skipping duplicate backend entry");
                    continue;
                }
                backends.push(Arc::new(backend));
            }
            Err(err) => warn!(%err, "skipping invalid backend entry"),
        }
    }
    info!(count = backends.len(), "backend set loaded");
    Ok(backends)
}

/// Loads the backend set from an extension string: either inline JSON or a
/// URL the list is fetched from.
pub async fn load_backends(ctx: &NetContext, ext: &str) -> Result<Vec<Arc<Backend>>> {
    if ext.starts_with("http://") || ext.starts_with("https://") {
        let res = ctx.get(ext).await;
        if !res.is_success() {
            return Err(Error::Config(format!(
                "backend list fetch returned status {}",
                res.status
            )));
        }
        parse_backends(&res.body)
    } else {
        parse_backends(ext)
    }
}
