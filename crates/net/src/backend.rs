use std::{collections::HashMap, time::Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::error::{Error, Result};
use crate::request::ResponseResult;

/// Expired-session marker used when a backend does not configure its own.
pub const DEFAULT_SESSION_EXPIRED_MARKER: &str = "Guest user is disabled";

/// Which response envelope a backend speaks. Selected by configuration key,
/// not discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVariant {
    Legacy,
    #[default]
    Current,
}

/// Either a username/password pair (re-login possible) or a static bearer
/// token. Mutually exclusive at any instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { username: String, password: String },
    Token(String),
    None,
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub issued_at: Instant,
}

/// One independently reachable content source ("drive"). The set is built
/// once at init and read-mostly afterwards; the session token is the only
/// mutable field and is replaced wholesale on each login.
pub struct Backend {
    name: String,
    base_url: Url,
    path: String,
    credentials: Credentials,
    api_variant: ApiVariant,
    searchable: bool,
    hidden: bool,
    headers: HashMap<String, String>,
    passwords: HashMap<String, String>,
    session_expired_marker: String,
    session: RwLock<Option<SessionToken>>,
}

impl Backend {
    pub fn new(name: impl Into<String>, base_url: Url) -> Self {
        Self {
            name: name.into(),
            base_url,
            path: String::new(),
            credentials: Credentials::None,
            api_variant: ApiVariant::default(),
            searchable: true,
            hidden: false,
            headers: HashMap::new(),
            passwords: HashMap::new(),
            session_expired_marker: DEFAULT_SESSION_EXPIRED_MARKER.to_string(),
            session: RwLock::new(None),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_variant(mut self, variant: ApiVariant) -> Self {
        self.api_variant = variant;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_passwords(mut self, passwords: HashMap<String, String>) -> Self {
        self.passwords = passwords;
        self
    }

    pub fn with_session_expired_marker(mut self, marker: impl Into<String>) -> Self {
        self.session_expired_marker = marker.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn mount_path(&self) -> &str {
        if self.path.is_empty() { "/" } else { &self.path }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn api_variant(&self) -> ApiVariant {
        self.api_variant
    }

    pub fn searchable(&self) -> bool {
        self.searchable
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn can_login(&self) -> bool {
        matches!(self.credentials, Credentials::Password { .. })
    }

    pub fn login_url(&self) -> Result<Url> {
        self.endpoint(match self.api_variant {
            ApiVariant::Current => "/api/auth/login",
            ApiVariant::Legacy => "/api/admin/login",
        })
    }

    pub fn list_url(&self) -> Result<Url> {
        self.endpoint(match self.api_variant {
            ApiVariant::Current => "/api/fs/list",
            ApiVariant::Legacy => "/api/public/path",
        })
    }

    pub fn search_url(&self) -> Result<Url> {
        self.endpoint(match self.api_variant {
            ApiVariant::Current => "/api/fs/search",
            ApiVariant::Legacy => "/api/public/search",
        })
    }

    pub fn detail_url(&self) -> Result<Url> {
        self.endpoint(match self.api_variant {
            ApiVariant::Current => "/api/fs/get",
            ApiVariant::Legacy => "/api/public/path",
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Variant-shaped search request body.
    pub fn search_params(&self, keyword: &str) -> Value {
        match self.api_variant {
            ApiVariant::Current => json!({
                "parent": self.mount_path(),
                "keywords": keyword,
                "page": 1,
                "per_page": 100,
            }),
            ApiVariant::Legacy => json!({
                "path": self.mount_path(),
                "keyword": keyword,
            }),
        }
    }

    /// Headers to attach to every call: the configured extras plus the
    /// freshest credential. Recomputed per attempt so a re-login is picked
    /// up by the retry.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        match &self.credentials {
            Credentials::Token(token) => {
                headers.insert("Authorization".to_string(), token.clone());
            }
            Credentials::Password { .. } => {
                if let Some(session) = self.session.read().as_ref() {
                    headers.insert("Authorization".to_string(), session.token.clone());
                }
            }
            Credentials::None => {}
        }
        headers
    }

    /// Backend-specific expired-session signature: a substring match
    /// against the response body. An empty marker disables detection.
    pub fn session_expired(&self, res: &ResponseResult) -> bool {
        !self.session_expired_marker.is_empty() && res.body.contains(&self.session_expired_marker)
    }

    /// Replaces the session token wholesale. Last successful login wins.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.session.write() = Some(SessionToken { token: token.into(), issued_at: Instant::now() });
    }

    pub fn token(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.token.clone())
    }

    /// Longest-prefix password for a path, empty when none is configured.
    pub fn find_password(&self, path: &str) -> String {
        self.passwords
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, password)| password.clone())
            .unwrap_or_default()
    }

    /// Extracts the token from a login response envelope
    /// (`data.token` in both variants).
    pub fn parse_login_token(&self, body: &str) -> Result<String> {
        let root = parse_json(body)?;
        let token = root
            .get("data")
            .ok_or_else(|| Error::validation("login response missing 'data' field"))?
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("login response missing or empty 'token' field"))?;
        if token.is_empty() {
            return Err(Error::validation("login response missing or empty 'token' field"));
        }
        Ok(token.to_string())
    }

    /// Extracts search hits from the variant-shaped envelope:
    /// `data.content[]` (current) or `data[]` (legacy). A present envelope
    /// with no hits is an empty list, a missing envelope is a validation
    /// error.
    pub fn parse_search_results(&self, body: &str) -> Result<Vec<Value>> {
        let root = parse_json(body)?;
        match self.api_variant {
            ApiVariant::Current => {
                let data = root
                    .get("data")
                    .ok_or_else(|| Error::validation("search response missing 'data' field"))?;
                match data.get("content") {
                    None | Some(Value::Null) => Ok(Vec::new()),
                    Some(content) => as_array(content, "data.content"),
                }
            }
            ApiVariant::Legacy => match root.get("data") {
                None => Err(Error::validation("search response missing 'data' field")),
                Some(Value::Null) => Ok(Vec::new()),
                Some(data) => as_array(data, "data"),
            },
        }
    }

    /// Extracts directory entries from the variant-shaped listing envelope:
    /// `data.content[]` (current) or `data.files[]` (legacy).
    pub fn parse_list_results(&self, body: &str) -> Result<Vec<Value>> {
        let root = parse_json(body)?;
        let data = root
            .get("data")
            .ok_or_else(|| Error::validation("list response missing 'data' field"))?;
        let field = match self.api_variant {
            ApiVariant::Current => "content",
            ApiVariant::Legacy => "files",
        };
        match data.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(items) => as_array(items, field),
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("api_variant", &self.api_variant)
            .field("searchable", &self.searchable)
            .field("hidden", &self.hidden)
            .finish_non_exhaustive()
    }
}

/// Ceiling for one response document; bodies past it are rejected unparsed.
const MAX_JSON_SIZE: usize = 10 * 1024 * 1024;
/// Deepest container nesting accepted in a response document.
const MAX_JSON_DEPTH: usize = 20;

/// Parses an untrusted response body, bounding both its size and its
/// nesting depth before any field is looked at.
fn parse_json(body: &str) -> Result<Value> {
    if body.len() > MAX_JSON_SIZE {
        return Err(Error::validation(format!("response json exceeds {MAX_JSON_SIZE} bytes")));
    }
    let root: Value =
        serde_json::from_str(body).map_err(|err| Error::JsonDecode { err, raw: snippet(body) })?;
    if exceeds_depth(&root, MAX_JSON_DEPTH) {
        return Err(Error::validation(format!(
            "response json nested deeper than {MAX_JSON_DEPTH} levels"
        )));
    }
    Ok(root)
}

fn exceeds_depth(value: &Value, remaining: usize) -> bool {
    match value {
        Value::Array(_) | Value::Object(_) if remaining == 0 => true,
        Value::Array(items) => items.iter().any(|item| exceeds_depth(item, remaining - 1)),
        Value::Object(map) => map.values().any(|item| exceeds_depth(item, remaining - 1)),
        _ => false,
    }
}

fn as_array(value: &Value, field: &str) -> Result<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| Error::validation(format!("'{field}' is not an array")))
}

fn snippet(body: &str) -> String {
    body.chars().take(256).collect()
}
