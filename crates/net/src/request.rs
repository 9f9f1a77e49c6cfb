use std::collections::HashMap;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::{form_urlencoded, Url};

use crate::error::{Error, Result};
use crate::util::{check_content_length, read_body_with_max};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One HTTP exchange to run: method, target, either a parameter map (GET
/// query or POST form) or a raw JSON body, plus verbatim headers and an
/// optional cancellation tag. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    params: HashMap<String, String>,
    json: Option<String>,
    headers: HashMap<String, String>,
    tag: Option<String>,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: HashMap::new(),
            json: None,
            headers: HashMap::new(),
            tag: None,
        }
    }

    pub fn params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Raw JSON body. A non-empty body takes precedence over the parameter
    /// map on POST and forces `application/json; charset=utf-8`.
    pub fn json(mut self, body: impl Into<String>) -> Self {
        self.json = Some(body.into());
        self
    }

    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cancel_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Builds the reqwest request. GET parameters are percent-encoded
    /// (UTF-8) and appended as `?k=v&...`; POST picks the JSON body when
    /// non-empty, otherwise a form body from the parameter map. Headers are
    /// applied with replace semantics, so the last write for a key wins.
    pub fn build(&self, client: &Client) -> Result<reqwest::Request> {
        let builder = match self.method {
            Method::Get => client.get(self.target_url()?),
            Method::Post => {
                let builder = client.post(Url::parse(&self.url)?);
                match self.json.as_deref() {
                    Some(json) if !json.is_empty() => builder
                        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                        .body(json.to_string()),
                    _ => builder.form(&self.params),
                }
            }
        };
        Ok(builder.headers(self.header_map()).build()?)
    }

    fn target_url(&self) -> Result<Url> {
        if self.params.is_empty() {
            return Ok(Url::parse(&self.url)?);
        }
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.params {
            query.append_pair(key, value);
        }
        Ok(Url::parse(&format!("{}?{}", self.url, query.finish()))?)
    }

    fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            match (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                // insert replaces, so duplicate keys resolve last-write-wins
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(key, "skipping malformed header"),
            }
        }
        headers
    }
}

/// Normalized outcome of one HTTP exchange. `body` is never absent: a
/// transport failure yields the sentinel status 500 with an empty body.
#[derive(Debug, Clone)]
pub struct ResponseResult {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, Vec<String>>,
}

impl ResponseResult {
    pub fn failure() -> Self {
        Self { status: 500, body: String::new(), headers: HashMap::new() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of the named header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }
}

impl Default for ResponseResult {
    fn default() -> Self {
        Self::failure()
    }
}

/// Runs the descriptor against the client and normalizes the response.
/// Errors propagate to the caller here; the context's `execute` wraps this
/// and recovers them into failure results.
pub(crate) async fn send(
    descriptor: &RequestDescriptor,
    client: &Client,
    max_response_bytes: usize,
    cancel: Option<CancellationToken>,
) -> Result<ResponseResult> {
    let request = descriptor.build(client)?;
    let exchange = async {
        let res = client.execute(request).await?;
        let status = res.status().as_u16();
        let headers = response_headers(&res);
        check_content_length(&res, max_response_bytes)?;
        let body = read_body_with_max(res, max_response_bytes).await?;
        Ok(ResponseResult {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
            headers,
        })
    };
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled {
                    tag: descriptor.cancel_tag().unwrap_or_default().to_string(),
                }),
                res = exchange => res,
            }
        }
        None => exchange.await,
    }
}

/// Probes the redirect target of `url` without following it. Unlike the
/// executor's primary path this propagates transport errors raw, so the
/// caller can distinguish "no redirect" from "unreachable".
pub async fn fetch_location(
    client: &Client,
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<Option<String>> {
    let descriptor = RequestDescriptor::get(url).headers(headers.clone());
    let request = descriptor.build(client)?;
    let res = client.execute(request).await?;
    let location = res
        .headers()
        .get("location")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    Ok(location)
}

fn response_headers(res: &reqwest::Response) -> HashMap<String, Vec<String>> {
    let mut headers: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in res.headers() {
        headers
            .entry(name.to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    headers
}
