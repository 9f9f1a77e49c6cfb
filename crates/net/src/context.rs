use std::{collections::HashMap, time::Duration};

use reqwest::Client;
use tracing::warn;

use crate::discovery::PortDiscovery;
use crate::error::Result;
use crate::request::{self, RequestDescriptor, ResponseResult};
use crate::transport::{TransportConfig, TransportManager};

/// Process-wide networking context: the transport manager and the local
/// proxy discovery, constructed once at plugin init and passed to whatever
/// needs them. No static state; tests build their own context with an
/// injected client and cannot interfere with each other.
pub struct NetContext {
    transport: TransportManager,
    discovery: PortDiscovery,
}

impl NetContext {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            transport: TransportManager::new(config),
            discovery: PortDiscovery::new(),
        }
    }

    /// Test constructor: every call through this context uses `client`.
    pub fn with_client(client: Client) -> Self {
        let ctx = Self::default();
        ctx.transport.set_override_client(Some(client));
        ctx
    }

    pub fn transport(&self) -> &TransportManager {
        &self.transport
    }

    pub fn discovery(&self) -> &PortDiscovery {
        &self.discovery
    }

    /// Primary execution path: never fails. Transport and validation
    /// problems come back as the sentinel failure result, logged here.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> ResponseResult {
        match self.execute_raw(descriptor).await {
            Ok(res) => res,
            Err(err) => {
                warn!(url = descriptor.url(), %err, "request failed, returning failure result");
                ResponseResult::failure()
            }
        }
    }

    /// Raw execution path for callers that need to see the error itself.
    pub async fn execute_raw(&self, descriptor: &RequestDescriptor) -> Result<ResponseResult> {
        let client = self.transport.client();
        self.execute_raw_with(descriptor, &client).await
    }

    async fn execute_raw_with(
        &self,
        descriptor: &RequestDescriptor,
        client: &Client,
    ) -> Result<ResponseResult> {
        let cancel = descriptor
            .cancel_tag()
            .map(|tag| self.transport.cancels().token(tag));
        request::send(
            descriptor,
            client,
            self.transport.config().max_response_bytes,
            cancel,
        )
        .await
    }

    /// Simple GET, body only.
    pub async fn get(&self, url: &str) -> ResponseResult {
        self.execute(&RequestDescriptor::get(url)).await
    }

    /// GET with query parameters and headers.
    pub async fn get_with(
        &self,
        url: &str,
        params: HashMap<String, String>,
        headers: HashMap<String, String>,
    ) -> ResponseResult {
        self.execute(&RequestDescriptor::get(url).params(params).headers(headers)).await
    }

    /// GET against a derived client with custom timeouts, for health checks
    /// and slow downloads.
    pub async fn get_with_timeout(&self, url: &str, timeout: Duration) -> ResponseResult {
        let client = self.transport.client_with_timeout(timeout);
        let descriptor = RequestDescriptor::get(url);
        match self.execute_raw_with(&descriptor, &client).await {
            Ok(res) => res,
            Err(err) => {
                warn!(url, %err, "request failed, returning failure result");
                ResponseResult::failure()
            }
        }
    }

    /// POST with a form body built from the parameter map.
    pub async fn post_form(
        &self,
        url: &str,
        params: HashMap<String, String>,
        headers: HashMap<String, String>,
    ) -> ResponseResult {
        self.execute(&RequestDescriptor::post(url).params(params).headers(headers)).await
    }

    /// POST with a raw JSON body.
    pub async fn post_json(
        &self,
        url: &str,
        json: &str,
        headers: &HashMap<String, String>,
    ) -> ResponseResult {
        self.execute(&RequestDescriptor::post(url).json(json).headers(headers.clone())).await
    }

    /// Probes where `url` redirects to without following it. Propagates
    /// transport errors so the caller can tell "no redirect" from
    /// "unreachable".
    pub async fn fetch_location(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Option<String>> {
        let client = self.transport.client_no_redirect();
        request::fetch_location(&client, url, headers).await
    }

    /// Cancels queued and running calls carrying `tag`.
    pub fn cancel(&self, tag: &str) {
        self.transport.cancel(tag);
    }

    /// Cancels every tagged call.
    pub fn cancel_all(&self) {
        self.transport.cancel_all();
    }
}

impl Default for NetContext {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}
