use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::RwLock;
use reqwest::{redirect, Client, ClientBuilder};
use tracing::{error, info, warn};

use crate::cancel::CancelRegistry;

/// General-purpose request timeout.
pub const TIMEOUT: Duration = Duration::from_secs(15);
/// Health checks and other quick probes.
pub const TIMEOUT_FAST: Duration = Duration::from_secs(5);
/// Large downloads and streaming endpoints.
pub const TIMEOUT_SLOW: Duration = Duration::from_secs(30);
/// TCP handshake bound.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for one entire call, including internal retries.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Hard cap on buffered response bodies (50 MB).
pub const MAX_RESPONSE_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Bounds the whole call; reqwest's total request timeout.
    pub call_timeout: Duration,
    pub max_response_bytes: usize,
    pub pool_max_idle_per_host: usize,
    /// host -> "ip:port" overrides; unlisted hosts use system resolution.
    /// A malformed address degrades that entry to disabled.
    pub dns_overrides: HashMap<String, String>,
    /// PEM-encoded pinned root certificates, applied only when the
    /// `strict-tls` feature is enabled. Bad PEM degrades to disabled.
    pub pinned_roots: Vec<String>,
    /// Disables certificate verification. Refused unless the crate is
    /// built with the `insecure-tls` feature.
    pub insecure: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: TIMEOUT,
            call_timeout: CALL_TIMEOUT,
            max_response_bytes: MAX_RESPONSE_BYTES,
            pool_max_idle_per_host: 10,
            dns_overrides: HashMap::new(),
            pinned_roots: Vec::new(),
            insecure: false,
        }
    }
}

/// Owns the process-wide HTTP client. The shared client is built lazily on
/// first demand under a double-checked lock; derived clients for special
/// timeouts are built on the side and never replace it. An override client
/// can be injected for tests and takes precedence until reset.
pub struct TransportManager {
    config: TransportConfig,
    client: RwLock<Option<Client>>,
    override_client: RwLock<Option<Client>>,
    cancels: CancelRegistry,
    builds: AtomicU64,
}

impl TransportManager {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
            override_client: RwLock::new(None),
            cancels: CancelRegistry::new(),
            builds: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn cancels(&self) -> &CancelRegistry {
        &self.cancels
    }

    /// Returns the shared client, building it exactly once. Precedence:
    /// injected override, then the lazily built shared instance.
    pub fn client(&self) -> Client {
        if let Some(client) = self.override_client.read().as_ref() {
            return client.clone();
        }
        if let Some(client) = self.client.read().as_ref() {
            return client.clone();
        }
        let mut slot = self.client.write();
        // second check: another caller may have built while we waited
        if let Some(client) = slot.as_ref() {
            return client.clone();
        }
        let client = self.build_client();
        self.builds.fetch_add(1, Ordering::Relaxed);
        info!("shared http client built");
        *slot = Some(client.clone());
        client
    }

    /// Derived client with overridden connect/read timeouts, for fast
    /// health checks and slow downloads. The shared instance is untouched.
    pub fn client_with_timeout(&self, timeout: Duration) -> Client {
        match self
            .builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .timeout(self.config.call_timeout)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!(%err, "derived client build failed, using shared client");
                self.client()
            }
        }
    }

    /// Client that reports redirects instead of following them, for
    /// Location probing.
    pub fn client_no_redirect(&self) -> Client {
        match self.builder().redirect(redirect::Policy::none()).build() {
            Ok(client) => client,
            Err(err) => {
                warn!(%err, "no-redirect client build failed, using shared client");
                self.client()
            }
        }
    }

    /// Injects a client that all subsequent `client()` calls return until
    /// reset with `None`. In-flight calls keep the client they started
    /// with; only visibility to new calls is guaranteed.
    pub fn set_override_client(&self, client: Option<Client>) {
        let injected = client.is_some();
        *self.override_client.write() = client;
        if injected {
            info!("override http client injected");
        } else {
            info!("override http client reset");
        }
    }

    /// Cancels queued and running calls carrying `tag`. Never blocks.
    pub fn cancel(&self, tag: &str) {
        self.cancels.cancel(tag);
    }

    /// Cancels every tagged call. Never blocks.
    pub fn cancel_all(&self) {
        self.cancels.cancel_all();
    }

    /// How many times the shared client has been constructed. Exactly one
    /// build must be observable no matter how many threads race first use.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    fn build_client(&self) -> Client {
        match self.builder().build() {
            Ok(client) => client,
            Err(err) => {
                // optional features are already degraded inside builder();
                // reaching this means something fundamental, so fall back
                // to a stock client rather than poisoning every caller
                error!(%err, "configured client build failed, falling back to defaults");
                Client::new()
            }
        }
    }

    fn builder(&self) -> ClientBuilder {
        let mut builder = Client::builder()
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .connect_timeout(self.config.connect_timeout)
            .read_timeout(self.config.read_timeout)
            .timeout(self.config.call_timeout);

        for (host, addr) in &self.config.dns_overrides {
            match addr.parse::<SocketAddr>() {
                Ok(addr) => builder = builder.resolve(host, addr),
                Err(err) => {
                    warn!(host, addr, %err, "bad dns override, falling back to system resolver");
                }
            }
        }

        builder = self.apply_pinning(builder);
        builder = self.apply_insecure(builder);
        builder
    }

    #[cfg(feature = "strict-tls")]
    fn apply_pinning(&self, mut builder: ClientBuilder) -> ClientBuilder {
        for pem in &self.config.pinned_roots {
            match reqwest::Certificate::from_pem(pem.as_bytes()) {
                Ok(cert) => builder = builder.add_root_certificate(cert),
                Err(err) => warn!(%err, "bad pinned certificate, skipping"),
            }
        }
        builder
    }

    #[cfg(not(feature = "strict-tls"))]
    fn apply_pinning(&self, builder: ClientBuilder) -> ClientBuilder {
        if !self.config.pinned_roots.is_empty() {
            info!("certificate pinning configured but strict-tls is not enabled, ignoring");
        }
        builder
    }

    #[cfg(feature = "insecure-tls")]
    fn apply_insecure(&self, builder: ClientBuilder) -> ClientBuilder {
        if self.config.insecure {
            warn!("certificate verification DISABLED, never use this build in production");
            builder.danger_accept_invalid_certs(true)
        } else {
            builder
        }
    }

    #[cfg(not(feature = "insecure-tls"))]
    fn apply_insecure(&self, builder: ClientBuilder) -> ClientBuilder {
        if self.config.insecure {
            warn!("insecure mode requested but refused: crate built without insecure-tls");
        }
        builder
    }
}

impl Default for TransportManager {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}
