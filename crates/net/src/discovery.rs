use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::{
    sync::{mpsc, Semaphore},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::context::NetContext;

/// Health-check response the local proxy returns when reachable.
pub const HEALTH_OK: &str = "ok";

/// How the discovery walks the port space. The default mirrors the local
/// proxy's conventions; tests narrow it to stay fast.
#[derive(Debug, Clone)]
pub struct DiscoveryPlan {
    /// Probed serially first, in order.
    pub well_known_ports: Vec<u16>,
    pub scan_start: u16,
    pub scan_end: u16,
    /// Bound for one probe, independent of the scan deadline.
    pub probe_timeout: Duration,
    /// Total budget for the concurrent range scan.
    pub scan_deadline: Duration,
    /// Concurrent probe cap during the range scan.
    pub scan_workers: usize,
}

impl Default for DiscoveryPlan {
    fn default() -> Self {
        Self {
            well_known_ports: vec![9978, 9977, 9979, 8080, 8888, 9000],
            scan_start: 9900,
            scan_end: 9999,
            probe_timeout: Duration::from_millis(200),
            scan_deadline: Duration::from_secs(10),
            scan_workers: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DiscoveryState {
    port: u16,
    scanned: bool,
}

/// Locates the listening port of the co-located local proxy: serial probes
/// of the well-known list, then a bounded concurrent scan of the numeric
/// range. The outcome is cached for the process lifetime; an exhausted scan
/// is cached too, so dependents treat "unresolved" as "proxy unavailable"
/// instead of re-scanning on every call.
pub struct PortDiscovery {
    plan: DiscoveryPlan,
    state: Mutex<DiscoveryState>,
    /// Serializes discovery so concurrent first callers share one scan.
    scan_guard: tokio::sync::Mutex<()>,
    probes: Arc<AtomicU64>,
}

impl PortDiscovery {
    pub fn new() -> Self {
        Self::with_plan(DiscoveryPlan::default())
    }

    pub fn with_plan(plan: DiscoveryPlan) -> Self {
        Self {
            plan,
            state: Mutex::new(DiscoveryState::default()),
            scan_guard: tokio::sync::Mutex::new(()),
            probes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Resolved port, `None` while unresolved.
    pub fn port(&self) -> Option<u16> {
        let state = self.state.lock();
        (state.port > 0).then_some(state.port)
    }

    /// Base URL for proxy-style requests, once resolved.
    pub fn proxy_url(&self) -> Option<String> {
        self.port().map(|port| format!("http://127.0.0.1:{port}/proxy"))
    }

    /// Total probes issued so far; a cached second resolve adds zero.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    /// Forgets the cached outcome so the next `resolve` scans again.
    pub fn reset(&self) {
        *self.state.lock() = DiscoveryState::default();
    }

    /// Returns the proxy port, running discovery at most once per process
    /// lifetime (until `reset`). Repeat calls return the cached outcome
    /// without touching the network.
    pub async fn resolve(&self, ctx: &NetContext) -> Option<u16> {
        if let Some(done) = self.cached() {
            return done;
        }
        let _guard = self.scan_guard.lock().await;
        // a concurrent caller may have finished discovery while we waited
        if let Some(done) = self.cached() {
            return done;
        }

        let client = ctx.transport().client_with_timeout(self.plan.probe_timeout);

        for &port in &self.plan.well_known_ports {
            if self.probe(&client, port).await {
                info!(port, "local proxy found on well-known port");
                self.finish(port);
                return Some(port);
            }
        }

        debug!(
            start = self.plan.scan_start,
            end = self.plan.scan_end,
            "well-known ports exhausted, scanning range"
        );
        let found = self.scan(&client).await;
        match found {
            Some(port) => info!(port, "local proxy found by range scan"),
            None => warn!("local proxy not found, treating as unavailable"),
        }
        self.finish(found.unwrap_or(0));
        found
    }

    /// `Some(outcome)` when discovery already ran: `Some(Some(port))` or
    /// `Some(None)` for a completed-but-empty scan.
    fn cached(&self) -> Option<Option<u16>> {
        let state = self.state.lock();
        if state.port > 0 {
            Some(Some(state.port))
        } else if state.scanned {
            Some(None)
        } else {
            None
        }
    }

    fn finish(&self, port: u16) {
        let mut state = self.state.lock();
        state.port = port;
        state.scanned = true;
    }

    async fn probe(&self, client: &Client, port: u16) -> bool {
        probe_port(client, port, self.plan.probe_timeout, &self.probes).await
    }

    /// Concurrent scan of the configured range: at most `scan_workers`
    /// sockets open at once, first success wins, remaining jobs are
    /// best-effort aborted, all under one deadline.
    async fn scan(&self, client: &Client) -> Option<u16> {
        let semaphore = Arc::new(Semaphore::new(self.plan.scan_workers));
        let range = self.plan.scan_start..=self.plan.scan_end;
        let (tx, mut rx) = mpsc::channel::<u16>(16);

        let mut handles = Vec::new();
        for port in range {
            let semaphore = Arc::clone(&semaphore);
            let client = client.clone();
            let probes = Arc::clone(&self.probes);
            let probe_timeout = self.plan.probe_timeout;
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if probe_port(&client, port, probe_timeout, &probes).await {
                    let _ = tx.try_send(port);
                }
            }));
        }
        drop(tx);

        // recv returns None once every worker has finished empty-handed,
        // so a full miss ends before the deadline does
        let found = match timeout(self.plan.scan_deadline, rx.recv()).await {
            Ok(Some(port)) => Some(port),
            Ok(None) => None,
            Err(_) => None,
        };
        for handle in &handles {
            handle.abort();
        }
        found
    }
}

impl Default for PortDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// One health probe, hard-bounded by its own timeout so a hung socket
/// cannot eat the scan budget.
async fn probe_port(
    client: &Client,
    port: u16,
    probe_timeout: Duration,
    probes: &AtomicU64,
) -> bool {
    probes.fetch_add(1, Ordering::Relaxed);
    let url = format!("http://127.0.0.1:{port}/proxy?do=ck");
    let attempt = async {
        let res = client.get(&url).send().await.ok()?;
        res.text().await.ok()
    };
    match timeout(probe_timeout, attempt).await {
        Ok(Some(body)) => body == HEALTH_OK,
        _ => false,
    }
}
