use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use serde_json::Value;
use tokio::{task::JoinHandle, time::timeout_at};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::context::NetContext;
use crate::error::Result;
use crate::session;

/// Shared time budget for one fan-out search across all backends.
pub const SEARCH_DEADLINE: Duration = Duration::from_secs(15);

/// Runs every job on its own task and collects whatever completes before
/// one shared deadline. Jobs are elastic (one task each), so a large
/// backend set cannot starve itself waiting for pool slots. Results are
/// concatenated in submission order; jobs still running at the deadline are
/// aborted and contribute nothing, as do jobs that panicked.
pub async fn fan_out<T, Fut>(jobs: Vec<Fut>, deadline: Duration) -> Vec<T>
where
    T: Send + 'static,
    Fut: Future<Output = Vec<T>> + Send + 'static,
{
    let deadline = tokio::time::Instant::now() + deadline;
    let mut handles: Vec<JoinHandle<Vec<T>>> = jobs.into_iter().map(tokio::spawn).collect();

    let results = join_all(handles.iter_mut().map(|handle| timeout_at(deadline, handle))).await;

    let mut out = Vec::new();
    for (result, handle) in results.into_iter().zip(handles) {
        match result {
            Ok(Ok(list)) => out.extend(list),
            Ok(Err(err)) => warn!(%err, "fan-out job did not complete"),
            Err(_) => {
                debug!("fan-out job missed the deadline, abandoning");
                handle.abort();
            }
        }
    }
    out
}

/// Searches every searchable backend for `keyword` under the standard
/// deadline. One bad backend contributes an empty list instead of failing
/// the aggregate.
pub async fn search_all(
    ctx: &Arc<NetContext>,
    backends: &[Arc<Backend>],
    keyword: &str,
) -> Vec<Value> {
    search_all_with_deadline(ctx, backends, keyword, SEARCH_DEADLINE).await
}

pub async fn search_all_with_deadline(
    ctx: &Arc<NetContext>,
    backends: &[Arc<Backend>],
    keyword: &str,
    deadline: Duration,
) -> Vec<Value> {
    let jobs: Vec<_> = backends
        .iter()
        .filter(|backend| backend.searchable())
        .map(|backend| {
            let ctx = Arc::clone(ctx);
            let backend = Arc::clone(backend);
            let keyword = keyword.to_string();
            async move {
                match search_backend(&ctx, &backend, &keyword).await {
                    Ok(hits) => hits,
                    Err(err) => {
                        warn!(backend = backend.name(), %err, "backend search failed");
                        Vec::new()
                    }
                }
            }
        })
        .collect();

    debug!(jobs = jobs.len(), "fanning out search");
    fan_out(jobs, deadline).await
}

/// One full single-backend query: reauth-protected POST plus envelope
/// parsing.
pub async fn search_backend(
    ctx: &NetContext,
    backend: &Backend,
    keyword: &str,
) -> Result<Vec<Value>> {
    let url = backend.search_url()?;
    let body = backend.search_params(keyword).to_string();
    let res = session::post_with_reauth(ctx, backend, url.as_str(), &body).await;
    backend.parse_search_results(&res.body)
}
