use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{info, warn};

use crate::backend::{Backend, Credentials};
use crate::context::NetContext;
use crate::error::{Error, Result};
use crate::request::ResponseResult;

/// Runs a backend call and, when the response carries the backend's
/// expired-session signature, re-authenticates once and reruns the call
/// once. The second response is returned regardless of outcome; a failed
/// re-login returns the original response. Retries are bounded to exactly
/// one extra attempt no matter how often the signature recurs.
///
/// Concurrent callers against one backend may each trigger their own
/// re-login; the token swap is idempotent (last successful login wins) so
/// this costs duplicate work, not correctness.
pub async fn call_with_reauth<'a, F>(
    ctx: &'a NetContext,
    backend: &'a Backend,
    op: F,
) -> ResponseResult
where
    F: Fn() -> BoxFuture<'a, ResponseResult>,
{
    let first = op().await;
    if !backend.session_expired(&first) {
        return first;
    }
    match login(ctx, backend).await {
        Ok(()) => op().await,
        Err(err) => {
            warn!(backend = backend.name(), %err, "reauthentication failed, keeping original response");
            first
        }
    }
}

/// Logs into a backend with its password credentials and replaces its
/// session token. Token-credentialed and credential-less backends cannot
/// re-login.
pub async fn login(ctx: &NetContext, backend: &Backend) -> Result<()> {
    let (username, password) = match backend.credentials() {
        Credentials::Password { username, password } => (username, password),
        _ => {
            return Err(Error::Auth {
                backend: backend.name().to_string(),
                reason: "no password credentials to re-login with".to_string(),
            });
        }
    };

    let url = backend.login_url()?;
    let body = serde_json::json!({ "username": username, "password": password }).to_string();
    let res = ctx.post_json(url.as_str(), &body, &Default::default()).await;
    if !res.is_success() {
        return Err(Error::Auth {
            backend: backend.name().to_string(),
            reason: format!("login returned status {}", res.status),
        });
    }

    let token = backend.parse_login_token(&res.body)?;
    backend.set_token(token);
    info!(backend = backend.name(), "login succeeded, session token replaced");
    Ok(())
}

/// POSTs a JSON body to a backend endpoint under the reauth protocol.
/// Headers (including the session token) are recomputed per attempt so the
/// retry carries the fresh token.
pub async fn post_with_reauth(
    ctx: &NetContext,
    backend: &Backend,
    url: &str,
    body: &str,
) -> ResponseResult {
    call_with_reauth(ctx, backend, || {
        let url = url.to_string();
        let body = body.to_string();
        async move { ctx.post_json(&url, &body, &backend.headers()).await }.boxed()
    })
    .await
}
