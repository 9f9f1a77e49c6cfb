use std::sync::Arc;

use cs_net::{fanout::search_backend, session, NetContext};
use cs_tests::{
    mock_backend::{start_mock_backend, MockBackendState},
    utils::{password_backend, setup_test_env, token_backend},
};
use eyre::Result;

#[tokio::test]
async fn expired_session_triggers_one_login_and_one_retry() -> Result<()> {
    setup_test_env();
    let state = Arc::new(MockBackendState::new());
    let addr = start_mock_backend(Arc::clone(&state)).await?;

    let ctx = NetContext::default();
    let backend = password_backend("disk", addr);
    // no session yet, so the first search comes back expired
    let hits = search_backend(&ctx, &backend, "movie").await?;

    assert_eq!(hits.len(), 2);
    assert_eq!(state.received_logins(), 1);
    assert_eq!(state.received_searches(), 2);
    assert!(backend.token().is_some());
    Ok(())
}

#[tokio::test]
async fn valid_session_never_touches_the_login_endpoint() -> Result<()> {
    setup_test_env();
    let state = Arc::new(MockBackendState::new());
    state.seed_token("tok-seeded");
    let addr = start_mock_backend(Arc::clone(&state)).await?;

    let ctx = NetContext::default();
    let backend = token_backend("disk", addr, "tok-seeded");
    let hits = search_backend(&ctx, &backend, "movie").await?;

    assert_eq!(hits.len(), 2);
    assert_eq!(state.received_logins(), 0);
    assert_eq!(state.received_searches(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_relogin_returns_the_original_response() -> Result<()> {
    setup_test_env();
    let state = Arc::new(MockBackendState::new());
    state.set_login_body_override(Some("gateway exploded".to_string()));
    let addr = start_mock_backend(Arc::clone(&state)).await?;

    let ctx = NetContext::default();
    let backend = password_backend("disk", addr);
    let url = backend.search_url()?;
    let body = backend.search_params("movie").to_string();
    let res = session::post_with_reauth(&ctx, &backend, url.as_str(), &body).await;

    // the original expired response, not a second attempt
    assert!(backend.session_expired(&res));
    assert_eq!(state.received_logins(), 1);
    assert_eq!(state.received_searches(), 1);
    assert!(backend.token().is_none());
    Ok(())
}

#[tokio::test]
async fn recurring_expiry_marker_is_retried_exactly_once() -> Result<()> {
    setup_test_env();
    let state = Arc::new(MockBackendState::new());
    state.set_always_expired(true);
    let addr = start_mock_backend(Arc::clone(&state)).await?;

    let ctx = NetContext::default();
    let backend = password_backend("disk", addr);
    let url = backend.search_url()?;
    let body = backend.search_params("movie").to_string();
    let res = session::post_with_reauth(&ctx, &backend, url.as_str(), &body).await;

    // the retry still carries the marker; no further loops
    assert!(backend.session_expired(&res));
    assert_eq!(state.received_logins(), 1);
    assert_eq!(state.received_searches(), 2);
    Ok(())
}

#[tokio::test]
async fn token_backend_cannot_relogin() -> Result<()> {
    setup_test_env();
    let state = Arc::new(MockBackendState::new());
    let addr = start_mock_backend(Arc::clone(&state)).await?;

    let ctx = NetContext::default();
    // stale static token, so every response carries the marker
    let backend = token_backend("disk", addr, "tok-stale");
    let url = backend.search_url()?;
    let body = backend.search_params("movie").to_string();
    let res = session::post_with_reauth(&ctx, &backend, url.as_str(), &body).await;

    assert!(backend.session_expired(&res));
    assert_eq!(state.received_logins(), 0);
    assert_eq!(state.received_searches(), 1);
    Ok(())
}

#[tokio::test]
async fn explicit_login_replaces_the_session_token() -> Result<()> {
    setup_test_env();
    let state = Arc::new(MockBackendState::new());
    let addr = start_mock_backend(Arc::clone(&state)).await?;

    let ctx = NetContext::default();
    let backend = password_backend("disk", addr);
    session::login(&ctx, &backend).await?;
    let first = backend.token().expect("first login issues a token");

    session::login(&ctx, &backend).await?;
    let second = backend.token().expect("second login issues a token");

    assert_ne!(first, second);
    assert_eq!(state.received_logins(), 2);
    Ok(())
}
