use std::{collections::HashMap, sync::Arc, time::Duration};

use cs_net::{NetContext, RequestDescriptor, TransportConfig};
use cs_tests::{
    mock_backend::{start_mock_backend, MockBackendState},
    utils::setup_test_env,
};
use eyre::Result;
use tokio::time::Instant;

#[tokio::test]
async fn get_returns_body_and_headers() -> Result<()> {
    setup_test_env();
    let addr = start_mock_backend(Arc::new(MockBackendState::new())).await?;

    let ctx = NetContext::default();
    let res = ctx.get(&format!("http://{addr}/dest")).await;

    assert_eq!(res.status, 200);
    assert!(res.is_success());
    assert_eq!(res.body, "destination");
    assert!(res.header("content-length").is_some());
    Ok(())
}

#[tokio::test]
async fn unreachable_host_yields_failure_result_not_error() {
    setup_test_env();
    let ctx = NetContext::default();
    // nothing listens on this port
    let res = ctx.get("http://127.0.0.1:9/dest").await;

    assert_eq!(res.status, 500);
    assert!(res.body.is_empty());
    assert!(!res.is_success());
}

#[tokio::test]
async fn oversized_body_is_rejected_as_failure() -> Result<()> {
    setup_test_env();
    let addr = start_mock_backend(Arc::new(MockBackendState::new())).await?;

    let config = TransportConfig { max_response_bytes: 1024, ..Default::default() };
    let ctx = NetContext::new(config);
    // /big advertises 2048 bytes, past the configured cap
    let res = ctx.get(&format!("http://{addr}/big")).await;
    assert_eq!(res.status, 500);
    assert!(res.body.is_empty());

    // raise the cap and the same endpoint succeeds
    let ctx = NetContext::default();
    let res = ctx.get(&format!("http://{addr}/big")).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body.len(), 2048);
    Ok(())
}

#[tokio::test]
async fn fetch_location_reports_redirect_without_following() -> Result<()> {
    setup_test_env();
    let addr = start_mock_backend(Arc::new(MockBackendState::new())).await?;
    let ctx = NetContext::default();

    let location = ctx
        .fetch_location(&format!("http://{addr}/redirect"), &HashMap::new())
        .await?;
    assert_eq!(location.as_deref(), Some("/dest"));

    let location = ctx
        .fetch_location(&format!("http://{addr}/dest"), &HashMap::new())
        .await?;
    assert_eq!(location, None);
    Ok(())
}

#[tokio::test]
async fn fetch_location_propagates_transport_errors() {
    setup_test_env();
    let ctx = NetContext::default();
    let res = ctx.fetch_location("http://127.0.0.1:9/redirect", &HashMap::new()).await;
    assert!(res.is_err());
}

#[tokio::test]
async fn cancelling_a_tag_aborts_the_inflight_call() -> Result<()> {
    setup_test_env();
    let addr = start_mock_backend(Arc::new(MockBackendState::new())).await?;
    let ctx = Arc::new(NetContext::default());

    let descriptor = RequestDescriptor::get(format!("http://{addr}/slow/10000")).tag("player");
    let handle = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.execute(&descriptor).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let start = Instant::now();
    ctx.cancel("player");

    let res = handle.await?;
    assert_eq!(res.status, 500);
    assert!(start.elapsed() < Duration::from_secs(2), "cancel must not wait for the response");
    Ok(())
}

#[tokio::test]
async fn cancelling_one_tag_leaves_other_tags_running() -> Result<()> {
    setup_test_env();
    let addr = start_mock_backend(Arc::new(MockBackendState::new())).await?;
    let ctx = Arc::new(NetContext::default());

    let survivor = RequestDescriptor::get(format!("http://{addr}/slow/300")).tag("detail");
    let handle = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.execute(&survivor).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel("player");

    let res = handle.await?;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, "done");
    Ok(())
}
