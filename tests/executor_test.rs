//! Action execution against a live Chrome.
//!
//! Skipped by default; run with `cargo test -- --ignored` where Chrome is
//! available.

mod test_server;

use chromacast::agent::aria::{AriaProvider, DataRefResolver, DomAriaProvider};
use chromacast::agent::executor::ActionExecutor;
use chromacast::browser::{ChromeDriver, ConnectionMode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use test_server::TestServer;

async fn launch_driver(cdp_port: u16) -> anyhow::Result<ChromeDriver> {
    ChromeDriver::new(ConnectionMode::Launch {
        chrome_path: None,
        cdp_port,
        no_sandbox: true,
        headless: true,
    })
    .await
    .map_err(|e| anyhow::anyhow!("failed to launch Chrome: {}", e))
}

#[tokio::test]
#[ignore = "requires a Chrome installation"]
async fn test_navigate_type_click_flow() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("test server not ready");

    let driver = launch_driver(9341).await.expect("launch failed");
    let page = driver.create_page(None).await.expect("create page failed");
    let resolver = Arc::new(DataRefResolver::new(page.clone()));
    let executor = ActionExecutor::new(page.clone(), resolver);

    let result = executor
        .execute("navigate", &json!({ "url": server.url() }))
        .await;
    assert!(result.success, "navigate failed: {:?}", result.error);

    // Tag the interactable elements with refs.
    let snapshot = DomAriaProvider.snapshot(&page).await.expect("snapshot failed");
    assert!(snapshot.contains("[ref=e"), "snapshot missing refs:\n{}", snapshot);

    // The fixture page has the search box first and the button second.
    let result = executor
        .execute("type", &json!({ "ref": "e0", "text": "hello studio" }))
        .await;
    assert!(result.success, "type failed: {:?}", result.error);

    let result = executor.execute("click", &json!({ "ref": "e1" })).await;
    assert!(result.success, "click failed: {:?}", result.error);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let out: String = page
        .evaluate("document.getElementById('out').textContent")
        .await
        .expect("evaluate failed")
        .into_value()
        .expect("no value");
    assert_eq!(out, "hello studio");

    driver.close().await.expect("close failed");
}

#[tokio::test]
#[ignore = "requires a Chrome installation"]
async fn test_select_by_value_and_label() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("test server not ready");

    let driver = launch_driver(9342).await.expect("launch failed");
    let page = driver.create_page(None).await.expect("create page failed");
    let resolver = Arc::new(DataRefResolver::new(page.clone()));
    let executor = ActionExecutor::new(page.clone(), resolver);

    assert!(
        executor
            .execute("navigate", &json!({ "url": server.url() }))
            .await
            .success
    );
    DomAriaProvider.snapshot(&page).await.expect("snapshot failed");

    // By value.
    let result = executor
        .execute("select", &json!({ "ref": "e2", "value": "de" }))
        .await;
    assert!(result.success, "select by value failed: {:?}", result.error);

    // By visible label.
    let result = executor
        .execute("select", &json!({ "ref": "e2", "value": "English" }))
        .await;
    assert!(result.success, "select by label failed: {:?}", result.error);

    let value: String = page
        .evaluate("document.getElementById('lang').value")
        .await
        .expect("evaluate failed")
        .into_value()
        .expect("no value");
    assert_eq!(value, "en");

    driver.close().await.expect("close failed");
}

#[tokio::test]
#[ignore = "requires a Chrome installation"]
async fn test_scroll_and_unresolved_ref() {
    let server = TestServer::start().await;
    server.wait_ready().await.expect("test server not ready");

    let driver = launch_driver(9343).await.expect("launch failed");
    let page = driver.create_page(None).await.expect("create page failed");
    let resolver = Arc::new(DataRefResolver::new(page.clone()));
    let executor = ActionExecutor::new(page.clone(), resolver);

    assert!(
        executor
            .execute("navigate", &json!({ "url": server.page_url("/tall") }))
            .await
            .success
    );

    let result = executor
        .execute("scroll", &json!({ "direction": "down", "amount": 1000 }))
        .await;
    assert!(result.success, "scroll failed: {:?}", result.error);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let offset: f64 = page
        .evaluate("window.scrollY")
        .await
        .expect("evaluate failed")
        .into_value()
        .expect("no value");
    assert!(offset > 0.0, "page did not scroll");

    // A ref that nothing tagged resolves to a clean failure.
    let result = executor.execute("click", &json!({ "ref": "e99" })).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Element not found"));

    driver.close().await.expect("close failed");
}
