// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use mbcas_controller::health;
use mbcas_controller::status::ControllerStatus;

#[tokio::test]
async fn readyz_is_503_before_first_reconcile_then_200_after() {
    let port = 19_092u16;
    let status = Arc::new(ControllerStatus::new(true));
    let handle = tokio::spawn(health::run(port, status.clone()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::builder().timeout(Duration::from_secs(2)).build().unwrap();
    let base = format!("http://127.0.0.1:{port}");

    let health_resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(health_resp.status().is_success());
    let body: serde_json::Value = health_resp.json().await.unwrap();
    assert_eq!(body["healthy"], true);
    assert_eq!(body["resizeSubresourceAvailable"], true);

    let ready_resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(ready_resp.status().as_u16(), 503);
    let ready_body: serde_json::Value = ready_resp.json().await.unwrap();
    assert_eq!(ready_body["ready"], false);

    status.mark_reconcile();

    let ready_resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(ready_resp.status().is_success());
    let ready_body: serde_json::Value = ready_resp.json().await.unwrap();
    assert_eq!(ready_body["ready"], true);

    let metrics_resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert!(metrics_resp.status().is_success());
    let metrics_body = metrics_resp.text().await.unwrap();
    assert!(metrics_body.contains("mbcas_controller_reconciles_total"));

    handle.abort();
}
