// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use mbcas_agent::config::AgentConfig;
use mbcas_agent::health;
use mbcas_agent::status::AgentStatus;
use mbcas_agent::tracker::DemandTracker;

fn test_config() -> AgentConfig {
    std::env::set_var("HEALTH_PORT", "0");
    std::env::set_var("NODE_NAME", "test-node");
    AgentConfig::load()
}

#[tokio::test]
async fn readyz_is_503_before_first_sample_then_200_after() {
    let cfg = test_config();
    let tracker = Arc::new(DemandTracker::new());
    tracker.with_state(&"pod-a".to_string(), |s| s.smoothed_demand = 0.4);
    let status = Arc::new(AgentStatus::new(true));

    // Port 0 only picks an ephemeral port for the actual bind; since the
    // handler doesn't expose the bound port back, this smoke test exercises
    // a fixed high port instead, matching the teacher's ephemeral-bind test
    // shape but avoiding a race on port discovery.
    let port = 19_091u16;
    let mut cfg = cfg;
    cfg.health_port = port;

    let handle = tokio::spawn(health::run(cfg, tracker, status.clone()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::builder().timeout(Duration::from_secs(2)).build().unwrap();
    let base = format!("http://127.0.0.1:{port}");

    let health_resp = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert!(health_resp.status().is_success());
    let health_body: serde_json::Value = health_resp.json().await.unwrap();
    assert_eq!(health_body["cgroupDetection"], true);
    assert_eq!(health_body["podsTracked"], 1);

    let ready_resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(ready_resp.status().as_u16(), 503);
    let ready_body: serde_json::Value = ready_resp.json().await.unwrap();
    assert_eq!(ready_body["ready"], false);

    status.mark_sample();

    let ready_resp = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert!(ready_resp.status().is_success());
    let ready_body: serde_json::Value = ready_resp.json().await.unwrap();
    assert_eq!(ready_body["ready"], true);

    let metrics_resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert!(metrics_resp.status().is_success());

    handle.abort();
}
