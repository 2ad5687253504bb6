mod common;

use std::sync::Arc;
use std::time::Duration;

use campus_sync::network::{run_http_admin, HttpClient};
use campus_sync::storage::{HttpMethod, HttpRequestSpec};
use campus_sync::OfflineSync;
use common::{config_for, health_ok, spawn_server};

#[tokio::test]
async fn health_and_metrics_reflect_the_queue() {
    let api = spawn_server(|_| health_ok());
    let sync = Arc::new(OfflineSync::open(&config_for(api)).unwrap());
    sync.queue_request(HttpRequestSpec {
        method: HttpMethod::Delete,
        url: "/api/events/42".to_string(),
        headers: Default::default(),
        body: None,
    })
    .unwrap();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let admin = listener.local_addr().unwrap();
    let server = tokio::spawn(run_http_admin(listener, Arc::clone(&sync)));

    let client = HttpClient::new(Duration::from_secs(2));

    let health = client.get(&format!("http://{admin}/health")).await.unwrap();
    assert_eq!(health.status, 200);
    let body: serde_json::Value = serde_json::from_slice(&health.body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pending"], 1);
    assert_eq!(body["online"], false);

    let metrics = client.get(&format!("http://{admin}/metrics")).await.unwrap();
    assert_eq!(metrics.status, 200);
    let text = String::from_utf8_lossy(&metrics.body);
    assert!(text.contains("campus_sync_pending_mutations{queue=\"generic\"} 1"));
    assert!(text.contains("campus_sync_online 0"));

    let missing = client.get(&format!("http://{admin}/nope")).await.unwrap();
    assert_eq!(missing.status, 404);

    server.abort();
}
