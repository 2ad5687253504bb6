mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use campus_sync::network::{ConnectivityMonitor, HttpClient, NetworkHint, ProbeFailure};
use common::{health_ok, spawn_server};

fn monitor_for(url: String) -> ConnectivityMonitor {
    ConnectivityMonitor::new(url, Duration::from_millis(300), Duration::from_secs(60))
}

#[tokio::test]
async fn healthy_endpoint_reports_online() {
    let addr = spawn_server(|req| {
        assert_eq!(req.path, "/health");
        health_ok()
    });

    let monitor = monitor_for(format!("http://{addr}/health"));
    assert!(monitor.check_online().await);
    assert!(monitor.is_online());
    assert!(monitor.state().last_checked_at_ms.is_some());
}

#[tokio::test]
async fn wrong_body_is_offline() {
    let addr = spawn_server(|_| (200, r#"{"status":"degraded"}"#.to_string()));

    let client = HttpClient::new(Duration::from_millis(300));
    let result = ConnectivityMonitor::check_once(&client, &format!("http://{addr}/health")).await;
    assert!(matches!(result, Err(ProbeFailure::UnexpectedBody(_))));

    let monitor = monitor_for(format!("http://{addr}/health"));
    assert!(!monitor.check_online().await);
}

#[tokio::test]
async fn server_error_is_offline() {
    let addr = spawn_server(|_| (500, "{}".to_string()));

    let client = HttpClient::new(Duration::from_millis(300));
    let result = ConnectivityMonitor::check_once(&client, &format!("http://{addr}/health")).await;
    assert!(matches!(result, Err(ProbeFailure::Status(500))));
}

#[tokio::test]
async fn refused_connection_is_offline() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let monitor = monitor_for(format!("http://127.0.0.1:{port}/health"));
    assert!(!monitor.check_online().await);
    assert!(monitor.state().last_checked_at_ms.is_some());
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hold = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            match listener.accept().await {
                Ok((socket, _)) => held.push(socket),
                Err(_) => break,
            }
        }
    });

    let client = HttpClient::new(Duration::from_millis(200));
    let started = tokio::time::Instant::now();
    let result = ConnectivityMonitor::check_once(&client, &format!("http://{addr}/health")).await;
    assert!(matches!(result, Err(ProbeFailure::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(2));

    hold.abort();
}

#[tokio::test]
async fn handlers_see_transitions_only() {
    let healthy = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let flag = Arc::clone(&healthy);
    let addr = spawn_server(move |_| {
        if flag.load(Ordering::SeqCst) {
            health_ok()
        } else {
            (503, "{}".to_string())
        }
    });

    let monitor = monitor_for(format!("http://{addr}/health"));
    let changes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&changes);
    let _sub = monitor.on_network_change(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    assert!(monitor.check_online().await);
    assert!(monitor.check_online().await);
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    healthy.store(false, Ordering::SeqCst);
    assert!(!monitor.check_online().await);
    assert!(!monitor.check_online().await);
    assert_eq!(changes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn online_hint_triggers_an_immediate_probe() {
    let addr = spawn_server(|_| health_ok());
    let monitor = Arc::new(monitor_for(format!("http://{addr}/health")));
    let mut watch = monitor.watch();
    let hints = monitor.hint_sender();

    let task = tokio::spawn(Arc::clone(&monitor).run());

    // The first tick probes right away; wait for it, then go offline by hint.
    tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|s| s.online))
        .await
        .expect("first probe")
        .expect("monitor alive");

    hints.send(NetworkHint::Offline).unwrap();
    tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|s| !s.online))
        .await
        .expect("offline hint applied")
        .expect("monitor alive");

    // The interval is a minute, so only the hint can bring it back quickly.
    hints.send(NetworkHint::Online).unwrap();
    tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|s| s.online))
        .await
        .expect("online hint probed")
        .expect("monitor alive");

    task.abort();
}
