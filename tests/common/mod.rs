#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::HeaderMap;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response};

use campus_sync::config::StorageConfig;
use campus_sync::Config;

/// A request as seen by a fixture server.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Serve `handler` on an ephemeral local port. Must be called inside a
/// tokio runtime; the server lives until the runtime shuts down.
pub fn spawn_server<F>(handler: F) -> SocketAddr
where
    F: Fn(&Recorded) -> (u16, String) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind fixture server");
    listener.set_nonblocking(true).expect("nonblocking");
    let addr = listener.local_addr().expect("local_addr");

    let make_svc = make_service_fn(move |_conn| {
        let handler = Arc::clone(&handler);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let handler = Arc::clone(&handler);
                async move {
                    let (parts, body) = req.into_parts();
                    let bytes = hyper::body::to_bytes(body).await?;
                    let recorded = Recorded {
                        method: parts.method.to_string(),
                        path: parts.uri.path().to_string(),
                        headers: parts.headers,
                        body: String::from_utf8_lossy(&bytes).into_owned(),
                    };
                    let (status, body) = handler(&recorded);
                    let response = Response::builder()
                        .status(status)
                        .header("Content-Type", "application/json")
                        .body(Body::from(body))
                        .expect("fixture response");
                    Ok::<_, hyper::Error>(response)
                }
            }))
        }
    });

    let server = hyper::Server::from_tcp(listener)
        .expect("fixture server")
        .serve(make_svc);
    tokio::spawn(async move {
        let _ = server.await;
    });
    addr
}

pub fn health_ok() -> (u16, String) {
    (200, r#"{"status":"ok","timestamp":1}"#.to_string())
}

/// Config pointing both the API and the document backend at `addr`, with
/// in-memory queues and short timeouts.
pub fn config_for(addr: SocketAddr) -> Config {
    let mut config = Config {
        api_base: format!("http://{addr}"),
        storage: StorageConfig::Memory,
        probe_timeout_ms: 500,
        request_timeout_ms: 1_000,
        backoff_base_ms: 10,
        backoff_max_ms: 50,
        ..Config::default()
    };
    config.document.endpoint = format!("http://{addr}/v1");
    config.document.database_id = "school".to_string();
    config
}
