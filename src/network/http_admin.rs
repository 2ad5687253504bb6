use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{header, Body, Method, Request, Response};

use crate::common::timestamp::now_ms;
use crate::network::metrics;
use crate::network::replay::ReplayTarget;
use crate::service::OfflineSync;

pub const ADMIN_TOKEN_ENV: &str = "CAMPUS_SYNC_ADMIN_TOKEN";

/// Serve `/health` and `/metrics` on an already bound listener until the
/// server fails or the task is dropped.
pub async fn run_http_admin<H, D>(
    listener: TcpListener,
    sync: Arc<OfflineSync<H, D>>,
) -> Result<(), hyper::Error>
where
    H: ReplayTarget + 'static,
    D: ReplayTarget + 'static,
{
    let admin_token = std::env::var(ADMIN_TOKEN_ENV).ok().map(Arc::new);

    let make_svc = make_service_fn(move |_conn| {
        let sync = Arc::clone(&sync);
        let admin_token = admin_token.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let sync = Arc::clone(&sync);
                let admin_token = admin_token.clone();
                async move { handle(req, sync, admin_token.as_deref().map(String::as_str)).await }
            }))
        }
    });

    listener.set_nonblocking(true).ok();
    hyper::Server::from_tcp(listener)?.serve(make_svc).await
}

fn json_response(status: u16, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() =
        hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}

fn json_error(status: u16, msg: &str) -> Response<Body> {
    json_response(status, serde_json::json!({ "error": msg }).to_string())
}

fn authenticate_http(req: &Request<Body>, admin_token: Option<&str>) -> Option<Response<Body>> {
    let expected = admin_token?;

    let raw = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return Some(json_error(401, "missing authorization header")),
    };
    let raw_str = match raw.to_str() {
        Ok(v) => v,
        Err(_) => return Some(json_error(401, "invalid authorization header")),
    };

    match raw_str.strip_prefix("Bearer ") {
        Some(token) if token == expected => None,
        Some(_) => Some(json_error(401, "invalid token")),
        None => Some(json_error(401, "invalid authorization scheme")),
    }
}

async fn handle<H, D>(
    req: Request<Body>,
    sync: Arc<OfflineSync<H, D>>,
    admin_token: Option<&str>,
) -> Result<Response<Body>, Infallible>
where
    H: ReplayTarget,
    D: ReplayTarget,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") => json_response(200, build_health(&sync)),
        (Method::GET, "/metrics") => {
            if let Some(denied) = authenticate_http(&req, admin_token) {
                return Ok(denied);
            }
            let snapshot = sync.status().await;
            let mut response = Response::new(Body::from(metrics::render_prometheus(
                snapshot.pending_generic,
                snapshot.pending_document,
                snapshot.connectivity.online,
            )));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        _ => json_error(404, "not found"),
    };

    Ok(response)
}

/// Same shape as the application's own health route, so this daemon can
/// itself serve as a probe target.
fn build_health<H, D>(sync: &OfflineSync<H, D>) -> String
where
    H: ReplayTarget,
    D: ReplayTarget,
{
    serde_json::json!({
        "status": "ok",
        "timestamp": now_ms(),
        "online": sync.is_online(),
        "pending": sync.queue_length(),
        "version": env!("CARGO_PKG_VERSION"),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/metrics");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn no_token_configured_allows_everything() {
        assert!(authenticate_http(&request(None), None).is_none());
    }

    #[test]
    fn token_is_checked_when_configured() {
        assert!(authenticate_http(&request(Some("Bearer s3cret")), Some("s3cret")).is_none());

        let denied = authenticate_http(&request(Some("Bearer nope")), Some("s3cret")).unwrap();
        assert_eq!(denied.status(), 401);

        let denied = authenticate_http(&request(Some("Basic abc")), Some("s3cret")).unwrap();
        assert_eq!(denied.status(), 401);

        let denied = authenticate_http(&request(None), Some("s3cret")).unwrap();
        assert_eq!(denied.status(), 401);
    }

    #[test]
    fn json_error_sets_content_type() {
        let resp = json_error(404, "not found");
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }
}
