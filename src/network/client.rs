use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Body, Method, Request, Url};

use super::error::HttpError;

/// Response status and fully buffered body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Thin reqwest client (http and https) with a per-request deadline
/// covering connect, headers and body.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let inner = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .gzip(true)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to a default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.send("GET", url, &[], None).await
    }

    pub async fn send(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<String>,
    ) -> Result<HttpResponse, HttpError> {
        let request = build_request(method, url, headers, body)?;

        let exchange = async {
            let response = self.inner.execute(request).await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, HttpError>(HttpResponse {
                status,
                body: body.to_vec(),
            })
        };

        // Also bounds the fallback client, which has no deadline of its own.
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::TimeoutError),
        }
    }
}

fn build_request(
    method: &str,
    url: &str,
    headers: &[(String, String)],
    body: Option<String>,
) -> Result<Request, HttpError> {
    let url = Url::parse(url).map_err(|e| HttpError::InvalidRequest(format!("{url}: {e}")))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(HttpError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(HttpError::InvalidRequest(format!("{url}: missing host")));
    }

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;

    let mut request = Request::new(method, url);
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HttpError::InvalidRequest(format!("header {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| HttpError::InvalidRequest(format!("header {name}: {e}")))?;
        request.headers_mut().append(name, value);
    }
    if !request.headers().contains_key(USER_AGENT) {
        request.headers_mut().insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("campus-sync/", env!("CARGO_PKG_VERSION"))),
        );
    }
    if let Some(body) = body {
        *request.body_mut() = Some(Body::from(body));
    }
    Ok(request)
}
