use thiserror::Error;

/// Why a reachability probe did not confirm the backend. Never shown to the
/// user; it only turns the connectivity state offline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("probe timed out")]
    Timeout,

    #[error("probe connection failed: {0}")]
    Connect(String),

    #[error("probe answered HTTP {0}")]
    Status(u16),

    #[error("probe body not recognised: {0}")]
    UnexpectedBody(String),

    #[error("invalid probe target: {0}")]
    InvalidTarget(String),
}

/// Outcome of a failed replay, as classified for the drain policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// Backend unreachable, overloaded or rate limiting. Keep the entry and
    /// stop draining.
    #[error("transient replay failure: {0}")]
    Transient(String),

    /// The backend will never accept this mutation. Drop it and report a
    /// lost write.
    #[error("permanent replay failure: {0}")]
    Permanent(String),
}

impl ReplayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ReplayError::Transient(_))
    }
}

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Timeout error")]
    TimeoutError,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Transport error: {0}")]
    TransportError(#[source] reqwest::Error),
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::TimeoutError
        } else {
            HttpError::TransportError(err)
        }
    }
}

impl From<HttpError> for ReplayError {
    fn from(err: HttpError) -> Self {
        match err {
            // A request that cannot even be built will never succeed.
            HttpError::InvalidRequest(msg) => ReplayError::Permanent(msg),
            err @ HttpError::UnsupportedScheme(_) => ReplayError::Permanent(err.to_string()),
            other => ReplayError::Transient(other.to_string()),
        }
    }
}

impl From<HttpError> for ProbeFailure {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::TimeoutError => ProbeFailure::Timeout,
            HttpError::InvalidRequest(msg) | HttpError::UnsupportedScheme(msg) => {
                ProbeFailure::InvalidTarget(msg)
            }
            HttpError::TransportError(e) => ProbeFailure::Connect(e.to_string()),
        }
    }
}

/// Map an HTTP status to the drain policy: 2xx applied, 408/429/5xx
/// retried later, every other 4xx rejected for good.
pub fn classify_status(status: u16, body: &[u8]) -> Result<(), ReplayError> {
    match status {
        200..=299 => Ok(()),
        408 | 429 | 500..=599 => Err(ReplayError::Transient(describe(status, body))),
        _ => Err(ReplayError::Permanent(describe(status, body))),
    }
}

fn describe(status: u16, body: &[u8]) -> String {
    const MAX_BODY: usize = 200;
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        format!("HTTP {status}")
    } else {
        let snippet: String = text.chars().take(MAX_BODY).collect();
        format!("HTTP {status}: {snippet}")
    }
}
