use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which queue (and replay target) a mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    GenericHttp,
    BackendDocumentOp,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::GenericHttp => write!(f, "generic-http"),
            MutationKind::BackendDocumentOp => write!(f, "backend-document-op"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// A plain HTTP request captured while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestSpec {
    pub method: HttpMethod,
    /// Absolute URL, or a path relative to the configured API base.
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentOpKind {
    Create,
    Update,
    Delete,
}

impl std::str::FromStr for DocumentOpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(DocumentOpKind::Create),
            "update" => Ok(DocumentOpKind::Update),
            "delete" => Ok(DocumentOpKind::Delete),
            other => Err(format!("unsupported document operation: {other}")),
        }
    }
}

/// A create/update/delete against a collection of the document backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOp {
    pub op: DocumentOpKind,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationPayload {
    GenericHttp(HttpRequestSpec),
    BackendDocumentOp(DocumentOp),
}

impl MutationPayload {
    pub fn kind(&self) -> MutationKind {
        match self {
            MutationPayload::GenericHttp(_) => MutationKind::GenericHttp,
            MutationPayload::BackendDocumentOp(_) => MutationKind::BackendDocumentOp,
        }
    }

    /// Resource the mutation touches, used to tell subscribers which lists
    /// need refetching once it has been applied.
    pub fn resource(&self) -> String {
        match self {
            MutationPayload::GenericHttp(req) => resource_path(&req.url).to_string(),
            MutationPayload::BackendDocumentOp(op) => op.collection.clone(),
        }
    }
}

fn resource_path(url: &str) -> &str {
    let without_scheme = match url.find("://") {
        Some(pos) => {
            let rest = &url[pos + 3..];
            rest.find('/').map(|i| &rest[i..]).unwrap_or("/")
        }
        None => url,
    };
    without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme)
}

/// A pending write waiting for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: String,
    pub payload: MutationPayload,
    pub enqueued_at_ms: u64,
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedMutation {
    pub fn new(id: String, payload: MutationPayload, enqueued_at_ms: u64) -> Self {
        Self {
            id,
            payload,
            enqueued_at_ms,
            attempts: 0,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.payload.kind()
    }

    /// How long the mutation has been waiting, in milliseconds.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.enqueued_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_kind_tag() {
        let m = QueuedMutation::new(
            "1-abc".to_string(),
            MutationPayload::BackendDocumentOp(DocumentOp {
                op: DocumentOpKind::Update,
                collection: "notices".to_string(),
                doc_id: Some("n1".to_string()),
                data: Some(serde_json::json!({"title": "Closed Friday"})),
            }),
            10,
        );

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["payload"]["backend-document-op"]["op"], "update");
        assert_eq!(json["attempts"], 0);

        let back: QueuedMutation = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
        assert_eq!(back.kind(), MutationKind::BackendDocumentOp);
    }

    #[test]
    fn missing_attempts_defaults_to_zero() {
        let raw = r#"{"id":"x","payload":{"generic-http":{"method":"POST","url":"/api/notices"}},"enqueued_at_ms":5}"#;
        let m: QueuedMutation = serde_json::from_str(raw).unwrap();
        assert_eq!(m.attempts, 0);
        assert_eq!(m.kind(), MutationKind::GenericHttp);
    }

    #[test]
    fn resource_strips_origin_and_query() {
        let http = MutationPayload::GenericHttp(HttpRequestSpec {
            method: HttpMethod::Post,
            url: "https://school.example/api/exams/assign?force=1".to_string(),
            headers: BTreeMap::new(),
            body: None,
        });
        assert_eq!(http.resource(), "/api/exams/assign");

        let relative = MutationPayload::GenericHttp(HttpRequestSpec {
            method: HttpMethod::Delete,
            url: "/api/events/7".to_string(),
            headers: BTreeMap::new(),
            body: None,
        });
        assert_eq!(relative.resource(), "/api/events/7");
    }

    #[test]
    fn age_saturates_for_clock_skew() {
        let m = QueuedMutation::new(
            "id".to_string(),
            MutationPayload::GenericHttp(HttpRequestSpec {
                method: HttpMethod::Get,
                url: "/".to_string(),
                headers: BTreeMap::new(),
                body: None,
            }),
            1_000,
        );
        assert_eq!(m.age_ms(1_500), 500);
        assert_eq!(m.age_ms(500), 0);
    }

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }
}
