use std::future::Future;

use crate::config::{resolve_url, DocumentBackendConfig};
use crate::network::client::HttpClient;
use crate::network::error::{classify_status, ReplayError};
use crate::storage::mutation::{DocumentOp, DocumentOpKind, MutationPayload, QueuedMutation};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const PROJECT_HEADER: &str = "X-Project-Id";

/// Something that can apply a queued mutation to its backend.
///
/// Implementations classify every failure as transient or permanent; the
/// drainer never inspects transport details itself.
pub trait ReplayTarget: Send + Sync {
    fn replay(
        &self,
        mutation: &QueuedMutation,
    ) -> impl Future<Output = Result<(), ReplayError>> + Send;
}

/// Replays generic HTTP requests captured while offline.
pub struct HttpReplayer {
    client: HttpClient,
    api_base: String,
    auth_token: Option<String>,
}

impl HttpReplayer {
    pub fn new<T: Into<String>>(client: HttpClient, api_base: T) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

impl ReplayTarget for HttpReplayer {
    async fn replay(&self, mutation: &QueuedMutation) -> Result<(), ReplayError> {
        let MutationPayload::GenericHttp(request) = &mutation.payload else {
            return Err(ReplayError::Permanent(format!(
                "{} mutation routed to the HTTP replayer",
                mutation.kind()
            )));
        };

        let url = resolve_url(&self.api_base, &request.url);
        let mut headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(token) = &self.auth_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers.push((IDEMPOTENCY_HEADER.to_string(), mutation.id.clone()));

        let response = self
            .client
            .send(request.method.as_str(), &url, &headers, request.body.clone())
            .await?;
        classify_status(response.status, &response.body)
    }
}

/// Replays document create/update/delete operations over the document
/// backend's REST API.
pub struct DocumentReplayer {
    client: HttpClient,
    backend: DocumentBackendConfig,
    auth_token: Option<String>,
}

impl DocumentReplayer {
    pub fn new(client: HttpClient, backend: DocumentBackendConfig) -> Self {
        Self {
            client,
            backend,
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn documents_url(&self, collection: &str) -> String {
        format!(
            "{}/databases/{}/collections/{}/documents",
            self.backend.endpoint.trim_end_matches('/'),
            self.backend.database_id,
            collection
        )
    }

    fn headers(&self, mutation: &QueuedMutation) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (IDEMPOTENCY_HEADER.to_string(), mutation.id.clone()),
        ];
        if let Some(project) = &self.backend.project_id {
            headers.push((PROJECT_HEADER.to_string(), project.clone()));
        }
        if let Some(token) = &self.auth_token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    async fn apply(&self, mutation: &QueuedMutation, op: &DocumentOp) -> Result<(), ReplayError> {
        let headers = self.headers(mutation);
        let base = self.documents_url(&op.collection);
        let data = op.data.clone().unwrap_or_else(|| serde_json::json!({}));

        match op.op {
            DocumentOpKind::Create => {
                // The document id is fixed at enqueue time, so a create that
                // already landed before a crash comes back as a conflict.
                let doc_id = op.doc_id.as_deref().unwrap_or(&mutation.id);
                let body = serde_json::json!({ "documentId": doc_id, "data": data });
                let response = self
                    .client
                    .send("POST", &base, &headers, Some(body.to_string()))
                    .await?;
                if response.status == 409 {
                    log::debug!("Document {doc_id} already exists; treating create as applied");
                    return Ok(());
                }
                classify_status(response.status, &response.body)
            }
            DocumentOpKind::Update => {
                let doc_id = require_doc_id(op)?;
                let body = serde_json::json!({ "data": data });
                let response = self
                    .client
                    .send(
                        "PATCH",
                        &format!("{base}/{doc_id}"),
                        &headers,
                        Some(body.to_string()),
                    )
                    .await?;
                classify_status(response.status, &response.body)
            }
            DocumentOpKind::Delete => {
                let doc_id = require_doc_id(op)?;
                let response = self
                    .client
                    .send("DELETE", &format!("{base}/{doc_id}"), &headers, None)
                    .await?;
                if response.status == 404 {
                    log::debug!("Document {doc_id} already gone; treating delete as applied");
                    return Ok(());
                }
                classify_status(response.status, &response.body)
            }
        }
    }
}

fn require_doc_id(op: &DocumentOp) -> Result<&str, ReplayError> {
    op.doc_id.as_deref().ok_or_else(|| {
        ReplayError::Permanent(format!(
            "{:?} on '{}' has no document id",
            op.op, op.collection
        ))
    })
}

impl ReplayTarget for DocumentReplayer {
    async fn replay(&self, mutation: &QueuedMutation) -> Result<(), ReplayError> {
        match &mutation.payload {
            MutationPayload::BackendDocumentOp(op) => self.apply(mutation, op).await,
            MutationPayload::GenericHttp(_) => Err(ReplayError::Permanent(format!(
                "{} mutation routed to the document replayer",
                mutation.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn replayer() -> DocumentReplayer {
        DocumentReplayer::new(
            HttpClient::new(Duration::from_millis(200)),
            DocumentBackendConfig {
                endpoint: "http://db.local/v1/".to_string(),
                database_id: "school".to_string(),
                project_id: Some("campus".to_string()),
            },
        )
        .with_auth_token("secret")
    }

    fn doc(op: DocumentOpKind, doc_id: Option<&str>) -> QueuedMutation {
        QueuedMutation::new(
            "1-abc".to_string(),
            MutationPayload::BackendDocumentOp(DocumentOp {
                op,
                collection: "subjects".to_string(),
                doc_id: doc_id.map(str::to_string),
                data: None,
            }),
            0,
        )
    }

    #[test]
    fn documents_url_is_built_from_backend_config() {
        assert_eq!(
            replayer().documents_url("subjects"),
            "http://db.local/v1/databases/school/collections/subjects/documents"
        );
    }

    #[test]
    fn headers_carry_dedupe_key_project_and_auth() {
        let r = replayer();
        let headers = r.headers(&doc(DocumentOpKind::Create, None));
        let find = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find(IDEMPOTENCY_HEADER), Some("1-abc"));
        assert_eq!(find(PROJECT_HEADER), Some("campus"));
        assert_eq!(find("Authorization"), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn update_without_doc_id_is_permanent() {
        let err = replayer()
            .replay(&doc(DocumentOpKind::Update, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Permanent(_)));
    }

    #[tokio::test]
    async fn wrong_kind_is_permanent() {
        let http = HttpReplayer::new(HttpClient::new(Duration::from_millis(200)), "http://x");
        let err = http
            .replay(&doc(DocumentOpKind::Delete, Some("d")))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Permanent(_)));
    }
}
