use campus_sync::config::StorageConfig;
use campus_sync::storage::{DocumentOp, DocumentOpKind, HttpMethod, HttpRequestSpec};
use campus_sync::{Config, OfflineSync};
use tempfile::TempDir;

fn sled_config(dir: &TempDir) -> Config {
    Config {
        // Nothing listens here; every probe fails fast.
        api_base: "http://127.0.0.1:9".to_string(),
        probe_timeout_ms: 200,
        storage: StorageConfig::Sled {
            data_dir: dir.path().join("queues").to_str().expect("utf8").to_string(),
        },
        ..Config::default()
    }
}

fn attendance_put() -> HttpRequestSpec {
    HttpRequestSpec {
        method: HttpMethod::Put,
        url: "/api/attendance/2024-05-02".to_string(),
        headers: [("Content-Type".to_string(), "application/json".to_string())]
            .into_iter()
            .collect(),
        body: Some(r#"{"present":["s1","s2"]}"#.to_string()),
    }
}

#[tokio::test]
async fn pending_mutations_survive_a_restart() {
    let tmp = TempDir::new().expect("tempdir");
    let config = sled_config(&tmp);

    let (first, second, before) = {
        let sync = OfflineSync::open(&config).unwrap();
        let first = sync.queue_request(attendance_put()).unwrap();
        let second = sync
            .queue_document_op(DocumentOp {
                op: DocumentOpKind::Update,
                collection: "students".to_string(),
                doc_id: Some("s1".to_string()),
                data: Some(serde_json::json!({ "class": "JSS2" })),
            })
            .unwrap();
        assert!(!sync.check_online().await);
        (first, second, sync.pending().unwrap())
    };

    let sync = OfflineSync::open(&config).unwrap();
    assert_eq!(sync.queue_length(), 2);
    let after = sync.pending().unwrap();
    assert_eq!(after, before);
    assert_eq!(after[0].id, first);
    assert_eq!(after[1].id, second);

    // Timestamps keep increasing across the restart.
    let third = sync.queue_request(attendance_put()).unwrap();
    let pending = sync.pending().unwrap();
    assert_eq!(pending.last().map(|m| m.id.as_str()), Some(third.as_str()));
    assert!(pending[2].enqueued_at_ms > pending[1].enqueued_at_ms);
}

#[tokio::test]
async fn discard_is_durable() {
    let tmp = TempDir::new().expect("tempdir");
    let config = sled_config(&tmp);

    let keep = {
        let sync = OfflineSync::open(&config).unwrap();
        let drop_me = sync.queue_request(attendance_put()).unwrap();
        let keep = sync.queue_request(attendance_put()).unwrap();
        assert!(sync.discard(&drop_me).unwrap());
        keep
    };

    let sync = OfflineSync::open(&config).unwrap();
    let ids: Vec<String> = sync.pending().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![keep]);
}

#[tokio::test]
async fn full_queue_rejects_new_entries() {
    let tmp = TempDir::new().expect("tempdir");
    let config = Config {
        max_entries: Some(1),
        ..sled_config(&tmp)
    };

    let sync = OfflineSync::open(&config).unwrap();
    sync.queue_request(attendance_put()).unwrap();
    assert!(sync.queue_request(attendance_put()).is_err());
    assert_eq!(sync.queue_length(), 1);

    assert_eq!(
        sync.banner(),
        campus_sync::BannerState::Offline { pending: 1 }
    );
}
