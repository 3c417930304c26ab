use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{TimeZone, Utc};
use logship::config::ClientConfig;
use logship::{new_client, LabelSet, Metrics};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Loki push endpoint that records requests and answers with queued status
/// codes, then 204 once the queue is empty.
#[derive(Default)]
struct FakeLoki {
    requests: Mutex<Vec<(HeaderMap, Value)>>,
    responses: Mutex<VecDeque<StatusCode>>,
}

impl FakeLoki {
    fn requests(&self) -> Vec<(HeaderMap, Value)> {
        self.requests.lock().unwrap().clone()
    }

    /// `(timestamp, line)` pairs of every stream matching `job`, in the
    /// order they were received.
    fn values_for_job(&self, job: &str) -> Vec<(String, String)> {
        let mut values = Vec::new();
        for (_, body) in self.requests() {
            for stream in body["streams"].as_array().unwrap() {
                if stream["stream"]["job"] != job {
                    continue;
                }
                for value in stream["values"].as_array().unwrap() {
                    values.push((
                        value[0].as_str().unwrap().to_string(),
                        value[1].as_str().unwrap().to_string(),
                    ));
                }
            }
        }
        values
    }
}

async fn push(State(loki): State<Arc<FakeLoki>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    loki.requests.lock().unwrap().push((headers, body));
    loki.responses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::NO_CONTENT)
}

async fn spawn_fake_loki(responses: Vec<StatusCode>) -> (String, Arc<FakeLoki>) {
    let loki = Arc::new(FakeLoki {
        responses: Mutex::new(responses.into()),
        ..FakeLoki::default()
    });

    let app = Router::new()
        .route("/loki/api/v1/push", post(push))
        .with_state(Arc::clone(&loki));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/loki/api/v1/push", addr), loki)
}

fn fast_retry_config(url: &str) -> ClientConfig {
    let mut config = ClientConfig::with_url(url);
    config.batch_wait = Duration::from_millis(50);
    config.backoff.min_period = Duration::from_millis(10);
    config.backoff.max_period = Duration::from_millis(40);
    config.backoff.max_retries = 5;
    config
}

fn ts_nanos(secs: i64) -> String {
    (secs * 1_000_000_000).to_string()
}

#[tokio::test]
async fn test_sorted_client_delivers_in_timestamp_order() {
    let (url, loki) = spawn_fake_loki(vec![]).await;

    let mut config = fast_retry_config(&url);
    config.sort_by_timestamp = true;
    config.tenant_id = Some("team-a".to_string());
    config.external_labels = LabelSet::from([("cluster", "dev")]);

    let metrics = Arc::new(Metrics::new());
    let client = new_client(&config, Arc::clone(&metrics)).unwrap();

    let labels = LabelSet::from([("job", "app")]);
    for secs in [5, 1, 3] {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        client
            .handle(labels.clone(), ts, format!("line at {}", secs))
            .await
            .unwrap();
    }
    client.stop().await;

    assert_eq!(
        loki.values_for_job("app"),
        vec![
            (ts_nanos(1), "line at 1".to_string()),
            (ts_nanos(3), "line at 3".to_string()),
            (ts_nanos(5), "line at 5".to_string()),
        ]
    );

    let requests = loki.requests();
    assert!(!requests.is_empty());
    for (headers, body) in &requests {
        assert_eq!(headers["x-scope-orgid"], "team-a");
        assert_eq!(headers["content-type"], "application/json");
        for stream in body["streams"].as_array().unwrap() {
            assert_eq!(stream["stream"]["cluster"], "dev");
        }
    }

    assert_eq!(metrics.forwarded_logs().get("127.0.0.1"), 3);
    assert_eq!(metrics.dropped_logs().get("127.0.0.1"), 0);
}

#[tokio::test]
async fn test_buffered_plain_client_delivers_everything_on_stop() {
    let (url, loki) = spawn_fake_loki(vec![]).await;

    let mut config = fast_retry_config(&url);
    config.buffer.enabled = true;
    config.batch_wait = Duration::from_secs(3600);

    let metrics = Arc::new(Metrics::new());
    let client = new_client(&config, Arc::clone(&metrics)).unwrap();

    let labels = LabelSet::from([("job", "buffered")]);
    for i in 0..20 {
        client
            .handle(labels.clone(), Utc::now(), format!("entry {}", i))
            .await
            .unwrap();
    }
    client.stop().await;

    let lines: Vec<_> = loki
        .values_for_job("buffered")
        .into_iter()
        .map(|(_, line)| line)
        .collect();
    let expected: Vec<_> = (0..20).map(|i| format!("entry {}", i)).collect();
    assert_eq!(lines, expected);
    assert_eq!(metrics.forwarded_logs().get("127.0.0.1"), 20);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (url, loki) = spawn_fake_loki(vec![
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::TOO_MANY_REQUESTS,
    ])
    .await;

    let client = new_client(&fast_retry_config(&url), Arc::new(Metrics::new())).unwrap();
    let labels = LabelSet::from([("job", "retry")]);
    client.handle(labels.clone(), Utc::now(), "one".to_string()).await.unwrap();
    client.handle(labels, Utc::now(), "two".to_string()).await.unwrap();
    client.stop().await;

    let requests = loki.requests();
    assert_eq!(requests.len(), 3);
    // Every attempt carries the same batch
    for (_, body) in &requests {
        assert_eq!(body, &requests[0].1);
    }
    assert_eq!(loki.values_for_job("retry").len(), 6);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (url, loki) = spawn_fake_loki(vec![StatusCode::BAD_REQUEST]).await;

    let client = new_client(&fast_retry_config(&url), Arc::new(Metrics::new())).unwrap();
    client
        .handle(LabelSet::from([("job", "rejected")]), Utc::now(), "bad".to_string())
        .await
        .unwrap();
    client.stop().await;

    assert_eq!(loki.requests().len(), 1);
}

#[tokio::test]
async fn test_retries_stop_at_max_retries() {
    let (url, loki) = spawn_fake_loki(vec![StatusCode::SERVICE_UNAVAILABLE; 10]).await;

    let mut config = fast_retry_config(&url);
    config.backoff.max_retries = 3;

    let client = new_client(&config, Arc::new(Metrics::new())).unwrap();
    client
        .handle(LabelSet::from([("job", "down")]), Utc::now(), "lost".to_string())
        .await
        .unwrap();
    client.stop().await;

    assert_eq!(loki.requests().len(), 3);
}

#[tokio::test]
async fn test_age_flush_reaches_server_without_stop() {
    let (url, loki) = spawn_fake_loki(vec![]).await;

    let client = new_client(&fast_retry_config(&url), Arc::new(Metrics::new())).unwrap();
    client
        .handle(LabelSet::from([("job", "aged")]), Utc::now(), "waiting".to_string())
        .await
        .unwrap();

    let mut delivered = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !loki.values_for_job("aged").is_empty() {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "batch was not pushed after batch_wait");

    client.stop().await;
    assert_eq!(loki.values_for_job("aged").len(), 1);
}
