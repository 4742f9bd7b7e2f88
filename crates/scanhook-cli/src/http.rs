//! HTTP receiver - webhook 受信と監視用エンドポイント
//!
//! - `POST /webhook`: enqueue（1 transaction）の後に 200 を返す
//! - `GET /health`: 生存確認
//! - `GET /metrics`: ワーカー状態 + キュー集計

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use scanhook_core::app::{NotificationIntake, QueueConfig, StatusHandle, WorkerStatus, duration_ms};
use scanhook_core::domain::StoreError;
use scanhook_core::queue::{JobQueue, QueueSnapshot};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

pub const HISTORY_ID_HEADER: &str = "x-ssc-request-history-id";
pub const SIGNATURE_HEADER: &str = "x-ssc-signature";

const BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    intake: NotificationIntake,
    queue: Arc<dyn JobQueue>,
    status: StatusHandle,
    queue_config: QueueConfig,
}

impl AppState {
    pub fn new(queue: Arc<dyn JobQueue>, status: StatusHandle, queue_config: QueueConfig) -> Self {
        Self {
            intake: NotificationIntake::new(Arc::clone(&queue)),
            queue,
            status,
            queue_config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// Store failure surfaced by `/metrics`.
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "metrics query failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "ok": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

fn now_text() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// JSON when it parses, otherwise the raw text as a JSON string.
fn parse_body(raw: &[u8]) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let notification_id = header_text(&headers, HISTORY_ID_HEADER);
    let signature = header_text(&headers, SIGNATURE_HEADER);

    let payload = json!({
        "headers": {
            "x-ssc-request-history-id": notification_id,
            "x-ssc-signature": signature,
        },
        "body": parse_body(&body),
    });

    // 送信側には結果によらず 200。失敗はログのみ
    if let Err(err) = state.intake.accept(notification_id.as_deref(), &payload).await {
        error!(error = %err, notification_id = ?notification_id, "failed to enqueue notification");
    }

    StatusCode::OK
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true, "time": now_text() }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerMetrics {
    #[serde(flatten)]
    status: WorkerStatus,
    poll_ms: u64,
    max_attempts: u32,
}

#[derive(Debug, Serialize)]
struct Metrics {
    ok: bool,
    time: String,
    worker: WorkerMetrics,
    queue: QueueSnapshot,
}

async fn metrics(State(state): State<AppState>) -> Result<Json<Metrics>, ApiError> {
    let queue = state.queue.snapshot().await?;
    let poll_ms = duration_ms(state.queue_config.poll_interval);

    Ok(Json(Metrics {
        ok: true,
        time: now_text(),
        worker: WorkerMetrics {
            status: state.status.current(),
            poll_ms,
            max_attempts: state.queue_config.max_attempts,
        },
        queue,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use scanhook_core::app::status_channel;
    use scanhook_core::domain::JobId;
    use scanhook_core::queue::{Job, SqliteQueue, SqliteStore};
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<SqliteQueue>) {
        let store = SqliteStore::in_memory().await.unwrap();
        let queue = Arc::new(SqliteQueue::new(&store));
        let (_reporter, status) = status_channel();
        let state = AppState::new(queue.clone(), status, QueueConfig::default());
        (router(state), queue)
    }

    /// The handler has returned, so the job must already be stored.
    async fn stored_job(queue: &SqliteQueue, id: i64) -> Job {
        queue
            .get(JobId::new(id))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("job {id} missing after 200"))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn webhook_acknowledges_and_enqueues() {
        let (app, queue) = app().await;

        let request = Request::post("/webhook")
            .header("content-type", "application/json")
            .header(HISTORY_ID_HEADER, "hist-1")
            .header(SIGNATURE_HEADER, "sig")
            .body(Body::from(r#"{"events":[{"projectVersionId":10}]}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let job = stored_job(&queue, 1).await;
        assert_eq!(job.notification_id.unwrap().as_str(), "hist-1");
        assert_eq!(
            job.payload,
            json!({
                "headers": {"x-ssc-request-history-id": "hist-1", "x-ssc-signature": "sig"},
                "body": {"events": [{"projectVersionId": 10}]}
            })
        );
    }

    #[tokio::test]
    async fn non_json_body_is_kept_as_text_and_id_is_synthesized() {
        let (app, queue) = app().await;

        let request = Request::post("/webhook")
            .body(Body::from("not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let job = stored_job(&queue, 1).await;
        assert!(job.notification_id.unwrap().as_str().starts_with("nohist-"));
        assert_eq!(job.payload["body"], json!("not json"));
        assert_eq!(job.payload["headers"]["x-ssc-request-history-id"], Value::Null);
    }

    #[tokio::test]
    async fn acknowledged_webhook_survives_store_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let store = SqliteStore::open(&path).await.unwrap();
        let queue = Arc::new(SqliteQueue::new(&store));
        let (_reporter, status) = status_channel();
        let app = router(AppState::new(queue, status, QueueConfig::default()));

        let request = Request::post("/webhook")
            .header(HISTORY_ID_HEADER, "hist-1")
            .body(Body::from(r#"{"events":[]}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // same order as main: server stops, then the store closes
        store.close().await;

        let reopened = SqliteStore::open(&path).await.unwrap();
        let queue = SqliteQueue::new(&reopened);
        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot.total, 1);
        assert_eq!(
            stored_job(&queue, 1).await.notification_id.unwrap().as_str(),
            "hist-1"
        );
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _queue) = app().await;

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert!(body["time"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn metrics_include_worker_and_queue() {
        let (app, queue) = app().await;
        queue
            .enqueue(&"evt-1".into(), &json!({"body": {}}))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["worker"]["pollMs"], 2000);
        assert_eq!(body["worker"]["maxAttempts"], 5);
        assert_eq!(body["worker"]["lastTickAt"], Value::Null);
        assert_eq!(body["queue"]["counts"]["pending"], 1);
        assert_eq!(body["queue"]["oldestPending"]["notificationId"], "evt-1");
    }
}
