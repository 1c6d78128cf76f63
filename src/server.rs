//! HTTP surface over a [`QueueManager`]
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET\|POST /enqueue?count=N` | Enqueue `N` items (default 1) |
//! | `GET /control?action=pause\|resume&consumeMs=N` | Pause, resume, set poll interval |
//! | `GET /health` | Counters and consumer state |
//! | `GET /events` | Server-Sent Events stream, `state` first |
//! | `GET /dead-letters` | Items that exhausted their retries |
//! | `DELETE /dead-letters` | Drop stored dead letters |
//! | `GET /metrics` | Counters, gauges and latency histogram |
//!
//! Query parameters are parsed leniently: malformed numbers fall back to
//! their defaults and are clamped, they never fail the request.

use crate::dlq::DeadLetter;
use crate::error::QueueError;
use crate::manager::{ControlAction, ControlStatus, EnqueueReport, QueueManager};
use crate::metrics::MetricsSnapshot;
use crate::QueueHealth;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use tokio_stream::{Stream, StreamExt};

type Params = Query<HashMap<String, String>>;

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let status = match self {
            QueueError::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
            QueueError::ConfigError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

/// Build the router with the manager as shared state
pub fn router(manager: QueueManager) -> Router {
    Router::new()
        .route("/enqueue", get(enqueue).post(enqueue))
        .route("/control", get(control))
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/dead-letters", get(dead_letters).delete(clear_dead_letters))
        .route("/metrics", get(metrics))
        .with_state(manager)
}

/// Bind `addr` and serve until Ctrl-C, then shut the queue down
pub async fn serve(manager: QueueManager, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(manager.clone()))
        .with_graceful_shutdown(shutdown_signal(manager))
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal(manager: QueueManager) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {}", e);
    }
    tracing::info!("shutdown requested");
    // Closing every observer channel ends the open SSE streams.
    manager.shutdown().await;
}

fn parse_int(params: &HashMap<String, String>, key: &str) -> Option<i64> {
    params.get(key).and_then(|raw| {
        let raw = raw.trim();
        raw.parse::<i64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
    })
}

fn parse_count(params: &HashMap<String, String>) -> usize {
    parse_int(params, "count").unwrap_or(1).max(1) as usize
}

fn parse_consume_ms(params: &HashMap<String, String>) -> Option<u64> {
    parse_int(params, "consumeMs").map(|ms| ms.max(0) as u64)
}

async fn enqueue(
    State(manager): State<QueueManager>,
    Query(params): Params,
) -> Result<Json<EnqueueReport>, QueueError> {
    let report = manager.enqueue(parse_count(&params)).await?;
    Ok(Json(report))
}

async fn control(
    State(manager): State<QueueManager>,
    Query(params): Params,
) -> Result<Json<ControlStatus>, QueueError> {
    let action = params.get("action").and_then(|a| ControlAction::parse(a));
    let status = manager.control(action, parse_consume_ms(&params)).await?;
    Ok(Json(status))
}

async fn health(State(manager): State<QueueManager>) -> Json<QueueHealth> {
    Json(manager.health().await)
}

async fn dead_letters(State(manager): State<QueueManager>) -> Json<Vec<DeadLetter>> {
    Json(manager.dead_letters().await)
}

async fn clear_dead_letters(State(manager): State<QueueManager>) -> Json<serde_json::Value> {
    let cleared = manager.clear_dead_letters().await;
    Json(serde_json::json!({ "cleared": cleared }))
}

/// Empty snapshot when the manager was built without metrics
async fn metrics(State(manager): State<QueueManager>) -> Json<MetricsSnapshot> {
    let snapshot = match manager.metrics() {
        Some(metrics) => metrics.snapshot().await,
        None => MetricsSnapshot::default(),
    };
    Json(snapshot)
}

async fn events(
    State(manager): State<QueueManager>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, QueueError> {
    let subscription = manager.subscribe().await?;
    tracing::debug!(observer = subscription.id(), "SSE client connected");

    let stream = subscription.map(|event| Event::default().event(event.name()).json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::manager::QueueManagerBuilder;
    use crate::metrics::{metric_names, QueueMetrics};
    use crate::processing::{FixedDelay, Processor};
    use crate::queue::WorkItem;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FailingProcessor;

    #[async_trait::async_trait]
    impl Processor for FailingProcessor {
        async fn process(&self, _item: &WorkItem) -> crate::Result<()> {
            Err(QueueError::ProcessingError("boom".to_string()))
        }
    }

    fn make_manager(capacity: usize) -> QueueManager {
        QueueManagerBuilder::new(QueueConfig::new(capacity))
            .with_delay_policy(Arc::new(FixedDelay(Duration::ZERO)))
            .build()
            .unwrap()
    }

    async fn send(manager: &QueueManager, method: Method, uri: &str) -> Response {
        router(manager.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    // ========================================================================
    // Parameter parsing
    // ========================================================================

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_count_is_lenient() {
        assert_eq!(parse_count(&params(&[])), 1);
        assert_eq!(parse_count(&params(&[("count", "7")])), 7);
        assert_eq!(parse_count(&params(&[("count", "0")])), 1);
        assert_eq!(parse_count(&params(&[("count", "-3")])), 1);
        assert_eq!(parse_count(&params(&[("count", "abc")])), 1);
        assert_eq!(parse_count(&params(&[("count", "2.9")])), 2);
    }

    #[test]
    fn test_parse_consume_ms() {
        assert_eq!(parse_consume_ms(&params(&[])), None);
        assert_eq!(parse_consume_ms(&params(&[("consumeMs", "x")])), None);
        assert_eq!(parse_consume_ms(&params(&[("consumeMs", "-5")])), Some(0));
        assert_eq!(parse_consume_ms(&params(&[("consumeMs", "120")])), Some(120));
    }

    // ========================================================================
    // Routes
    // ========================================================================

    #[tokio::test]
    async fn test_enqueue_reports_backpressure() {
        let manager = make_manager(5);

        let response = send(&manager, Method::GET, "/enqueue?count=7").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["accepted"], 5);
        assert_eq!(body["rejected"], 2);
        assert_eq!(body["queueSize"], 5);
        assert_eq!(body["produced"], 5);
    }

    #[tokio::test]
    async fn test_enqueue_accepts_post_and_defaults_count() {
        let manager = make_manager(5);

        let response = send(&manager, Method::POST, "/enqueue?count=bogus").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["accepted"], 1);
    }

    #[tokio::test]
    async fn test_control_pause_and_poll_interval() {
        let manager = make_manager(5);
        manager.start().await.unwrap();

        let response = send(&manager, Method::GET, "/control?action=pause&consumeMs=0").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["running"], false);
        assert_eq!(body["consumePollMs"], 1);

        let body = json(send(&manager, Method::GET, "/control?action=resume").await).await;
        assert_eq!(body["running"], true);
        assert_eq!(body["consumePollMs"], 1);
    }

    #[tokio::test]
    async fn test_control_ignores_unknown_action() {
        let manager = make_manager(5);
        let body = json(send(&manager, Method::GET, "/control?action=explode").await).await;
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn test_health() {
        let manager = make_manager(5);
        manager.enqueue(2).await.unwrap();
        let _sub = manager.subscribe().await.unwrap();

        let body = json(send(&manager, Method::GET, "/health").await).await;
        assert_eq!(body["subscribers"], 1);
        assert_eq!(body["running"], false);
        assert_eq!(body["produced"], 2);
        assert_eq!(body["consumed"], 0);
        assert_eq!(body["queueSize"], 2);
        assert_eq!(body["capacity"], 5);
        assert_eq!(body["load"], "normal");
    }

    #[tokio::test]
    async fn test_dead_letters_empty() {
        let manager = make_manager(5);
        let body = json(send(&manager, Method::GET, "/dead-letters").await).await;
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_delete_dead_letters_clears_store() {
        let config = QueueConfig::new(5).with_dead_letter(10);
        let manager = QueueManagerBuilder::new(config)
            .with_processor(Arc::new(FailingProcessor))
            .build()
            .unwrap();
        manager.enqueue(2).await.unwrap();
        manager.start().await.unwrap();
        manager.drain(Duration::from_secs(5)).await.unwrap();

        let body = json(send(&manager, Method::GET, "/dead-letters").await).await;
        assert_eq!(body.as_array().map(|a| a.len()), Some(2));

        let response = send(&manager, Method::DELETE, "/dead-letters").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["cleared"], 2);

        let body = json(send(&manager, Method::GET, "/dead-letters").await).await;
        assert_eq!(body, serde_json::json!([]));
        assert_eq!(manager.health().await.dead_lettered, 2);
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let manager = QueueManagerBuilder::new(QueueConfig::new(5))
            .with_delay_policy(Arc::new(FixedDelay(Duration::ZERO)))
            .with_metrics(QueueMetrics::local())
            .build()
            .unwrap();
        manager.enqueue(7).await.unwrap();
        manager.start().await.unwrap();
        manager.drain(Duration::from_secs(5)).await.unwrap();
        // pause waits for the last item's bookkeeping
        manager.pause().await;

        let response = send(&manager, Method::GET, "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["counters"][metric_names::ITEMS_ENQUEUED], 5);
        assert_eq!(body["counters"][metric_names::ITEMS_REJECTED], 2);
        assert_eq!(body["counters"][metric_names::ITEMS_PROCESSED], 5);
        assert_eq!(body["histograms"][metric_names::ITEM_LATENCY]["count"], 5);
    }

    #[tokio::test]
    async fn test_metrics_empty_without_backend() {
        let manager = make_manager(5);
        let body = json(send(&manager, Method::GET, "/metrics").await).await;
        assert_eq!(
            body,
            serde_json::json!({ "counters": {}, "gauges": {}, "histograms": {} })
        );
    }

    #[tokio::test]
    async fn test_events_stream_starts_with_state() {
        let manager = make_manager(5);
        manager.enqueue(3).await.unwrap();

        let response = send(&manager, Method::GET, "/events").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.starts_with("event: state"));
        assert!(text.contains(r#""produced":3"#));
    }

    #[tokio::test]
    async fn test_events_stream_ends_on_shutdown() {
        let manager = make_manager(5);
        let response = send(&manager, Method::GET, "/events").await;
        manager.shutdown().await;

        let bytes = tokio::time::timeout(
            Duration::from_secs(5),
            response.into_body().collect(),
        )
        .await
        .unwrap()
        .unwrap()
        .to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: state"));
        assert!(text.contains("event: stopped"));
    }

    #[tokio::test]
    async fn test_shutdown_returns_service_unavailable() {
        let manager = make_manager(5);
        manager.shutdown().await;

        let response = send(&manager, Method::GET, "/enqueue").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json(response).await;
        assert_eq!(body["status"], 503);

        let response = send(&manager, Method::GET, "/events").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = send(&manager, Method::GET, "/control?action=resume").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
