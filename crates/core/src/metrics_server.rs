//! Metrics HTTP server, kept from the teacher daemon nearly verbatim: a
//! single `/metrics` route serving the current `MetricsSnapshot` as JSON.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::metrics::{MetricsSnapshot, SharedMetrics};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

async fn get_metrics(State(metrics): State<SharedMetrics>) -> Json<MetricsSnapshot> {
    let snapshot = metrics.read().await.clone();
    Json(snapshot)
}

pub fn create_metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(metrics)
}

/// Runs the metrics HTTP server on the given port, bound to loopback only.
pub async fn run_metrics_server(metrics: SharedMetrics, port: u16) -> Result<(), ServerError> {
    let app = create_metrics_router(metrics);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{new_shared_metrics, JobMetrics, SystemMetrics};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_get_metrics_returns_json() {
        let metrics = new_shared_metrics();
        {
            let mut snapshot = metrics.write().await;
            snapshot.timestamp_unix_ms = 1701388800000;
            snapshot.queue_len = 5;
            snapshot.running_jobs = 1;
            snapshot.completed_jobs = 42;
            snapshot.failed_jobs = 2;
            snapshot.total_bytes_encoded = 107374182400;
            snapshot.system = SystemMetrics {
                cpu_usage_percent: 85.2,
                mem_usage_percent: 42.1,
                load_avg_1: 27.5,
                load_avg_5: 26.8,
                load_avg_15: 25.2,
            };
            snapshot.jobs.push(JobMetrics {
                id: "job-001".to_string(),
                input_path: "/raw/dvd/Filme/Film.mkv".to_string(),
                stage: "encoding".to_string(),
                encoder: "qsv".to_string(),
                encoder_state: "hw-a".to_string(),
                hw_attempt: 1,
                size_in_bytes_before: 5368709120,
                size_in_bytes_after: 2147483648,
            });
        }

        let app = create_metrics_router(metrics.clone());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").expect("content-type header");
        assert!(content_type.to_str().unwrap().contains("application/json"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let snapshot: MetricsSnapshot = serde_json::from_slice(&body).expect("deserialize");
        assert_eq!(snapshot.queue_len, 5);
        assert_eq!(snapshot.jobs[0].id, "job-001");
        assert_eq!(snapshot.jobs[0].encoder_state, "hw-a");
    }

    #[tokio::test]
    async fn test_get_metrics_empty_snapshot() {
        let metrics = new_shared_metrics();
        let app = create_metrics_router(metrics);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let snapshot: MetricsSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snapshot.jobs.len(), 0);
        assert_eq!(snapshot.queue_len, 0);
    }
}
