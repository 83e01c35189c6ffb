use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use backup_core::{HealthReporter, HealthSnapshot};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::metrics::BackupMetrics;

pub fn router(metrics: Arc<BackupMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/v1/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<BackupMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "metrics encode failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {e}")).into_response()
        }
    }
}

async fn status_handler(State(metrics): State<Arc<BackupMetrics>>) -> Json<HealthSnapshot> {
    Json(metrics.snapshot())
}
