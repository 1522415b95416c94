use std::{future::Future, sync::Arc};

use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    clients::{health::HealthChecker, publisher::Publisher},
    models::{
        health::HealthStatus,
        notification::NotificationRequest,
        response::{ErrorResponse, QUEUE_FAILED, QueuedResponse, VALIDATION_FAILED},
        validation::validate_request,
    },
};

pub struct AppState {
    pub publisher: Publisher,
    pub health_checker: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/notification", post(queue_notification))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "HTTP server started");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn queue_notification(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NotificationRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected notification body");
            return validation_failed();
        }
    };

    if let Err(e) = validate_request(&request) {
        warn!(error = %e, request_id = %request.request_id, "Notification failed validation");
        return validation_failed();
    }

    match state.publisher.publish(&request).await {
        Ok(()) => {
            info!(request_id = %request.request_id, "Notification queued");
            (
                StatusCode::ACCEPTED,
                Json(QueuedResponse::queued(request.request_id)),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, request_id = %request.request_id, "Failed to queue notification");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(QUEUE_FAILED)),
            )
                .into_response()
        }
    }
}

fn validation_failed() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(VALIDATION_FAILED)),
    )
        .into_response()
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all();

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
