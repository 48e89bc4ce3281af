use crate::image_reference::ImageReference;
use crate::runtime::{ImagePuller, PullError};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::routing::{get, post};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub image: String,
}

#[derive(Debug, Serialize)]
pub struct PullResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl PullResponse {
    fn ok(output: String) -> Self {
        PullResponse {
            status: "ok",
            output: Some(output),
            message: None,
            exit_code: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        PullResponse {
            status: "error",
            output: None,
            message: Some(message.into()),
            exit_code: None,
        }
    }

    fn pull_failure(message: String, exit_code: i32) -> Self {
        PullResponse {
            status: "error",
            output: None,
            message: Some(message),
            exit_code: Some(exit_code),
        }
    }
}

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn pull_image<P: ImagePuller>(
    State(state): State<AppState<P>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    body: Result<Json<PullRequest>, JsonRejection>,
) -> (StatusCode, Json<PullResponse>) {
    if !state.access.permits_client(client.ip()) {
        warn!(
            "Rejecting request from {}: address outside allowed network",
            client.ip()
        );
        return (
            StatusCode::FORBIDDEN,
            Json(PullResponse::error("client address not allowed")),
        );
    }

    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(
                "Rejecting request from {}: {}",
                client.ip(),
                rejection.body_text()
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(PullResponse::error(rejection.body_text())),
            );
        }
    };

    let image = request.image.trim();
    if image.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(PullResponse::error("no image provided")),
        );
    }
    let image = match ImageReference::parse(image) {
        Ok(image) => image,
        Err(e) => {
            warn!(
                "Rejecting image {:?} from {}: {}",
                request.image,
                client.ip(),
                e
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(PullResponse::error(format!("invalid image reference: {}", e))),
            );
        }
    };
    if !state.access.permits_image(&image) {
        warn!(
            "Rejecting image {} from {}: not in allowed images",
            image,
            client.ip()
        );
        return (
            StatusCode::FORBIDDEN,
            Json(PullResponse::error("image not allowed")),
        );
    }

    info!("Pull of image {} requested by {}", image, client.ip());
    match state.puller.pull(&image).await {
        Ok(outcome) => {
            info!("Pull of image {} succeeded", image);
            (StatusCode::OK, Json(PullResponse::ok(outcome.output)))
        }
        Err(PullError::Failed { exit_code, message }) => {
            warn!(
                "Pull of image {} failed with code {}: {}",
                image, exit_code, message
            );
            (
                StatusCode::BAD_GATEWAY,
                Json(PullResponse::pull_failure(message, exit_code)),
            )
        }
        Err(e @ PullError::TimedOut { .. }) => {
            warn!("Pull of image {} failed: {}", image, e);
            (StatusCode::BAD_GATEWAY, Json(PullResponse::error(e.to_string())))
        }
        Err(e @ PullError::Invocation(_)) => {
            error!("Pull of image {} could not be executed: {}", image, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(PullResponse::error(e.to_string())),
            )
        }
    }
}

pub fn create_app<P: ImagePuller>(state: AppState<P>) -> Router {
    Router::new()
        .route("/pull-image", post(pull_image::<P>))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .with_state(state)
}
