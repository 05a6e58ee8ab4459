use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use huddle_gateway::error::GatewayError;
use huddle_types::error::SendRejection;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("forbidden")]
    Forbidden,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Gateway(GatewayError::Rejected(rejection)) => {
                let status = match rejection {
                    SendRejection::NotAMember | SendRejection::Muted { .. } => StatusCode::FORBIDDEN,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, json!({ "error": rejection.to_string(), "rejection": rejection }))
            }
            ApiError::Gateway(GatewayError::Forbidden(what)) => (
                StatusCode::FORBIDDEN,
                json!({ "error": format!("not a participant of {}", what) }),
            ),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, json!({ "error": "forbidden" })),
            ApiError::Gateway(GatewayError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, json!({ "error": format!("{} not found", what) }))
            }
            ApiError::Gateway(GatewayError::Invalid(what)) => {
                (StatusCode::BAD_REQUEST, json!({ "error": format!("invalid {}", what) }))
            }
            ApiError::Gateway(e @ (GatewayError::Store(_) | GatewayError::Join(_))) => {
                error!("request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}
