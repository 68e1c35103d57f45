use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use validator::ValidateEmail;

use crate::error::AppError;
use crate::extract::Json;
use crate::models::user::normalize_email;
use crate::models::waitlist::{JoinWaitlistRequest, JoinWaitlistResponse};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/waitlist", post(join_waitlist))
}

async fn join_waitlist(
    State(state): State<AppState>,
    Json(body): Json<JoinWaitlistRequest>,
) -> Result<(StatusCode, Json<JoinWaitlistResponse>), AppError> {
    let email = body
        .email
        .map(|e| normalize_email(&e))
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::bad_request("MISSING_EMAIL", "Email is required"))?;

    if !email.validate_email() {
        return Err(AppError::bad_request("INVALID_EMAIL", "Invalid email format"));
    }

    let failed_code = body
        .failed_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());

    let added = state
        .store
        .join_waitlist(&email, failed_code, Utc::now())
        .await?;

    if added {
        tracing::info!(failed_code = ?failed_code, "Waitlist entry added");
        Ok((
            StatusCode::CREATED,
            Json(JoinWaitlistResponse {
                success: true,
                message: "Added to waitlist successfully",
            }),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(JoinWaitlistResponse {
                success: true,
                message: "Email already on waitlist",
            }),
        ))
    }
}
