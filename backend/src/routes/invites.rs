use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::extract::Json;
use crate::ledger;
use crate::models::invite::{
    GenerateInvitesRequest, GenerateInvitesResponse, InviteListResponse, Lineage,
    RedeemInviteRequest, RedeemInviteResponse, ValidateInviteRequest, ValidateInviteResponse,
};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/invites", get(list_invites))
        .route("/api/invites/generate", post(generate_invites))
        .route("/api/invites/validate", post(validate_invite))
        .route("/api/invites/use", post(redeem_invite))
        .route("/api/invites/lineage/{creator_id}", get(get_lineage))
}

/// A code must be a non-empty string; anything else counts as missing.
fn required_code<'a>(code: Option<&'a Value>, message: &str) -> Result<&'a str, AppError> {
    code.and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::bad_request("MISSING_CODE", message))
}

async fn generate_invites(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<GenerateInvitesRequest>,
) -> Result<(StatusCode, Json<GenerateInvitesResponse>), AppError> {
    let count = ledger::parse_count(body.count.as_ref())?;

    let batch =
        ledger::generate(&state.store, auth.user_id, count, Utc::now(), ledger::random_code)
            .await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateInvitesResponse {
            invites: batch.invites.into_iter().map(Into::into).collect(),
            invites_remaining: batch.invites_remaining,
        }),
    ))
}

async fn list_invites(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<InviteListResponse>, AppError> {
    let invites = ledger::list_issued(&state.store, auth.user_id).await?;
    Ok(Json(InviteListResponse { invites }))
}

async fn validate_invite(
    State(state): State<AppState>,
    Json(body): Json<ValidateInviteRequest>,
) -> Result<Json<ValidateInviteResponse>, AppError> {
    let code = required_code(body.code.as_ref(), "Code is required")?;

    let check = ledger::validate(&state.store, code, Utc::now()).await?;
    Ok(Json(check.into()))
}

async fn redeem_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<RedeemInviteRequest>,
) -> Result<Json<RedeemInviteResponse>, AppError> {
    let code = required_code(body.code.as_ref(), "Invite code is required")?;

    // Redeeming for someone else is an admin action.
    let redeemer = match body.user_id {
        Some(user_id) if user_id != auth.user_id => {
            if !auth.is_admin() {
                return Err(AppError::Forbidden);
            }
            state
                .store
                .find_user(user_id)
                .await?
                .ok_or_else(|| AppError::not_found("USER_NOT_FOUND", "User not found"))?;
            tracing::info!(
                admin_id = %auth.user_id,
                redeemer = %user_id,
                "Redeeming invite on behalf of another user"
            );
            user_id
        }
        _ => auth.user_id,
    };

    ledger::redeem(&state.store, code, redeemer, Utc::now()).await?;

    Ok(Json(RedeemInviteResponse {
        success: true,
        message: "Invite code marked as used",
    }))
}

async fn get_lineage(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
) -> Result<Json<Lineage>, AppError> {
    let creator_id = creator_id.trim();
    if creator_id.is_empty() {
        return Err(AppError::bad_request(
            "MISSING_CREATOR_ID",
            "Creator ID is required",
        ));
    }
    let creator_id: Uuid = creator_id
        .parse()
        .map_err(|_| AppError::bad_request("INVALID_CREATOR_ID", "Invalid creator ID"))?;

    let lineage = ledger::lineage(&state.store, creator_id).await?;
    Ok(Json(lineage))
}
