use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::extract::Json;
use crate::ledger::ALLOWANCE_PERIOD_DAYS;
use crate::models::creator::{
    normalize_collab_status, normalize_location, CreateProfileRequest, Creator, NewCreator, NICHES,
};
use crate::store::StoreError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/profile", get(get_own_profile).post(create_profile))
        .route("/api/profile/{id}", get(get_profile))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn create_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateProfileRequest>,
) -> Result<(StatusCode, Json<Creator>), AppError> {
    if body.user_id.is_some() || body.id.is_some() {
        return Err(AppError::bad_request(
            "USER_ID_NOT_ALLOWED",
            "User ID cannot be provided in request body",
        ));
    }

    let display_name = non_empty(body.display_name).ok_or_else(|| {
        AppError::bad_request("MISSING_DISPLAY_NAME", "displayName is required")
    })?;
    let niche = non_empty(body.niche)
        .filter(|n| NICHES.contains(&n.as_str()))
        .ok_or_else(|| AppError::bad_request("INVALID_NICHE", "Valid niche is required"))?;

    let now = Utc::now();
    let new_creator = NewCreator {
        id: auth.user_id,
        display_name,
        bio: non_empty(body.bio),
        niche,
        location: non_empty(body.location).map(|l| normalize_location(&l)),
        avatar_url: non_empty(body.avatar_url),
        collab_status: normalize_collab_status(body.collab_status.as_deref()),
        invites_remaining: state.config.invite_allowance,
        invite_reset_at: now + Duration::days(ALLOWANCE_PERIOD_DAYS),
        created_at: now,
    };

    let creator = match state.store.create_creator(&new_creator).await {
        Ok(creator) => creator,
        Err(StoreError::Duplicate) => {
            return Err(AppError::conflict(
                "PROFILE_EXISTS",
                "Creator profile already exists",
            ));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        creator_id = %creator.id,
        inviter_id = ?creator.inviter_id,
        "Creator profile created"
    );

    Ok((StatusCode::CREATED, Json(creator)))
}

async fn get_own_profile(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Creator>, AppError> {
    let creator = state
        .store
        .get_creator(auth.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("PROFILE_NOT_FOUND", "Creator profile not found"))?;
    Ok(Json(creator))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Creator>, AppError> {
    let id: Uuid = id
        .trim()
        .parse()
        .map_err(|_| AppError::bad_request("INVALID_CREATOR_ID", "Invalid creator ID"))?;

    let creator = state
        .store
        .get_creator(id)
        .await?
        .ok_or_else(|| AppError::not_found("CREATOR_NOT_FOUND", "Creator not found"))?;
    Ok(Json(creator))
}
