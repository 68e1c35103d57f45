use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use validator::Validate;

use crate::auth::middleware::COOKIE_NAME;
use crate::auth::{jwt, password, AuthUser};
use crate::error::AppError;
use crate::extract::Json;
use crate::models::user::{
    normalize_email, LoginRequest, NewUser, RegisterRequest, User, UserResponse, UserRole,
};
use crate::store::StoreError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut body): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<UserResponse>), AppError> {
    body.email = normalize_email(&body.email);
    if let Err(errors) = body.validate() {
        let code = if errors.field_errors().contains_key("email") {
            "INVALID_EMAIL"
        } else {
            "INVALID_PASSWORD"
        };
        return Err(AppError::bad_request(
            code,
            format!(
                "A valid email is required and password must be at least {} characters",
                password::MIN_PASSWORD_LEN
            ),
        ));
    }

    // The first account administers the network.
    let role = if state.store.count_users().await? == 0 {
        UserRole::Admin
    } else {
        UserRole::Member
    };

    let password_hash = password::hash_password(&body.password)?;

    let user = match state
        .store
        .create_user(&NewUser {
            email: body.email,
            password_hash,
            role,
        })
        .await
    {
        Ok(user) => user,
        Err(StoreError::Duplicate) => {
            return Err(AppError::conflict("EMAIL_TAKEN", "Email already registered"));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user_id = %user.id, role = ?user.role, "User registered");

    let cookie = issue_session(&state, &user)?;
    Ok((jar.add(cookie), Json(UserResponse::from(user))))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<UserResponse>), AppError> {
    let email = normalize_email(&body.email);

    let user = state
        .store
        .find_user_by_email(&email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !password::verify_password(&body.password, &user.password_hash)? {
        return Err(AppError::InvalidCredentials);
    }

    let cookie = issue_session(&state, &user)?;
    Ok((jar.add(cookie), Json(UserResponse::from(user))))
}

async fn logout(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(COOKIE_NAME).path("/"))
}

async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .store
        .find_user(auth.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(UserResponse::from(user)))
}

fn issue_session(state: &AppState, user: &User) -> Result<Cookie<'static>, AppError> {
    let token = jwt::create_token(user.id, &user.email, user.role, &state.config.jwt_secret)?;
    Ok(Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(jwt::TOKEN_EXPIRY_HOURS))
        .build())
}
