pub mod auth;
pub mod invites;
pub mod profile;
pub mod waitlist;

use axum::Router;

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(invites::router())
        .merge(profile::router())
        .merge(waitlist::router())
}
