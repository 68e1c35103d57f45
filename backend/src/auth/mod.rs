//! Identity provider: password accounts, session tokens and the extractor
//! that turns a request into an authenticated principal.

pub mod jwt;
pub mod middleware;
pub mod password;

pub use middleware::AuthUser;
