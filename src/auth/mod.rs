use crate::state::AppState;
use axum::Router;

pub mod cookies;
pub mod credentials;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod oauth;
pub mod repo;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::me_routes())
}
