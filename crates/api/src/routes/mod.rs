//! API routes

pub mod ai;
pub mod auth;
pub mod families;
pub mod health;
pub mod payments;
pub mod wallet;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Public routes: health, signup/login, and POST /payments, which carries
    // both provider webhooks (no bearer token) and authorized actions; the
    // handler authenticates the latter itself.
    let public_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/payments", post(payments::payments_post).get(payments::payments_get));

    // Protected routes behind the bearer-token middleware
    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/change-password", post(auth::change_password))
        .route("/families", post(families::create_family).get(families::get_family))
        .route("/families/members", post(families::add_member))
        .route("/wallet", get(wallet::wallet_get).post(wallet::wallet_post))
        .route("/generate-diet-plan", post(ai::generate))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
