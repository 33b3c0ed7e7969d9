pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{config::Settings, service::ServiceContext};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        .route("/health", get(handlers::root::health_check))
        .nest("/api", api_routes())
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Public webhook endpoint (signature-verified, no auth)
        .route("/payments/webhook/stripe", post(handlers::payments::stripe_webhook))
        .route("/payments", post(handlers::payments::create))
        .route("/payments/:id", get(handlers::payments::get))
        .route("/payments/:id/reconcile", post(handlers::payments::force_reconcile))
        .route("/payments/:id/receipt", post(handlers::payments::issue_receipt))
        .route("/payments/user/:user_id", get(handlers::payments::list_by_user))
        .route("/concepts", post(handlers::concepts::create))
        .route("/concepts", get(handlers::concepts::list_active))
        .route("/concepts/:id", get(handlers::concepts::get))
        .route("/concepts/:id/status", post(handlers::concepts::transition))
}
