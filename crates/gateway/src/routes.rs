//! Router assembly

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    middleware,
    routing::{get, post, put},
    BoxError, Router,
};
use fieldform_common::{auth::plugin_auth_middleware, errors::AppError};
use tower::{limit::ConcurrencyLimitLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::middleware::{metrics::track_metrics, rate_limit::rate_limit_middleware};
use crate::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Plugin routes (token required)
    let mut plugin_routes = Router::new()
        .route(
            "/forms",
            post(handlers::forms::create_form).get(handlers::forms::list_forms),
        )
        .route("/forms/delete", post(handlers::forms::delete_form))
        .route("/responses", get(handlers::responses::list_responses))
        .route("/limits", get(handlers::tenants::limits))
        .route("/tenants", post(handlers::tenants::register_tenant))
        .route("/tenant-config", post(handlers::tenants::tenant_config))
        .route(
            "/tenant-config/storage",
            put(handlers::tenants::configure_storage),
        )
        .route_layer(middleware::from_fn_with_state(
            state.plugin_auth.clone(),
            plugin_auth_middleware,
        ));

    if let Some(limit) = state.rate_limit.clone() {
        plugin_routes =
            plugin_routes.route_layer(middleware::from_fn_with_state(limit, rate_limit_middleware));
    }

    // Public routes
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route(
            "/v1/collect/{form_code}",
            post(handlers::collect::submit_response),
        );

    let timeout = state.config.request_timeout();
    let max_concurrent = state.config.server.max_concurrent_requests.max(1);

    Router::new()
        .nest("/v1/plugin", plugin_routes)
        .merge(public_routes)
        .layer(middleware::from_fn(track_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors)
                .layer(HandleErrorLayer::new(move |err: BoxError| async move {
                    layer_error(err, timeout)
                }))
                .layer(TimeoutLayer::new(timeout))
                .layer(ConcurrencyLimitLayer::new(max_concurrent)),
        )
        .with_state(state)
}

/// Errors raised by tower layers, rendered with the API error envelope
fn layer_error(err: BoxError, timeout: Duration) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }
    } else {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}
