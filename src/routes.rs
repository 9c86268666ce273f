use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;

use crate::auth::account;
use crate::health;
use crate::products::crud as product_crud;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the token settings into request extensions so the Claims extractor can find them.
async fn inject_token_settings(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut().insert(state.tokens.clone());
    next.run(req).await
}

/// CORS for the single-page frontend. An unparsable origin disables CORS.
pub fn cors_layer(origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    match origin.parse::<HeaderValue>() {
        Ok(origin) => base.allow_origin(origin),
        Err(_) => {
            tracing::warn!(origin = %origin, "Invalid CORS origin, cross-origin requests disabled");
            base
        }
    }
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: burst of 5, then one request every 12 seconds per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12)
            .burst_size(5)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/auth/login", post(account::login))
        .route("/api/auth/register", post(account::register))
        .layer(GovernorLayer {
            config: governor_config,
        });

    let authenticated_routes = Router::new().route("/api/auth/validate", get(account::validate));

    // Reads are public; writes check the Admin role inside the handler.
    // /api/products/categories is a static segment and wins over /{id}.
    let product_routes = Router::new()
        .route(
            "/api/products",
            get(product_crud::list_products).post(product_crud::create_product),
        )
        .route("/api/products/categories", get(product_crud::list_categories))
        .route(
            "/api/products/{id}",
            get(product_crud::get_product)
                .put(product_crud::update_product)
                .delete(product_crud::delete_product),
        );

    // Presence hub (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health_routes = Router::new()
        .route("/", get(health::banner))
        .route("/health", get(health::health_check));

    Router::new()
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(product_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_token_settings,
        ))
        .with_state(state)
}
