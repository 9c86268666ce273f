use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use storefront_server::admin::setup;
use storefront_server::auth::jwt::{self, TokenSettings};
use storefront_server::config::{generate_config_template, Config};
use storefront_server::presence::PresenceTracker;
use storefront_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("storefront_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("Storefront server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;
    let tokens = Arc::new(TokenSettings::new(jwt_secret, &config.jwt));

    match setup::maybe_create_bootstrap_admin(&db)? {
        Some(password) => {
            tracing::info!("==========================================================");
            tracing::info!("  FIRST BOOT: no Admin account found.");
            tracing::info!("  Created '{}' with password: {}", setup::BOOTSTRAP_ADMIN, password);
            tracing::info!("  Change it after logging in.");
            tracing::info!("==========================================================");
        }
        None => {
            tracing::info!("Admin account present, setup complete");
        }
    }

    let app_state = state::AppState {
        db,
        tokens,
        presence: PresenceTracker::new(),
        allow_anonymous: config.allow_anonymous,
        outbox_capacity: config.presence.outbox_capacity,
    };

    let app = routes::build_router(app_state).layer(routes::cors_layer(&config.cors_origin));

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
