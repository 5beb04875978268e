use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use duet_server::config::{generate_config_template, Config};
use duet_server::routes::{build_router, RouterOptions};
use duet_server::state::AppState;
use duet_server::ws::ConnectionRegistry;
use duet_server::{auth, db, messages};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("duet_server=info"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!("Duet server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    // 256-bit signing key, generated on first boot and kept in data_dir
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // One registry for the whole process; the router and every socket share it
    let registry = ConnectionRegistry::new();

    let app_state = AppState::new(db.clone(), &jwt_secret, registry)
        .with_token_ttl(config.token_ttl_secs)
        .with_secure_cookie(config.cookie_secure);

    messages::retention::spawn_retention_cleanup(db, &config.retention);

    let app = build_router(app_state, &RouterOptions::from_config(&config));

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
