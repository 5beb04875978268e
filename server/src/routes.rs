use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use crate::calls::routes as calls;
use crate::config::Config;
use crate::messages::routes as messages;
use crate::state::AppState;
use crate::users::routes as users;
use crate::ws::handler as ws_handler;

/// Outer HTTP surface settings that are not part of shared state.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Allowed browser origin for credentialed requests
    pub cors_origin: Option<String>,
    /// Web client assets served for unmatched paths
    pub static_dir: Option<String>,
    /// Per-IP limit on register/login
    pub rate_limit_auth: bool,
}

impl RouterOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cors_origin: config.cors_origin.clone(),
            static_dir: config.static_dir.clone(),
            rate_limit_auth: true,
        }
    }
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState, options: &RouterOptions) -> Router {
    // Credential endpoints, optionally rate limited
    let mut credential_routes = Router::new()
        .route("/auth/register", post(users::register))
        .route("/auth/login", post(users::login));

    if options.rate_limit_auth {
        // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
        let governor_config = GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5)
            .finish();

        match governor_config {
            Some(config) => {
                let config = Arc::new(config);
                let limiter = config.limiter().clone();
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        limiter.retain_recent();
                    }
                });
                credential_routes = credential_routes.layer(GovernorLayer { config });
            }
            None => tracing::warn!("Invalid rate limit settings, auth endpoints are not limited"),
        }
    }

    // Everything below resolves the caller through the AuthUser extractor
    let authenticated_routes = Router::new()
        .route("/auth/logout", get(users::logout))
        .route("/auth/me", get(users::me))
        .route("/auth/users", get(users::list_users))
        .route("/auth/messages", get(messages::get_messages))
        .route("/auth/message", post(messages::send_message))
        .route("/auth/call/voice", post(calls::start_voice_call))
        .route("/auth/call/video", post(calls::start_video_call));

    // WebSocket endpoint (token via `?token=` query param)
    let ws_routes = Router::new().route("/auth/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    let mut app = Router::new()
        .merge(credential_routes)
        .merge(authenticated_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state);

    if let Some(dir) = &options.static_dir {
        tracing::info!(dir = %dir, "Serving static client files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    if let Some(origin) = &options.cors_origin {
        match origin.parse::<HeaderValue>() {
            Ok(origin) => {
                tracing::info!(origin = ?origin, "Configured CORS for explicit origin");
                app = app.layer(configure_cors(origin));
            }
            Err(_) => tracing::warn!(origin = %origin, "Invalid CORS origin ignored"),
        }
    }

    app
}

fn configure_cors(origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
