use crate::auth::TokenVerifier;
use crate::db::DbPool;
use crate::ws::actor::Keepalive;
use crate::ws::{ConnectionRegistry, MessageRouter};

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registry is created once by the caller and injected here; the router
/// and every WebSocket actor share that same instance.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Resolves session tokens to users
    pub verifier: TokenVerifier,
    /// Who is online right now
    pub registry: ConnectionRegistry,
    /// Point-to-point relay over `registry`
    pub router: MessageRouter,
    /// Session token lifetime in seconds
    pub token_ttl_secs: u64,
    /// Set the Secure flag on the auth cookie
    pub cookie_secure: bool,
    /// Ping cadence and pong deadline for relay sockets
    pub keepalive: Keepalive,
}

impl AppState {
    pub fn new(db: DbPool, jwt_secret: &[u8], registry: ConnectionRegistry) -> Self {
        Self {
            verifier: TokenVerifier::new(jwt_secret, db.clone()),
            router: MessageRouter::new(registry.clone()),
            db,
            registry,
            token_ttl_secs: 3600,
            cookie_secure: false,
            keepalive: Keepalive::default(),
        }
    }

    pub fn with_token_ttl(mut self, secs: u64) -> Self {
        self.token_ttl_secs = secs;
        self
    }

    pub fn with_secure_cookie(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    pub fn with_keepalive(mut self, keepalive: Keepalive) -> Self {
        self.keepalive = keepalive;
        self
    }
}
