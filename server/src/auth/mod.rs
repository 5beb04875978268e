pub mod jwt;
pub mod middleware;
pub mod verifier;

pub use middleware::AuthUser;
pub use verifier::TokenVerifier;

/// Name of the cookie that carries the session token for browser clients.
pub const AUTH_COOKIE: &str = "auth";
