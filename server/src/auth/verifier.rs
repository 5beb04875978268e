//! Token -> identity resolution shared by REST requests and the socket handshake.

use std::sync::Arc;

use crate::auth::jwt;
use crate::db::models::UserProfile;
use crate::db::{self, DbPool, StoreError};
use crate::users::store;
use crate::ws::Identity;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("token subject {0} does not exist")]
    UnknownUser(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verifies session tokens against the signing secret and the user store.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Arc<[u8]>,
    db: DbPool,
}

impl TokenVerifier {
    pub fn new(secret: &[u8], db: DbPool) -> Self {
        Self {
            secret: Arc::from(secret),
            db,
        }
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Decode the token and load the user it names.
    pub async fn try_resolve(&self, token: &str) -> Result<UserProfile, AuthError> {
        let claims = jwt::validate_token(&self.secret, token)?;
        let user_id = claims.sub;
        let lookup_id = user_id.clone();
        let user = db::with_conn(&self.db, move |conn| store::find_by_id(conn, &lookup_id)).await?;
        user.map(UserProfile::from)
            .ok_or(AuthError::UnknownUser(user_id))
    }

    /// Like [`try_resolve`](Self::try_resolve) but never fails: any problem is `None`.
    pub async fn resolve(&self, token: &str) -> Option<UserProfile> {
        match self.try_resolve(token).await {
            Ok(user) => Some(user),
            Err(AuthError::Store(err)) => {
                tracing::error!(error = %err, "User store unavailable during token check");
                None
            }
            Err(err) => {
                tracing::debug!(error = %err, "Token rejected");
                None
            }
        }
    }

    pub async fn verify(&self, token: &str) -> Option<Identity> {
        self.resolve(token).await.map(|user| user.username)
    }
}
