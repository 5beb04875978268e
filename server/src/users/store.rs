//! Credential / user store.
//!
//! Synchronous functions over a borrowed connection; callers run them through
//! [`crate::db::with_conn`]. Argon2 work never runs while the connection is
//! locked: [`register`] hashes first and [`authenticate`] verifies after the
//! row is read.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::models::{format_timestamp, User, UserProfile};
use crate::db::{self, DbPool, StoreError};
use crate::users::password;

const USER_COLUMNS: &str = "id, username, password_hash, profile_pic, status, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        profile_pic: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Insert a user. `password_hash` is an Argon2 PHC string.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
) -> Result<UserProfile, StoreError> {
    if find_by_username(conn, username)?.is_some() {
        return Err(StoreError::UsernameTaken);
    }

    let user = User {
        id: Uuid::now_v7().to_string(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        profile_pic: None,
        status: None,
        created_at: format_timestamp(Utc::now()),
    };

    conn.execute(
        "INSERT INTO users (id, username, password_hash, profile_pic, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.username,
            user.password_hash,
            user.profile_pic,
            user.status,
            user.created_at
        ],
    )?;

    tracing::info!(username = %user.username, user_id = %user.id, "User registered");
    Ok(user.into())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<User>, StoreError> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<User>, StoreError> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

/// Hash `password` on the blocking pool, then insert the account.
pub async fn register(db: &DbPool, username: &str, password: &str) -> Result<UserProfile, StoreError> {
    let password = password.to_string();
    let password_hash =
        tokio::task::spawn_blocking(move || password::hash_password(&password)).await??;

    let username = username.to_string();
    db::with_conn(db, move |conn| create_user(conn, &username, &password_hash)).await
}

/// Check credentials. `None` covers both unknown user and wrong password.
pub async fn authenticate(
    db: &DbPool,
    username: &str,
    password: &str,
) -> Result<Option<UserProfile>, StoreError> {
    let username = username.to_string();
    let Some(user) = db::with_conn(db, move |conn| find_by_username(conn, &username)).await? else {
        return Ok(None);
    };

    let password = password.to_string();
    let hash = user.password_hash.clone();
    let matches =
        tokio::task::spawn_blocking(move || password::verify_password(&password, &hash)).await?;

    Ok(matches.then(|| user.into()))
}

/// One page of the user directory, always excluding `exclude_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPage {
    pub users: Vec<UserProfile>,
    pub total: u64,
}

/// Case-insensitive substring search over usernames, ordered by username.
/// `page` is 1-based.
pub fn list_users(
    conn: &Connection,
    exclude_id: &str,
    page: u32,
    limit: u32,
    search: &str,
) -> Result<UserPage, StoreError> {
    let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
    let offset = (page.max(1) - 1) as i64 * limit as i64;

    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE id != ?1 AND lower(username) LIKE ?2 ESCAPE '\\'
         ORDER BY username ASC
         LIMIT ?3 OFFSET ?4"
    ))?;
    let users = stmt
        .query_map(params![exclude_id, pattern, limit as i64, offset], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(UserProfile::from)
        .collect();

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id != ?1 AND lower(username) LIKE ?2 ESCAPE '\\'",
        params![exclude_id, pattern],
        |row| row.get(0),
    )?;

    Ok(UserPage {
        users,
        total: total as u64,
    })
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
