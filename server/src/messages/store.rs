//! Message store: persistence and history for two-party conversations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::models::{format_timestamp, parse_timestamp, PersistedMessage};
use crate::db::StoreError;

/// Persist one message and return it with both usernames resolved.
pub fn create_message(
    conn: &Connection,
    sender_id: &str,
    receiver_id: &str,
    text: &str,
) -> Result<PersistedMessage, StoreError> {
    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO messages (id, sender_id, receiver_id, text, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, sender_id, receiver_id, text, format_timestamp(created_at)],
    )?;

    let (from, to): (String, String) = conn.query_row(
        "SELECT s.username, r.username FROM users s, users r WHERE s.id = ?1 AND r.id = ?2",
        params![sender_id, receiver_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    Ok(PersistedMessage {
        id,
        from,
        to,
        text: text.to_string(),
        created_at,
    })
}

/// Every message exchanged between two users, oldest first.
pub fn list_messages(
    conn: &Connection,
    user_a: &str,
    user_b: &str,
) -> Result<Vec<PersistedMessage>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT m.id, s.username, r.username, m.text, m.created_at
         FROM messages m
         JOIN users s ON s.id = m.sender_id
         JOIN users r ON r.id = m.receiver_id
         WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
            OR (m.sender_id = ?2 AND m.receiver_id = ?1)
         ORDER BY m.created_at ASC, m.id ASC",
    )?;

    let messages = stmt
        .query_map(params![user_a, user_b], |row| {
            let created_at: String = row.get(4)?;
            Ok(PersistedMessage {
                id: row.get(0)?,
                from: row.get(1)?,
                to: row.get(2)?,
                text: row.get(3)?,
                created_at: parse_timestamp(&created_at),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(messages)
}

/// Delete messages created before `cutoff`. Returns the number removed.
pub fn delete_older_than(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
    let deleted = conn.execute(
        "DELETE FROM messages WHERE created_at < ?1",
        params![format_timestamp(cutoff)],
    )?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::users::store::create_user;

    #[test]
    fn history_covers_both_directions_in_order() {
        let pool = db::open_in_memory().unwrap();
        let conn = pool.lock().unwrap();
        let alice = create_user(&conn, "alice", "password1").unwrap();
        let bob = create_user(&conn, "bob", "password1").unwrap();
        let carol = create_user(&conn, "carol", "password1").unwrap();

        create_message(&conn, &alice.id, &bob.id, "one").unwrap();
        create_message(&conn, &bob.id, &alice.id, "two").unwrap();
        create_message(&conn, &alice.id, &carol.id, "elsewhere").unwrap();
        let third = create_message(&conn, &alice.id, &bob.id, "three").unwrap();
        assert_eq!(third.from, "alice");
        assert_eq!(third.to, "bob");

        let history = list_messages(&conn, &bob.id, &alice.id).unwrap();
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(history[1].from, "bob");
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn purge_removes_only_old_messages() {
        let pool = db::open_in_memory().unwrap();
        let conn = pool.lock().unwrap();
        let alice = create_user(&conn, "alice", "password1").unwrap();
        let bob = create_user(&conn, "bob", "password1").unwrap();

        create_message(&conn, &alice.id, &bob.id, "old").unwrap();
        conn.execute(
            "UPDATE messages SET created_at = ?1",
            params![format_timestamp(Utc::now() - chrono::Duration::minutes(10))],
        )
        .unwrap();
        create_message(&conn, &alice.id, &bob.id, "fresh").unwrap();

        let removed = delete_older_than(&conn, Utc::now() - chrono::Duration::minutes(1)).unwrap();
        assert_eq!(removed, 1);

        let remaining = list_messages(&conn, &alice.id, &bob.id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].text, "fresh");
    }

    #[test]
    fn unknown_receiver_violates_foreign_key() {
        let pool = db::open_in_memory().unwrap();
        let conn = pool.lock().unwrap();
        let alice = create_user(&conn, "alice", "password1").unwrap();

        assert!(create_message(&conn, &alice.id, "ghost", "hello?").is_err());
    }
}
