use crate::models::{MESSAGE_COLUMNS, MessageRow};
use crate::{Database, now_millis};
use anyhow::{Result, anyhow};
use rusqlite::Connection;

use seclink_types::conversation::conversation_key;

/// Both participants of a message still resolve to a live user.
const LIVE_PARTICIPANTS: &str = "EXISTS (SELECT 1 FROM users s WHERE s.id = m.sender_id)
     AND EXISTS (SELECT 1 FROM users r WHERE r.id = m.recipient_id)";

impl Database {
    // -- Messages --

    /// Append a message to the sender/recipient thread.
    ///
    /// The timestamp is assigned here, never taken from the client, and is
    /// clamped so it never sorts before the thread's current latest message.
    /// Equal timestamps fall back to `seq` (insertion order).
    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
    ) -> Result<MessageRow> {
        let conversation_id = conversation_key(sender_id, recipient_id);
        let now = now_millis();

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, MAX(?6, COALESCE(
                    (SELECT MAX(created_at) FROM messages WHERE conversation_id = ?2), 0)))",
                rusqlite::params![id, conversation_id, sender_id, recipient_id, content, now],
            )?;
            let seq = conn.last_insert_rowid();
            query_message_by_seq(conn, seq)?
                .ok_or_else(|| anyhow!("Message {} vanished after insert", id))
        })
    }

    /// Full thread between two users, oldest first. Messages whose sender or
    /// recipient has been deleted are left out.
    pub fn conversation_history(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        let conversation_id = conversation_key(user_a, user_b);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages m
                 WHERE m.conversation_id = ?1 AND {LIVE_PARTICIPANTS}
                 ORDER BY m.created_at ASC, m.seq ASC"
            ))?;
            let rows = stmt
                .query_map([&conversation_id], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark every unread message `other_user` sent to `current_user` as read.
    /// Only rows addressed to `current_user` are touched, so a sender can
    /// never flag its own messages. Returns the number of rows changed; a
    /// second call returns 0.
    pub fn mark_conversation_read(&self, current_user: &str, other_user: &str) -> Result<u64> {
        let conversation_id = conversation_key(current_user, other_user);

        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1, read_at = ?1
                 WHERE conversation_id = ?2 AND recipient_id = ?3 AND is_read = 0",
                rusqlite::params![now_millis(), conversation_id, current_user],
            )?;
            Ok(changed as u64)
        })
    }

    /// Unread messages addressed to `user_id` across all threads, ignoring
    /// messages from senders that no longer exist.
    pub fn unread_count(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.recipient_id = ?1 AND m.is_read = 0
                   AND EXISTS (SELECT 1 FROM users s WHERE s.id = m.sender_id)",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Delete messages in the given threads whose sender or recipient no
    /// longer exists. Returns how many rows were removed.
    pub fn purge_orphaned_messages(&self, conversation_ids: &[String]) -> Result<u64> {
        if conversation_ids.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let placeholders: Vec<String> =
                (1..=conversation_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "DELETE FROM messages AS m
                 WHERE m.conversation_id IN ({})
                   AND NOT ({LIVE_PARTICIPANTS})",
                placeholders.join(", ")
            );
            let changed = conn.execute(&sql, rusqlite::params_from_iter(conversation_ids))?;
            Ok(changed as u64)
        })
    }
}

fn query_message_by_seq(conn: &Connection, seq: i64) -> Result<Option<MessageRow>> {
    use rusqlite::OptionalExtension;

    let mut stmt = conn.prepare(&format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.seq = ?1"))?;
    let row = stmt.query_row([seq], MessageRow::from_row).optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::NewUser;
    use seclink_types::models::Role;
    use uuid::Uuid;

    fn user(db: &Database, email: &str) -> String {
        let id = Uuid::new_v4();
        db.create_user(&NewUser {
            id,
            email: email.to_string(),
            password_hash: "hash".into(),
            role: Role::Volunteer,
        })
        .unwrap();
        id.to_string()
    }

    fn send(db: &Database, from: &str, to: &str, content: &str) -> MessageRow {
        db.insert_message(&Uuid::new_v4().to_string(), from, to, content).unwrap()
    }

    #[test]
    fn send_then_history() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org");
        let b = user(&db, "b@example.org");

        let sent = send(&db, &a, &b, "hello");
        assert_eq!(sent.conversation_id, conversation_key(&b, &a));
        assert!(!sent.is_read);
        assert!(sent.read_at.is_none());

        let history = db.conversation_history(&a, &b).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
        assert!(!history[0].is_read);

        // Same thread from the other side.
        assert_eq!(db.conversation_history(&b, &a).unwrap().len(), 1);
    }

    #[test]
    fn history_is_in_send_order() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org");
        let b = user(&db, "b@example.org");

        for i in 0..20 {
            if i % 2 == 0 {
                send(&db, &a, &b, &format!("m{i}"));
            } else {
                send(&db, &b, &a, &format!("m{i}"));
            }
        }

        let history = db.conversation_history(&a, &b).unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn timestamp_never_goes_backwards() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org");
        let b = user(&db, "b@example.org");

        // Simulate a message stored with a clock far ahead of ours.
        let future = now_millis() + 60_000;
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'early', ?5)",
                rusqlite::params![Uuid::new_v4().to_string(), conversation_key(&a, &b), a, b, future],
            )?;
            Ok(())
        })
        .unwrap();

        let later = send(&db, &b, &a, "late");
        assert!(later.created_at >= future);

        let history = db.conversation_history(&a, &b).unwrap();
        assert_eq!(history.last().unwrap().content, "late");
    }

    #[test]
    fn equal_timestamps_order_by_insertion() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org");
        let b = user(&db, "b@example.org");
        let c = user(&db, "c@example.org");
        send(&db, &a, &b, "first");
        send(&db, &a, &c, "second");
        send(&db, &b, &a, "third");

        db.with_conn_mut(|conn| {
            conn.execute("UPDATE messages SET created_at = 1700000000000", [])?;
            Ok(())
        })
        .unwrap();

        let history = |x: &str, y: &str| -> Vec<String> {
            db.conversation_history(x, y)
                .unwrap()
                .into_iter()
                .map(|m| m.content)
                .collect()
        };
        assert_eq!(history(&a, &b), ["first", "third"]);
        assert_eq!(history(&b, &a), history(&a, &b));

        let inbox_order = || -> Vec<(String, String)> {
            db.inbox(&a)
                .unwrap()
                .threads
                .into_iter()
                .map(|t| (t.other_user_id, t.last_message.content))
                .collect()
        };
        let expected = vec![(b.clone(), "third".to_string()), (c.clone(), "second".to_string())];
        assert_eq!(inbox_order(), expected);
        assert_eq!(inbox_order(), expected);
    }

    #[test]
    fn mark_read_is_idempotent_and_recipient_only() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org");
        let b = user(&db, "b@example.org");

        send(&db, &a, &b, "one");
        send(&db, &a, &b, "two");
        send(&db, &b, &a, "reply");

        assert_eq!(db.unread_count(&b).unwrap(), 2);
        assert_eq!(db.unread_count(&a).unwrap(), 1);

        // Sender side only flips the reply addressed to it.
        assert_eq!(db.mark_conversation_read(&a, &b).unwrap(), 1);
        assert_eq!(db.unread_count(&b).unwrap(), 2);

        assert_eq!(db.mark_conversation_read(&b, &a).unwrap(), 2);
        assert_eq!(db.mark_conversation_read(&b, &a).unwrap(), 0);
        assert_eq!(db.unread_count(&b).unwrap(), 0);

        let history = db.conversation_history(&a, &b).unwrap();
        assert!(history.iter().all(|m| m.is_read && m.read_at.is_some()));
    }

    #[test]
    fn orphans_are_filtered_and_purged() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.org");
        let b = user(&db, "b@example.org");
        let c = user(&db, "c@example.org");

        send(&db, &b, &a, "from b");
        send(&db, &c, &a, "from c");
        db.delete_user(&b).unwrap();

        assert_eq!(db.unread_count(&a).unwrap(), 1);
        assert!(db.conversation_history(&a, &b).unwrap().is_empty());

        let purged = db
            .purge_orphaned_messages(&[conversation_key(&a, &b), conversation_key(&a, &c)])
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(db.conversation_history(&a, &c).unwrap().len(), 1);
        assert_eq!(db.purge_orphaned_messages(&[]).unwrap(), 0);
    }
}
