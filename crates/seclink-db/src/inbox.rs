use std::collections::HashMap;

use crate::Database;
use crate::models::MessageRow;
use anyhow::Result;

/// One thread as seen from a given user's inbox.
pub struct InboxThread {
    pub other_user_id: String,
    pub other_email: String,
    pub other_role: String,
    /// Full name or organization name, when the other user has a profile.
    pub other_profile_name: Option<String>,
    pub last_message: MessageRow,
    pub unread_count: u64,
}

impl InboxThread {
    /// Profile name, or the login email when no profile resolves.
    pub fn display_name(&self) -> &str {
        self.other_profile_name.as_deref().unwrap_or(&self.other_email)
    }
}

pub struct InboxScan {
    /// Most recently active thread first.
    pub threads: Vec<InboxThread>,
    /// Threads whose other participant no longer exists.
    pub orphaned: Vec<String>,
}

/// A message touching the inbox owner, joined with the other participant.
/// `other_*` is `None` when that user has been deleted.
pub(crate) struct InboxRow {
    pub message: MessageRow,
    pub other_user_id: String,
    pub other: Option<OtherParticipant>,
}

pub(crate) struct OtherParticipant {
    pub email: String,
    pub role: String,
    pub profile_name: Option<String>,
}

impl Database {
    pub fn inbox(&self, user_id: &str) -> Result<InboxScan> {
        let rows = self.with_conn(|conn| {
            // Single query: the other participant and their profile name are
            // LEFT JOINed so deleted users come back as NULLs, not errors.
            let mut stmt = conn.prepare(
                "SELECT m.seq, m.id, m.conversation_id, m.sender_id, m.recipient_id, m.content,
                        m.created_at, m.is_read, m.read_at,
                        CASE WHEN m.sender_id = ?1 THEN m.recipient_id ELSE m.sender_id END AS other_id,
                        o.id, o.email, o.role,
                        COALESCE(v.full_name, n.organization_name)
                 FROM messages m
                 LEFT JOIN users o
                        ON o.id = CASE WHEN m.sender_id = ?1 THEN m.recipient_id ELSE m.sender_id END
                 LEFT JOIN volunteers v ON o.role = 'volunteer' AND v.id = o.ref_id
                 LEFT JOIN ngos n ON o.role = 'ngo' AND n.id = o.ref_id
                 WHERE m.sender_id = ?1 OR m.recipient_id = ?1
                 ORDER BY m.created_at DESC, m.seq DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    let other_found: Option<String> = row.get(10)?;
                    let other = match other_found {
                        Some(_) => Some(OtherParticipant {
                            email: row.get(11)?,
                            role: row.get(12)?,
                            profile_name: row.get(13)?,
                        }),
                        None => None,
                    };
                    Ok(InboxRow {
                        message: MessageRow::from_row(row)?,
                        other_user_id: row.get(9)?,
                        other,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(aggregate(user_id, rows))
    }
}

/// Collapse rows (newest first) into one entry per thread. The first row of
/// each thread is its latest message, so output order is latest activity
/// first, with `seq` breaking timestamp ties.
pub(crate) fn aggregate(user_id: &str, rows: Vec<InboxRow>) -> InboxScan {
    let mut threads: Vec<InboxThread> = Vec::new();
    let mut orphaned: Vec<String> = Vec::new();
    // conversation id -> position in `threads`, or None for an orphaned thread
    let mut index: HashMap<String, Option<usize>> = HashMap::new();

    for row in rows {
        let unread = row.message.recipient_id == user_id && !row.message.is_read;

        if let Some(slot) = index.get(&row.message.conversation_id) {
            if let (Some(i), true) = (slot, unread) {
                threads[*i].unread_count += 1;
            }
            continue;
        }

        match row.other {
            Some(other) => {
                index.insert(row.message.conversation_id.clone(), Some(threads.len()));
                threads.push(InboxThread {
                    other_user_id: row.other_user_id,
                    other_email: other.email,
                    other_role: other.role,
                    other_profile_name: other.profile_name,
                    unread_count: u64::from(unread),
                    last_message: row.message,
                });
            }
            None => {
                index.insert(row.message.conversation_id.clone(), None);
                orphaned.push(row.message.conversation_id);
            }
        }
    }

    InboxScan { threads, orphaned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::{NewNgo, NewUser, NewVolunteer};
    use seclink_types::models::Role;
    use uuid::Uuid;

    fn bare_user(db: &Database, email: &str) -> String {
        let id = Uuid::new_v4();
        db.create_user(&NewUser {
            id,
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::Admin,
        })
        .unwrap();
        id.to_string()
    }

    fn send(db: &Database, from: &str, to: &str, content: &str) {
        db.insert_message(&Uuid::new_v4().to_string(), from, to, content).unwrap();
    }

    fn row(seq: i64, conv: &str, sender: &str, recipient: &str, created_at: i64, other: bool) -> InboxRow {
        let other_id = if sender == "me" { recipient } else { sender };
        InboxRow {
            message: MessageRow {
                seq,
                id: format!("m{seq}"),
                conversation_id: conv.into(),
                sender_id: sender.into(),
                recipient_id: recipient.into(),
                content: format!("c{seq}"),
                created_at,
                is_read: false,
                read_at: None,
            },
            other_user_id: other_id.into(),
            other: other.then(|| OtherParticipant {
                email: format!("{other_id}@example.org"),
                role: "volunteer".into(),
                profile_name: None,
            }),
        }
    }

    #[test]
    fn aggregate_keeps_first_row_per_thread() {
        let rows = vec![
            row(4, "k1", "x", "me", 300, true),
            row(3, "k2", "me", "y", 200, true),
            row(2, "k1", "me", "x", 100, true),
            row(1, "k1", "x", "me", 50, true),
        ];
        let scan = aggregate("me", rows);

        assert_eq!(scan.threads.len(), 2);
        assert_eq!(scan.threads[0].last_message.seq, 4);
        assert_eq!(scan.threads[0].unread_count, 2);
        assert_eq!(scan.threads[1].other_user_id, "y");
        assert_eq!(scan.threads[1].unread_count, 0);
        assert!(scan.orphaned.is_empty());
    }

    #[test]
    fn aggregate_splits_out_orphans() {
        let rows = vec![
            row(2, "gone", "ghost", "me", 200, false),
            row(1, "gone", "me", "ghost", 100, false),
            row(0, "k1", "x", "me", 50, true),
        ];
        let scan = aggregate("me", rows);

        assert_eq!(scan.threads.len(), 1);
        assert_eq!(scan.orphaned, vec!["gone".to_string()]);
    }

    #[test]
    fn inbox_orders_by_latest_activity() {
        let db = Database::open_in_memory().unwrap();
        let a = bare_user(&db, "a@example.org");
        let b = bare_user(&db, "b@example.org");
        let c = bare_user(&db, "c@example.org");
        let d = bare_user(&db, "d@example.org");

        send(&db, &a, &b, "to b");
        send(&db, &a, &c, "to c");
        send(&db, &a, &d, "to d");
        send(&db, &b, &a, "b again");

        let scan = db.inbox(&a).unwrap();
        let order: Vec<_> = scan.threads.iter().map(|t| t.other_user_id.clone()).collect();
        assert_eq!(order, vec![b.clone(), d, c]);
        assert_eq!(scan.threads[0].last_message.content, "b again");
        assert_eq!(scan.threads[0].unread_count, 1);
        assert_eq!(scan.threads[0].display_name(), "b@example.org");
    }

    #[test]
    fn inbox_uses_profile_display_names() {
        let db = Database::open_in_memory().unwrap();
        let a = bare_user(&db, "a@example.org");

        let vol_user = Uuid::new_v4();
        db.register_volunteer(
            &NewUser {
                id: vol_user,
                email: "vol@example.org".into(),
                password_hash: "hash".into(),
                role: Role::Volunteer,
            },
            &NewVolunteer {
                id: Uuid::new_v4(),
                full_name: "Ada Lovelace".into(),
                weekly_availability: 4,
                areas_of_expertise: vec![],
                resume_url: None,
                background_check: true,
            },
        )
        .unwrap();

        let ngo_user = Uuid::new_v4();
        db.register_ngo(
            &NewUser {
                id: ngo_user,
                email: "ngo@example.org".into(),
                password_hash: "hash".into(),
                role: Role::Ngo,
            },
            &NewNgo {
                id: Uuid::new_v4(),
                organization_name: "Food Bank".into(),
                areas_of_concern: vec![],
            },
        )
        .unwrap();

        send(&db, &a, &vol_user.to_string(), "hi ada");
        send(&db, &a, &ngo_user.to_string(), "hi bank");

        let scan = db.inbox(&a).unwrap();
        let names: Vec<_> = scan.threads.iter().map(|t| t.display_name().to_string()).collect();
        assert_eq!(names, vec!["Food Bank".to_string(), "Ada Lovelace".to_string()]);
    }

    #[test]
    fn inbox_skips_deleted_users() {
        let db = Database::open_in_memory().unwrap();
        let a = bare_user(&db, "a@example.org");
        let b = bare_user(&db, "b@example.org");
        let c = bare_user(&db, "c@example.org");

        send(&db, &a, &b, "to b");
        send(&db, &c, &a, "from c");
        db.delete_user(&b).unwrap();

        let scan = db.inbox(&a).unwrap();
        assert_eq!(scan.threads.len(), 1);
        assert_eq!(scan.threads[0].other_user_id, c);
        assert_eq!(scan.orphaned, vec![seclink_types::conversation::conversation_key(&a, &b)]);
    }
}
