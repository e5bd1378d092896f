use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use parley_types::models::ParentPreview;

use crate::Database;
use crate::models::{MessageRow, parse_uuid};

const MESSAGE_COLS: &str = "id, conversation_id, sender_id, kind, content, attachment_url, \
     parent_id, scheduled_at, published, self_destruct_at, deleted, edited_at, pinned, \
     pinned_by, created_at";

/// A message is visible iff it is published (not scheduled-for-future),
/// not past its self-destruct time, and not hidden for the requesting user.
/// Tombstones stay visible to preserve ordering and history.
const VISIBLE: &str = "published = 1
     AND (self_destruct_at IS NULL OR self_destruct_at > ?2)
     AND NOT EXISTS (SELECT 1 FROM message_hides h
                     WHERE h.message_id = messages.id AND h.user_id = ?3)";

fn map_message(row: &Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind: row.get(3)?,
        content: row.get(4)?,
        attachment_url: row.get(5)?,
        parent_id: row.get(6)?,
        scheduled_at: row.get(7)?,
        published: row.get(8)?,
        self_destruct_at: row.get(9)?,
        deleted: row.get(10)?,
        edited_at: row.get(11)?,
        pinned: row.get(12)?,
        pinned_by: row.get(13)?,
        created_at: row.get(14)?,
    })
}

impl Database {
    /// Persist a message and its mention list in one transaction.
    /// Returns the server-assigned id (the commit-order key).
    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        conversation_id: &Uuid,
        sender_id: &Uuid,
        kind: &str,
        content: &str,
        attachment_url: Option<&str>,
        parent_id: Option<i64>,
        scheduled_at: Option<&str>,
        published: bool,
        self_destruct_at: Option<&str>,
        created_at: &str,
        mentions: &[Uuid],
    ) -> Result<i64> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, kind, content, attachment_url,
                        parent_id, scheduled_at, published, self_destruct_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    conversation_id.to_string(),
                    sender_id.to_string(),
                    kind,
                    content,
                    attachment_url,
                    parent_id,
                    scheduled_at,
                    published,
                    self_destruct_at,
                    created_at,
                ],
            )?;
            let id = tx.last_insert_rowid();
            for user_id in mentions {
                tx.execute(
                    "INSERT OR IGNORE INTO mentions (message_id, user_id) VALUES (?1, ?2)",
                    params![id, user_id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(id)
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                    [id],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_visible_message(
        &self,
        id: i64,
        user_id: &Uuid,
        now: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1 AND {VISIBLE}"
                    ),
                    params![id, now, user_id.to_string()],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// One newest-first page of visible messages. Commit order is the
    /// ordering key, message id breaking created-at ties.
    pub fn visible_page(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        page: u32,
        page_size: u32,
        now: &str,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE conversation_id = ?1 AND {VISIBLE}
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4 OFFSET ?5"
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        conversation_id.to_string(),
                        now,
                        user_id.to_string(),
                        page_size,
                        page as u64 * page_size as u64,
                    ],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Free-text search over visible, non-tombstoned messages. With a
    /// conversation id the scope is that conversation; without one, every
    /// conversation the requester belongs to.
    pub fn search_messages(
        &self,
        user_id: &Uuid,
        conversation_id: Option<&Uuid>,
        query: &str,
        limit: u32,
        now: &str,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let scope = match conversation_id {
                Some(_) => "conversation_id = ?4",
                None => {
                    "conversation_id IN (SELECT m.conversation_id FROM members m
                         JOIN conversations c ON c.id = m.conversation_id
                         WHERE m.user_id = ?3 AND c.removed = 0)"
                }
            };
            let sql = format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE {scope} AND deleted = 0 AND {VISIBLE}
                   AND content LIKE '%' || ?1 || '%'
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?5"
            );
            let mut stmt = conn.prepare(&sql)?;
            let conv = conversation_id.map(|c| c.to_string()).unwrap_or_default();
            let rows = stmt
                .query_map(
                    params![query, now, user_id.to_string(), conv, limit],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn apply_edit(&self, id: i64, content: &str, edited_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
                params![id, content, edited_at],
            )?;
            Ok(())
        })
    }

    /// Delete-for-everyone: content and attachment cleared, row retained.
    pub fn tombstone_message(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET deleted = 1, content = '', attachment_url = NULL,
                        pinned = 0, pinned_by = NULL, pinned_at = NULL
                 WHERE id = ?1",
                [id],
            )?;
            Ok(())
        })
    }

    pub fn hide_message(&self, id: i64, user_id: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_hides (message_id, user_id) VALUES (?1, ?2)",
                params![id, user_id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn set_pin(&self, id: i64, pinned: bool, by: Option<&Uuid>, at: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET pinned = ?2, pinned_by = ?3, pinned_at = ?4 WHERE id = ?1",
                params![id, pinned, by.map(|u| u.to_string()), at],
            )?;
            Ok(())
        })
    }

    /// Insert-once: returns false when the (message, user) pair already had
    /// a marker, so read time never regresses.
    pub fn insert_read_marker(&self, id: i64, user_id: &Uuid, read_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT OR IGNORE INTO read_markers (message_id, user_id, read_at)
                 VALUES (?1, ?2, ?3)",
                params![id, user_id.to_string(), read_at],
            )?;
            Ok(n > 0)
        })
    }

    pub fn mentions_for_message(&self, id: i64) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT user_id FROM mentions WHERE message_id = ?1")?;
            let ids = stmt
                .query_map([id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids.iter().map(|s| parse_uuid(s, "mention user_id")).collect())
        })
    }

    /// Batch-fetch mentions for a set of message ids.
    pub fn mentions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<(i64, Uuid)>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id FROM mentions WHERE message_id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();
            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .map(|(id, uid)| (id, parse_uuid(&uid, "mention user_id")))
                .collect())
        })
    }

    /// Shortened view of a replied-to message for embedding in replies.
    pub fn parent_preview(&self, id: i64) -> Result<Option<ParentPreview>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, sender_id, content, deleted FROM messages WHERE id = ?1",
                    [id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, bool>(3)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row.map(|(id, sender, content, deleted)| ParentPreview {
                id,
                sender_id: parse_uuid(&sender, "sender_id"),
                content: truncate(&content, 120),
                deleted,
            }))
        })
    }

    /// Promote due scheduled messages: check-and-set on `published` so a
    /// second sweep over the same instant promotes (and announces) nothing.
    /// Promoted rows are restamped to promotion time.
    pub fn promote_due(&self, now: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let due: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages
                     WHERE published = 0 AND scheduled_at IS NOT NULL AND scheduled_at <= ?1
                     ORDER BY id",
                )?;
                stmt.query_map([now], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            let mut promoted = Vec::new();
            for id in due {
                let n = tx.execute(
                    "UPDATE messages SET published = 1, created_at = ?2
                     WHERE id = ?1 AND published = 0",
                    params![id, now],
                )?;
                if n == 1 {
                    let row = tx.query_row(
                        &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                        [id],
                        map_message,
                    )?;
                    promoted.push(row);
                }
            }
            tx.commit()?;
            Ok(promoted)
        })
    }

    /// Purge expired self-destruct messages: tombstone content, keep the
    /// row. The `deleted = 0` guard makes the sweep idempotent.
    pub fn purge_expired(&self, now: &str) -> Result<Vec<(i64, String)>> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let due: Vec<(i64, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, conversation_id FROM messages
                     WHERE deleted = 0 AND self_destruct_at IS NOT NULL
                       AND self_destruct_at <= ?1
                     ORDER BY id",
                )?;
                stmt.query_map([now], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            let mut purged = Vec::new();
            for (id, conversation_id) in due {
                let n = tx.execute(
                    "UPDATE messages SET deleted = 1, content = '', attachment_url = NULL,
                            pinned = 0, pinned_by = NULL, pinned_at = NULL
                     WHERE id = ?1 AND deleted = 0",
                    [id],
                )?;
                if n == 1 {
                    purged.push((id, conversation_id));
                }
            }
            tx.commit()?;
            Ok(purged)
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::{Database, format_ts};

    fn seeded() -> (Database, Uuid, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let conv = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_conversation(&conv, "group", Some("t"), None, &alice, 0, &[alice, bob])
            .unwrap();
        (db, conv, alice, bob)
    }

    fn insert_text(db: &Database, conv: &Uuid, sender: &Uuid, content: &str) -> i64 {
        db.insert_message(
            conv,
            sender,
            "text",
            content,
            None,
            None,
            None,
            true,
            None,
            &format_ts(Utc::now()),
            &[],
        )
        .unwrap()
    }

    #[test]
    fn page_is_newest_first_with_id_tiebreak() {
        let (db, conv, alice, _) = seeded();
        // Same-second inserts: created_at ties, id decides.
        let a = insert_text(&db, &conv, &alice, "a");
        let b = insert_text(&db, &conv, &alice, "b");
        let c = insert_text(&db, &conv, &alice, "c");

        let now = format_ts(Utc::now());
        let page = db.visible_page(&conv, &alice, 0, 2, &now).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![c, b]);

        let page = db.visible_page(&conv, &alice, 1, 2, &now).unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn hide_is_per_user() {
        let (db, conv, alice, bob) = seeded();
        let id = insert_text(&db, &conv, &alice, "hide me");
        db.hide_message(id, &alice).unwrap();

        let now = format_ts(Utc::now());
        assert!(db.get_visible_message(id, &alice, &now).unwrap().is_none());
        assert!(db.get_visible_message(id, &bob, &now).unwrap().is_some());
    }

    #[test]
    fn promotion_is_check_and_set() {
        let (db, conv, alice, _) = seeded();
        let at = format_ts(Utc::now() + Duration::hours(1));
        db.insert_message(
            &conv,
            &alice,
            "text",
            "later",
            None,
            None,
            Some(&at),
            false,
            None,
            &format_ts(Utc::now()),
            &[],
        )
        .unwrap();

        let before = format_ts(Utc::now());
        assert!(db.promote_due(&before).unwrap().is_empty());

        let after = format_ts(Utc::now() + Duration::hours(2));
        assert_eq!(db.promote_due(&after).unwrap().len(), 1);
        assert!(db.promote_due(&after).unwrap().is_empty());
    }

    #[test]
    fn tombstone_keeps_the_row() {
        let (db, conv, alice, bob) = seeded();
        let id = insert_text(&db, &conv, &alice, "gone soon");
        db.tombstone_message(id).unwrap();

        let now = format_ts(Utc::now());
        let row = db.get_visible_message(id, &bob, &now).unwrap().unwrap();
        assert!(row.deleted);
        assert!(row.content.is_empty());
    }

    #[test]
    fn read_marker_inserts_once() {
        let (db, conv, alice, bob) = seeded();
        let id = insert_text(&db, &conv, &alice, "read me");
        let now = format_ts(Utc::now());
        assert!(db.insert_read_marker(id, &bob, &now).unwrap());
        assert!(!db.insert_read_marker(id, &bob, &now).unwrap());
    }
}
