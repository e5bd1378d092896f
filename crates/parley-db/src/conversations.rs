use anyhow::Result;
use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use parley_types::models::PermissionFlags;

use crate::Database;
use crate::models::{ConversationRow, MemberRow};

const MEMBER_COLS: &str = "conversation_id, user_id, can_change_info, can_add_members, \
     can_remove_members, can_delete_messages, can_pin_messages, can_change_permissions, \
     pinned, archived, joined_at";

const CONVERSATION_COLS: &str =
    "id, kind, name, description, creator_id, slow_mode_seconds, removed, created_at";

fn map_conversation(row: &Row) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        creator_id: row.get(4)?,
        slow_mode_seconds: row.get(5)?,
        removed: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn map_member(row: &Row) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        conversation_id: row.get(0)?,
        user_id: row.get(1)?,
        flags: PermissionFlags {
            change_info: row.get(2)?,
            add_members: row.get(3)?,
            remove_members: row.get(4)?,
            delete_messages: row.get(5)?,
            pin_messages: row.get(6)?,
            change_permissions: row.get(7)?,
        },
        pinned: row.get(8)?,
        archived: row.get(9)?,
        joined_at: row.get(10)?,
    })
}

impl Database {
    // -- Conversations --

    pub fn create_conversation(
        &self,
        id: &Uuid,
        kind: &str,
        name: Option<&str>,
        description: Option<&str>,
        creator_id: &Uuid,
        slow_mode_seconds: u32,
        member_ids: &[Uuid],
    ) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, kind, name, description, creator_id, slow_mode_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id.to_string(), kind, name, description, creator_id.to_string(), slow_mode_seconds],
            )?;
            for user_id in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO members (conversation_id, user_id) VALUES (?1, ?2)",
                    params![id.to_string(), user_id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_conversation(&self, id: &Uuid) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {CONVERSATION_COLS} FROM conversations WHERE id = ?1"),
                    [id.to_string()],
                    map_conversation,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn conversations_for_user(&self, user_id: &Uuid) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.kind, c.name, c.description, c.creator_id, c.slow_mode_seconds,
                        c.removed, c.created_at
                 FROM conversations c
                 JOIN members m ON m.conversation_id = c.id
                 WHERE m.user_id = ?1 AND c.removed = 0
                 ORDER BY c.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_conversation_info(
        &self,
        id: &Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET name = ?2, description = ?3 WHERE id = ?1",
                params![id.to_string(), name, description],
            )?;
            Ok(())
        })
    }

    pub fn set_slow_mode(&self, id: &Uuid, seconds: u32) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET slow_mode_seconds = ?2 WHERE id = ?1",
                params![id.to_string(), seconds],
            )?;
            Ok(())
        })
    }

    /// Atomic creator swap: a single UPDATE, so exactly one creator exists
    /// at every instant.
    pub fn set_creator(&self, id: &Uuid, new_creator: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET creator_id = ?2 WHERE id = ?1",
                params![id.to_string(), new_creator.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn mark_conversation_removed(&self, id: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET removed = 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(())
        })
    }

    // -- Members --

    pub fn get_member(&self, conversation_id: &Uuid, user_id: &Uuid) -> Result<Option<MemberRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {MEMBER_COLS} FROM members
                         WHERE conversation_id = ?1 AND user_id = ?2"
                    ),
                    params![conversation_id.to_string(), user_id.to_string()],
                    map_member,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn is_member(&self, conversation_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        Ok(self.get_member(conversation_id, user_id)?.is_some())
    }

    pub fn conversation_members(&self, conversation_id: &Uuid) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMBER_COLS} FROM members
                 WHERE conversation_id = ?1
                 ORDER BY joined_at, user_id"
            ))?;
            let rows = stmt
                .query_map([conversation_id.to_string()], map_member)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn member_user_ids(&self, conversation_id: &Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM members WHERE conversation_id = ?1")?;
            let ids = stmt
                .query_map([conversation_id.to_string()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids
                .iter()
                .map(|s| crate::models::parse_uuid(s, "member user_id"))
                .collect())
        })
    }

    pub fn add_member(&self, conversation_id: &Uuid, user_id: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO members (conversation_id, user_id) VALUES (?1, ?2)",
                params![conversation_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Returns false when the user was not a member.
    pub fn remove_member(&self, conversation_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM members WHERE conversation_id = ?1 AND user_id = ?2",
                params![conversation_id.to_string(), user_id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_member_flags(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        flags: &PermissionFlags,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE members SET can_change_info = ?3, can_add_members = ?4,
                        can_remove_members = ?5, can_delete_messages = ?6,
                        can_pin_messages = ?7, can_change_permissions = ?8
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![
                    conversation_id.to_string(),
                    user_id.to_string(),
                    flags.change_info,
                    flags.add_members,
                    flags.remove_members,
                    flags.delete_messages,
                    flags.pin_messages,
                    flags.change_permissions,
                ],
            )?;
            Ok(())
        })
    }

    /// Per-member display state (pin/archive in the conversation list).
    /// Never shared with other members.
    pub fn set_member_display(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
        pinned: bool,
        archived: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE members SET pinned = ?3, archived = ?4
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![
                    conversation_id.to_string(),
                    user_id.to_string(),
                    pinned,
                    archived
                ],
            )?;
            Ok(())
        })
    }

    /// Created-at of the user's most recent message in the conversation,
    /// scheduled sends included. Drives slow-mode accounting.
    pub fn last_create_time(
        &self,
        conversation_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT MAX(created_at) FROM messages
                     WHERE conversation_id = ?1 AND sender_id = ?2",
                    params![conversation_id.to_string(), user_id.to_string()],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok(row.flatten())
        })
    }

    // -- Blocks --
    // The block relationship itself is owned by an external service; this
    // table is the locally-synced lookup the policy layer consults.

    pub fn is_blocked_pair(&self, a: &Uuid, b: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM blocks
                 WHERE (user_id = ?1 AND blocked_id = ?2)
                    OR (user_id = ?2 AND blocked_id = ?1)",
                params![a.to_string(), b.to_string()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_block(&self, user_id: &Uuid, blocked_id: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blocks (user_id, blocked_id) VALUES (?1, ?2)",
                params![user_id.to_string(), blocked_id.to_string()],
            )?;
            Ok(())
        })
    }

    pub fn clear_block(&self, user_id: &Uuid, blocked_id: &Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM blocks WHERE user_id = ?1 AND blocked_id = ?2",
                params![user_id.to_string(), blocked_id.to_string()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use parley_types::models::PermissionFlags;

    use crate::Database;

    #[test]
    fn member_flags_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let conv = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let member = Uuid::new_v4();
        db.create_conversation(&conv, "group", Some("g"), None, &creator, 0, &[creator, member])
            .unwrap();

        let mut flags = PermissionFlags::none();
        flags.pin_messages = true;
        flags.remove_members = true;
        db.set_member_flags(&conv, &member, &flags).unwrap();

        let row = db.get_member(&conv, &member).unwrap().unwrap();
        assert!(row.flags.pin_messages);
        assert!(row.flags.remove_members);
        assert!(!row.flags.change_info);
    }

    #[test]
    fn block_lookup_is_symmetric() {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(!db.is_blocked_pair(&a, &b).unwrap());

        db.set_block(&a, &b).unwrap();
        assert!(db.is_blocked_pair(&a, &b).unwrap());
        assert!(db.is_blocked_pair(&b, &a).unwrap());

        db.clear_block(&a, &b).unwrap();
        assert!(!db.is_blocked_pair(&a, &b).unwrap());
    }

    #[test]
    fn removed_groups_drop_out_of_listings() {
        let db = Database::open_in_memory().unwrap();
        let conv = Uuid::new_v4();
        let creator = Uuid::new_v4();
        db.create_conversation(&conv, "group", Some("g"), None, &creator, 0, &[creator])
            .unwrap();
        assert_eq!(db.conversations_for_user(&creator).unwrap().len(), 1);

        db.mark_conversation_removed(&conv).unwrap();
        assert!(db.conversations_for_user(&creator).unwrap().is_empty());
        // The row itself survives (soft removal).
        assert!(db.get_conversation(&conv).unwrap().unwrap().removed);
    }
}
