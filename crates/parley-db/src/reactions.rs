use std::collections::HashMap;

use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use parley_types::models::ReactionGroup;

use crate::Database;
use crate::models::{ReactionRow, parse_uuid};

impl Database {
    /// Toggle a reaction: removes the (message, user, emoji) triple if it
    /// exists, inserts it if not. Returns true when inserted.
    pub fn toggle_reaction(
        &self,
        message_id: i64,
        user_id: &Uuid,
        emoji: &str,
        created_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    params![message_id, user_id.to_string(), emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if existing.is_some() {
                conn.execute(
                    "DELETE FROM reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    params![message_id, user_id.to_string(), emoji],
                )?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![message_id, user_id.to_string(), emoji, created_at],
                )?;
                Ok(true)
            }
        })
    }

    pub fn reactions_for_message(&self, message_id: i64) -> Result<Vec<ReactionRow>> {
        self.reactions_for_messages(&[message_id])
    }

    /// Batch-fetch reactions for a set of message ids.
    pub fn reactions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})
                 ORDER BY created_at, user_id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        emoji: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

/// Group raw reaction rows per message into emoji buckets.
pub fn group_by_message(rows: &[ReactionRow]) -> HashMap<i64, Vec<ReactionGroup>> {
    let mut per_message: HashMap<i64, HashMap<String, Vec<Uuid>>> = HashMap::new();
    for r in rows {
        per_message
            .entry(r.message_id)
            .or_default()
            .entry(r.emoji.clone())
            .or_default()
            .push(parse_uuid(&r.user_id, "reaction user_id"));
    }

    per_message
        .into_iter()
        .map(|(message_id, emoji_map)| {
            let mut groups: Vec<ReactionGroup> = emoji_map
                .into_iter()
                .map(|(emoji, user_ids)| ReactionGroup {
                    emoji,
                    count: user_ids.len(),
                    user_ids,
                })
                .collect();
            groups.sort_by(|a, b| a.emoji.cmp(&b.emoji));
            (message_id, groups)
        })
        .collect()
}

/// Resulting reaction set for a single message.
pub fn group_one(rows: &[ReactionRow], message_id: i64) -> Vec<ReactionGroup> {
    group_by_message(rows).remove(&message_id).unwrap_or_default()
}
