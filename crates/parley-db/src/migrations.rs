use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id                  TEXT PRIMARY KEY,
            kind                TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            name                TEXT,
            description         TEXT,
            creator_id          TEXT NOT NULL,
            slow_mode_seconds   INTEGER NOT NULL DEFAULT 0,
            removed             INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS members (
            conversation_id     TEXT NOT NULL REFERENCES conversations(id),
            user_id             TEXT NOT NULL,
            can_change_info     INTEGER NOT NULL DEFAULT 0,
            can_add_members     INTEGER NOT NULL DEFAULT 0,
            can_remove_members  INTEGER NOT NULL DEFAULT 0,
            can_delete_messages INTEGER NOT NULL DEFAULT 0,
            can_pin_messages    INTEGER NOT NULL DEFAULT 0,
            can_change_permissions INTEGER NOT NULL DEFAULT 0,
            pinned              INTEGER NOT NULL DEFAULT 0,
            archived            INTEGER NOT NULL DEFAULT 0,
            joined_at           TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON members(user_id);

        -- The autoincrement id doubles as the commit-order tiebreaker.
        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id     TEXT NOT NULL REFERENCES conversations(id),
            sender_id           TEXT NOT NULL,
            kind                TEXT NOT NULL DEFAULT 'text',
            content             TEXT NOT NULL,
            attachment_url      TEXT,
            parent_id           INTEGER REFERENCES messages(id),
            scheduled_at        TEXT,
            published           INTEGER NOT NULL DEFAULT 1,
            self_destruct_at    TEXT,
            deleted             INTEGER NOT NULL DEFAULT 0,
            edited_at           TEXT,
            pinned              INTEGER NOT NULL DEFAULT 0,
            pinned_by           TEXT,
            pinned_at           TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_scheduled
            ON messages(scheduled_at) WHERE published = 0;

        CREATE INDEX IF NOT EXISTS idx_messages_destruct
            ON messages(self_destruct_at) WHERE self_destruct_at IS NOT NULL;

        -- Per-user delete-for-me markers.
        CREATE TABLE IF NOT EXISTS message_hides (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        -- Insert-once: first read-time of the newest message a user has seen.
        CREATE TABLE IF NOT EXISTS read_markers (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            read_at     TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS mentions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_mentions_user
            ON mentions(user_id);

        CREATE TABLE IF NOT EXISTS blocks (
            user_id     TEXT NOT NULL,
            blocked_id  TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, blocked_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
