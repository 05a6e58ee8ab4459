use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            display_name    TEXT NOT NULL,
            role            TEXT NOT NULL,
            is_muted        INTEGER NOT NULL DEFAULT 0,
            muted_until     TEXT,
            mute_reason     TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS channels (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            joined_at   TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (channel_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_channel_members_user
            ON channel_members(user_id);

        -- AUTOINCREMENT: ids are never reused, even after a delete
        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_key    TEXT NOT NULL,
            sender_id           TEXT NOT NULL REFERENCES users(id),
            body                TEXT NOT NULL,
            reply_to_id         INTEGER REFERENCES messages(id),
            attachment          TEXT,
            client_id           TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_key, id);

        -- A replayed send maps back to the row it created. NULLs never collide.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client
            ON messages(sender_id, client_id);

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id, emoji)
        );

        CREATE TABLE IF NOT EXISTS read_cursors (
            user_id                 TEXT NOT NULL REFERENCES users(id),
            conversation_key        TEXT NOT NULL,
            last_read_message_id    INTEGER NOT NULL,
            updated_at              TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, conversation_key)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
