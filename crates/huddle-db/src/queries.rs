use crate::Database;
use crate::models::{IdentityRow, MessageRow, ReactionRow};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

/// What a page of history should contain.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryPage {
    pub limit: u32,
    /// Only ids strictly below this one (scrolling back).
    pub before: Option<i64>,
    /// Only ids strictly above this one (gap fill). Wins over `before`.
    pub after: Option<i64>,
}

/// Outcome of an insert. `created` is false when the sender already stored
/// a message under the same client id; `id` is then that message's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub id: i64,
    pub created: bool,
}

/// Outcome of a mark-read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorUpdate {
    pub last_read_message_id: i64,
    pub advanced: bool,
}

const IDENTITY_COLUMNS: &str = "id, display_name, role, is_muted, muted_until, mute_reason";

impl Database {
    // -- Identities --

    /// Mirror an account from the identity service. Moderation state is left
    /// untouched on update.
    pub fn upsert_identity(&self, id: &str, display_name: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, role = excluded.role",
                (id, display_name, role),
            )?;
            Ok(())
        })
    }

    pub fn get_identity(&self, id: &str) -> Result<Option<IdentityRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE id = ?1", IDENTITY_COLUMNS);
            conn.query_row(&sql, [id], identity_from_row).optional()
        })
    }

    pub fn list_identities(&self) -> Result<Vec<IdentityRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY display_name", IDENTITY_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], identity_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when the user does not exist.
    pub fn set_moderation(
        &self,
        id: &str,
        is_muted: bool,
        muted_until: Option<DateTime<Utc>>,
        mute_reason: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET is_muted = ?2, muted_until = ?3, mute_reason = ?4 WHERE id = ?1",
                rusqlite::params![id, is_muted, muted_until.map(|t| t.to_rfc3339()), mute_reason],
            )?;
            Ok(updated > 0)
        })
    }

    // -- Channels --

    /// Returns false when the id is already taken.
    pub fn create_channel(&self, id: &str, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channels (id, name) VALUES (?1, ?2)",
                (id, name),
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn channel_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM channels WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Returns true when the member was newly added.
    pub fn add_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channel_members (channel_id, user_id) VALUES (?1, ?2)",
                (channel_id, user_id),
            )?;
            Ok(inserted > 0)
        })
    }

    /// Returns true when a membership was removed.
    pub fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                (channel_id, user_id),
            )?;
            Ok(removed > 0)
        })
    }

    pub fn is_channel_member(&self, channel_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
                    (channel_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn channel_members(&self, channel_id: &str) -> Result<Vec<IdentityRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.display_name, u.role, u.is_muted, u.muted_until, u.mute_reason
                 FROM channel_members cm
                 JOIN users u ON u.id = cm.user_id
                 WHERE cm.channel_id = ?1
                 ORDER BY u.display_name",
            )?;
            let rows = stmt
                .query_map([channel_id], identity_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Persist a message and return its ordering id. A second insert with
    /// the same `(sender_id, client_id)` stores nothing and reports the
    /// first row instead.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        conversation_key: &str,
        sender_id: &str,
        body: &str,
        reply_to_id: Option<i64>,
        attachment: Option<&str>,
        client_id: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO messages (conversation_key, sender_id, body, reply_to_id, attachment, client_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(sender_id, client_id) DO NOTHING",
                rusqlite::params![
                    conversation_key,
                    sender_id,
                    body,
                    reply_to_id,
                    attachment,
                    client_id,
                    created_at.to_rfc3339()
                ],
            )?;
            if inserted > 0 {
                return Ok(InsertOutcome {
                    id: conn.last_insert_rowid(),
                    created: true,
                });
            }

            let id: i64 = conn.query_row(
                "SELECT id FROM messages WHERE sender_id = ?1 AND client_id = ?2",
                (sender_id, client_id),
                |row| row.get(0),
            )?;
            Ok(InsertOutcome { id, created: false })
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE m.id = ?1", MESSAGE_SELECT);
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// Conversation key a message belongs to, if the message exists.
    pub fn message_conversation(&self, message_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT conversation_key FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// A page of history, always returned in ascending id order.
    pub fn get_messages(&self, conversation_key: &str, page: HistoryPage) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, conversation_key, page))
    }

    // -- Reactions --

    /// Toggle a reaction: removes if present, inserts if not.
    /// Returns true when the reaction was added.
    pub fn toggle_reaction(&self, message_id: i64, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id, user_id, emoji],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                    rusqlite::params![message_id, user_id, emoji],
                )?;
            }
            tx.commit()?;
            Ok(removed == 0)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[i64]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji, created_at FROM reactions WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(message_ids.iter()), |row| {
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

    // -- Read cursors --

    /// Move the cursor to `max(current, up_to)`. A stale request leaves the
    /// row alone and reports `advanced: false`.
    pub fn advance_read_cursor(
        &self,
        user_id: &str,
        conversation_key: &str,
        up_to: i64,
    ) -> Result<CursorUpdate> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let current = cursor_value(&tx, user_id, conversation_key)?;

            if current.is_some_and(|c| c >= up_to) {
                return Ok(CursorUpdate {
                    last_read_message_id: current.unwrap_or_default(),
                    advanced: false,
                });
            }

            tx.execute(
                "INSERT INTO read_cursors (user_id, conversation_key, last_read_message_id, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(user_id, conversation_key) DO UPDATE SET
                     last_read_message_id = MAX(last_read_message_id, excluded.last_read_message_id),
                     updated_at = excluded.updated_at",
                rusqlite::params![user_id, conversation_key, up_to],
            )?;
            tx.commit()?;

            Ok(CursorUpdate {
                last_read_message_id: up_to,
                advanced: true,
            })
        })
    }

    /// Current cursor, 0 when nothing has been read yet.
    pub fn read_cursor(&self, user_id: &str, conversation_key: &str) -> Result<i64> {
        self.with_conn(|conn| Ok(cursor_value(conn, user_id, conversation_key)?.unwrap_or(0)))
    }

    /// Messages past the caller's cursor that someone else sent.
    pub fn unread_count(&self, user_id: &str, conversation_key: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let cursor = cursor_value(conn, user_id, conversation_key)?.unwrap_or(0);
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_key = ?1 AND id > ?2 AND sender_id != ?3",
                rusqlite::params![conversation_key, cursor, user_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<IdentityRow> {
    Ok(IdentityRow {
        id: row.get(0)?,
        display_name: row.get(1)?,
        role: row.get(2)?,
        is_muted: row.get(3)?,
        muted_until: row.get(4)?,
        mute_reason: row.get(5)?,
    })
}

fn cursor_value(conn: &Connection, user_id: &str, conversation_key: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT last_read_message_id FROM read_cursors WHERE user_id = ?1 AND conversation_key = ?2",
        (user_id, conversation_key),
        |row| row.get(0),
    )
    .optional()
}

// JOIN users to fetch sender_name in a single query
const MESSAGE_SELECT: &str = "SELECT m.id, m.conversation_key, m.sender_id, u.display_name, m.body, m.reply_to_id, m.attachment, m.created_at
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_key: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get::<_, Option<String>>(3)?.unwrap_or_else(|| "unknown".to_string()),
        body: row.get(4)?,
        reply_to_id: row.get(5)?,
        attachment: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_messages(conn: &Connection, conversation_key: &str, page: HistoryPage) -> Result<Vec<MessageRow>> {
    let (filter, bound) = match (page.after, page.before) {
        (Some(after), _) => (
            "WHERE m.conversation_key = ?1 AND m.id > ?2 ORDER BY m.id ASC LIMIT ?3",
            after,
        ),
        (None, before) => (
            "WHERE m.conversation_key = ?1 AND m.id < ?2 ORDER BY m.id DESC LIMIT ?3",
            before.unwrap_or(i64::MAX),
        ),
    };

    let sql = format!("{} {}", MESSAGE_SELECT, filter);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(rusqlite::params![conversation_key, bound, page.limit], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if page.after.is_none() {
        rows.reverse();
    }
    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "00000000-0000-0000-0000-00000000000a";
    const BOB: &str = "00000000-0000-0000-0000-00000000000b";
    const KEY: &str = "dm:00000000-0000-0000-0000-00000000000a:00000000-0000-0000-0000-00000000000b";

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_identity(ALICE, "Alice", "tester").unwrap();
        db.upsert_identity(BOB, "Bob", "developer").unwrap();
        db
    }

    fn post(db: &Database, sender: &str, body: &str) -> i64 {
        db.insert_message(KEY, sender, body, None, None, None, Utc::now())
            .unwrap()
            .id
    }

    #[test]
    fn ids_increase_and_pages_are_ascending() {
        let db = seeded();
        let ids: Vec<i64> = (0..5).map(|i| post(&db, ALICE, &format!("step {}", i))).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let latest = db
            .get_messages(KEY, HistoryPage { limit: 3, ..Default::default() })
            .unwrap();
        assert_eq!(latest.iter().map(|m| m.id).collect::<Vec<_>>(), ids[2..].to_vec());
        assert_eq!(latest[0].sender_name, "Alice");

        let older = db
            .get_messages(KEY, HistoryPage { limit: 10, before: Some(ids[2]), after: None })
            .unwrap();
        assert_eq!(older.iter().map(|m| m.id).collect::<Vec<_>>(), ids[..2].to_vec());

        let gap = db
            .get_messages(KEY, HistoryPage { limit: 10, before: None, after: Some(ids[1]) })
            .unwrap();
        assert_eq!(gap.iter().map(|m| m.id).collect::<Vec<_>>(), ids[2..].to_vec());
    }

    #[test]
    fn toggle_adds_then_removes() {
        let db = seeded();
        let id = post(&db, ALICE, "flaky on CI");
        assert!(db.toggle_reaction(id, BOB, "👀").unwrap());
        assert_eq!(db.get_reactions_for_messages(&[id]).unwrap().len(), 1);
        assert!(!db.toggle_reaction(id, BOB, "👀").unwrap());
        assert!(db.get_reactions_for_messages(&[id]).unwrap().is_empty());
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let db = seeded();
        let first = db.advance_read_cursor(BOB, KEY, 5).unwrap();
        assert_eq!(first, CursorUpdate { last_read_message_id: 5, advanced: true });

        let stale = db.advance_read_cursor(BOB, KEY, 3).unwrap();
        assert_eq!(stale, CursorUpdate { last_read_message_id: 5, advanced: false });
        assert_eq!(db.read_cursor(BOB, KEY).unwrap(), 5);
    }

    #[test]
    fn unread_skips_own_messages() {
        let db = seeded();
        let a1 = post(&db, ALICE, "can you retest?");
        post(&db, BOB, "on it");
        post(&db, ALICE, "thanks");

        assert_eq!(db.unread_count(BOB, KEY).unwrap(), 2);
        db.advance_read_cursor(BOB, KEY, a1).unwrap();
        assert_eq!(db.unread_count(BOB, KEY).unwrap(), 1);
        assert_eq!(db.unread_count(ALICE, KEY).unwrap(), 1);
    }

    #[test]
    fn moderation_roundtrip() {
        let db = seeded();
        let until = Utc::now() + chrono::Duration::hours(1);
        assert!(db.set_moderation(BOB, true, Some(until), Some("spam")).unwrap());
        let row = db.get_identity(BOB).unwrap().unwrap();
        let state = row.moderation().unwrap();
        assert!(state.is_muted);
        assert_eq!(state.mute_reason.as_deref(), Some("spam"));
        assert!(!db.set_moderation("missing", true, None, None).unwrap());
    }

    #[test]
    fn replayed_client_id_returns_first_row() {
        let db = seeded();
        let client = "0b7c1f0e-4d5a-4c11-9d1e-2f6a3b8c9d01";
        let first = db
            .insert_message(KEY, ALICE, "build 1842 is green", None, None, Some(client), Utc::now())
            .unwrap();
        let again = db
            .insert_message(KEY, ALICE, "build 1842 is green", None, None, Some(client), Utc::now())
            .unwrap();
        assert!(first.created);
        assert_eq!(again, InsertOutcome { id: first.id, created: false });

        // Same client id from another sender is a different message.
        let other = db
            .insert_message(KEY, BOB, "ack", None, None, Some(client), Utc::now())
            .unwrap();
        assert!(other.created);

        let all = db
            .get_messages(KEY, HistoryPage { limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(db.get_message(first.id).unwrap().unwrap().body, "build 1842 is green");
        assert!(db.get_message(first.id + 100).unwrap().is_none());
    }

    #[test]
    fn sends_without_client_id_never_collide() {
        let db = seeded();
        let a = post(&db, ALICE, "one");
        let b = post(&db, ALICE, "one");
        assert_ne!(a, b);
    }

    #[test]
    fn membership_changes_report_whether_anything_happened() {
        let db = seeded();
        let channel = "00000000-0000-0000-0000-0000000000c1";
        assert!(!db.channel_exists(channel).unwrap());
        assert!(db.create_channel(channel, "release-review").unwrap());
        assert!(!db.create_channel(channel, "release-review").unwrap());
        assert!(db.channel_exists(channel).unwrap());

        assert!(db.add_channel_member(channel, BOB).unwrap());
        assert!(!db.add_channel_member(channel, BOB).unwrap());
        assert!(db.is_channel_member(channel, BOB).unwrap());
        assert!(db.remove_channel_member(channel, BOB).unwrap());
        assert!(!db.remove_channel_member(channel, BOB).unwrap());
        assert!(!db.is_channel_member(channel, BOB).unwrap());
    }
}
