use crate::models::{ChannelRow, MemberRow, MessageRow};
use crate::Database;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

impl Database {
    // -- Players --

    /// Record the phone number a player is currently using.
    pub fn upsert_player(&self, identifier: &str, phone_number: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO players (identifier, phone_number) VALUES (?1, ?2)
                 ON CONFLICT(identifier) DO UPDATE
                 SET phone_number = excluded.phone_number, updated_at = datetime('now')",
                (identifier, phone_number),
            )?;
            Ok(())
        })
    }

    pub fn get_phone_number(&self, identifier: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT phone_number FROM players WHERE identifier = ?1",
                [identifier],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn get_identifier_by_phone_number(&self, phone_number: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT identifier FROM players WHERE phone_number = ?1
                 ORDER BY updated_at DESC LIMIT 1",
                [phone_number],
                |row| row.get(0),
            )
            .optional()
        })
    }

    // -- Channels --

    /// Channels the player is a member of, with the owner's phone number resolved.
    pub fn get_channels_for_player(&self, identifier: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| query_channels_for_player(conn, identifier))
    }

    pub fn channel_exists(&self, channel_identifier: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM channels WHERE identifier = ?1)",
                [channel_identifier],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Create a channel. A channel that appeared concurrently is left as is.
    pub fn create_channel(&self, channel_identifier: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (identifier) VALUES (?1)
                 ON CONFLICT(identifier) DO NOTHING",
                [channel_identifier],
            )?;
            Ok(())
        })
    }

    pub fn get_channel_id_and_label(&self, channel_identifier: &str) -> Result<(i64, Option<String>)> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, label FROM channels WHERE identifier = ?1",
                [channel_identifier],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| anyhow!("Channel not found: {}", channel_identifier))
        })
    }

    pub fn update_channel_label(&self, channel_id: i64, label: &str) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE channels SET label = ?1 WHERE id = ?2",
                rusqlite::params![label, channel_id],
            )?;
            if updated == 0 {
                return Err(anyhow!("Channel not found: {}", channel_id));
            }
            Ok(())
        })
    }

    // -- Members --

    pub fn get_channel_members(&self, channel_id: i64) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, identifier, is_owner FROM channel_members
                 WHERE channel_id = ?1
                 ORDER BY id",
            )?;

            let rows = stmt
                .query_map([channel_id], |row| {
                    Ok(MemberRow {
                        channel_id: row.get(0)?,
                        identifier: row.get(1)?,
                        is_owner: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Add (or refresh) a membership and return the channel id.
    ///
    /// Owner assignment happens inside one immediate transaction: the joining
    /// player becomes owner exactly when the channel has no owner at commit
    /// time, and an existing owner is never demoted. `wants_owner` is the
    /// caller's expectation; when it disagrees with the stored state the
    /// stored state wins.
    pub fn join_channel(&self, channel_identifier: &str, identifier: &str, wants_owner: bool) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let channel_id: i64 = tx
                .query_row(
                    "SELECT id FROM channels WHERE identifier = ?1",
                    [channel_identifier],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| anyhow!("Channel not found: {}", channel_identifier))?;

            let has_owner: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM channel_members WHERE channel_id = ?1 AND is_owner = 1)",
                [channel_id],
                |row| row.get(0),
            )?;

            let is_owner = !has_owner;
            if is_owner != wants_owner {
                debug!(
                    "Owner flag for {} in channel {} reconciled to {}",
                    identifier, channel_id, is_owner
                );
            }

            tx.execute(
                "INSERT INTO channel_members (channel_id, identifier, is_owner) VALUES (?1, ?2, ?3)
                 ON CONFLICT(channel_id, identifier) DO UPDATE
                 SET is_owner = MAX(is_owner, excluded.is_owner)",
                rusqlite::params![channel_id, identifier, is_owner],
            )?;

            tx.commit()?;
            Ok(channel_id)
        })
    }

    pub fn get_channel_owner(&self, channel_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT identifier FROM channel_members WHERE channel_id = ?1 AND is_owner = 1",
                [channel_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Drop a membership. Ownership is not handed to anyone else.
    pub fn leave_channel(&self, channel_id: i64, identifier: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM channel_members WHERE channel_id = ?1 AND identifier = ?2",
                rusqlite::params![channel_id, identifier],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn create_message(&self, channel_id: i64, identifier: &str, message: &str) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channel_messages (channel_id, identifier, message) VALUES (?1, ?2, ?3)",
                rusqlite::params![channel_id, identifier, message],
            )?;
            let id = conn.last_insert_rowid();

            query_message(conn, id)?.ok_or_else(|| anyhow!("Message vanished after insert: {}", id))
        })
    }

    /// Messages in store order (oldest first).
    pub fn get_channel_messages(&self, channel_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_channel_messages(conn, channel_id))
    }
}

const MESSAGE_COLUMNS: &str =
    "m.id, m.channel_id, m.identifier, p.phone_number, m.message, m.created_at";

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        identifier: row.get(2)?,
        phone_number: row.get(3)?,
        message: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM channel_messages m
         LEFT JOIN players p ON m.identifier = p.identifier
         WHERE m.id = ?1"
    );
    conn.query_row(&sql, [id], map_message).optional()
}

fn query_channel_messages(conn: &Connection, channel_id: i64) -> Result<Vec<MessageRow>> {
    // JOIN players to fetch the author's phone number in a single query
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM channel_messages m
         LEFT JOIN players p ON m.identifier = p.identifier
         WHERE m.channel_id = ?1
         ORDER BY m.id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([channel_id], map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_channels_for_player(conn: &Connection, identifier: &str) -> Result<Vec<ChannelRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.identifier, c.label, p.phone_number
         FROM channel_members m
         JOIN channels c ON c.id = m.channel_id
         LEFT JOIN channel_members o ON o.channel_id = c.id AND o.is_owner = 1
         LEFT JOIN players p ON p.identifier = o.identifier
         WHERE m.identifier = ?1
         ORDER BY c.id",
    )?;

    let rows = stmt
        .query_map([identifier], |row| {
            Ok(ChannelRow {
                id: row.get(0)?,
                identifier: row.get(1)?,
                label: row.get(2)?,
                owner_phone_number: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

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
