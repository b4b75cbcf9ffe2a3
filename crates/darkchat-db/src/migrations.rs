use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS players (
            identifier      TEXT PRIMARY KEY,
            phone_number    TEXT NOT NULL,
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_players_phone
            ON players(phone_number);

        CREATE TABLE IF NOT EXISTS channels (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier  TEXT NOT NULL UNIQUE,
            label       TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS channel_members (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id  INTEGER NOT NULL REFERENCES channels(id),
            identifier  TEXT NOT NULL,
            is_owner    INTEGER NOT NULL DEFAULT 0,
            joined_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(channel_id, identifier)
        );

        -- At most one owner per channel
        CREATE UNIQUE INDEX IF NOT EXISTS idx_channel_members_owner
            ON channel_members(channel_id) WHERE is_owner = 1;

        CREATE INDEX IF NOT EXISTS idx_channel_members_identifier
            ON channel_members(identifier);

        CREATE TABLE IF NOT EXISTS channel_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id  INTEGER NOT NULL REFERENCES channels(id),
            identifier  TEXT NOT NULL,
            message     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_channel_messages_channel
            ON channel_messages(channel_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
