use tracing::warn;

use darkchat_db::models::{ChannelRow, MessageRow};
use darkchat_types::api::{ChannelItem, ChannelMessage};

pub fn channel_item(row: ChannelRow) -> ChannelItem {
    ChannelItem {
        id: row.id,
        identifier: row.identifier,
        label: row.label,
        owner: row.owner_phone_number,
    }
}

pub fn channel_message(row: MessageRow, is_mine: bool) -> ChannelMessage {
    let created_at = row
        .created_at
        .parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            chrono::NaiveDateTime::parse_from_str(&row.created_at, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message {}: {}", row.created_at, row.id, e);
            chrono::DateTime::default()
        });

    ChannelMessage {
        id: row.id,
        channel_id: row.channel_id,
        identifier: row.identifier,
        phone_number: row.phone_number,
        message: row.message,
        created_at,
        is_mine,
    }
}
