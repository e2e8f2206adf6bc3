//! SQLite storage for confession channels, bans and the confession log.

use std::str::FromStr;

use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    FromRow, Row, SqlitePool,
};

use crate::{
    codes,
    error::{Error, Result},
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS confession_channel (
        code TEXT PRIMARY KEY NOT NULL,
        channel_id INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS banned_users (
        guild_id INTEGER NOT NULL,
        user_id INTEGER NOT NULL,
        UNIQUE (guild_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS confession_log (
        confession_message_id INTEGER PRIMARY KEY NOT NULL,
        user_id INTEGER NOT NULL,
        guild_id INTEGER NOT NULL,
        channel_code TEXT NOT NULL,
        channel_id INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        confession TEXT NOT NULL,
        ban_code TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS confession_log_ban_code ON confession_log (guild_id, ban_code)",
];

// Discord snowflakes fit in 63 bits, SQLite integers are signed.
fn sql_id(id: u64) -> i64 {
    id as i64
}

fn discord_id(id: i64) -> u64 {
    id as u64
}

/// One delivered confession.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfessionLogEntry {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub guild_id: GuildId,
    pub channel_code: String,
    pub channel_id: ChannelId,
    /// Unix seconds.
    pub timestamp: i64,
    pub confession: String,
    pub ban_code: String,
}

impl<'r> FromRow<'r, SqliteRow> for ConfessionLogEntry {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            message_id: MessageId(discord_id(row.try_get("confession_message_id")?)),
            user_id: UserId(discord_id(row.try_get("user_id")?)),
            guild_id: GuildId(discord_id(row.try_get("guild_id")?)),
            channel_code: row.try_get("channel_code")?,
            channel_id: ChannelId(discord_id(row.try_get("channel_id")?)),
            timestamp: row.try_get("timestamp")?,
            confession: row.try_get("confession")?,
            ban_code: row.try_get("ban_code")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    /// A private database living as long as the pool's single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn channel_for_code(&self, code: &str) -> Result<Option<ChannelId>> {
        let channel_id: Option<i64> =
            sqlx::query_scalar("SELECT channel_id FROM confession_channel WHERE code = ?")
                .bind(codes::normalize(code))
                .fetch_optional(&self.pool)
                .await?;
        Ok(channel_id.map(|id| ChannelId(discord_id(id))))
    }

    pub async fn code_for_channel(&self, channel_id: ChannelId) -> Result<Option<String>> {
        let code = sqlx::query_scalar("SELECT code FROM confession_channel WHERE channel_id = ? LIMIT 1")
            .bind(sql_id(channel_id.0))
            .fetch_optional(&self.pool)
            .await?;
        Ok(code)
    }

    /// Inserts a code that the caller has already validated.
    ///
    /// The primary key decides collisions, so two concurrent inserts of the same
    /// code cannot both succeed; the loser gets [`Error::CodeTaken`].
    pub async fn insert_channel(&self, code: &str, channel_id: ChannelId) -> Result<()> {
        let code = codes::normalize(code);
        let inserted = sqlx::query(
            "INSERT INTO confession_channel (code, channel_id) VALUES (?, ?)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(&code)
        .bind(sql_id(channel_id.0))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(Error::CodeTaken(code));
        }
        Ok(())
    }

    /// A random code not currently registered. Only a hint: the insert is what
    /// actually claims it.
    pub async fn unused_channel_code(&self) -> Result<String> {
        loop {
            let code = codes::channel_code();
            if self.channel_for_code(&code).await?.is_none() {
                return Ok(code);
            }
        }
    }

    /// Registers `channel_id` under `requested`, or under a fresh random code.
    pub async fn register_channel(&self, requested: Option<&str>, channel_id: ChannelId) -> Result<String> {
        if let Some(requested) = requested {
            let code = codes::normalize(requested);
            if !codes::is_valid_channel_code(&code) {
                return Err(Error::InvalidCode(requested.trim().to_string()));
            }
            self.insert_channel(&code, channel_id).await?;
            return Ok(code);
        }

        loop {
            let code = codes::channel_code();
            match self.insert_channel(&code, channel_id).await {
                Ok(()) => return Ok(code),
                Err(Error::CodeTaken(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Drops every code pointing at `channel_id`.
    pub async fn remove_channel(&self, channel_id: ChannelId) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM confession_channel WHERE channel_id = ?")
            .bind(sql_id(channel_id.0))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed)
    }

    pub async fn channel_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM confession_channel")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn is_banned(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM banned_users WHERE guild_id = ? AND user_id = ?")
            .bind(sql_id(guild_id.0))
            .bind(sql_id(user_id.0))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Idempotent; banning an already banned user is not an error.
    pub async fn ban(&self, guild_id: GuildId, user_id: UserId) -> Result<()> {
        sqlx::query(
            "INSERT INTO banned_users (guild_id, user_id) VALUES (?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(sql_id(guild_id.0))
        .bind(sql_id(user_id.0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns whether a ban was actually lifted.
    pub async fn unban(&self, guild_id: GuildId, user_id: UserId) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM banned_users WHERE guild_id = ? AND user_id = ?")
            .bind(sql_id(guild_id.0))
            .bind(sql_id(user_id.0))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    pub async fn log_confession(&self, entry: &ConfessionLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO confession_log (
                confession_message_id, user_id, guild_id, channel_code,
                channel_id, timestamp, confession, ban_code
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sql_id(entry.message_id.0))
        .bind(sql_id(entry.user_id.0))
        .bind(sql_id(entry.guild_id.0))
        .bind(codes::normalize(&entry.channel_code))
        .bind(sql_id(entry.channel_id.0))
        .bind(entry.timestamp)
        .bind(&entry.confession)
        .bind(&entry.ban_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The author behind a ban code, only within the guild it was issued in.
    pub async fn user_for_ban_code(&self, guild_id: GuildId, ban_code: &str) -> Result<Option<UserId>> {
        let user_id: Option<i64> = sqlx::query_scalar(
            "SELECT user_id FROM confession_log WHERE guild_id = ? AND ban_code = ? LIMIT 1",
        )
        .bind(sql_id(guild_id.0))
        .bind(codes::normalize(ban_code))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id.map(|id| UserId(discord_id(id))))
    }

    pub async fn logged_confession(
        &self,
        guild_id: GuildId,
        message_id: MessageId,
    ) -> Result<Option<ConfessionLogEntry>> {
        let entry = sqlx::query_as::<_, ConfessionLogEntry>(
            "SELECT * FROM confession_log WHERE guild_id = ? AND confession_message_id = ?",
        )
        .bind(sql_id(guild_id.0))
        .bind(sql_id(message_id.0))
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }
}
