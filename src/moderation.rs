//! Resolving `/banuser` arguments to the user behind them.

use serenity::{
    model::id::{GuildId, UserId},
    utils::parse_username,
};

use crate::{
    codes,
    database::Database,
    error::{Error, Result},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BanTarget {
    User(UserId),
    /// The token from a confession's footer.
    BanCode(String),
}

impl BanTarget {
    /// Accepts a raw user id, a user mention, or a 16 character ban code.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
            return input
                .parse()
                .map(|id| Self::User(UserId(id)))
                .map_err(|_| Error::BadRequest("That user ID is too long to be real.".to_string()));
        }
        if let Some(id) = parse_username(input) {
            return Ok(Self::User(UserId(id)));
        }
        if codes::is_ban_code(input) {
            return Ok(Self::BanCode(codes::normalize(input)));
        }

        Err(Error::BadRequest(
            "That is not a ban code, user ID, or user ping.".to_string(),
        ))
    }

    pub async fn resolve(self, db: &Database, guild_id: GuildId) -> Result<UserId> {
        match self {
            Self::User(user_id) => Ok(user_id),
            Self::BanCode(code) => db.user_for_ban_code(guild_id, &code).await?.ok_or_else(|| {
                Error::NotFound("The ban code provided doesn't match any confession on this server.".to_string())
            }),
        }
    }
}
