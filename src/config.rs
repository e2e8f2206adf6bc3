use std::{collections::HashSet, env, time::Duration};

use serenity::model::id::UserId;

use crate::error::{Error, Result};

const DEFAULT_DATABASE_URL: &str = "sqlite://confessional.db";
const DEFAULT_CONFESSION_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    /// Owners skip member permission checks on commands.
    pub owners: HashSet<UserId>,
    pub support_invite: Option<String>,
    /// How long the DM flow waits for a channel code.
    pub confession_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::Config("DISCORD_TOKEN must be set".to_string()))?;

        let owners = lookup("OWNER_IDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                id.parse::<u64>()
                    .map(UserId)
                    .map_err(|_| Error::Config(format!("OWNER_IDS contains an invalid user id `{id}`")))
            })
            .collect::<Result<HashSet<_>>>()?;

        let confession_timeout = match lookup("CONFESSION_TIMEOUT_SECS") {
            Some(secs) => secs.trim().parse().map_err(|_| {
                Error::Config("CONFESSION_TIMEOUT_SECS must be a whole number of seconds".to_string())
            })?,
            None => DEFAULT_CONFESSION_TIMEOUT_SECS,
        };

        Ok(Self {
            discord_token,
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            owners,
            support_invite: lookup("SUPPORT_GUILD_INVITE").filter(|invite| !invite.trim().is_empty()),
            confession_timeout: Duration::from_secs(confession_timeout),
        })
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owners.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "token")])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert!(config.owners.is_empty());
        assert!(config.support_invite.is_none());
        assert_eq!(config.confession_timeout, Duration::from_secs(120));
    }

    #[test]
    fn token_is_required() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn parses_owners() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "token"),
            ("OWNER_IDS", "141231597155385344, 322542134546661388"),
        ]))
        .unwrap();
        assert!(config.is_owner(UserId(141231597155385344)));
        assert!(config.is_owner(UserId(322542134546661388)));
        assert!(!config.is_owner(UserId(1)));
    }

    #[test]
    fn rejects_bad_owner_id() {
        let err = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "token"), ("OWNER_IDS", "me")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
