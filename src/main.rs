mod codes;
mod commands;
mod config;
mod courier;
mod database;
mod error;
mod event_manager;
mod guard;
mod moderation;
mod permissions;
mod relay;

use serenity::prelude::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{config::Config, database::Database, error::Result, event_manager::Handler};

/// DMs arrive through the non-privileged set; member lists are never requested.
fn intents() -> GatewayIntents {
    GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    info!("Database ready at {}", config.database_url);

    let token = config.discord_token.clone();
    let mut client = Client::builder(token, intents())
        .event_handler(Handler::new(config, db))
        .await?;

    client.start().await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(why) = run().await {
        error!("An error occurred while running the client: {}", why);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_dms_without_privileged_members() {
        let intents = intents();
        assert!(intents.contains(GatewayIntents::DIRECT_MESSAGES));
        assert!(intents.contains(GatewayIntents::MESSAGE_CONTENT));
        assert!(!intents.contains(GatewayIntents::GUILD_MEMBERS));
        assert!(!intents.contains(GatewayIntents::GUILD_PRESENCES));
    }
}
