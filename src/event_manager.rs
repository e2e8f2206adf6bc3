use std::sync::Arc;

use serenity::{
    async_trait,
    client::{Context, EventHandler},
    model::{
        application::interaction::Interaction,
        channel::{GuildChannel, Message},
        gateway::Ready,
    },
};
use tracing::{debug, error, info};

use crate::{
    commands::ConfessionCommands,
    config::Config,
    courier::DmCourier,
    database::Database,
    relay::{IncomingConfession, Outcome, Relay},
};

pub struct Handler {
    db: Database,
    relay: Relay,
    commands: ConfessionCommands,
}

impl Handler {
    pub fn new(config: Config, db: Database) -> Self {
        let relay = Relay::new(db.clone(), config.confession_timeout);
        let commands = ConfessionCommands::new(db.clone(), Arc::new(config));
        Self { db, relay, commands }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        // Only DMs are confessions.
        if msg.author.bot || msg.guild_id.is_some() {
            return;
        }

        let courier = DmCourier::new(&ctx, msg.channel_id, msg.author.id);
        let incoming = IncomingConfession {
            author: msg.author.id,
            text: msg.content.clone(),
            attachments: msg.attachments.len(),
            sent_at: msg.timestamp.unix_timestamp(),
        };

        match self.relay.handle(&courier, incoming).await {
            Outcome::Busy => {}
            Outcome::Delivered(delivered) => debug!("Delivered confession {}", delivered.message_id),
            outcome => debug!("Confession from {} ended: {:?}", msg.author.id, outcome),
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Connected as {}!", ready.user.name);

        match ConfessionCommands::register_commands(&ctx).await {
            Ok(()) => info!("Registered commands!"),
            Err(why) => error!("Unable to register commands: {}", why),
        }

        match self.db.channel_count().await {
            Ok(count) => info!("Serving {} confession channels", count),
            Err(why) => error!("Unable to count confession channels: {}", why),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        self.commands.resolve_interaction(&ctx, interaction).await
    }

    async fn channel_delete(&self, _ctx: Context, channel: &GuildChannel) {
        match self.db.remove_channel(channel.id).await {
            Ok(0) => {}
            Ok(removed) => info!("Removed {} confession code(s) for deleted channel {}", removed, channel.id),
            Err(why) => error!("Failed to remove deleted channel {}: {}", channel.id, why),
        }
    }
}
