//! Serenity implementation of the relay's platform seam.

use std::time::Duration;

use serenity::{
    async_trait,
    client::Context,
    http::Http,
    model::{
        channel::{Channel, GuildChannel},
        guild::{Guild, Member},
        id::{ChannelId, GuildId, UserId},
        Permissions, Timestamp,
    },
};
use tracing::{debug, warn};

use crate::{
    error::Result,
    relay::{Confession, Courier, Delivered, TargetAccess},
};

/// Posts a confession embed into `channel_id`.
pub async fn send_confession(
    http: impl AsRef<Http>,
    channel_id: ChannelId,
    confession: &Confession,
) -> Result<Delivered> {
    let message = channel_id
        .send_message(http, |msg| {
            msg.embed(|embed| {
                embed
                    .title(confession.title())
                    .description(&confession.text)
                    .colour(confession.colour)
                    .footer(|footer| footer.text(confession.footer()));

                if let Ok(sent_at) = Timestamp::from_unix_timestamp(confession.sent_at) {
                    embed.timestamp(sent_at);
                }
                embed
            })
        })
        .await?;

    Ok(Delivered {
        message_id: message.id,
        link: message.link(),
    })
}

/// Whether `member` can read `channel`, using the guild's roles.
fn guild_access(guild: &Guild, channel: &GuildChannel, member: &Member) -> TargetAccess {
    read_access(guild.id, guild.user_permissions_in(channel, member))
}

fn read_access(guild_id: GuildId, permissions: serenity::Result<Permissions>) -> TargetAccess {
    match permissions {
        Ok(permissions) if permissions.view_channel() => TargetAccess::Available { guild_id },
        Ok(_) => TargetAccess::CannotRead,
        Err(why) => {
            warn!("Could not compute permissions in guild {}: {}", guild_id, why);
            TargetAccess::Unresolved
        }
    }
}

/// One user's DM channel with the bot.
pub struct DmCourier<'a> {
    ctx: &'a Context,
    channel_id: ChannelId,
    author_id: UserId,
}

impl<'a> DmCourier<'a> {
    pub fn new(ctx: &'a Context, channel_id: ChannelId, author_id: UserId) -> Self {
        Self {
            ctx,
            channel_id,
            author_id,
        }
    }
}

#[async_trait]
impl<'a> Courier for DmCourier<'a> {
    async fn reply(&self, content: &str) -> Result<()> {
        self.channel_id.say(&self.ctx.http, content).await?;
        Ok(())
    }

    async fn await_code(&self, timeout: Duration) -> Option<String> {
        self.channel_id
            .await_reply(self.ctx)
            .author_id(self.author_id)
            .timeout(timeout)
            .await
            .map(|reply| reply.content.clone())
    }

    async fn resolve_target(&self, channel_id: ChannelId, user_id: UserId) -> TargetAccess {
        let channel = match channel_id.to_channel(self.ctx).await {
            Ok(Channel::Guild(channel)) => channel,
            Ok(_) => return TargetAccess::Missing,
            Err(why) => {
                debug!("Could not fetch confession channel {}: {}", channel_id, why);
                return TargetAccess::Missing;
            }
        };

        // The gateway cache holds no members without the privileged intent.
        let member = match channel.guild_id.member(self.ctx, user_id).await {
            Ok(member) => member,
            Err(_) => return TargetAccess::NotMember,
        };

        if let Some(guild) = self.ctx.cache.guild(channel.guild_id) {
            return guild_access(&guild, &channel, &member);
        }

        match channel.guild_id.to_partial_guild(&self.ctx.http).await {
            Ok(guild) => read_access(guild.id, guild.user_permissions_in(&channel, &member)),
            Err(why) => {
                debug!("Could not fetch guild {}: {}", channel.guild_id, why);
                TargetAccess::Unresolved
            }
        }
    }

    async fn deliver(&self, channel_id: ChannelId, confession: &Confession) -> Result<Delivered> {
        send_confession(&self.ctx.http, channel_id, confession).await
    }
}
