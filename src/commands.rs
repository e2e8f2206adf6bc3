use std::sync::Arc;

use serenity::{
    builder::CreateApplicationCommandOption,
    client::Context,
    model::{
        application::{
            command::{Command, CommandOptionType},
            interaction::{
                application_command::{ApplicationCommandInteraction, CommandDataOptionValue},
                Interaction,
            },
        },
        channel::{ChannelType, PartialChannel, PermissionOverwrite, PermissionOverwriteType},
        id::{GuildId, MessageId, RoleId, UserId},
        permissions::Permissions,
        user::User,
    },
    prelude::Mentionable,
};
use tracing::{debug, error, warn};

use crate::{
    codes,
    config::Config,
    courier::send_confession,
    database::{ConfessionLogEntry, Database},
    error::{is_forbidden, Error, Result},
    moderation::BanTarget,
    permissions,
    relay::{check_content, Confession},
};

const HELP_TEXT: &str = "Simply DM me your confession, and then I'll ask for your confession code, \
which is the set of letters associated with the channel! Your confession will be anonymously copied \
right over, and nobody will ever know who said what, not even the server moderators.

`/createchannel [code]` -> Creates a confession channel on your server. If you don't provide a code, a random one is used.
`/setchannel <channel> [code]` -> Turns an existing channel into a confession channel.
`/confess <channel> <confession>` -> Sends a confession straight into a confession channel on this server.
`/banuser <code>` -> Bans a user from sending in any confessions. Users cannot be unbanned with a code, so make sure you know what you're doing when you run this.
`/unbanuser <user>` -> Unbans a user from sending in confessions.
`/getbancommand <message_id>` -> Gives you the ban command for a confession.
`/invite` -> Gives you the invite link for the bot! Add me to your own server!
`/support` -> Get an invite to the support server.";

const CONFESSION_CHANNEL_TYPES: &[ChannelType] = &[ChannelType::Text, ChannelType::News, ChannelType::PublicThread];

/// Link used by `/invite`.
pub fn invite_link(client_id: UserId) -> String {
    let permissions = Permissions::VIEW_CHANNEL
        | Permissions::SEND_MESSAGES
        | Permissions::EMBED_LINKS
        | Permissions::ATTACH_FILES
        | Permissions::MANAGE_CHANNELS;
    format!(
        "https://discord.com/oauth2/authorize?client_id={}&scope=bot%20applications.commands&permissions={}",
        client_id,
        permissions.bits()
    )
}

fn channel_topic(code: &str, bot_mention: &str) -> String {
    let code = code.to_uppercase();
    format!(
        "A confessional channel for use with {bot_mention}. The code for this channel is \"{code}\". \
         DM the bot your confession, and then provide \"{code}\" as your channel code when it's asked for."
    )
}

fn option<'a>(command: &'a ApplicationCommandInteraction, name: &str) -> Option<&'a CommandDataOptionValue> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.resolved.as_ref())
}

fn string_option<'a>(command: &'a ApplicationCommandInteraction, name: &str) -> Option<&'a str> {
    match option(command, name) {
        Some(CommandDataOptionValue::String(value)) => Some(value.as_str()),
        _ => None,
    }
}

fn channel_option<'a>(command: &'a ApplicationCommandInteraction, name: &str) -> Option<&'a PartialChannel> {
    match option(command, name) {
        Some(CommandDataOptionValue::Channel(channel)) => Some(channel),
        _ => None,
    }
}

fn user_option<'a>(command: &'a ApplicationCommandInteraction, name: &str) -> Option<&'a User> {
    match option(command, name) {
        Some(CommandDataOptionValue::User(user, _)) => Some(user),
        _ => None,
    }
}

fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| Error::BadRequest(format!("You need to give a `{name}` for this command.")))
}

fn guild_only(command: &ApplicationCommandInteraction) -> Result<GuildId> {
    command
        .guild_id
        .ok_or_else(|| Error::BadRequest("This command can only be used in a server.".to_string()))
}

#[derive(Clone)]
pub struct ConfessionCommands {
    db: Database,
    config: Arc<Config>,
}

impl ConfessionCommands {
    pub fn new(db: Database, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    pub async fn register_commands(context: &Context) -> serenity::Result<()> {
        let code_option = CreateApplicationCommandOption::default()
            .name("code")
            .description("Up to 5 letters or numbers people will use to confess here")
            .kind(CommandOptionType::String)
            .required(false)
            .to_owned();

        let channel_option = CreateApplicationCommandOption::default()
            .name("channel")
            .description("The confession channel")
            .kind(CommandOptionType::Channel)
            .channel_types(CONFESSION_CHANNEL_TYPES)
            .required(true)
            .to_owned();

        Command::create_global_application_command(&context.http, |command| {
            command
                .name("createchannel")
                .description("Creates a confession channel for the bot to send confessions to")
                .dm_permission(false)
                .add_option(code_option.clone())
        })
        .await?;

        Command::create_global_application_command(&context.http, |command| {
            command
                .name("setchannel")
                .description("Turns an existing channel into a confession channel")
                .dm_permission(false)
                .add_option(channel_option.clone())
                .add_option(code_option)
        })
        .await?;

        let confession_option = CreateApplicationCommandOption::default()
            .name("confession")
            .description("Your confession :)")
            .kind(CommandOptionType::String)
            .required(true)
            .to_owned();

        Command::create_global_application_command(&context.http, |command| {
            command
                .name("confess")
                .description("Confess anonymously into a confession channel")
                .dm_permission(false)
                .add_option(channel_option)
                .add_option(confession_option)
        })
        .await?;

        let ban_target_option = CreateApplicationCommandOption::default()
            .name("user")
            .description("The ban code of a confession, a user ping, or a user ID")
            .kind(CommandOptionType::String)
            .required(true)
            .to_owned();

        Command::create_global_application_command(&context.http, |command| {
            command
                .name("banuser")
                .description("Bans a user from sending any more confessions to your server")
                .dm_permission(false)
                .add_option(ban_target_option)
        })
        .await?;

        let user_option = CreateApplicationCommandOption::default()
            .name("user")
            .description("The user who you want to unban")
            .kind(CommandOptionType::User)
            .required(true)
            .to_owned();

        Command::create_global_application_command(&context.http, |command| {
            command
                .name("unbanuser")
                .description("Unbans a user from sending confessions to your server")
                .dm_permission(false)
                .add_option(user_option)
        })
        .await?;

        let message_id_option = CreateApplicationCommandOption::default()
            .name("message_id")
            .description("The ID of a confession message")
            .kind(CommandOptionType::String)
            .required(true)
            .to_owned();

        Command::create_global_application_command(&context.http, |command| {
            command
                .name("getbancommand")
                .description("Gives you a copyable ban command for a confession")
                .dm_permission(false)
                .add_option(message_id_option)
        })
        .await?;

        Command::create_global_application_command(&context.http, |command| {
            command.name("invite").description("Gives you the invite for the bot")
        })
        .await?;

        Command::create_global_application_command(&context.http, |command| {
            command.name("support").description("Gives you the link to the support server")
        })
        .await?;

        Command::create_global_application_command(&context.http, |command| {
            command.name("help").description("How to send in a confession")
        })
        .await?;

        Ok(())
    }

    fn require(&self, command: &ApplicationCommandInteraction, needed: Permissions) -> Result<()> {
        let granted = command.member.as_ref().and_then(|member| member.permissions);
        permissions::require(granted, needed, self.config.is_owner(command.user.id))
    }

    pub async fn create_channel(&self, context: &Context, command: &ApplicationCommandInteraction) -> Result<String> {
        let guild_id = guild_only(command)?;
        self.require(command, Permissions::MANAGE_CHANNELS)?;

        let code = match string_option(command, "code") {
            Some(requested) => {
                let code = codes::normalize(requested);
                if !codes::is_valid_channel_code(&code) {
                    return Err(Error::InvalidCode(requested.trim().to_string()));
                }
                if self.db.channel_for_code(&code).await?.is_some() {
                    return Err(Error::CodeTaken(code));
                }
                code
            }
            None => self.db.unused_channel_code().await?,
        };

        let bot_id = context.cache.current_user_id();
        let overwrites = vec![
            PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL,
                deny: Permissions::SEND_MESSAGES,
                kind: PermissionOverwriteType::Role(RoleId(guild_id.0)),
            },
            PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::EMBED_LINKS,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Member(bot_id),
            },
        ];
        let topic = channel_topic(&code, &bot_id.mention().to_string());

        let channel = guild_id
            .create_channel(&context.http, |channel| {
                channel
                    .name(format!("confessional-{code}"))
                    .kind(ChannelType::Text)
                    .topic(topic)
                    .permissions(overwrites)
            })
            .await
            .map_err(|why| {
                if is_forbidden(&why) {
                    Error::BotMissingPermission("Manage Channels")
                } else {
                    Error::from(why)
                }
            })?;

        if let Err(err) = self.db.insert_channel(&code, channel.id).await {
            // Lost a race for the code; don't leave an orphaned channel behind.
            if let Err(why) = channel.delete(context).await {
                warn!("Failed to clean up channel {}: {}", channel.id, why);
            }
            return Err(err);
        }

        Ok(format!(
            "Your new confessional channel has been created over at {} with the code `{}`.",
            channel.mention(),
            code.to_uppercase()
        ))
    }

    pub async fn set_channel(&self, command: &ApplicationCommandInteraction) -> Result<String> {
        guild_only(command)?;
        self.require(command, Permissions::MANAGE_CHANNELS)?;

        let channel = required(channel_option(command, "channel"), "channel")?;
        let code = self.db.register_channel(string_option(command, "code"), channel.id).await?;

        Ok(format!(
            "Your new confessional channel has been set at {} with the code `{}`.",
            channel.id.mention(),
            code.to_uppercase()
        ))
    }

    pub async fn confess(&self, context: &Context, command: &ApplicationCommandInteraction) -> Result<String> {
        let guild_id = guild_only(command)?;
        let channel = required(channel_option(command, "channel"), "channel")?;
        let text = required(string_option(command, "confession"), "confession")?;

        check_content(text, 0).map_err(|rejection| Error::BadRequest(rejection.to_string()))?;

        let Some(code) = self.db.code_for_channel(channel.id).await? else {
            return Err(Error::BadRequest("That is not set up as a confession channel.".to_string()));
        };
        if self.db.is_banned(guild_id, command.user.id).await? {
            return Err(Error::BadRequest(
                "You've been banned from sending confessions in to that server :/".to_string(),
            ));
        }

        let sent_at = command.id.created_at().unix_timestamp();
        let confession = Confession::new(&code, text, sent_at);
        let delivered = send_confession(&context.http, channel.id, &confession)
            .await
            .map_err(|err| {
                warn!("Failed to send confession to {}: {}", channel.id, err);
                Error::BadRequest(format!("I encountered the error `{err}` trying to send in the confession :/"))
            })?;

        let entry = ConfessionLogEntry {
            message_id: delivered.message_id,
            user_id: command.user.id,
            guild_id,
            channel_code: code,
            channel_id: channel.id,
            timestamp: sent_at,
            confession: text.to_string(),
            ban_code: confession.ban_code,
        };
        if let Err(err) = self.db.log_confession(&entry).await {
            error!("Failed to log confession {}: {}", delivered.message_id, err);
        }

        Ok(format!("I successfully sent in your confession!\n{}", delivered.link))
    }

    pub async fn ban_user(&self, command: &ApplicationCommandInteraction) -> Result<String> {
        let guild_id = guild_only(command)?;
        self.require(command, Permissions::MANAGE_MESSAGES)?;

        let target = BanTarget::parse(required(string_option(command, "user"), "user")?)?;
        let user_id = target.resolve(&self.db, guild_id).await?;
        self.db.ban(guild_id, user_id).await?;

        Ok("That user has been banned from sending in more confessions on your server.".to_string())
    }

    pub async fn unban_user(&self, command: &ApplicationCommandInteraction) -> Result<String> {
        let guild_id = guild_only(command)?;
        self.require(command, Permissions::MANAGE_MESSAGES)?;

        let user = required(user_option(command, "user"), "user")?;
        self.db.unban(guild_id, user.id).await?;

        Ok(format!(
            "{} has been unbanned from sending in confessions, if they were even banned at all.",
            user.mention()
        ))
    }

    pub async fn get_ban_command(&self, command: &ApplicationCommandInteraction) -> Result<String> {
        let guild_id = guild_only(command)?;
        self.require(command, Permissions::MANAGE_MESSAGES)?;

        let message_id = required(string_option(command, "message_id"), "message_id")?
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::BadRequest("That isn't a message ID.".to_string()))?;

        let entry = self
            .db
            .logged_confession(guild_id, MessageId(message_id))
            .await?
            .ok_or_else(|| Error::NotFound("I couldn't find a confession with that message ID on this server.".to_string()))?;

        Ok(format!("/banuser {}", entry.ban_code))
    }

    fn support(&self) -> String {
        self.config
            .support_invite
            .clone()
            .unwrap_or_else(|| "There isn't a support server set up for this bot right now.".to_string())
    }

    pub async fn resolve_interaction(&self, context: &Context, interaction: Interaction) {
        let Interaction::ApplicationCommand(command) = interaction else {
            return;
        };
        debug!("Command `{}` from {}", command.data.name, command.user.id);

        if let Err(why) = command.defer_ephemeral(&context.http).await {
            warn!("Failed to defer `{}`: {}", command.data.name, why);
            return;
        }

        let reply = match command.data.name.as_str() {
            "createchannel" => self.create_channel(context, &command).await,
            "setchannel" => self.set_channel(&command).await,
            "confess" => self.confess(context, &command).await,
            "banuser" => self.ban_user(&command).await,
            "unbanuser" => self.unban_user(&command).await,
            "getbancommand" => self.get_ban_command(&command).await,
            "invite" => Ok(format!("<{}>", invite_link(context.cache.current_user_id()))),
            "support" => Ok(self.support()),
            "help" => Ok(HELP_TEXT.to_string()),
            other => Err(Error::BadRequest(format!("I don't know the command `{other}`."))),
        };

        let content = reply.unwrap_or_else(|err| {
            if err.is_internal() {
                error!("Command `{}` failed: {}", command.data.name, err);
            }
            err.user_message()
        });

        if let Err(why) = command
            .edit_original_interaction_response(&context.http, |response| response.content(content))
            .await
        {
            warn!("Failed to respond to `{}`: {}", command.data.name, why);
        }
    }
}
