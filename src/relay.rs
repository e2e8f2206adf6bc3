//! The DM conversation: confession text, then a channel code, then delivery.
//!
//! ```text
//! Idle -> AwaitingCode -> Delivered | Rejected | TimedOut -> Idle
//! ```
//!
//! A [`GuardTicket`](crate::guard::GuardTicket) is held from the prompt until the
//! conversation ends, whichever way it ends.

use std::{fmt, time::Duration};

use rand::Rng;
use serenity::{
    async_trait,
    model::id::{ChannelId, GuildId, MessageId, UserId},
    utils::Colour,
};
use tracing::{debug, error, info, warn};

use crate::{
    codes,
    database::{ConfessionLogEntry, Database},
    error::Result,
    guard::ConfessionGuard,
};

pub const MAX_CONFESSION_LENGTH: usize = 1000;

const CODE_PROMPT: &str = "What's the code for the channel you want to confess to?";
const TIMED_OUT: &str = "The timer for you to give a channel code has timed out. \
    Please give your confession again to be able to provide another.";

/// A DM that might be a confession.
#[derive(Clone, Debug)]
pub struct IncomingConfession {
    pub author: UserId,
    pub text: String,
    pub attachments: usize,
    /// Unix seconds the DM was sent at.
    pub sent_at: i64,
}

/// What the relay learns about a target channel from the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetAccess {
    Available { guild_id: GuildId },
    /// Deleted, not a guild channel, or the bot can't fetch it.
    Missing,
    NotMember,
    CannotRead,
    /// The member was found but their permissions could not be computed.
    Unresolved,
}

/// A confession ready to be posted.
#[derive(Clone, Debug)]
pub struct Confession {
    pub code: String,
    pub text: String,
    pub ban_code: String,
    pub colour: Colour,
    pub sent_at: i64,
}

impl Confession {
    pub fn new(code: &str, text: &str, sent_at: i64) -> Self {
        Self {
            code: codes::normalize(code),
            text: text.to_string(),
            ban_code: codes::ban_code(),
            colour: random_colour(),
            sent_at,
        }
    }

    pub fn title(&self) -> String {
        format!("Confession Code {}", self.code.to_uppercase())
    }

    /// Copy-pasteable moderation command.
    pub fn footer(&self) -> String {
        format!("/banuser {}", self.ban_code)
    }
}

fn random_colour() -> Colour {
    let mut rng = rand::thread_rng();
    Colour::from_rgb(rng.gen(), rng.gen(), rng.gen())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub message_id: MessageId,
    pub link: String,
}

/// A user-facing reason the conversation stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    TooLong,
    HasAttachments,
    Empty,
    UnknownCode(String),
    NotMember(String),
    CannotRead(String),
    Banned,
    SendFailed(String),
    Internal,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong => write!(
                f,
                "Your confession can only be {MAX_CONFESSION_LENGTH} characters I'm afraid - please shorten it and try again."
            ),
            Self::HasAttachments => f.write_str(
                "I can't send attachments in confessions - please send your confession as text only.",
            ),
            Self::Empty => f.write_str(
                "Your confession doesn't have any text in it - please send it as a text message.",
            ),
            Self::UnknownCode(code) => write!(
                f,
                "The code `{code}` doesn't refer to a given confession channel. \
                 Please give your confession again to be able to provide a new channel code."
            ),
            Self::NotMember(code) => write!(
                f,
                "You're not in the guild that the channel code `{code}` refers to. \
                 Please give your confession again and provide an alternative channel code."
            ),
            Self::CannotRead(code) => write!(
                f,
                "You can't see the channel that the code `{code}` refers to. \
                 Please give your confession again and provide an alternative channel code."
            ),
            Self::Banned => f.write_str("You've been banned from sending confessions in to that server :/"),
            Self::SendFailed(err) => write!(f, "I encountered the error `{err}` trying to send in the confession :/"),
            Self::Internal => f.write_str(
                "Something went wrong on my end - please give your confession again in a moment.",
            ),
        }
    }
}

/// Checks that run before anything is mutated.
pub fn check_content(text: &str, attachments: usize) -> std::result::Result<(), Rejection> {
    if attachments > 0 {
        return Err(Rejection::HasAttachments);
    }
    if text.trim().is_empty() {
        return Err(Rejection::Empty);
    }
    if text.chars().count() > MAX_CONFESSION_LENGTH {
        return Err(Rejection::TooLong);
    }
    Ok(())
}

#[derive(Debug)]
pub enum Outcome {
    /// The user already has a conversation running; the DM is ignored.
    Busy,
    Rejected(Rejection),
    TimedOut,
    Delivered(Delivered),
}

/// The platform side of one DM conversation.
#[async_trait]
pub trait Courier: Send + Sync {
    /// Sends a message back into the DM.
    async fn reply(&self, content: &str) -> Result<()>;

    /// The next DM from the same user, or `None` once `timeout` passes.
    async fn await_code(&self, timeout: Duration) -> Option<String>;

    async fn resolve_target(&self, channel_id: ChannelId, user_id: UserId) -> TargetAccess;

    async fn deliver(&self, channel_id: ChannelId, confession: &Confession) -> Result<Delivered>;
}

#[derive(Clone)]
pub struct Relay {
    db: Database,
    guard: ConfessionGuard,
    timeout: Duration,
}

impl Relay {
    pub fn new(db: Database, timeout: Duration) -> Self {
        Self {
            db,
            guard: ConfessionGuard::new(),
            timeout,
        }
    }

    pub fn guard(&self) -> &ConfessionGuard {
        &self.guard
    }

    pub async fn handle<C: Courier + ?Sized>(&self, courier: &C, incoming: IncomingConfession) -> Outcome {
        let author = incoming.author;

        // The code reply arrives as a DM too.
        if self.guard.is_confessing(author) {
            return Outcome::Busy;
        }

        if let Err(rejection) = check_content(&incoming.text, incoming.attachments) {
            say(courier, &rejection.to_string()).await;
            return Outcome::Rejected(rejection);
        }

        let Some(ticket) = self.guard.try_begin(author) else {
            return Outcome::Busy;
        };

        say(courier, CODE_PROMPT).await;
        let Some(raw_code) = courier.await_code(self.timeout).await else {
            debug!("User {} timed out picking a channel code", author);
            say(courier, TIMED_OUT).await;
            return Outcome::TimedOut;
        };
        let raw_code = raw_code.trim().to_string();

        let (code, channel_id, guild_id) = match self.locate(courier, author, &raw_code).await {
            Ok(found) => found,
            Err(rejection) => {
                say(courier, &rejection.to_string()).await;
                return Outcome::Rejected(rejection);
            }
        };

        let confession = Confession::new(&code, &incoming.text, incoming.sent_at);
        let delivered = match courier.deliver(channel_id, &confession).await {
            Ok(delivered) => delivered,
            Err(err) => {
                warn!("Failed to send confession to {}: {}", channel_id, err);
                let rejection = Rejection::SendFailed(err.to_string());
                say(courier, &rejection.to_string()).await;
                return Outcome::Rejected(rejection);
            }
        };

        say(courier, &format!("I successfully sent in your confession!\n{}", delivered.link)).await;
        drop(ticket);
        info!("Sent confession from {} to {} -> {}", author, channel_id, incoming.text);

        let entry = ConfessionLogEntry {
            message_id: delivered.message_id,
            user_id: author,
            guild_id,
            channel_code: code,
            channel_id,
            timestamp: incoming.sent_at,
            confession: incoming.text,
            ban_code: confession.ban_code,
        };
        if let Err(err) = self.db.log_confession(&entry).await {
            error!("Failed to log confession {}: {}", delivered.message_id, err);
        }

        Outcome::Delivered(delivered)
    }

    async fn locate<C: Courier + ?Sized>(
        &self,
        courier: &C,
        author: UserId,
        raw_code: &str,
    ) -> std::result::Result<(String, ChannelId, GuildId), Rejection> {
        let code = codes::normalize(raw_code);
        if !codes::is_valid_channel_code(&code) {
            return Err(Rejection::UnknownCode(raw_code.to_string()));
        }

        let channel_id = self
            .db
            .channel_for_code(&code)
            .await
            .map_err(|err| {
                error!("Failed to look up channel code {}: {}", code, err);
                Rejection::Internal
            })?
            .ok_or_else(|| Rejection::UnknownCode(raw_code.to_string()))?;

        let guild_id = match courier.resolve_target(channel_id, author).await {
            TargetAccess::Available { guild_id } => guild_id,
            TargetAccess::Missing => return Err(Rejection::UnknownCode(raw_code.to_string())),
            TargetAccess::NotMember => return Err(Rejection::NotMember(code)),
            TargetAccess::CannotRead => return Err(Rejection::CannotRead(code)),
            TargetAccess::Unresolved => return Err(Rejection::Internal),
        };

        let banned = self.db.is_banned(guild_id, author).await.map_err(|err| {
            error!("Failed to check ban for {} in {}: {}", author, guild_id, err);
            Rejection::Internal
        })?;
        if banned {
            return Err(Rejection::Banned);
        }

        Ok((code, channel_id, guild_id))
    }
}

/// Best effort; a failed reply never aborts the conversation.
async fn say<C: Courier + ?Sized>(courier: &C, content: &str) {
    if let Err(err) = courier.reply(content).await {
        warn!("Failed to reply in DM: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use super::*;
    use crate::{database::tests::database, error::Error};

    const USER: UserId = UserId(20);
    const GUILD: GuildId = GuildId(10);
    const CHANNEL: ChannelId = ChannelId(500);

    struct FakeCourier {
        code: Option<String>,
        access: HashMap<ChannelId, TargetAccess>,
        fail_delivery: bool,
        guard: ConfessionGuard,
        replies: Mutex<Vec<String>>,
        delivered: Mutex<Vec<(ChannelId, Confession)>>,
        guarded_while_waiting: Mutex<Option<bool>>,
    }

    impl FakeCourier {
        fn new(relay: &Relay, code: Option<&str>) -> Self {
            Self {
                code: code.map(str::to_string),
                access: HashMap::from([(CHANNEL, TargetAccess::Available { guild_id: GUILD })]),
                fail_delivery: false,
                guard: relay.guard().clone(),
                replies: Mutex::new(Vec::new()),
                delivered: Mutex::new(Vec::new()),
                guarded_while_waiting: Mutex::new(None),
            }
        }

        fn replies(&self) -> Vec<String> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Courier for FakeCourier {
        async fn reply(&self, content: &str) -> Result<()> {
            self.replies.lock().unwrap().push(content.to_string());
            Ok(())
        }

        async fn await_code(&self, _timeout: Duration) -> Option<String> {
            *self.guarded_while_waiting.lock().unwrap() = Some(self.guard.is_confessing(USER));
            self.code.clone()
        }

        async fn resolve_target(&self, channel_id: ChannelId, _user_id: UserId) -> TargetAccess {
            self.access.get(&channel_id).copied().unwrap_or(TargetAccess::Missing)
        }

        async fn deliver(&self, channel_id: ChannelId, confession: &Confession) -> Result<Delivered> {
            if self.fail_delivery {
                return Err(Error::BadRequest("Missing Access".to_string()));
            }
            self.delivered.lock().unwrap().push((channel_id, confession.clone()));
            Ok(Delivered {
                message_id: MessageId(9000),
                link: format!("https://discord.com/channels/{GUILD}/{channel_id}/9000"),
            })
        }
    }

    fn incoming(text: &str) -> IncomingConfession {
        IncomingConfession {
            author: USER,
            text: text.to_string(),
            attachments: 0,
            sent_at: 1_700_000_000,
        }
    }

    async fn relay() -> Relay {
        let db = database().await;
        db.insert_channel("abc12", CHANNEL).await.unwrap();
        Relay::new(db, Duration::from_secs(120))
    }

    #[tokio::test]
    async fn delivers_and_logs() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, Some("ABC12"));

        let delivered = match relay.handle(&courier, incoming("I broke the vase")).await {
            Outcome::Delivered(delivered) => delivered,
            other => panic!("expected delivery, got {other:?}"),
        };

        let sent = courier.delivered.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let (channel_id, confession) = &sent[0];
        assert_eq!(*channel_id, CHANNEL);
        assert_eq!(confession.text, "I broke the vase");
        assert_eq!(confession.title(), "Confession Code ABC12");
        assert_eq!(confession.ban_code.len(), codes::BAN_CODE_LEN);
        assert_eq!(confession.footer(), format!("/banuser {}", confession.ban_code));

        let replies = courier.replies();
        assert_eq!(replies[0], CODE_PROMPT);
        assert!(replies[1].contains(&delivered.link));

        assert_eq!(*courier.guarded_while_waiting.lock().unwrap(), Some(true));
        assert!(!relay.guard().is_confessing(USER));

        let entry = relay.db.logged_confession(GUILD, MessageId(9000)).await.unwrap().unwrap();
        assert_eq!(entry.channel_code, "abc12");
        assert_eq!(entry.user_id, USER);
        assert_eq!(entry.confession, "I broke the vase");
        assert_eq!(entry.ban_code, confession.ban_code);
        assert_eq!(relay.db.user_for_ban_code(GUILD, &entry.ban_code).await.unwrap(), Some(USER));
    }

    #[tokio::test]
    async fn too_long_is_rejected_before_anything_else() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, Some("abc12"));

        let outcome = relay.handle(&courier, incoming(&"a".repeat(1001))).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::TooLong)));
        assert_eq!(courier.replies(), vec![Rejection::TooLong.to_string()]);
        assert!(courier.guarded_while_waiting.lock().unwrap().is_none());
        assert!(courier.delivered.lock().unwrap().is_empty());
        assert!(!relay.guard().is_confessing(USER));
    }

    #[tokio::test]
    async fn exactly_the_limit_is_accepted() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, Some("abc12"));
        let outcome = relay.handle(&courier, incoming(&"é".repeat(MAX_CONFESSION_LENGTH))).await;
        assert!(matches!(outcome, Outcome::Delivered(_)));
    }

    #[tokio::test]
    async fn attachments_are_rejected() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, Some("abc12"));
        let mut dm = incoming("look at this");
        dm.attachments = 1;

        let outcome = relay.handle(&courier, dm).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::HasAttachments)));
        assert!(courier.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_code_clears_the_guard() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, Some("zzzzz"));

        let outcome = relay.handle(&courier, incoming("I broke the vase")).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::UnknownCode(ref c)) if c == "zzzzz"));
        assert!(courier.replies()[1].contains("doesn't refer to a given confession channel"));
        assert!(!relay.guard().is_confessing(USER));

        let retry = FakeCourier::new(&relay, Some("abc12"));
        assert!(matches!(relay.handle(&retry, incoming("again")).await, Outcome::Delivered(_)));
    }

    #[tokio::test]
    async fn malformed_code_is_unknown() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, Some("not a code"));
        let outcome = relay.handle(&courier, incoming("hi")).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::UnknownCode(_))));
    }

    #[tokio::test]
    async fn timeout_clears_the_guard() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, None);

        let outcome = relay.handle(&courier, incoming("I broke the vase")).await;
        assert!(matches!(outcome, Outcome::TimedOut));
        assert_eq!(courier.replies().last().map(String::as_str), Some(TIMED_OUT));
        assert!(!relay.guard().is_confessing(USER));
    }

    #[tokio::test]
    async fn busy_user_is_ignored() {
        let relay = relay().await;
        let courier = FakeCourier::new(&relay, Some("abc12"));
        let _ticket = relay.guard().try_begin(USER).unwrap();

        let outcome = relay.handle(&courier, incoming("abc12")).await;
        assert!(matches!(outcome, Outcome::Busy));
        assert!(courier.replies().is_empty());
    }

    #[tokio::test]
    async fn unreachable_channels_are_rejected() {
        let relay = relay().await;
        for (access, expected) in [
            (TargetAccess::Missing, Rejection::UnknownCode("abc12".to_string())),
            (TargetAccess::NotMember, Rejection::NotMember("abc12".to_string())),
            (TargetAccess::CannotRead, Rejection::CannotRead("abc12".to_string())),
            (TargetAccess::Unresolved, Rejection::Internal),
        ] {
            let mut courier = FakeCourier::new(&relay, Some("abc12"));
            courier.access.insert(CHANNEL, access);

            let outcome = relay.handle(&courier, incoming("hi")).await;
            assert!(matches!(outcome, Outcome::Rejected(ref r) if *r == expected), "{access:?}");
            assert!(!relay.guard().is_confessing(USER));
        }
    }

    #[tokio::test]
    async fn banned_users_cannot_deliver_until_unbanned() {
        let relay = relay().await;
        relay.db.ban(GUILD, USER).await.unwrap();

        let courier = FakeCourier::new(&relay, Some("abc12"));
        let outcome = relay.handle(&courier, incoming("hi")).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::Banned)));
        assert!(courier.delivered.lock().unwrap().is_empty());

        relay.db.unban(GUILD, USER).await.unwrap();
        let courier = FakeCourier::new(&relay, Some("abc12"));
        assert!(matches!(relay.handle(&courier, incoming("hi")).await, Outcome::Delivered(_)));
    }

    #[tokio::test]
    async fn send_errors_are_reported() {
        let relay = relay().await;
        let mut courier = FakeCourier::new(&relay, Some("abc12"));
        courier.fail_delivery = true;

        let outcome = relay.handle(&courier, incoming("hi")).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::SendFailed(_))));
        assert!(courier.replies().last().unwrap().contains("Missing Access"));
        assert!(!relay.guard().is_confessing(USER));
        assert_eq!(relay.db.logged_confession(GUILD, MessageId(9000)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_conversations_share_one_guard() {
        let relay = Arc::new(relay().await);
        let _ticket = relay.guard().try_begin(USER).unwrap();

        let other = relay.clone();
        let handle = tokio::spawn(async move {
            let courier = FakeCourier::new(&other, Some("abc12"));
            matches!(other.handle(&courier, incoming("hi")).await, Outcome::Busy)
        });
        assert!(handle.await.unwrap());
    }

    #[test]
    fn content_checks() {
        assert_eq!(check_content("fine", 0), Ok(()));
        assert_eq!(check_content("   ", 0), Err(Rejection::Empty));
        assert_eq!(check_content("", 2), Err(Rejection::HasAttachments));
        assert_eq!(check_content(&"x".repeat(1001), 0), Err(Rejection::TooLong));
    }
}
