use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Boxed, `serenity::Error` is large.
    #[error(transparent)]
    Discord(Box<serenity::Error>),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The invoking member lacks a permission.
    #[error("missing permission `{0}`")]
    MissingPermission(&'static str),

    /// The bot itself lacks a permission.
    #[error("bot is missing permission `{0}`")]
    BotMissingPermission(&'static str),

    #[error("invalid channel code `{0}`")]
    InvalidCode(String),

    #[error("channel code `{0}` is already in use")]
    CodeTaken(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),
}

impl From<serenity::Error> for Error {
    fn from(err: serenity::Error) -> Self {
        Error::Discord(Box::new(err))
    }
}

impl Error {
    /// The sentence shown to whoever triggered the failing command.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingPermission(permission) => {
                format!("You need to have the `{permission}` permission to run this command.")
            }
            Self::BotMissingPermission(permission) => {
                format!("I'm missing the `{permission}` permission required to run this command.")
            }
            Self::InvalidCode(code) => format!(
                "`{code}` isn't a valid channel code - codes are up to 5 letters or numbers."
            ),
            Self::CodeTaken(code) => format!(
                "The code `{}` is already being used by another confession channel.",
                code.to_uppercase()
            ),
            Self::NotFound(message) | Self::BadRequest(message) => message.clone(),
            Self::Discord(err) => format!("I encountered the error `{err}` trying to do that :/"),
            Self::Database(_) | Self::Config(_) => {
                "Something went wrong on my end - please try again in a moment.".to_string()
            }
        }
    }

    /// Errors that are not the caller's fault and deserve an `error!` line.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Config(_) | Self::Discord(_))
    }
}

/// Whether a Discord HTTP call was refused with 403.
pub fn is_forbidden(err: &serenity::Error) -> bool {
    match err {
        serenity::Error::Http(http) => http.status_code().map(|s| s.as_u16()) == Some(403),
        _ => false,
    }
}
