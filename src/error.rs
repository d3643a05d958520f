use crate::types::Platform;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} api error: {message}")]
    Api { service: String, message: String },

    #[error("{service} rate limited the request")]
    RateLimited { service: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("template: {0}")]
    Template(String),

    #[error("invalid source locator: {0}")]
    InvalidSource(String),

    #[error("community not found: {0}")]
    CommunityNotFound(String),

    #[error("no scraper registered for platform {0}")]
    NoScraperForPlatform(Platform),

    #[error("no platform users available for post assignment")]
    NoPlatformUsers,

    #[error("{platform} scrape failed: {message}")]
    ScrapeFailure { platform: Platform, message: String },

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("persistence: {0}")]
    Persistence(String),
}

impl Error {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn api(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
