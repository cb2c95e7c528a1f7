/// Core error type for the bot.
///
/// Adapter crates map their specific failures into this type so the pipeline
/// can handle them consistently (logged per handler, retried in the polling
/// loop, never escalated to process termination).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("bus error: {0}")]
    Bus(String),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("telegram api error: {0}")]
    Api(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
