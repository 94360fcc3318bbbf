use crate::domain::TelegramResponse;

/// Core error type.
///
/// Adapter crates map their transport-specific failures into this type so the
/// engine can classify them consistently (fatal vs. retry-next-tick vs.
/// graceful stop).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transient connectivity failure reaching the external source.
    #[error("api error: {0}")]
    Api(String),

    /// The caller violated the minimum request spacing.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    /// The named entity (nation, region, proposal) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Dispatch-time rejection: bad keys, mismatched region, unknown
    /// telegram id. Always fatal to the current send run.
    #[error("telegram rejected ({code:?}): {reason}")]
    Dispatch {
        code: TelegramResponse,
        reason: String,
    },

    /// A monitor's background refresh failed past its retry threshold.
    #[error("monitor poll failed: {0}")]
    PollFailed(String),

    #[error("invalid monitor spec: {0}")]
    Parse(String),

    /// Control signal, not a failure: the recipient source will never yield
    /// another recipient. Triggers a graceful stop.
    #[error("recipient source exhausted")]
    Exhausted,
}

impl Error {
    /// Whether the normal tick/poll cycle may simply retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Api(_) | Error::Io(_) | Error::RateLimited(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
