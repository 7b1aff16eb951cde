use thiserror::Error;
use traineehub_shared::{Channel, NotificationStatus};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("history payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("status {status} is not valid for channel {channel}")]
    InvalidTransition {
        channel: Channel,
        status: NotificationStatus,
    },

    #[error("history row {0} not found")]
    NotFound(String),
}
