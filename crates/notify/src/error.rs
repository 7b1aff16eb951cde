use thiserror::Error;
use traineehub_history::HistoryError;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no account found for trainee {0}")]
    NoAccount(String),

    #[error("multiple accounts found for trainee {trainee_id}: {account_ids:?}")]
    AmbiguousAccount {
        trainee_id: String,
        account_ids: Vec<String>,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error("unknown template version for {0}")]
    UnknownTemplateVersion(String),

    #[error("remote service error: {0}")]
    Remote(#[from] reqwest::Error),

    #[error("mail transport error: {0}")]
    Transport(String),

    #[error("attachment {bucket}/{key} unavailable: {message}")]
    Attachment {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lettre::error::Error> for NotifyError {
    fn from(err: lettre::error::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}

impl From<lettre::address::AddressError> for NotifyError {
    fn from(err: lettre::address::AddressError) -> Self {
        NotifyError::Transport(err.to_string())
    }
}
