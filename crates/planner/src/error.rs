use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlannerError {
    /// Malformed or incomplete event data; not retryable, the message goes
    /// to the dead-letter queue.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Notify(#[from] traineehub_notify::NotifyError),

    #[error(transparent)]
    History(#[from] traineehub_history::HistoryError),

    #[error(transparent)]
    Scheduler(#[from] traineehub_scheduler::SchedulerError),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl PlannerError {
    /// Retryable errors re-surface to the queue consumer; the rest are
    /// terminal for the message.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PlannerError::InvalidInput(_) | PlannerError::Payload(_))
    }
}
