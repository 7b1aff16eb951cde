use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("job payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("job execution failed: {0}")]
    Execution(String),
}
