mod error;
mod service;
mod store;

pub use error::SchedulerError;
pub use service::{spawn_fire_loop, JobHandler, Scheduler};
pub use store::{JobStore, StoredJob};
