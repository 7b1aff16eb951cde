mod broadcast;
mod error;
mod model;
mod outbox;
mod service;
mod store;

pub use broadcast::{Broadcast, TopicBroadcast};
pub use error::HistoryError;
pub use model::{Attachment, History, HistoryBroadcastView, HistoryDeletedView, TemplateInfo};
pub use outbox::{OutboxBatch, OutboxSender};
pub use service::HistoryService;
pub use store::HistoryStore;
