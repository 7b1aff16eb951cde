pub mod events;
mod feedback;
mod listeners;
mod worker;

pub use feedback::FeedbackService;
pub use listeners::{
    AccountConfirmedListener, AccountUpdatedListener, CojPublishedListener, ContactDetailsListener,
    EmailEventListener, FormUpdatedListener, GmcRejectedListener, GmcUpdatedListener,
    LtftTpdListener, LtftUpdatedListener, OutboxListener, PlacementDeletedListener,
    PlacementUpdatedListener, ProgrammeMembershipDeletedListener,
    ProgrammeMembershipUpdatedListener,
};
pub use worker::{ListenerError, ListenerWorker, QueueListener};
