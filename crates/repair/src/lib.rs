mod jobs;
mod registry;

pub use jobs::{
    default_jobs, BackfillMissingStatus, BroadcastAllHistory, DeleteObsoleteProgrammeKinds,
    DeleteStaleScheduledRows, ResendNhsTransientFailures, ResetMissedSchedules,
    RewriteLtftSubmittedTrainee, MISSED_SCHEDULE_DETAIL,
};
pub use registry::{RepairContext, RepairJob, RepairRunner};
