mod error;
mod executor;
mod job_data;
pub mod ltft;
mod placement;
mod programme_membership;

pub use error::PlannerError;
pub use executor::{is_in_pilot, NotificationExecutor};
pub use job_data::{
    placement_job_data, programme_job_data, welcome_job_data, AccountJobData, JobData,
    PlacementJobData, ProgrammeJobData,
};
pub use ltft::{LtftEvent, LtftPlanner};
pub use placement::PlacementPlanner;
pub use programme_membership::ProgrammeMembershipPlanner;
