mod history;
mod queue_message;
mod repair_applied;
mod scheduler_job;

use sqlx_migrator::vec_box;

pub struct Migration;

sqlx_migrator::sqlite_migration!(
    Migration,
    "traineehub",
    "m1_0",
    vec_box![],
    vec_box![
        history::CreateTable,
        history::CreateTraineeIdx,
        history::CreateReferenceIdx,
        history::CreateStatusSentAtIdx,
        scheduler_job::CreateTable,
        queue_message::CreateTable,
        queue_message::CreateVisibilityIdx,
        repair_applied::CreateTable,
    ]
);
