use sea_query::Iden;

#[derive(Iden, Clone)]
pub enum History {
    Table,
    Id,
    TraineeId,
    RefKind,
    RefId,
    Kind,
    Channel,
    Contact,
    TemplateName,
    TemplateVersion,
    Variables,
    Attachments,
    SentAt,
    ReadAt,
    Status,
    StatusDetail,
    LatestStatusEventAt,
    LastRetry,
}

#[derive(Iden, Clone)]
pub enum SchedulerJob {
    Table,
    Id,
    Data,
    FireAt,
    MisfireWindowSecs,
    LockedBy,
    LockedAt,
}

#[derive(Iden, Clone)]
pub enum QueueMessage {
    Table,
    Id,
    Queue,
    Body,
    Headers,
    Attempts,
    VisibleAt,
    CreatedAt,
}

#[derive(Iden, Clone)]
pub enum RepairApplied {
    Table,
    Id,
    AppliedAt,
}
