//! Explicit construction and wiring of every collaborator, then the worker
//! fleet: one polling worker per inbound queue plus the scheduler fire loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use traineehub_db::queue::SqliteQueue;
use traineehub_history::{HistoryService, HistoryStore, OutboxSender, TopicBroadcast};
use traineehub_intake::{
    AccountConfirmedListener, AccountUpdatedListener, CojPublishedListener, ContactDetailsListener,
    EmailEventListener, FeedbackService, FormUpdatedListener, GmcRejectedListener,
    GmcUpdatedListener, ListenerWorker, LtftTpdListener, LtftUpdatedListener, OutboxListener,
    PlacementDeletedListener, PlacementUpdatedListener, ProgrammeMembershipDeletedListener,
    ProgrammeMembershipUpdatedListener, QueueListener,
};
use traineehub_notify::client::{ActionsClient, DirectoryClient, ProfileClient, ReferenceClient};
use traineehub_notify::{
    EmailSender, FsObjectStore, InAppSender, RecipientResolver, SmtpMailer, TemplateRenderer,
    TemplateVersions,
};
use traineehub_planner::{
    LtftPlanner, NotificationExecutor, PlacementPlanner, ProgrammeMembershipPlanner,
};
use traineehub_repair::{default_jobs, RepairContext, RepairRunner};
use traineehub_scheduler::{spawn_fire_loop, JobStore, Scheduler};
use traineehub_shared::datetime::find_zone;

use crate::config::Config;

pub async fn serve(config: Config) -> Result<()> {
    tracing::info!("starting traineehub notification orchestrator");

    let timezone = find_zone(&config.notifications.timezone)
        .with_context(|| format!("unknown timezone {}", config.notifications.timezone))?;

    let pool = traineehub_db::create_pool(
        &config.database.url,
        config.database.max_connections,
    )
    .await?;
    traineehub_db::migrate(&pool).await?;

    let queue = Arc::new(SqliteQueue::new(
        pool.clone(),
        Duration::from_secs(config.queues.visibility_timeout_secs),
    ));
    let broadcast = Arc::new(TopicBroadcast::new(queue.clone(), &config.queues.topic));
    let history = HistoryService::new(HistoryStore::new(pool.clone()), broadcast);

    let renderer = Arc::new(TemplateRenderer::new(&config.templates.root, timezone)?);
    let versions = TemplateVersions::new(config.templates.versions.clone());
    let transport = Arc::new(SmtpMailer::new(&config.smtp)?);
    let object_store = Arc::new(FsObjectStore::new(&config.object_store.root));

    let email = Arc::new(EmailSender::new(
        history.clone(),
        renderer,
        versions.clone(),
        transport,
        object_store,
        config.notifications.sender_address.clone(),
        config.notifications.app_domain.clone(),
        config.notifications.email_enabled,
    ));
    let in_app = Arc::new(InAppSender::new(
        history.clone(),
        versions,
        config.notifications.in_app_enabled,
    ));

    let timeout = Duration::from_secs(config.services.timeout_secs);
    let profile = Arc::new(ProfileClient::new(&config.services.profile_url, timeout)?);
    let directory = Arc::new(DirectoryClient::new(&config.services.directory_url, timeout)?);
    let reference = Arc::new(ReferenceClient::new(&config.services.reference_url, timeout)?);
    let actions = Arc::new(ActionsClient::new(&config.services.actions_url, timeout)?);
    let recipients = Arc::new(RecipientResolver::new(directory, profile));

    let job_store = JobStore::new(pool.clone());
    let scheduler = Arc::new(Scheduler::new(job_store, timezone));
    let executor = Arc::new(NotificationExecutor::new(recipients.clone(), email.clone()));

    // One-shot repairs run before any listener starts consuming.
    let outbox = Arc::new(OutboxSender::new(queue.clone(), &config.queues.outbox));
    let repair_ctx = RepairContext {
        history: history.clone(),
        outbox,
        email: email.clone(),
        scheduler: scheduler.clone(),
    };
    RepairRunner::new(pool.clone(), default_jobs())
        .run(&repair_ctx)
        .await?;

    let misfire_window = Duration::from_secs(config.scheduler.misfire_window_secs);
    let pm_planner = Arc::new(ProgrammeMembershipPlanner::new(
        history.clone(),
        scheduler.clone(),
        in_app.clone(),
        actions,
        timezone,
        config.notifications.whitelist.clone(),
        misfire_window,
    ));
    let placement_planner = Arc::new(PlacementPlanner::new(
        history.clone(),
        scheduler.clone(),
        timezone,
        misfire_window,
    ));
    let ltft_planner = Arc::new(LtftPlanner::new(
        email.clone(),
        recipients.clone(),
        reference.clone(),
    ));
    let feedback = Arc::new(FeedbackService::new(history.clone(), email.clone()));

    let queues = &config.queues;
    let listeners: Vec<Arc<dyn QueueListener>> = vec![
        Arc::new(ProgrammeMembershipUpdatedListener::new(
            &queues.programme_membership_updated,
            pm_planner.clone(),
        )),
        Arc::new(ProgrammeMembershipDeletedListener::new(
            &queues.programme_membership_deleted,
            pm_planner,
        )),
        Arc::new(PlacementUpdatedListener::new(
            &queues.placement_updated,
            placement_planner.clone(),
        )),
        Arc::new(PlacementDeletedListener::new(
            &queues.placement_deleted,
            placement_planner,
        )),
        Arc::new(LtftUpdatedListener::new(
            &queues.ltft_updated,
            ltft_planner.clone(),
        )),
        Arc::new(LtftTpdListener::new(&queues.ltft_updated_tpd, ltft_planner)),
        Arc::new(EmailEventListener::new(&queues.email_event, feedback.clone())),
        Arc::new(ContactDetailsListener::new(
            &queues.contact_details_updated,
            feedback.clone(),
        )),
        Arc::new(AccountConfirmedListener::new(
            &queues.account_confirmed,
            scheduler.clone(),
            Duration::from_secs(config.notifications.immediate_delay_minutes * 60),
        )),
        Arc::new(AccountUpdatedListener::new(&queues.account_updated, feedback)),
        Arc::new(CojPublishedListener::new(
            &queues.coj_published,
            email.clone(),
            recipients.clone(),
        )),
        Arc::new(FormUpdatedListener::new(&queues.form_updated, in_app)),
        Arc::new(GmcUpdatedListener::new(
            &queues.gmc_updated,
            email.clone(),
            recipients.clone(),
        )),
        Arc::new(GmcRejectedListener::new(
            &queues.gmc_rejected,
            email,
            recipients,
            reference,
        )),
        Arc::new(OutboxListener::new(&queues.outbox, history)),
    ];

    let poll_interval = Duration::from_secs(queues.poll_interval_secs);
    for listener in listeners {
        tracing::info!(queue = listener.queue(), "starting queue listener");
        Arc::new(ListenerWorker::new(
            queue.clone(),
            listener,
            poll_interval,
            queues.max_attempts,
        ))
        .spawn();
    }

    let fire_loop = spawn_fire_loop(scheduler, executor)
        .await
        .map_err(|err| anyhow::anyhow!("failed to start scheduler fire loop: {err}"))?;
    fire_loop
        .start()
        .await
        .map_err(|err| anyhow::anyhow!("failed to start scheduler fire loop: {err}"))?;

    tracing::info!("notification orchestrator running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    Ok(())
}

/// Applies schema migrations and exits.
pub async fn migrate(config: &Config) -> Result<()> {
    tracing::info!("migrating notification database");
    let pool = traineehub_db::create_pool(&config.database.url, 1).await?;
    traineehub_db::migrate(&pool).await?;
    pool.close().await;
    tracing::info!("database initialized");

    Ok(())
}

/// Drops the database file and recreates it from scratch.
pub async fn reset(config: &Config) -> Result<()> {
    let path = config.database.url.trim_start_matches("sqlite://");
    if std::path::Path::new(path).exists() {
        std::fs::remove_file(path)?;
        tracing::info!(path, "dropped database");
    }

    migrate(config).await
}
