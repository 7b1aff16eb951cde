use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use temp_dir::TempDir;
use time::macros::datetime;
use traineehub_db::queue::{MessageQueue, SqliteQueue};
use traineehub_history::{
    Broadcast, History, HistoryService, HistoryStore, OutboxSender, TemplateInfo,
};
use traineehub_notify::{
    EmailSender, FsObjectStore, MailTransport, NotifyError, TemplateRenderer, TemplateVersions,
};
use traineehub_repair::{default_jobs, RepairContext, RepairJob, RepairRunner};
use traineehub_scheduler::{JobStore, Scheduler};
use traineehub_shared::datetime::find_zone;
use traineehub_shared::{
    Channel, NotificationKind, NotificationStatus, Reference, ReferenceKind,
};

struct NullBroadcast;

#[async_trait::async_trait]
impl Broadcast for NullBroadcast {
    async fn publish(&self, _history: &History) -> anyhow::Result<()> {
        Ok(())
    }

    async fn publish_deleted(&self, _id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTransport {
    messages: Mutex<Vec<String>>,
}

impl MailTransport for RecordingTransport {
    fn send(&self, message: &lettre::Message) -> Result<(), NotifyError> {
        self.messages
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&message.formatted()).to_string());
        Ok(())
    }
}

struct Fixture {
    runner: RepairRunner,
    ctx: RepairContext,
    history: HistoryService,
    queue: Arc<SqliteQueue>,
    jobs: JobStore,
    transport: Arc<RecordingTransport>,
}

async fn fixture(dir: &TempDir) -> Fixture {
    let path = dir.child("db.sqlite3");
    let pool = traineehub_db::create_pool(&format!("sqlite://{}", path.display()), 2)
        .await
        .unwrap();
    traineehub_db::migrate(&pool).await.unwrap();

    let template_dir = dir.path().join("templates/email/welcome/v1.0.0");
    std::fs::create_dir_all(&template_dir).unwrap();
    std::fs::write(template_dir.join("subject.liquid"), "s").unwrap();
    std::fs::write(template_dir.join("content.liquid"), "c").unwrap();

    let mut versions = HashMap::new();
    versions.insert("welcome.email".to_string(), "v1.0.0".to_string());

    let history = HistoryService::new(HistoryStore::new(pool.clone()), Arc::new(NullBroadcast));
    let queue = Arc::new(SqliteQueue::new(pool.clone(), Duration::from_secs(30)));
    let transport = Arc::new(RecordingTransport::default());
    let timezone = find_zone("Europe/London").unwrap();

    let email = Arc::new(EmailSender::new(
        history.clone(),
        Arc::new(
            TemplateRenderer::new(dir.path().join("templates"), timezone).unwrap(),
        ),
        TemplateVersions::new(versions),
        transport.clone(),
        Arc::new(FsObjectStore::new(dir.path().join("objects"))),
        "noreply@traineehub.example.com",
        "https://tss.example.com",
        true,
    ));

    let jobs = JobStore::new(pool.clone());
    let ctx = RepairContext {
        history: history.clone(),
        outbox: Arc::new(OutboxSender::new(queue.clone(), "outbox")),
        email,
        scheduler: Arc::new(Scheduler::new(jobs.clone(), timezone)),
    };

    Fixture {
        runner: RepairRunner::new(pool, default_jobs()),
        ctx,
        history,
        queue,
        jobs,
        transport,
    }
}

fn row(
    kind: NotificationKind,
    status: NotificationStatus,
    sent_at: time::OffsetDateTime,
) -> History {
    History::new(
        "P1",
        Some(Reference::new(ReferenceKind::ProgrammeMembership, "PM1")),
        kind,
        Channel::Email,
        TemplateInfo::new(kind, "v1.0.0"),
        status,
        Some(sent_at),
    )
    .with_contact(Some("jan@example.com".to_string()))
}

#[tokio::test]
async fn repairs_apply_once_in_order() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;

    let obsolete = row(
        NotificationKind::ProgrammeCreated,
        NotificationStatus::Sent,
        datetime!(2024-01-01 09:00:00 UTC),
    );
    let legacy_kind = row(
        NotificationKind::LtftSubmittedTrainee,
        NotificationStatus::Sent,
        datetime!(2024-06-01 09:00:00 UTC),
    );
    let missed = row(
        NotificationKind::ProgrammeUpdatedWeek0,
        NotificationStatus::Scheduled,
        datetime!(2025-04-29 23:59:59 UTC),
    );
    let upcoming = row(
        NotificationKind::ProgrammeUpdatedWeek1,
        NotificationStatus::Scheduled,
        datetime!(2025-05-01 00:00:00 UTC),
    );
    for history in [&obsolete, &legacy_kind, &missed, &upcoming] {
        fixture.history.save(history).await.unwrap();
    }

    fixture.runner.run(&fixture.ctx).await.unwrap();

    // Obsolete kinds are gone entirely.
    assert!(fixture.history.store().find_by_id(&obsolete.id).await.unwrap().is_none());

    // Legacy LTFT kind is rewritten in place.
    let rewritten = fixture
        .history
        .store()
        .find_by_id(&legacy_kind.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rewritten.kind, NotificationKind::LtftSubmitted);
    assert_eq!(rewritten.template.name, "ltft-submitted");

    // Past-due scheduled rows fail with the missed-schedule detail; future
    // ones are untouched.
    let missed = fixture.history.store().find_by_id(&missed.id).await.unwrap().unwrap();
    assert_eq!(missed.status, NotificationStatus::Failed);
    assert_eq!(
        missed.status_detail.as_deref(),
        Some(traineehub_repair::MISSED_SCHEDULE_DETAIL)
    );
    let upcoming = fixture
        .history
        .store()
        .find_by_id(&upcoming.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(upcoming.status, NotificationStatus::Scheduled);

    // The full-history broadcast went through the outbox.
    assert!(!fixture.queue.receive("outbox", 10).await.unwrap().is_empty());

    // A second run must not repeat anything: a fresh legacy row survives.
    let fresh_legacy = row(
        NotificationKind::LtftSubmittedTrainee,
        NotificationStatus::Sent,
        datetime!(2025-06-01 09:00:00 UTC),
    );
    fixture.history.save(&fresh_legacy).await.unwrap();
    fixture.runner.run(&fixture.ctx).await.unwrap();

    let untouched = fixture
        .history
        .store()
        .find_by_id(&fresh_legacy.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.kind, NotificationKind::LtftSubmittedTrainee);
}

#[tokio::test]
async fn transient_outage_failures_are_replayed() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;

    // An instant kind failed transiently during the outage window.
    let mut instant = row(
        NotificationKind::Welcome,
        NotificationStatus::Failed,
        datetime!(2025-03-11 09:00:00 UTC),
    );
    instant.contact = Some("jan@nhs.net".to_string());
    instant.status_detail = Some("Bounce: Transient - General".to_string());
    fixture.history.save(&instant).await.unwrap();

    // A milestone kind failed the same way; it goes back to the scheduler.
    let mut milestone = row(
        NotificationKind::ProgrammeUpdatedWeek4,
        NotificationStatus::Failed,
        datetime!(2025-03-11 10:00:00 UTC),
    );
    milestone.contact = Some("jan@nhs.net".to_string());
    milestone.status_detail = Some("Bounce: Transient - General".to_string());
    fixture.history.save(&milestone).await.unwrap();

    // A permanent failure in the window is left alone.
    let mut permanent = row(
        NotificationKind::Welcome,
        NotificationStatus::Failed,
        datetime!(2025-03-11 11:00:00 UTC),
    );
    permanent.contact = Some("other@nhs.net".to_string());
    permanent.status_detail = Some("Bounce: Permanent - General".to_string());
    fixture.history.save(&permanent).await.unwrap();

    fixture.runner.run(&fixture.ctx).await.unwrap();

    // The instant kind was re-sent to its stored address.
    let resent = fixture.history.store().find_by_id(&instant.id).await.unwrap().unwrap();
    assert_eq!(resent.status, NotificationStatus::Pending);
    assert_eq!(fixture.transport.messages.lock().unwrap().len(), 1);

    // The milestone kind is rescheduled and its failed row removed.
    assert!(fixture
        .jobs
        .find("PROGRAMME_UPDATED_WEEK_4-PM1")
        .await
        .unwrap()
        .is_some());
    assert!(fixture
        .history
        .store()
        .find_by_id(&milestone.id)
        .await
        .unwrap()
        .is_none());

    let untouched = fixture
        .history
        .store()
        .find_by_id(&permanent.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, NotificationStatus::Failed);
}

struct FailingJob;

#[async_trait::async_trait]
impl RepairJob for FailingJob {
    fn id(&self) -> &'static str {
        "0001-always-fails"
    }

    async fn execute(&self, _ctx: &RepairContext) -> anyhow::Result<()> {
        anyhow::bail!("bulk step failed")
    }
}

struct CountingJob(Arc<Mutex<usize>>);

#[async_trait::async_trait]
impl RepairJob for CountingJob {
    fn id(&self) -> &'static str {
        "0002-counts"
    }

    async fn execute(&self, _ctx: &RepairContext) -> anyhow::Result<()> {
        *self.0.lock().unwrap() += 1;
        Ok(())
    }
}

#[tokio::test]
async fn a_failing_repair_never_blocks_the_rest() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;
    let count = Arc::new(Mutex::new(0));

    let runner = RepairRunner::new(
        traineehub_db::create_pool(
            &format!("sqlite://{}", dir.child("db.sqlite3").display()),
            2,
        )
        .await
        .unwrap(),
        vec![Box::new(FailingJob), Box::new(CountingJob(count.clone()))],
    );

    runner.run(&fixture.ctx).await.unwrap();
    assert_eq!(*count.lock().unwrap(), 1);

    // The failed job is retried next run, the applied one is not.
    runner.run(&fixture.ctx).await.unwrap();
    assert_eq!(*count.lock().unwrap(), 1);
}
