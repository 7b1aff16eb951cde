use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use temp_dir::TempDir;
use time::OffsetDateTime;
use traineehub_history::{Broadcast, History, HistoryService, HistoryStore, TemplateInfo};
use traineehub_notify::client::ActionsApi;
use traineehub_notify::{InAppSender, NotifyError, TemplateVersions};
use traineehub_planner::ProgrammeMembershipPlanner;
use traineehub_scheduler::{JobStore, Scheduler};
use traineehub_shared::datetime::{find_zone, local_midnight, localise};
use traineehub_shared::{
    Action, Channel, ConditionsOfJoining, Curriculum, NotificationKind, NotificationStatus,
    ProgrammeMembership, Reference, ReferenceKind,
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

struct FakeActions(Vec<Action>);

#[async_trait::async_trait]
impl ActionsApi for FakeActions {
    async fn actions(
        &self,
        _person_id: &str,
        _programme_id: &str,
    ) -> Result<Vec<Action>, NotifyError> {
        Ok(self.0.clone())
    }
}

struct Fixture {
    planner: ProgrammeMembershipPlanner,
    history: HistoryService,
    jobs: JobStore,
}

fn versions() -> TemplateVersions {
    let mut map = HashMap::new();
    for kind in NotificationKind::in_app_programme_kinds() {
        map.insert(
            TemplateVersions::key(kind, Channel::InApp),
            "v1.0.0".to_string(),
        );
    }
    TemplateVersions::new(map)
}

async fn fixture_with_actions(dir: &TempDir, actions: Vec<Action>) -> Fixture {
    let path = dir.child("db.sqlite3");
    let pool = traineehub_db::create_pool(&format!("sqlite://{}", path.display()), 2)
        .await
        .unwrap();
    traineehub_db::migrate(&pool).await.unwrap();

    let timezone = find_zone("Europe/London").unwrap();
    let history = HistoryService::new(HistoryStore::new(pool.clone()), Arc::new(NullBroadcast));
    let jobs = JobStore::new(pool);
    let scheduler = Arc::new(Scheduler::new(jobs.clone(), timezone));
    let in_app = Arc::new(InAppSender::new(history.clone(), versions(), true));

    let planner = ProgrammeMembershipPlanner::new(
        history.clone(),
        scheduler,
        in_app,
        Arc::new(FakeActions(actions)),
        timezone,
        Vec::new(),
        Duration::from_secs(3600),
    );

    Fixture {
        planner,
        history,
        jobs,
    }
}

async fn fixture(dir: &TempDir) -> Fixture {
    fixture_with_actions(dir, Vec::new()).await
}

fn today() -> time::Date {
    localise(OffsetDateTime::now_utc(), find_zone("Europe/London").unwrap()).date()
}

fn membership(start_in_days: i64) -> ProgrammeMembership {
    ProgrammeMembership {
        tis_id: "PM1".to_string(),
        person_id: "P1".to_string(),
        programme_name: Some("Cardiology".to_string()),
        start_date: Some(today() + time::Duration::days(start_in_days)),
        conditions_of_joining: Some(ConditionsOfJoining {
            synced_at: Some(OffsetDateTime::now_utc()),
        }),
        curricula: Some(vec![Curriculum {
            curriculum_sub_type: Some("MEDICAL_CURRICULUM".to_string()),
            curriculum_specialty: Some("CARDIOLOGY".to_string()),
        }]),
        ..Default::default()
    }
}

#[tokio::test]
async fn future_programme_plans_every_milestone_and_in_app_row() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;
    let membership = membership(100);
    let timezone = find_zone("Europe/London").unwrap();

    fixture.planner.plan(&membership).await.unwrap();

    // Four milestone jobs, anchored 56/28/7/0 days before the start date.
    for (kind, offset) in [
        (NotificationKind::ProgrammeUpdatedWeek8, 44),
        (NotificationKind::ProgrammeUpdatedWeek4, 72),
        (NotificationKind::ProgrammeUpdatedWeek1, 93),
        (NotificationKind::ProgrammeUpdatedWeek0, 100),
    ] {
        let job = fixture
            .jobs
            .find(&format!("{kind}-PM1"))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("missing job for {kind}"));
        let expected = local_midnight(today() + time::Duration::days(offset), timezone);
        assert_eq!(job.fire_at, expected, "fire instant for {kind}");
        assert_eq!(job.data["personId"], "P1");
    }

    let rows = fixture
        .history
        .store()
        .find_all_for_reference("P1", ReferenceKind::ProgrammeMembership, "PM1")
        .await
        .unwrap();
    assert_eq!(rows.len(), 6);

    for kind in [
        NotificationKind::EPortfolio,
        NotificationKind::IndemnityInsurance,
        NotificationKind::Ltft,
        NotificationKind::Deferral,
        NotificationKind::Sponsorship,
    ] {
        let row = rows.iter().find(|row| row.kind == kind).unwrap();
        assert_eq!(row.status, NotificationStatus::Unread);
        assert_eq!(row.channel, Channel::InApp);
    }

    let day_one = rows
        .iter()
        .find(|row| row.kind == NotificationKind::DayOne)
        .unwrap();
    assert_eq!(day_one.status, NotificationStatus::Scheduled);
    assert_eq!(
        day_one.sent_at.unwrap(),
        local_midnight(today() + time::Duration::days(100), timezone)
    );
}

#[tokio::test]
async fn replanning_the_same_snapshot_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;
    let membership = membership(100);

    fixture.planner.plan(&membership).await.unwrap();
    fixture.planner.plan(&membership).await.unwrap();

    let rows = fixture
        .history
        .store()
        .find_all_for_reference("P1", ReferenceKind::ProgrammeMembership, "PM1")
        .await
        .unwrap();
    assert_eq!(rows.len(), 6);
}

#[tokio::test]
async fn excluded_memberships_only_prune() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;
    let mut membership = membership(100);
    fixture.planner.plan(&membership).await.unwrap();

    // The same membership loses its medical curriculum: everything pending
    // is withdrawn and nothing new is planned.
    membership.curricula = Some(vec![Curriculum {
        curriculum_sub_type: Some("DENTAL_CURRICULUM".to_string()),
        curriculum_specialty: None,
    }]);
    fixture.planner.plan(&membership).await.unwrap();

    for kind in NotificationKind::programme_milestones() {
        assert!(fixture.jobs.find(&kind.job_id("PM1")).await.unwrap().is_none());
    }

    let rows = fixture
        .history
        .store()
        .find_all_for_reference("P1", ReferenceKind::ProgrammeMembership, "PM1")
        .await
        .unwrap();
    // The unread in-app rows survive; only scheduled rows are withdrawn.
    assert!(rows
        .iter()
        .all(|row| row.status == NotificationStatus::Unread));
}

#[tokio::test]
async fn deleting_a_membership_prunes_pending_but_keeps_the_audit() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;

    let sent = History::new(
        "P1",
        Some(Reference::new(ReferenceKind::ProgrammeMembership, "PM1")),
        NotificationKind::ProgrammeUpdatedWeek8,
        Channel::Email,
        TemplateInfo::new(NotificationKind::ProgrammeUpdatedWeek8, "v1.0.0"),
        NotificationStatus::Sent,
        Some(OffsetDateTime::now_utc() - time::Duration::days(10)),
    );
    fixture.history.save(&sent).await.unwrap();

    let membership = membership(100);
    fixture.planner.plan(&membership).await.unwrap();
    fixture.planner.handle_deleted("P1", "PM1").await.unwrap();

    for kind in NotificationKind::programme_milestones() {
        assert!(fixture.jobs.find(&kind.job_id("PM1")).await.unwrap().is_none());
    }

    let rows = fixture
        .history
        .store()
        .find_all_for_reference("P1", ReferenceKind::ProgrammeMembership, "PM1")
        .await
        .unwrap();
    assert!(rows.iter().any(|row| row.id == sent.id));
    assert!(rows
        .iter()
        .all(|row| row.status != NotificationStatus::Scheduled));
}

#[tokio::test]
async fn only_the_newest_missed_milestone_fires() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;
    // Three days out: weeks eight, four and one have all been missed.
    let membership = membership(3);

    fixture.planner.plan(&membership).await.unwrap();

    assert!(fixture
        .jobs
        .find(&NotificationKind::ProgrammeUpdatedWeek8.job_id("PM1"))
        .await
        .unwrap()
        .is_none());
    assert!(fixture
        .jobs
        .find(&NotificationKind::ProgrammeUpdatedWeek4.job_id("PM1"))
        .await
        .unwrap()
        .is_none());

    // The newest missed milestone fires an hour out.
    let week_1 = fixture
        .jobs
        .find(&NotificationKind::ProgrammeUpdatedWeek1.job_id("PM1"))
        .await
        .unwrap()
        .unwrap();
    let delta = week_1.fire_at - OffsetDateTime::now_utc();
    assert!(delta > time::Duration::minutes(59));
    assert!(delta <= time::Duration::minutes(61));

    // The still-future day-zero milestone keeps its anchor.
    let week_0 = fixture
        .jobs
        .find(&NotificationKind::ProgrammeUpdatedWeek0.job_id("PM1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        week_0.fire_at,
        local_midnight(
            today() + time::Duration::days(3),
            find_zone("Europe/London").unwrap()
        )
    );
}

#[tokio::test]
async fn sent_milestones_are_never_rescheduled() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;

    let sent = History::new(
        "P1",
        Some(Reference::new(ReferenceKind::ProgrammeMembership, "PM1")),
        NotificationKind::ProgrammeUpdatedWeek8,
        Channel::Email,
        TemplateInfo::new(NotificationKind::ProgrammeUpdatedWeek8, "v1.0.0"),
        NotificationStatus::Sent,
        Some(OffsetDateTime::now_utc() - time::Duration::days(40)),
    );
    fixture.history.save(&sent).await.unwrap();

    fixture.planner.plan(&membership(100)).await.unwrap();

    assert!(fixture
        .jobs
        .find(&NotificationKind::ProgrammeUpdatedWeek8.job_id("PM1"))
        .await
        .unwrap()
        .is_none());
    assert!(fixture
        .jobs
        .find(&NotificationKind::ProgrammeUpdatedWeek4.job_id("PM1"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn unsigned_coj_suppresses_in_app_rows_but_still_writes_them() {
    let dir = TempDir::new().unwrap();
    let pending_coj = Action {
        action_type: Some(Action::SIGN_COJ.to_string()),
        due_by: None,
        completed: None,
    };
    let fixture = fixture_with_actions(&dir, vec![pending_coj]).await;

    let mut membership = membership(100);
    membership.conditions_of_joining = None;
    fixture.planner.plan(&membership).await.unwrap();

    let rows = fixture
        .history
        .store()
        .find_all_for_reference("P1", ReferenceKind::ProgrammeMembership, "PM1")
        .await
        .unwrap();
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|row| {
        row.template.variables.get("suppressed") == Some(&serde_json::Value::Bool(true))
    }));
}
