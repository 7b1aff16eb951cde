use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use temp_dir::TempDir;
use traineehub_history::{Broadcast, History, HistoryService, HistoryStore};
use traineehub_notify::client::{ContactsApi, DirectoryApi, ProfileApi};
use traineehub_notify::{
    EmailSender, LocalOfficeContact, MailTransport, NotifyError, RecipientResolver,
    TemplateRenderer, TemplateVersions,
};
use traineehub_planner::{LtftEvent, LtftPlanner};
use traineehub_shared::datetime::find_zone;
use traineehub_shared::{
    NotificationKind, NotificationStatus, Reference, ReferenceKind, TraineeProfile,
    UserAccountDetails,
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

struct FakeDirectory;

#[async_trait::async_trait]
impl DirectoryApi for FakeDirectory {
    async fn accounts_by_trainee(
        &self,
        trainee_id: &str,
    ) -> Result<Vec<UserAccountDetails>, NotifyError> {
        Ok(vec![UserAccountDetails {
            user_id: format!("account-{trainee_id}"),
            email: Some("trainee@example.com".to_string()),
            given_name: Some("Jan".to_string()),
            family_name: Some("Kowalski".to_string()),
        }])
    }

    async fn accounts_by_email(
        &self,
        _email: &str,
    ) -> Result<Vec<UserAccountDetails>, NotifyError> {
        Ok(Vec::new())
    }
}

struct FakeProfile;

#[async_trait::async_trait]
impl ProfileApi for FakeProfile {
    async fn account_details(
        &self,
        _trainee_id: &str,
    ) -> Result<Option<TraineeProfile>, NotifyError> {
        Ok(Some(TraineeProfile {
            title: Some("Dr".to_string()),
            gmc_number: Some("1234567".to_string()),
            ..Default::default()
        }))
    }
}

struct FakeContacts;

#[async_trait::async_trait]
impl ContactsApi for FakeContacts {
    async fn contact_list(&self, deanery: &str) -> Result<Vec<LocalOfficeContact>, NotifyError> {
        assert_eq!(deanery, "NHSE Thames Valley");
        Ok(vec![
            LocalOfficeContact {
                contact_type_name: Some("LTFT".to_string()),
                contact: Some("england.ltft.tv@nhs.net".to_string()),
            },
            LocalOfficeContact {
                contact_type_name: Some("TSS_SUPPORT".to_string()),
                contact: Some("https://support.example.com/tss".to_string()),
            },
        ])
    }
}

struct Fixture {
    planner: LtftPlanner,
    history: HistoryService,
    transport: Arc<RecordingTransport>,
}

async fn fixture(dir: &TempDir) -> Fixture {
    let path = dir.child("db.sqlite3");
    let pool = traineehub_db::create_pool(&format!("sqlite://{}", path.display()), 2)
        .await
        .unwrap();
    traineehub_db::migrate(&pool).await.unwrap();

    for (kind, block, source) in [
        ("ltft-submitted", "subject", "Your LTFT application was submitted"),
        (
            "ltft-submitted",
            "content",
            "Contact {{ contacts.LTFT.contact }} ({{ contacts.LTFT.classifiedType }})",
        ),
        ("ltft-submitted-tpd", "subject", "LTFT submitted for {{ familyName }}"),
        ("ltft-submitted-tpd", "content", "Dear {{ tpdName }}"),
        ("ltft-withdrawn", "subject", "LTFT application withdrawn"),
        ("ltft-withdrawn", "content", "Withdrawn"),
    ] {
        let template_dir = dir.path().join(format!("templates/email/{kind}/v1.0.0"));
        std::fs::create_dir_all(&template_dir).unwrap();
        std::fs::write(template_dir.join(format!("{block}.liquid")), source).unwrap();
    }

    let mut versions = HashMap::new();
    for key in [
        "ltft-submitted.email",
        "ltft-submitted-tpd.email",
        "ltft-withdrawn.email",
    ] {
        versions.insert(key.to_string(), "v1.0.0".to_string());
    }

    let history = HistoryService::new(HistoryStore::new(pool), Arc::new(NullBroadcast));
    let transport = Arc::new(RecordingTransport::default());
    let renderer = Arc::new(
        TemplateRenderer::new(
            dir.path().join("templates"),
            find_zone("Europe/London").unwrap(),
        )
        .unwrap(),
    );

    let email = Arc::new(EmailSender::new(
        history.clone(),
        renderer,
        TemplateVersions::new(versions),
        transport.clone(),
        Arc::new(traineehub_notify::FsObjectStore::new(dir.path().join("objects"))),
        "noreply@traineehub.example.com",
        "https://tss.example.com",
        true,
    ));

    let recipients = Arc::new(RecipientResolver::new(
        Arc::new(FakeDirectory),
        Arc::new(FakeProfile),
    ));

    Fixture {
        planner: LtftPlanner::new(email, recipients, Arc::new(FakeContacts)),
        history,
        transport,
    }
}

fn submitted_event() -> LtftEvent {
    serde_json::from_str(
        r#"{
            "traineeId": "P1",
            "formRef": "F7",
            "formName": "ltft7",
            "content": {
                "name": "My LTFT application",
                "programmeMembership": {
                    "designatedBodyCode": "1-DBC",
                    "managingDeanery": "NHSE Thames Valley"
                }
            },
            "discussions": {"tpdName": "Dr T. Director", "tpdEmail": "tpd@example.com"},
            "change": {"startDate": "2025-09-03", "wte": 0.8},
            "status": {
                "current": {
                    "state": "SUBMITTED",
                    "timestamp": "2025-03-01T09:00:00Z",
                    "detail": {"reason": "changePercentage", "message": "going to 80%"},
                    "modifiedBy": {"name": "Jan Kowalski", "role": "TRAINEE"}
                }
            }
        }"#,
    )
    .unwrap()
}

#[tokio::test]
async fn submitted_application_notifies_the_trainee_with_deanery_contacts() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;

    let history = fixture.planner.notify_trainee(&submitted_event()).await.unwrap();

    assert_eq!(history.kind, NotificationKind::LtftSubmitted);
    assert_eq!(history.status, NotificationStatus::Pending);
    assert_eq!(
        history.reference,
        Some(Reference::new(ReferenceKind::Ltft, "F7"))
    );

    let contacts = history.template.variables.get("contacts").unwrap();
    assert_eq!(
        contacts.pointer("/LTFT/contact").unwrap(),
        "england.ltft.tv@nhs.net"
    );
    assert_eq!(contacts.pointer("/LTFT/classifiedType").unwrap(), "EMAIL");
    assert_eq!(
        contacts.pointer("/TSS_SUPPORT/classifiedType").unwrap(),
        "URL"
    );
    // Types absent from the deanery list fall back to the TSS contact.
    assert_eq!(
        contacts.pointer("/LTFT_SUPPORT/contact").unwrap(),
        "https://support.example.com/tss"
    );

    // The reason code reaches the template as a readable phrase.
    let event_variable = history.template.variables.get("var").unwrap();
    assert_eq!(
        event_variable
            .pointer("/status/current/detail/reason")
            .unwrap(),
        "Change WTE percentage"
    );

    let messages = fixture.transport.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("To: trainee@example.com"));
    assert!(messages[0].contains("england.ltft.tv@nhs.net"));
    drop(messages);

    let stored = fixture
        .history
        .store()
        .find_by_id(&history.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.kind, NotificationKind::LtftSubmitted);
}

#[tokio::test]
async fn submitted_application_also_notifies_the_tpd() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;

    let history = fixture
        .planner
        .notify_tpd(&submitted_event())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(history.kind, NotificationKind::LtftSubmittedTpd);
    assert_eq!(history.contact.as_deref(), Some("tpd@example.com"));
    assert_eq!(
        history.template.variables.get("familyName").unwrap(),
        "Kowalski"
    );

    let messages = fixture.transport.messages.lock().unwrap();
    assert!(messages[0].contains("To: tpd@example.com"));
    assert!(messages[0].contains("Dear Dr T. Director"));
}

#[tokio::test]
async fn withdrawal_does_not_notify_the_tpd() {
    let dir = TempDir::new().unwrap();
    let fixture = fixture(&dir).await;

    let mut event = submitted_event();
    event.status.current.state = Some("WITHDRAWN".to_string());

    assert!(fixture.planner.notify_tpd(&event).await.unwrap().is_none());
    assert!(fixture.transport.messages.lock().unwrap().is_empty());

    // The trainee channel still fires for the withdrawal.
    let history = fixture.planner.notify_trainee(&event).await.unwrap();
    assert_eq!(history.kind, NotificationKind::LtftWithdrawn);
}
