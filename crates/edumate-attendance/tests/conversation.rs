//! Conversation coordinator tests with a recording transport and a scripted
//! extractor.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use edumate_attendance::conversation::messages;
use edumate_attendance::*;

const CHAT: ChatId = ChatId(42);

// ─────────────────────── recording transport ───────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text {
        id: MessageId,
        text: String,
        format: TextFormat,
    },
    Edit {
        id: MessageId,
        text: String,
        format: TextFormat,
    },
    Delete(MessageId),
    Photo {
        path: PathBuf,
        existed: bool,
    },
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicI64,
    fail_deletes: bool,
}

impl RecordingTransport {
    fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } | Sent::Edit { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn last_text(&self) -> String {
        self.texts().pop().unwrap_or_default()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(
        &self,
        _chat_id: ChatId,
        text: &str,
        format: TextFormat,
    ) -> AttendanceResult<MessageId> {
        let id = MessageId(1000 + self.next_id.fetch_add(1, Ordering::SeqCst));
        self.sent.lock().unwrap().push(Sent::Text {
            id,
            text: text.to_string(),
            format,
        });
        Ok(id)
    }

    async fn edit_text(
        &self,
        _chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        format: TextFormat,
    ) -> AttendanceResult<()> {
        self.sent.lock().unwrap().push(Sent::Edit {
            id: message_id,
            text: text.to_string(),
            format,
        });
        Ok(())
    }

    async fn delete_message(&self, _chat_id: ChatId, message_id: MessageId) -> AttendanceResult<()> {
        if self.fail_deletes {
            return Err(AttendanceError::Transport("message can't be deleted".into()));
        }
        self.sent.lock().unwrap().push(Sent::Delete(message_id));
        Ok(())
    }

    async fn send_photo(&self, _chat_id: ChatId, path: &Path) -> AttendanceResult<MessageId> {
        self.sent.lock().unwrap().push(Sent::Photo {
            path: path.to_path_buf(),
            existed: path.exists(),
        });
        Ok(MessageId(1))
    }
}

// ─────────────────────── scripted extractor ───────────────────────

enum Plan {
    Succeed(&'static str, &'static str),
    SoftWithScreenshot(&'static str),
    Hard,
    Panic,
}

struct ScriptedExtractor {
    plan: Plan,
    screenshot_dir: PathBuf,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, String)>>,
    delay: Duration,
}

impl ScriptedExtractor {
    fn new(plan: Plan, screenshot_dir: &Path) -> Self {
        Self {
            plan,
            screenshot_dir: screenshot_dir.to_path_buf(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn write_screenshot(&self, name: &str) -> PathBuf {
        let path = self.screenshot_dir.join(name);
        std::fs::write(&path, b"\x89PNG").unwrap();
        path
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, credentials: &Credentials) -> ExtractionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((
            credentials.email.clone(),
            credentials.password.expose().to_string(),
        ));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.plan {
            Plan::Succeed(attendance, od) => ExtractionOutcome::Success(AttendanceReport {
                email: credentials.email.clone(),
                attendance: MetricValue::from_text(attendance),
                od: MetricValue::from_text(od),
            }),
            Plan::SoftWithScreenshot(message) => ExtractionOutcome::SoftFailure {
                message: message.to_string(),
                screenshot: Some(self.write_screenshot("error_a@b.com_tab.png")),
            },
            Plan::Hard => ExtractionOutcome::HardFailure {
                cause: AttendanceError::Browser("target crashed".into()),
                screenshot: Some(self.write_screenshot("error_a@b.com_exception.png")),
            },
            Plan::Panic => panic!("renderer blew up"),
        }
    }
}

// ─────────────────────── helpers ───────────────────────

struct Harness {
    coordinator: Arc<Coordinator>,
    transport: Arc<RecordingTransport>,
    registry: Arc<MemoryRegistry>,
    extractor: Arc<ScriptedExtractor>,
    dir: tempfile::TempDir,
}

fn harness(plan: Plan) -> Harness {
    build(plan, RecordingTransport::default(), MemoryRegistry::new(), Duration::ZERO)
}

fn registered(plan: Plan) -> Harness {
    build(
        plan,
        RecordingTransport::default(),
        MemoryRegistry::with_users([("42", "a@b.com")]),
        Duration::ZERO,
    )
}

fn build(
    plan: Plan,
    transport: RecordingTransport,
    registry: MemoryRegistry,
    delay: Duration,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(transport);
    let registry = Arc::new(registry);
    let mut extractor = ScriptedExtractor::new(plan, dir.path());
    extractor.delay = delay;
    let extractor = Arc::new(extractor);
    let coordinator = Arc::new(Coordinator::new(
        transport.clone(),
        registry.clone(),
        extractor.clone(),
        Arc::new(SessionStore::new()),
    ));
    Harness {
        coordinator,
        transport,
        registry,
        extractor,
        dir,
    }
}

fn command(id: i64, command: Command) -> InboundEvent {
    InboundEvent {
        chat_id: CHAT,
        message_id: MessageId(id),
        payload: Payload::Command(command),
    }
}

fn text(id: i64, body: &str) -> InboundEvent {
    InboundEvent {
        chat_id: CHAT,
        message_id: MessageId(id),
        payload: Payload::Text(body.to_string()),
    }
}

impl Harness {
    async fn send(&self, event: InboundEvent) {
        self.coordinator.handle(event).await.unwrap();
    }

    async fn state(&self) -> ChatState {
        self.coordinator.sessions().state(CHAT).await
    }

    fn leftover_files(&self) -> usize {
        std::fs::read_dir(self.dir.path()).unwrap().count()
    }
}

// ─────────────────────── registration ───────────────────────

#[tokio::test]
async fn test_registration_then_fetch() {
    let h = harness(Plan::Succeed("92%", "5%"));

    h.send(command(1, Command::Start)).await;
    assert_eq!(h.state().await, ChatState::AwaitingEmail);
    assert_eq!(h.transport.last_text(), messages::WELCOME_NEW);

    h.send(text(2, "x")).await;
    assert_eq!(h.state().await, ChatState::AwaitingEmail);
    assert_eq!(h.transport.last_text(), messages::INVALID_EMAIL);

    h.send(text(3, "  a@b.com ")).await;
    assert_eq!(h.state().await, ChatState::AwaitingPassword);
    assert_eq!(h.registry.lookup(CHAT).await.unwrap().as_deref(), Some("a@b.com"));

    h.send(text(4, "p")).await;
    assert_eq!(h.state().await, ChatState::Idle);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.extractor.seen.lock().unwrap()[0],
        ("a@b.com".to_string(), "p".to_string())
    );
    assert!(h.transport.sent().contains(&Sent::Delete(MessageId(4))));
}

#[tokio::test]
async fn test_start_when_registered_welcomes_back() {
    let h = registered(Plan::Succeed("1%", "1%"));
    h.send(command(1, Command::Start)).await;

    assert_eq!(h.state().await, ChatState::Idle);
    assert!(h.transport.last_text().contains("a@b.com"));
    assert!(h.transport.last_text().contains("/attendance"));
}

#[tokio::test]
async fn test_registry_keeps_other_chats() {
    let h = build(
        Plan::Succeed("1%", "1%"),
        RecordingTransport::default(),
        MemoryRegistry::with_users([("7", "other@b.com")]),
        Duration::ZERO,
    );
    h.send(command(1, Command::Start)).await;
    h.send(text(2, "a@b.com")).await;

    let users = h.registry.load().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users["7"], "other@b.com");
    assert_eq!(users["42"], "a@b.com");
}

// ─────────────────────── attendance requests ───────────────────────

#[tokio::test]
async fn test_attendance_unregistered() {
    let h = harness(Plan::Succeed("1%", "1%"));
    h.send(command(1, Command::Attendance)).await;

    assert_eq!(h.state().await, ChatState::Idle);
    assert_eq!(h.transport.last_text(), messages::NOT_REGISTERED);
}

#[tokio::test]
async fn test_attendance_registered_prompts_for_password() {
    let h = registered(Plan::Succeed("1%", "1%"));
    h.send(command(1, Command::Attendance)).await;

    assert_eq!(h.state().await, ChatState::AwaitingPassword);
    assert_eq!(
        h.transport.sent(),
        vec![Sent::Text {
            id: MessageId(1000),
            text: messages::PASSWORD_PROMPT.to_string(),
            format: TextFormat::Markdown,
        }]
    );
}

#[tokio::test]
async fn test_plain_text_attendance_keyword() {
    let h = registered(Plan::Succeed("1%", "1%"));
    h.send(text(1, "Attendance")).await;
    assert_eq!(h.state().await, ChatState::AwaitingPassword);
}

#[tokio::test]
async fn test_unrecognized_input_when_idle() {
    let h = registered(Plan::Succeed("1%", "1%"));
    h.send(text(1, "hello there")).await;
    assert_eq!(h.state().await, ChatState::Idle);
    assert_eq!(h.transport.last_text(), messages::NOT_UNDERSTOOD);

    h.send(command(2, Command::Unknown("settings".into()))).await;
    assert_eq!(h.transport.last_text(), messages::NOT_UNDERSTOOD);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_help_lists_commands() {
    let h = harness(Plan::Succeed("1%", "1%"));
    h.send(command(1, Command::Help)).await;
    let help = h.transport.last_text();
    assert!(help.contains("/start"));
    assert!(help.contains("/attendance"));
    assert_eq!(h.state().await, ChatState::Idle);
}

#[tokio::test]
async fn test_commands_override_pending_password() {
    let h = registered(Plan::Succeed("1%", "1%"));
    h.send(command(1, Command::Attendance)).await;
    h.send(command(2, Command::Start)).await;

    assert_eq!(h.state().await, ChatState::Idle);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

// ─────────────────────── outcomes ───────────────────────

#[tokio::test]
async fn test_success_edits_status_with_summary() {
    let h = registered(Plan::Succeed("92%", ""));
    h.send(command(1, Command::Attendance)).await;
    h.transport.clear();
    h.send(text(2, "secret")).await;

    let sent = h.transport.sent();
    assert_eq!(sent[0], Sent::Delete(MessageId(2)));
    let status = match &sent[1] {
        Sent::Text { id, text, .. } => {
            assert_eq!(text, messages::FETCHING);
            *id
        }
        other => panic!("expected status message, got {other:?}"),
    };
    assert_eq!(
        sent[2],
        Sent::Edit {
            id: status,
            text: "*Student:* a@b.com\n*Attendance:* 92%\n*OD Percentage:* N/A".to_string(),
            format: TextFormat::Markdown,
        }
    );
    assert_eq!(sent.len(), 3);
    assert_eq!(h.leftover_files(), 0);
    assert!(h.transport.texts().iter().all(|t| !t.contains("secret")));
}

#[tokio::test]
async fn test_soft_failure_sends_then_removes_screenshot() {
    let h = registered(Plan::SoftWithScreenshot("Could not find Attendance tab."));
    h.send(command(1, Command::Attendance)).await;
    h.send(text(2, "secret")).await;

    let sent = h.transport.sent();
    assert!(sent.iter().any(|s| matches!(
        s,
        Sent::Edit { text, .. } if text.starts_with("Error: Could not find Attendance tab.")
    )));
    let photo = sent.iter().find_map(|s| match s {
        Sent::Photo { path, existed } => Some((path.clone(), *existed)),
        _ => None,
    });
    let (path, existed) = photo.expect("screenshot was sent");
    assert!(existed);
    assert!(!path.exists());
    assert_eq!(h.leftover_files(), 0);
    assert_eq!(h.state().await, ChatState::Idle);
}

#[tokio::test]
async fn test_hard_failure_reports_error_and_cleans_up() {
    let h = registered(Plan::Hard);
    h.send(command(1, Command::Attendance)).await;
    h.send(text(2, "secret")).await;

    assert_eq!(
        h.transport.last_text(),
        "An error occurred: Browser error: target crashed"
    );
    assert!(!h
        .transport
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::Photo { .. })));
    assert_eq!(h.leftover_files(), 0);
    assert_eq!(h.state().await, ChatState::Idle);
}

#[tokio::test]
async fn test_extractor_panic_becomes_error_reply() {
    let h = registered(Plan::Panic);
    h.send(command(1, Command::Attendance)).await;
    h.send(text(2, "secret")).await;

    assert!(h.transport.last_text().starts_with("An error occurred:"));
    assert_eq!(h.state().await, ChatState::Idle);
}

#[tokio::test]
async fn test_delete_failure_does_not_block_fetch() {
    let h = build(
        Plan::Succeed("80%", "2%"),
        RecordingTransport::failing_deletes(),
        MemoryRegistry::with_users([("42", "a@b.com")]),
        Duration::ZERO,
    );
    h.send(command(1, Command::Attendance)).await;
    h.send(text(2, "secret")).await;

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert!(h.transport.last_text().contains("80%"));
}

#[tokio::test]
async fn test_registration_lost_before_password() {
    let h = harness(Plan::Succeed("1%", "1%"));
    {
        let mut state = h.coordinator.sessions().acquire(CHAT).await;
        *state = ChatState::AwaitingPassword;
    }
    h.send(text(1, "secret")).await;

    assert_eq!(h.transport.last_text(), messages::MISSING_REGISTRATION);
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.state().await, ChatState::Idle);
}

// ─────────────────────── registry failures ───────────────────────

struct BrokenRegistry;

#[async_trait]
impl UserRegistry for BrokenRegistry {
    async fn load(&self) -> AttendanceResult<std::collections::BTreeMap<String, String>> {
        Err(AttendanceError::Registry("failed to parse users.json".into()))
    }

    async fn save(&self, _chat_id: ChatId, _email: &str) -> AttendanceResult<()> {
        Err(AttendanceError::Registry("read-only file system".into()))
    }
}

fn with_broken_registry() -> (Arc<Coordinator>, Arc<RecordingTransport>) {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let coordinator = Arc::new(Coordinator::new(
        transport.clone(),
        Arc::new(BrokenRegistry),
        Arc::new(ScriptedExtractor::new(Plan::Succeed("1%", "1%"), dir.path())),
        Arc::new(SessionStore::new()),
    ));
    (coordinator, transport)
}

#[tokio::test]
async fn test_unreadable_registry_on_start_replies() {
    let (coordinator, transport) = with_broken_registry();
    coordinator.handle(command(1, Command::Start)).await.unwrap();

    assert_eq!(transport.last_text(), messages::TRY_AGAIN);
    assert_eq!(coordinator.sessions().state(CHAT).await, ChatState::Idle);
}

#[tokio::test]
async fn test_unreadable_registry_on_attendance_replies() {
    let (coordinator, transport) = with_broken_registry();
    coordinator.handle(command(1, Command::Attendance)).await.unwrap();
    coordinator.handle(text(2, "attendance")).await.unwrap();

    assert_eq!(
        transport.texts(),
        vec![messages::TRY_AGAIN.to_string(), messages::TRY_AGAIN.to_string()]
    );
    assert_eq!(coordinator.sessions().state(CHAT).await, ChatState::Idle);
}

#[tokio::test]
async fn test_failed_email_save_keeps_waiting_for_email() {
    let (coordinator, transport) = with_broken_registry();
    {
        let mut state = coordinator.sessions().acquire(CHAT).await;
        *state = ChatState::AwaitingEmail;
    }
    coordinator.handle(text(1, "a@b.com")).await.unwrap();

    assert_eq!(transport.last_text(), messages::TRY_AGAIN);
    assert_eq!(coordinator.sessions().state(CHAT).await, ChatState::AwaitingEmail);
}

// ─────────────────────── concurrency ───────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_chat_password_is_used_once() {
    let h = build(
        Plan::Succeed("1%", "1%"),
        RecordingTransport::default(),
        MemoryRegistry::with_users([("42", "a@b.com")]),
        Duration::from_millis(50),
    );
    h.send(command(1, Command::Attendance)).await;

    let first = tokio::spawn({
        let c = Arc::clone(&h.coordinator);
        async move { c.handle(text(2, "one")).await }
    });
    let second = tokio::spawn({
        let c = Arc::clone(&h.coordinator);
        async move { c.handle(text(3, "two")).await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
    assert!(h.transport.texts().contains(&messages::NOT_UNDERSTOOD.to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chats_fetch_in_parallel() {
    let h = build(
        Plan::Succeed("1%", "1%"),
        RecordingTransport::default(),
        MemoryRegistry::with_users([("1", "one@b.com"), ("2", "two@b.com")]),
        Duration::from_millis(300),
    );
    for chat in [ChatId(1), ChatId(2)] {
        let mut state = h.coordinator.sessions().acquire(chat).await;
        *state = ChatState::AwaitingPassword;
    }

    let started = std::time::Instant::now();
    let tasks: Vec<_> = [1, 2]
        .into_iter()
        .map(|n| {
            let c = Arc::clone(&h.coordinator);
            tokio::spawn(async move {
                c.handle(InboundEvent {
                    chat_id: ChatId(n),
                    message_id: MessageId(10),
                    payload: Payload::Text("pw".into()),
                })
                .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < Duration::from_millis(550));
}
