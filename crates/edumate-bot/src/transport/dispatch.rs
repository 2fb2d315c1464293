//! Update polling loop.
//!
//! Turns Bot API updates into inbound events and queues them per chat.
//! Each chat has one worker that handles its events in arrival order;
//! different chats are handled in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use edumate_attendance::{ChatId, Command, Coordinator, InboundEvent, MessageId, Payload};

use crate::config::DEFAULT_POLL_TIMEOUT;
use crate::types::{BotError, BotResult, Update};

use super::telegram::TelegramClient;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How long queued and in-flight events may run after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Split a message into a command or plain text. `/cmd@botname args`
/// becomes `cmd`; arguments are ignored.
pub fn parse_payload(text: &str) -> Payload {
    if let Some(rest) = text.trim_start().strip_prefix('/') {
        let word = rest.split_whitespace().next().unwrap_or_default();
        let name = word.split('@').next().unwrap_or_default();
        if !name.is_empty() {
            return Payload::Command(Command::from_name(name));
        }
    }
    Payload::Text(text.to_string())
}

/// Inbound event for an update, if it carries a text message.
pub fn to_event(update: &Update) -> Option<InboundEvent> {
    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?;
    Some(InboundEvent {
        chat_id: ChatId(message.chat.id),
        message_id: MessageId(message.message_id),
        payload: parse_payload(text),
    })
}

/// Per-chat event queues, each drained by its own worker task.
pub struct ChatQueues {
    coordinator: Arc<Coordinator>,
    senders: HashMap<ChatId, mpsc::UnboundedSender<InboundEvent>>,
    workers: JoinSet<()>,
}

impl ChatQueues {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            senders: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Queue an event behind everything already queued for its chat.
    pub fn push(&mut self, event: InboundEvent) {
        let chat = event.chat_id;
        let event = match self.senders.get(&chat) {
            Some(sender) => match sender.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => {
                    warn!(%chat, "chat worker stopped; restarting");
                    event
                }
            },
            None => event,
        };
        let sender = self.spawn_worker(chat);
        if sender.send(event).is_err() {
            error!(%chat, "dropped event for chat with no worker");
        }
        self.senders.insert(chat, sender);
    }

    /// Number of chats with a live worker.
    pub fn chats(&self) -> usize {
        self.senders.len()
    }

    /// Collect workers that have exited.
    pub fn reap(&mut self) {
        while let Some(joined) = self.workers.try_join_next() {
            if let Err(e) = joined {
                error!("chat worker failed: {e}");
            }
        }
    }

    /// Close every queue and wait for queued events to finish.
    pub async fn shutdown(self) {
        drop(self.senders);
        drain(self.workers).await;
    }

    fn spawn_worker(&mut self, chat: ChatId) -> mpsc::UnboundedSender<InboundEvent> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<InboundEvent>();
        let coordinator = Arc::clone(&self.coordinator);
        self.workers.spawn(async move {
            while let Some(event) = receiver.recv().await {
                if let Err(e) = coordinator.handle(event).await {
                    error!(%chat, "handler failed: {e}");
                }
            }
        });
        sender
    }
}

/// Long-polling dispatcher.
pub struct Dispatcher {
    client: Arc<TelegramClient>,
    coordinator: Arc<Coordinator>,
    poll_timeout: Duration,
}

impl Dispatcher {
    pub fn new(client: Arc<TelegramClient>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            client,
            coordinator,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Poll until `shutdown` resolves or the API rejects the token.
    pub async fn run<F>(self, shutdown: F) -> BotResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut queues = ChatQueues::new(Arc::clone(&self.coordinator));
        let mut offset: Option<i64> = None;
        let mut backoff = INITIAL_BACKOFF;

        info!("polling for updates");
        let result = loop {
            queues.reap();

            let polled = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break Ok(());
                }
                polled = self.client.get_updates(offset, self.poll_timeout) => polled,
            };

            match polled {
                Ok(updates) => {
                    backoff = INITIAL_BACKOFF;
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        if let Some(event) = to_event(&update) {
                            queues.push(event);
                        }
                    }
                }
                Err(e) if e.is_unauthorized() => {
                    error!("bot token rejected: {e}");
                    break Err(e);
                }
                Err(e) => {
                    let delay = retry_delay(&e, backoff);
                    warn!("polling failed: {e}; retrying in {}s", delay.as_secs());
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("shutdown requested");
                            break Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        };

        queues.shutdown().await;
        result
    }
}

fn retry_delay(err: &BotError, backoff: Duration) -> Duration {
    err.retry_after()
        .map(Duration::from_secs)
        .unwrap_or(backoff)
}

async fn drain(mut workers: JoinSet<()>) {
    if workers.is_empty() {
        return;
    }
    info!(chats = workers.len(), "waiting for queued requests");
    let finished = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if finished.is_err() {
        warn!(aborted = workers.len(), "aborting in-flight requests");
        workers.shutdown().await;
    }
}
