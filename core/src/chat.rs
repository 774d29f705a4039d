//! Chat delivery tracking and the simulated peer reply
//!
//! Outbound messages walk `sending → sent → delivered → read`, one scheduled
//! callback per step. Each step is only scheduled once its predecessor fired,
//! so cancelling the pending step stops the whole chain. Reaching `read`
//! triggers the typing signal, which later inserts a peer reply.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::ChatConfig;
use crate::error::Result;
use crate::models::{Author, ConversationSnapshot, DeliveryState, Message, MessageBody};
use crate::notify::{Advisory, AdvisoryKind, Notifier};
use crate::random::RandomSource;
use crate::scheduler::{Scheduler, TimerId};

/// One chat panel's conversation. Dropping it tears it down.
pub struct Conversation {
    core: Arc<ChatCore>,
}

struct ChatCore {
    id: String,
    config: ChatConfig,
    scheduler: Scheduler,
    random: Arc<dyn RandomSource>,
    notifier: Arc<dyn Notifier>,
    updates: watch::Sender<ConversationSnapshot>,
    state: Mutex<ChatState>,
}

#[derive(Default)]
struct ChatState {
    messages: Vec<Message>,
    /// Index into `messages` by id.
    index: HashMap<String, usize>,
    /// The single in-flight transition of each outbound message.
    pending: HashMap<String, TimerId>,
    /// Outstanding peer reply; also what `is_peer_typing` reports.
    typing: Option<TimerId>,
    closed: bool,
}

impl ChatState {
    fn push(&mut self, message: Message) {
        self.index.insert(message.message_id.clone(), self.messages.len());
        self.messages.push(message);
    }
}

impl Conversation {
    pub fn new(
        config: ChatConfig,
        scheduler: Scheduler,
        random: Arc<dyn RandomSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        config.validate()?;

        let id = uuid::Uuid::new_v4().to_string();
        let (updates, _) = watch::channel(ConversationSnapshot {
            conversation_id: id.clone(),
            ..ConversationSnapshot::default()
        });

        tracing::debug!(conversation = %id, "Conversation opened");

        Ok(Self {
            core: Arc::new(ChatCore {
                id,
                config,
                scheduler,
                random,
                notifier,
                updates,
                state: Mutex::new(ChatState::default()),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Appends an outbound message in `sending` and starts its delivery chain.
    /// Returns `None` once the conversation is torn down.
    pub fn send_message(&self, body: impl Into<MessageBody>) -> Option<Message> {
        let body = body.into();
        let core = &self.core;
        let mut state = core.state.lock();
        if state.closed {
            tracing::debug!(conversation = %core.id, "Send ignored, conversation closed");
            return None;
        }

        let message = Message::new(&core.id, Author::Local, body);
        let upload = message.attachment.as_ref().map(|a| {
            Advisory::new(
                AdvisoryKind::FileUploaded,
                "File uploaded",
                format!("{} has been shared", a.display_name),
            )
        });

        state.push(message.clone());
        ChatCore::schedule_step(core, &mut state, &message.message_id, DeliveryState::Sending);
        core.publish(&state);
        drop(state);

        tracing::debug!(conversation = %core.id, message = %message.message_id, "Outbound message queued");
        if let Some(advisory) = upload {
            core.notifier.notify(advisory);
        }
        Some(message)
    }

    /// Appends a peer message, already `read`. Returns `None` once torn down.
    pub fn receive_message(&self, body: impl Into<MessageBody>) -> Option<Message> {
        let mut state = self.core.state.lock();
        if state.closed {
            return None;
        }
        let message = Message::new(&self.core.id, Author::Peer, body.into());
        state.push(message.clone());
        self.core.publish(&state);
        Some(message)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.core.snapshot(&self.core.state.lock())
    }

    /// Receives a fresh snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.core.updates.subscribe()
    }

    pub fn is_peer_typing(&self) -> bool {
        self.core.state.lock().typing.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.core.state.lock().closed
    }

    /// Number of timers (delivery steps and typing) still pending.
    pub fn pending_timers(&self) -> usize {
        self.core.scheduler.pending_for(&self.core.id)
    }

    /// Cancels every pending delivery step and the typing timer. Idempotent.
    pub fn teardown(&self) {
        self.core.teardown();
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

impl ChatCore {
    fn snapshot(&self, state: &ChatState) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.id.clone(),
            messages: state.messages.clone(),
            is_peer_typing: state.typing.is_some(),
        }
    }

    fn publish(&self, state: &ChatState) {
        self.updates.send_replace(self.snapshot(state));
    }

    fn teardown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.pending.clear();
        state.typing = None;
        let cancelled = self.scheduler.cancel_all_for(&self.id);
        tracing::debug!(conversation = %self.id, cancelled, "Conversation torn down");
    }

    /// Schedules the step out of `from` for one message.
    fn schedule_step(core: &Arc<Self>, state: &mut ChatState, message_id: &str, from: DeliveryState) {
        let delay = match from {
            DeliveryState::Sending => core.config.sent_delay(),
            DeliveryState::Sent => core.config.delivered_delay(),
            DeliveryState::Delivered => core.config.read_delay(),
            DeliveryState::Read => return,
        };

        let owner = Arc::clone(core);
        let target = message_id.to_string();
        let timer = core
            .scheduler
            .schedule_once(&core.id, delay, move || ChatCore::advance(&owner, &target));
        state.pending.insert(message_id.to_string(), timer);
    }

    fn advance(core: &Arc<Self>, message_id: &str) {
        let mut state = core.state.lock();
        if state.closed {
            return;
        }
        if state.pending.remove(message_id).is_none() {
            return;
        }
        let Some(&position) = state.index.get(message_id) else {
            return;
        };

        let message = &mut state.messages[position];
        let Some(next) = message.delivery_state.next() else {
            return;
        };
        message.delivery_state = next;
        let had_attachment = message.attachment.is_some();

        tracing::debug!(conversation = %core.id, message = message_id, state = ?next, "Delivery state advanced");

        if next.is_final() {
            ChatCore::start_typing(core, &mut state, had_attachment);
        } else {
            ChatCore::schedule_step(core, &mut state, message_id, next);
        }
        core.publish(&state);
    }

    /// Starts the typing indicator unless a reply is already on its way.
    fn start_typing(core: &Arc<Self>, state: &mut ChatState, for_attachment: bool) {
        if state.typing.is_some() {
            tracing::debug!(conversation = %core.id, "Reply already pending, trigger ignored");
            return;
        }

        let delay = core.config.typing_delay(core.random.next_f64());
        let owner = Arc::clone(core);
        let timer = core.scheduler.schedule_once(&core.id, delay, move || {
            ChatCore::deliver_reply(&owner, for_attachment)
        });
        state.typing = Some(timer);
        tracing::debug!(conversation = %core.id, ?delay, "Peer typing");
    }

    fn deliver_reply(core: &Arc<Self>, for_attachment: bool) {
        let mut state = core.state.lock();
        if state.closed || state.typing.take().is_none() {
            return;
        }

        let candidates = core.config.reply_candidates(for_attachment);
        let reply = candidates[core.random.pick(candidates.len())].clone();
        let message = Message::new(&core.id, Author::Peer, MessageBody::text(reply));
        state.push(message);
        core.publish(&state);
    }
}
