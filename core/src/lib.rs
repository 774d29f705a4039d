//! Consultation Core Library
//!
//! Session subsystem of a telehealth consultation: chat delivery tracking
//! with a simulated peer, and the audio/video call lifecycle.
//! Provides: scheduler, chat, call, models, config.

pub mod call;
pub mod chat;
pub mod config;
pub mod devices;
pub mod error;
pub mod models;
pub mod notify;
pub mod quality;
pub mod random;
pub mod scheduler;

use std::sync::Arc;
use tokio::sync::watch;

pub use call::{CallContext, CallController, CallSession};
pub use chat::Conversation;
pub use config::*;
pub use devices::*;
pub use error::*;
pub use models::*;
pub use notify::*;
pub use random::*;
pub use scheduler::{Scheduler, TimerId};

/// One consultation: a chat panel and at most one call, sharing a scheduler,
/// random source and notifier. Dropping it tears both down.
pub struct Consultation {
    config: ConsultationConfig,
    conversation: Conversation,
    calls: CallController,
}

/// Builds a [`Consultation`] with injected collaborators. Anything not set
/// falls back to the runtime's scheduler, OS randomness, simulated devices
/// driven by the configured failure rate, and log output.
pub struct ConsultationBuilder {
    config: ConsultationConfig,
    scheduler: Option<Scheduler>,
    random: Option<Arc<dyn RandomSource>>,
    devices: Option<Arc<dyn MediaDevices>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ConsultationBuilder {
    pub fn new(config: ConsultationConfig) -> Self {
        Self {
            config,
            scheduler: None,
            random: None,
            devices: None,
            notifier: None,
        }
    }

    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    pub fn devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<Consultation> {
        self.config.validate()?;

        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Scheduler::current()?,
        };
        let random = self.random.unwrap_or_else(|| Arc::new(ThreadRandom));
        let devices = self.devices.unwrap_or_else(|| {
            Arc::new(SimulatedDevices::new(
                self.config.call.setup_failure_rate,
                Arc::clone(&random),
            ))
        });
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));

        let conversation = Conversation::new(
            self.config.chat.clone(),
            scheduler.clone(),
            Arc::clone(&random),
            Arc::clone(&notifier),
        )?;
        let calls = CallController::new(CallContext {
            config: self.config.call.clone(),
            scheduler,
            random,
            devices,
            notifier,
        })?;

        tracing::info!(conversation = %conversation.id(), "Consultation started");

        Ok(Consultation {
            config: self.config,
            conversation,
            calls,
        })
    }
}

impl Consultation {
    /// Uses defaults for every collaborator. Must run inside a tokio runtime.
    pub fn new(config: ConsultationConfig) -> Result<Self> {
        ConsultationBuilder::new(config).build()
    }

    pub fn builder(config: ConsultationConfig) -> ConsultationBuilder {
        ConsultationBuilder::new(config)
    }

    pub fn config(&self) -> &ConsultationConfig {
        &self.config
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn calls(&self) -> &CallController {
        &self.calls
    }

    // ========================================================================
    // Chat
    // ========================================================================

    pub fn send_message(&self, body: impl Into<MessageBody>) -> Option<Message> {
        self.conversation.send_message(body)
    }

    pub fn receive_message(&self, body: impl Into<MessageBody>) -> Option<Message> {
        self.conversation.receive_message(body)
    }

    pub fn conversation_snapshot(&self) -> ConversationSnapshot {
        self.conversation.snapshot()
    }

    pub fn subscribe_conversation(&self) -> watch::Receiver<ConversationSnapshot> {
        self.conversation.subscribe()
    }

    // ========================================================================
    // Calls
    // ========================================================================

    pub fn open_call(&self, medium: CallMedium) -> Option<CallSnapshot> {
        self.calls.open_call(medium)
    }

    pub fn toggle_mic(&self) -> bool {
        self.calls.toggle(CallControl::Mic)
    }

    pub fn toggle_speaker(&self) -> bool {
        self.calls.toggle(CallControl::Speaker)
    }

    pub fn toggle_video(&self) -> bool {
        self.calls.toggle(CallControl::Video)
    }

    pub fn toggle_recording(&self) -> bool {
        self.calls.toggle(CallControl::Recording)
    }

    pub fn toggle_screen_share(&self) -> bool {
        self.calls.toggle(CallControl::ScreenShare)
    }

    pub fn set_volume(&self, level: i32) -> Option<u8> {
        self.calls.set_volume(level)
    }

    pub fn switch_medium(&self) -> Option<CallMedium> {
        self.calls.switch_medium()
    }

    pub fn end_call(&self) -> bool {
        self.calls.end_call()
    }

    pub fn retry_call(&self) -> Option<CallSnapshot> {
        self.calls.retry_call()
    }

    pub fn dismiss_call(&self) {
        self.calls.dismiss_call()
    }

    pub fn call_snapshot(&self) -> Option<CallSnapshot> {
        self.calls.snapshot()
    }

    pub fn subscribe_call(&self) -> watch::Receiver<Option<CallSnapshot>> {
        self.calls.subscribe()
    }

    /// Cancels every outstanding timer of the chat and the call. Idempotent.
    pub fn teardown(&self) {
        self.conversation.teardown();
        self.calls.teardown();
    }
}
