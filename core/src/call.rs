//! Call session lifecycle
//!
//! A session is `connecting` until the setup delay elapses, then either
//! `connected` or `failed`. `ended` is reached only through `end`. Terminal
//! phases never change again; retrying or switching medium builds a new
//! session instead of reviving an old one.

use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::CallConfig;
use crate::devices::MediaDevices;
use crate::error::Result;
use crate::models::{
    format_duration, CallControl, CallControls, CallMedium, CallPhase, CallSnapshot, LinkQuality,
};
use crate::notify::{Advisory, AdvisoryKind, Notifier};
use crate::quality::QualitySampler;
use crate::random::RandomSource;
use crate::scheduler::{Scheduler, TimerId};

type Updates = Arc<watch::Sender<Option<CallSnapshot>>>;

/// Collaborators shared by every session a controller creates.
#[derive(Clone)]
pub struct CallContext {
    pub config: CallConfig,
    pub scheduler: Scheduler,
    pub random: Arc<dyn RandomSource>,
    pub devices: Arc<dyn MediaDevices>,
    pub notifier: Arc<dyn Notifier>,
}

// ============================================================================
// Session
// ============================================================================

/// One audio or video call. Dropping it cancels its timers.
pub struct CallSession {
    core: Arc<CallCore>,
}

struct CallCore {
    id: String,
    medium: CallMedium,
    context: CallContext,
    updates: Updates,
    state: Mutex<CallState>,
}

struct CallState {
    phase: CallPhase,
    sampler: QualitySampler,
    controls: CallControls,
    volume: u8,
    elapsed_seconds: u64,
    connected_at: Option<Instant>,
    failure_reason: Option<String>,
    setup_timer: Option<TimerId>,
    clock_timer: Option<TimerId>,
    sample_timer: Option<TimerId>,
    closed: bool,
}

impl CallState {
    fn is_live(&self) -> bool {
        !self.closed && self.phase == CallPhase::Connected
    }

    /// Whole seconds since connecting, read off the clock rather than counted,
    /// so a tick and an end landing on the same instant agree.
    fn sync_elapsed(&mut self) {
        if let Some(connected_at) = self.connected_at {
            let seconds = connected_at.elapsed().as_secs();
            self.elapsed_seconds = self.elapsed_seconds.max(seconds);
        }
    }
}

impl CallSession {
    /// Creates a session in `connecting` and schedules its setup.
    pub(crate) fn start(medium: CallMedium, context: CallContext, updates: Updates) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let state = CallState {
            phase: CallPhase::Connecting,
            sampler: QualitySampler::new(context.config.thresholds),
            controls: CallControls::for_medium(medium),
            volume: context.config.initial_volume.min(100),
            elapsed_seconds: 0,
            connected_at: None,
            failure_reason: None,
            setup_timer: None,
            clock_timer: None,
            sample_timer: None,
            closed: false,
        };

        let core = Arc::new(CallCore {
            id,
            medium,
            context,
            updates,
            state: Mutex::new(state),
        });

        {
            let mut state = core.state.lock();
            let owner = Arc::clone(&core);
            let delay = core.context.config.setup_delay();
            let timer = core
                .context
                .scheduler
                .schedule_once(&core.id, delay, move || CallCore::finish_setup(&owner));
            state.setup_timer = Some(timer);
            core.publish(&state);
        }

        tracing::info!(call = %core.id, %medium, "Call connecting");
        Self { core }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn medium(&self) -> CallMedium {
        self.core.medium
    }

    pub fn phase(&self) -> CallPhase {
        self.core.state.lock().phase
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.core.snapshot(&self.core.state.lock())
    }

    /// Timers still scheduled for this session (setup, clock, sampler).
    pub fn pending_timers(&self) -> usize {
        self.core.context.scheduler.pending_for(&self.core.id)
    }

    /// Flips one control. Ignored unless connected; returns whether it applied.
    pub fn toggle(&self, control: CallControl) -> bool {
        let core = &self.core;
        let mut state = core.state.lock();
        if !state.is_live() {
            tracing::debug!(call = %core.id, ?control, phase = ?state.phase, "Toggle ignored");
            return false;
        }
        let enabled = state.controls.flip(control);
        core.publish(&state);
        drop(state);

        let advisory = match (control, enabled) {
            (CallControl::Recording, true) => Some(Advisory::new(
                AdvisoryKind::RecordingStarted,
                "Recording started",
                "This consultation is being recorded",
            )),
            (CallControl::Recording, false) => Some(Advisory::new(
                AdvisoryKind::RecordingStopped,
                "Recording stopped",
                "The recording has been saved to the consultation",
            )),
            (CallControl::ScreenShare, true) => Some(Advisory::new(
                AdvisoryKind::ScreenShareStarted,
                "Screen sharing",
                "You are now sharing your screen",
            )),
            (CallControl::ScreenShare, false) => Some(Advisory::new(
                AdvisoryKind::ScreenShareStopped,
                "Screen sharing stopped",
                "Your screen is no longer shared",
            )),
            _ => None,
        };
        if let Some(advisory) = advisory {
            core.context.notifier.notify(advisory);
        }
        true
    }

    /// Sets the volume, clamped to `[0, 100]`. Ignored unless connected.
    pub fn set_volume(&self, level: i32) -> Option<u8> {
        let mut state = self.core.state.lock();
        if !state.is_live() {
            return None;
        }
        let volume = level.clamp(0, 100) as u8;
        state.volume = volume;
        self.core.publish(&state);
        Some(volume)
    }

    /// Ends a connected call. Returns false in any other phase.
    pub fn end(&self) -> bool {
        self.core.end(true)
    }

    /// Cancels every timer without changing the phase. Idempotent.
    pub fn teardown(&self) {
        self.core.teardown();
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.core.teardown();
    }
}

impl CallCore {
    fn snapshot(&self, state: &CallState) -> CallSnapshot {
        CallSnapshot {
            call_id: self.id.clone(),
            medium: self.medium,
            phase: state.phase,
            link_quality: state.sampler.current(),
            controls: state.controls,
            volume: state.volume,
            elapsed_seconds: state.elapsed_seconds,
            failure_reason: state.failure_reason.clone(),
        }
    }

    fn publish(&self, state: &CallState) {
        if state.closed {
            return;
        }
        self.updates.send_replace(Some(self.snapshot(state)));
    }

    fn cancel_timers(&self, state: &mut CallState) {
        let owned = [
            state.setup_timer.take(),
            state.clock_timer.take(),
            state.sample_timer.take(),
        ];
        for timer in owned.into_iter().flatten() {
            self.context.scheduler.cancel(&self.id, timer);
        }
        self.context.scheduler.cancel_all_for(&self.id);
    }

    fn teardown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        self.cancel_timers(&mut state);
        state.closed = true;
        tracing::debug!(call = %self.id, phase = ?state.phase, "Call torn down");
    }

    fn finish_setup(core: &Arc<Self>) {
        let mut state = core.state.lock();
        if state.closed || state.phase != CallPhase::Connecting {
            return;
        }
        state.setup_timer = None;

        let advisory = match core.context.devices.acquire(core.medium) {
            Ok(()) => {
                state.phase = CallPhase::Connected;
                state.elapsed_seconds = 0;
                state.connected_at = Some(Instant::now());
                CallCore::start_clock(core, &mut state);
                CallCore::start_sampler(core, &mut state);
                tracing::info!(call = %core.id, medium = %core.medium, "Call connected");
                Advisory::new(
                    AdvisoryKind::CallConnected,
                    "Connected",
                    format!("Your {} consultation has started", core.medium),
                )
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(call = %core.id, %reason, "Call setup failed");
                state.phase = CallPhase::Failed;
                state.failure_reason = Some(reason.clone());
                core.cancel_timers(&mut state);
                Advisory::new(AdvisoryKind::CallFailed, "Call failed", reason)
            }
        };
        core.publish(&state);
        drop(state);

        core.advise(advisory);
    }

    /// Delivers a timer-driven advisory unless the session was torn down
    /// since the callback released its lock.
    fn advise(&self, advisory: Advisory) {
        if self.state.lock().closed {
            tracing::debug!(call = %self.id, kind = ?advisory.kind, "Advisory dropped, call torn down");
            return;
        }
        self.context.notifier.notify(advisory);
    }

    fn start_clock(core: &Arc<Self>, state: &mut CallState) {
        let owner = Arc::clone(core);
        let timer = core.context.scheduler.schedule_repeating(
            &core.id,
            std::time::Duration::from_secs(1),
            move || {
                let mut state = owner.state.lock();
                if !state.is_live() {
                    return ControlFlow::Break(());
                }
                state.sync_elapsed();
                owner.publish(&state);
                ControlFlow::Continue(())
            },
        );
        state.clock_timer = Some(timer);
    }

    fn start_sampler(core: &Arc<Self>, state: &mut CallState) {
        let owner = Arc::clone(core);
        let period = core.context.config.sample_interval(core.medium);
        let timer = core
            .context
            .scheduler
            .schedule_repeating(&core.id, period, move || owner.sample_quality());
        state.sample_timer = Some(timer);
    }

    fn sample_quality(&self) -> ControlFlow<()> {
        let mut state = self.state.lock();
        if !state.is_live() {
            return ControlFlow::Break(());
        }

        let previous = state.sampler.current();
        let sample = state.sampler.sample(self.context.random.next_f64());
        if sample.quality != previous {
            tracing::debug!(call = %self.id, from = ?previous, to = ?sample.quality, "Link quality changed");
            self.publish(&state);
        }
        drop(state);

        if sample.degraded {
            self.advise(Advisory::new(
                AdvisoryKind::PoorConnection,
                "Poor connection",
                "Your connection is unstable. Audio or video may be interrupted.",
            ));
        }
        ControlFlow::Continue(())
    }

    fn end(&self, notify: bool) -> bool {
        let mut state = self.state.lock();
        if !state.is_live() {
            return false;
        }
        state.sync_elapsed();
        state.phase = CallPhase::Ended;
        self.cancel_timers(&mut state);
        self.publish(&state);
        let elapsed = state.elapsed_seconds;
        drop(state);

        tracing::info!(call = %self.id, elapsed, "Call ended");
        if notify {
            self.context.notifier.notify(Advisory::new(
                AdvisoryKind::CallEnded,
                "Call ended",
                format!("Duration {}", format_duration(elapsed)),
            ));
        }
        true
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Owns at most one session at a time and implements the retry, cancel and
/// medium switch flows on top of it.
pub struct CallController {
    context: CallContext,
    updates: Updates,
    inner: Mutex<ControllerState>,
}

#[derive(Default)]
struct ControllerState {
    current: Option<CallSession>,
    closed: bool,
}

impl CallController {
    pub fn new(context: CallContext) -> Result<Self> {
        context.config.validate()?;
        let (updates, _) = watch::channel(None);
        Ok(Self {
            context,
            updates: Arc::new(updates),
            inner: Mutex::new(ControllerState::default()),
        })
    }

    /// Receives the current call snapshot, `None` when there is no call.
    pub fn subscribe(&self) -> watch::Receiver<Option<CallSnapshot>> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.inner.lock().current.as_ref().map(CallSession::snapshot)
    }

    pub fn pending_timers(&self) -> usize {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(CallSession::pending_timers)
            .unwrap_or(0)
    }

    /// Starts a new call, discarding any previous session.
    pub fn open_call(&self, medium: CallMedium) -> Option<CallSnapshot> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        Some(self.replace(&mut inner, medium))
    }

    fn replace(&self, inner: &mut ControllerState, medium: CallMedium) -> CallSnapshot {
        if let Some(previous) = inner.current.take() {
            previous.teardown();
        }
        let session = CallSession::start(medium, self.context.clone(), Arc::clone(&self.updates));
        let snapshot = session.snapshot();
        inner.current = Some(session);
        snapshot
    }

    /// Ends a connected call. A call still connecting is abandoned and
    /// cleared. Terminal sessions are left as they are.
    pub fn end_call(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some(session) = inner.current.as_ref() else {
            return false;
        };
        match session.phase() {
            CallPhase::Connected => session.end(),
            CallPhase::Connecting => {
                session.teardown();
                inner.current = None;
                self.updates.send_replace(None);
                tracing::info!("Call abandoned while connecting");
                true
            }
            CallPhase::Ended | CallPhase::Failed => false,
        }
    }

    /// Ends the current session and reconnects with the other medium.
    pub fn switch_medium(&self) -> Option<CallMedium> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        let session = inner.current.as_ref()?;
        if session.phase().is_terminal() {
            return None;
        }
        let medium = session.medium().other();
        session.core.end(false);
        tracing::info!(to = %medium, "Switching call medium");
        self.replace(&mut inner, medium);
        Some(medium)
    }

    /// Replaces a failed session with a fresh one of the same medium.
    pub fn retry_call(&self) -> Option<CallSnapshot> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        let medium = match inner.current.as_ref() {
            Some(session) if session.phase() == CallPhase::Failed => session.medium(),
            _ => return None,
        };
        Some(self.replace(&mut inner, medium))
    }

    /// Discards the current session, whatever its phase.
    pub fn dismiss_call(&self) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.current.take() {
            session.teardown();
            self.updates.send_replace(None);
        }
    }

    pub fn toggle(&self, control: CallControl) -> bool {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(|s| s.toggle(control))
            .unwrap_or(false)
    }

    pub fn set_volume(&self, level: i32) -> Option<u8> {
        self.inner.lock().current.as_ref()?.set_volume(level)
    }

    pub fn link_quality(&self) -> Option<LinkQuality> {
        self.snapshot().map(|s| s.link_quality)
    }

    /// Cancels the current session's timers and refuses new calls. The last
    /// snapshot stays readable. Idempotent.
    pub fn teardown(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(session) = inner.current.as_ref() {
            session.teardown();
        }
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        self.teardown();
    }
}
