//! Integration tests for consultation sessions
//!
//! All tests run on a paused clock: sleeping advances simulated time and
//! fires every timer due on the way, in deadline order.

use std::sync::Arc;
use std::time::Duration;

use consult_core::{
    AdvisoryKind, Attachment, CallMedium, CallPhase, CollectingNotifier, Consultation,
    ConsultationConfig, DeliveryState, Error, LinkQuality, MessageBody, Scheduler, ScriptedRandom,
    SeededRandom,
};
use tokio::time;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn consultation_with(random: Arc<ScriptedRandom>) -> (Consultation, Arc<CollectingNotifier>) {
    let notifier = Arc::new(CollectingNotifier::new());
    let consultation = Consultation::builder(ConsultationConfig::default())
        .random(random)
        .notifier(notifier.clone())
        .build()
        .unwrap();
    (consultation, notifier)
}

fn consultation() -> (Consultation, Arc<CollectingNotifier>) {
    consultation_with(Arc::new(ScriptedRandom::constant(0.0)))
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_hello_gets_read_and_one_reply() {
    let (consultation, _) = consultation();

    let hello = consultation.send_message("hello").unwrap();
    let snapshot = consultation.conversation_snapshot();
    assert_eq!(
        snapshot.message(&hello.message_id).unwrap().delivery_state,
        DeliveryState::Sending
    );

    time::sleep(Duration::from_secs(10)).await;

    let snapshot = consultation.conversation_snapshot();
    assert_eq!(
        snapshot.message(&hello.message_id).unwrap().delivery_state,
        DeliveryState::Read
    );
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.inbound_count(), 1);
    assert!(!snapshot.is_peer_typing);
    assert_eq!(consultation.conversation().pending_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delivery_visits_every_state_once() {
    let (consultation, _) = consultation();
    let mut updates = consultation.subscribe_conversation();
    let msg = consultation.send_message("how long until my results?").unwrap();

    let mut history = Vec::new();
    let mut typing_intervals = 0;
    let mut was_typing = false;
    let deadline = time::Instant::now() + Duration::from_secs(10);

    while time::Instant::now() < deadline {
        tokio::select! {
            changed = updates.changed() => {
                changed.unwrap();
                let snapshot = updates.borrow_and_update().clone();
                let state = snapshot.message(&msg.message_id).unwrap().delivery_state;
                if history.last() != Some(&state) {
                    history.push(state);
                }
                if snapshot.is_peer_typing && !was_typing {
                    typing_intervals += 1;
                }
                if !snapshot.is_peer_typing && was_typing {
                    // Typing ends in the same update that inserts the reply.
                    assert_eq!(snapshot.inbound_count(), 1);
                }
                was_typing = snapshot.is_peer_typing;
            }
            _ = time::sleep_until(deadline) => break,
        }
    }

    assert_eq!(
        history,
        vec![
            DeliveryState::Sending,
            DeliveryState::Sent,
            DeliveryState::Delivered,
            DeliveryState::Read
        ]
    );
    assert_eq!(typing_intervals, 1);
    assert!(!was_typing);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_mid_chain_freezes_delivery() {
    let (consultation, _) = consultation();
    let msg = consultation.send_message("hello").unwrap();

    time::sleep(Duration::from_millis(700)).await;
    let frozen = consultation.conversation_snapshot();
    assert_eq!(
        frozen.message(&msg.message_id).unwrap().delivery_state,
        DeliveryState::Sent
    );

    consultation.teardown();
    assert_eq!(consultation.conversation().pending_timers(), 0);

    time::sleep(Duration::from_secs(30)).await;
    assert_eq!(consultation.conversation_snapshot(), frozen);

    consultation.teardown();
}

#[tokio::test(start_paused = true)]
async fn test_interleaved_chains_are_independent() {
    let (consultation, _) = consultation();
    let first = consultation.send_message("first").unwrap();
    time::sleep(Duration::from_millis(250)).await;
    let second = consultation
        .send_message(MessageBody::text("see attached").with_attachment(Attachment::from_locator("rash.png")))
        .unwrap();

    // first: sent at 0.5s, second: sent at 0.75s
    time::sleep(Duration::from_millis(600)).await;
    let snapshot = consultation.conversation_snapshot();
    assert_eq!(snapshot.message(&first.message_id).unwrap().delivery_state, DeliveryState::Sent);
    assert_eq!(snapshot.message(&second.message_id).unwrap().delivery_state, DeliveryState::Sent);

    time::sleep(Duration::from_secs(10)).await;
    let snapshot = consultation.conversation_snapshot();
    for id in [&first.message_id, &second.message_id] {
        assert_eq!(snapshot.message(id).unwrap().delivery_state, DeliveryState::Read);
    }
    // The second read lands while the first reply is still typing.
    assert_eq!(snapshot.inbound_count(), 1);
    assert_eq!(snapshot.messages[0].message_id, first.message_id);
    assert_eq!(snapshot.messages[1].message_id, second.message_id);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_messages_never_change() {
    let (consultation, _) = consultation();
    let greeting = consultation
        .receive_message("Good morning, I'm reviewing your intake form now.")
        .unwrap();
    assert_eq!(greeting.delivery_state, DeliveryState::Read);

    time::sleep(Duration::from_secs(20)).await;
    assert_eq!(consultation.conversation_snapshot().messages, vec![greeting]);
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_audio_call_ended_after_ten_seconds() {
    let random = Arc::new(ScriptedRandom::constant(0.0));
    let (consultation, notifier) = consultation_with(random.clone());

    let opened = consultation.open_call(CallMedium::Audio).unwrap();
    assert_eq!(opened.phase, CallPhase::Connecting);
    assert_eq!(opened.elapsed_seconds, 0);

    time::sleep(Duration::from_millis(2600)).await;
    assert_eq!(consultation.call_snapshot().unwrap().phase, CallPhase::Connected);

    time::sleep(Duration::from_secs(10)).await;
    assert!(consultation.end_call());

    let ended = consultation.call_snapshot().unwrap();
    assert_eq!(ended.phase, CallPhase::Ended);
    assert_eq!(ended.elapsed_seconds, 10);
    assert_eq!(consultation.calls().pending_timers(), 0);

    let advisories = notifier.advisories();
    let last = advisories.last().unwrap();
    assert_eq!(last.kind, AdvisoryKind::CallEnded);
    assert_eq!(last.description, "Duration 00:10");

    // No sampler ticks after the end: nothing draws and nothing changes.
    random.push(0.99);
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(random.remaining(), 1);
    assert_eq!(consultation.call_snapshot().unwrap(), ended);
    assert!(!consultation.end_call());
}

#[tokio::test(start_paused = true)]
async fn test_call_phases_follow_a_single_path() {
    let (consultation, _) = consultation();
    let mut updates = consultation.subscribe_call();
    consultation.open_call(CallMedium::Video).unwrap();

    let mut phases = Vec::new();
    let mut last_elapsed = 0;
    let end_at = time::Instant::now() + Duration::from_secs(8);
    let stop_at = end_at + Duration::from_secs(5);
    let mut ended = false;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                changed.unwrap();
                let Some(snapshot) = updates.borrow_and_update().clone() else { continue };
                if phases.last() != Some(&snapshot.phase) {
                    phases.push(snapshot.phase);
                }
                assert!(snapshot.elapsed_seconds >= last_elapsed);
                if snapshot.phase == CallPhase::Connecting {
                    assert_eq!(snapshot.elapsed_seconds, 0);
                }
                last_elapsed = snapshot.elapsed_seconds;
            }
            _ = time::sleep_until(end_at), if !ended => {
                ended = true;
                assert!(consultation.end_call());
            }
            _ = time::sleep_until(stop_at) => break,
        }
    }

    assert_eq!(
        phases,
        vec![CallPhase::Connecting, CallPhase::Connected, CallPhase::Ended]
    );
    assert_eq!(last_elapsed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_controls_only_respond_when_connected() {
    let (consultation, _) = consultation();
    let connecting = consultation.open_call(CallMedium::Video).unwrap();

    assert!(!consultation.toggle_mic());
    assert!(!consultation.toggle_speaker());
    assert!(!consultation.toggle_video());
    assert!(!consultation.toggle_recording());
    assert!(!consultation.toggle_screen_share());
    assert_eq!(consultation.set_volume(42), None);
    assert_eq!(consultation.call_snapshot().unwrap(), connecting);

    time::sleep(Duration::from_secs(3)).await;

    assert!(consultation.toggle_video());
    assert!(consultation.toggle_screen_share());
    let controls = consultation.call_snapshot().unwrap().controls;
    assert!(!controls.video_enabled);
    assert!(controls.is_screen_sharing);
    assert!(!controls.mic_muted && !controls.speaker_muted && !controls.is_recording);

    assert_eq!(consultation.set_volume(-5), Some(0));
    assert_eq!(consultation.set_volume(500), Some(100));
    assert_eq!(consultation.set_volume(42), Some(42));
}

#[tokio::test(start_paused = true)]
async fn test_failed_setup_retry_and_cancel() {
    let notifier = Arc::new(CollectingNotifier::new());
    let mut config = ConsultationConfig::default();
    config.call.setup_failure_rate = 1.0;
    let consultation = Consultation::builder(config)
        .random(Arc::new(SeededRandom::new(42)))
        .notifier(notifier.clone())
        .build()
        .unwrap();
    assert_eq!(consultation.config().call.setup_failure_rate, 1.0);

    consultation.open_call(CallMedium::Video).unwrap();
    time::sleep(Duration::from_secs(3)).await;

    let failed = consultation.call_snapshot().unwrap();
    assert_eq!(failed.phase, CallPhase::Failed);
    assert!(failed.failure_reason.is_some());
    assert_eq!(notifier.count(AdvisoryKind::CallFailed), 1);

    let retried = consultation.retry_call().unwrap();
    assert_ne!(retried.call_id, failed.call_id);
    assert_eq!(retried.phase, CallPhase::Connecting);

    time::sleep(Duration::from_secs(3)).await;
    assert_eq!(consultation.call_snapshot().unwrap().phase, CallPhase::Failed);

    consultation.dismiss_call();
    assert!(consultation.call_snapshot().is_none());
    assert!(consultation.subscribe_call().borrow().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_video_sampling_raises_one_advisory_per_drop() {
    let random = Arc::new(ScriptedRandom::constant(0.0));
    let (consultation, notifier) = consultation_with(random.clone());
    consultation.open_call(CallMedium::Video).unwrap();
    time::sleep(Duration::from_millis(2600)).await;

    for draw in [0.96, 0.97, 0.98] {
        random.push(draw);
    }
    time::sleep(Duration::from_secs(46)).await;
    assert_eq!(consultation.calls().link_quality(), Some(LinkQuality::Low));
    assert_eq!(notifier.count(AdvisoryKind::PoorConnection), 1);

    // Switching medium rebuilds the session; quality starts over at high.
    assert_eq!(consultation.switch_medium(), Some(CallMedium::Audio));
    let switched = consultation.call_snapshot().unwrap();
    assert_eq!(switched.medium, CallMedium::Audio);
    assert_eq!(switched.link_quality, LinkQuality::High);
    assert_eq!(switched.phase, CallPhase::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_cancels_chat_and_call() {
    let (consultation, _) = consultation();
    consultation.send_message("are you there?").unwrap();
    consultation.open_call(CallMedium::Audio).unwrap();
    time::sleep(Duration::from_millis(3800)).await;
    assert!(consultation.conversation().is_peer_typing());

    consultation.teardown();
    assert!(consultation.conversation().is_closed());
    assert_eq!(consultation.conversation().pending_timers(), 0);
    assert_eq!(consultation.calls().pending_timers(), 0);

    let chat = consultation.conversation_snapshot();
    let call = consultation.call_snapshot().unwrap();
    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(consultation.conversation_snapshot(), chat);
    assert_eq!(consultation.call_snapshot().unwrap(), call);
    assert!(consultation.open_call(CallMedium::Video).is_none());
    assert!(consultation.send_message("hello?").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_call_ended_ten_seconds_after_connected_update() {
    let (consultation, _) = consultation();
    let mut updates = consultation.subscribe_call();
    consultation.open_call(CallMedium::Audio).unwrap();

    loop {
        updates.changed().await.unwrap();
        let phase = updates.borrow_and_update().as_ref().map(|s| s.phase);
        if phase == Some(CallPhase::Connected) {
            break;
        }
    }

    time::sleep(Duration::from_secs(10)).await;
    assert!(consultation.end_call());

    let ended = consultation.call_snapshot().unwrap();
    assert_eq!(ended.phase, CallPhase::Ended);
    assert_eq!(ended.elapsed_seconds, 10);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_consultation_cancels_everything() {
    let scheduler = Scheduler::current().unwrap();
    let consultation = Consultation::builder(ConsultationConfig::default())
        .scheduler(scheduler.clone())
        .random(Arc::new(ScriptedRandom::constant(0.0)))
        .notifier(Arc::new(CollectingNotifier::new()))
        .build()
        .unwrap();

    consultation.send_message("is this normal?").unwrap();
    let call_id = consultation.open_call(CallMedium::Audio).unwrap().call_id;
    time::sleep(Duration::from_millis(3000)).await;

    let conversation_id = consultation.conversation().id().to_string();
    assert!(scheduler.pending_for(&conversation_id) > 0);
    assert!(scheduler.pending_for(&call_id) > 0);

    let mut chat_updates = consultation.subscribe_conversation();
    let mut call_updates = consultation.subscribe_call();
    chat_updates.borrow_and_update();
    call_updates.borrow_and_update();

    drop(consultation);
    assert_eq!(scheduler.pending_for(&conversation_id), 0);
    assert_eq!(scheduler.pending_for(&call_id), 0);

    time::sleep(Duration::from_secs(60)).await;
    assert!(!chat_updates.has_changed().unwrap_or(false));
    assert!(!call_updates.has_changed().unwrap_or(false));
}

#[test]
fn test_building_outside_runtime_fails() {
    let result = Consultation::new(ConsultationConfig::default());
    assert!(matches!(result, Err(Error::Runtime(_))));
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = ConsultationConfig::default();
    config.chat.typing_min_ms = 10_000;
    let result = Consultation::new(config);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}
