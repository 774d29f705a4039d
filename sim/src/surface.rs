//! Terminal rendering of conversation and call read models
//!
//! The surface keeps just enough of the last snapshot to print deltas, so a
//! message is shown once and then only its delivery transitions.

use std::collections::HashMap;

use chrono::{DateTime, Local, Utc};
use consult_core::{
    format_duration, Advisory, Author, CallPhase, CallSnapshot, ConversationSnapshot,
    DeliveryState, LinkQuality, Message,
};

use crate::config::SurfaceConfig;

pub struct Surface {
    config: SurfaceConfig,
    seen: HashMap<String, DeliveryState>,
    peer_typing: bool,
    call: Option<CallSnapshot>,
}

impl Surface {
    pub fn new(config: SurfaceConfig) -> Self {
        Self {
            config,
            seen: HashMap::new(),
            peer_typing: false,
            call: None,
        }
    }

    /// Lines describing what changed since the previous conversation snapshot.
    pub fn conversation_lines(&mut self, snapshot: &ConversationSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        for message in &snapshot.messages {
            match self.seen.insert(message.message_id.clone(), message.delivery_state) {
                None => lines.push(self.message_line(message)),
                Some(previous) if previous != message.delivery_state => {
                    lines.push(format!(
                        "    {} -> {}",
                        short_id(&message.message_id),
                        delivery_label(message.delivery_state)
                    ));
                }
                Some(_) => {}
            }
        }

        if snapshot.is_peer_typing != self.peer_typing {
            self.peer_typing = snapshot.is_peer_typing;
            if self.peer_typing {
                lines.push(format!("    {} is typing...", self.config.peer_name));
            }
        }

        lines
    }

    /// Lines describing what changed since the previous call snapshot.
    /// The elapsed clock alone does not produce output.
    pub fn call_lines(&mut self, snapshot: Option<&CallSnapshot>) -> Vec<String> {
        let mut lines = Vec::new();
        let previous = self.call.take();

        match (previous.as_ref(), snapshot) {
            (_, None) => {
                if previous.is_some() {
                    lines.push("[call] cleared".to_string());
                }
            }
            (None, Some(current)) => lines.push(phase_line(current)),
            (Some(previous), Some(current)) => {
                if previous.call_id != current.call_id || previous.phase != current.phase {
                    lines.push(phase_line(current));
                }
                if previous.call_id == current.call_id {
                    if previous.link_quality != current.link_quality {
                        lines.push(format!(
                            "[call] link quality {}",
                            quality_label(current.link_quality)
                        ));
                    }
                    if previous.controls != current.controls {
                        lines.push(format!("[call] controls {}", controls_summary(current)));
                    }
                    if previous.volume != current.volume {
                        lines.push(format!("[call] volume {}", current.volume));
                    }
                }
            }
        }

        self.call = snapshot.cloned();
        lines
    }

    pub fn advisory_line(&self, advisory: &Advisory) -> String {
        format!("(!) {}: {}", advisory.title, advisory.description)
    }

    fn message_line(&self, message: &Message) -> String {
        let who = match message.sender {
            Author::Local => "You",
            Author::Peer => self.config.peer_name.as_str(),
        };
        let mut line = String::new();
        if self.config.show_timestamps {
            line.push_str(&format!("[{}] ", format_timestamp(message.created_at)));
        }
        line.push_str(&format!("{}: {}", who, message.content));
        if let Some(attachment) = &message.attachment {
            line.push_str(&format!(" [{}]", attachment.display_name));
        }
        if message.is_outgoing() {
            line.push_str(&format!(
                " ({} {})",
                short_id(&message.message_id),
                delivery_label(message.delivery_state)
            ));
        }
        line
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|at| at.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn delivery_label(state: DeliveryState) -> &'static str {
    match state {
        DeliveryState::Sending => "sending",
        DeliveryState::Sent => "sent",
        DeliveryState::Delivered => "delivered",
        DeliveryState::Read => "read",
    }
}

fn quality_label(quality: LinkQuality) -> &'static str {
    match quality {
        LinkQuality::High => "high",
        LinkQuality::Medium => "medium",
        LinkQuality::Low => "low",
    }
}

fn phase_line(snapshot: &CallSnapshot) -> String {
    match snapshot.phase {
        CallPhase::Connecting => format!("[call] {} call connecting...", snapshot.medium),
        CallPhase::Connected => format!(
            "[call] {} call connected ({})",
            snapshot.medium,
            controls_summary(snapshot)
        ),
        CallPhase::Ended => format!(
            "[call] {} call ended after {}",
            snapshot.medium,
            format_duration(snapshot.elapsed_seconds)
        ),
        CallPhase::Failed => format!(
            "[call] {} call failed: {}",
            snapshot.medium,
            snapshot.failure_reason.as_deref().unwrap_or("unknown reason")
        ),
    }
}

fn controls_summary(snapshot: &CallSnapshot) -> String {
    let on_off = |on: bool| if on { "on" } else { "off" };
    let controls = &snapshot.controls;
    format!(
        "mic {}, speaker {}, video {}, recording {}, sharing {}",
        on_off(!controls.mic_muted),
        on_off(!controls.speaker_muted),
        on_off(controls.video_enabled),
        on_off(controls.is_recording),
        on_off(controls.is_screen_sharing)
    )
}
