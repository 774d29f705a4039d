//! Data models for consultation sessions

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    Local,
    Peer,
}

/// Delivery lifecycle of a chat message. Variants are declared in
/// progression order, so `Ord` follows the lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    #[default]
    Sending,
    Sent,
    Delivered,
    Read,
}

impl DeliveryState {
    /// The state this one advances to, or `None` once read.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Sending => Some(Self::Sent),
            Self::Sent => Some(Self::Delivered),
            Self::Delivered => Some(Self::Read),
            Self::Read => None,
        }
    }

    pub fn is_final(self) -> bool {
        self == Self::Read
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub locator: String,
    pub display_name: String,
}

impl Attachment {
    /// Builds an attachment from a locator, guessing the kind from the
    /// extension and using the last path segment as display name.
    pub fn from_locator(locator: &str) -> Self {
        let display_name = locator
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(locator)
            .to_string();

        let extension = display_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let kind = match extension.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "heic" => AttachmentKind::Image,
            _ => AttachmentKind::File,
        };

        Self {
            kind,
            locator: locator.to_string(),
            display_name,
        }
    }
}

/// What the surface hands over when sending or receiving a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl MessageBody {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
        }
    }

    pub fn attachment(attachment: Attachment) -> Self {
        Self {
            content: String::new(),
            attachment: Some(attachment),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

impl From<&str> for MessageBody {
    fn from(content: &str) -> Self {
        Self::text(content)
    }
}

impl From<String> for MessageBody {
    fn from(content: String) -> Self {
        Self::text(content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sender: Author,
    pub content: String,
    pub attachment: Option<Attachment>,
    pub created_at: i64,
    pub delivery_state: DeliveryState,
}

impl Message {
    pub(crate) fn new(conversation_id: &str, sender: Author, body: MessageBody) -> Self {
        let delivery_state = match sender {
            Author::Local => DeliveryState::Sending,
            Author::Peer => DeliveryState::Read,
        };

        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender,
            content: body.content,
            attachment: body.attachment,
            created_at: chrono::Utc::now().timestamp_millis(),
            delivery_state,
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.sender == Author::Local
    }
}

// ============================================================================
// Conversation read model
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    pub messages: Vec<Message>,
    pub is_peer_typing: bool,
}

impl ConversationSnapshot {
    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    pub fn inbound_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_outgoing()).count()
    }
}

// ============================================================================
// Calls
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMedium {
    Audio,
    Video,
}

impl CallMedium {
    pub fn other(self) -> Self {
        match self {
            Self::Audio => Self::Video,
            Self::Video => Self::Audio,
        }
    }
}

impl fmt::Display for CallMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

impl std::str::FromStr for CallMedium {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" | "voice" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown call medium: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Connecting,
    Connected,
    Ended,
    Failed,
}

impl CallPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkQuality {
    #[default]
    High,
    Medium,
    Low,
}

/// The independent boolean controls of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallControl {
    Mic,
    Speaker,
    Video,
    Recording,
    ScreenShare,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallControls {
    pub mic_muted: bool,
    pub speaker_muted: bool,
    pub video_enabled: bool,
    pub is_recording: bool,
    pub is_screen_sharing: bool,
}

impl CallControls {
    /// Initial controls: unmuted, camera on only for video calls.
    pub fn for_medium(medium: CallMedium) -> Self {
        Self {
            video_enabled: medium == CallMedium::Video,
            ..Self::default()
        }
    }

    pub fn get(&self, control: CallControl) -> bool {
        match control {
            CallControl::Mic => self.mic_muted,
            CallControl::Speaker => self.speaker_muted,
            CallControl::Video => self.video_enabled,
            CallControl::Recording => self.is_recording,
            CallControl::ScreenShare => self.is_screen_sharing,
        }
    }

    /// Flips one control and returns its new value.
    pub(crate) fn flip(&mut self, control: CallControl) -> bool {
        let field = match control {
            CallControl::Mic => &mut self.mic_muted,
            CallControl::Speaker => &mut self.speaker_muted,
            CallControl::Video => &mut self.video_enabled,
            CallControl::Recording => &mut self.is_recording,
            CallControl::ScreenShare => &mut self.is_screen_sharing,
        };
        *field = !*field;
        *field
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub call_id: String,
    pub medium: CallMedium,
    pub phase: CallPhase,
    pub link_quality: LinkQuality,
    pub controls: CallControls,
    pub volume: u8,
    pub elapsed_seconds: u64,
    pub failure_reason: Option<String>,
}

/// Formats a call duration as `MM:SS`, or `HH:MM:SS` past the hour.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_state_progression() {
        let mut state = DeliveryState::default();
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            state = next;
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                DeliveryState::Sending,
                DeliveryState::Sent,
                DeliveryState::Delivered,
                DeliveryState::Read
            ]
        );
        assert!(state.is_final());
        assert_eq!(LinkQuality::default(), LinkQuality::High);
    }

    #[test]
    fn test_peer_message_starts_read() {
        let msg = Message::new("c1", Author::Peer, MessageBody::text("hi"));
        assert_eq!(msg.delivery_state, DeliveryState::Read);
        assert!(!msg.is_outgoing());

        let msg = Message::new("c1", Author::Local, MessageBody::text("hi"));
        assert_eq!(msg.delivery_state, DeliveryState::Sending);
    }

    #[test]
    fn test_attachment_from_locator() {
        let img = Attachment::from_locator("/tmp/scans/xray.JPG");
        assert_eq!(img.kind, AttachmentKind::Image);
        assert_eq!(img.display_name, "xray.JPG");

        let doc = Attachment::from_locator("C:\\docs\\referral.pdf");
        assert_eq!(doc.kind, AttachmentKind::File);
        assert_eq!(doc.display_name, "referral.pdf");

        let bare = Attachment::from_locator("notes");
        assert_eq!(bare.kind, AttachmentKind::File);
        assert_eq!(bare.display_name, "notes");
    }

    #[test]
    fn test_controls_flip_one_field() {
        let mut controls = CallControls::for_medium(CallMedium::Audio);
        assert!(!controls.video_enabled);

        assert!(controls.flip(CallControl::Recording));
        assert!(controls.get(CallControl::Recording));
        assert!(!controls.get(CallControl::Mic));
        assert!(!controls.get(CallControl::ScreenShare));
        assert_eq!(
            controls,
            CallControls {
                is_recording: true,
                ..CallControls::for_medium(CallMedium::Audio)
            }
        );
        assert!(CallControls::for_medium(CallMedium::Video).video_enabled);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(75), "01:15");
        assert_eq!(format_duration(3725), "01:02:05");
    }

    #[test]
    fn test_medium_parse() {
        assert_eq!("Video".parse::<CallMedium>(), Ok(CallMedium::Video));
        assert_eq!("voice".parse::<CallMedium>(), Ok(CallMedium::Audio));
        assert!("fax".parse::<CallMedium>().is_err());
        assert_eq!(CallMedium::Audio.other(), CallMedium::Video);
    }
}
