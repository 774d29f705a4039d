//! Configuration for consultation sessions
//!
//! Everything the core would otherwise read from ambient context (delays,
//! reply copy, sampling thresholds) is injected through these types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{CallMedium, LinkQuality};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsultationConfig {
    pub chat: ChatConfig,
    pub call: CallConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub sent_delay_ms: u64,
    pub delivered_delay_ms: u64,
    pub read_delay_ms: u64,
    pub typing_min_ms: u64,
    pub typing_max_ms: u64,
    pub replies: Vec<String>,
    pub attachment_replies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub setup_delay_ms: u64,
    pub setup_failure_rate: f64,
    pub audio_sample_interval_ms: u64,
    pub video_sample_interval_ms: u64,
    pub initial_volume: u8,
    pub thresholds: QualityThresholds,
}

/// Cut points on a uniform draw in `[0, 1)`: draws at or above `low_at`
/// grade as low, at or above `medium_at` as medium, the rest as high.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub medium_at: f64,
    pub low_at: f64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            sent_delay_ms: 500,
            delivered_delay_ms: 1000,
            read_delay_ms: 1000,
            typing_min_ms: 1500,
            typing_max_ms: 3500,
            replies: vec![
                "Thank you for the details. Could you tell me when the symptoms started?".to_string(),
                "I understand. Are you currently taking any medication?".to_string(),
                "That's helpful, thank you. How would you rate the discomfort from 1 to 10?".to_string(),
                "Noted. Let's go over this together during the video consultation.".to_string(),
                "Thanks for letting me know. Have you noticed anything that makes it better or worse?".to_string(),
            ],
            attachment_replies: vec![
                "Thank you, I've received the file and will review it now.".to_string(),
                "Got it. I'll take a look at this document before we continue.".to_string(),
                "Thanks for sharing this. It will be added to your consultation notes.".to_string(),
            ],
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            setup_delay_ms: 2500,
            setup_failure_rate: 0.0,
            audio_sample_interval_ms: 20_000,
            video_sample_interval_ms: 15_000,
            initial_volume: 80,
            thresholds: QualityThresholds::default(),
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            medium_at: 0.77,
            low_at: 0.92,
        }
    }
}

impl ConsultationConfig {
    pub fn validate(&self) -> Result<()> {
        self.chat.validate()?;
        self.call.validate()
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.typing_min_ms > self.typing_max_ms {
            return Err(Error::InvalidConfig(format!(
                "typing window is inverted: min {}ms > max {}ms",
                self.typing_min_ms, self.typing_max_ms
            )));
        }
        if self.replies.is_empty() {
            return Err(Error::InvalidConfig("reply set is empty".to_string()));
        }
        Ok(())
    }

    pub fn sent_delay(&self) -> Duration {
        Duration::from_millis(self.sent_delay_ms)
    }

    pub fn delivered_delay(&self) -> Duration {
        Duration::from_millis(self.delivered_delay_ms)
    }

    pub fn read_delay(&self) -> Duration {
        Duration::from_millis(self.read_delay_ms)
    }

    /// Picks a typing delay from the configured window given a draw in `[0, 1)`.
    pub fn typing_delay(&self, draw: f64) -> Duration {
        let span = self.typing_max_ms.saturating_sub(self.typing_min_ms) as f64;
        let offset = (span * draw.clamp(0.0, 1.0)).round() as u64;
        Duration::from_millis(self.typing_min_ms + offset)
    }

    /// Candidate replies for the given context. Falls back to the general set
    /// when no attachment-specific copy is configured.
    pub fn reply_candidates(&self, for_attachment: bool) -> &[String] {
        if for_attachment && !self.attachment_replies.is_empty() {
            &self.attachment_replies
        } else {
            &self.replies
        }
    }
}

impl CallConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.setup_failure_rate) {
            return Err(Error::InvalidConfig(format!(
                "setup_failure_rate must be within [0, 1], got {}",
                self.setup_failure_rate
            )));
        }
        if self.audio_sample_interval_ms == 0 || self.video_sample_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "quality sample intervals must be non-zero".to_string(),
            ));
        }
        if self.initial_volume > 100 {
            return Err(Error::InvalidConfig(format!(
                "initial_volume must be within [0, 100], got {}",
                self.initial_volume
            )));
        }
        self.thresholds.validate()
    }

    pub fn setup_delay(&self) -> Duration {
        Duration::from_millis(self.setup_delay_ms)
    }

    /// Video is more sensitive to link changes, so it is sampled more often.
    pub fn sample_interval(&self, medium: CallMedium) -> Duration {
        match medium {
            CallMedium::Audio => Duration::from_millis(self.audio_sample_interval_ms),
            CallMedium::Video => Duration::from_millis(self.video_sample_interval_ms),
        }
    }
}

impl QualityThresholds {
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(self.medium_at) || !in_range(self.low_at) || self.medium_at > self.low_at {
            return Err(Error::InvalidConfig(format!(
                "quality thresholds must satisfy 0 <= medium_at ({}) <= low_at ({}) <= 1",
                self.medium_at, self.low_at
            )));
        }
        Ok(())
    }

    pub fn grade(&self, draw: f64) -> LinkQuality {
        if draw >= self.low_at {
            LinkQuality::Low
        } else if draw >= self.medium_at {
            LinkQuality::Medium
        } else {
            LinkQuality::High
        }
    }
}
