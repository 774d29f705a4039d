//! Synthetic link-quality sampling for connected calls

use crate::config::QualityThresholds;
use crate::models::LinkQuality;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub quality: LinkQuality,
    /// True only on the sample that moved the link into `Low`.
    pub degraded: bool,
}

/// Grades draws and tracks the current grade so that the drop into `Low`
/// is reported once per transition, not on every low tick.
#[derive(Debug, Clone)]
pub struct QualitySampler {
    thresholds: QualityThresholds,
    current: LinkQuality,
}

impl QualitySampler {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            current: LinkQuality::default(),
        }
    }

    pub fn current(&self) -> LinkQuality {
        self.current
    }

    pub fn sample(&mut self, draw: f64) -> Sample {
        let quality = self.thresholds.grade(draw);
        let degraded = quality == LinkQuality::Low && self.current != LinkQuality::Low;
        self.current = quality;
        Sample { quality, degraded }
    }
}
