//! Media device acquisition during call setup
//!
//! There is no real capture pipeline; acquisition is the single point where a
//! call setup can fail, so it doubles as the failure-injection hook.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::CallMedium;
use crate::random::RandomSource;

pub trait MediaDevices: Send + Sync {
    fn acquire(&self, medium: CallMedium) -> Result<()>;
}

impl<F> MediaDevices for F
where
    F: Fn(CallMedium) -> Result<()> + Send + Sync,
{
    fn acquire(&self, medium: CallMedium) -> Result<()> {
        self(medium)
    }
}

/// Fails acquisition with a fixed probability.
pub struct SimulatedDevices {
    failure_rate: f64,
    random: Arc<dyn RandomSource>,
}

impl SimulatedDevices {
    pub fn new(failure_rate: f64, random: Arc<dyn RandomSource>) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            random,
        }
    }
}

impl MediaDevices for SimulatedDevices {
    fn acquire(&self, medium: CallMedium) -> Result<()> {
        if self.failure_rate <= 0.0 {
            return Ok(());
        }
        if self.random.next_f64() < self.failure_rate {
            let reason = match medium {
                CallMedium::Audio => "microphone could not be opened",
                CallMedium::Video => "camera or microphone could not be opened",
            };
            return Err(Error::DeviceUnavailable {
                medium,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}
