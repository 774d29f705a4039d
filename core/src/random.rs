//! Random sources for the simulated parts of a consultation

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Uniform draws used for quality sampling, typing delays and reply choice.
pub trait RandomSource: Send + Sync {
    /// Next draw in `[0, 1)`.
    fn next_f64(&self) -> f64;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick(&self, len: usize) -> usize {
        let idx = (self.next_f64() * len as f64) as usize;
        idx.min(len.saturating_sub(1))
    }
}

/// Thread-local OS-seeded generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Reproducible generator for a fixed seed.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }
}

/// Plays back a fixed sequence of draws, then repeats `fallback`.
pub struct ScriptedRandom {
    draws: Mutex<VecDeque<f64>>,
    fallback: f64,
}

impl ScriptedRandom {
    pub fn new(draws: impl IntoIterator<Item = f64>, fallback: f64) -> Self {
        Self {
            draws: Mutex::new(draws.into_iter().collect()),
            fallback,
        }
    }

    /// Always returns the same draw.
    pub fn constant(value: f64) -> Self {
        Self::new(std::iter::empty(), value)
    }

    pub fn push(&self, draw: f64) {
        self.draws.lock().push_back(draw);
    }

    pub fn remaining(&self) -> usize {
        self.draws.lock().len()
    }
}

impl RandomSource for ScriptedRandom {
    fn next_f64(&self) -> f64 {
        self.draws.lock().pop_front().unwrap_or(self.fallback)
    }
}
