//! Pace sampling.
//!
//! The human-pace interval between origin fetches must be randomized; a
//! deterministic spacing produces a detectable periodic signature. The
//! sampler is a seam so tests can pin the draw.

use rand::Rng;
use std::time::Duration;

/// Draws the spacing to impose after an admission, from `min..=max`.
pub trait PaceSampler: Send + Sync {
    /// Sample a spacing from the configured range.
    fn sample(&self, min: Duration, max: Duration) -> Duration;
}

// Blanket implementation for closures.
impl<F> PaceSampler for F
where
    F: Fn(Duration, Duration) -> Duration + Send + Sync,
{
    fn sample(&self, min: Duration, max: Duration) -> Duration {
        self(min, max)
    }
}

/// Uniform draw over the whole range, millisecond granularity.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPace;

impl PaceSampler for UniformPace {
    fn sample(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        let span_ms = (max - min).as_millis() as u64;
        let offset = rand::rng().random_range(0..=span_ms);
        min + Duration::from_millis(offset)
    }
}

/// Fixed spacing, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedPace(pub Duration);

impl PaceSampler for FixedPace {
    fn sample(&self, _min: Duration, _max: Duration) -> Duration {
        self.0
    }
}
