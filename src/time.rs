// src/time.rs
//! Fixed-step clock for driving the character system from a variable frame rate.
//!
//! Frame time goes into an accumulator, each whole `fixed_dt` in it is one
//! simulation step, and what is left over is the render interpolation fraction.
//!
//! ```ignore
//! let dt = clock.fixed_dt();
//! for _ in clock.advance(frame_dt) {
//!     system.fixed_update(&mut world, dt);
//! }
//! let alpha = clock.alpha();
//! ```

use crate::{Error, Result};

/// Most catch-up steps a single frame may run.
pub const MAX_CATCH_UP_STEPS: u32 = 5;

/// Longest frame delta taken into account, anything above is a stall.
pub const MAX_FRAME_DELTA: f32 = 0.25;

#[derive(Debug, Clone)]
pub struct FixedStepClock {
    fixed_dt: f32,
    accumulator: f32,
    time_scale: f32,
    paused: bool,
    steps: u64,
}

impl FixedStepClock {
    pub fn new(fixed_dt: f32) -> Result<Self> {
        if !(fixed_dt.is_finite() && fixed_dt > 0.0) {
            return Err(Error::invalid_config("fixed_dt", format!("must be positive, got {fixed_dt}")));
        }
        Ok(Self { fixed_dt, accumulator: 0.0, time_scale: 1.0, paused: false, steps: 0 })
    }

    /// Feeds one frame and yields once per fixed step to run, at most
    /// [`MAX_CATCH_UP_STEPS`]. Time that cannot be caught up is dropped.
    pub fn advance(&mut self, frame_dt: f32) -> FixedSteps<'_> {
        let delta = if self.paused || !frame_dt.is_finite() {
            0.0
        } else {
            frame_dt.clamp(0.0, MAX_FRAME_DELTA) * self.time_scale
        };
        self.accumulator = (self.accumulator + delta).min(self.fixed_dt * MAX_CATCH_UP_STEPS as f32);

        FixedSteps { clock: self, remaining: MAX_CATCH_UP_STEPS }
    }

    /// Fraction of a step left in the accumulator, in `0..=1`.
    #[inline]
    pub fn alpha(&self) -> f32 {
        (self.accumulator / self.fixed_dt).clamp(0.0, 1.0)
    }

    #[inline] pub fn fixed_dt(&self) -> f32 { self.fixed_dt }
    #[inline] pub fn steps(&self) -> u64 { self.steps }
    #[inline] pub fn time_scale(&self) -> f32 { self.time_scale }
    #[inline] pub fn set_time_scale(&mut self, scale: f32) { self.time_scale = scale.max(0.0); }
    #[inline] pub fn pause(&mut self) { self.paused = true; }
    #[inline] pub fn resume(&mut self) { self.paused = false; }
    #[inline] pub fn is_paused(&self) -> bool { self.paused }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.steps = 0;
    }
}

/// Iterator over the fixed steps due this frame.
pub struct FixedSteps<'a> {
    clock: &'a mut FixedStepClock,
    remaining: u32,
}

impl Iterator for FixedSteps<'_> {
    type Item = ();

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining > 0 && self.clock.accumulator >= self.clock.fixed_dt {
            self.clock.accumulator -= self.clock.fixed_dt;
            self.clock.steps += 1;
            self.remaining -= 1;
            Some(())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: f32 = 1.0 / 64.0;

    #[test]
    fn rejects_non_positive_step() {
        assert!(FixedStepClock::new(0.0).unwrap_err().is_config());
        assert!(FixedStepClock::new(-1.0).is_err());
        assert!(FixedStepClock::new(f32::NAN).is_err());
    }

    #[test]
    fn one_step_per_matching_frame() {
        let mut clock = FixedStepClock::new(STEP).unwrap();
        assert_eq!(clock.advance(STEP).count(), 1);
        assert_eq!(clock.alpha(), 0.0);
        assert_eq!(clock.steps(), 1);
    }

    #[test]
    fn short_frames_accumulate() {
        let mut clock = FixedStepClock::new(STEP).unwrap();
        assert_eq!(clock.advance(STEP * 0.5).count(), 0);
        assert!((clock.alpha() - 0.5).abs() < 1e-6);
        assert_eq!(clock.advance(STEP * 0.5).count(), 1);
        assert!(clock.alpha() < 1e-6);
    }

    #[test]
    fn catch_up_is_capped() {
        let mut clock = FixedStepClock::new(STEP).unwrap();
        assert_eq!(clock.advance(STEP * 20.0).count(), MAX_CATCH_UP_STEPS as usize);
        // the backlog is dropped, not carried into the next frame
        assert_eq!(clock.advance(0.0).count(), 0);
    }

    #[test]
    fn pause_and_scale() {
        let mut clock = FixedStepClock::new(STEP).unwrap();
        clock.pause();
        assert_eq!(clock.advance(STEP * 3.0).count(), 0);
        clock.resume();
        clock.set_time_scale(2.0);
        assert_eq!(clock.advance(STEP).count(), 2);
        clock.set_time_scale(-1.0);
        assert_eq!(clock.time_scale(), 0.0);
    }
}
