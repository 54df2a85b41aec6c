//! Frame clock feeding controllers

use std::time::Instant;

/// Upper bound on one frame's delta, in seconds
///
/// A stall (debugger, window drag) would otherwise hand every controller a
/// single huge step.
pub const MAX_FRAME_DELTA: f32 = 0.25;

/// Where frame deltas come from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeSource {
    /// Wall clock time between `update` calls
    RealTime,
    /// The same step every frame
    Fixed(f32),
}

/// Frame timer
///
/// Advanced once per rendered frame by the scene manager.
#[derive(Debug)]
pub struct Timer {
    source: TimeSource,
    last_frame: Instant,
    delta_time: f32,
    total_time: f32,
    frame_count: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Wall clock timer
    pub fn new() -> Self {
        Self::with_source(TimeSource::RealTime)
    }

    /// Timer stepping by `step` seconds every frame
    pub fn fixed(step: f32) -> Self {
        Self::with_source(TimeSource::Fixed(step.max(0.0)))
    }

    fn with_source(source: TimeSource) -> Self {
        Self { source, last_frame: Instant::now(), delta_time: 0.0, total_time: 0.0, frame_count: 0 }
    }

    /// Switch the delta source; the next real time delta starts from now
    pub fn set_source(&mut self, source: TimeSource) {
        self.source = source;
        self.last_frame = Instant::now();
    }

    /// Current delta source
    pub const fn source(&self) -> TimeSource {
        self.source
    }

    /// Advance one frame
    pub fn update(&mut self) {
        let now = Instant::now();
        let delta = match self.source {
            TimeSource::RealTime => now.duration_since(self.last_frame).as_secs_f32(),
            TimeSource::Fixed(step) => step,
        };
        self.delta_time = delta.min(MAX_FRAME_DELTA);
        self.total_time += self.delta_time;
        self.last_frame = now;
        self.frame_count += 1;
    }

    /// Seconds advanced by the last `update`
    pub const fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Seconds advanced since creation
    pub const fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Number of `update` calls
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_step_accumulates() {
        let mut timer = Timer::fixed(0.1);
        timer.update();
        timer.update();
        timer.update();
        assert_eq!(timer.frame_count(), 3);
        assert_relative_eq!(timer.delta_time(), 0.1);
        assert_relative_eq!(timer.total_time(), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_delta_is_clamped() {
        let mut timer = Timer::fixed(3.0);
        timer.update();
        assert_relative_eq!(timer.delta_time(), MAX_FRAME_DELTA);
    }

    #[test]
    fn test_real_time_deltas_are_non_negative() {
        let mut timer = Timer::new();
        timer.update();
        assert!(timer.delta_time() >= 0.0);
        timer.set_source(TimeSource::Fixed(0.05));
        timer.update();
        assert_relative_eq!(timer.delta_time(), 0.05);
    }
}
