//! Time management and fixed timestep support.
//!
//! [`Time`] is a resource ticked by the runner before each frame;
//! [`FixedTime`] accumulates real time into fixed-size substeps for
//! deterministic updates.

use std::time::{Duration, Instant};

use crate::resource::Resource;

/// Resource for tracking frame timing information
#[derive(Clone, Debug)]
pub struct Time {
    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
    startup_time: Instant,
    last_tick: Instant,
}

impl Time {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
            startup_time: now,
            last_tick: now,
        }
    }

    /// Advances timing for a new frame; called by the runner before `update`
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now.duration_since(self.last_tick);
        self.elapsed = now.duration_since(self.startup_time);
        self.last_tick = now;
        self.frame_count += 1;
    }

    /// Resets all timing information
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.delta = Duration::ZERO;
        self.elapsed = Duration::ZERO;
        self.frame_count = 0;
        self.startup_time = now;
        self.last_tick = now;
    }

    /// True before the first tick
    pub fn is_first_frame(&self) -> bool {
        self.frame_count == 0
    }

    /// Time since last frame
    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Total time since startup or last reset
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Frames ticked so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Instantaneous frames per second, or 0 before the first tick
    pub fn fps(&self) -> f32 {
        let delta = self.delta.as_secs_f32();
        if delta > 0.0 {
            1.0 / delta
        } else {
            0.0
        }
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for Time {}

/// Fixed timestep accumulator for deterministic updates
#[derive(Clone, Debug)]
pub struct FixedTime {
    timestep: Duration,
    accumulator: Duration,
    overstep: Duration,
}

impl FixedTime {
    /// Creates a fixed timestep at the given frequency (Hz)
    pub fn new(hz: u32) -> Self {
        Self::from_duration(Duration::from_secs_f32(1.0 / hz as f32))
    }

    pub fn from_duration(timestep: Duration) -> Self {
        Self {
            timestep,
            accumulator: Duration::ZERO,
            overstep: Duration::ZERO,
        }
    }

    /// Feeds a frame's delta in and returns how many fixed steps to run
    pub fn tick(&mut self, delta: Duration) -> u32 {
        self.accumulator += delta;

        let mut steps = 0;
        while self.accumulator >= self.timestep {
            self.accumulator -= self.timestep;
            steps += 1;
        }

        self.overstep = self.accumulator;
        steps
    }

    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    pub fn timestep_seconds(&self) -> f32 {
        self.timestep.as_secs_f32()
    }

    /// Leftover time, useful for render interpolation
    pub fn overstep(&self) -> Duration {
        self.overstep
    }

    /// Overstep as a fraction of the timestep (0.0 to 1.0)
    pub fn overstep_fraction(&self) -> f32 {
        let timestep = self.timestep.as_secs_f32();
        if timestep > 0.0 {
            self.overstep.as_secs_f32() / timestep
        } else {
            0.0
        }
    }
}

impl Default for FixedTime {
    fn default() -> Self {
        Self::new(60)
    }
}

impl Resource for FixedTime {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_starts_at_frame_zero() {
        let time = Time::new();
        assert!(time.is_first_frame());
        assert_eq!(time.frame_count(), 0);
        assert_eq!(time.fps(), 0.0);
    }

    #[test]
    fn test_tick_advances_frame_and_delta() {
        let mut time = Time::new();
        std::thread::sleep(Duration::from_millis(2));
        time.tick();

        assert!(!time.is_first_frame());
        assert_eq!(time.frame_count(), 1);
        assert!(time.delta() > Duration::ZERO);
        assert!(time.elapsed() >= time.delta());
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut time = Time::new();
        time.tick();
        time.reset();
        assert!(time.is_first_frame());
        assert_eq!(time.delta(), Duration::ZERO);
    }

    #[test]
    fn test_fixed_time_accumulates_to_steps() {
        let mut fixed = FixedTime::new(60);

        assert_eq!(fixed.tick(Duration::from_millis(10)), 0);
        assert_eq!(fixed.tick(Duration::from_millis(10)), 1);

        // Two steps worth in one slow frame
        assert_eq!(fixed.tick(Duration::from_millis(34)), 2);
    }

    #[test]
    fn test_overstep_fraction_bounded() {
        let mut fixed = FixedTime::new(60);
        fixed.tick(Duration::from_millis(8));
        let fraction = fixed.overstep_fraction();
        assert!(fraction > 0.0 && fraction < 1.0);
    }
}
