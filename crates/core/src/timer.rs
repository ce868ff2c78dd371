//! High-resolution timer for frame timing and profiling.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Get the time elapsed since the last call to `tick()`.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames over a reporting window.
///
/// `frame()` returns the average frames per second once per `interval`,
/// and `None` in between.
#[derive(Debug)]
pub struct FpsCounter {
    timer: Timer,
    interval: Duration,
    frames: u32,
}

impl FpsCounter {
    pub fn new(interval: Duration) -> Self {
        Self {
            timer: Timer::new(),
            interval,
            frames: 0,
        }
    }

    /// Records one presented frame.
    pub fn frame(&mut self) -> Option<f32> {
        self.frames += 1;
        let elapsed = self.timer.elapsed();
        if elapsed < self.interval {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.timer.reset();
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_tick_is_monotonic() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        assert!(delta >= Duration::from_millis(2));
        assert!(timer.elapsed() >= delta);
    }

    #[test]
    fn test_fps_counter_reports_after_interval() {
        let mut counter = FpsCounter::new(Duration::ZERO);
        let fps = counter.frame();
        assert!(fps.is_some());
        assert!(fps.unwrap_or_default() > 0.0);
    }

    #[test]
    fn test_fps_counter_silent_within_interval() {
        let mut counter = FpsCounter::new(Duration::from_secs(3600));
        assert!(counter.frame().is_none());
        assert!(counter.frame().is_none());
    }
}
