use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Frame-rate meter fed from the frame path and sampled from elsewhere.
#[derive(Debug)]
pub struct FpsMeter {
    frames: AtomicU64,
    last: Mutex<Sample>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    fps: f32,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self {
            frames: AtomicU64::new(0),
            last: Mutex::new(Sample {
                at: Instant::now(),
                fps: 0.0,
            }),
        }
    }

    pub fn tick(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recent sampled rate.
    pub fn fps(&self) -> f32 {
        self.last.lock().fps
    }

    pub fn sample(&self) -> f32 {
        self.sample_at(Instant::now())
    }

    /// Frames per second since the previous sample. Keeps the previous value
    /// when no time has passed.
    pub fn sample_at(&self, now: Instant) -> f32 {
        let mut last = self.last.lock();
        let elapsed = now.saturating_duration_since(last.at);
        if elapsed.is_zero() {
            return last.fps;
        }
        let frames = self.frames.swap(0, Ordering::Relaxed);
        last.fps = frames as f32 / elapsed.as_secs_f32();
        last.at = now;
        last.fps
    }

    pub fn reset(&self) {
        self.frames.store(0, Ordering::Relaxed);
        *self.last.lock() = Sample {
            at: Instant::now(),
            fps: 0.0,
        };
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new()
    }
}
