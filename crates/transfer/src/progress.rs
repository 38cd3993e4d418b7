use std::time::Duration;

use tokio::time::Instant;

/// Throughput of a single upload attempt.
///
/// Speed is `(uploaded - start_byte) / elapsed` measured from the start of
/// the attempt, so a paused and resumed upload reports the rate of the
/// current attempt only.
#[derive(Debug, Clone, Copy)]
pub struct AttemptMeter {
    start_byte: u64,
    started_at: Instant,
}

impl AttemptMeter {
    /// Starts measuring with `start_byte` bytes already on the server.
    pub fn start(start_byte: u64) -> Self {
        Self {
            start_byte,
            started_at: Instant::now(),
        }
    }

    pub fn start_byte(&self) -> u64 {
        self.start_byte
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Bytes per second given the current uploaded total.
    pub fn speed(&self, uploaded: u64) -> f64 {
        Self::rate(uploaded.saturating_sub(self.start_byte), self.elapsed())
    }

    /// Estimated time until `total` bytes are uploaded.
    pub fn eta(&self, uploaded: u64, total: u64) -> Option<Duration> {
        let speed = self.speed(uploaded);
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            total.saturating_sub(uploaded) as f64 / speed,
        ))
    }

    fn rate(bytes: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        bytes as f64 / secs
    }
}
