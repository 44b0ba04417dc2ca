use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

#[must_use]
pub fn cancel_requested(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

/// Render a human-friendly transfer speed string.
#[must_use]
pub fn format_speed(bytes_per_sec: f32) -> String {
    const KIB: f32 = 1024.0;
    const MIB: f32 = KIB * 1024.0;

    if bytes_per_sec < KIB {
        format!("{bytes_per_sec:.0} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    }
}

#[must_use]
pub fn progress_percent(downloaded: u64, total: Option<u64>) -> f32 {
    match total {
        Some(total) if total > 0 => (downloaded as f32 / total as f32 * 100.0).min(100.0),
        _ => 0.0,
    }
}

/// Tracks bytes received and yields a speed reading at most every 200ms.
#[derive(Debug)]
pub struct TransferMeter {
    started: Instant,
    received: u64,
    last_tick: Instant,
    last_bytes: u64,
}

impl TransferMeter {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            received: 0,
            last_tick: now,
            last_bytes: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Account for `len` new bytes; returns a speed label when a sample is due.
    pub fn record(&mut self, len: usize) -> Option<String> {
        self.received += len as u64;
        let elapsed = self.last_tick.elapsed();
        if elapsed < SAMPLE_INTERVAL {
            return None;
        }
        let speed = (self.received - self.last_bytes) as f32 / elapsed.as_secs_f32();
        self.last_tick = Instant::now();
        self.last_bytes = self.received;
        Some(format_speed(speed))
    }

    /// Mean speed since `start`.
    pub fn average(&self) -> String {
        let elapsed = self.started.elapsed().as_secs_f32().max(0.001);
        format_speed(self.received as f32 / elapsed)
    }
}
