//! Time utilities and match timing constants

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Interval between outbound position broadcasts
pub const POSITION_BROADCAST_INTERVAL: Duration = Duration::from_millis(200);

/// Interval of the legacy tower-hp poll loop (disabled by default, see Config)
pub const TOWER_HP_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Minimum time between two accepted local damage applications on a tower.
/// Suppresses double counting from near-simultaneous collision callbacks.
pub const TOWER_SHOT_COOLDOWN: Duration = Duration::from_millis(300);

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
