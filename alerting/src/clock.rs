//! Injectable time source and the pure window arithmetic built on it.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Source of "now" for the pipeline.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at the Unix epoch, so offsets read as plain seconds.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::default())
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether a window that opened at `window_start` has elapsed at `now`.
///
/// A clock that went backwards never expires a window.
pub fn window_expired(now: DateTime<Utc>, window_start: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(window_start) >= window
}

/// Whether `cooldown` has passed since `last`. `None` means never, which
/// counts as elapsed.
pub fn cooldown_elapsed(now: DateTime<Utc>, last: Option<DateTime<Utc>>, cooldown: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.signed_duration_since(last) >= cooldown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::default() + Duration::seconds(secs)
    }

    #[test]
    fn test_window_expiry_boundary() {
        let window = Duration::seconds(600);
        assert!(!window_expired(t(599), t(0), window));
        assert!(window_expired(t(600), t(0), window));
        assert!(!window_expired(t(0), t(100), window));
    }

    #[test]
    fn test_cooldown_elapsed() {
        let cooldown = Duration::seconds(60);
        assert!(cooldown_elapsed(t(5), None, cooldown));
        assert!(!cooldown_elapsed(t(30), Some(t(0)), cooldown));
        assert!(cooldown_elapsed(t(60), Some(t(0)), cooldown));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_epoch();
        clock.advance(Duration::seconds(70));
        assert_eq!(clock.now(), t(70));
        clock.set(t(5));
        assert_eq!(clock.now(), t(5));
    }
}
