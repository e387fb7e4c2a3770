//! Busy-wait delays for microsecond-scale timing.
//!
//! `thread::sleep` gives no guarantee below the scheduler tick, so the
//! ultrasonic trigger pulse and echo polling spin on [`Instant`] instead.

use std::time::{Duration, Instant};

/// Spin until `duration` has elapsed.
#[inline]
pub fn busy_wait(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

/// Spin for `micros` microseconds.
#[inline]
pub fn micro_sleep(micros: u64) {
    busy_wait(Duration::from_micros(micros));
}
