//! Telemetry channel and background ranging

use crate::error::{Error, Result};
use crate::vehicle::{RangeFinder, Telemetry, Vehicle};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Snapshots buffered before new ones are dropped
pub const TELEMETRY_CHANNEL_CAPACITY: usize = 64;

/// Bounded telemetry channel
pub fn telemetry_channel() -> (Sender<Telemetry>, Receiver<Telemetry>) {
    bounded(TELEMETRY_CHANNEL_CAPACITY)
}

/// Non-blocking send; a full or closed channel drops the snapshot
pub(crate) fn publish(tx: &Sender<Telemetry>, snapshot: Telemetry) {
    if tx.try_send(snapshot).is_err() {
        log::trace!("Telemetry snapshot dropped");
    }
}

/// Thread measuring the distance ahead at a fixed interval
///
/// The echo is timed through a [`RangeFinder`]; the vehicle is locked only
/// to read the snapshot afterwards.
pub struct RangingThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RangingThread {
    pub fn spawn(
        vehicle: Arc<Mutex<Vehicle>>,
        range_finder: RangeFinder,
        tx: Sender<Telemetry>,
        interval: Duration,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("ultrasonic-ranging".to_string())
            .spawn(move || ranging_loop(vehicle, range_finder, tx, interval, thread_running))
            .map_err(|e| Error::ThreadSpawn(format!("ranging thread: {e}")))?;

        log::info!("Ranging thread started ({:?} interval)", interval);
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Clear the run flag and join
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| Error::ThreadPanic)?;
            log::info!("Ranging thread stopped");
        }
        Ok(())
    }
}

impl Drop for RangingThread {
    fn drop(&mut self) {
        if self.shutdown().is_err() {
            log::error!("Ranging thread panicked");
        }
    }
}

fn ranging_loop(
    vehicle: Arc<Mutex<Vehicle>>,
    range_finder: RangeFinder,
    tx: Sender<Telemetry>,
    interval: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let started = Instant::now();
        range_finder.measure();
        let snapshot = vehicle.lock().telemetry();
        publish(&tx, snapshot);

        // Sleep in short slices so stop() is not held up by a long interval
        let deadline = started + interval;
        while running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }
}
