//! Admission control and dynamic batch sizing.
//!
//! The controller watches heap use and consecutive failures. Under pressure
//! the effective batch size halves (down to `base/8`) and the concurrency
//! semaphore shrinks proportionally; after a sustained healthy window it
//! doubles back up to the base. High-volume mode flips on when buffered
//! throughput crosses the configured rate and off symmetrically.

use neurograph_core::{BackpressureConfig, NeuroGraphError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

pub struct AdmissionController {
    config: BackpressureConfig,
    semaphore: Arc<Semaphore>,
    /// Permits withheld from callers while degraded.
    held: Mutex<Vec<OwnedSemaphorePermit>>,
    batch_size: AtomicUsize,
    consecutive_errors: AtomicU32,
    heap_used: AtomicUsize,
    healthy_since: Mutex<Option<Instant>>,
    high_volume: AtomicBool,
    volume: Mutex<VecDeque<(Instant, usize)>>,
    system: Mutex<System>,
}

impl AdmissionController {
    pub fn new(config: BackpressureConfig) -> Arc<Self> {
        let permits = config.max_concurrent_operations.max(1);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            batch_size: AtomicUsize::new(config.base_batch_size),
            consecutive_errors: AtomicU32::new(0),
            heap_used: AtomicUsize::new(0),
            healthy_since: Mutex::new(Some(Instant::now())),
            high_volume: AtomicBool::new(false),
            volume: Mutex::new(VecDeque::new()),
            system: Mutex::new(System::new()),
            held: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn current_batch_size(&self) -> usize {
        self.batch_size.load(Ordering::Acquire)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_high_volume(&self) -> bool {
        self.high_volume.load(Ordering::Acquire)
    }

    /// Blocks on the semaphore. Under pressure the permit pool is smaller,
    /// so admission itself is the backpressure.
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| NeuroGraphError::Internal("admission semaphore closed".into()))
    }

    /// Non-blocking admission for callers that should shed load instead of
    /// queueing.
    pub fn try_admit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| {
                NeuroGraphError::ResourceExhausted(
                    "admission denied: concurrency limit reached under backpressure".into(),
                )
            })
    }

    pub fn record_success(&self) {
        self.consecutive_errors.store(0, Ordering::Release);
    }

    pub fn record_error(&self) {
        self.consecutive_errors.fetch_add(1, Ordering::AcqRel);
        self.evaluate();
    }

    /// Samples this process's resident memory via sysinfo.
    pub fn sample_heap(&self) {
        let pid = Pid::from_u32(std::process::id());
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = system.process(pid) {
            self.heap_used
                .store(process.memory() as usize, Ordering::Release);
        }
    }

    /// Test/override hook for environments where sysinfo is unavailable.
    pub fn set_heap_used(&self, bytes: usize) {
        self.heap_used.store(bytes, Ordering::Release);
    }

    pub fn record_buffered(&self, items: usize) {
        let mut volume = self.volume.lock();
        let now = Instant::now();
        volume.push_back((now, items));
        while let Some((t, _)) = volume.front() {
            if now.duration_since(*t) > self.config.high_volume_window {
                volume.pop_front();
            } else {
                break;
            }
        }
    }

    fn heap_fraction(&self) -> f64 {
        self.heap_used.load(Ordering::Acquire) as f64 / self.config.heap_limit_bytes.max(1) as f64
    }

    fn buffered_rate(&self) -> f64 {
        let volume = self.volume.lock();
        let total: usize = volume.iter().map(|(_, n)| n).sum();
        total as f64 / self.config.high_volume_window.as_secs_f64().max(0.001)
    }

    /// Re-evaluates pressure and adjusts batch size, permit pool and
    /// high-volume mode. Called after errors and from the periodic tick.
    pub fn evaluate(&self) {
        let pressured = self.heap_fraction() > self.config.heap_high_watermark
            || self.consecutive_errors.load(Ordering::Acquire)
                > self.config.max_consecutive_errors;

        if pressured {
            *self.healthy_since.lock() = None;
            let current = self.batch_size.load(Ordering::Acquire);
            let floor = self.config.batch_floor();
            let next = (current / 2).max(floor);
            if next < current {
                self.batch_size.store(next, Ordering::Release);
                warn!(
                    batch_size = next,
                    heap_fraction = self.heap_fraction(),
                    errors = self.consecutive_errors.load(Ordering::Acquire),
                    "backpressure: batch size halved"
                );
            }
        } else {
            let mut healthy_since = self.healthy_since.lock();
            match *healthy_since {
                None => *healthy_since = Some(Instant::now()),
                Some(since) if since.elapsed() >= self.config.recovery_window => {
                    let current = self.batch_size.load(Ordering::Acquire);
                    let next = (current * 2).min(self.config.base_batch_size);
                    if next > current {
                        self.batch_size.store(next, Ordering::Release);
                        info!(batch_size = next, "backpressure recovered: batch size doubled");
                    }
                    *healthy_since = Some(Instant::now());
                }
                Some(_) => {}
            }
        }
        self.resize_permits();

        let rate = self.buffered_rate();
        let was_high = self.high_volume.load(Ordering::Acquire);
        let now_high = rate > self.config.high_volume_threshold;
        if was_high != now_high {
            self.high_volume.store(now_high, Ordering::Release);
            debug!(rate, high_volume = now_high, "high-volume mode toggled");
        }
    }

    /// Shrinks or grows the caller-visible permit pool so concurrency tracks
    /// the batch-size fraction of its configured maximum.
    fn resize_permits(&self) {
        let max = self.config.max_concurrent_operations.max(1);
        let target = (max * self.batch_size.load(Ordering::Acquire)
            / self.config.base_batch_size.max(1))
        .max(1);
        let desired_held = max.saturating_sub(target);
        let mut held = self.held.lock();
        while held.len() > desired_held {
            drop(held.pop());
        }
        while held.len() < desired_held {
            match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => held.push(permit),
                // In-flight operations hold the rest; the next evaluate
                // finishes the shrink.
                Err(_) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn controller(config: BackpressureConfig) -> Arc<AdmissionController> {
        AdmissionController::new(config)
    }

    #[tokio::test]
    async fn errors_halve_batch_size_down_to_floor() {
        let ctl = controller(BackpressureConfig {
            base_batch_size: 400,
            max_consecutive_errors: 2,
            ..BackpressureConfig::default()
        });
        assert_eq!(ctl.current_batch_size(), 400);
        for _ in 0..16 {
            ctl.record_error();
        }
        assert_eq!(ctl.current_batch_size(), 50); // 400/8 floor
    }

    #[tokio::test]
    async fn heap_pressure_shrinks_permits() {
        let ctl = controller(BackpressureConfig {
            base_batch_size: 400,
            max_concurrent_operations: 32,
            heap_limit_bytes: 1000,
            ..BackpressureConfig::default()
        });
        ctl.set_heap_used(900);
        ctl.evaluate();
        assert_eq!(ctl.current_batch_size(), 200);
        assert_eq!(ctl.available_permits(), 16);
    }

    #[tokio::test]
    async fn recovery_window_restores_batch_size() {
        let ctl = controller(BackpressureConfig {
            base_batch_size: 400,
            max_concurrent_operations: 8,
            heap_limit_bytes: 1000,
            recovery_window: Duration::from_millis(10),
            ..BackpressureConfig::default()
        });
        ctl.set_heap_used(990);
        ctl.evaluate();
        ctl.evaluate();
        assert_eq!(ctl.current_batch_size(), 100);

        ctl.set_heap_used(0);
        ctl.evaluate(); // starts the healthy window
        tokio::time::sleep(Duration::from_millis(15)).await;
        ctl.evaluate();
        assert_eq!(ctl.current_batch_size(), 200);
        tokio::time::sleep(Duration::from_millis(15)).await;
        ctl.evaluate();
        assert_eq!(ctl.current_batch_size(), 400);
        assert_eq!(ctl.available_permits(), 8);
    }

    #[tokio::test]
    async fn try_admit_denies_when_saturated() {
        let ctl = controller(BackpressureConfig {
            max_concurrent_operations: 1,
            ..BackpressureConfig::default()
        });
        let held = ctl.try_admit().unwrap();
        assert!(matches!(
            ctl.try_admit(),
            Err(NeuroGraphError::ResourceExhausted(_))
        ));
        drop(held);
        assert!(ctl.try_admit().is_ok());
    }

    #[tokio::test]
    async fn high_volume_mode_toggles_symmetrically() {
        let ctl = controller(BackpressureConfig {
            high_volume_threshold: 100.0,
            high_volume_window: Duration::from_millis(100),
            ..BackpressureConfig::default()
        });
        ctl.record_buffered(5000);
        ctl.evaluate();
        assert!(ctl.is_high_volume());

        tokio::time::sleep(Duration::from_millis(150)).await;
        ctl.record_buffered(0);
        ctl.evaluate();
        assert!(!ctl.is_high_volume());
    }
}
