//! Queue observation: shared counters and the background queue monitor.
//!
//! Every queue publishes its size and activity through a [`QueueGauge`], a
//! small block of atomic counters shared with observers via `Arc`. The
//! [`QueueMonitor`] owns a background thread that samples a gauge at a fixed
//! interval, accumulates utilization statistics and warns about stalled
//! queues (no activity across many samples while the queue is non-empty).
//!
//! A stalled tidal queue is otherwise silent: producers block at high tide
//! forever if no consumer drains the queue. The monitor is the only
//! mechanism that diagnoses that condition; it never attempts recovery.
//!
//! ## Lifetime
//!
//! The monitor samples the gauge, never the queue itself, so it holds no
//! reference that can dangle. Queues that attach a monitor stop it (joining
//! the sampling thread) when they are dropped; shutdown latency is bounded
//! by one sample interval.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

// ── Shared counters ──────────────────────────────────────────────────────────

/// Atomically readable counters of a queue.
///
/// `size` and `activity` are maintained by the owning queue on every push and
/// pop. Reads are relaxed: sampled values are approximate under concurrency
/// but never torn. For tidal queues the gauge also carries the tide
/// thresholds and the current tide state; unbounded queues report a
/// `high_tide()` of zero.
#[derive(Debug)]
pub struct QueueGauge {
    size: AtomicUsize,
    activity: AtomicUsize,
    ebb: AtomicBool,
    high_tide: usize,
    low_tide: usize,
}

impl QueueGauge {
    /// Gauge for an unbounded queue (no tide thresholds).
    pub(crate) fn unbounded() -> Arc<Self> {
        Arc::new(Self {
            size: AtomicUsize::new(0),
            activity: AtomicUsize::new(0),
            ebb: AtomicBool::new(false),
            high_tide: 0,
            low_tide: 0,
        })
    }

    /// Gauge for a bounded tidal queue.
    pub(crate) fn tidal(high_tide: usize, low_tide: usize) -> Arc<Self> {
        Arc::new(Self {
            size: AtomicUsize::new(0),
            activity: AtomicUsize::new(0),
            ebb: AtomicBool::new(false),
            high_tide,
            low_tide,
        })
    }

    /// Current number of queued items (approximate under concurrency).
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns `true` when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of pushes plus pops since creation.
    pub fn activity(&self) -> usize {
        self.activity.load(Ordering::Relaxed)
    }

    /// Returns `true` for a gauge belonging to a tidal queue.
    pub fn is_tidal(&self) -> bool {
        self.high_tide > 0
    }

    /// High-tide threshold, zero for unbounded queues.
    pub fn high_tide(&self) -> usize {
        self.high_tide
    }

    /// Low-tide threshold, zero for unbounded queues.
    pub fn low_tide(&self) -> usize {
        self.low_tide
    }

    /// Returns `true` while producers are blocked (ebb tide).
    pub fn is_ebb(&self) -> bool {
        self.ebb.load(Ordering::Relaxed)
    }

    pub(crate) fn record_push(&self) {
        self.size.fetch_add(1, Ordering::Relaxed);
        self.activity.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pop(&self) {
        self.size.fetch_sub(1, Ordering::Relaxed);
        self.activity.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_ebb(&self, ebb: bool) {
        self.ebb.store(ebb, Ordering::Relaxed);
    }

    pub(crate) fn reset_size(&self) {
        self.size.store(0, Ordering::Relaxed);
    }
}

// ── Monitor ──────────────────────────────────────────────────────────────────

/// Sample counters accumulated by the monitor thread.
#[derive(Debug, Default, Clone)]
struct MonitorStats {
    samples: usize,
    cumulative_size: usize,
    high_tide_samples: usize,
    low_tide_samples: usize,
    ebb_samples: usize,
    empty_samples: usize,
    last_activity: usize,
    idle_streak: usize,
}

struct MonitorShared {
    gauge: Arc<QueueGauge>,
    name: String,
    interval: Duration,
    terminate: Mutex<bool>,
    terminate_cond: Condvar,
    stats: Mutex<MonitorStats>,
}

/// Background sampler for a single queue gauge.
///
/// Created with [`QueueMonitor::spawn`]; the sampling thread runs until
/// [`stop`](QueueMonitor::stop) or drop. On drop a summary is logged at INFO
/// level when more than [`QueueMonitor::MIN_SUMMARY_SAMPLES`] samples were
/// collected.
pub struct QueueMonitor {
    shared: Arc<MonitorShared>,
    handle: Option<JoinHandle<()>>,
}

impl QueueMonitor {
    /// Minimum number of samples before a summary is worth logging.
    pub const MIN_SUMMARY_SAMPLES: usize = 100;

    /// Number of consecutive no-activity samples on a non-empty queue before
    /// a stall warning is emitted.
    pub const WARN_IDLE_SAMPLES: usize = 100;

    /// A queue at or below 10% of its high tide counts as an empty sample.
    const EMPTY_PROPORTION: f64 = 0.1;

    /// Starts a sampling thread over `gauge`, reading it every `interval`.
    ///
    /// # Panics
    /// Panics if the monitor thread cannot be spawned.
    pub fn spawn(gauge: Arc<QueueGauge>, name: impl Into<String>, interval: Duration) -> Self {
        let name = name.into();
        info!(
            queue = %name,
            interval_ms = interval.as_millis() as u64,
            "sampling queue"
        );

        let shared = Arc::new(MonitorShared {
            gauge,
            name: name.clone(),
            interval,
            terminate: Mutex::new(false),
            terminate_cond: Condvar::new(),
            stats: Mutex::new(MonitorStats::default()),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("queue-monitor-{name}"))
            .spawn(move || Self::sample_loop(&thread_shared))
            .expect("failed to spawn queue monitor thread");

        Self { shared, handle: Some(handle) }
    }

    /// Stops the sampling thread and joins it.
    ///
    /// Idempotent; the thread observes the terminate flag within one sample
    /// interval.
    pub fn stop(&mut self) {
        {
            let mut terminate = self
                .shared
                .terminate
                .lock()
                .expect("QueueMonitor terminate mutex poisoned");
            *terminate = true;
        }
        self.shared.terminate_cond.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Number of samples taken so far.
    pub fn samples(&self) -> usize {
        self.stats().samples
    }

    /// Sum of the sampled queue sizes.
    pub fn cumulative_size(&self) -> usize {
        self.stats().cumulative_size
    }

    /// Mean sampled queue size, zero before the first sample.
    pub fn average_size(&self) -> f64 {
        let stats = self.stats();
        if stats.samples == 0 {
            return 0.0;
        }
        stats.cumulative_size as f64 / stats.samples as f64
    }

    fn stats(&self) -> MonitorStats {
        self.shared
            .stats
            .lock()
            .expect("QueueMonitor stats mutex poisoned")
            .clone()
    }

    fn sample_loop(shared: &MonitorShared) {
        let mut terminate = shared
            .terminate
            .lock()
            .expect("QueueMonitor terminate mutex poisoned");
        loop {
            let (guard, _) = shared
                .terminate_cond
                .wait_timeout(terminate, shared.interval)
                .expect("QueueMonitor condvar poisoned");
            terminate = guard;
            if *terminate {
                return;
            }
            Self::take_sample(shared);
        }
    }

    fn take_sample(shared: &MonitorShared) {
        let gauge = &shared.gauge;
        let size = gauge.len();
        let activity = gauge.activity();
        let empty_threshold = if gauge.is_tidal() {
            (gauge.high_tide() as f64 * Self::EMPTY_PROPORTION) as usize
        } else {
            0
        };

        let mut stats = shared
            .stats
            .lock()
            .expect("QueueMonitor stats mutex poisoned");
        stats.samples += 1;
        stats.cumulative_size += size;
        if size <= empty_threshold {
            stats.empty_samples += 1;
        }
        if gauge.is_tidal() {
            if size <= gauge.low_tide() {
                stats.low_tide_samples += 1;
            }
            if size >= gauge.high_tide() {
                stats.high_tide_samples += 1;
            }
            if gauge.is_ebb() {
                stats.ebb_samples += 1;
            }
        }

        // Stall detection: no push/pop since the previous sample while items
        // remain queued.
        if stats.samples > 1 && activity == stats.last_activity {
            if size > 0 {
                stats.idle_streak += 1;
            }
            if stats.idle_streak >= Self::WARN_IDLE_SAMPLES {
                warn!(
                    queue = %shared.name,
                    size,
                    stalled_ms = stats.idle_streak as u64 * shared.interval.as_millis() as u64,
                    "queue stalled: no producer/consumer activity"
                );
            }
        } else {
            stats.idle_streak = 0;
        }
        stats.last_activity = activity;
    }

    fn log_summary(&self) {
        let stats = self.stats();
        if stats.samples <= Self::MIN_SUMMARY_SAMPLES {
            return;
        }
        let samples = stats.samples as f64;
        let average_size = stats.cumulative_size as f64 / samples;
        if self.shared.gauge.is_tidal() {
            let high_tide = self.shared.gauge.high_tide() as f64;
            info!(
                queue = %self.shared.name,
                samples = stats.samples,
                average_size = %format!("{average_size:.2}"),
                utilization_pct = %format!("{:.0}", average_size * 100.0 / high_tide),
                high_tide_pct = %format!("{:.2}", stats.high_tide_samples as f64 * 100.0 / samples),
                low_tide_pct = %format!("{:.2}", stats.low_tide_samples as f64 * 100.0 / samples),
                ebb_tide_pct = %format!("{:.2}", stats.ebb_samples as f64 * 100.0 / samples),
                empty_pct = %format!("{:.2}", stats.empty_samples as f64 * 100.0 / samples),
                "queue statistics"
            );
        } else {
            info!(
                queue = %self.shared.name,
                samples = stats.samples,
                average_size = %format!("{average_size:.2}"),
                "queue statistics"
            );
        }
    }
}

impl Drop for QueueMonitor {
    fn drop(&mut self) {
        self.stop();
        self.log_summary();
    }
}

impl std::fmt::Debug for QueueMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueMonitor")
            .field("queue", &self.shared.name)
            .field("interval", &self.shared.interval)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
