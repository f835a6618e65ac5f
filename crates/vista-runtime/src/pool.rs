use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::diagnostics::Diagnostics;

/// Scheduling key: urgent work first, then nearest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Priority {
    pub urgent: bool,
    pub distance_sq: i64,
}

impl Priority {
    pub fn new(urgent: bool, distance_sq: i64) -> Self {
        Self {
            urgent,
            distance_sq,
        }
    }
}

impl Ord for Priority {
    /// `Greater` means runs sooner.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.urgent
            .cmp(&other.urgent)
            .then_with(|| other.distance_sq.cmp(&self.distance_sq))
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Unit of work for a [`PriorityPool`]. `C` is the per-worker context.
pub trait PoolTask<C>: Send {
    /// Priority as of now. Checked again when the task reaches the front of the queue.
    fn priority(&self) -> Priority;

    fn run(&mut self, ctx: &mut C);

    /// Called instead of returning normally when `run` panicked.
    fn panicked(&mut self) {}
}

struct Queued<C> {
    priority: Priority,
    seq: u64,
    task: Box<dyn PoolTask<C>>,
}

impl<C> PartialEq for Queued<C> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<C> Eq for Queued<C> {}

impl<C> Ord for Queued<C> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<C> PartialOrd for Queued<C> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct Shared<C> {
    heap: Mutex<BinaryHeap<Queued<C>>>,
    seq: AtomicU64,
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    reprioritize_delta: i64,
    diag: Arc<Diagnostics>,
}

impl<C> Shared<C> {
    fn push(&self, priority: Priority, task: Box<dyn PoolTask<C>>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(Queued {
            priority,
            seq,
            task,
        });
    }

    /// Pops the most urgent task, re-queuing any whose distance drifted past the delta.
    fn pop(&self) -> Option<Box<dyn PoolTask<C>>> {
        let mut heap = self.heap.lock();
        loop {
            let item = heap.pop()?;
            let now = item.task.priority();
            let drift = (now.distance_sq - item.priority.distance_sq).abs();
            if now.urgent == item.priority.urgent && drift <= self.reprioritize_delta {
                return Some(item.task);
            }
            self.diag.tasks_reprioritized.inc();
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            heap.push(Queued {
                priority: now,
                seq,
                task: item.task,
            });
        }
    }
}

/// Worker count for a configured value; `0` means one less than the available cores.
pub fn resolve_worker_threads(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .saturating_sub(1)
        .max(1)
}

/// Fixed set of workers draining a shared priority queue.
///
/// Each worker owns one context built by the factory for its slot and reuses it for every
/// task it runs. A task that panics is reported through [`PoolTask::panicked`], and its
/// worker rebuilds the context and keeps going.
pub struct PriorityPool<C> {
    shared: Arc<Shared<C>>,
    wake_tx: Option<Sender<()>>,
    _pool: Arc<ThreadPool>,
    threads: usize,
}

impl<C: 'static> PriorityPool<C> {
    pub fn new<F>(
        threads: usize,
        name: &str,
        reprioritize_delta: i64,
        diag: Arc<Diagnostics>,
        make_ctx: F,
    ) -> Result<Self, ThreadPoolBuildError>
    where
        F: Fn(usize) -> C + Send + Sync + 'static,
    {
        let threads = threads.max(1);
        let prefix = name.to_string();
        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(move |i| format!("{prefix}-{i}"))
                .build()?,
        );
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            reprioritize_delta,
            diag,
        });
        let (wake_tx, wake_rx) = unbounded::<()>();
        let make_ctx = Arc::new(make_ctx);
        for slot in 0..threads {
            let rx: Receiver<()> = wake_rx.clone();
            let shared = Arc::clone(&shared);
            let make_ctx = Arc::clone(&make_ctx);
            pool.spawn(move || {
                let mut ctx = make_ctx(slot);
                while let Ok(()) = rx.recv() {
                    let Some(mut task) = shared.pop() else {
                        continue;
                    };
                    shared.in_flight.fetch_add(1, Ordering::SeqCst);
                    shared.queued.fetch_sub(1, Ordering::SeqCst);
                    let res = catch_unwind(AssertUnwindSafe(|| task.run(&mut ctx)));
                    if res.is_err() {
                        shared.diag.worker_panics.inc();
                        log::warn!(target: "build", "worker {slot}: task panicked; context rebuilt");
                        task.panicked();
                        ctx = make_ctx(slot);
                    }
                    shared.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
        log::info!(target: "build", "{name}: {threads} workers");
        Ok(Self {
            shared,
            wake_tx: Some(wake_tx),
            _pool: pool,
            threads,
        })
    }

    pub fn submit(&self, task: Box<dyn PoolTask<C>>) {
        let Some(tx) = &self.wake_tx else {
            return;
        };
        let priority = task.priority();
        self.shared.queued.fetch_add(1, Ordering::Relaxed);
        self.shared.push(priority, task);
        if tx.send(()).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// (queued, in flight)
    pub fn queue_debug_counts(&self) -> (usize, usize) {
        (
            self.shared.queued.load(Ordering::SeqCst),
            self.shared.in_flight.load(Ordering::SeqCst),
        )
    }

    pub fn is_idle(&self) -> bool {
        let (q, f) = self.queue_debug_counts();
        q == 0 && f == 0
    }
}

impl<C> Drop for PriorityPool<C> {
    fn drop(&mut self) {
        // Workers exit once the wake channel disconnects.
        self.wake_tx.take();
    }
}
