use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Deferred work that must run on the thread owning `C` (the render thread).
pub type UploadJob<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Multi-producer, single-consumer queue of render-thread closures.
pub struct UploadQueue<C: ?Sized> {
    tx: Sender<UploadJob<C>>,
    rx: Receiver<UploadJob<C>>,
    pending: Arc<AtomicUsize>,
}

/// Cloneable producer half handed to workers.
pub struct UploadSender<C: ?Sized> {
    tx: Sender<UploadJob<C>>,
    pending: Arc<AtomicUsize>,
}

impl<C: ?Sized> Clone for UploadSender<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<C: ?Sized> UploadSender<C> {
    pub fn push(&self, job: UploadJob<C>) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl<C: ?Sized> Default for UploadQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ?Sized> UploadQueue<C> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn sender(&self) -> UploadSender<C> {
        UploadSender {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
        }
    }

    pub fn push(&self, job: UploadJob<C>) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Runs every queued job in enqueue order without blocking. Returns how many ran.
    pub fn drain(&self, ctx: &mut C) -> usize {
        let mut n = 0;
        for job in self.rx.try_iter() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            job(ctx);
            n += 1;
        }
        n
    }

    /// Drops queued jobs unrun.
    pub fn clear(&self) -> usize {
        let mut n = 0;
        for _ in self.rx.try_iter() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_runs_in_order_from_any_producer() {
        let q: UploadQueue<Vec<u32>> = UploadQueue::new();
        let s = q.sender();
        let t = std::thread::spawn(move || {
            for i in 0..3 {
                s.push(Box::new(move |v: &mut Vec<u32>| v.push(i)));
            }
        });
        t.join().unwrap();
        q.push(Box::new(|v: &mut Vec<u32>| v.push(99)));
        assert_eq!(q.pending(), 4);
        let mut out = Vec::new();
        assert_eq!(q.drain(&mut out), 4);
        assert_eq!(out, vec![0, 1, 2, 99]);
        assert_eq!(q.drain(&mut out), 0);
        assert_eq!(q.pending(), 0);
    }
}
