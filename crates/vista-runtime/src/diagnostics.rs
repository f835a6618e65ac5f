use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event counter.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

macro_rules! diagnostics {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        /// Process-wide pipeline counters. Created once by the owner of the pipeline and
        /// shared by `Arc` with everything that reports into it.
        #[derive(Default, Debug)]
        pub struct Diagnostics {
            $($(#[$doc])* pub $name: Counter,)*
        }

        /// Point-in-time copy of [`Diagnostics`].
        #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
        pub struct DiagnosticsSnapshot {
            $(pub $name: u64,)*
        }

        impl Diagnostics {
            pub fn snapshot(&self) -> DiagnosticsSnapshot {
                DiagnosticsSnapshot {
                    $($name: self.$name.get(),)*
                }
            }
        }
    };
}

diagnostics! {
    builds_queued,
    builds_started,
    builds_completed,
    /// Builds dropped because the region closed or was invalidated.
    builds_cancelled,
    /// Builds put back because neighbors were unavailable or the region left view.
    builds_rescheduled,
    builds_empty,
    builds_failed,
    worker_panics,
    tasks_reprioritized,
    snapshots_taken,
    resorts,
    uploads,
    occluder_invalidations,
    pvs_iterations,
    shadow_iterations,
    raster_tests,
    raster_cache_hits,
    regions_created,
    regions_closed,
    columns_closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_copies_counters() {
        let d = Diagnostics::default();
        d.builds_queued.inc();
        d.builds_queued.inc();
        d.raster_tests.add(5);
        let s = d.snapshot();
        assert_eq!(s.builds_queued, 2);
        assert_eq!(s.raster_tests, 5);
        assert_eq!(s.uploads, 0);
    }
}
