// ============================================================================
// spark-observables - Staleness Tracker
// Aggregates the stale state of several upstream observables
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::Result;
use crate::listeners::{Listener, listener};
use crate::observable::{ChangeEvent, Observable, StaleEvent};
use crate::realm::lock;

/// Called with the new aggregate staleness on every transition.
pub type StalenessConsumer = Arc<dyn Fn(bool) + Send + Sync>;

struct Tracked {
    source: Arc<dyn Observable>,
    stale: Arc<AtomicBool>,
    on_change: Listener<ChangeEvent>,
    on_stale: Listener<StaleEvent>,
}

struct TrackerInner {
    tracked: Vec<Tracked>,
    stale_count: Mutex<usize>,
    consumer: StalenessConsumer,
    disposed: AtomicBool,
}

impl TrackerInner {
    /// Record a new staleness for one source and report aggregate flips.
    fn update(&self, flag: &AtomicBool, stale: bool) {
        // Events snapshotted before dispose may still be delivered
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if flag.swap(stale, Ordering::SeqCst) == stale {
            return;
        }
        let flipped = {
            let mut count = lock(&self.stale_count);
            if stale {
                *count += 1;
                *count == 1
            } else {
                *count = count.saturating_sub(1);
                *count == 0
            }
        };
        if flipped {
            tracing::trace!(stale, "staleness.transition");
            (self.consumer)(stale);
        }
    }
}

/// Reports stale while any tracked observable is stale.
///
/// Each source is watched through its stale channel (becomes stale) and its
/// change channel (re-checked, usually fresh again). The consumer only hears
/// about aggregate transitions.
pub struct StalenessTracker {
    inner: Arc<TrackerInner>,
}

impl StalenessTracker {
    /// Start tracking `sources`. Must run inside the sources' realm.
    ///
    /// Disposed sources never change again and are left out.
    pub fn new(sources: Vec<Arc<dyn Observable>>, consumer: StalenessConsumer) -> Result<Self> {
        let sources: Vec<Arc<dyn Observable>> = sources
            .into_iter()
            .filter(|source| !source.base().is_disposed())
            .collect();
        let mut initial = Vec::with_capacity(sources.len());
        for source in &sources {
            initial.push(source.is_stale()?);
        }

        let inner = Arc::new_cyclic(|weak: &Weak<TrackerInner>| {
            let tracked = sources
                .into_iter()
                .zip(&initial)
                .map(|(source, &stale)| {
                    let flag = Arc::new(AtomicBool::new(stale));

                    let (w, f, src) = (weak.clone(), flag.clone(), Arc::downgrade(&source));
                    let on_change = listener(move |_: &ChangeEvent| {
                        let (Some(tracker), Some(src)) = (w.upgrade(), src.upgrade()) else {
                            return;
                        };
                        tracker.update(&f, matches!(src.is_stale(), Ok(true)));
                    });

                    let (w, f) = (weak.clone(), flag.clone());
                    let on_stale = listener(move |_: &StaleEvent| {
                        if let Some(tracker) = w.upgrade() {
                            tracker.update(&f, true);
                        }
                    });

                    Tracked {
                        source,
                        stale: flag,
                        on_change,
                        on_stale,
                    }
                })
                .collect();

            TrackerInner {
                tracked,
                stale_count: Mutex::new(initial.iter().filter(|s| **s).count()),
                consumer,
                disposed: AtomicBool::new(false),
            }
        });

        for tracked in &inner.tracked {
            tracked.source.add_change_listener(tracked.on_change.clone())?;
            tracked.source.add_stale_listener(tracked.on_stale.clone())?;
        }

        Ok(Self { inner })
    }

    /// Returns true while at least one source is stale.
    pub fn is_stale(&self) -> bool {
        *lock(&self.inner.stale_count) > 0
    }

    /// Stop watching every source. The consumer is not called again.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        for tracked in &self.inner.tracked {
            tracked.source.remove_change_listener(&tracked.on_change);
            tracked.source.remove_stale_listener(&tracked.on_stale);
            tracked.stale.store(false, Ordering::SeqCst);
        }
        *lock(&self.inner.stale_count) = 0;
    }
}

impl fmt::Debug for StalenessTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StalenessTracker")
            .field("sources", &self.inner.tracked.len())
            .field("stale", &self.is_stale())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
