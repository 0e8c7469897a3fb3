// Pluggable alignment observers
//
// An extension factory lives for the whole run and sees iteration-level
// events; it produces one observer per worker thread for thread-local
// state. Everything defaults to a no-op so embedders only implement what
// they need.

use crate::options::AlignerOptions;
use crate::stats::AlignerStats;

/// Run-level extension hook. One instance per aligner context.
pub trait ExtensionFactory: Send + Sync {
    fn initialize(&self, _options: &AlignerOptions) {}

    /// Skip the alignment phase entirely (initialization side effects
    /// still run).
    fn skip_alignment(&self) -> bool {
        false
    }

    fn begin_iteration(&self) {}

    fn finish_iteration(&self) {}

    fn finish_alignment(&self) {}

    /// Extra option strings echoed into diagnostics.
    fn extra_options(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extra text appended to the stats report.
    fn extra_stats(&self) -> Option<String> {
        None
    }

    /// A fresh per-worker observer.
    fn observer(&self) -> Box<dyn ExtensionObserver>;
}

/// Per-worker observer, owned by its thread.
pub trait ExtensionObserver: Send {
    fn begin_thread(&mut self) {}

    /// Called at thread teardown with the thread's stats, before they are
    /// merged into the global stats.
    fn finish_thread(&mut self, _stats: &mut AlignerStats) {}
}

/// The default hook: observes nothing.
pub struct NoopExtension;

struct NoopObserver;

impl ExtensionFactory for NoopExtension {
    fn observer(&self) -> Box<dyn ExtensionObserver> {
        Box::new(NoopObserver)
    }
}

impl ExtensionObserver for NoopObserver {}
