//! Configuration carried by replay requests and the scheduler.

use std::time::Duration;

/// Per-batch replay settings.
///
/// The config participates in the batch key, so two requests only share
/// a replay pass when their configs are equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReplayConfig {
    /// Skip the commit-time instruction optimisations.
    pub disable_optimisations: bool,
    /// Fold small resource blobs into the instruction stream at commit.
    pub inline_resources: bool,
}

/// Batching behaviour of the per-device schedulers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Batching window for requests without a usage hint.
    pub default_delay: Duration,
    /// Batching window for background requests.
    pub background_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_millis(100),
            background_delay: Duration::from_millis(500),
        }
    }
}

/// Hint describing what the requester will do with the replay result,
/// used to pick a scheduling priority and batching window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageHint {
    /// Prefetch or cache warming; lowest priority, widest window.
    Background,
    /// Low-fidelity preview of the final result.
    Preview,
    /// The requester is blocked on this result; highest priority, no
    /// batching window.
    Primary,
}
