//! Runtime configuration.
//!
//! No external config-file crate is warranted: the teacher carries no
//! config layer of its own, and the original's equivalent
//! (`config.cc`/`config.h`) was not retrieved into this pack, so
//! `RuntimeConfig` stays a plain struct with the constants spec.md names.
use std::time::Duration;

/// Tunables for building a [`crate::scheduler::Scheduler`] and the fibers
/// it runs.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Dedicated worker threads, excluding `use_caller`.
    pub worker_count: usize,
    /// Whether the constructing thread also drains the task queue.
    pub use_caller: bool,
    /// Default stack size for fibers that don't override it.
    pub default_stack_size: usize,
    /// Upper bound on how long an idle worker blocks in the reactor.
    pub default_tick: Duration,
    /// Whether `fibra::hook`'s blocking-call overrides are active by
    /// default.
    pub hook_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_count: 1,
            use_caller: true,
            default_stack_size: crate::fiber::DEFAULT_STACK_SIZE,
            default_tick: Duration::from_millis(3000),
            hook_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = RuntimeConfig::default();
        assert_eq!(config.default_stack_size, 128 * 1024);
        assert_eq!(config.default_tick, Duration::from_millis(3000));
    }
}
