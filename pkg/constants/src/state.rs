//! Optimistic-concurrency and reconcile tuning.

/// Delay before the first retry after a conflicting write, in milliseconds.
pub const RETRY_BASE_DELAY_MS: u64 = 10;

/// Multiplier applied to the retry delay after each conflict.
pub const RETRY_BACKOFF_FACTOR: u64 = 2;

/// How many times a conflicting write is retried before giving up.
pub const RETRY_MAX_STEPS: u32 = 5;

/// Upper bound on namespaces materialized concurrently per reconcile pass.
pub const FANOUT_LIMIT: usize = 8;

/// Default seconds between periodic reconcile passes.
pub const RESYNC_INTERVAL_SECS: u64 = 30;
