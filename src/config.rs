//! Engine configuration and system-wide safety constants.

use serde::{Deserialize, Serialize};

/// Hard ceiling on loop iterations per execution, regardless of any
/// per-node `max_loop_count` configuration.
pub const SYSTEM_MAX_LOOPS: u32 = 1000;

/// Fallback per-node timeout when neither the node nor the workflow
/// settings specify one.
pub const SYSTEM_DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default timeout for a human-in-the-loop round-trip.
pub const DEFAULT_HITL_TIMEOUT_SECS: u64 = 300;

/// Configuration for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-node timeout fallback in milliseconds.
    pub default_timeout_ms: u64,
    /// Retry count fallback for nodes that do not configure one.
    pub default_max_retries: u32,
    /// Upper bound on scheduled node executions per run.
    pub max_steps: u32,
    /// How long a cancelled execution waits for the in-flight handler
    /// before abandoning it.
    pub grace_period_ms: u64,
    /// Nesting depth fallback for sub-workflow spawning.
    pub default_max_nesting_depth: u32,
    /// Capacity of the per-execution event channel.
    pub event_channel_capacity: usize,
    /// Base delay of the retry backoff in milliseconds.
    pub retry_backoff_base_ms: u64,
    /// Cap on a single retry backoff delay in milliseconds.
    pub retry_backoff_cap_ms: u64,
    /// Apply full jitter to retry delays.
    #[serde(default)]
    pub retry_jitter: bool,
    /// Byte limit for node outputs embedded in events.
    pub event_output_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_timeout_ms: SYSTEM_DEFAULT_TIMEOUT_MS,
            default_max_retries: 0,
            max_steps: 10_000,
            grace_period_ms: 5_000,
            default_max_nesting_depth: 3,
            event_channel_capacity: 256,
            retry_backoff_base_ms: 5_000,
            retry_backoff_cap_ms: 30_000,
            retry_jitter: false,
            event_output_limit: 2_048,
        }
    }
}
