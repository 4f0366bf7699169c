//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the engine.
///
/// The defaults match the constants the engine was tuned with; hosts
/// normally only override `sim_pin` and `pool_budget`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total byte budget of the packet-buffer pool.
    pub pool_budget: usize,
    /// SIM PIN entered automatically during bring-up when the SIM asks.
    pub sim_pin: Option<String>,
    /// Settle delay before the first bring-up element (milliseconds).
    pub init_pre_delay_ms: u64,
    /// Fixed backoff before a retried step (milliseconds).
    pub retry_backoff_ms: u64,
    /// Bounded number of SIM-ready polls during bring-up.
    pub sim_ready_polls: u8,
    /// Attempts per send chunk before the whole send fails.
    pub send_attempts: u8,
    /// Largest chunk declared in one send element.
    pub send_chunk: usize,
    /// Envelopes the command queue holds before submissions are
    /// refused with an out-of-memory status.
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pool_budget: 16 * 1024,
            sim_pin: None,
            init_pre_delay_ms: 500,
            retry_backoff_ms: 100,
            sim_ready_polls: 10,
            send_attempts: 3,
            send_chunk: 1024,
            queue_depth: 16,
        }
    }
}
