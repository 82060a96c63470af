//! VM capacities and limits

use serde::{Deserialize, Serialize};

/// Runtime capacities. The pools are fixed-size; exhausting one is a fatal
/// overflow, which is what stops runaway generic recursion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Operand stack entries
    pub stack_size: usize,
    /// Call frames
    pub frame_pool_size: usize,
    /// Nested loop cursors
    pub loop_pool_size: usize,
    /// Abort after this many dispatched instructions
    pub step_limit: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: 40_690,
            frame_pool_size: 1024,
            loop_pool_size: 1024,
            step_limit: None,
        }
    }
}

impl VmConfig {
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }
}
