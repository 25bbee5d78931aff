//! VM configuration
//!
//! Limits and switches for a [`Context`](crate::Context). Hosts usually
//! start from [`VmConfig::default`] and adjust with the `with_*` methods, or
//! load a JSON document through serde.

use serde::{Deserialize, Serialize};

/// Limits and switches applied by a [`Context`](crate::Context)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Initial capacity of the pooled operand stack
    pub stack_capacity: usize,
    /// Hard operand stack depth limit
    pub stack_limit: usize,
    /// Deepest nesting of closure calls
    pub max_call_depth: usize,
    /// Native stack, in bytes, nested calls may use below the outermost
    /// call before failing with resource exhaustion
    pub native_stack_budget: usize,
    /// Register count of the top-level body of an image
    pub top_level_registers: u8,
    /// Keep the strings produced by the `Trace` opcode
    pub record_trace_output: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_capacity: 256,
            stack_limit: 65_536,
            max_call_depth: 256,
            native_stack_budget: 1536 * 1024,
            top_level_registers: 4,
            record_trace_output: true,
        }
    }
}

impl VmConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial operand stack capacity
    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }

    /// Set the operand stack depth limit
    pub fn with_stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }

    /// Set the call depth limit
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Set the native stack budget of nested calls
    pub fn with_native_stack_budget(mut self, bytes: usize) -> Self {
        self.native_stack_budget = bytes;
        self
    }

    /// Set the register count of top-level bodies
    pub fn with_top_level_registers(mut self, registers: u8) -> Self {
        self.top_level_registers = registers;
        self
    }

    /// Enable or disable recording of `Trace` output
    pub fn with_trace_output(mut self, record: bool) -> Self {
        self.record_trace_output = record;
        self
    }
}
