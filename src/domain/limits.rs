//! Engine complexity ceilings and cache sizing.

use std::time::Duration;

/// Bounds every expression must satisfy before it may be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLimits {
    /// Maximum expression source length in bytes.
    pub max_source_len: usize,
    /// Maximum tree depth (and syntactic nesting) of an expression.
    pub max_depth: usize,
    /// Maximum number of nodes in an expression tree.
    pub max_nodes: usize,
    /// Largest window/period any windowed function may request.
    pub max_window: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_source_len: 4096,
            max_depth: 64,
            max_nodes: 512,
            max_window: 10_000,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1024,
        }
    }
}

/// Hard ceiling on `max_depth`; deeper trees risk the stack of recursive walks.
pub const MAX_DEPTH_CEILING: usize = 256;
