//! Trace event model
//!
//! One event per line of a captured trace log, serialized as JSON. Memory
//! accesses and call-lifecycle markers carry the CPU they were observed on;
//! host markers record toggles of the capture-side trace-enable flag.

use serde::{Deserialize, Serialize};

/// Cache line size used for footprint accounting (bytes).
pub const CACHE_LINE_SIZE: u64 = 64;

/// Mask clearing the low address bits so accesses within one line collapse.
pub const CACHE_LINE_MASK: u64 = !(CACHE_LINE_SIZE - 1);

/// Tag value meaning "no call instance active on this CPU".
pub const NO_ACTIVE_CALL: u64 = 0;

/// Align an address down to its cache line.
#[inline]
pub fn cache_line(addr: u64) -> u64 {
    addr & CACHE_LINE_MASK
}

/// Lifecycle state carried by a call marker.
///
/// Tags identify one in-flight invocation; they are unique only while the
/// invocation is live and may be recycled afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// A previously started invocation becomes current on this CPU again.
    Resume,
    /// A new invocation begins; the entry program counter is recorded.
    Start,
    /// The current invocation is suspended; its footprint is kept.
    Pause,
    /// The current invocation completes and is folded into the aggregates.
    Done,
}

/// One event from a captured trace log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A guest memory access observed on some CPU.
    Access {
        cpu: usize,
        /// Whether the access is externally visible traffic worth counting.
        traffic: bool,
        addr: u64,
    },
    /// A call-lifecycle marker.
    Fcall {
        cpu: usize,
        state: CallState,
        tag: u64,
        /// Entry program counter; meaningful only for `start`.
        #[serde(default)]
        pc: u64,
    },
    /// Capture-side toggle of the global trace-enable flag.
    Host { enabled: bool },
}
