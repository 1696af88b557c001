//! Trace log replay
//!
//! Drives the footprint tracker from a captured JSON Lines event log, one
//! event per line in arrival order, with no lookahead and no whole-file
//! buffering. The capture-side trace-enable flag is owned here: host marker
//! events toggle it, and every other event reaches the tracker with the
//! flag's value at that point in the stream.

use std::io::BufRead;

use anyhow::{Context, Result};
use tracing::debug;

use crate::events::TraceEvent;
use crate::footprint::FootprintTracker;

/// Counters describing one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Events decoded from the log.
    pub events: u64,
    /// Host enable/disable markers among them.
    pub toggles: u64,
}

/// Replay a trace log into `tracker`.
///
/// `start_enabled` is the trace-enable state before the first host marker.
/// Malformed lines and call-protocol violations abort the replay with the
/// offending line number.
pub fn replay<R: BufRead>(
    input: R,
    tracker: &mut FootprintTracker,
    start_enabled: bool,
) -> Result<ReplayStats> {
    let mut enabled = start_enabled;
    let mut stats = ReplayStats::default();

    for (index, line) in input.lines().enumerate() {
        let lineno = index + 1;
        let line = line.with_context(|| format!("failed to read trace line {lineno}"))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: TraceEvent = serde_json::from_str(line)
            .with_context(|| format!("malformed trace event at line {lineno}"))?;
        stats.events += 1;

        match event {
            TraceEvent::Host { enabled: on } => {
                enabled = on;
                stats.toggles += 1;
                debug!(enabled, line = lineno, "trace gate toggled");
            }
            other => tracker
                .handle(&other, enabled)
                .with_context(|| format!("protocol violation at line {lineno}"))?,
        }
    }

    debug!(
        events = stats.events,
        toggles = stats.toggles,
        live = tracker.live_instances(),
        "replay complete"
    );
    Ok(stats)
}
