//! Distinct cache-line footprint tracking
//!
//! Consumes the trace event stream one event at a time and aggregates, per
//! traced function entry point, how many distinct cache lines its invocations
//! touched. Each CPU carries at most one live call instance; each live
//! instance owns a growing set of cache-line addresses that survives
//! pause/resume cycles and is folded into the per-function totals when the
//! instance completes.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;
use tracing::trace;

use crate::events::{cache_line, CallState, TraceEvent, NO_ACTIVE_CALL};
use crate::symbols::SymbolResolver;

/// Fatal mismatch between the event stream and the call-lifecycle protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A call instance was reduced without ever recording its entry point.
    #[error("no entry point recorded for call tag {tag:#x}")]
    MissingEntryPoint { tag: u64 },
}

/// Cumulative statistics for one function entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnFootprint {
    /// Completed call instances.
    pub calls: u64,
    /// Distinct cache lines summed over completed call instances.
    pub distinct: u64,
}

impl FnFootprint {
    /// Average distinct cache lines per call.
    pub fn average(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.distinct as f64 / self.calls as f64
        }
    }
}

/// Streaming tracker for per-function distinct cache-line footprints.
///
/// Feed events in arrival order via [`handle`](Self::handle), then call
/// [`flush`](Self::flush) once at end of stream; aggregates are readable at
/// any point but reflect completed calls only.
#[derive(Debug)]
pub struct FootprintTracker {
    /// Current call tag per CPU; `NO_ACTIVE_CALL` when the CPU is idle.
    current: Vec<u64>,
    /// Live distinct cache-line sets keyed by call tag.
    tag_lines: HashMap<u64, HashSet<u64>>,
    /// Entry program counter keyed by call tag.
    tag_entry: HashMap<u64, u64>,
    /// Per-entry-point cumulative stats; only ever grows.
    aggregate: BTreeMap<u64, FnFootprint>,
}

impl FootprintTracker {
    /// Create a tracker dimensioned for `cpus` CPU slots.
    ///
    /// Slots grow on demand if the stream names a larger CPU id.
    pub fn new(cpus: usize) -> Self {
        Self {
            current: vec![NO_ACTIVE_CALL; cpus],
            tag_lines: HashMap::new(),
            tag_entry: HashMap::new(),
            aggregate: BTreeMap::new(),
        }
    }

    fn current_tag(&self, cpu: usize) -> u64 {
        self.current.get(cpu).copied().unwrap_or(NO_ACTIVE_CALL)
    }

    fn set_current(&mut self, cpu: usize, tag: u64) {
        if cpu >= self.current.len() {
            self.current.resize(cpu + 1, NO_ACTIVE_CALL);
        }
        self.current[cpu] = tag;
    }

    /// Consume one trace event.
    ///
    /// `enabled` is the capture-side trace-enable flag at the time of the
    /// event; access events are dropped entirely while it is off. Host
    /// markers are interpreted by the replay driver and ignored here.
    pub fn handle(&mut self, event: &TraceEvent, enabled: bool) -> Result<(), ProtocolError> {
        match *event {
            TraceEvent::Access { cpu, traffic, addr } => {
                if !enabled || !traffic {
                    return Ok(());
                }
                let tag = self.current_tag(cpu);
                // Idle CPUs accumulate into the tag-0 "unknown" bucket.
                self.tag_lines.entry(tag).or_default().insert(cache_line(addr));
            }
            TraceEvent::Fcall { cpu, state, tag, pc } => match state {
                CallState::Resume => {
                    // A capture can begin mid-call; an unseen tag becomes an
                    // empty instance with an unknown entry point.
                    self.tag_lines.entry(tag).or_default();
                    self.tag_entry.entry(tag).or_insert(0);
                    self.set_current(cpu, tag);
                }
                CallState::Start => {
                    self.set_current(cpu, tag);
                    self.tag_lines.entry(tag).or_default();
                    // Overwrites a retired tag's stale mapping; tags are
                    // unique only while live.
                    self.tag_entry.insert(tag, pc);
                }
                CallState::Pause => {
                    // The paused instance keeps its footprint set untouched.
                    self.set_current(cpu, NO_ACTIVE_CALL);
                }
                CallState::Done => {
                    let tag = self.current_tag(cpu);
                    self.reduce(tag)?;
                    self.set_current(cpu, NO_ACTIVE_CALL);
                }
            },
            TraceEvent::Host { .. } => {}
        }
        Ok(())
    }

    /// Reduce every still-live call instance.
    ///
    /// A truncated capture can end with calls live on some CPUs; their
    /// footprints are folded in here. Calling this again is a no-op.
    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        let mut live: Vec<u64> = self
            .tag_lines
            .keys()
            .chain(self.tag_entry.keys())
            .copied()
            .collect();
        live.sort_unstable();
        live.dedup();
        for tag in live {
            self.reduce(tag)?;
        }
        for slot in &mut self.current {
            *slot = NO_ACTIVE_CALL;
        }
        Ok(())
    }

    /// Fold one call instance into the per-function aggregate.
    fn reduce(&mut self, tag: u64) -> Result<(), ProtocolError> {
        let distinct = self
            .tag_lines
            .remove(&tag)
            .map_or(0, |lines| lines.len() as u64);
        let entry = match self.tag_entry.remove(&tag) {
            Some(pc) => pc,
            // The idle bucket never sees a start marker; its entry point is 0.
            None if tag == NO_ACTIVE_CALL => 0,
            None => return Err(ProtocolError::MissingEntryPoint { tag }),
        };
        let stats = self.aggregate.entry(entry).or_default();
        stats.distinct += distinct;
        stats.calls += 1;
        trace!(tag, entry, distinct, "reduced call instance");
        Ok(())
    }

    /// Distinct-line total for the function named `function`, resolving each
    /// aggregated entry point through `resolver`.
    pub fn distinct_for(&self, function: &str, resolver: &dyn SymbolResolver) -> Option<u64> {
        self.aggregate.iter().find_map(|(&pc, stats)| {
            resolver
                .lookup(pc)
                .filter(|sym| sym.function == function)
                .map(|_| stats.distinct)
        })
    }

    /// Aggregate rows ordered by entry point.
    pub fn snapshot(&self) -> Vec<(u64, FnFootprint)> {
        self.aggregate.iter().map(|(&pc, &stats)| (pc, stats)).collect()
    }

    /// Number of call instances still live (started or resumed, not reduced).
    pub fn live_instances(&self) -> usize {
        self.tag_lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Symbol;

    fn access(cpu: usize, addr: u64) -> TraceEvent {
        TraceEvent::Access {
            cpu,
            traffic: true,
            addr,
        }
    }

    fn fcall(cpu: usize, state: CallState, tag: u64, pc: u64) -> TraceEvent {
        TraceEvent::Fcall {
            cpu,
            state,
            tag,
            pc,
        }
    }

    fn feed(tracker: &mut FootprintTracker, events: &[TraceEvent]) {
        for event in events {
            tracker.handle(event, true).unwrap();
        }
    }

    fn footprint_of(tracker: &FootprintTracker, entry: u64) -> FnFootprint {
        tracker
            .snapshot()
            .into_iter()
            .find(|&(pc, _)| pc == entry)
            .map(|(_, stats)| stats)
            .unwrap_or_else(|| panic!("no aggregate entry for {entry:#x}"))
    }

    struct NamedResolver(Vec<(u64, &'static str)>);

    impl SymbolResolver for NamedResolver {
        fn lookup(&self, addr: u64) -> Option<Symbol> {
            self.0
                .iter()
                .find(|&&(pc, _)| pc == addr)
                .map(|&(_, name)| Symbol {
                    function: name.to_string(),
                    file: None,
                    line: None,
                })
        }
    }

    #[test]
    fn test_single_call_collapses_cache_lines() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                access(0, 0x40),
                access(0, 0x7f), // same line as 0x40
                access(0, 0x80),
                fcall(0, CallState::Done, 1, 0),
            ],
        );
        assert_eq!(
            footprint_of(&tracker, 0x1000),
            FnFootprint {
                calls: 1,
                distinct: 2
            }
        );
    }

    #[test]
    fn test_back_to_back_calls_accumulate() {
        let mut tracker = FootprintTracker::new(1);
        for base in [0x1000u64, 0x2000] {
            feed(
                &mut tracker,
                &[
                    fcall(0, CallState::Start, 1, 0x400),
                    access(0, base),
                    access(0, base + 0x40),
                    access(0, base + 0x80),
                    fcall(0, CallState::Done, 1, 0),
                ],
            );
        }
        let stats = footprint_of(&tracker, 0x400);
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.distinct, 6);
        assert!((stats.average() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disabled_gate_drops_accesses() {
        let mut tracker = FootprintTracker::new(1);
        tracker
            .handle(&fcall(0, CallState::Start, 1, 0x1000), true)
            .unwrap();
        tracker.handle(&access(0, 0x40), false).unwrap();
        tracker
            .handle(&fcall(0, CallState::Done, 1, 0), true)
            .unwrap();
        assert_eq!(
            footprint_of(&tracker, 0x1000),
            FnFootprint {
                calls: 1,
                distinct: 0
            }
        );
    }

    #[test]
    fn test_non_traffic_access_ignored() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                TraceEvent::Access {
                    cpu: 0,
                    traffic: false,
                    addr: 0x40,
                },
                access(0, 0x80),
                fcall(0, CallState::Done, 1, 0),
            ],
        );
        assert_eq!(footprint_of(&tracker, 0x1000).distinct, 1);
    }

    #[test]
    fn test_idle_accesses_land_in_unknown_bucket() {
        let mut tracker = FootprintTracker::new(1);
        feed(&mut tracker, &[access(0, 0x40), access(0, 0x80)]);
        tracker.flush().unwrap();
        let stats = footprint_of(&tracker, 0);
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.distinct, 2);
    }

    #[test]
    fn test_pause_resume_preserves_footprint() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                access(0, 0x40),
                fcall(0, CallState::Pause, 1, 0),
                // Unrelated call runs on the same CPU while tag 1 is paused
                fcall(0, CallState::Start, 2, 0x2000),
                access(0, 0x3000),
                fcall(0, CallState::Done, 2, 0),
                fcall(0, CallState::Resume, 1, 0),
                access(0, 0x80),
                fcall(0, CallState::Done, 1, 0),
            ],
        );
        assert_eq!(
            footprint_of(&tracker, 0x1000),
            FnFootprint {
                calls: 1,
                distinct: 2
            }
        );
        assert_eq!(
            footprint_of(&tracker, 0x2000),
            FnFootprint {
                calls: 1,
                distinct: 1
            }
        );
    }

    #[test]
    fn test_paused_accesses_do_not_leak_into_paused_call() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                fcall(0, CallState::Pause, 1, 0),
                access(0, 0x5000), // CPU is idle, goes to the unknown bucket
                fcall(0, CallState::Resume, 1, 0),
                fcall(0, CallState::Done, 1, 0),
            ],
        );
        tracker.flush().unwrap();
        assert_eq!(footprint_of(&tracker, 0x1000).distinct, 0);
        assert_eq!(footprint_of(&tracker, 0).distinct, 1);
    }

    #[test]
    fn test_concurrent_cpus_are_isolated() {
        let mut tracker = FootprintTracker::new(2);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                fcall(1, CallState::Start, 2, 0x2000),
                access(0, 0x100),
                access(1, 0x9100),
                access(0, 0x140),
                access(1, 0x9140),
                fcall(0, CallState::Done, 1, 0),
                fcall(1, CallState::Done, 2, 0),
            ],
        );
        assert_eq!(footprint_of(&tracker, 0x1000).distinct, 2);
        assert_eq!(footprint_of(&tracker, 0x2000).distinct, 2);
    }

    #[test]
    fn test_flush_reduces_live_calls() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[fcall(0, CallState::Start, 1, 0x1000), access(0, 0x40)],
        );
        assert!(tracker.snapshot().is_empty());
        tracker.flush().unwrap();
        assert_eq!(
            footprint_of(&tracker, 0x1000),
            FnFootprint {
                calls: 1,
                distinct: 1
            }
        );
        assert_eq!(tracker.live_instances(), 0);
    }

    #[test]
    fn test_flush_after_done_is_noop() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                access(0, 0x40),
                fcall(0, CallState::Done, 1, 0),
            ],
        );
        tracker.flush().unwrap();
        let before = tracker.snapshot();
        tracker.flush().unwrap();
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn test_flush_counts_touchless_call() {
        let mut tracker = FootprintTracker::new(1);
        feed(&mut tracker, &[fcall(0, CallState::Start, 1, 0x1000)]);
        tracker.flush().unwrap();
        assert_eq!(
            footprint_of(&tracker, 0x1000),
            FnFootprint {
                calls: 1,
                distinct: 0
            }
        );
    }

    #[test]
    fn test_resume_of_unseen_tag_attributes_to_unknown() {
        // Capture started mid-call: resume arrives with no prior start
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Resume, 9, 0),
                access(0, 0x40),
                fcall(0, CallState::Done, 9, 0),
            ],
        );
        assert_eq!(
            footprint_of(&tracker, 0),
            FnFootprint {
                calls: 1,
                distinct: 1
            }
        );
    }

    #[test]
    fn test_done_on_idle_cpu_reduces_unknown_bucket() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[access(0, 0x40), fcall(0, CallState::Done, 3, 0)],
        );
        assert_eq!(
            footprint_of(&tracker, 0),
            FnFootprint {
                calls: 1,
                distinct: 1
            }
        );
    }

    #[test]
    fn test_tag_reuse_after_retirement() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                access(0, 0x40),
                fcall(0, CallState::Done, 1, 0),
                // Same tag value, different function
                fcall(0, CallState::Start, 1, 0x2000),
                access(0, 0x80),
                fcall(0, CallState::Done, 1, 0),
            ],
        );
        assert_eq!(footprint_of(&tracker, 0x1000).distinct, 1);
        assert_eq!(footprint_of(&tracker, 0x2000).distinct, 1);
    }

    #[test]
    fn test_cpu_slots_grow_on_demand() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(5, CallState::Start, 1, 0x1000),
                access(5, 0x40),
                fcall(5, CallState::Done, 1, 0),
            ],
        );
        assert_eq!(footprint_of(&tracker, 0x1000).distinct, 1);
    }

    #[test]
    fn test_host_events_are_ignored_by_tracker() {
        let mut tracker = FootprintTracker::new(1);
        tracker
            .handle(&TraceEvent::Host { enabled: false }, true)
            .unwrap();
        assert!(tracker.snapshot().is_empty());
        assert_eq!(tracker.live_instances(), 0);
    }

    #[test]
    fn test_distinct_for_resolves_by_name() {
        let mut tracker = FootprintTracker::new(1);
        feed(
            &mut tracker,
            &[
                fcall(0, CallState::Start, 1, 0x1000),
                access(0, 0x40),
                access(0, 0x80),
                fcall(0, CallState::Done, 1, 0),
            ],
        );
        let resolver = NamedResolver(vec![(0x1000, "sys_read")]);
        assert_eq!(tracker.distinct_for("sys_read", &resolver), Some(2));
        assert_eq!(tracker.distinct_for("sys_write", &resolver), None);
    }

    #[test]
    fn test_fn_footprint_average_guards_zero_calls() {
        let stats = FnFootprint::default();
        assert_eq!(stats.average(), 0.0);
    }
}
