// src/core/stall.rs
//! Detection of blocks that stopped growing with tags still open.
//!
//! Two signals, both keyed on the last growth time:
//! - `Stalled` once growth has been absent for `timeout`, surfaced to the
//!   renderer as an indicator.
//! - `AbruptlyEnded` after `ticks` consecutive stale ticks, which makes the
//!   lifecycle manager force completion from cached parameters.

use super::block_manager::BlockHandle;
use ahash::AHashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallSignal {
    Stalled,
    AbruptlyEnded,
}

/// Public view of one block's stall tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallState {
    pub block_id: BlockHandle,
    pub consecutive_stale_checks: u32,
    pub marked_stalled: bool,
    pub abruptly_ended: bool,
    pub last_growth_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_growth_at: Instant,
    grew_since_tick: bool,
    consecutive_stale_checks: u32,
    marked_stalled: bool,
    abruptly_ended: bool,
}

#[derive(Debug)]
pub struct StallDetector {
    tick: Duration,
    ticks: u32,
    timeout: Duration,
    entries: AHashMap<BlockHandle, Entry>,
}

impl StallDetector {
    pub fn new(tick: Duration, ticks: u32, timeout: Duration) -> Self {
        Self {
            tick,
            ticks: ticks.max(1),
            timeout,
            entries: AHashMap::new(),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    pub fn track(&mut self, handle: BlockHandle, now: Instant) {
        self.entries.insert(
            handle,
            Entry {
                last_growth_at: now,
                grew_since_tick: false,
                consecutive_stale_checks: 0,
                marked_stalled: false,
                abruptly_ended: false,
            },
        );
    }

    pub fn is_tracked(&self, handle: BlockHandle) -> bool {
        self.entries.contains_key(&handle)
    }

    /// Reset on growth. Returns true when the block had been marked stalled.
    pub fn record_growth(&mut self, handle: BlockHandle, now: Instant) -> bool {
        let Some(entry) = self.entries.get_mut(&handle) else {
            return false;
        };
        let was_stalled = entry.marked_stalled;
        entry.last_growth_at = now;
        entry.grew_since_tick = true;
        entry.consecutive_stale_checks = 0;
        entry.marked_stalled = false;
        was_stalled
    }

    /// Evaluate one fixed tick.
    pub fn on_tick(&mut self, handle: BlockHandle, unbalanced: bool, now: Instant) -> Vec<StallSignal> {
        let mut signals = Vec::new();
        let Some(entry) = self.entries.get_mut(&handle) else {
            return signals;
        };
        if entry.grew_since_tick || !unbalanced {
            entry.grew_since_tick = false;
            entry.consecutive_stale_checks = 0;
            return signals;
        }
        entry.consecutive_stale_checks += 1;

        if !entry.marked_stalled && now.saturating_duration_since(entry.last_growth_at) >= self.timeout {
            entry.marked_stalled = true;
            signals.push(StallSignal::Stalled);
        }
        if !entry.abruptly_ended && entry.consecutive_stale_checks >= self.ticks {
            if !entry.marked_stalled {
                entry.marked_stalled = true;
                signals.push(StallSignal::Stalled);
            }
            entry.abruptly_ended = true;
            signals.push(StallSignal::AbruptlyEnded);
        }
        signals
    }

    /// Evaluate the absolute ceiling independently of the tick count.
    pub fn on_deadline(&mut self, handle: BlockHandle, unbalanced: bool, now: Instant) -> Option<StallSignal> {
        let entry = self.entries.get_mut(&handle)?;
        if !unbalanced
            || entry.marked_stalled
            || now.saturating_duration_since(entry.last_growth_at) < self.timeout
        {
            return None;
        }
        entry.marked_stalled = true;
        Some(StallSignal::Stalled)
    }

    /// When the absolute ceiling will be reached for the current growth.
    pub fn deadline(&self, handle: BlockHandle) -> Option<Instant> {
        self.entries
            .get(&handle)
            .map(|e| e.last_growth_at + self.timeout)
    }

    pub fn state(&self, handle: BlockHandle) -> Option<StallState> {
        self.entries.get(&handle).map(|e| StallState {
            block_id: handle,
            consecutive_stale_checks: e.consecutive_stale_checks,
            marked_stalled: e.marked_stalled,
            abruptly_ended: e.abruptly_ended,
            last_growth_at: e.last_growth_at,
        })
    }

    /// Stop tracking. Idempotent.
    pub fn remove(&mut self, handle: BlockHandle) {
        self.entries.remove(&handle);
    }
}
