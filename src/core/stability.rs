// src/core/stability.rs
//! Anti-jitter confirmation of completeness.
//!
//! A block counts as stable only after `required` consecutive positive checks,
//! each at least `min_interval` after the previously counted one. A negative
//! check resets the run; so does a silence longer than `window`.

use super::block_manager::BlockHandle;
use ahash::AHashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Entry {
    consecutive: u32,
    last_counted: Instant,
    last_check: Instant,
}

#[derive(Debug)]
pub struct StabilityTracker {
    required: u32,
    min_interval: Duration,
    window: Duration,
    entries: AHashMap<BlockHandle, Entry>,
}

impl StabilityTracker {
    pub fn new(required: u32, min_interval: Duration, window: Duration) -> Self {
        Self {
            required: required.max(1),
            min_interval,
            window,
            entries: AHashMap::new(),
        }
    }

    /// Record one completeness check and report whether the block is stable.
    pub fn check(&mut self, handle: BlockHandle, complete: bool, now: Instant) -> bool {
        if !complete {
            self.entries.remove(&handle);
            return false;
        }
        let entry = self.entries.entry(handle).or_insert(Entry {
            consecutive: 0,
            last_counted: now,
            last_check: now,
        });
        if entry.consecutive == 0 || now.saturating_duration_since(entry.last_check) > self.window {
            entry.consecutive = 1;
            entry.last_counted = now;
        } else if now.saturating_duration_since(entry.last_counted) >= self.min_interval {
            entry.consecutive += 1;
            entry.last_counted = now;
        }
        entry.last_check = now;
        entry.consecutive >= self.required
    }

    pub fn is_stable(&self, handle: BlockHandle) -> bool {
        self.entries
            .get(&handle)
            .is_some_and(|e| e.consecutive >= self.required)
    }

    /// When the next check could be counted, if one is pending.
    pub fn next_recheck(&self, handle: BlockHandle) -> Option<Instant> {
        self.entries
            .get(&handle)
            .filter(|e| e.consecutive < self.required)
            .map(|e| e.last_counted + self.min_interval)
    }

    pub fn remove(&mut self, handle: BlockHandle) {
        self.entries.remove(&handle);
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::Block;
    use crate::core::block_manager::BlockArena;

    fn handle() -> BlockHandle {
        let mut arena = BlockArena::new();
        arena.insert(Block::new("s".into(), String::new(), Instant::now()))
    }

    fn tracker() -> StabilityTracker {
        StabilityTracker::new(2, Duration::from_millis(200), Duration::from_millis(1000))
    }

    #[test]
    fn test_two_checks_200ms_apart() {
        let mut t = tracker();
        let h = handle();
        let t0 = Instant::now();
        assert!(!t.check(h, true, t0));
        assert_eq!(t.next_recheck(h), Some(t0 + Duration::from_millis(200)));
        assert!(!t.check(h, true, t0 + Duration::from_millis(100)));
        assert!(t.check(h, true, t0 + Duration::from_millis(200)));
        assert!(t.is_stable(h));
        assert_eq!(t.next_recheck(h), None);
    }

    #[test]
    fn test_negative_check_resets() {
        let mut t = tracker();
        let h = handle();
        let t0 = Instant::now();
        t.check(h, true, t0);
        t.check(h, false, t0 + Duration::from_millis(150));
        assert!(!t.check(h, true, t0 + Duration::from_millis(250)));
        assert!(t.check(h, true, t0 + Duration::from_millis(450)));
    }

    #[test]
    fn test_long_gap_restarts_count() {
        let mut t = tracker();
        let h = handle();
        let t0 = Instant::now();
        t.check(h, true, t0);
        // gap exceeds the window: this check starts a new run
        assert!(!t.check(h, true, t0 + Duration::from_millis(1500)));
        assert!(t.check(h, true, t0 + Duration::from_millis(1700)));
    }

    #[test]
    fn test_remove() {
        let mut t = tracker();
        let h = handle();
        t.check(h, true, Instant::now());
        assert_eq!(t.tracked(), 1);
        t.remove(h);
        assert_eq!(t.tracked(), 0);
        assert!(!t.is_stable(h));
    }
}
