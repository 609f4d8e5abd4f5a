// src/core/scheduler.rs
use super::block_manager::BlockHandle;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Trailing edge of the growth debounce.
    Debounce,
    /// Follow-up completeness check for the stability tracker.
    StabilityRecheck,
    /// Fixed stall detector tick.
    StallTick,
    /// Absolute stall ceiling.
    StallDeadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timer {
    pub handle: BlockHandle,
    pub kind: TimerKind,
}

/// Deadline queue driving every delayed action of the lifecycle manager.
/// Timers for destroyed blocks are popped normally and ignored by the caller,
/// so cancellation never has to search the heap.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, Timer)>>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, handle: BlockHandle, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((at, seq, Timer { handle, kind })));
    }

    /// Pop every timer due at `now`, earliest first, insertion order on ties.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due = Vec::new();
        while let Some(Reverse((at, _, _))) = self.heap.peek() {
            if *at > now {
                break;
            }
            if let Some(Reverse((_, _, timer))) = self.heap.pop() {
                due.push(timer);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _, _))| *at)
    }

    /// Drop every timer belonging to `handle`.
    pub fn cancel(&mut self, handle: BlockHandle) {
        self.heap.retain(|Reverse((_, _, t))| t.handle != handle);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::Block;
    use crate::core::block_manager::BlockArena;
    use std::time::Duration;

    fn handles() -> (BlockHandle, BlockHandle) {
        let mut arena = BlockArena::new();
        let a = arena.insert(Block::new("a".into(), String::new(), Instant::now()));
        let b = arena.insert(Block::new("b".into(), String::new(), Instant::now()));
        (a, b)
    }

    #[test]
    fn test_pop_due_in_deadline_order() {
        let (a, b) = handles();
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(t0 + Duration::from_millis(30), a, TimerKind::StallTick);
        q.schedule(t0 + Duration::from_millis(10), b, TimerKind::Debounce);
        q.schedule(t0 + Duration::from_millis(50), a, TimerKind::StallDeadline);
        assert_eq!(q.next_deadline(), Some(t0 + Duration::from_millis(10)));

        let due = q.pop_due(t0 + Duration::from_millis(30));
        assert_eq!(
            due,
            vec![
                Timer { handle: b, kind: TimerKind::Debounce },
                Timer { handle: a, kind: TimerKind::StallTick },
            ]
        );
        assert_eq!(q.len(), 1);
        assert!(q.pop_due(t0 + Duration::from_millis(49)).is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let (a, _) = handles();
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(t0, a, TimerKind::StallDeadline);
        q.schedule(t0, a, TimerKind::StallTick);
        let kinds: Vec<_> = q.pop_due(t0).into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TimerKind::StallDeadline, TimerKind::StallTick]);
    }

    #[test]
    fn test_cancel() {
        let (a, b) = handles();
        let t0 = Instant::now();
        let mut q = TimerQueue::new();
        q.schedule(t0, a, TimerKind::Debounce);
        q.schedule(t0, b, TimerKind::Debounce);
        q.cancel(a);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_due(t0)[0].handle, b);
        assert!(q.is_empty());
    }
}
