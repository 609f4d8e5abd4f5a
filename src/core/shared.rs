// src/core/shared.rs
//! Thread-safe handle to a [`LifecycleManager`].
//!
//! Entry points wait at most `lock_timeout` for the manager. When the lock is
//! contended the call is queued and replayed, in order, by whichever caller
//! next gets the lock, so host callbacks never block for long.

use super::block_manager::BlockHandle;
use super::lifecycle::{ExecutionStart, ExecutionTicket, LifecycleManager};
use crate::invoker::InvocationError;
use crate::renderer::RendererAdapter;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub enum EntryResult<T> {
    Done(T),
    /// The lock was busy; the call was queued.
    Deferred,
}

impl<T> EntryResult<T> {
    pub fn is_deferred(&self) -> bool {
        matches!(self, EntryResult::Deferred)
    }

    pub fn done(self) -> Option<T> {
        match self {
            EntryResult::Done(v) => Some(v),
            EntryResult::Deferred => None,
        }
    }
}

#[derive(Debug)]
enum Deferred {
    Growth { source_id: String, snapshot: String, at: Instant },
    Refresh { source_id: String, snapshot: String, at: Instant },
    Removed { source_id: String, at: Instant },
    Advance { at: Instant },
    Begin { handle: BlockHandle },
    Finish {
        ticket: ExecutionTicket,
        outcome: Result<Value, InvocationError>,
        at: Instant,
    },
}

pub struct SharedManager<R: RendererAdapter> {
    inner: Arc<Mutex<LifecycleManager<R>>>,
    backlog: Arc<Mutex<VecDeque<Deferred>>>,
    lock_timeout: Duration,
}

impl<R: RendererAdapter> Clone for SharedManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            backlog: self.backlog.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<R: RendererAdapter> SharedManager<R> {
    pub fn new(manager: LifecycleManager<R>) -> Self {
        let lock_timeout = manager.config().lock_timeout();
        Self {
            inner: Arc::new(Mutex::new(manager)),
            backlog: Arc::new(Mutex::new(VecDeque::new())),
            lock_timeout,
        }
    }

    fn enter(&self) -> Option<parking_lot::MutexGuard<'_, LifecycleManager<R>>> {
        let mut guard = self.inner.try_lock_for(self.lock_timeout)?;
        let queued: Vec<Deferred> = self.backlog.lock().drain(..).collect();
        if !queued.is_empty() {
            crate::log_debug!("Replaying {} deferred call(s)", queued.len());
        }
        for call in queued {
            replay(&mut guard, call);
        }
        Some(guard)
    }

    fn defer(&self, call: Deferred) {
        crate::log_debug!("Lifecycle manager busy, deferring {:?}", call);
        self.backlog.lock().push_back(call);
    }

    pub fn on_growth(&self, source_id: &str, snapshot: &str, now: Instant) -> EntryResult<Option<BlockHandle>> {
        match self.enter() {
            Some(mut m) => EntryResult::Done(m.on_growth(source_id, snapshot, now)),
            None => {
                self.defer(Deferred::Growth {
                    source_id: source_id.to_string(),
                    snapshot: snapshot.to_string(),
                    at: now,
                });
                EntryResult::Deferred
            }
        }
    }

    pub fn on_refresh(&self, source_id: &str, snapshot: &str, now: Instant) -> EntryResult<Option<BlockHandle>> {
        match self.enter() {
            Some(mut m) => EntryResult::Done(m.on_refresh(source_id, snapshot, now)),
            None => {
                self.defer(Deferred::Refresh {
                    source_id: source_id.to_string(),
                    snapshot: snapshot.to_string(),
                    at: now,
                });
                EntryResult::Deferred
            }
        }
    }

    pub fn on_removed(&self, source_id: &str, now: Instant) -> EntryResult<Option<BlockHandle>> {
        match self.enter() {
            Some(mut m) => EntryResult::Done(m.on_removed(source_id, now)),
            None => {
                self.defer(Deferred::Removed {
                    source_id: source_id.to_string(),
                    at: now,
                });
                EntryResult::Deferred
            }
        }
    }

    pub fn advance(&self, now: Instant) -> EntryResult<()> {
        match self.enter() {
            Some(mut m) => EntryResult::Done(m.advance(now)),
            None => {
                self.defer(Deferred::Advance { at: now });
                EntryResult::Deferred
            }
        }
    }

    pub fn begin_execution(&self, handle: BlockHandle) -> EntryResult<ExecutionStart> {
        match self.enter() {
            Some(mut m) => EntryResult::Done(m.begin_execution(handle)),
            None => {
                self.defer(Deferred::Begin { handle });
                EntryResult::Deferred
            }
        }
    }

    pub fn finish_execution(
        &self,
        ticket: ExecutionTicket,
        outcome: Result<Value, InvocationError>,
        now: Instant,
    ) -> EntryResult<bool> {
        match self.enter() {
            Some(mut m) => EntryResult::Done(m.finish_execution(ticket, outcome, now)),
            None => {
                self.defer(Deferred::Finish {
                    ticket,
                    outcome,
                    at: now,
                });
                EntryResult::Deferred
            }
        }
    }

    /// Run `f` with the manager, after replaying the backlog.
    pub fn with<T>(&self, f: impl FnOnce(&mut LifecycleManager<R>) -> T) -> Option<T> {
        self.enter().map(|mut m| f(&mut m))
    }

    /// Replay the backlog. Returns false if the lock is still busy.
    pub fn flush(&self) -> bool {
        self.enter().is_some()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }
}

fn replay<R: RendererAdapter>(m: &mut LifecycleManager<R>, call: Deferred) {
    match call {
        Deferred::Growth { source_id, snapshot, at } => {
            m.on_growth(&source_id, &snapshot, at);
        }
        Deferred::Refresh { source_id, snapshot, at } => {
            m.on_refresh(&source_id, &snapshot, at);
        }
        Deferred::Removed { source_id, at } => {
            m.on_removed(&source_id, at);
        }
        Deferred::Advance { at } => m.advance(at),
        Deferred::Begin { handle } => {
            m.begin_execution(handle);
        }
        Deferred::Finish { ticket, outcome, at } => {
            m.finish_execution(ticket, outcome, at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlockState;
    use crate::renderer::NullRenderer;
    use crate::utils::config::StreamConfig;

    const SEARCH: &str = r#"<function_calls><invoke name="search" call_id="1"><parameter name="q">hello</parameter></invoke></function_calls>"#;

    fn shared() -> SharedManager<NullRenderer> {
        let config = StreamConfig {
            lock_timeout_ms: 5,
            debounce_ms: 0,
            auto_execute: false,
            ..StreamConfig::default()
        };
        SharedManager::new(LifecycleManager::new(config, NullRenderer).with_transcript(None))
    }

    #[test]
    fn test_contended_call_is_deferred_then_replayed() {
        let s = shared();
        let t0 = Instant::now();
        {
            let _held = s.inner.lock();
            assert!(s.on_growth("msg", SEARCH, t0).is_deferred());
            assert_eq!(s.backlog_len(), 1);
        }
        let live = s.with(|m| m.live_blocks()).unwrap();
        assert_eq!(live, 1);
        assert_eq!(s.backlog_len(), 0);
    }

    #[test]
    fn test_clones_share_one_manager() {
        let s = shared();
        let other = s.clone();
        let t0 = Instant::now();
        let h = s.on_growth("msg", SEARCH, t0).done().flatten().unwrap();
        other.advance(t0 + Duration::from_millis(250));
        let state = other.with(|m| m.view(h).map(|v| v.state)).flatten();
        assert_eq!(state, Some(BlockState::Complete));
    }

    #[test]
    fn test_deferred_calls_keep_order() {
        let s = shared();
        let t0 = Instant::now();
        {
            let _held = s.inner.lock();
            s.on_growth("msg", SEARCH, t0);
            s.on_removed("msg", t0 + Duration::from_millis(1));
        }
        assert!(s.flush());
        assert_eq!(s.with(|m| m.live_blocks()), Some(0));
    }
}
