// src/core/lifecycle.rs
//! Block lifecycle manager.
//!
//! One state machine per block:
//!
//! ```text
//! Streaming -> Complete -> Executing -> Resulted | Errored
//! ```
//!
//! The manager is synchronous. Every entry point takes the current `Instant`
//! and delayed work (debounce, stability rechecks, stall ticks and deadlines)
//! is queued in a [`TimerQueue`] that the host drives through
//! [`advance`](LifecycleManager::advance). Tool invocations are handed out by
//! [`take_dispatches`](LifecycleManager::take_dispatches) and their outcomes
//! come back through [`finish_execution`](LifecycleManager::finish_execution).

use super::block::{merge_parameters, Block, BlockState, BlockView, LifecycleEvent};
use super::block_manager::{BlockArena, BlockHandle};
use super::execution_cache::ExecutionCache;
use super::scheduler::{Timer, TimerKind, TimerQueue};
use super::stability::StabilityTracker;
use super::stall::{StallDetector, StallSignal};
use crate::invoker::{ConnectivityStatus, InvocationError};
use crate::renderer::RendererAdapter;
use crate::tools::coerce::coerce_value;
use crate::tools::helpers::{build_tool_schema_map, log_invocations, validate_invocation};
use crate::tools::matcher::{lookback_tail, TagMatcher, FUNCTION_CALLS_OPEN, MAX_MARKER_LEN};
use crate::tools::parser::{parse, ParseOutcome};
use crate::tools::{generate_call_id, Invocation, ToolDefinition};
use crate::utils::config::StreamConfig;
use crate::utils::logger::TranscriptLogger;
use ahash::AHashMap;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Identifies one dispatch of one block. An outcome is accepted once, and
/// only while the block still exists and is executing that dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionTicket {
    pub handle: BlockHandle,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingInvocation {
    pub ticket: ExecutionTicket,
    pub invocation: Invocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionStart {
    /// Queued for the tool invoker.
    Dispatched(ExecutionTicket),
    /// An identical invocation is already running; its outcome is shared.
    Joined(ExecutionTicket),
    /// Resolved from the execution cache without invoking.
    FromCache,
    /// Schema validation failed; the block is Errored.
    Rejected(InvocationError),
    /// Unknown handle, or the block is not Complete.
    Ignored,
}

#[derive(Debug, Clone, Copy)]
enum SourceSlot {
    /// No start marker seen yet in the first `seen_len` bytes.
    Scanning { seen_len: usize },
    Block(BlockHandle),
}

#[derive(Debug)]
struct InFlight {
    followers: Vec<ExecutionTicket>,
}

pub struct LifecycleManager<R: RendererAdapter> {
    config: StreamConfig,
    matcher: TagMatcher,
    blocks: BlockArena,
    sources: AHashMap<String, SourceSlot>,
    stability: StabilityTracker,
    stall: StallDetector,
    timers: TimerQueue,
    cache: ExecutionCache,
    /// Signature -> blocks waiting on the running invocation.
    in_flight: AHashMap<String, InFlight>,
    dispatched: AHashMap<ExecutionTicket, Invocation>,
    dispatches: VecDeque<PendingInvocation>,
    events: Vec<LifecycleEvent>,
    schemas: AHashMap<String, Value>,
    connectivity: ConnectivityStatus,
    renderer: R,
    transcript: Option<Arc<TranscriptLogger>>,
}

impl<R: RendererAdapter> LifecycleManager<R> {
    pub fn new(config: StreamConfig, renderer: R) -> Self {
        Self {
            matcher: TagMatcher::new(config.significance_threshold),
            blocks: BlockArena::new(),
            sources: AHashMap::new(),
            stability: StabilityTracker::new(
                config.stability_checks,
                config.stability_interval(),
                config.stability_window(),
            ),
            stall: StallDetector::new(config.stall_tick(), config.stall_ticks, config.stall_timeout()),
            timers: TimerQueue::new(),
            cache: ExecutionCache::new(config.cache_capacity),
            in_flight: AHashMap::new(),
            dispatched: AHashMap::new(),
            dispatches: VecDeque::new(),
            events: Vec::new(),
            schemas: AHashMap::new(),
            connectivity: ConnectivityStatus::new(),
            renderer,
            transcript: TranscriptLogger::new(),
            config,
        }
    }

    /// Share a connectivity flag with other collaborators.
    pub fn with_connectivity(mut self, connectivity: ConnectivityStatus) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_transcript(mut self, transcript: Option<Arc<TranscriptLogger>>) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn register_tool(&mut self, tool: ToolDefinition) {
        self.schemas.insert(tool.name, tool.parameters);
    }

    pub fn register_tools(&mut self, tools: &[ToolDefinition]) {
        self.schemas.extend(build_tool_schema_map(tools));
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &ConnectivityStatus {
        &self.connectivity
    }

    pub fn cache(&self) -> &ExecutionCache {
        &self.cache
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn view(&self, handle: BlockHandle) -> Option<BlockView> {
        self.blocks.get(handle).map(|b| b.view(handle))
    }

    pub fn views(&self) -> Vec<BlockView> {
        self.blocks.iter().map(|(h, b)| b.view(h)).collect()
    }

    pub fn handle_for(&self, source_id: &str) -> Option<BlockHandle> {
        match self.sources.get(source_id) {
            Some(SourceSlot::Block(h)) => Some(*h),
            _ => None,
        }
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Invocations dispatched and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.dispatched.len()
    }

    /// Nothing is streaming and nothing is waiting on the invoker.
    pub fn is_idle(&self) -> bool {
        self.dispatched.is_empty() && !self.blocks.iter().any(|(_, b)| b.state.is_streaming())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn take_dispatches(&mut self) -> Vec<PendingInvocation> {
        self.dispatches.drain(..).collect()
    }

    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }

    /// The content of `source_id` grew; `snapshot` is its full current text.
    /// Returns the block bound to the source, if any.
    pub fn on_growth(&mut self, source_id: &str, snapshot: &str, now: Instant) -> Option<BlockHandle> {
        match self.sources.get(source_id).copied() {
            Some(SourceSlot::Block(h)) => {
                self.grow(h, snapshot, now);
                Some(h)
            }
            Some(SourceSlot::Scanning { seen_len }) => self.scan(source_id, snapshot, seen_len, now),
            None => self.scan(source_id, snapshot, 0, now),
        }
    }

    /// The host re-rendered `source_id` and the text may differ from what was
    /// streamed before.
    pub fn on_refresh(&mut self, source_id: &str, snapshot: &str, now: Instant) -> Option<BlockHandle> {
        match self.sources.get(source_id).copied() {
            Some(SourceSlot::Block(h)) => {
                self.refresh_block(h, snapshot, now);
                Some(h)
            }
            _ => self.scan(source_id, snapshot, 0, now),
        }
    }

    pub fn on_removed(&mut self, source_id: &str, now: Instant) -> Option<BlockHandle> {
        match self.sources.remove(source_id) {
            Some(SourceSlot::Block(h)) => {
                self.destroy(h, now);
                Some(h)
            }
            _ => None,
        }
    }

    /// Tear a block down. Idempotent; later callbacks for it are no-ops.
    pub fn destroy(&mut self, handle: BlockHandle, now: Instant) -> bool {
        let Some(block) = self.blocks.remove(handle) else {
            return false;
        };
        self.stability.remove(handle);
        self.stall.remove(handle);
        self.timers.cancel(handle);
        if matches!(self.sources.get(&block.source_id), Some(SourceSlot::Block(h)) if *h == handle) {
            self.sources.remove(&block.source_id);
        }
        crate::log_debug!("{} destroyed after {:?} in {:?}", handle, block.age(now), block.state);
        self.renderer.remove_block(handle);
        self.emit(LifecycleEvent::Destroyed { handle });
        true
    }

    /// Fire every timer due at `now`.
    pub fn advance(&mut self, now: Instant) {
        loop {
            let due = self.timers.pop_due(now);
            if due.is_empty() {
                break;
            }
            for timer in due {
                self.fire(timer, now);
            }
        }
    }

    /// Move a Complete block to execution. Called automatically on completion
    /// when `auto_execute` is set.
    pub fn begin_execution(&mut self, handle: BlockHandle) -> ExecutionStart {
        let Some(block) = self.blocks.get(handle) else {
            return ExecutionStart::Ignored;
        };
        if block.state != BlockState::Complete {
            return ExecutionStart::Ignored;
        }
        let Some(invocation) = block.invocation.clone() else {
            return ExecutionStart::Ignored;
        };

        let invocation = match validate_invocation(&invocation, &self.schemas) {
            Ok(valid) => valid,
            Err(error) => {
                self.cache.record(&invocation, Err(error.clone()));
                self.resolve(handle, Err(error.clone()), false);
                return ExecutionStart::Rejected(error);
            }
        };
        if let Some(block) = self.blocks.get_mut(handle) {
            block.invocation = Some(invocation.clone());
        }

        let cached = self
            .cache
            .lookup_signature(&invocation.content_signature)
            .and_then(|record| record.outcome.clone().ok().map(|v| (record.call_id.clone(), v)));
        if let Some((first_call, value)) = cached {
            crate::log_info!(
                "{} {} resolved from cache (first run as {})",
                handle,
                invocation.call_id,
                first_call
            );
            self.cache.record(&invocation, Ok(value.clone()));
            self.resolve(handle, Ok(value), true);
            return ExecutionStart::FromCache;
        }

        let Some(block) = self.blocks.get_mut(handle) else {
            return ExecutionStart::Ignored;
        };
        block.execution_seq += 1;
        block.state = BlockState::Executing;
        let ticket = ExecutionTicket {
            handle,
            seq: block.execution_seq,
        };
        self.emit(LifecycleEvent::ExecutionStarted {
            handle,
            call_id: invocation.call_id.clone(),
        });
        self.render(handle);

        if let Some(flight) = self.in_flight.get_mut(&invocation.content_signature) {
            crate::log_info!(
                "{} joins the running invocation {}",
                handle,
                invocation.content_signature
            );
            flight.followers.push(ticket);
            return ExecutionStart::Joined(ticket);
        }
        self.in_flight.insert(
            invocation.content_signature.clone(),
            InFlight { followers: Vec::new() },
        );
        self.dispatched.insert(ticket, invocation.clone());
        self.dispatches.push_back(PendingInvocation { ticket, invocation });
        ExecutionStart::Dispatched(ticket)
    }

    /// Report the outcome of a dispatched invocation. Returns whether any
    /// block took it.
    pub fn finish_execution(
        &mut self,
        ticket: ExecutionTicket,
        outcome: Result<Value, InvocationError>,
        now: Instant,
    ) -> bool {
        self.connectivity.observe(&outcome);
        let Some(invocation) = self.dispatched.remove(&ticket) else {
            crate::log_debug!("Dropping outcome for unknown ticket {:?}", ticket);
            return false;
        };
        if let Some(t) = &self.transcript {
            t.log_invocation("finished", &invocation);
        }
        self.cache.record(&invocation, outcome.clone());
        let followers = self
            .in_flight
            .remove(&invocation.content_signature)
            .map(|f| f.followers)
            .unwrap_or_default();

        if let Some(block) = self.blocks.get(ticket.handle) {
            crate::log_debug!("{} outcome after {:?}", ticket.handle, block.age(now));
        }
        let mut applied = self.apply_outcome(ticket, outcome.clone(), false);
        for follower in followers {
            let follower_invocation = self
                .blocks
                .get(follower.handle)
                .and_then(|b| b.invocation.clone());
            if let Some(inv) = follower_invocation {
                self.cache.record(&inv, outcome.clone());
            }
            applied |= self.apply_outcome(follower, outcome.clone(), true);
        }
        applied
    }

    fn apply_outcome(
        &mut self,
        ticket: ExecutionTicket,
        outcome: Result<Value, InvocationError>,
        from_cache: bool,
    ) -> bool {
        match self.blocks.get(ticket.handle) {
            Some(block) if block.execution_seq == ticket.seq && block.state == BlockState::Executing => {}
            _ => {
                crate::log_debug!("Ignoring outcome for stale {:?}", ticket);
                return false;
            }
        }
        self.resolve(ticket.handle, outcome, from_cache);
        true
    }

    fn resolve(&mut self, handle: BlockHandle, outcome: Result<Value, InvocationError>, from_cache: bool) {
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        let call_id = block.call_id.clone().unwrap_or_default();
        let event = match outcome {
            Ok(value) => {
                block.state = BlockState::Resulted;
                block.result = Some(value);
                LifecycleEvent::Resulted {
                    handle,
                    call_id,
                    from_cache,
                }
            }
            Err(error) => {
                crate::log_warn!("{} {} failed: {}", handle, call_id, error);
                if let Some(t) = &self.transcript {
                    t.log_error(&format!("{} {}: {}", handle, call_id, error));
                }
                block.state = BlockState::Errored;
                block.error = Some(error.clone());
                LifecycleEvent::Errored {
                    handle,
                    call_id: Some(call_id),
                    error,
                }
            }
        };
        self.emit(event);
        self.render(handle);
    }

    fn emit(&mut self, event: LifecycleEvent) {
        if let Some(t) = &self.transcript {
            t.log_event(&event);
        }
        self.events.push(event);
    }

    /// Forward the block's view unless it equals the last one applied.
    fn render(&mut self, handle: BlockHandle) {
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        let view = block.view(handle);
        if block.last_view.as_ref() == Some(&view) {
            return;
        }
        self.renderer.apply_block_state(&view);
        block.last_view = Some(view);
    }

    fn scan(&mut self, source_id: &str, snapshot: &str, seen_len: usize, now: Instant) -> Option<BlockHandle> {
        let seen = if snapshot.len() < seen_len { 0 } else { seen_len };
        let mut start = seen.saturating_sub(MAX_MARKER_LEN - 1);
        while !snapshot.is_char_boundary(start) {
            start -= 1;
        }
        if !snapshot[start..].contains(FUNCTION_CALLS_OPEN) {
            self.sources.insert(
                source_id.to_string(),
                SourceSlot::Scanning {
                    seen_len: snapshot.len(),
                },
            );
            return None;
        }
        Some(self.create(source_id, snapshot, now))
    }

    fn create(&mut self, source_id: &str, snapshot: &str, now: Instant) -> BlockHandle {
        let handle = self
            .blocks
            .insert(Block::new(source_id.to_string(), snapshot.to_string(), now));
        self.sources
            .insert(source_id.to_string(), SourceSlot::Block(handle));
        self.stall.track(handle, now);
        self.timers
            .schedule(now + self.stall.tick_interval(), handle, TimerKind::StallTick);
        self.timers
            .schedule(now + self.config.stall_timeout(), handle, TimerKind::StallDeadline);
        crate::log_debug!("{} created for source {}", handle, source_id);
        if let Some(t) = &self.transcript {
            t.log_snapshot(source_id, snapshot);
        }
        self.emit(LifecycleEvent::Created {
            handle,
            source_id: source_id.to_string(),
        });
        self.render(handle);
        self.schedule_pass(handle, now);
        handle
    }

    fn grow(&mut self, handle: BlockHandle, snapshot: &str, now: Instant) {
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        if block.state.is_terminal() {
            crate::log_debug!("{} is {:?}, ignoring growth", handle, block.state);
            return;
        }
        if !block.state.is_streaming() {
            return;
        }
        let base = block.pending.as_deref().unwrap_or(&block.buffer);
        if snapshot == base {
            return;
        }
        if !snapshot.starts_with(base) {
            crate::log_debug!("{} snapshot is not append-only, resyncing", handle);
            self.refresh_block(handle, snapshot, now);
            return;
        }

        block.last_growth_at = now;
        let significant = if block.busy {
            block.pending = Some(snapshot.to_string());
            false
        } else {
            block.pending = None;
            block.buffer.push_str(&snapshot[block.buffer.len()..]);
            let parsed = block.parsed_len.min(block.buffer.len());
            self.matcher
                .detect_with_lookback(lookback_tail(&block.buffer[..parsed]), &block.buffer[parsed..])
                .significant
        };
        if let Some(t) = &self.transcript {
            t.log_snapshot(&block.source_id, snapshot);
        }

        if self.stall.record_growth(handle, now) {
            block.flags.stalled = false;
            self.timers
                .schedule(now + self.config.stall_timeout(), handle, TimerKind::StallDeadline);
            crate::log_info!("{} resumed after stalling", handle);
            self.render(handle);
        }
        if significant {
            self.schedule_pass(handle, now);
        }
    }

    fn schedule_pass(&mut self, handle: BlockHandle, now: Instant) {
        if self.config.debounce_ms == 0 {
            self.run_pass(handle, now);
            return;
        }
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        if block.debounce_armed {
            return;
        }
        block.debounce_armed = true;
        self.timers
            .schedule(now + self.config.debounce(), handle, TimerKind::Debounce);
    }

    fn schedule_recheck(&mut self, handle: BlockHandle) {
        let Some(at) = self.stability.next_recheck(handle) else {
            return;
        };
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        if block.recheck_armed {
            return;
        }
        block.recheck_armed = true;
        self.timers.schedule(at, handle, TimerKind::StabilityRecheck);
    }

    /// Parse the block's buffer and commit the result. Growth arriving while
    /// the pass runs is picked up by the next iteration.
    fn run_pass(&mut self, handle: BlockHandle, now: Instant) {
        loop {
            let Some(block) = self.blocks.get_mut(handle) else {
                return;
            };
            if !block.state.is_streaming() {
                return;
            }
            block.busy = true;
            let (outcome, changed) = parse_block(block);
            let complete = outcome.is_complete;

            if changed {
                self.emit(LifecycleEvent::Updated { handle });
            }
            if complete && self.stability.check(handle, true, now) {
                self.complete_block(handle, false, now);
            } else {
                if !complete {
                    self.stability.check(handle, false, now);
                } else {
                    self.schedule_recheck(handle);
                }
                self.render(handle);
            }

            let Some(block) = self.blocks.get_mut(handle) else {
                return;
            };
            block.busy = false;
            match block.pending.take() {
                Some(next) if block.state.is_streaming() => block.buffer = next,
                _ => return,
            }
        }
    }

    fn complete_block(&mut self, handle: BlockHandle, forced: bool, now: Instant) {
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        if !block.state.is_streaming() {
            return;
        }
        let extra_invokes = block.extra_invokes;
        let Some(function_name) = block.function_name.clone() else {
            self.stability.remove(handle);
            self.stall.remove(handle);
            let error = InvocationError::Tool("invocation has no function name".into());
            crate::log_warn!("{} closed without a function name", handle);
            if let Some(block) = self.blocks.get_mut(handle) {
                block.state = BlockState::Errored;
                block.error = Some(error.clone());
            }
            self.emit(LifecycleEvent::Errored {
                handle,
                call_id: None,
                error,
            });
            self.render(handle);
            return;
        };

        let call_id = block.call_id.get_or_insert_with(generate_call_id).clone();
        let args: Map<String, Value> = block
            .parameters
            .iter()
            .map(|p| (p.name.clone(), coerce_value(&p.value, p.declared_type)))
            .collect();
        for param in block.parameters.iter_mut() {
            param.streaming = false;
        }
        let invocation = Invocation::new(function_name, call_id, args);
        block.state = BlockState::Complete;
        block.invocation = Some(invocation.clone());
        if forced {
            block.flags.stalled = true;
            block.flags.abruptly_ended = true;
        }
        crate::log_debug!("{} complete after {:?}", handle, block.age(now));

        self.stability.remove(handle);
        self.stall.remove(handle);
        if extra_invokes > 0 {
            crate::log_warn!(
                "{} carries {} extra invoke(s); only the first is executed",
                handle,
                extra_invokes
            );
        }
        log_invocations(
            if forced { "Force-completed" } else { "Completed" },
            std::slice::from_ref(&invocation),
        );
        if let Some(t) = &self.transcript {
            t.log_invocation(if forced { "forced" } else { "completed" }, &invocation);
        }
        self.emit(if forced {
            LifecycleEvent::ForcedComplete { handle, invocation }
        } else {
            LifecycleEvent::Completed { handle, invocation }
        });
        self.render(handle);

        if self.config.auto_execute {
            self.begin_execution(handle);
        }
    }

    fn refresh_block(&mut self, handle: BlockHandle, snapshot: &str, now: Instant) {
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        if let Some(t) = &self.transcript {
            t.log_snapshot(&block.source_id, snapshot);
        }

        if block.state.is_streaming() {
            block.buffer = snapshot.to_string();
            block.pending = None;
            block.parsed_len = 0;
            block.last_growth_at = now;
            block.flags.resyncing = true;
            if self.stall.record_growth(handle, now) {
                block.flags.stalled = false;
                self.timers
                    .schedule(now + self.config.stall_timeout(), handle, TimerKind::StallDeadline);
            }
            self.emit(LifecycleEvent::Resynced { handle });
            self.run_pass(handle, now);
        } else {
            let outcome = parse(snapshot);
            let changed = absorb(block, &outcome);
            if snapshot.len() > block.buffer.len() {
                block.buffer = snapshot.to_string();
            }
            block.flags.resyncing = true;
            crate::log_debug!(
                "{} resynced in {:?}, parameters changed: {}",
                handle,
                block.state,
                changed
            );
            self.emit(LifecycleEvent::Resynced { handle });
            self.render(handle);
        }

        if let Some(block) = self.blocks.get_mut(handle) {
            block.flags.resyncing = false;
        }
        self.render(handle);
    }

    fn fire(&mut self, timer: Timer, now: Instant) {
        let handle = timer.handle;
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        match timer.kind {
            TimerKind::Debounce => {
                block.debounce_armed = false;
                if block.state.is_streaming() && block.parsed_len != block.buffer.len() {
                    self.run_pass(handle, now);
                }
            }
            TimerKind::StabilityRecheck => {
                block.recheck_armed = false;
                if block.state.is_streaming() {
                    self.run_pass(handle, now);
                }
            }
            TimerKind::StallTick => {
                if !block.state.is_streaming() {
                    return;
                }
                if block.parsed_len != block.buffer.len() {
                    self.run_pass(handle, now);
                }
                let Some(block) = self.blocks.get(handle) else {
                    return;
                };
                if !block.state.is_streaming() {
                    return;
                }
                let unbalanced = !block.balanced;
                for signal in self.stall.on_tick(handle, unbalanced, now) {
                    match signal {
                        StallSignal::Stalled => self.mark_stalled(handle),
                        StallSignal::AbruptlyEnded => self.force_complete(handle, now),
                    }
                }
                if self
                    .blocks
                    .get(handle)
                    .is_some_and(|b| b.state.is_streaming())
                {
                    self.timers
                        .schedule(now + self.stall.tick_interval(), handle, TimerKind::StallTick);
                }
            }
            TimerKind::StallDeadline => {
                if !block.state.is_streaming() {
                    return;
                }
                let unbalanced = !block.balanced;
                if self.stall.on_deadline(handle, unbalanced, now).is_some() {
                    self.mark_stalled(handle);
                }
                if let Some(at) = self.stall.deadline(handle).filter(|at| *at > now) {
                    self.timers.schedule(at, handle, TimerKind::StallDeadline);
                }
            }
        }
    }

    fn mark_stalled(&mut self, handle: BlockHandle) {
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        if block.flags.stalled {
            return;
        }
        block.flags.stalled = true;
        crate::log_warn!("{} stalled with open tags", handle);
        self.emit(LifecycleEvent::Stalled { handle });
        self.render(handle);
    }

    /// Complete from the longest values seen so far.
    fn force_complete(&mut self, handle: BlockHandle, now: Instant) {
        let Some(block) = self.blocks.get_mut(handle) else {
            return;
        };
        if block.parsed_len != block.buffer.len() {
            parse_block(block);
        }
        crate::log_warn!(
            "{} ended abruptly, completing with {} parameter(s)",
            handle,
            block.parameters.len()
        );
        self.complete_block(handle, true, now);
    }
}

/// Fold a parse of the current buffer into the block.
fn parse_block(block: &mut Block) -> (ParseOutcome, bool) {
    let outcome = parse(&block.buffer);
    let changed = absorb(block, &outcome);
    block.parsed_len = block.buffer.len();
    block.balanced = outcome.counts.balanced();
    block.extra_invokes = outcome.invokes.len().saturating_sub(1);
    (outcome, changed)
}

fn absorb(block: &mut Block, outcome: &ParseOutcome) -> bool {
    let mut changed = false;
    if block.function_name.is_none() && outcome.invoke_name.is_some() {
        block.function_name = outcome.invoke_name.clone();
        changed = true;
    }
    if block.call_id.is_none() && outcome.call_id.is_some() {
        block.call_id = outcome.call_id.clone();
        changed = true;
    }
    merge_parameters(&mut block.parameters, &outcome.params) || changed
}
