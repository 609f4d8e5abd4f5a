// src/core/block.rs
//! Per-block state and the views handed to renderers.

use super::block_manager::BlockHandle;
use crate::invoker::InvocationError;
use crate::tools::Invocation;
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;

pub use crate::tools::parser::Parameter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    Streaming,
    Complete,
    Executing,
    Resulted,
    Errored,
}

impl BlockState {
    /// Resulted and Errored blocks ignore further growth.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlockState::Resulted | BlockState::Errored)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, BlockState::Streaming)
    }
}

/// Flags orthogonal to [`BlockState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct BlockFlags {
    pub stalled: bool,
    pub resyncing: bool,
    /// Completion was forced by the stall detector.
    pub abruptly_ended: bool,
}

/// Snapshot of a block as the renderer sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockView {
    pub handle: BlockHandle,
    pub source_id: String,
    pub state: BlockState,
    pub flags: BlockFlags,
    pub function_name: Option<String>,
    pub call_id: Option<String>,
    pub parameters: Vec<Parameter>,
    pub invocation: Option<Invocation>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Committed transitions, drained by hosts with
/// [`LifecycleManager::drain_events`](super::LifecycleManager::drain_events).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created {
        handle: BlockHandle,
        source_id: String,
    },
    Updated {
        handle: BlockHandle,
    },
    Stalled {
        handle: BlockHandle,
    },
    Completed {
        handle: BlockHandle,
        invocation: Invocation,
    },
    ForcedComplete {
        handle: BlockHandle,
        invocation: Invocation,
    },
    ExecutionStarted {
        handle: BlockHandle,
        call_id: String,
    },
    Resulted {
        handle: BlockHandle,
        call_id: String,
        from_cache: bool,
    },
    Errored {
        handle: BlockHandle,
        call_id: Option<String>,
        error: InvocationError,
    },
    Resynced {
        handle: BlockHandle,
    },
    Destroyed {
        handle: BlockHandle,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub source_id: String,
    pub state: BlockState,
    pub flags: BlockFlags,
    pub function_name: Option<String>,
    pub call_id: Option<String>,
    pub parameters: Vec<Parameter>,
    pub created_at: Instant,
    pub last_growth_at: Instant,
    /// Latest snapshot that has been accepted.
    pub buffer: String,
    /// Length of `buffer` at the last parse pass.
    pub parsed_len: usize,
    /// Tag counts were balanced at the last parse pass.
    pub balanced: bool,
    /// Extra `<invoke>` elements seen at the last parse pass.
    pub extra_invokes: usize,
    /// Newest snapshot that arrived while a parse pass was running.
    pub pending: Option<String>,
    pub debounce_armed: bool,
    pub recheck_armed: bool,
    pub busy: bool,
    pub invocation: Option<Invocation>,
    pub result: Option<Value>,
    pub error: Option<InvocationError>,
    /// Bumped on each dispatch; outcomes for older sequences are dropped.
    pub execution_seq: u64,
    pub last_view: Option<BlockView>,
}

impl Block {
    pub fn new(source_id: String, snapshot: String, now: Instant) -> Self {
        Self {
            source_id,
            state: BlockState::Streaming,
            flags: BlockFlags::default(),
            function_name: None,
            call_id: None,
            parameters: Vec::new(),
            created_at: now,
            last_growth_at: now,
            buffer: snapshot,
            parsed_len: 0,
            balanced: false,
            extra_invokes: 0,
            pending: None,
            debounce_armed: false,
            recheck_armed: false,
            busy: false,
            invocation: None,
            result: None,
            error: None,
            execution_seq: 0,
            last_view: None,
        }
    }

    pub fn view(&self, handle: BlockHandle) -> BlockView {
        BlockView {
            handle,
            source_id: self.source_id.clone(),
            state: self.state,
            flags: self.flags,
            function_name: self.function_name.clone(),
            call_id: self.call_id.clone(),
            parameters: self.parameters.clone(),
            invocation: self.invocation.clone(),
            result: self.result.clone(),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }

    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Merge freshly parsed parameters into the stored ones, longest value wins.
/// Stored parameters are never removed and never get shorter. Returns whether
/// anything changed.
pub fn merge_parameters(stored: &mut Vec<Parameter>, fresh: &[Parameter]) -> bool {
    let mut changed = false;
    for param in fresh {
        match stored.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => {
                if param.value.len() > existing.value.len() {
                    existing.value = param.value.clone();
                    existing.complete = param.complete;
                    existing.streaming = param.streaming;
                    changed = true;
                } else if param.value.len() == existing.value.len()
                    && param.complete
                    && !existing.complete
                {
                    existing.value = param.value.clone();
                    existing.complete = true;
                    existing.streaming = false;
                    changed = true;
                }
                if existing.declared_type.is_none() && param.declared_type.is_some() {
                    existing.declared_type = param.declared_type;
                    changed = true;
                }
            }
            None => {
                stored.push(param.clone());
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParamType;

    fn param(name: &str, value: &str, complete: bool) -> Parameter {
        Parameter {
            name: name.to_string(),
            value: value.to_string(),
            declared_type: None,
            complete,
            streaming: !complete,
        }
    }

    #[test]
    fn test_merge_longest_wins() {
        let mut stored = vec![param("q", "hello wor", false)];
        assert!(merge_parameters(&mut stored, &[param("q", "hello world", true)]));
        assert_eq!(stored[0].value, "hello world");
        assert!(stored[0].complete);

        assert!(!merge_parameters(&mut stored, &[param("q", "hel", false)]));
        assert_eq!(stored[0].value, "hello world");
        assert!(stored[0].complete);
    }

    #[test]
    fn test_merge_keeps_order_and_never_drops() {
        let mut stored = vec![param("a", "1", true), param("b", "2", true)];
        assert!(merge_parameters(&mut stored, &[param("c", "3", false)]));
        let names: Vec<_> = stored.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_same_length_marks_complete() {
        let mut stored = vec![param("q", "abc", false)];
        assert!(merge_parameters(&mut stored, &[param("q", "abc", true)]));
        assert!(stored[0].complete);
        assert!(!stored[0].streaming);
    }

    #[test]
    fn test_merge_adopts_declared_type() {
        let mut stored = vec![param("n", "42", true)];
        let mut typed = param("n", "4", false);
        typed.declared_type = Some(ParamType::Number);
        assert!(merge_parameters(&mut stored, &[typed]));
        assert_eq!(stored[0].value, "42");
        assert_eq!(stored[0].declared_type, Some(ParamType::Number));
    }
}
