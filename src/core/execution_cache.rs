// src/core/execution_cache.rs
//! Process-wide record of executed invocations.
//!
//! Records are indexed by call id and, for successful outcomes only, by
//! content signature. Capacity is bounded and the oldest record goes first.

use crate::invoker::InvocationError;
use crate::tools::Invocation;
use ahash::AHashMap;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::SystemTime;

pub const DEFAULT_CACHE_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub call_id: String,
    pub function_name: String,
    pub content_signature: String,
    pub args: Map<String, Value>,
    pub outcome: Result<Value, InvocationError>,
    pub timestamp: SystemTime,
}

impl ExecutionRecord {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[derive(Debug)]
pub struct ExecutionCache {
    capacity: usize,
    order: VecDeque<String>,
    by_call: AHashMap<String, ExecutionRecord>,
    by_signature: AHashMap<String, String>,
}

impl Default for ExecutionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ExecutionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            by_call: AHashMap::new(),
            by_signature: AHashMap::new(),
        }
    }

    /// Store the outcome of `invocation`. A failure is kept in the call id
    /// history but never answers a signature lookup.
    pub fn record(&mut self, invocation: &Invocation, outcome: Result<Value, InvocationError>) {
        let record = ExecutionRecord {
            call_id: invocation.call_id.clone(),
            function_name: invocation.function_name.clone(),
            content_signature: invocation.content_signature.clone(),
            args: invocation.args.clone(),
            outcome,
            timestamp: SystemTime::now(),
        };
        self.insert(record);
    }

    pub fn insert(&mut self, record: ExecutionRecord) {
        if self.by_call.contains_key(&record.call_id) {
            self.forget(&record.call_id.clone());
        }
        while self.order.len() >= self.capacity {
            match self.order.front().cloned() {
                Some(oldest) => {
                    crate::log_debug!("Execution cache full, evicting {}", oldest);
                    self.forget(&oldest);
                }
                None => break,
            }
        }
        if record.is_success() {
            self.by_signature
                .insert(record.content_signature.clone(), record.call_id.clone());
        }
        self.order.push_back(record.call_id.clone());
        self.by_call.insert(record.call_id.clone(), record);
    }

    fn forget(&mut self, call_id: &str) {
        if let Some(record) = self.by_call.remove(call_id) {
            if self
                .by_signature
                .get(&record.content_signature)
                .is_some_and(|id| id == call_id)
            {
                self.by_signature.remove(&record.content_signature);
            }
        }
        self.order.retain(|id| id != call_id);
    }

    pub fn lookup_call(&self, call_id: &str) -> Option<&ExecutionRecord> {
        self.by_call.get(call_id)
    }

    /// Latest successful record with this signature.
    pub fn lookup_signature(&self, signature: &str) -> Option<&ExecutionRecord> {
        self.by_signature
            .get(signature)
            .and_then(|call_id| self.by_call.get(call_id))
    }

    pub fn len(&self) -> usize {
        self.by_call.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_call.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
