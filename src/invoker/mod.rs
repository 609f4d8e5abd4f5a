// src/invoker/mod.rs
//! Tool invoker contract.
//!
//! The transport that actually runs a tool lives outside this crate. Hosts
//! implement [`ToolInvoker`]; the lifecycle manager awaits the returned
//! future without blocking and feeds the outcome back with a ticket.

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum InvocationError {
    /// Transport unavailable. Transient, and the only class that affects
    /// connectivity.
    #[error("Connection error: {0}")]
    Connection(String),
    /// Unknown tool, schema failure or bad arguments. Local to the block.
    #[error("Tool error: {0}")]
    Tool(String),
}

impl InvocationError {
    pub fn is_connection(&self) -> bool {
        matches!(self, InvocationError::Connection(_))
    }
}

pub type InvocationFuture = BoxFuture<'static, Result<Value, InvocationError>>;

pub trait ToolInvoker: Send + Sync {
    fn invoke(&self, name: &str, args: &Map<String, Value>) -> InvocationFuture;
}

impl<T: ToolInvoker + ?Sized> ToolInvoker for Arc<T> {
    fn invoke(&self, name: &str, args: &Map<String, Value>) -> InvocationFuture {
        (**self).invoke(name, args)
    }
}

/// Connectivity as seen by collaborators. Cloned handles share one flag.
#[derive(Debug, Clone)]
pub struct ConnectivityStatus {
    available: Arc<AtomicBool>,
}

impl Default for ConnectivityStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityStatus {
    pub fn new() -> Self {
        Self {
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Fold one invocation outcome into the status. Tool errors never touch it.
    pub fn observe(&self, outcome: &Result<Value, InvocationError>) {
        match outcome {
            Ok(_) => {
                if !self.available.swap(true, Ordering::Relaxed) {
                    crate::log_info!("Tool transport available again");
                }
            }
            Err(InvocationError::Connection(msg)) => {
                if self.available.swap(false, Ordering::Relaxed) {
                    crate::log_warn!("Tool transport unavailable: {}", msg);
                }
            }
            Err(InvocationError::Tool(_)) => {}
        }
    }
}

/// Invoker backed by a closure, mostly for hosts with a synchronous transport.
pub struct FnInvoker<F> {
    f: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(&str, &Map<String, Value>) -> Result<Value, InvocationError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ToolInvoker for FnInvoker<F>
where
    F: Fn(&str, &Map<String, Value>) -> Result<Value, InvocationError> + Send + Sync,
{
    fn invoke(&self, name: &str, args: &Map<String, Value>) -> InvocationFuture {
        let outcome = (self.f)(name, args);
        Box::pin(async move { outcome })
    }
}

/// Returns the call back as its result. Used by the replay CLI.
#[derive(Debug, Default, Clone)]
pub struct EchoInvoker;

impl ToolInvoker for EchoInvoker {
    fn invoke(&self, name: &str, args: &Map<String, Value>) -> InvocationFuture {
        let result = json!({ "tool": name, "arguments": Value::Object(args.clone()) });
        Box::pin(async move { Ok(result) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_only_tracks_connection_errors() {
        let status = ConnectivityStatus::new();
        assert!(status.is_available());

        status.observe(&Err(InvocationError::Tool("unknown tool".into())));
        assert!(status.is_available());

        status.observe(&Err(InvocationError::Connection("refused".into())));
        assert!(!status.is_available());

        let shared = status.clone();
        shared.observe(&Ok(Value::Null));
        assert!(status.is_available());
    }

    #[tokio::test]
    async fn test_fn_invoker() {
        let invoker = FnInvoker::new(|name: &str, args: &Map<String, Value>| {
            if name == "add" {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            } else {
                Err(InvocationError::Tool(format!("unknown tool {name}")))
            }
        });
        let args = json!({"a": 2, "b": 3}).as_object().cloned().unwrap();
        assert_eq!(invoker.invoke("add", &args).await, Ok(json!(5)));
        assert!(matches!(
            invoker.invoke("sub", &args).await,
            Err(InvocationError::Tool(_))
        ));
    }

    #[tokio::test]
    async fn test_echo_invoker() {
        let args = json!({"q": "rust"}).as_object().cloned().unwrap();
        let out = EchoInvoker.invoke("search", &args).await.unwrap();
        assert_eq!(out["tool"], "search");
        assert_eq!(out["arguments"]["q"], "rust");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            InvocationError::Connection("down".into()).to_string(),
            "Connection error: down"
        );
        assert!(InvocationError::Connection(String::new()).is_connection());
        assert!(!InvocationError::Tool(String::new()).is_connection());
    }
}
