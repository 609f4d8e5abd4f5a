// src/core/mod.rs
//! Block lifecycle core: arena, trackers, timer queue and the lifecycle manager.

pub mod block;
pub mod block_manager;
pub mod execution_cache;
pub mod fingerprint;
pub mod lifecycle;
pub mod scheduler;
pub mod shared;
pub mod stability;
pub mod stall;

pub use block::{BlockFlags, BlockState, BlockView, LifecycleEvent, Parameter};
pub use block_manager::BlockHandle;
pub use execution_cache::{ExecutionCache, ExecutionRecord};
pub use fingerprint::signature;
pub use lifecycle::{ExecutionStart, ExecutionTicket, LifecycleManager, PendingInvocation};
pub use shared::SharedManager;

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        {
            tracing::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        {
            tracing::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        {
            tracing::error!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        {
            tracing::debug!($($arg)*);
        }
    };
}
