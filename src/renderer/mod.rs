// src/renderer/mod.rs
//! Renderer adapter contract.
//!
//! The lifecycle manager calls [`RendererAdapter::apply_block_state`] after
//! every committed transition. Identical consecutive views are filtered out
//! before they reach the adapter, so implementations never see a repeat.

use crate::core::{BlockHandle, BlockState, BlockView};
use parking_lot::Mutex;
use std::sync::Arc;

pub trait RendererAdapter {
    fn apply_block_state(&mut self, view: &BlockView);

    /// The block is gone. Default does nothing.
    fn remove_block(&mut self, _handle: BlockHandle) {}
}

impl<R: RendererAdapter + ?Sized> RendererAdapter for Box<R> {
    fn apply_block_state(&mut self, view: &BlockView) {
        (**self).apply_block_state(view)
    }

    fn remove_block(&mut self, handle: BlockHandle) {
        (**self).remove_block(handle)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl RendererAdapter for NullRenderer {
    fn apply_block_state(&mut self, _view: &BlockView) {}
}

/// Writes one tracing line per applied view.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRenderer;

impl RendererAdapter for LogRenderer {
    fn apply_block_state(&mut self, view: &BlockView) {
        let name = view.function_name.as_deref().unwrap_or("?");
        let mut marks = String::new();
        if view.flags.stalled {
            marks.push_str(" [stalled]");
        }
        if view.flags.resyncing {
            marks.push_str(" [resyncing]");
        }
        if view.flags.abruptly_ended {
            marks.push_str(" [abrupt]");
        }
        match view.state {
            BlockState::Streaming => crate::log_debug!(
                "{} ({}) streaming {} with {} parameter(s){}",
                view.handle,
                view.source_id,
                name,
                view.parameters.len(),
                marks
            ),
            BlockState::Errored => crate::log_warn!(
                "{} ({}) {} errored: {}{}",
                view.handle,
                view.source_id,
                name,
                view.error.as_deref().unwrap_or(""),
                marks
            ),
            state => crate::log_info!(
                "{} ({}) {} -> {:?}{}",
                view.handle,
                view.source_id,
                name,
                state,
                marks
            ),
        }
    }

    fn remove_block(&mut self, handle: BlockHandle) {
        crate::log_debug!("{} removed", handle);
    }
}

/// Records every applied view. Cloned handles share the same record, so a
/// host can keep one clone and hand the other to the manager.
#[derive(Debug, Default, Clone)]
pub struct MemoryRenderer {
    views: Arc<Mutex<Vec<BlockView>>>,
    removed: Arc<Mutex<Vec<BlockHandle>>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn views(&self) -> Vec<BlockView> {
        self.views.lock().clone()
    }

    pub fn views_for(&self, handle: BlockHandle) -> Vec<BlockView> {
        self.views
            .lock()
            .iter()
            .filter(|v| v.handle == handle)
            .cloned()
            .collect()
    }

    pub fn last(&self, handle: BlockHandle) -> Option<BlockView> {
        self.views
            .lock()
            .iter()
            .rev()
            .find(|v| v.handle == handle)
            .cloned()
    }

    pub fn removed(&self) -> Vec<BlockHandle> {
        self.removed.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.lock().is_empty()
    }
}

impl RendererAdapter for MemoryRenderer {
    fn apply_block_state(&mut self, view: &BlockView) {
        self.views.lock().push(view.clone());
    }

    fn remove_block(&mut self, handle: BlockHandle) {
        self.removed.lock().push(handle);
    }
}
