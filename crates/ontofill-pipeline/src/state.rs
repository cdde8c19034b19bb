//! Run/stop flag shared by the operator and every worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to the process-wide "running" flag.
///
/// Workers check it before pulling each place. Clearing it never interrupts
/// a place that is already being processed.
#[derive(Debug, Clone, Default)]
pub struct ProcessingState {
    running: Arc<AtomicBool>,
}

impl ProcessingState {
    /// A stopped state; call [`start`](Self::start) before running a pool
    pub fn new() -> Self {
        Self::default()
    }

    /// A state that is already running
    pub fn running() -> Self {
        let state = Self::new();
        state.start();
        state
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
