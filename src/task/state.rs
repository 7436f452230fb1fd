// src/task/state.rs
// Mutable task state: mistake accounting, API request counters, and the
// cooperative abort flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State of one running task. The abort flag is shared with the API layer
/// so a task can be cancelled from outside; it is checked at iteration
/// boundaries only.
#[derive(Debug, Default)]
pub struct TaskState {
    pub consecutive_mistake_count: u32,
    pub api_request_count: u32,
    abort: Arc<AtomicBool>,
}

impl TaskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state whose abort flag is an externally owned handle.
    pub fn with_abort_handle(abort: Arc<AtomicBool>) -> Self {
        Self {
            consecutive_mistake_count: 0,
            api_request_count: 0,
            abort,
        }
    }

    /// Handle that outside code can use to request cancellation.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn should_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn reset_for_new_task(&mut self) {
        self.consecutive_mistake_count = 0;
        self.api_request_count = 0;
        self.abort.store(false, Ordering::SeqCst);
    }

    pub fn increment_api_request_count(&mut self) {
        self.api_request_count += 1;
    }

    pub fn increment_mistake_count(&mut self) {
        self.consecutive_mistake_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_via_handle() {
        let state = TaskState::new();
        let handle = state.abort_handle();
        assert!(!state.should_abort());
        handle.store(true, Ordering::SeqCst);
        assert!(state.should_abort());
    }

    #[test]
    fn test_reset_clears_counters_and_abort() {
        let mut state = TaskState::new();
        state.increment_mistake_count();
        state.increment_api_request_count();
        state.abort();

        state.reset_for_new_task();
        assert_eq!(state.consecutive_mistake_count, 0);
        assert_eq!(state.api_request_count, 0);
        assert!(!state.should_abort());
    }
}
