//! Operator control state for runtime simulation management.
//!
//! Shared atomic state between the engine loop and the API handlers.
//! The operator can pause/resume ticking, request a reset or
//! re-initialization, and trigger a clean shutdown -- all without
//! stopping the process. The engine loop also pauses itself here when
//! the LLM gateway reports unhealthy, and the server surfaces that
//! state to the UI.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared operator control state.
///
/// Wrapped in `Arc` and shared between the engine loop and API
/// handlers. Atomic fields keep the tick loop's checks lock-free.
#[derive(Debug, Default)]
pub struct OperatorState {
    paused: AtomicBool,
    resume_notify: Notify,
    shutdown_requested: AtomicBool,
    reset_requested: AtomicBool,
    reinit_requested: AtomicBool,
    llm_unhealthy: AtomicBool,
}

impl OperatorState {
    /// Fresh state: running, nothing requested.
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------
    // Pause / resume
    // -------------------------------------------------------------------

    /// Whether ticking is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause ticking.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume ticking and wake the engine loop.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_waiters();
    }

    /// Wait until resumed (or a shutdown/reset is requested, which also
    /// wakes the loop).
    pub async fn wait_while_paused(&self) {
        while self.is_paused() && !self.is_shutdown_requested() && !self.is_reset_requested() {
            self.resume_notify.notified().await;
        }
    }

    // -------------------------------------------------------------------
    // Shutdown / reset / reinit
    // -------------------------------------------------------------------

    /// Request a clean shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        self.resume_notify.notify_waiters();
    }

    /// Whether shutdown was requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Request a reset: tear down in-flight work and rebuild the world
    /// from the last save.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
        self.resume_notify.notify_waiters();
    }

    /// Whether reset was requested.
    pub fn is_reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::Acquire)
    }

    /// Consume a pending reset request.
    pub fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }

    /// Request a re-initialization: discard the world and seed a fresh
    /// one.
    pub fn request_reinit(&self) {
        self.reinit_requested.store(true, Ordering::Release);
        self.resume_notify.notify_waiters();
    }

    /// Consume a pending reinit request.
    pub fn take_reinit(&self) -> bool {
        self.reinit_requested.swap(false, Ordering::AcqRel)
    }

    // -------------------------------------------------------------------
    // LLM health
    // -------------------------------------------------------------------

    /// Record the gateway health as observed by the engine loop.
    pub fn set_llm_unhealthy(&self, unhealthy: bool) {
        self.llm_unhealthy.store(unhealthy, Ordering::Release);
    }

    /// Whether the engine is paused on an unhealthy gateway.
    pub fn is_llm_unhealthy(&self) -> bool {
        self.llm_unhealthy.load(Ordering::Acquire)
    }
}
