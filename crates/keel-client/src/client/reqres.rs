//! Single-use request/response handles.
//!
//! # Purpose
//! Bundles one outbound request with its eventual response and a completion
//! signal callers can wait on. A handle is shared (`Arc`) between the caller,
//! the submission queue, the sender task, the in-flight queue, and the
//! receiver task; there is no cyclic ownership.
//!
//! # Design notes
//! The response is written at most once, and completion is signaled at most
//! once, whether the handle completes with a response or is released during
//! shutdown. Waiters that arrive after completion return immediately.
use keel_wire::{Request, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Callback invoked with the response once it arrives.
pub type ReqResCallback = std::sync::Arc<dyn Fn(&Response) + Send + Sync>;

pub struct ReqRes {
    request: Request,
    state: Mutex<HandleState>,
    done: Notify,
    completed: AtomicBool,
}

struct HandleState {
    response: Option<Response>,
    callback: Option<ReqResCallback>,
}

impl ReqRes {
    pub(crate) fn new(request: Request) -> Self {
        Self {
            request,
            state: Mutex::new(HandleState {
                response: None,
                callback: None,
            }),
            done: Notify::new(),
            completed: AtomicBool::new(false),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The response, once it has arrived. Meaningful only after [`wait`]
    /// returns; a handle released during shutdown never gets one.
    ///
    /// [`wait`]: ReqRes::wait
    pub fn response(&self) -> Option<Response> {
        self.state().response.clone()
    }

    pub fn is_done(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Wait until the handle completes. Safe to call from many tasks; all of
    /// them are released by the single completion.
    pub async fn wait(&self) {
        // Create the listener before checking the flag so a completion
        // between the check and the await cannot be missed.
        let notified = self.done.notified();
        if self.is_done() {
            return;
        }
        notified.await;
    }

    /// Install or replace the per-request callback. If the response already
    /// arrived the callback fires immediately on the calling task.
    pub fn set_callback(&self, callback: ReqResCallback) {
        let fire = {
            let mut state = self.state();
            state.callback = Some(callback.clone());
            state.response.clone()
        };
        if let Some(response) = fire {
            callback(&response);
        }
    }

    /// The installed callback, if any.
    pub fn callback(&self) -> Option<ReqResCallback> {
        self.state().callback.clone()
    }

    /// Store the response and release waiters. Returns the callback for the
    /// caller to invoke outside any client-wide lock.
    pub(crate) fn complete(&self, response: Response) -> Option<ReqResCallback> {
        let callback = {
            let mut state = self.state();
            debug_assert!(state.response.is_none(), "response written twice");
            state.response = Some(response);
            state.callback.clone()
        };
        self.signal_done();
        callback
    }

    /// Release waiters without a response (shutdown drain). May race a
    /// concurrent completion; the signal still fires exactly once.
    pub(crate) fn release(&self) {
        self.signal_done();
    }

    fn signal_done(&self) {
        if !self.completed.swap(true, Ordering::AcqRel) {
            self.done.notify_waiters();
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ReqRes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqRes")
            .field("request", &self.request.kind())
            .field("done", &self.is_done())
            .finish()
    }
}
