// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The external collaborator interface the [`crate::watchdog`] calls into:
//! the session process owning the client connection and MQTT protocol state.
//!
//! The session itself (its packet FSM, wire codec, and transport) is out of
//! scope here; only the narrow surface the watchdog needs is specified.

use std::convert::Infallible;

use tokio::sync::oneshot;

/// What a watchdog can ask of the session it monitors.
///
/// Implementations should treat `terminate` as best-effort: the watchdog
/// does not wait for it to complete, and does not retry on failure.
pub trait SessionHandle: Send + Sync {
    /// Requests that the session be terminated, because its will is about to
    /// be published (connect handshake never completed, or the post-
    /// disconnect expiry timer elapsed without a reconnect).
    fn terminate(&self);
}

/// The write half of a session's liveness signal.
///
/// A session holds this for as long as it is alive and drops it the instant
/// it terminates unexpectedly (a crash, not a graceful `stop`). The paired
/// receiver, given to [`crate::watchdog::WatchdogHandle::start`], resolves
/// the moment this is dropped, which the watchdog treats as "unexpected
/// session termination" per its publish-will rule.
#[derive(Debug)]
pub struct SessionLivenessToken {
    _tx: oneshot::Sender<Infallible>,
}

impl SessionLivenessToken {
    /// Creates a new liveness token and its paired receiver.
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<Infallible>) {
        let (tx, rx) = oneshot::channel();
        (Self { _tx: tx }, rx)
    }
}
