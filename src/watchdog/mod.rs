// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The per-session will watchdog: an isolated actor that holds a session's
//! Last-Will-and-Testament, arms expiry timers around disconnects, and
//! publishes the will exactly when MQTT-5 demands it.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::router::{Context, Message, Router};
use crate::session::SessionHandle;
use crate::will::Will;

/// How long a session has to complete its CONNECT handshake before the
/// watchdog kills it. See spec "Constants" (`SPEC_FULL.md` §6): this is the
/// only tunable the core exposes.
pub const CONNECT_EXPIRY: Duration = Duration::from_secs(20);

enum Command {
    Connected {
        will: Option<Will>,
        session_expiry_interval: Duration,
        user_context: Option<Context>,
    },
    Reconnected,
    Disconnected {
        is_will: bool,
        delay_interval: Option<Duration>,
    },
    SetUserContext(Option<Context>),
    TimerFired(u64),
    Stop(oneshot::Sender<()>),
}

struct WatchdogState {
    will: Option<Will>,
    user_context: Option<Context>,
    session_expiry_interval: Duration,
    expiry_generation: u64,
    is_stopping: bool,
}

/// A handle to a running watchdog actor.
///
/// Cloning shares the same underlying actor; all operations but [`stop`]
/// are fire-and-forget. See spec "Suspension points" (`SPEC_FULL.md` §5).
///
/// [`stop`]: WatchdogHandle::stop
#[derive(Clone)]
pub struct WatchdogHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl WatchdogHandle {
    /// Starts a new watchdog monitoring `session`, publishing wills through
    /// `router` when triggered. `liveness` resolves when the session
    /// terminates unexpectedly (see [`crate::session::SessionLivenessToken`]).
    ///
    /// Immediately arms a 20-second connect-expiry timer: if `connected` is
    /// not called before it fires, the session is killed and its (currently
    /// empty) will is published — a no-op publish, so the net effect is just
    /// terminating a stalled session.
    #[must_use]
    pub fn start(
        session: Arc<dyn SessionHandle>,
        liveness: oneshot::Receiver<std::convert::Infallible>,
        router: Arc<Router>,
    ) -> Self {
        Self::start_with_connect_expiry(session, liveness, router, CONNECT_EXPIRY)
    }

    /// Like [`WatchdogHandle::start`], but with the connect-expiry interval
    /// overridable. Not exposed outside the crate: the core has exactly one
    /// public tunable (the 20-second constant); this exists only so tests can
    /// run under `tokio::time::pause` without waiting out the real interval.
    #[must_use]
    pub(crate) fn start_with_connect_expiry(
        session: Arc<dyn SessionHandle>,
        liveness: oneshot::Receiver<std::convert::Infallible>,
        router: Arc<Router>,
        connect_expiry: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = WatchdogState {
            will: None,
            user_context: None,
            session_expiry_interval: Duration::ZERO,
            expiry_generation: 0,
            is_stopping: false,
        };
        arm_timer(&mut state, connect_expiry, &tx);

        tokio::spawn(run(state, session, liveness, router, rx, tx.clone()));

        Self { commands: tx }
    }

    /// The session finished its CONNECT handshake. Replaces `will`, the
    /// session-expiry interval, and `user_context`; cancels any armed timer.
    pub fn connected(&self, will: Option<Will>, session_expiry_interval: Duration, user_context: Option<Context>) {
        self.send(Command::Connected {
            will,
            session_expiry_interval,
            user_context,
        });
    }

    /// The session re-attached after a disconnect. Cancels any armed timer;
    /// leaves `will`, expiry, and context untouched.
    pub fn reconnected(&self) {
        self.send(Command::Reconnected);
    }

    /// The session lost its client connection. Arms an expiry timer per the
    /// disconnect-timer policy (see module docs and `SPEC_FULL.md` §4.1).
    pub fn disconnected(&self, is_will: bool, delay_interval: Option<Duration>) {
        self.send(Command::Disconnected {
            is_will,
            delay_interval,
        });
    }

    /// Shorthand for `disconnected(true, None)`.
    pub fn disconnected_default(&self) {
        self.disconnected(true, None);
    }

    /// Replaces `user_context` only, e.g. after re-authentication.
    pub fn set_user_context(&self, user_context: Option<Context>) {
        self.send(Command::SetUserContext(user_context));
    }

    /// Synchronously stops the watchdog: cancels any armed timer, marks it
    /// terminal, and returns only once no further will publication can
    /// occur.
    pub async fn stop(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Stop(reply_tx)).is_err() {
            // Actor already gone; its own termination already precludes any
            // further publish.
            return;
        }
        let _ = reply_rx.await;
    }

    fn send(&self, command: Command) {
        let _ = self.commands.send(command);
    }
}

fn arm_timer(state: &mut WatchdogState, delay: Duration, commands: &mpsc::UnboundedSender<Command>) {
    state.expiry_generation += 1;
    let generation = state.expiry_generation;
    let commands = commands.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = commands.send(Command::TimerFired(generation));
    });
}

fn cancel_timer(state: &mut WatchdogState) {
    // No timer task is actually aborted; bumping the generation makes any
    // in-flight `TimerFired` for the old generation a no-op when it arrives.
    state.expiry_generation += 1;
}

/// Computes the disconnect-timer arm delay and the will to keep, per the
/// four `(is_will, delay_interval)` cases in spec "Disconnect-timer policy"
/// (`SPEC_FULL.md` §4.1).
fn disconnect_timer_delay(will: &Option<Will>, is_will: bool, delay_interval: Option<Duration>) -> Duration {
    let w = will.as_ref().map_or(Duration::ZERO, |will| will.delay_interval);
    match (is_will, delay_interval) {
        (false, None) => w,
        (false, Some(d)) => d,
        (true, None) => w,
        (true, Some(d)) => d.min(w),
    }
}

async fn publish_will(state: &WatchdogState, router: &Router) {
    if state.is_stopping {
        return;
    }
    let Some(will) = &state.will else {
        return;
    };

    let message = Message {
        topic: will.topic.clone(),
        payload: will.payload.clone(),
        qos: will.qos,
        retain: will.retain,
        properties: will.properties.clone(),
    };
    debug!("publishing will on {}", will.topic);
    router
        .publish(will.topic.clone(), message, state.user_context.clone(), None)
        .await;
}

async fn run(
    mut state: WatchdogState,
    session: Arc<dyn SessionHandle>,
    liveness: oneshot::Receiver<std::convert::Infallible>,
    router: Arc<Router>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
) {
    let mut liveness = liveness;

    loop {
        tokio::select! {
            biased;

            _ = &mut liveness => {
                if !state.is_stopping {
                    debug!("session terminated unexpectedly, publishing will");
                    publish_will(&state, &router).await;
                }
                break;
            }

            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Connected { will, session_expiry_interval, user_context } => {
                        cancel_timer(&mut state);
                        state.will = will;
                        state.session_expiry_interval = session_expiry_interval;
                        state.user_context = user_context;
                    }
                    Command::Reconnected => {
                        cancel_timer(&mut state);
                    }
                    Command::Disconnected { is_will, delay_interval } => {
                        let delay = disconnect_timer_delay(&state.will, is_will, delay_interval);
                        if !is_will {
                            state.will = None;
                        }
                        arm_timer(&mut state, delay, &tx);
                    }
                    Command::SetUserContext(user_context) => {
                        state.user_context = user_context;
                    }
                    Command::TimerFired(generation) => {
                        if generation != state.expiry_generation {
                            continue;
                        }
                        session.terminate();
                        publish_will(&state, &router).await;
                        break;
                    }
                    Command::Stop(reply) => {
                        state.is_stopping = true;
                        cancel_timer(&mut state);
                        let _ = reply.send(());
                        break;
                    }
                }
            }
        }
    }
}
