// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The process-wide (per pool) topic router: subscription registry, matching
//! dispatch, and owner liveness tracking.

mod trie;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use derive_builder::Builder;
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub use crate::error::{RouterError, RouterErrorKind};
use crate::topic::{TopicBinding, TopicFilter, TopicName};
use trie::Trie;

/// Quality of service level, as defined by MQTT v5 section "4.3 Quality of
/// Service levels and protocol flows".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

/// How retained messages are replayed on a new subscription. See MQTT v5
/// section "3.8.3.1 Subscription Options".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RetainHandling {
    /// Always replay retained messages matching the filter.
    #[default]
    SendAtSubscribe = 0,
    /// Replay only if this subscription did not already exist.
    SendIfNew = 1,
    /// Never replay retained messages.
    DoNotSend = 2,
}

/// Opaque, type-erased context carried alongside a session or subscription —
/// the ACL/identity blob the core never interprets itself, only threads
/// through to the [`crate::acl::RuntimeAcl`] callbacks and outgoing
/// envelopes.
#[derive(Clone)]
pub struct Context(Arc<dyn Any + Send + Sync>);

impl Context {
    /// Wraps `value` as an opaque context.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self(Arc::new(value))
    }

    /// Attempts to downcast back to the concrete type it was built from.
    #[must_use]
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&"..").finish()
    }
}

/// Identifies the broker instance a router/watchdog belongs to, allowing
/// multiple logical brokers to share one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(Uuid);

impl PoolId {
    /// Generates a new, random pool identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::new()
    }
}

/// The liveness anchor of a subscription. When an owner dies, every
/// destination it holds is removed from the matching structure.
///
/// Constructed by a caller that also holds the matching
/// [`OwnerLivenessToken`]; the router learns of the owner's death by
/// awaiting that token's paired receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Generates a new, random owner identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// The write half of an owner's liveness signal: dropping this (or its
/// holder terminating) is observed by the router as the owner's death.
///
/// See spec "Process-linked destinations" (`SPEC_FULL.md` §9): in a runtime
/// without supervisor-style process links, liveness is modeled explicitly
/// with a handle the owner holds, whose drop is detectable.
#[derive(Debug)]
pub struct OwnerLivenessToken {
    _tx: oneshot::Sender<std::convert::Infallible>,
}

impl OwnerLivenessToken {
    fn new() -> (Self, oneshot::Receiver<std::convert::Infallible>) {
        let (tx, rx) = oneshot::channel();
        (Self { _tx: tx }, rx)
    }
}

/// What a matched destination is delivered through.
#[derive(Clone)]
pub enum Callback {
    /// Deliver by enqueuing an [`Envelope`] onto an unbounded mailbox.
    Mailbox(mpsc::UnboundedSender<Envelope>),
    /// Deliver by invoking a closure with the envelope. The closure captures
    /// its own "prefix arguments" and must not block.
    Invocation(Arc<dyn Fn(Envelope) + Send + Sync>),
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mailbox(_) => f.write_str("Callback::Mailbox(..)"),
            Self::Invocation(_) => f.write_str("Callback::Invocation(..)"),
        }
    }
}

/// Per-subscriber delivery options, set at `subscribe` time.
///
/// See spec "Destination.options" (`SPEC_FULL.md` §3).
#[derive(Debug, Clone, Builder)]
#[builder(setter(into), default)]
pub struct SubscriberOptions {
    /// Quality of service this subscriber wants.
    pub qos: QoS,
    /// If true, a publish whose publisher is this destination's owner is not
    /// delivered back to it.
    pub no_local: bool,
    /// If true, the retain flag on the original message is preserved on
    /// delivery rather than masked to `false`.
    pub retain_as_published: bool,
    /// Governs retained-message replay on subscribe.
    pub retain_handling: RetainHandling,
    /// Opaque context passed back in envelopes delivered to this subscriber.
    #[builder(setter(strip_option), default)]
    pub subscriber_context: Option<Context>,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::SendAtSubscribe,
            subscriber_context: None,
        }
    }
}

/// A message as it travels through the router: either a live publish or a
/// stored will, both reduced to the same shape before dispatch.
///
/// See spec "Will message" / envelope `message` field (`SPEC_FULL.md` §3, §6).
#[derive(Debug, Clone)]
pub struct Message {
    /// The concrete topic the message was published on.
    pub topic: TopicName,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Quality of service the publisher sent with.
    pub qos: QoS,
    /// Whether the publisher set the retain flag.
    pub retain: bool,
    /// Free-form MQTT-5 user/system properties.
    pub properties: Vec<(String, String)>,
}

/// The envelope delivered to a matched subscriber.
///
/// See spec "Envelope delivered to subscribers" (`SPEC_FULL.md` §6).
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The pool the publish occurred on.
    pub pool: PoolId,
    /// The concrete topic, already reduced to `message.topic` but kept here
    /// for convenience.
    pub topic: TopicName,
    /// What each wildcard segment of the matched filter bound to, in filter
    /// order.
    pub topic_bindings: Vec<TopicBinding>,
    /// The message, with `retain` already masked per the destination's
    /// `retain_as_published` option.
    pub message: Message,
    /// Opaque context of whoever published the message.
    pub publisher_context: Option<Context>,
    /// Opaque context of the matched subscriber.
    pub subscriber_context: Option<Context>,
    /// The matched destination's subscriber options, merged in verbatim.
    pub qos: QoS,
    /// See [`SubscriberOptions::no_local`].
    pub no_local: bool,
    /// See [`SubscriberOptions::retain_as_published`].
    pub retain_as_published: bool,
    /// See [`SubscriberOptions::retain_handling`].
    pub retain_handling: RetainHandling,
}

/// A single `(filter, destination)` pairing held in an owner's subscription
/// list and in the matching trie.
#[derive(Clone)]
struct Destination {
    filter: TopicFilter,
    callback: Callback,
    owner: OwnerId,
    options: SubscriberOptions,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("filter", &self.filter)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// The per-pool topic router: subscription registry, matching dispatch, and
/// retained-message interaction.
///
/// Mutating operations (`subscribe`, `unsubscribe`, owner-death cleanup) are
/// serialized through a single control task; `publish` matches and dispatches
/// on the caller's own task so routing throughput scales with publisher
/// concurrency. See spec "Scheduling model" (`SPEC_FULL.md` §5).
pub struct Router {
    pool: PoolId,
    trie: Arc<Trie>,
    monitors: Arc<DashMap<OwnerId, Vec<TopicFilter>>>,
    control: mpsc::UnboundedSender<Control>,
    retain: Arc<dyn crate::retain::RetainStore>,
    acl: Arc<dyn crate::acl::RuntimeAcl>,
}

enum Control {
    Subscribe {
        filter: TopicFilter,
        destination: Destination,
        reply: oneshot::Sender<Result<bool, RouterError>>,
    },
    Unsubscribe {
        filter: TopicFilter,
        owner: OwnerId,
        reply: oneshot::Sender<Result<(), RouterError>>,
    },
    OwnerDied {
        owner: OwnerId,
    },
}

impl Router {
    /// Starts a new router for `pool`, backed by `retain` and `acl`.
    #[must_use]
    pub fn new(
        pool: PoolId,
        retain: Arc<dyn crate::retain::RetainStore>,
        acl: Arc<dyn crate::acl::RuntimeAcl>,
    ) -> Self {
        let trie = Arc::new(Trie::new());
        let monitors: Arc<DashMap<OwnerId, Vec<TopicFilter>>> = Arc::new(DashMap::new());
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(control_loop(trie.clone(), monitors.clone(), control_rx));

        Self {
            pool,
            trie,
            monitors,
            control: control_tx,
            retain,
            acl,
        }
    }

    /// Returns the pool this router serves.
    #[must_use]
    pub fn pool(&self) -> PoolId {
        self.pool
    }

    /// Registers `owner`'s liveness with the router: a spawned watcher task
    /// observes `rx` and, once it resolves (because the paired
    /// [`OwnerLivenessToken`] was dropped), notifies the router's control
    /// task to garbage-collect every destination `owner` held.
    pub fn watch_owner(&self, owner: OwnerId) -> OwnerLivenessToken {
        let (token, rx) = OwnerLivenessToken::new();
        let control = self.control.clone();
        tokio::spawn(async move {
            // The sender is only ever dropped, never sent to; any resolution
            // (always `Err(RecvError)`) means the owner has died.
            let _ = rx.await;
            let _ = control.send(Control::OwnerDied { owner });
        });
        token
    }

    /// Explicitly marks `owner` as dead, for owners whose liveness is
    /// observed some other way (e.g. a remote heartbeat protocol) rather
    /// than via [`Router::watch_owner`].
    pub fn owner_died(&self, owner: OwnerId) {
        let _ = self.control.send(Control::OwnerDied { owner });
    }

    /// Subscribes `owner` to `filter`, replaying retained messages per
    /// `options.retain_handling`.
    ///
    /// # Errors
    /// Returns [`RouterErrorKind::InvalidSubscriber`] only in bindings where
    /// `callback` cannot be validated ahead of this call; in this crate
    /// `Callback` is already a closed, valid variant, so this is reserved for
    /// future non-Rust bindings — see spec "subscribe" validation step
    /// (`SPEC_FULL.md` §4.2).
    pub async fn subscribe(
        &self,
        filter: TopicFilter,
        callback: Callback,
        owner: OwnerId,
        options: SubscriberOptions,
        publisher: Option<OwnerId>,
    ) -> Result<(), RouterError> {
        let destination = Destination {
            filter: filter.clone(),
            callback,
            owner,
            options: options.clone(),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(Control::Subscribe {
                filter: filter.clone(),
                destination: destination.clone(),
                reply: reply_tx,
            })
            .map_err(|_| RouterErrorKind::NotFound)?;
        let is_new = reply_rx.await.map_err(|_| RouterErrorKind::NotFound)??;

        self.replay_retained(&filter, &destination, is_new, publisher).await;
        Ok(())
    }

    /// Removes `owner`'s destination under `filter`.
    ///
    /// # Errors
    /// Returns [`RouterErrorKind::NotFound`] if `owner` held no destination
    /// under `filter`.
    pub async fn unsubscribe(&self, filter: TopicFilter, owner: OwnerId) -> Result<(), RouterError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(Control::Unsubscribe {
                filter,
                owner,
                reply: reply_tx,
            })
            .map_err(|_| RouterErrorKind::NotFound)?;
        reply_rx.await.map_err(|_| RouterErrorKind::NotFound)?
    }

    /// Matches `topic` against every subscribed filter and dispatches the
    /// message to each destination in turn, honoring `no_local` and
    /// `retain_as_published`, then (if `message.retain`) hands the message to
    /// the retain store.
    pub async fn publish(
        &self,
        topic: TopicName,
        message: Message,
        publisher_context: Option<Context>,
        publisher: Option<OwnerId>,
    ) {
        let matches = self.trie.match_topic(&topic);
        debug!(
            "publish on {topic} matched {} destination(s)",
            matches.len()
        );

        for (destination, bindings) in matches {
            if destination.options.no_local && Some(destination.owner) == publisher {
                continue;
            }

            let mut outgoing = message.clone();
            if outgoing.retain && !destination.options.retain_as_published {
                outgoing.retain = false;
            }

            let envelope = Envelope {
                pool: self.pool,
                topic: topic.clone(),
                topic_bindings: bindings,
                message: outgoing,
                publisher_context: publisher_context.clone(),
                subscriber_context: destination.options.subscriber_context.clone(),
                qos: destination.options.qos,
                no_local: destination.options.no_local,
                retain_as_published: destination.options.retain_as_published,
                retain_handling: destination.options.retain_handling,
            };

            dispatch(&destination.callback, envelope);
        }

        if message.retain {
            self.retain.retain(self.pool, message, publisher_context).await;
        }
    }

    async fn replay_retained(
        &self,
        filter: &TopicFilter,
        destination: &Destination,
        is_new: bool,
        _publisher: Option<OwnerId>,
    ) {
        let options = &destination.options;
        let should_replay = match options.retain_handling {
            RetainHandling::SendAtSubscribe => true,
            RetainHandling::SendIfNew => is_new,
            RetainHandling::DoNotSend => false,
        };
        if !should_replay {
            return;
        }

        for (message, publisher_context) in self.retain.lookup(self.pool, filter).await {
            let Some(bindings) = filter.matches(&message.topic) else {
                continue;
            };
            if !self
                .acl
                .is_allowed(
                    crate::acl::Action::Subscribe,
                    &message.topic,
                    &message,
                    options.subscriber_context.clone(),
                )
                .await
            {
                continue;
            }

            let mut outgoing = message.clone();
            if outgoing.retain && !options.retain_as_published {
                outgoing.retain = false;
            }

            let envelope = Envelope {
                pool: self.pool,
                topic: message.topic.clone(),
                topic_bindings: bindings,
                message: outgoing,
                publisher_context,
                subscriber_context: options.subscriber_context.clone(),
                qos: options.qos,
                no_local: options.no_local,
                retain_as_published: options.retain_as_published,
                retain_handling: options.retain_handling,
            };

            dispatch(&destination.callback, envelope);
        }
    }
}

fn dispatch(callback: &Callback, envelope: Envelope) {
    match callback {
        Callback::Mailbox(tx) => {
            if tx.send(envelope).is_err() {
                warn!("dispatch failed: subscriber mailbox closed");
            }
        }
        Callback::Invocation(f) => f(envelope),
    }
}

async fn control_loop(
    trie: Arc<Trie>,
    monitors: Arc<DashMap<OwnerId, Vec<TopicFilter>>>,
    mut rx: mpsc::UnboundedReceiver<Control>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Control::Subscribe {
                filter,
                destination,
                reply,
            } => {
                let owner = destination.owner;
                let is_new = !monitors
                    .get(&owner)
                    .is_some_and(|filters| filters.contains(&filter));

                trie.insert(filter.clone(), destination);

                monitors
                    .entry(owner)
                    .and_modify(|filters| {
                        if !filters.contains(&filter) {
                            filters.push(filter.clone());
                        }
                    })
                    .or_insert_with(|| vec![filter.clone()]);

                let _ = reply.send(Ok(is_new));
            }
            Control::Unsubscribe { filter, owner, reply } => {
                let removed = trie.remove(&filter, owner);
                if removed {
                    if let Some(mut filters) = monitors.get_mut(&owner) {
                        filters.retain(|f| f != &filter);
                    }
                    let _ = reply.send(Ok(()));
                } else {
                    let _ = reply.send(Err(RouterErrorKind::NotFound.into()));
                }
            }
            Control::OwnerDied { owner } => {
                if let Some((_, filters)) = monitors.remove(&owner) {
                    debug!("owner {owner:?} died, removing {} subscription(s)", filters.len());
                    for filter in filters {
                        trie.remove(&filter, owner);
                    }
                }
            }
        }
    }
}
