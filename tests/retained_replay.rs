// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use azure_iot_operations_mqtt_broker_core::acl::AllowAllAcl;
use azure_iot_operations_mqtt_broker_core::retain::InMemoryRetainStore;
use azure_iot_operations_mqtt_broker_core::router::{
    Callback, Envelope, Message, OwnerId, PoolId, QoS, RetainHandling, Router, SubscriberOptionsBuilder,
};
use azure_iot_operations_mqtt_broker_core::topic::{TopicFilter, TopicName};

fn new_router() -> Router {
    Router::new(
        PoolId::new(),
        Arc::new(InMemoryRetainStore::new()),
        Arc::new(AllowAllAcl),
    )
}

fn mailbox() -> (Callback, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Callback::Mailbox(tx), rx)
}

/// S7 — retained replay is gated on whether a subscription is new, where
/// "new" means the owner did not already hold a destination under this
/// exact filter.
#[tokio::test]
async fn retained_replay_gating() {
    let router = new_router();
    let owner = OwnerId::new();
    let filter = TopicFilter::new("r").unwrap();
    let retain_if_new = SubscriberOptionsBuilder::default()
        .retain_handling(RetainHandling::SendIfNew)
        .build()
        .unwrap();

    router
        .publish(
            TopicName::new("r").unwrap(),
            Message {
                topic: TopicName::new("r").unwrap(),
                payload: Bytes::from_static(b"retained"),
                qos: QoS::AtMostOnce,
                retain: true,
                properties: Vec::new(),
            },
            None,
            None,
        )
        .await;

    // First subscription: new, so the retained message is replayed.
    let (cb1, mut rx1) = mailbox();
    router
        .subscribe(filter.clone(), cb1, owner, retain_if_new.clone(), None)
        .await
        .unwrap();
    let envelope = timeout(Duration::from_millis(200), rx1.recv())
        .await
        .expect("retained message should be replayed on first subscription")
        .unwrap();
    assert_eq!(envelope.message.payload, Bytes::from_static(b"retained"));

    router.unsubscribe(filter.clone(), owner).await.unwrap();

    // Resubscribing after an explicit unsubscribe is a new subscription.
    let (cb2, mut rx2) = mailbox();
    router
        .subscribe(filter.clone(), cb2, owner, retain_if_new.clone(), None)
        .await
        .unwrap();
    timeout(Duration::from_millis(200), rx2.recv())
        .await
        .expect("retained message should be replayed after resubscribing post-unsubscribe")
        .unwrap();

    // Resubscribing the same owner/filter WITHOUT unsubscribing first is not
    // a new subscription.
    let (cb3, mut rx3) = mailbox();
    router
        .subscribe(filter.clone(), cb3, owner, retain_if_new, None)
        .await
        .unwrap();
    assert!(
        timeout(Duration::from_millis(200), rx3.recv()).await.is_err(),
        "re-subscribing without an intervening unsubscribe must not replay retained messages"
    );
}

/// `retain_handling=0` always replays; `retain_handling=2` never does.
#[tokio::test]
async fn retain_handling_always_and_never() {
    let router = new_router();

    router
        .publish(
            TopicName::new("r").unwrap(),
            Message {
                topic: TopicName::new("r").unwrap(),
                payload: Bytes::from_static(b"retained"),
                qos: QoS::AtMostOnce,
                retain: true,
                properties: Vec::new(),
            },
            None,
            None,
        )
        .await;

    let filter = TopicFilter::new("r").unwrap();

    let (always_cb, mut always_rx) = mailbox();
    router
        .subscribe(
            filter.clone(),
            always_cb,
            OwnerId::new(),
            SubscriberOptionsBuilder::default()
                .retain_handling(RetainHandling::SendAtSubscribe)
                .build()
                .unwrap(),
            None,
        )
        .await
        .unwrap();
    timeout(Duration::from_millis(200), always_rx.recv()).await.unwrap().unwrap();

    let (never_cb, mut never_rx) = mailbox();
    router
        .subscribe(
            filter,
            never_cb,
            OwnerId::new(),
            SubscriberOptionsBuilder::default()
                .retain_handling(RetainHandling::DoNotSend)
                .build()
                .unwrap(),
            None,
        )
        .await
        .unwrap();

    // `subscribe` awaits its own retained replay before returning, so by now
    // the mailbox's state is settled: a bare poll confirms nothing replayed.
    let mut recv_fut = tokio_test::task::spawn(never_rx.recv());
    tokio_test::assert_pending!(recv_fut.poll());
}
