// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wires together a [`Router`], a [`WatchdogHandle`], the in-memory retain
//! store, and an allow-all ACL to show the full publish/subscribe/will
//! lifecycle end to end, the way this codebase's `examples/simple_sample.rs`
//! demonstrates its MQTT client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use env_logger::Builder;
use tokio::sync::mpsc;

use azure_iot_operations_mqtt_broker_core::acl::AllowAllAcl;
use azure_iot_operations_mqtt_broker_core::retain::InMemoryRetainStore;
use azure_iot_operations_mqtt_broker_core::router::{
    Callback, Message, OwnerId, PoolId, QoS, Router, SubscriberOptionsBuilder,
};
use azure_iot_operations_mqtt_broker_core::session::{SessionHandle, SessionLivenessToken};
use azure_iot_operations_mqtt_broker_core::topic::{TopicFilter, TopicName};
use azure_iot_operations_mqtt_broker_core::watchdog::WatchdogHandle;
use azure_iot_operations_mqtt_broker_core::will::Will;

/// A toy session handle: logs when the watchdog asks it to terminate.
struct DemoSession {
    client_id: String,
    terminated: AtomicBool,
}

impl SessionHandle for DemoSession {
    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        log::info!("watchdog requested termination of session {}", self.client_id);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    Builder::new()
        .filter_level(log::LevelFilter::Debug)
        .format_timestamp(None)
        .init();

    let pool = PoolId::new();
    let router = Arc::new(Router::new(
        pool,
        Arc::new(InMemoryRetainStore::new()),
        Arc::new(AllowAllAcl),
    ));

    // Subscribe a dashboard to everything under "sensors/".
    let (dashboard_tx, mut dashboard_rx) = mpsc::unbounded_channel();
    let dashboard = OwnerId::new();
    router
        .subscribe(
            TopicFilter::new("sensors/#").unwrap(),
            Callback::Mailbox(dashboard_tx),
            dashboard,
            SubscriberOptionsBuilder::default().build().unwrap(),
            None,
        )
        .await
        .unwrap();

    // Start a watchdog for a session that configures a will and then crashes.
    let session = Arc::new(DemoSession {
        client_id: "demo-client".into(),
        terminated: AtomicBool::new(false),
    });
    let (liveness_token, liveness_rx) = SessionLivenessToken::new();
    let watchdog = WatchdogHandle::start(session.clone(), liveness_rx, router.clone());

    let will = Will::new(
        TopicName::new("sensors/offline").unwrap(),
        Bytes::from_static(b"demo-client went offline"),
    );
    watchdog.connected(Some(will), Duration::from_secs(300), None);

    // A live publish, observed by the dashboard subscription.
    router
        .publish(
            TopicName::new("sensors/42/temp").unwrap(),
            Message {
                topic: TopicName::new("sensors/42/temp").unwrap(),
                payload: Bytes::from_static(b"21.5"),
                qos: QoS::AtMostOnce,
                retain: false,
                properties: Vec::new(),
            },
            None,
            None,
        )
        .await;
    log_next(&mut dashboard_rx).await;

    // Simulate an unexpected crash: dropping the liveness token is exactly
    // what a session's own teardown path does on an abnormal exit, and the
    // watchdog publishes the will in response.
    drop(liveness_token);
    log_next(&mut dashboard_rx).await;

    watchdog.stop().await;
}

async fn log_next(dashboard_rx: &mut mpsc::UnboundedReceiver<azure_iot_operations_mqtt_broker_core::router::Envelope>) {
    if let Ok(Some(envelope)) = tokio::time::timeout(Duration::from_millis(200), dashboard_rx.recv()).await {
        log::info!(
            "dashboard received {} bytes on {} (bindings: {:?})",
            envelope.message.payload.len(),
            envelope.topic,
            envelope.topic_bindings
        );
    }
}
