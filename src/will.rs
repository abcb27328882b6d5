// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Last-Will-and-Testament message type tracked by the [`crate::watchdog`].

use std::time::Duration;

use bytes::Bytes;

use crate::router::QoS;
use crate::topic::TopicName;

/// User/system properties attached to a will or publish, as an ordered list
/// of key/value pairs (MQTT-5 allows repeated keys).
pub type UserProperties = Vec<(String, String)>;

/// A client's Last-Will-and-Testament, as configured at CONNECT time.
///
/// See spec "Will message": `topic`, `payload`, `qos`, `retain`,
/// `properties`, and `delay_interval` all default as MQTT-5 specifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    /// The topic the will is published to.
    pub topic: TopicName,
    /// The opaque payload bytes.
    pub payload: Bytes,
    /// Quality of service the will is published with.
    pub qos: QoS,
    /// Whether the will is published with the retain flag set.
    pub retain: bool,
    /// Free-form MQTT-5 user/system properties.
    pub properties: UserProperties,
    /// Seconds to wait after disconnect before publishing this will, absent
    /// an earlier session-expiry timeout.
    pub delay_interval: Duration,
}

impl Will {
    /// Constructs a new [`Will`] with MQTT-5 default `qos`, `retain`,
    /// `properties`, and `delay_interval`.
    #[must_use]
    pub fn new(topic: TopicName, payload: impl Into<Bytes>) -> Self {
        Self {
            topic,
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            properties: Vec::new(),
            delay_interval: Duration::ZERO,
        }
    }
}
