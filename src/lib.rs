// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Core of an MQTT (v5) session and routing subsystem: the will watchdog,
//! the topic router, and the runtime authorization hook that together
//! implement session lifecycle and publish/subscribe dispatch for a broker
//! or in-process message bus.
//!
//! MQTT wire codec, the session packet state machine, transport (TCP/WS/
//! TLS), retained-message persistence, and application-level ACL policy are
//! external collaborators; this crate specifies only the interfaces it calls
//! into them through.

pub mod acl;
pub mod error;
pub mod retain;
pub mod router;
pub mod session;
pub mod topic;
pub mod watchdog;
pub mod will;
