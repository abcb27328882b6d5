// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The runtime authorization hook: four pure callbacks for connect, reauth,
//! and per-topic publish/subscribe authorization. Application-level policy
//! (the actual allow/deny rules) is this collaborator's own contract — out
//! of scope here — so only the interface and an allow-all reference
//! implementation are provided.
//!
//! Sealed as a trait with a fixed, closed set of operations rather than an
//! open plugin/loader mechanism: see spec "ACL callback set"
//! (`SPEC_FULL.md` §9), which explicitly rules out runtime code loading.

use async_trait::async_trait;

use crate::router::{Context, Message};
use crate::topic::TopicName;

mod private {
    pub trait Sealed {}
}

/// Which operation [`RuntimeAcl::is_allowed`] is authorizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// A publish to `topic`.
    Publish,
    /// A subscribe (including retained-message replay) against `topic`.
    Subscribe,
}

/// An opaque representation of an inbound CONNECT packet, as handed to
/// [`RuntimeAcl::connect`]. The packet codec itself is out of scope; callers
/// provide whatever shape their transport layer parsed.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// The client identifier presented at connect.
    pub client_id: String,
    /// The username presented at connect, if any.
    pub username: Option<String>,
    /// Opaque password/credential bytes presented at connect, if any.
    pub password: Option<Vec<u8>>,
}

/// An opaque representation of an inbound AUTH packet (MQTT-5 enhanced
/// re-authentication), as handed to [`RuntimeAcl::reauth`].
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// The authentication method named by the packet.
    pub auth_method: String,
    /// The authentication data payload.
    pub auth_data: Vec<u8>,
}

/// An error surfaced verbatim from an ACL callback to the caller. See spec
/// "ACL/connect/reauth errors are surfaced verbatim from the ACL callback to
/// the caller" (`SPEC_FULL.md` §7).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct AclError(pub String);

/// The four runtime-ACL callbacks the router and watchdog consult. Every
/// callback is pure with respect to routing state.
///
/// See spec "Runtime ACL (interface only)" (`SPEC_FULL.md` §4.4). This trait
/// is sealed: it cannot be implemented outside this crate's reference
/// implementation and whatever the embedding application provides by hand,
/// never via dynamic code loading.
#[async_trait]
pub trait RuntimeAcl: private::Sealed + Send + Sync {
    /// Creates a fresh opaque identity context for a newly-seen client.
    async fn new_user_context(&self, client_id: &str) -> Option<Context>;

    /// Authorizes a CONNECT, optionally producing a new context.
    ///
    /// # Errors
    /// Returns an [`AclError`] to reject the connection; it is surfaced
    /// verbatim to the caller.
    async fn connect(
        &self,
        request: &ConnectRequest,
        user_context: Option<Context>,
    ) -> Result<Option<Context>, AclError>;

    /// Authorizes an MQTT-5 enhanced re-authentication, optionally producing
    /// a new context.
    ///
    /// # Errors
    /// Returns an [`AclError`] to reject the re-authentication; it is
    /// surfaced verbatim to the caller.
    async fn reauth(
        &self,
        request: &AuthRequest,
        user_context: Option<Context>,
    ) -> Result<Option<Context>, AclError>;

    /// Authorizes a single publish or subscribe against `topic`. The router
    /// consults this only for `Action::Subscribe`, during retained-message
    /// replay; `Action::Publish` is provided for embedding applications that
    /// want to gate live publishes the same way.
    async fn is_allowed(
        &self,
        action: Action,
        topic: &TopicName,
        message: &Message,
        user_context: Option<Context>,
    ) -> bool;
}

/// A reference [`RuntimeAcl`] that authorizes everything unconditionally and
/// never allocates a context. Useful for tests and for embedding
/// applications with their own out-of-band authorization layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAcl;

impl private::Sealed for AllowAllAcl {}

#[async_trait]
impl RuntimeAcl for AllowAllAcl {
    async fn new_user_context(&self, _client_id: &str) -> Option<Context> {
        None
    }

    async fn connect(
        &self,
        _request: &ConnectRequest,
        user_context: Option<Context>,
    ) -> Result<Option<Context>, AclError> {
        Ok(user_context)
    }

    async fn reauth(
        &self,
        _request: &AuthRequest,
        user_context: Option<Context>,
    ) -> Result<Option<Context>, AclError> {
        Ok(user_context)
    }

    async fn is_allowed(
        &self,
        _action: Action,
        _topic: &TopicName,
        _message: &Message,
        _user_context: Option<Context>,
    ) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::router::QoS;

    #[tokio::test]
    async fn allow_all_allows_everything() {
        let acl = AllowAllAcl;
        let topic = TopicName::new("a/b").unwrap();
        let message = Message {
            topic: topic.clone(),
            payload: Bytes::new(),
            qos: QoS::AtMostOnce,
            retain: false,
            properties: Vec::new(),
        };
        assert!(acl.is_allowed(Action::Publish, &topic, &message, None).await);
        assert!(acl.is_allowed(Action::Subscribe, &topic, &message, None).await);
    }

    #[tokio::test]
    async fn allow_all_passes_context_through() {
        let acl = AllowAllAcl;
        let request = ConnectRequest {
            client_id: "c1".into(),
            username: None,
            password: None,
        };
        let ctx = Context::new(42u32);
        let result = acl.connect(&request, Some(ctx)).await.unwrap();
        assert_eq!(result.unwrap().downcast_ref::<u32>(), Some(&42));
    }
}
