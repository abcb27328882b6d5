// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Common error types.

use thiserror::Error;

pub use crate::topic::TopicError;

/// Error type for [`crate::router::Router`] operations. The specific cause is
/// given by [`RouterErrorKind`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RouterError(#[from] RouterErrorKind);

impl RouterError {
    /// Returns the [`RouterErrorKind`] describing why the operation failed.
    #[must_use]
    pub fn kind(&self) -> &RouterErrorKind {
        &self.0
    }
}

/// Error kind for [`RouterError`].
#[derive(Debug, Error)]
pub enum RouterErrorKind {
    /// `subscribe` was called with a subscriber that is not a recognized
    /// callback kind.
    #[error("subscriber is not a valid mailbox or invocation callback")]
    InvalidSubscriber,
    /// `unsubscribe` was called for a filter the owner is not subscribed to.
    #[error("no matching subscription for this owner and filter")]
    NotFound,
}
