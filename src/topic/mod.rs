// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT Topic Name and Topic Filter types, and the segment-matching logic
//! used by the [`crate::router::Router`].
//!
//! Implementation note: segments are parsed into an enum with explicit
//! wildcard variants rather than compared as raw strings, so that a literal
//! topic segment can never alias the `+`/`#` wildcard markers (spec "Filter
//! normalization").

mod filter;
mod name;

pub use filter::{FilterSegment, TopicBinding, TopicFilter};
pub use name::TopicName;

use thiserror::Error;

/// Error type for validating topic names and filters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicError {
    /// The topic name or filter was empty.
    #[error("topic name or filter must not be empty")]
    Empty,
    /// A filter segment contained `+` or `#` alongside other characters.
    #[error("wildcard characters must occupy an entire segment")]
    MalformedWildcard,
    /// `#` appeared somewhere other than as the final segment of a filter.
    #[error("'#' must be the last segment of a topic filter")]
    MultiLevelNotLast,
    /// A topic name (as opposed to a filter) contained a wildcard character.
    #[error("topic names must not contain '+' or '#'")]
    WildcardInTopicName,
}

const SEPARATOR: char = '/';
