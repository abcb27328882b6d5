// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The concurrent matching structure: a trie keyed by topic-path segments,
//! with dedicated child slots for `+` and `#` wildcard segments.
//!
//! Reads (one per `publish`) dominate writes (`subscribe`/`unsubscribe`/
//! owner-death) by orders of magnitude, so each node is guarded by its own
//! `parking_lot::RwLock` rather than the whole trie sharing one lock —
//! publishes under one subtree never block subscription changes under a
//! sibling subtree.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{Destination, OwnerId};
use crate::topic::{FilterSegment, TopicBinding, TopicFilter, TopicName};

#[derive(Default)]
struct Node {
    literal: HashMap<Box<str>, Node>,
    plus: Option<Box<Node>>,
    hash: Vec<Destination>,
    /// Destinations whose filter ends exactly at this node.
    here: Vec<Destination>,
}

/// The shared matching structure for one pool's router.
///
/// Each [`Node`] is independently locked; a lookup or mutation walks down
/// acquiring and releasing locks level by level, so no single lock spans the
/// whole tree.
pub(super) struct Trie {
    root: RwLock<Node>,
}

impl Trie {
    pub(super) fn new() -> Self {
        Self {
            root: RwLock::new(Node::default()),
        }
    }

    /// Inserts `destination` under `filter`, replacing any existing
    /// destination for the same owner at the same filter.
    pub(super) fn insert(&self, filter: TopicFilter, destination: Destination) {
        let segments = filter.segments();
        let owner = destination.owner;
        let mut node = self.root.write();
        insert_at(&mut node, segments, destination, owner);
    }

    /// Removes the destination owned by `owner` under `filter`. Returns
    /// `true` if a destination was found and removed.
    pub(super) fn remove(&self, filter: &TopicFilter, owner: OwnerId) -> bool {
        let segments = filter.segments();
        let mut node = self.root.write();
        remove_at(&mut node, segments, owner)
    }

    /// Returns every `(destination, bindings)` pair whose filter matches
    /// `topic`.
    pub(super) fn match_topic(&self, topic: &TopicName) -> Vec<(Destination, Vec<TopicBinding>)> {
        let mut out = Vec::new();
        let node = self.root.read();
        walk(&node, topic.segments(), &mut Vec::new(), &mut out);
        out
    }
}

fn insert_at(node: &mut Node, segments: &[FilterSegment], destination: Destination, owner: OwnerId) {
    match segments.split_first() {
        None => {
            node.here.retain(|d| d.owner != owner);
            node.here.push(destination);
        }
        Some((FilterSegment::MultiLevel, rest)) => {
            debug_assert!(rest.is_empty());
            node.hash.retain(|d| d.owner != owner);
            node.hash.push(destination);
        }
        Some((FilterSegment::SingleLevel, rest)) => {
            let child = node.plus.get_or_insert_with(|| Box::new(Node::default()));
            insert_at(child, rest, destination, owner);
        }
        Some((FilterSegment::Literal(lit), rest)) => {
            let child = node.literal.entry(lit.clone()).or_default();
            insert_at(child, rest, destination, owner);
        }
    }
}

fn remove_at(node: &mut Node, segments: &[FilterSegment], owner: OwnerId) -> bool {
    match segments.split_first() {
        None => {
            let before = node.here.len();
            node.here.retain(|d| d.owner != owner);
            node.here.len() != before
        }
        Some((FilterSegment::MultiLevel, _rest)) => {
            let before = node.hash.len();
            node.hash.retain(|d| d.owner != owner);
            node.hash.len() != before
        }
        Some((FilterSegment::SingleLevel, rest)) => node
            .plus
            .as_mut()
            .is_some_and(|child| remove_at(child, rest, owner)),
        Some((FilterSegment::Literal(lit), rest)) => node
            .literal
            .get_mut(lit)
            .is_some_and(|child| remove_at(child, rest, owner)),
    }
}

fn walk(
    node: &Node,
    topic: &[Box<str>],
    bindings: &mut Vec<TopicBinding>,
    out: &mut Vec<(Destination, Vec<TopicBinding>)>,
) {
    // `#` at this node matches the remaining suffix, including empty.
    if !node.hash.is_empty() {
        let mut hash_bindings = bindings.clone();
        hash_bindings.push(TopicBinding::Hash(topic.to_vec()));
        for destination in &node.hash {
            out.push((destination.clone(), hash_bindings.clone()));
        }
    }

    let Some((head, rest)) = topic.split_first() else {
        // Topic exhausted here: literal destinations registered at this
        // exact depth match.
        for destination in &node.here {
            out.push((destination.clone(), bindings.clone()));
        }
        return;
    };

    if let Some(child) = node.literal.get(head) {
        walk(child, rest, bindings, out);
    }

    if let Some(child) = &node.plus {
        bindings.push(TopicBinding::Plus(head.clone()));
        walk(child, rest, bindings, out);
        bindings.pop();
    }
}
