// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use super::{SEPARATOR, TopicError, TopicName};

/// A single normalized level of a topic filter.
///
/// Wildcard levels are represented as dedicated variants rather than as the
/// literal strings `"+"`/`"#"`, so a filter can never accidentally alias a
/// topic segment that happens to contain those characters (which MQTT itself
/// forbids in topic names, but which a naive string-keyed implementation
/// could otherwise confuse).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum FilterSegment {
    /// A literal, byte-exact segment.
    Literal(Box<str>),
    /// `+` — matches exactly one segment at this position.
    SingleLevel,
    /// `#` — matches zero or more trailing segments. Only valid as the final
    /// segment of a filter.
    MultiLevel,
}

/// What a wildcard segment bound to, for a single match of a filter against
/// a concrete topic. Order matches the order the wildcards appear in the
/// filter.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TopicBinding {
    /// A `+` bound to a single topic segment.
    Plus(Box<str>),
    /// A trailing `#` bound to the (possibly empty) suffix of segments it
    /// consumed.
    Hash(Vec<Box<str>>),
}

/// An MQTT topic filter, as used in SUBSCRIBE, possibly containing `+` and
/// `#` wildcards.
///
/// See MQTT v5, section "4.7 Topic Names and Topic Filters".
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TopicFilter {
    segments: Vec<FilterSegment>,
}

impl TopicFilter {
    /// Constructs a new [`TopicFilter`] after validating and normalizing the
    /// input string.
    ///
    /// # Errors
    /// Returns a [`TopicError`] if the filter is malformed.
    pub fn new<S>(s: S) -> Result<Self, TopicError>
    where
        S: AsRef<str>,
    {
        let s = s.as_ref();
        if s.is_empty() {
            return Err(TopicError::Empty);
        }

        let raw_segments: Vec<&str> = s.split(SEPARATOR).collect();
        let last = raw_segments.len() - 1;
        let mut segments = Vec::with_capacity(raw_segments.len());
        for (i, raw) in raw_segments.iter().enumerate() {
            let segment = match *raw {
                "+" => FilterSegment::SingleLevel,
                "#" => {
                    if i != last {
                        return Err(TopicError::MultiLevelNotLast);
                    }
                    FilterSegment::MultiLevel
                }
                other => {
                    if other.contains(['+', '#']) {
                        return Err(TopicError::MalformedWildcard);
                    }
                    FilterSegment::Literal(other.into())
                }
            };
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    /// Returns the normalized segments of this filter.
    #[must_use]
    pub fn segments(&self) -> &[FilterSegment] {
        &self.segments
    }

    /// Returns true if this filter contains any wildcard segment.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|s| !matches!(s, FilterSegment::Literal(_)))
    }

    /// Attempts to match this filter against a concrete topic, returning the
    /// wildcard bindings in filter order if it matches.
    #[must_use]
    pub fn matches(&self, topic: &TopicName) -> Option<Vec<TopicBinding>> {
        match_segments(&self.segments, topic.segments())
    }
}

/// Matches `filter` against `topic` segment-by-segment, producing the
/// wildcard bindings (in filter order) on success.
fn match_segments(filter: &[FilterSegment], topic: &[Box<str>]) -> Option<Vec<TopicBinding>> {
    let mut bindings = Vec::new();
    let mut topic = topic;

    for (i, seg) in filter.iter().enumerate() {
        match seg {
            FilterSegment::MultiLevel => {
                debug_assert_eq!(i, filter.len() - 1, "'#' must be the last filter segment");
                bindings.push(TopicBinding::Hash(topic.to_vec()));
                return Some(bindings);
            }
            FilterSegment::SingleLevel => {
                let (head, rest) = topic.split_first()?;
                bindings.push(TopicBinding::Plus(head.clone()));
                topic = rest;
            }
            FilterSegment::Literal(lit) => {
                let (head, rest) = topic.split_first()?;
                if &**head != &**lit {
                    return None;
                }
                topic = rest;
            }
        }
    }

    if topic.is_empty() {
        Some(bindings)
    } else {
        None
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            match seg {
                FilterSegment::Literal(s) => write!(f, "{s}")?,
                FilterSegment::SingleLevel => write!(f, "+")?,
                FilterSegment::MultiLevel => write!(f, "#")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::{FilterSegment, TopicBinding, TopicFilter};
    use crate::topic::{TopicError, TopicName};

    fn topic(s: &str) -> TopicName {
        TopicName::new(s).unwrap()
    }

    #[test_case("", TopicError::Empty; "empty")]
    #[test_case("a/#/b", TopicError::MultiLevelNotLast; "hash not last")]
    #[test_case("a/b#", TopicError::MalformedWildcard; "hash mixed with literal")]
    #[test_case("a/+b", TopicError::MalformedWildcard; "plus mixed with literal")]
    fn invalid(filter: &str, expected: TopicError) {
        assert_eq!(TopicFilter::new(filter).unwrap_err(), expected);
    }

    #[test]
    fn normalizes_wildcards_to_sentinels() {
        let f = TopicFilter::new("sensors/+/temp/#").unwrap();
        assert_eq!(
            f.segments(),
            &[
                FilterSegment::Literal("sensors".into()),
                FilterSegment::SingleLevel,
                FilterSegment::Literal("temp".into()),
                FilterSegment::MultiLevel,
            ]
        );
    }

    #[test_case("sport/tennis/player1", "sport/tennis/player1", Some(vec![]); "exact literal match")]
    #[test_case("sport/tennis/player1", "sport/tennis/player2", None; "exact literal mismatch")]
    #[test_case("sport/+", "sport/tennis", Some(vec![TopicBinding::Plus("tennis".into())]); "single level wildcard")]
    #[test_case("sport/+", "sport/tennis/player1", None; "single level wildcard does not cross levels")]
    #[test_case("sport/#", "sport", Some(vec![TopicBinding::Hash(vec![])]); "hash matches parent topic with zero suffix")]
    #[test_case("sport/#", "sport/tennis/player1", Some(vec![TopicBinding::Hash(vec!["tennis".into(), "player1".into()])]); "hash matches multiple trailing levels")]
    #[test_case("+/+", "sport/tennis", Some(vec![TopicBinding::Plus("sport".into()), TopicBinding::Plus("tennis".into())]); "multiple single level wildcards")]
    #[test_case("#", "a/b/c", Some(vec![TopicBinding::Hash(vec!["a".into(), "b".into(), "c".into()])]); "bare hash matches everything")]
    fn matching(filter: &str, topic_str: &str, expected: Option<Vec<TopicBinding>>) {
        let f = TopicFilter::new(filter).unwrap();
        let t = topic(topic_str);
        assert_eq!(f.matches(&t), expected);
    }

    #[test]
    fn is_wildcard() {
        assert!(!TopicFilter::new("a/b/c").unwrap().is_wildcard());
        assert!(TopicFilter::new("a/+/c").unwrap().is_wildcard());
        assert!(TopicFilter::new("a/#").unwrap().is_wildcard());
    }
}
