//! Topic patterns and wildcard matching for the fleet topic namespace
//!
//! Topics are `/`-separated levels such as `iot-car/car-7/telemetry`.
//! Subscription patterns may use `+` to match exactly one level and a
//! trailing `#` to match the remaining levels, including none at all.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Root level shared by every topic the fleet publishes on
pub const TOPIC_ROOT: &str = "iot-car";

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL_WILDCARD: &str = "+";
const MULTI_LEVEL_WILDCARD: &str = "#";

/// Errors raised while parsing a subscription pattern
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopicPatternError {
    #[error("Topic pattern cannot be empty")]
    Empty,
    #[error("Invalid topic pattern '{pattern}': # wildcard can only be the last level")]
    HashPosition { pattern: String },
    #[error("Invalid topic pattern '{pattern}': wildcard must occupy a whole level, got '{level}'")]
    WildcardUsage { pattern: String, level: String },
}

/// One level of a subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternSegment {
    /// Exact, case-sensitive level
    Literal(String),
    /// `+`
    SingleLevel,
    /// `#`, always the final segment
    MultiLevel,
}

impl PatternSegment {
    pub fn as_str(&self) -> &str {
        match self {
            PatternSegment::Literal(level) => level,
            PatternSegment::SingleLevel => SINGLE_LEVEL_WILDCARD,
            PatternSegment::MultiLevel => MULTI_LEVEL_WILDCARD,
        }
    }
}

/// A validated subscription pattern
///
/// # Examples
/// ```
/// use iot_car_backend::protocol::TopicPattern;
///
/// let pattern: TopicPattern = "iot-car/+/telemetry".parse().unwrap();
/// assert!(pattern.matches_topic("iot-car/car-7/telemetry"));
/// assert!(!pattern.matches_topic("iot-car/car-7/status"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    segments: Vec<PatternSegment>,
}

impl TopicPattern {
    /// Parse and validate a pattern string
    pub fn parse(pattern: &str) -> Result<Self, TopicPatternError> {
        if pattern.is_empty() {
            return Err(TopicPatternError::Empty);
        }

        let levels: Vec<&str> = pattern.split(LEVEL_SEPARATOR).collect();
        let last = levels.len() - 1;
        let mut segments = Vec::with_capacity(levels.len());

        for (index, level) in levels.into_iter().enumerate() {
            let segment = match level {
                MULTI_LEVEL_WILDCARD if index == last => PatternSegment::MultiLevel,
                MULTI_LEVEL_WILDCARD => {
                    return Err(TopicPatternError::HashPosition {
                        pattern: pattern.to_string(),
                    });
                }
                SINGLE_LEVEL_WILDCARD => PatternSegment::SingleLevel,
                literal if literal.contains(['+', '#']) => {
                    return Err(TopicPatternError::WildcardUsage {
                        pattern: pattern.to_string(),
                        level: literal.to_string(),
                    });
                }
                literal => PatternSegment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// True when the pattern contains `+` or `#`
    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| !matches!(segment, PatternSegment::Literal(_)))
    }

    /// Match a raw topic string against this pattern
    pub fn matches_topic(&self, topic: &str) -> bool {
        matches(&Topic::parse(topic), self)
    }

    /// Decide whether at least one concrete topic matches both patterns.
    ///
    /// Used to detect registrations where the earlier pattern shadows part
    /// of a later one.
    pub fn overlaps(&self, other: &TopicPattern) -> bool {
        let mut ours = self.segments.iter();
        let mut theirs = other.segments.iter();

        loop {
            match (ours.next(), theirs.next()) {
                (Some(PatternSegment::MultiLevel), _) | (_, Some(PatternSegment::MultiLevel)) => {
                    return true;
                }
                (None, None) => return true,
                (Some(_), None) | (None, Some(_)) => return false,
                (Some(PatternSegment::Literal(a)), Some(PatternSegment::Literal(b))) => {
                    if a != b {
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
}

impl FromStr for TopicPattern {
    type Err = TopicPatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            f.write_str(segment.as_str())?;
        }
        Ok(())
    }
}

/// A concrete topic split into its levels. Never contains wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic<'a> {
    levels: Vec<&'a str>,
}

impl<'a> Topic<'a> {
    /// Split on `/`. Empty levels are kept, so `""` is one empty level.
    pub fn parse(topic: &'a str) -> Self {
        Self {
            levels: topic.split(LEVEL_SEPARATOR).collect(),
        }
    }
}

/// Decide whether `topic` matches `pattern`.
///
/// Levels are compared left to right. `#` accepts whatever remains,
/// including nothing, so `a/#` matches `a`. Without `#` both sides must
/// have the same number of levels.
pub fn matches(topic: &Topic<'_>, pattern: &TopicPattern) -> bool {
    let mut levels = topic.levels.iter();

    for segment in &pattern.segments {
        let level = match segment {
            PatternSegment::MultiLevel => return true,
            _ => match levels.next() {
                Some(level) => level,
                None => return false,
            },
        };

        if let PatternSegment::Literal(expected) = segment {
            if expected.as_str() != *level {
                return false;
            }
        }
    }

    levels.next().is_none()
}

/// Topic construction for outbound fleet messages
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build device command topic: `iot-car/{device_id}/command`
    pub fn command_topic(device_id: &str) -> String {
        format!("{TOPIC_ROOT}/{device_id}/command")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pattern(s: &str) -> TopicPattern {
        TopicPattern::parse(s).unwrap()
    }

    fn is_match(topic: &str, p: &str) -> bool {
        pattern(p).matches_topic(topic)
    }

    #[test]
    fn test_documented_examples() {
        assert!(is_match("a/b", "a/#"));
        assert!(is_match("a", "a/#"));
        assert!(!is_match("a/b/c", "a/+"));
        assert!(is_match("", "#"));
    }

    #[test]
    fn test_fleet_patterns() {
        assert!(is_match("iot-car/car-7/telemetry", "iot-car/+/telemetry"));
        assert!(is_match("iot-car/car-001/status", "iot-car/+/status"));
        assert!(!is_match("iot-car/car-7/status", "iot-car/+/telemetry"));
        assert!(!is_match("iot-car/telemetry", "iot-car/+/telemetry"));
        assert!(!is_match("iot-car/a/b/telemetry", "iot-car/+/telemetry"));
        assert!(is_match("iot-car/fleet/broadcast", "iot-car/fleet/broadcast"));
    }

    #[test]
    fn test_literal_matching_is_case_sensitive() {
        assert!(!is_match("IOT-CAR/car-7/telemetry", "iot-car/+/telemetry"));
        assert!(!is_match("a/B", "a/b"));
    }

    #[test]
    fn test_pattern_shorter_than_topic_never_matches() {
        assert!(!is_match("a/b/c", "a/b"));
        assert!(!is_match("a/b", "+"));
        assert!(!is_match("a/b/c", "+/+"));
    }

    #[test]
    fn test_topic_shorter_than_pattern_never_matches() {
        assert!(!is_match("a", "a/b"));
        assert!(!is_match("a", "a/+"));
        assert!(!is_match("a", "a/+/#"));
    }

    #[test]
    fn test_plus_matches_empty_level() {
        assert!(is_match("a//c", "a/+/c"));
        assert!(is_match("", "+"));
        assert!(is_match("a/", "a/+"));
    }

    #[test]
    fn test_multi_level_after_plus() {
        assert!(is_match("iot-car/car-7", "iot-car/+/#"));
        assert!(is_match("iot-car/car-7/telemetry/raw", "iot-car/+/#"));
        assert!(!is_match("iot-car", "iot-car/+/#"));
    }

    #[test]
    fn test_parse_rejects_malformed_patterns() {
        assert_eq!(TopicPattern::parse(""), Err(TopicPatternError::Empty));
        assert!(matches!(
            TopicPattern::parse("a/#/b"),
            Err(TopicPatternError::HashPosition { .. })
        ));
        assert!(matches!(
            TopicPattern::parse("#/#"),
            Err(TopicPatternError::HashPosition { .. })
        ));
        assert!(matches!(
            TopicPattern::parse("a/b+/c"),
            Err(TopicPatternError::WildcardUsage { .. })
        ));
        assert!(matches!(
            TopicPattern::parse("a/b#"),
            Err(TopicPatternError::WildcardUsage { .. })
        ));
    }

    #[test]
    fn test_parse_segments() {
        let p = pattern("iot-car/+/#");
        assert_eq!(
            p.segments(),
            &[
                PatternSegment::Literal("iot-car".to_string()),
                PatternSegment::SingleLevel,
                PatternSegment::MultiLevel,
            ]
        );
        assert!(p.has_wildcards());
        assert!(!pattern("iot-car/fleet/broadcast").has_wildcards());
    }

    #[test]
    fn test_display_renders_pattern_text() {
        for raw in ["iot-car/+/telemetry", "#", "a//b", "+/+/#", "/leading"] {
            assert_eq!(pattern(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_overlaps() {
        assert!(pattern("a/+").overlaps(&pattern("a/b")));
        assert!(pattern("a/b").overlaps(&pattern("a/+")));
        assert!(pattern("a/#").overlaps(&pattern("a")));
        assert!(pattern("#").overlaps(&pattern("x/y/z")));
        assert!(!pattern("a/b").overlaps(&pattern("a/c")));
        assert!(!pattern("a/+").overlaps(&pattern("a/b/c")));
        assert!(!pattern("iot-car/+/telemetry").overlaps(&pattern("iot-car/+/status")));
    }

    #[test]
    fn test_topic_builder() {
        assert_eq!(TopicBuilder::command_topic("car-001"), "iot-car/car-001/command");
    }

    fn reference_match(topic: &[String], pattern: &[String]) -> bool {
        topic.len() == pattern.len()
            && topic
                .iter()
                .zip(pattern)
                .all(|(level, segment)| segment == "+" || segment == level)
    }

    proptest! {
        #[test]
        fn matching_without_hash_requires_equal_levels(
            topic in prop::collection::vec("[ab]{0,2}", 1..5),
            pattern_levels in prop::collection::vec(
                prop_oneof![Just("+".to_string()), "[ab]{0,2}"],
                1..5,
            ),
        ) {
            let raw_pattern = pattern_levels.join("/");
            prop_assume!(!raw_pattern.is_empty());

            let parsed = TopicPattern::parse(&raw_pattern).unwrap();
            let raw_topic = topic.join("/");
            prop_assert_eq!(
                parsed.matches_topic(&raw_topic),
                reference_match(&topic, &pattern_levels),
                "topic {:?} pattern {:?}", raw_topic, raw_pattern
            );
        }

        #[test]
        fn trailing_hash_matches_prefix_and_any_suffix(
            prefix in prop::collection::vec("[ab]{1,2}", 1..4),
            suffix in prop::collection::vec("[ab]{0,2}", 0..4),
        ) {
            let p = TopicPattern::parse(&format!("{}/#", prefix.join("/"))).unwrap();
            let mut levels = prefix.clone();
            levels.extend(suffix);
            prop_assert!(p.matches_topic(&levels.join("/")));
        }

        #[test]
        fn literal_pattern_matches_itself(levels in prop::collection::vec("[a-z0-9-]{1,6}", 1..5)) {
            let raw = levels.join("/");
            let p = TopicPattern::parse(&raw).unwrap();
            prop_assert!(p.matches_topic(&raw));
            prop_assert_eq!(p.to_string(), raw);
        }

        #[test]
        fn matching_is_idempotent(topic in "[ab/]{0,6}", raw_pattern in "[ab+/]{1,6}") {
            if let Ok(p) = TopicPattern::parse(&raw_pattern) {
                prop_assert_eq!(p.matches_topic(&topic), p.matches_topic(&topic));
            }
        }
    }
}
