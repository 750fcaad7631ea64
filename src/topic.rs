//! Topic names and topic filters.
//!
//! Topics are `/`-separated hierarchies with opaque levels. Filters follow
//! the MQTT wildcard rules: `+` matches exactly one level, a trailing `#`
//! matches any remaining suffix of one or more levels.

/// Wildcard matching a single topic level.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Wildcard matching any topic suffix; only valid as the last filter level.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Maximal length of a topic name or topic filter, in bytes.
pub const MAX_TOPIC_LENGTH: usize = 65536;

/// Splits a topic name or topic filter into its levels, keeping empty ones.
pub fn parse_hierarchy(topic: &str) -> Vec<&str> {
    topic.split('/').collect()
}

/// Returns whether the string is a valid topic name: non-empty, at most
/// [`MAX_TOPIC_LENGTH`] bytes and free of NUL bytes. Wildcard characters are
/// not rejected here; publication paths check them via filter validation.
pub fn is_valid_topic_name(topic: &str) -> bool {
    !topic.is_empty() && topic.len() <= MAX_TOPIC_LENGTH && !topic.bytes().any(|b| b == 0)
}

/// Returns whether the string is a valid topic filter.
///
/// On top of the topic-name rules: any level containing `+` must be exactly
/// `+`, any level containing `#` must be exactly `#`, and `#` may appear at
/// most once, as the last level.
pub fn is_valid_topic_filter(filter: &str) -> bool {
    if !is_valid_topic_name(filter) {
        return false;
    }

    let levels = parse_hierarchy(filter);
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('+') && *level != SINGLE_LEVEL_WILDCARD {
            return false;
        }
        if level.contains('#') && (*level != MULTI_LEVEL_WILDCARD || i != last) {
            return false;
        }
    }

    true
}

/// The head (first level) of a topic name or topic filter.
pub(crate) fn head(topic: &str) -> &str {
    match topic.find('/') {
        Some(pos) => &topic[..pos],
        None => topic,
    }
}

/// The filter with its head removed and the same semantics, or `None` when
/// no meaningful remainder exists. A bare `#` localizes to `#` itself since
/// the multi-level wildcard also covers every subtopic of every gateway.
pub(crate) fn without_head(filter: &str) -> Option<&str> {
    match filter.find('/') {
        Some(pos) => Some(&filter[pos + 1..]),
        None if filter == MULTI_LEVEL_WILDCARD => Some(MULTI_LEVEL_WILDCARD),
        None => None,
    }
}

/// A parsed topic filter prepared for level-by-level matching.
#[derive(Debug, Clone)]
pub(crate) struct TopicFilter {
    levels: Vec<String>,
    multi_level: bool,
}

impl TopicFilter {
    /// Parses a (valid) topic filter. A trailing `#` is stripped from the
    /// level list and remembered as the multi-level flag.
    pub(crate) fn parse(filter: &str) -> Self {
        let mut levels: Vec<String> = parse_hierarchy(filter)
            .into_iter()
            .map(str::to_owned)
            .collect();
        let multi_level = levels.last().is_some_and(|l| l == MULTI_LEVEL_WILDCARD);
        if multi_level {
            levels.pop();
        }
        Self {
            levels,
            multi_level,
        }
    }

    /// A simple filter contains no wildcards and can be matched by exact
    /// string lookup instead of a level walk.
    pub(crate) fn is_simple(&self) -> bool {
        !self.multi_level && self.levels.iter().all(|l| l != SINGLE_LEVEL_WILDCARD)
    }

    /// Matches the filter against a parsed topic.
    pub(crate) fn matches(&self, topic_levels: &[&str]) -> bool {
        if self.multi_level {
            if topic_levels.len() < self.levels.len() {
                return false;
            }
        } else if topic_levels.len() != self.levels.len() {
            return false;
        }

        self.levels
            .iter()
            .zip(topic_levels)
            .all(|(filter, topic)| filter == SINGLE_LEVEL_WILDCARD || filter == topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(filter: &str, topic: &str) -> bool {
        TopicFilter::parse(filter).matches(&parse_hierarchy(topic))
    }

    #[test]
    fn single_level_wildcard_matches_one_level() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/c"));
        assert!(!matches("a/+/c", "a/b/c/d"));
    }

    #[test]
    fn multi_level_wildcard_matches_suffixes() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b"));
        assert!(matches("a/#", "a/b/c"));
        assert!(!matches("a/#", "b"));
    }

    #[test]
    fn bare_multi_level_wildcard_matches_everything() {
        assert!(matches("#", "a"));
        assert!(matches("#", "a/b/c"));
        assert!(matches("#", ""));
    }

    #[test]
    fn empty_levels_are_preserved() {
        assert_eq!(parse_hierarchy("a//b"), vec!["a", "", "b"]);
        assert!(matches("a//b", "a//b"));
        assert!(!matches("a/b", "a//b"));
    }

    #[test]
    fn topic_name_validation() {
        assert!(is_valid_topic_name("a/b"));
        assert!(is_valid_topic_name("+"));
        assert!(!is_valid_topic_name(""));
        assert!(!is_valid_topic_name("a\0b"));
    }

    #[test]
    fn topic_filter_validation() {
        assert!(is_valid_topic_filter("a/+/c"));
        assert!(is_valid_topic_filter("a/#"));
        assert!(is_valid_topic_filter("#"));
        assert!(!is_valid_topic_filter("a+/c"));
        assert!(!is_valid_topic_filter("a/b#"));
        assert!(!is_valid_topic_filter("a/#/b"));
        assert!(!is_valid_topic_filter("#/#"));
    }

    #[test]
    fn head_and_localization() {
        assert_eq!(head("gw/a/b"), "gw");
        assert_eq!(head("gw"), "gw");
        assert_eq!(without_head("gw/a/b"), Some("a/b"));
        assert_eq!(without_head("#"), Some("#"));
        assert_eq!(without_head("gw"), None);
        assert_eq!(without_head("+"), None);
    }

    #[test]
    fn simple_filter_detection() {
        assert!(TopicFilter::parse("a/b/c").is_simple());
        assert!(!TopicFilter::parse("a/+/c").is_simple());
        assert!(!TopicFilter::parse("a/#").is_simple());
    }
}
