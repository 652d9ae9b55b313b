//! Allow-list of SNS topics the endpoint accepts notifications from.

use std::collections::HashSet;

/// Trusted topic ARNs, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct TrustedTopics {
    topics: HashSet<String>,
}

impl TrustedTopics {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }

    /// An absent topic is never trusted.
    pub fn contains(&self, topic: Option<&str>) -> bool {
        topic.is_some_and(|topic| self.topics.contains(topic))
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
