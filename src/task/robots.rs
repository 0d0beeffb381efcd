//! robots.txt policy for a single origin

use robotstxt::DefaultMatcher;

/// What an origin's robots.txt permits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RobotsPolicy {
    /// No usable robots.txt: everything may be fetched
    AllowAll,

    /// Raw robots.txt body, matched on demand
    Rules(String),
}

impl RobotsPolicy {
    /// Builds a policy from a fetched robots.txt body
    pub fn from_body(body: &str) -> Self {
        if body.trim().is_empty() {
            Self::AllowAll
        } else {
            Self::Rules(body.to_string())
        }
    }

    /// Whether `user_agent` may fetch `url` (a full URL)
    pub fn allows(&self, url: &str, user_agent: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Rules(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, user_agent, url)
            }
        }
    }
}
