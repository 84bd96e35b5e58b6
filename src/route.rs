//! Route key resolution.
//!
//! Two requests share a rate-limit bucket when the remote API counts them against the same
//! budget. The remote API partitions buckets by HTTP method, by the route template, and by
//! the value of a few *major parameters* (the id following `channels`, `guilds` or
//! `webhooks`). Every other id collapses to `:id`, so `GET /channels/1/messages/2` and
//! `GET /channels/1/messages/3` land in the same bucket while `/channels/9/...` does not.
//!
//! Extra rules on top of the template:
//! - webhook and interaction tokens collapse to `:token`,
//! - everything under `/reactions` shares one bucket per channel,
//! - deleting a message older than two weeks uses its own bucket,
//! - interaction routes are exempt from the global request limit.
//!
//! Which resources count as major is configuration ([`crate::RestConfig::major_parameters`]);
//! the defaults track the remote API's published groupings.

use crate::snowflake::{self, is_snowflake};
use http::Method;

/// Resources whose id partitions rate-limit buckets unless configured otherwise.
pub const DEFAULT_MAJOR_PARAMETERS: &[&str] = &["channels", "guilds", "webhooks"];

const TOKEN_PARENTS: &[&str] = &["webhooks", "interactions"];

/// A resolved bucket identity for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    key: String,
    global_exempt: bool,
}

impl Route {
    /// Resolve with the default major parameters and the current wall clock.
    pub fn new(method: &Method, path: &str) -> Self {
        RouteKeyResolver::default().resolve(method, path)
    }

    /// Bucket key, e.g. `"POST /channels/81384788765712384/messages"`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Requests on this route do not count against (or wait for) the global limit.
    pub fn exempt_from_global(&self) -> bool {
        self.global_exempt
    }
}

/// Maps `(method, path)` to a [`Route`]. Pure: no I/O, no shared state.
#[derive(Debug, Clone)]
pub struct RouteKeyResolver {
    major: Vec<String>,
}

impl Default for RouteKeyResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAJOR_PARAMETERS.iter().copied())
    }
}

impl RouteKeyResolver {
    pub fn new<I, S>(major_parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { major: major_parameters.into_iter().map(Into::into).collect() }
    }

    pub fn resolve(&self, method: &Method, path: &str) -> Route {
        self.resolve_at(method, path, snowflake::unix_now_millis())
    }

    /// Resolve against an explicit wall-clock time (unix millis); the old-message rule
    /// depends on it.
    pub fn resolve_at(&self, method: &Method, path: &str, now_unix_millis: u64) -> Route {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut template: Vec<&str> = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().copied().enumerate() {
            let parent = i.checked_sub(1).map(|p| segments[p]);
            let grandparent = i.checked_sub(2).map(|p| segments[p]);

            if segment == "reactions" {
                template.push(segment);
                break;
            }
            if is_snowflake(segment) {
                let major = parent.is_some_and(|p| self.is_major(p));
                template.push(if major { segment } else { ":id" });
            } else if parent.is_some_and(is_snowflake)
                && grandparent.is_some_and(|g| TOKEN_PARENTS.contains(&g))
            {
                template.push(":token");
            } else {
                template.push(segment);
            }
        }

        let mut key = format!("{} /{}", method.as_str(), template.join("/"));
        if *method == Method::DELETE && template.ends_with(&["messages", ":id"]) {
            let old = segments
                .last()
                .and_then(|id| id.parse::<u64>().ok())
                .is_some_and(|id| snowflake::is_older_than_bulk_window(id, now_unix_millis));
            if old {
                key.push_str("/delete-old");
            }
        }

        Route { key, global_exempt: segments.first() == Some(&"interactions") }
    }

    fn is_major(&self, resource: &str) -> bool {
        self.major.iter().any(|m| m == resource)
    }
}
