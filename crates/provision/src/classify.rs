//! Classification of failed invocations.
//!
//! The external tools do not expose typed error codes uniformly, so a
//! failure is classified by HTTP status where there is one and otherwise by
//! case-insensitive substrings of its stderr. Substring matching is fragile:
//! a change in upstream wording silently breaks idempotence, which is why
//! the marker lists are data and can be extended from configuration.

use crate::exec::{ExecutionError, Status};

/// What a failed invocation means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The resource does not exist
    NotFound,
    /// The resource already exists (create conflict)
    AlreadyExists,
    /// Likely to succeed if repeated (rate limit, server error, network)
    Transient,
    /// Anything else; never assumed to mean absence or presence
    Other,
}

impl Signal {
    pub fn description(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::Transient => "transient failure",
            Self::Other => "unexpected failure",
        }
    }
}

/// Marker lists used to classify failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patterns {
    pub not_found: Vec<String>,
    pub already_exists: Vec<String>,
    pub transient: Vec<String>,
}

impl Default for Patterns {
    fn default() -> Self {
        Self {
            not_found: to_strings(&[
                "not_found",
                "not found",
                "notfound",
                "was not found",
                "does not exist",
                "release: not found",
            ]),
            already_exists: to_strings(&[
                "already_exists",
                "already exists",
                "alreadyexists",
                "cannot re-use a name that is still in use",
            ]),
            transient: to_strings(&[
                "unavailable",
                "deadline exceeded",
                "deadline_exceeded",
                "connection reset",
                "connection refused",
                "timed out",
                "try again",
            ]),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

impl Patterns {
    /// Add extra markers on top of the defaults, lowercased.
    pub fn extend(
        mut self,
        not_found: impl IntoIterator<Item = String>,
        already_exists: impl IntoIterator<Item = String>,
    ) -> Self {
        self.not_found
            .extend(not_found.into_iter().map(|m| m.to_lowercase()));
        self.already_exists
            .extend(already_exists.into_iter().map(|m| m.to_lowercase()));
        self
    }

    /// Classify a failed invocation.
    ///
    /// HTTP status codes win over text. Conflict markers are checked before
    /// not-found markers.
    pub fn classify(&self, error: &ExecutionError) -> Signal {
        match error.status {
            Status::Http(404) => return Signal::NotFound,
            Status::Http(409) => return Signal::AlreadyExists,
            Status::Http(429) => return Signal::Transient,
            Status::Http(code) if code >= 500 => return Signal::Transient,
            _ => {}
        }

        let text = error.stderr.to_lowercase();
        if contains_any(&text, &self.already_exists) {
            Signal::AlreadyExists
        } else if contains_any(&text, &self.not_found) {
            Signal::NotFound
        } else if contains_any(&text, &self.transient) {
            Signal::Transient
        } else {
            Signal::Other
        }
    }

    pub fn is_not_found(&self, error: &ExecutionError) -> bool {
        self.classify(error) == Signal::NotFound
    }

    pub fn is_already_exists(&self, error: &ExecutionError) -> bool {
        self.classify(error) == Signal::AlreadyExists
    }
}

fn contains_any(text: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| text.contains(m.as_str()))
}
