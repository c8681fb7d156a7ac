//! Injection points and the injected-error record itself (spec §3, §4.B).

use std::fmt;
use std::time::{Duration, SystemTime};

/// The broad lifecycle classification of an injected error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Recoverable,
    Fatal,
}

/// The subsystem an injected error pretends to originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Filesystem,
    Git,
    Network,
    Permission,
    Resource,
    Configuration,
}

/// A tagged, categorized error manufactured by the injector.
///
/// `retryable` defaults from `kind` (transient is retryable; permission and
/// fatal are not) but callers may override it explicitly via
/// [`InjectedError::with_retryable`] — spec §3's "unless explicitly
/// overridden" clause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{category:?}/{kind:?} error in {operation} ({path}): {message}")]
pub struct InjectedError {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub message: String,
    pub operation: String,
    pub path: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub injected_at: SystemTime,
    pub cause: Option<String>,
}

impl InjectedError {
    /// Build an error with `retryable` derived from `kind` per spec §3's
    /// invariant.
    pub fn new(
        kind: ErrorKind,
        category: ErrorCategory,
        message: impl Into<String>,
        operation: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let retryable = default_retryable(kind);
        Self {
            kind,
            category,
            message: message.into(),
            operation: operation.into(),
            path: path.into(),
            retryable,
            retry_after: None,
            injected_at: SystemTime::now(),
            cause: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Re-stamp with the given operation/path and a fresh injection
    /// timestamp — used when firing a template from a registered point.
    pub(crate) fn instantiate(&self, operation: &str, path: &str) -> Self {
        let mut err = self.clone();
        err.operation = operation.to_string();
        err.path = path.to_string();
        err.injected_at = SystemTime::now();
        err
    }
}

fn default_retryable(kind: ErrorKind) -> bool {
    match kind {
        ErrorKind::Transient => true,
        ErrorKind::Recoverable => true,
        ErrorKind::Permanent => false,
        ErrorKind::Fatal => false,
    }
}

/// A predicate function consulted before an injection point is allowed to
/// fire, given the operation and path of the current call.
pub type InjectionPredicate = Box<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// A registered rule selecting when and how an error is injected at a named
/// operation (spec §3's `InjectionPoint`).
pub struct InjectionPoint {
    /// Substring match against the operation name. `"*"` or empty matches
    /// any operation.
    pub operation: String,
    /// Substring match against the path. `"*"` or empty matches any path.
    pub path: String,
    /// Fire only on the Nth matching call for this `(operation, path)`
    /// counter. `0` means "always eligible" (subject to the other gates).
    pub trigger_count: u64,
    /// Stop firing once this many injections have happened at this point.
    /// `0` means unlimited.
    pub max_injections: u64,
    /// Probability gate in `[0, 1]`. `>= 1.0` always fires when reached;
    /// `< 1.0` is compared against a draw from the deterministic stream.
    pub probability: f64,
    pub delay_before: Option<Duration>,
    pub delay_after: Option<Duration>,
    pub predicate: Option<InjectionPredicate>,
    pub template: InjectedError,
}

impl InjectionPoint {
    pub fn new(operation: impl Into<String>, path: impl Into<String>, template: InjectedError) -> Self {
        Self {
            operation: operation.into(),
            path: path.into(),
            trigger_count: 0,
            max_injections: 0,
            probability: 1.0,
            delay_before: None,
            delay_after: None,
            predicate: None,
            template,
        }
    }

    pub fn with_trigger_count(mut self, n: u64) -> Self {
        self.trigger_count = n;
        self
    }

    pub fn with_max_injections(mut self, n: u64) -> Self {
        self.max_injections = n;
        self
    }

    pub fn with_probability(mut self, p: f64) -> Self {
        self.probability = p.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay_before(mut self, delay: Duration) -> Self {
        self.delay_before = Some(delay);
        self
    }

    pub fn with_delay_after(mut self, delay: Duration) -> Self {
        self.delay_after = Some(delay);
        self
    }

    pub fn with_predicate(mut self, predicate: InjectionPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub(crate) fn matches(&self, operation: &str, path: &str) -> bool {
        let op_matches = self.operation.is_empty()
            || self.operation == "*"
            || operation.contains(&self.operation);
        let path_matches =
            self.path.is_empty() || self.path == "*" || path.contains(&self.path);
        if !(op_matches && path_matches) {
            return false;
        }
        if let Some(predicate) = &self.predicate
            && !predicate(operation, path)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_defaults_follow_kind() {
        let transient = InjectedError::new(ErrorKind::Transient, ErrorCategory::Network, "m", "op", "p");
        assert!(transient.retryable);
        let fatal = InjectedError::new(ErrorKind::Fatal, ErrorCategory::Permission, "m", "op", "p");
        assert!(!fatal.retryable);
    }

    #[test]
    fn wildcard_point_matches_anything() {
        let template = InjectedError::new(ErrorKind::Transient, ErrorCategory::Filesystem, "m", "op", "p");
        let point = InjectionPoint::new("*", "", template);
        assert!(point.matches("anything", "some/path"));
    }

    #[test]
    fn substring_match_is_required() {
        let template = InjectedError::new(ErrorKind::Transient, ErrorCategory::Filesystem, "m", "op", "p");
        let point = InjectionPoint::new("write", "archive", template);
        assert!(point.matches("do_write", "/tmp/archive/x"));
        assert!(!point.matches("do_read", "/tmp/archive/x"));
    }
}
