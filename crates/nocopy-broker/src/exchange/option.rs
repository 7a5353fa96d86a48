//! Per-call exchange options.

use std::time::Duration;

use uuid::Uuid;

/// Option applied to an outgoing message before it is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt {
    /// Override the message id.
    Id(Uuid),
    /// Set `from` to the queue topic at this index (out of range: innermost).
    From(isize),
    /// Reply deadline for `request`.
    Timeout(Duration),
}

pub fn with_id(id: Uuid) -> Opt {
    Opt::Id(id)
}

pub fn with_from(n: isize) -> Opt {
    Opt::From(n)
}

/// Reply to the outermost topic.
pub fn with_min_from() -> Opt {
    Opt::From(0)
}

/// Reply to the innermost topic.
pub fn with_max_from() -> Opt {
    Opt::From(-1)
}

pub fn with_timeout(timeout: Duration) -> Opt {
    Opt::Timeout(timeout)
}

/// Resolved per-call settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings {
    /// `None` waits for the reply without a deadline.
    pub timeout: Option<Duration>,
}
