//! Dispatch scope values carried in the handler `Context`.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nocopy_core::message::{Context, Type};

/// Marks a context as belonging to the dispatch of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub kind: Type,
    pub id: Uuid,
}

/// Cancellation scope of the current task.
#[derive(Debug, Clone)]
pub struct Scope(pub CancellationToken);

pub trait ScopeExt {
    /// Context cancelled together with `token`.
    fn with_token(&self, token: CancellationToken) -> Context;
    fn token(&self) -> Option<&CancellationToken>;
    fn dispatch(&self) -> Option<&Dispatch>;
    /// Replies published from a broadcast dispatch are suppressed.
    fn is_broadcast(&self) -> bool;
}

impl ScopeExt for Context {
    fn with_token(&self, token: CancellationToken) -> Context {
        self.with_value(Scope(token))
    }

    fn token(&self) -> Option<&CancellationToken> {
        self.value::<Scope>().map(|s| &s.0)
    }

    fn dispatch(&self) -> Option<&Dispatch> {
        self.value::<Dispatch>()
    }

    fn is_broadcast(&self) -> bool {
        matches!(
            self.dispatch(),
            Some(Dispatch {
                kind: Type::Broadcast,
                ..
            })
        )
    }
}

/// Resolves when the scope token (if any) is cancelled.
pub(crate) async fn cancelled(token: Option<&CancellationToken>) {
    match token {
        Some(t) => t.cancelled().await,
        None => std::future::pending().await,
    }
}
