//! Typed value chain carried alongside a message.
//!
//! Middlewares add values on decode (e.g. an authorization principal) and read
//! them on encode; the exchange adds its dispatch marker and cancellation
//! scope. Like the message itself, a `Context` is never mutated: `with_value`
//! returns a new context whose lookup falls back to its parent.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Entry>>,
}

/// Immutable, cheaply cloneable value chain.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Entry>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context holding `value`. It shadows any older value of the same type.
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Entry {
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// Innermost value of type `T`, if any.
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        let mut at = self.head.as_deref();
        while let Some(e) = at {
            if let Some(v) = e.value.downcast_ref::<T>() {
                return Some(v);
            }
            at = e.parent.as_deref();
        }
        None
    }

    fn depth(&self) -> usize {
        let mut n = 0;
        let mut at = self.head.as_deref();
        while let Some(e) = at {
            n += 1;
            at = e.parent.as_deref();
        }
        n
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("values", &self.depth()).finish()
    }
}
