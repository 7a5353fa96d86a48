//! Pub/sub substrate seam.
//!
//! The exchange only needs publish, wide subscribe, queue subscribe and
//! flush. Subject prefixing belongs to the transport: wide (broadcast)
//! subjects are prefixed with `%`, point-to-point subjects with `@`, so the
//! same hierarchy name can carry both traffic classes without overlap.
//!
//! - `memory`: in-process bus with queue groups and no-echo connections.
//! - `logged`: tracing decorator around any transport.

pub mod logged;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use nocopy_core::message::{Context, Decoder, Encoder, Message, Type};
use nocopy_core::Result;

use crate::exchange::Topic;

pub use logged::Logged;
pub use memory::{Bus, MemoryTransport};

/// Prefix of wide (fan-out) subjects.
pub const WIDE_PREFIX: &str = "%";
/// Prefix of point-to-point (queue) subjects.
pub const QUEUE_PREFIX: &str = "@";

/// Subject a message is published on.
pub fn subject_of(m: &Message) -> String {
    if m.kind() == Type::Broadcast {
        format!("{WIDE_PREFIX}{}", m.to())
    } else {
        format!("{QUEUE_PREFIX}{}", m.to())
    }
}

/// Handle of one live subscription.
pub trait Subscription: Send + Sync {
    /// Stop delivery. Idempotent.
    fn unsubscribe(&self) -> Result<()>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Encode `m` and publish it on its subject.
    async fn publish(&self, ctx: &Context, m: &Message, encoder: &dyn Encoder) -> Result<()>;

    /// Wide subscription: every subscriber receives every message.
    async fn subscribe(
        &self,
        ctx: &Context,
        at: &str,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Box<dyn Subscription>>;

    /// Queue subscription: one member of `group` receives each message.
    async fn queue_subscribe(
        &self,
        ctx: &Context,
        at: &str,
        group: &str,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Box<dyn Subscription>>;

    fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        topic.unsubscribe()
    }

    /// Resolves once earlier subscriptions are active on the substrate.
    async fn flush(&self) -> Result<()>;

    /// Detach every subscription of this connection and refuse further publishing.
    fn close(&self);
}
