//! Tracing decorator for any transport.
//!
//! Emits `SEND` per publish, `READ` per decoded inbound message, `LISTEN` per
//! subscription and `FINISH` per unsubscribe, all at debug level. Undecodable
//! frames are reported at error level.

use std::sync::Arc;

use async_trait::async_trait;

use nocopy_core::message::{Context, Decoder, Encoder, Headers, Message};
use nocopy_core::Result;

use crate::exchange::Topic;

use super::{Subscription, Transport};

pub struct Logged {
    inner: Arc<dyn Transport>,
}

impl Logged {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }
}

/// Decoder wrapper logging inbound traffic.
struct Input {
    inner: Arc<dyn Decoder>,
}

impl Decoder for Input {
    fn decode(&self, ctx: Context, headers: &Headers, frame: &[u8]) -> Result<(Context, Message)> {
        let res = self.inner.decode(ctx, headers, frame);
        if let Err(e) = &res {
            tracing::error!(error = %e, kind = e.kind().as_str(), "READ");
        }
        res
    }

    fn process(self: Arc<Self>, ctx: Context, m: Message) {
        tracing::debug!(
            id = %m.id(),
            by = m.method(),
            at = m.to(),
            from = m.from(),
            kind = %m.kind(),
            "READ"
        );
        self.inner.clone().process(ctx, m);
    }
}

#[async_trait]
impl Transport for Logged {
    async fn publish(&self, ctx: &Context, m: &Message, encoder: &dyn Encoder) -> Result<()> {
        let res = self.inner.publish(ctx, m, encoder).await;
        match &res {
            Ok(()) => tracing::debug!(
                id = %m.id(),
                by = m.method(),
                at = m.from(),
                to = m.to(),
                kind = %m.kind(),
                "SEND"
            ),
            Err(e) => tracing::debug!(
                id = %m.id(),
                by = m.method(),
                at = m.from(),
                to = m.to(),
                kind = %m.kind(),
                error = %e,
                "SEND"
            ),
        }
        res
    }

    async fn subscribe(
        &self,
        ctx: &Context,
        at: &str,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Box<dyn Subscription>> {
        tracing::debug!(at, wide = true, "LISTEN");
        self.inner
            .subscribe(ctx, at, Arc::new(Input { inner: decoder }))
            .await
    }

    async fn queue_subscribe(
        &self,
        ctx: &Context,
        at: &str,
        group: &str,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Box<dyn Subscription>> {
        tracing::debug!(at, "LISTEN");
        self.inner
            .queue_subscribe(ctx, at, group, Arc::new(Input { inner: decoder }))
            .await
    }

    fn unsubscribe(&self, topic: &Topic) -> Result<()> {
        if topic.wide() {
            tracing::debug!(at = %topic, wide = true, "FINISH");
        } else {
            tracing::debug!(at = %topic, "FINISH");
        }
        self.inner.unsubscribe(topic)
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    fn close(&self) {
        self.inner.close()
    }
}
