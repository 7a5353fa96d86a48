//! Handler and catcher contracts.
//!
//! Handlers serve Query/Request/Broadcast messages; their reply becomes the
//! body (or the failure) of the answer. Catchers observe Answer/Failure
//! messages nobody is waiting for; returning `true` consumes the message.

use std::future::Future;

use async_trait::async_trait;

use nocopy_core::message::{Body, Context, Message};
use nocopy_core::Result;

/// `Ok(None)`: no answer. `Ok(Some(body))`: answer with body. `Err(e)`: failure answer.
pub type Reply = Result<Option<Body>>;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Context, m: Message) -> Reply;
}

#[async_trait]
pub trait Catcher: Send + Sync {
    async fn catch(&self, ctx: Context, m: Message) -> bool;
}

/// Closure adapter for [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Reply> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Reply> + Send,
{
    async fn handle(&self, ctx: Context, m: Message) -> Reply {
        (self.0)(ctx, m).await
    }
}

/// Closure adapter for [`Catcher`].
pub struct CatcherFn<F>(F);

pub fn catcher_fn<F, Fut>(f: F) -> CatcherFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    CatcherFn(f)
}

#[async_trait]
impl<F, Fut> Catcher for CatcherFn<F>
where
    F: Fn(Context, Message) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn catch(&self, ctx: Context, m: Message) -> bool {
        (self.0)(ctx, m).await
    }
}
