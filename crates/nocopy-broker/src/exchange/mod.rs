//! Message exchange: RPC-like request/reply over pub/sub.
//!
//! One `Exchange` per service instance. It owns
//! - the handler/catcher/middleware registries (filled before `listen`)
//! - the pending-reply table keyed by (message id, method)
//! - the in-flight task table, one cancellation token per inbound message
//! - the topics it listens on, outermost first
//!
//! Inbound flow: transport -> `Decoder::decode` -> `Decoder::process` (spawns
//! a tracked task) -> `run`, which dispatches Query/Request/Broadcast to a
//! handler and Answer/Failure to the waiting request, the catcher, or back
//! down the return path.

pub mod handler;
pub mod option;
pub mod scope;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use nocopy_core::message::frame;
use nocopy_core::message::{
    Body, Builder, Context, Decoder, Encoder, Headers, Mediator, Message, Middleware, Type,
};
use nocopy_core::{Error, Result};

use crate::transport::{Subscription, Transport};

pub use handler::{catcher_fn, handler_fn, Catcher, CatcherFn, Handler, HandlerFn, Reply};
pub use option::{with_from, with_id, with_max_from, with_min_from, with_timeout, Opt, Settings};
pub use scope::{Dispatch, Scope, ScopeExt};

/// Correlation key of a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub id: Uuid,
    pub method: String,
}

impl Key {
    pub fn new(id: Uuid, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
        }
    }

    fn of(m: &Message) -> Self {
        Self::new(m.id(), m.method())
    }
}

/// A subject this exchange listens on.
pub struct Topic {
    subject: String,
    wide: bool,
    subscription: Box<dyn Subscription>,
}

impl Topic {
    pub fn new(subject: impl Into<String>, wide: bool, subscription: Box<dyn Subscription>) -> Self {
        Self {
            subject: subject.into(),
            wide,
            subscription,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn wide(&self) -> bool {
        self.wide
    }

    pub fn unsubscribe(&self) -> Result<()> {
        self.subscription.unsubscribe()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("subject", &self.subject)
            .field("wide", &self.wide)
            .finish()
    }
}

struct Pending {
    ticket: u64,
    tx: oneshot::Sender<Message>,
}

/// Removes a pending entry on every exit path of `request`, including drop.
struct PendingGuard<'a> {
    table: &'a DashMap<Key, Pending>,
    key: Key,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove_if(&self.key, |_, p| p.ticket == self.ticket);
    }
}

const QUEUE: usize = 0;
const WIDE: usize = 1;

pub struct Exchange {
    transport: Arc<dyn Transport>,
    settings: Settings,
    options: Vec<Opt>,

    handler: HashMap<String, Arc<dyn Handler>>,
    catcher: HashMap<String, Arc<dyn Catcher>>,
    wrapper: Vec<Arc<dyn Middleware>>,
    functor: HashMap<String, Vec<Arc<dyn Middleware>>>,

    topics: Mutex<[Vec<Topic>; 2]>,
    reply: DashMap<Key, Pending>,
    child: DashMap<u64, CancellationToken>,
    root: CancellationToken,
    tracker: TaskTracker,
    sequence: AtomicU64,
    finished: AtomicBool,
}

impl Exchange {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_settings(transport, Settings::default())
    }

    /// `settings` are the base every call starts from before options apply.
    pub fn with_settings(transport: Arc<dyn Transport>, settings: Settings) -> Self {
        Self {
            transport,
            settings,
            options: Vec::new(),
            handler: HashMap::new(),
            catcher: HashMap::new(),
            wrapper: Vec::new(),
            functor: HashMap::new(),
            topics: Mutex::new([Vec::new(), Vec::new()]),
            reply: DashMap::new(),
            child: DashMap::new(),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            sequence: AtomicU64::new(1),
            finished: AtomicBool::new(false),
        }
    }

    // --------------------
    // Registration (before the exchange is shared)
    // --------------------

    pub fn handle(&mut self, method: impl Into<String>, handler: impl Handler + 'static) {
        self.handler.insert(method.into(), Arc::new(handler));
    }

    pub fn catch(&mut self, method: impl Into<String>, catcher: impl Catcher + 'static) {
        self.catcher.insert(method.into(), Arc::new(catcher));
    }

    /// Middleware applied to every method, in registration order.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.wrapper.push(middleware);
    }

    /// Middleware applied to one method, after the global ones.
    pub fn use_method_middleware(&mut self, method: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.functor.entry(method.into()).or_default().push(middleware);
    }

    /// Options applied to every outgoing message before per-call options.
    pub fn use_options(&mut self, options: impl IntoIterator<Item = Opt>) {
        self.options.extend(options);
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = transport;
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    // --------------------
    // Topics
    // --------------------

    fn topics(&self) -> MutexGuard<'_, [Vec<Topic>; 2]> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue topic at index `n`; out of range (or negative) means innermost.
    /// Empty before `listen`.
    pub fn topic(&self, n: isize) -> String {
        let topics = self.topics();
        let queue = &topics[QUEUE];
        let last = queue.len().checked_sub(1);
        let i = usize::try_from(n)
            .ok()
            .filter(|i| Some(*i) <= last)
            .or(last);
        i.and_then(|i| queue.get(i))
            .map(|t| t.subject().to_owned())
            .unwrap_or_default()
    }

    /// (subject, wide) for every live subscription.
    pub fn subjects(&self) -> Vec<(String, bool)> {
        self.topics()
            .iter()
            .flatten()
            .map(|t| (t.subject().to_owned(), t.wide()))
            .collect()
    }

    /// Subscribe to `on` and each nested level `on.a`, `on.a.b`, ...
    ///
    /// Every level gets a queue subscription with group `on`; every level but
    /// the innermost also gets a wide subscription for broadcasts.
    pub async fn listen(self: &Arc<Self>, ctx: &Context, on: &str, hierarchy: &[&str]) -> Result<()> {
        if self.finished.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let decoder: Arc<dyn Decoder> = self.clone();
        let mut at = on.to_owned();
        let mut rest = hierarchy.iter();
        loop {
            let s = self
                .transport
                .queue_subscribe(ctx, &at, on, decoder.clone())
                .await?;
            self.topics()[QUEUE].push(Topic::new(at.clone(), false, s));

            let Some(next) = rest.next() else {
                break;
            };

            let s = self.transport.subscribe(ctx, &at, decoder.clone()).await?;
            self.topics()[WIDE].push(Topic::new(at.clone(), true, s));

            at = format!("{at}.{next}");
        }
        self.transport.flush().await
    }

    // --------------------
    // Outbound
    // --------------------

    fn prepare(&self, m: Message, options: &[Opt]) -> (Settings, Message) {
        let mut settings = self.settings;
        let mut b = Builder::from(m);
        for o in self.options.iter().chain(options) {
            match *o {
                Opt::Id(id) => b = b.with_id(id),
                Opt::From(n) => b = b.with_from(self.topic(n)),
                Opt::Timeout(t) => settings.timeout = Some(t).filter(|t| !t.is_zero()),
            }
        }
        (settings, b.build())
    }

    async fn publish(&self, ctx: &Context, m: &Message) -> Result<()> {
        self.transport.publish(ctx, m, self).await
    }

    /// Publish `m` after applying default then per-call options.
    /// Replies from a broadcast dispatch are suppressed (nil id).
    pub async fn send(&self, ctx: &Context, m: Message, options: &[Opt]) -> Result<Uuid> {
        if m.kind().is_reply() && ctx.is_broadcast() {
            tracing::trace!(id = %m.id(), by = m.method(), "reply suppressed in broadcast scope");
            return Ok(Uuid::nil());
        }
        let (_, m) = self.prepare(m, options);
        self.publish(ctx, &m).await?;
        Ok(m.id())
    }

    /// Fire-and-forget query from the outermost topic.
    pub async fn message(
        &self,
        ctx: &Context,
        to: &str,
        method: &str,
        body: Body,
        options: &[Opt],
    ) -> Result<Uuid> {
        let m = Builder::new()
            .with_method(method)
            .with_body(body)
            .with_from(self.topic(0))
            .with_to(to)
            .build();
        self.send(ctx, m, options).await
    }

    /// Publish a request and wait for its reply.
    ///
    /// The pending entry is removed on every outcome: reply, cancellation of
    /// the caller's scope or of the exchange, timeout, or the future being
    /// dropped. A Failure reply is returned as a message; decoding it yields
    /// the fault.
    pub async fn request(
        &self,
        ctx: &Context,
        to: &str,
        method: &str,
        body: Body,
        options: &[Opt],
    ) -> Result<Message> {
        let m = Builder::new()
            .with_type(Type::Request)
            .with_method(method)
            .with_body(body)
            .with_from(self.topic(0))
            .with_to(to)
            .build();
        let (settings, m) = self.prepare(m, options);

        let key = Key::of(&m);
        let ticket = self.sequence.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.reply.entry(key.clone()) {
            Entry::Occupied(_) => return Err(Error::IllegalId),
            Entry::Vacant(v) => {
                v.insert(Pending { ticket, tx });
            }
        }
        let _guard = PendingGuard {
            table: &self.reply,
            key,
            ticket,
        };
        let _hold = self.tracker.token();

        self.publish(ctx, &m).await?;

        let caller = ctx.token();
        let wait = async {
            tokio::select! {
                r = rx => r.map_err(|_| Error::Cancelled),
                _ = scope::cancelled(caller) => Err(Error::Cancelled),
                _ = self.root.cancelled() => Err(Error::Cancelled),
            }
        };
        match settings.timeout {
            Some(t) => tokio::time::timeout(t, wait)
                .await
                .map_err(|_| Error::Timeout)?,
            None => wait.await,
        }
    }

    /// Answer `m` with `body`. `m` must not itself be a reply.
    pub async fn answer(&self, ctx: &Context, m: &Message, body: Body, options: &[Opt]) -> Result<Uuid> {
        if m.kind().is_reply() {
            return Err(Error::IllegalType);
        }
        let m = Builder::from(m.clone()).with_body(body).answer().build();
        self.send(ctx, m, options).await
    }

    /// Relay `m` one hop further to `to`. `m` must not be a reply.
    pub async fn forward(&self, ctx: &Context, to: &str, m: &Message, options: &[Opt]) -> Result<Uuid> {
        if m.kind().is_reply() {
            return Err(Error::IllegalType);
        }
        let m = Builder::from(m.clone()).forward(to).build();
        self.send(ctx, m, options).await
    }

    /// Route a reply one hop back toward its origin. `m` must be a reply;
    /// with an empty return path nothing is sent and the nil id is returned.
    pub async fn backward(&self, ctx: &Context, m: &Message, options: &[Opt]) -> Result<Uuid> {
        if !m.kind().is_reply() {
            return Err(Error::IllegalType);
        }
        if m.path().is_empty() {
            return Ok(Uuid::nil());
        }
        let m = Builder::from(m.clone()).backward().build();
        self.send(ctx, m, options).await
    }

    // --------------------
    // Inbound
    // --------------------

    async fn run(&self, ctx: &Context, m: Message) {
        match m.kind() {
            Type::Query | Type::Request | Type::Broadcast => {
                let Some(h) = self.handler.get(m.method()) else {
                    tracing::trace!(id = %m.id(), by = m.method(), "no handler");
                    return;
                };
                let reply = h.handle(ctx.clone(), m.clone()).await;
                let b = Builder::from(m);
                let out = match reply {
                    Err(e) => b.with_error(e).answer(),
                    Ok(Some(body)) => b.with_body(body).answer(),
                    Ok(None) => return,
                };
                if let Err(e) = self.send(ctx, out.build(), &[]).await {
                    tracing::warn!(error = %e, kind = e.kind().as_str(), "answer not sent");
                }
            }
            Type::Answer | Type::Failure => {
                if let Some((_, p)) = self.reply.remove(&Key::of(&m)) {
                    // The waiter may have just given up; the reply is then dropped.
                    let _ = p.tx.send(m);
                    return;
                }
                if let Some(c) = self.catcher.get(m.method()) {
                    if c.catch(ctx.clone(), m.clone()).await {
                        return;
                    }
                }
                if m.path().is_empty() {
                    tracing::trace!(id = %m.id(), by = m.method(), "unroutable reply dropped");
                    return;
                }
                let back = Builder::from(m).backward().build();
                if let Err(e) = self.send(ctx, back, &[]).await {
                    tracing::warn!(error = %e, kind = e.kind().as_str(), "relay not sent");
                }
            }
        }
    }

    // --------------------
    // Lifecycle
    // --------------------

    /// Number of dispatched messages still running.
    pub fn in_flight(&self) -> usize {
        self.child.len()
    }

    /// Number of requests waiting for a reply.
    pub fn pending(&self) -> usize {
        self.reply.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Stop listening, cancel running tasks and pending requests, then wait
    /// for all of them to be gone. Idempotent; later calls only wait.
    pub async fn finish(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            let topics = std::mem::take(&mut *self.topics());
            for t in topics.iter().flatten() {
                if let Err(e) = self.transport.unsubscribe(t) {
                    tracing::warn!(at = %t, error = %e, "unsubscribe failed");
                }
            }
            for e in self.child.iter() {
                e.value().cancel();
            }
            self.root.cancel();
            self.tracker.close();
        }
        self.tracker.wait().await;
    }

    /// `finish`, then close the transport.
    pub async fn shutdown(&self) {
        self.finish().await;
        self.transport.close();
    }
}

impl Mediator for Exchange {
    fn middleware(&self, method: &str) -> Vec<Arc<dyn Middleware>> {
        self.wrapper
            .iter()
            .chain(self.functor.get(method).into_iter().flatten())
            .cloned()
            .collect()
    }
}

impl Encoder for Exchange {
    fn encode(&self, ctx: &Context, m: &Message) -> Result<(Headers, Bytes)> {
        frame::encode(ctx, m, self)
    }
}

impl Decoder for Exchange {
    fn decode(&self, ctx: Context, headers: &Headers, bytes: &[u8]) -> Result<(Context, Message)> {
        frame::decode(ctx, headers, bytes, self)
    }

    fn process(self: Arc<Self>, ctx: Context, m: Message) {
        // Counted by `finish` from here on, even if it races the check below.
        let hold = self.tracker.token();
        if self.root.is_cancelled() {
            tracing::trace!(id = %m.id(), by = m.method(), "dropped after finish");
            return;
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        self.child.insert(seq, token.clone());

        let ctx = ctx
            .with_value(Dispatch {
                kind: m.kind(),
                id: m.id(),
            })
            .with_token(token.clone());

        let this = Arc::clone(&self);
        self.tracker.spawn(async move {
            let _hold = hold;
            tokio::select! {
                _ = this.run(&ctx, m) => {}
                _ = token.cancelled() => {}
            }
            this.child.remove(&seq);
        });
    }
}
