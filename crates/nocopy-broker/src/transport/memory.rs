//! In-process pub/sub bus.
//!
//! Semantics mirror what the exchange expects from a broker substrate:
//! - exact subject matching (no wildcards)
//! - queue subscriptions: one member per group receives each message (round robin)
//! - wide subscriptions: every member receives each message
//! - `no_echo` connections never receive their own publications
//!
//! Every subscription owns a bounded queue drained by its own task, so a slow
//! consumer applies backpressure to publishers instead of growing memory.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use nocopy_core::message::{Context, Decoder, Encoder, Headers, Message};
use nocopy_core::{Error, Result};

use super::{subject_of, Subscription, Transport, QUEUE_PREFIX, WIDE_PREFIX};

const DEFAULT_CAPACITY: usize = 1024;

struct Delivery {
    headers: Headers,
    frame: Bytes,
}

struct Member {
    id: u64,
    conn: u64,
    group: Option<String>,
    tx: mpsc::Sender<Arc<Delivery>>,
}

struct Hub {
    subjects: DashMap<String, Vec<Member>>,
    next: AtomicU64,
    turn: AtomicUsize,
    capacity: usize,
}

impl Hub {
    fn targets(&self, subject: &str, origin: u64, no_echo: bool) -> Vec<mpsc::Sender<Arc<Delivery>>> {
        let Some(members) = self.subjects.get(subject) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut groups: BTreeMap<&str, Vec<&Member>> = BTreeMap::new();
        for m in members.iter().filter(|m| !(no_echo && m.conn == origin)) {
            match &m.group {
                None => out.push(m.tx.clone()),
                Some(g) => groups.entry(g.as_str()).or_default().push(m),
            }
        }
        for candidates in groups.values() {
            let i = self.turn.fetch_add(1, Ordering::Relaxed) % candidates.len();
            if let Some(m) = candidates.get(i) {
                out.push(m.tx.clone());
            }
        }
        out
    }

    fn remove(&self, subject: &str, id: u64) {
        if let Some(mut members) = self.subjects.get_mut(subject) {
            members.retain(|m| m.id != id);
        }
        self.subjects.remove_if(subject, |_, members| members.is_empty());
    }
}

/// Shared in-process substrate. Clone to share; `connect` to get a transport.
#[derive(Clone)]
pub struct Bus {
    hub: Arc<Hub>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus {
    /// `capacity`: per-subscription queue depth.
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                subjects: DashMap::new(),
                next: AtomicU64::new(1),
                turn: AtomicUsize::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Open a connection. With `no_echo` the connection never sees its own messages.
    pub fn connect(&self, no_echo: bool) -> MemoryTransport {
        let id = self.hub.next.fetch_add(1, Ordering::Relaxed);
        MemoryTransport {
            conn: Arc::new(Conn {
                id,
                hub: self.hub.clone(),
                no_echo,
                closed: AtomicBool::new(false),
                subs: DashMap::new(),
            }),
        }
    }

    /// Number of live subscriptions on `subject` (prefixed form).
    pub fn members(&self, subject: &str) -> usize {
        self.hub.subjects.get(subject).map(|m| m.len()).unwrap_or(0)
    }
}

struct Conn {
    id: u64,
    hub: Arc<Hub>,
    no_echo: bool,
    closed: AtomicBool,
    subs: DashMap<u64, (String, AbortHandle)>,
}

impl Conn {
    fn detach(&self, subject: &str, id: u64) {
        self.hub.remove(subject, id);
        if let Some((_, (_, task))) = self.subs.remove(&id) {
            task.abort();
        }
    }
}

/// One connection onto a [`Bus`].
#[derive(Clone)]
pub struct MemoryTransport {
    conn: Arc<Conn>,
}

struct MemorySubscription {
    conn: Arc<Conn>,
    subject: String,
    id: u64,
}

impl Subscription for MemorySubscription {
    fn unsubscribe(&self) -> Result<()> {
        self.conn.detach(&self.subject, self.id);
        Ok(())
    }
}

impl MemoryTransport {
    fn attach(
        &self,
        ctx: &Context,
        subject: String,
        group: Option<String>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Box<dyn Subscription>> {
        if self.conn.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let hub = &self.conn.hub;
        let (tx, mut rx) = mpsc::channel::<Arc<Delivery>>(hub.capacity);
        let id = hub.next.fetch_add(1, Ordering::Relaxed);

        let ctx = ctx.clone();
        let at = subject.clone();
        let task = tokio::spawn(async move {
            while let Some(d) = rx.recv().await {
                match decoder.decode(ctx.clone(), &d.headers, &d.frame) {
                    Ok((ctx, m)) => decoder.clone().process(ctx, m),
                    Err(e) => {
                        tracing::debug!(%at, error = %e, kind = e.kind().as_str(), "frame dropped")
                    }
                }
            }
        });

        self.conn
            .subs
            .insert(id, (subject.clone(), task.abort_handle()));
        hub.subjects.entry(subject.clone()).or_default().push(Member {
            id,
            conn: self.conn.id,
            group,
            tx,
        });

        Ok(Box::new(MemorySubscription {
            conn: self.conn.clone(),
            subject,
            id,
        }))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, ctx: &Context, m: &Message, encoder: &dyn Encoder) -> Result<()> {
        if self.conn.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let (headers, frame) = encoder.encode(ctx, m)?;
        let subject = subject_of(m);
        let delivery = Arc::new(Delivery { headers, frame });

        let targets = self
            .conn
            .hub
            .targets(&subject, self.conn.id, self.conn.no_echo);
        for tx in targets {
            // A member that went away after lookup just misses the frame.
            let _ = tx.send(delivery.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        ctx: &Context,
        at: &str,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Box<dyn Subscription>> {
        self.attach(ctx, format!("{WIDE_PREFIX}{at}"), None, decoder)
    }

    async fn queue_subscribe(
        &self,
        ctx: &Context,
        at: &str,
        group: &str,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Box<dyn Subscription>> {
        self.attach(
            ctx,
            format!("{QUEUE_PREFIX}{at}"),
            Some(group.to_owned()),
            decoder,
        )
    }

    async fn flush(&self) -> Result<()> {
        if self.conn.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    fn close(&self) {
        if self.conn.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subs: Vec<(u64, String)> = self
            .conn
            .subs
            .iter()
            .map(|e| (*e.key(), e.value().0.clone()))
            .collect();
        for (id, subject) in subs {
            self.conn.detach(&subject, id);
        }
    }
}
