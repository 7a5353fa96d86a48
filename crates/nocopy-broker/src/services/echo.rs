//! Echo service and load driver.
//!
//! `EchoService` answers every `echo` query with its own body. The driver
//! fires `quantity` echo messages from `concurrency` workers and counts the
//! answers through an `EchoProbe` catcher; at most `MAX_IN_FLY` messages are
//! unanswered at any time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use nocopy_core::message::{Body, Context, Message};
use nocopy_core::{Error, Result};

use crate::exchange::scope::{self, ScopeExt};
use crate::exchange::{Catcher, Exchange, Handler, Reply};

pub const ECHO: &str = "echo";

/// Maximum number of unanswered echo messages.
pub const MAX_IN_FLY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub serial: u64,
}

/// Answers with the query body unchanged.
pub struct EchoService;

#[async_trait]
impl Handler for EchoService {
    async fn handle(&self, _ctx: Context, m: Message) -> Reply {
        Ok(m.body())
    }
}

struct Window {
    slots: Semaphore,
    capacity: u32,
    outstanding: AtomicU64,
    received: AtomicU64,
}

/// Catcher side of the driver. Cheap to clone; clones share counters.
#[derive(Clone)]
pub struct EchoProbe {
    window: Arc<Window>,
}

impl Default for EchoProbe {
    fn default() -> Self {
        Self::new(MAX_IN_FLY)
    }
}

impl EchoProbe {
    pub fn new(in_fly: usize) -> Self {
        let capacity = u32::try_from(in_fly.clamp(1, MAX_IN_FLY)).unwrap_or(u32::MAX);
        Self {
            window: Arc::new(Window {
                slots: Semaphore::new(capacity as usize),
                capacity,
                outstanding: AtomicU64::new(0),
                received: AtomicU64::new(0),
            }),
        }
    }

    pub fn received(&self) -> u64 {
        self.window.received.load(Ordering::Relaxed)
    }

    pub fn outstanding(&self) -> u64 {
        self.window.outstanding.load(Ordering::Relaxed)
    }

    async fn take(&self) -> Result<()> {
        let permit = self.window.slots.acquire().await.map_err(|_| Error::Closed)?;
        permit.forget();
        self.window.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn give(&self) -> bool {
        let was = self
            .window
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if was.is_ok() {
            self.window.slots.add_permits(1);
        }
        was.is_ok()
    }

    /// Resolves once every taken slot came back.
    async fn settle(&self) -> Result<()> {
        let all = self
            .window
            .slots
            .acquire_many(self.window.capacity)
            .await
            .map_err(|_| Error::Closed)?;
        drop(all);
        Ok(())
    }
}

#[async_trait]
impl Catcher for EchoProbe {
    async fn catch(&self, _ctx: Context, m: Message) -> bool {
        if let Err(e) = m.decode::<Echo>() {
            tracing::error!(error = %e, kind = e.kind().as_str(), "echo");
        }
        if self.give() {
            self.window.received.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::warn!(id = %m.id(), "unexpected echo reply");
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReport {
    pub sent: u64,
    pub received: u64,
    pub elapsed: Duration,
}

impl EchoReport {
    /// Mean wall time per message.
    pub fn per_message(&self) -> Duration {
        if self.sent == 0 {
            return Duration::ZERO;
        }
        self.elapsed.div_f64(self.sent as f64)
    }
}

async fn worker(
    ex: &Exchange,
    probe: &EchoProbe,
    ctx: &Context,
    to: &str,
    next: &AtomicU64,
    sent: &AtomicU64,
    quantity: u64,
) -> Result<()> {
    loop {
        let serial = next.fetch_add(1, Ordering::Relaxed);
        if serial >= quantity {
            return Ok(());
        }
        let body = Body::new(&Echo { serial })?;
        probe.take().await?;
        if let Err(e) = ex.message(ctx, to, ECHO, body, &[]).await {
            probe.give();
            return Err(e);
        }
        sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// Send `quantity` echo messages to `to` and wait for all answers.
///
/// `probe` must be registered as the `echo` catcher of `ex`.
pub async fn drive(
    ex: &Exchange,
    probe: &EchoProbe,
    ctx: &Context,
    to: &str,
    concurrency: usize,
    quantity: u64,
) -> Result<EchoReport> {
    tracing::info!(concurrency, quantity, "echo");

    let received = probe.received();
    let next = AtomicU64::new(0);
    let sent = AtomicU64::new(0);
    let (next, sent_ref) = (&next, &sent);
    let start = Instant::now();

    try_join_all(
        (0..concurrency.max(1)).map(move |_| worker(ex, probe, ctx, to, next, sent_ref, quantity)),
    )
    .await?;

    tokio::select! {
        r = probe.settle() => r?,
        _ = scope::cancelled(ctx.token()) => return Err(Error::Cancelled),
    }

    let report = EchoReport {
        sent: sent.load(Ordering::Relaxed),
        received: probe.received() - received,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        sent = report.sent,
        received = report.received,
        time = ?report.per_message(),
        "echo"
    );
    Ok(report)
}
