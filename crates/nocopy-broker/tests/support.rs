//! Helpers shared by exchange tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use nocopy_broker::exchange::{catcher_fn, CatcherFn, Exchange};
use nocopy_broker::Bus;
use nocopy_core::message::{Context, Message};

pub const WAIT: Duration = Duration::from_secs(5);

/// Late-bound exchange handle for handlers that talk back through their own exchange.
#[derive(Clone, Default)]
pub struct Slot(Arc<OnceLock<Weak<Exchange>>>);

impl Slot {
    pub fn bind(&self, ex: &Arc<Exchange>) {
        self.0.set(Arc::downgrade(ex)).expect("bound twice");
    }

    pub fn get(&self) -> Arc<Exchange> {
        self.0.get().and_then(Weak::upgrade).expect("exchange gone")
    }
}

pub fn exchange(bus: &Bus) -> Exchange {
    Exchange::new(Arc::new(bus.connect(true)))
}

/// Catcher forwarding every caught message into a channel.
pub fn collect(
    tx: &mpsc::UnboundedSender<Message>,
) -> CatcherFn<impl Fn(Context, Message) -> std::future::Ready<bool> + Send + Sync> {
    let tx = tx.clone();
    catcher_fn(move |_, m| std::future::ready(tx.send(m).is_ok()))
}

pub async fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no message in time")
        .expect("channel closed")
}

/// True when nothing arrives within `d`.
pub async fn quiet(rx: &mut mpsc::UnboundedReceiver<Message>, d: Duration) -> bool {
    tokio::time::timeout(d, rx.recv()).await.is_err()
}

/// Poll `cond` until it holds or `WAIT` passes.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
