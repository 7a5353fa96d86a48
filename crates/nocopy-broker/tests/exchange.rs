//! Exchange scenarios over the in-process bus.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use nocopy_broker::exchange::{
    handler_fn, with_id, with_max_from, with_min_from, with_timeout, Dispatch, Exchange, Handler,
    Reply, Settings,
};
use nocopy_broker::{Bus, Logged};
use nocopy_core::message::{Body, Builder, Context, Decoder, Fault, Message, Type};
use nocopy_core::Error;

mod support;
use support::{collect, eventually, next, quiet, Slot};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Echo {
    text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Number {
    number: i64,
}

fn echo_body(text: &str) -> Body {
    Body::new(&Echo { text: text.into() }).unwrap()
}

fn number_body(number: i64) -> Body {
    Body::new(&Number { number }).unwrap()
}

async fn echo(_ctx: Context, m: Message) -> Reply {
    let _: Echo = m.decode()?;
    Ok(m.body())
}

async fn hello(_ctx: Context, m: Message) -> Reply {
    let e: Echo = m.decode()?;
    Ok(Some(Body::new(&Echo {
        text: format!("Hello, {}!", e.text),
    })?))
}

async fn hello2(_ctx: Context, m: Message) -> Reply {
    let e: Echo = m.decode()?;
    Ok(Some(Body::new(&Echo {
        text: format!("Hello, {}!!", e.text),
    })?))
}

async fn fail(_ctx: Context, m: Message) -> Reply {
    let n: Number = m.decode()?;
    match n.number {
        1 => Err(Fault::new(400, "invalid argument").into()),
        _ => Err(Error::Closed),
    }
}

async fn slow(_ctx: Context, _m: Message) -> Reply {
    tokio::time::sleep(Duration::from_secs(60)).await;
    Ok(None)
}

/// Answers by hand from the innermost topic and returns nothing.
struct Empty(Slot);

#[async_trait]
impl Handler for Empty {
    async fn handle(&self, ctx: Context, m: Message) -> Reply {
        let _: Option<Number> = m.decode()?;
        self.0
            .get()
            .answer(&ctx, &m, echo_body("How are you?"), &[with_max_from()])
            .await?;
        Ok(None)
    }
}

/// Reports its instance number; counts broadcast deliveries.
struct Numbered {
    i: i64,
    broadcasts: mpsc::UnboundedSender<i64>,
}

#[async_trait]
impl Handler for Numbered {
    async fn handle(&self, _ctx: Context, m: Message) -> Reply {
        if m.kind() == Type::Broadcast {
            let _ = self.broadcasts.send(self.i);
        }
        let _: Number = m.decode()?;
        Ok(Some(number_body(self.i)))
    }
}

async fn service(
    bus: &Bus,
    i: i64,
    hierarchy: &[&str],
    broadcasts: &mpsc::UnboundedSender<i64>,
) -> Arc<Exchange> {
    let slot = Slot::default();
    let mut ex = support::exchange(bus);
    ex.handle("echo", handler_fn(echo));
    ex.handle("hello", handler_fn(hello));
    ex.handle("hello2", handler_fn(hello2));
    ex.handle("empty", Empty(slot.clone()));
    ex.handle("error", handler_fn(fail));
    ex.handle(
        "number",
        Numbered {
            i,
            broadcasts: broadcasts.clone(),
        },
    );
    ex.set_transport(Arc::new(Logged::new(ex.transport())));
    let ex = Arc::new(ex);
    slot.bind(&ex);
    ex.listen(&Context::new(), "service", hierarchy).await.unwrap();
    ex
}

fn to_service(method: &str, body: Option<Body>) -> Builder {
    let b = Builder::new()
        .with_to("service")
        .with_from("client")
        .with_method(method);
    match body {
        Some(body) => b.with_body(body),
        None => b,
    }
}

#[tokio::test]
async fn service_suite() {
    let bus = Bus::default();
    let ctx = Context::new();
    let (btx, mut brx) = mpsc::unbounded_channel();

    let mut services = Vec::new();
    for (i, at) in [["one", "one"], ["one", "two"], ["two", "one"], ["two", "two"]]
        .iter()
        .enumerate()
    {
        services.push(service(&bus, i as i64, at, &btx).await);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = support::exchange(&bus);
    for method in ["echo", "hello", "empty", "error", "number"] {
        client.catch(method, collect(&tx));
    }
    client.set_transport(Arc::new(Logged::new(client.transport())));
    let client = Arc::new(client);
    client.listen(&ctx, "client", &["zero", "zero"]).await.unwrap();

    // echo, answered to the innermost client topic
    let id = client
        .send(
            &ctx,
            to_service("echo", Some(echo_body("Alice"))).build(),
            &[with_min_from(), with_max_from()],
        )
        .await
        .unwrap();
    let m = next(&mut rx).await;
    assert_eq!(m.id(), id);
    assert_eq!(m.kind(), Type::Answer);
    assert_eq!(m.to(), "client.zero.zero");
    assert_eq!(m.decode::<Echo>().unwrap().text, "Alice");

    // same id, different method
    client
        .send(&ctx, to_service("hello", Some(echo_body("Alice"))).build(), &[with_id(id)])
        .await
        .unwrap();
    let m = next(&mut rx).await;
    assert_eq!(m.id(), id);
    assert_eq!(m.decode::<Echo>().unwrap().text, "Hello, Alice!");

    // handler answers by hand, no body in the query
    client
        .send(&ctx, to_service("empty", None).build(), &[])
        .await
        .unwrap();
    let m = next(&mut rx).await;
    assert_eq!(m.decode::<Echo>().unwrap().text, "How are you?");
    assert!(m.from().starts_with("service."));

    // foreign error becomes 500
    client
        .send(&ctx, to_service("error", Some(number_body(0))).build(), &[])
        .await
        .unwrap();
    let m = next(&mut rx).await;
    assert_eq!(m.kind(), Type::Failure);
    assert_eq!(
        m.decode::<Echo>().unwrap_err(),
        Error::Failure(Fault::new(500, "transport closed"))
    );

    // fault keeps its code
    client
        .send(&ctx, to_service("error", Some(number_body(1))).build(), &[])
        .await
        .unwrap();
    let m = next(&mut rx).await;
    assert_eq!(
        m.decode::<Echo>().unwrap_err(),
        Error::Failure(Fault::new(400, "invalid argument"))
    );

    // innermost subject reaches exactly one instance
    client
        .send(
            &ctx,
            to_service("number", Some(number_body(1)))
                .with_to("service.two.two")
                .build(),
            &[],
        )
        .await
        .unwrap();
    let m = next(&mut rx).await;
    assert_eq!(m.decode::<Number>().unwrap().number, 3);

    // broadcast reaches both instances under service.two and produces no answer
    client
        .send(
            &ctx,
            to_service("number", Some(number_body(7)))
                .with_type(Type::Broadcast)
                .with_to("service.two")
                .build(),
            &[],
        )
        .await
        .unwrap();
    let mut got = Vec::new();
    for _ in 0..2 {
        got.push(
            tokio::time::timeout(support::WAIT, brx.recv())
                .await
                .unwrap()
                .unwrap(),
        );
    }
    got.sort_unstable();
    assert_eq!(got, vec![2, 3]);
    assert!(quiet(&mut rx, Duration::from_millis(100)).await);

    // request/reply
    let m = client
        .request(&ctx, "service", "hello", echo_body("Bob"), &[])
        .await
        .unwrap();
    assert_eq!(m.decode::<Echo>().unwrap().text, "Hello, Bob!");

    let m = client
        .request(&ctx, "service", "hello2", echo_body("Bob"), &[])
        .await
        .unwrap();
    assert_eq!(m.decode::<Echo>().unwrap().text, "Hello, Bob!!");

    let m = client
        .request(&ctx, "service", "error", number_body(0), &[])
        .await
        .unwrap();
    assert_eq!(m.kind(), Type::Failure);
    assert_eq!(
        m.decode::<Echo>().unwrap_err(),
        Error::Failure(Fault::new(500, "transport closed"))
    );
    assert_eq!(client.pending(), 0);

    client.shutdown().await;
    for s in &services {
        s.shutdown().await;
    }
}

#[tokio::test]
async fn duplicate_key_is_refused_and_first_waiter_survives() {
    let bus = Bus::default();
    let ctx = Context::new();
    let client = Arc::new(support::exchange(&bus));
    client.listen(&ctx, "client", &[]).await.unwrap();

    let id = Uuid::new_v4();
    let first = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .request(&Context::new(), "nowhere", "hello", echo_body("x"), &[with_id(id)])
                .await
        }
    });
    eventually(|| client.pending() == 1).await;

    let err = client
        .request(&ctx, "nowhere", "hello", echo_body("y"), &[with_id(id)])
        .await
        .unwrap_err();
    assert_eq!(err, Error::IllegalId);
    assert_eq!(client.pending(), 1);

    // same id under another method is another key
    let err = client
        .request(
            &ctx,
            "nowhere",
            "other",
            echo_body("z"),
            &[with_id(id), with_timeout(Duration::from_millis(20))],
        )
        .await
        .unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert_eq!(client.pending(), 1);

    client.finish().await;
    assert_eq!(first.await.unwrap().unwrap_err(), Error::Cancelled);
    assert_eq!(client.pending(), 0);
}

async fn late(_ctx: Context, m: Message) -> Reply {
    let n: Number = m.decode()?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(Some(number_body(n.number)))
}

#[tokio::test]
async fn refused_duplicate_leaves_first_request_answerable() {
    let bus = Bus::default();
    let ctx = Context::new();

    let mut svc = support::exchange(&bus);
    svc.handle("late", handler_fn(late));
    let svc = Arc::new(svc);
    svc.listen(&ctx, "svc", &[]).await.unwrap();

    let client = Arc::new(support::exchange(&bus));
    client.listen(&ctx, "client", &[]).await.unwrap();

    let id = Uuid::new_v4();
    let first = tokio::spawn({
        let client = client.clone();
        async move {
            let opts = [with_id(id), with_timeout(support::WAIT)];
            client
                .request(&Context::new(), "svc", "late", number_body(1), &opts)
                .await
        }
    });
    eventually(|| client.pending() == 1).await;

    let err = client
        .request(&ctx, "svc", "late", number_body(2), &[with_id(id)])
        .await
        .unwrap_err();
    assert_eq!(err, Error::IllegalId);

    let m = first.await.unwrap().unwrap();
    assert_eq!(m.id(), id);
    assert_eq!(m.decode::<Number>().unwrap().number, 1);
    assert_eq!(client.pending(), 0);

    client.shutdown().await;
    svc.shutdown().await;
}

#[tokio::test]
async fn default_timeout_applies_and_cleans_up() {
    let bus = Bus::default();
    let client = Exchange::with_settings(
        Arc::new(bus.connect(true)),
        Settings {
            timeout: Some(Duration::from_millis(20)),
        },
    );
    let err = client
        .request(&Context::new(), "nowhere", "hello", echo_body("x"), &[])
        .await
        .unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert_eq!(err.kind().as_str(), "LIFECYCLE");
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn dropped_request_releases_its_key() {
    let bus = Bus::default();
    let client = support::exchange(&bus);
    let ctx = Context::new();
    let id = Uuid::new_v4();
    {
        let opts = [with_id(id)];
        let fut = client.request(&ctx, "nowhere", "hello", echo_body("x"), &opts);
        let res = tokio::time::timeout(Duration::from_millis(20), fut).await;
        assert!(res.is_err());
    }
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn finish_cancels_and_drains_in_flight_tasks() {
    let bus = Bus::default();
    let ctx = Context::new();

    let mut svc = support::exchange(&bus);
    svc.handle("slow", handler_fn(slow));
    let svc = Arc::new(svc);
    svc.listen(&ctx, "svc", &["a"]).await.unwrap();
    assert_eq!(svc.subjects().len(), 3);

    let client = support::exchange(&bus);
    for _ in 0..3 {
        client
            .message(&ctx, "svc", "slow", echo_body("x"), &[])
            .await
            .unwrap();
    }
    eventually(|| svc.in_flight() == 3).await;

    tokio::time::timeout(Duration::from_secs(1), svc.finish())
        .await
        .expect("finish must not wait for cancelled handlers");
    assert_eq!(svc.in_flight(), 0);
    assert!(svc.subjects().is_empty());
    assert!(svc.is_finished());

    // idempotent, and the exchange stays closed
    svc.finish().await;
    assert_eq!(svc.listen(&ctx, "svc", &[]).await.unwrap_err(), Error::Closed);
    assert_eq!(bus.members("@svc"), 0);
}

async fn tick(_ctx: Context, _m: Message) -> Reply {
    tokio::task::yield_now().await;
    Ok(None)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nothing_runs_after_finish_returns() {
    for _ in 0..100 {
        let bus = Bus::default();
        let mut ex = support::exchange(&bus);
        ex.handle("tick", handler_fn(tick));
        let ex = Arc::new(ex);
        let m = Builder::new().with_to("x").with_method("tick").build();

        let feeder = tokio::spawn({
            let ex = ex.clone();
            async move {
                while !ex.is_finished() {
                    Decoder::process(ex.clone(), Context::new(), m.clone());
                    tokio::task::yield_now().await;
                }
                // one more after the flag flipped
                Decoder::process(ex.clone(), Context::new(), m.clone());
            }
        });
        tokio::task::yield_now().await;

        ex.finish().await;
        assert_eq!(ex.in_flight(), 0);
        feeder.await.unwrap();
        assert_eq!(ex.in_flight(), 0);
    }
}

/// Relays every lookup one hop further.
struct Relay(Slot);

#[async_trait]
impl Handler for Relay {
    async fn handle(&self, ctx: Context, m: Message) -> Reply {
        self.0.get().forward(&ctx, "storage", &m, &[]).await?;
        Ok(None)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct View {
    from: String,
    path: Vec<String>,
}

async fn storage(_ctx: Context, m: Message) -> Reply {
    Ok(Some(Body::new(&View {
        from: m.from().to_owned(),
        path: m.path().to_vec(),
    })?))
}

#[tokio::test]
async fn relayed_reply_unwinds_to_the_origin() {
    let bus = Bus::default();
    let ctx = Context::new();

    let slot = Slot::default();
    let mut proxy = support::exchange(&bus);
    proxy.handle("lookup", Relay(slot.clone()));
    let proxy = Arc::new(proxy);
    slot.bind(&proxy);
    proxy.listen(&ctx, "proxy", &[]).await.unwrap();

    let mut store = support::exchange(&bus);
    store.handle("lookup", handler_fn(storage));
    let store = Arc::new(store);
    store.listen(&ctx, "storage", &[]).await.unwrap();

    let client = Arc::new(support::exchange(&bus));
    client.listen(&ctx, "client", &[]).await.unwrap();

    let m = client
        .request(
            &ctx,
            "proxy",
            "lookup",
            echo_body("key"),
            &[with_timeout(support::WAIT)],
        )
        .await
        .unwrap();
    assert_eq!(m.kind(), Type::Answer);
    assert_eq!(m.from(), "proxy");
    assert_eq!(m.to(), "client");
    assert!(m.path().is_empty());
    assert_eq!(
        m.decode::<View>().unwrap(),
        View {
            from: "proxy".into(),
            path: vec!["client".into()],
        }
    );

    for ex in [&client, &proxy, &store] {
        ex.shutdown().await;
    }
}

#[tokio::test]
async fn direction_checks_and_broadcast_suppression() {
    let bus = Bus::default();
    let ex = support::exchange(&bus);
    let ctx = Context::new();
    let query = Builder::new().with_to("x").with_method("m").build();
    let reply = Builder::from(query.clone()).answer().build();

    assert_eq!(
        ex.forward(&ctx, "y", &reply, &[]).await.unwrap_err(),
        Error::IllegalType
    );
    assert_eq!(
        ex.answer(&ctx, &reply, echo_body("x"), &[]).await.unwrap_err(),
        Error::IllegalType
    );
    assert_eq!(
        ex.backward(&ctx, &query, &[]).await.unwrap_err(),
        Error::IllegalType
    );
    assert_eq!(ex.backward(&ctx, &reply, &[]).await.unwrap(), Uuid::nil());

    let scoped = ctx.with_value(Dispatch {
        kind: Type::Broadcast,
        id: query.id(),
    });
    assert_eq!(ex.send(&scoped, reply.clone(), &[]).await.unwrap(), Uuid::nil());
    assert_eq!(
        ex.answer(&scoped, &query, echo_body("x"), &[]).await.unwrap(),
        Uuid::nil()
    );
    // queries still go out from a broadcast scope
    assert_eq!(ex.send(&scoped, query.clone(), &[]).await.unwrap(), query.id());
}

#[tokio::test]
async fn topic_indexing() {
    let bus = Bus::default();
    let ex = Arc::new(support::exchange(&bus));
    assert_eq!(ex.topic(0), "");

    ex.listen(&Context::new(), "service", &["one", "two"])
        .await
        .unwrap();
    assert_eq!(ex.topic(0), "service");
    assert_eq!(ex.topic(1), "service.one");
    assert_eq!(ex.topic(2), "service.one.two");
    assert_eq!(ex.topic(-1), "service.one.two");
    assert_eq!(ex.topic(9), "service.one.two");

    let mut subjects = ex.subjects();
    subjects.sort();
    assert_eq!(
        subjects,
        vec![
            ("service".to_string(), false),
            ("service".to_string(), true),
            ("service.one".to_string(), false),
            ("service.one".to_string(), true),
            ("service.one.two".to_string(), false),
        ]
    );
    assert_eq!(bus.members("%service.one.two"), 0);
    assert_eq!(bus.members("@service.one.two"), 1);
    ex.shutdown().await;
}
