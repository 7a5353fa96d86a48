//! nocopy broker demo.
//!
//! Starts `echo.instances` echo services listening on `proxy.<host>.<n>` over
//! one in-process bus, then drives `echo.quantity` echo messages at them from
//! a client listening on `echo.<host>.1` and reports the mean time per message.
//!
//! Usage: `nocopy-broker [config.yaml]`. Without a path the defaults apply.

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use nocopy_broker::config::{self, BrokerConfig};
use nocopy_broker::services::{drive, EchoProbe, EchoService, ECHO};
use nocopy_broker::{Bus, Exchange, Logged};
use nocopy_core::message::Context;
use nocopy_core::Result;

fn exchange(cfg: &BrokerConfig, bus: &Bus) -> Result<Exchange> {
    let mut ex = Exchange::with_settings(
        Arc::new(bus.connect(cfg.transport.no_echo)),
        cfg.exchange.settings(),
    );
    cfg.apply(&mut ex)?;
    ex.set_transport(Arc::new(Logged::new(ex.transport())));
    Ok(ex)
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => config::load_from_file(&path)?,
        None => config::load_from_str("version: 1")?,
    };
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
    let bus = Bus::new(cfg.transport.queue_capacity);
    let ctx = Context::new();

    let mut services = Vec::with_capacity(cfg.echo.instances);
    for i in 0..cfg.echo.instances {
        let mut ex = exchange(&cfg, &bus)?;
        ex.handle(ECHO, EchoService);
        let ex = Arc::new(ex);
        let n = i.to_string();
        ex.listen(&ctx, "proxy", &[host.as_str(), n.as_str()]).await?;
        services.push(ex);
    }

    let probe = EchoProbe::default();
    let mut client = exchange(&cfg, &bus)?;
    client.catch(ECHO, probe.clone());
    let client = Arc::new(client);
    client.listen(&ctx, ECHO, &[host.as_str(), "1"]).await?;

    tracing::info!(instances = services.len(), %host, "nocopy-broker echo starting");
    let report = drive(
        &client,
        &probe,
        &ctx,
        "proxy",
        cfg.echo.concurrency,
        cfg.echo.quantity,
    )
    .await;

    client.shutdown().await;
    for ex in &services {
        ex.shutdown().await;
    }

    let report = report?;
    tracing::info!(
        sent = report.sent,
        received = report.received,
        time = ?report.per_message(),
        "nocopy-broker echo done"
    );
    Ok(())
}
