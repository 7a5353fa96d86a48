//! Wire frame codec (JSON array, segment-counted).
//!
//! Frame layout: `[envelope, middleware segments..., payload]`.
//! - one middleware segment per name in `envelope.use`, in order
//! - payload is the body for Query/Request/Broadcast/Answer and the fault for Failure
//!
//! Middlewares wrap the output writer on encode so they can observe the
//! frame bytes and emit out-of-band headers (e.g. a digest). On decode the
//! receiver re-resolves its own chain for the method and must match `use`.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::value::RawValue;

use crate::error::{Error, Result};

use super::builder::{Message, Payload};
use super::context::Context;
use super::envelope::{Body, Envelope, Fault, Type};

/// Out-of-band transport headers.
pub type Headers = BTreeMap<String, Vec<String>>;

/// Frame output sink. Middlewares stack writers on top of a `Buffer`.
pub trait Writer: Write + Send {
    /// Consume the writer chain, yielding the headers and the frame bytes.
    fn finish(self: Box<Self>) -> (Headers, Vec<u8>);
}

/// Innermost writer.
#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
    headers: Headers,
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer for Buffer {
    fn finish(self: Box<Self>) -> (Headers, Vec<u8>) {
        (self.headers, self.bytes)
    }
}

/// Named encode/decode stage participating in the frame.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Produce this middleware's JSON segment.
    fn encode(&self, ctx: &Context) -> Result<Vec<u8>>;

    /// Consume this middleware's segment, `frame[begin..begin + len]`.
    fn decode(
        &self,
        ctx: Context,
        headers: &Headers,
        frame: &[u8],
        begin: usize,
        len: usize,
    ) -> Result<Context>;

    /// Wrap the output writer. Default: pass through.
    fn writer(&self, inner: Box<dyn Writer>) -> Box<dyn Writer> {
        inner
    }
}

/// Resolves the middleware chain for a method.
pub trait Mediator: Send + Sync {
    fn middleware(&self, method: &str) -> Vec<Arc<dyn Middleware>>;
}

/// Outbound half handed to transports.
pub trait Encoder: Send + Sync {
    fn encode(&self, ctx: &Context, m: &Message) -> Result<(Headers, Bytes)>;
}

/// Inbound half handed to transports: decode, then hand off for dispatch.
pub trait Decoder: Send + Sync {
    fn decode(&self, ctx: Context, headers: &Headers, frame: &[u8]) -> Result<(Context, Message)>;

    /// Take ownership of a decoded message. Must not block.
    fn process(self: Arc<Self>, ctx: Context, m: Message);
}

fn chain_for(kind: Type, method: &str, mediator: &dyn Mediator) -> Vec<Arc<dyn Middleware>> {
    if kind.is_reply() {
        Vec::new()
    } else {
        mediator.middleware(method)
    }
}

fn io_err(e: io::Error) -> Error {
    Error::Internal(format!("frame write failed: {e}"))
}

/// Encode a message into headers and frame bytes.
pub fn encode(ctx: &Context, m: &Message, mediator: &dyn Mediator) -> Result<(Headers, Bytes)> {
    let chain = chain_for(m.kind(), m.method(), mediator);

    let mut out: Box<dyn Writer> = Box::new(Buffer::default());
    let mut uses = Vec::with_capacity(chain.len());
    let mut segments = Vec::with_capacity(chain.len());
    for w in &chain {
        out = w.writer(out);
        uses.push(w.name().to_owned());
        segments.push(w.encode(ctx)?);
    }

    let mut frame = Vec::with_capacity(256);
    frame.push(b'[');
    serde_json::to_writer(&mut frame, &m.envelope(uses))?;
    for s in &segments {
        frame.push(b',');
        frame.extend_from_slice(s);
    }
    frame.push(b',');
    match m.payload() {
        Payload::Body(b) => frame.extend_from_slice(b.get().as_bytes()),
        Payload::Fault(f) => serde_json::to_writer(&mut frame, f)?,
        Payload::Empty => frame.extend_from_slice(b"null"),
    }
    frame.push(b']');

    out.write_all(&frame).map_err(io_err)?;
    let (headers, bytes) = out.finish();
    Ok((headers, Bytes::from(bytes)))
}

fn offset(frame: &[u8], seg: &RawValue) -> Result<usize> {
    let len = seg.get().len();
    (seg.get().as_ptr() as usize)
        .checked_sub(frame.as_ptr() as usize)
        .filter(|begin| begin + len <= frame.len())
        .ok_or_else(|| Error::BadFrame("segment outside of frame".into()))
}

/// Decode frame bytes into a message, running the receiver's middleware chain.
pub fn decode(
    mut ctx: Context,
    headers: &Headers,
    frame: &[u8],
    mediator: &dyn Mediator,
) -> Result<(Context, Message)> {
    let segments: Vec<&RawValue> = serde_json::from_slice(frame)?;
    let mut segments = segments.into_iter();

    let head = segments.next().ok_or(Error::Empty)?;
    let envelope = Envelope::from_json(head.get())?;

    let chain = chain_for(envelope.kind, &envelope.method, mediator);
    if !envelope
        .uses
        .iter()
        .map(String::as_str)
        .eq(chain.iter().map(|w| w.name()))
    {
        return Err(Error::IllegalMiddleware(envelope.uses.join(",")));
    }

    let expected = chain.len() + 1;
    let rest = segments.len();
    if rest < expected {
        return Err(Error::NoPayload);
    }
    if rest > expected {
        return Err(Error::RedundantMessage);
    }

    for w in &chain {
        let seg = segments.next().ok_or(Error::NoPayload)?;
        let begin = offset(frame, seg)?;
        ctx = w.decode(ctx, headers, frame, begin, seg.get().len())?;
    }

    let payload = segments.next().ok_or(Error::NoPayload)?;
    let m = match envelope.kind {
        Type::Failure => {
            // `null` stands for the zero fault.
            let fault: Option<Fault> = serde_json::from_str(payload.get())?;
            Message::from_fault(envelope, fault.unwrap_or_default())
        }
        _ => Message::from_body(envelope, Body::from_raw(payload.to_owned())),
    };

    tracing::trace!(id = %m.id(), by = m.method(), kind = %m.kind(), "frame decoded");
    Ok((ctx, m))
}
