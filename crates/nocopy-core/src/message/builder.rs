//! Immutable message decorator chain.
//!
//! A `Message` is a handle onto a chain of nodes. Every node overrides exactly
//! one facet (id, from, to, method, type, return path, body or error) and
//! delegates the rest to its parent, so deriving a reply or a relay hop never
//! touches the original. `Builder` is the fluent front end over the chain.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::envelope::{Body, Envelope, Fault, Type};

/// Decoded frame: header plus whichever payload the type implies.
#[derive(Debug)]
struct Raw {
    envelope: Envelope,
    payload: RawPayload,
}

#[derive(Debug)]
enum RawPayload {
    Body(Body),
    Fault(Fault),
}

enum Layer {
    Origin(Uuid),
    Raw(Raw),
    Id(Uuid),
    From(String),
    To(String),
    Path(Vec<String>),
    Kind(Type),
    Method(String),
    Body(Body),
    Error(Fault),
    /// Swaps from/to and turns the type into Answer (or keeps Failure).
    Answer,
}

struct Node {
    layer: Layer,
    parent: Option<Message>,
}

/// Payload view of a message.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    Empty,
    Body(&'a Body),
    Fault(&'a Fault),
}

/// Immutable message handle.
#[derive(Clone)]
pub struct Message {
    node: Arc<Node>,
}

const NO_PATH: &[String] = &[];

impl Message {
    fn origin(id: Uuid) -> Self {
        Self {
            node: Arc::new(Node {
                layer: Layer::Origin(id),
                parent: None,
            }),
        }
    }

    /// Rebuild a message from a decoded envelope and its body.
    pub fn from_body(envelope: Envelope, body: Body) -> Self {
        Self::raw(envelope, RawPayload::Body(body))
    }

    /// Rebuild a failure message from a decoded envelope and its fault.
    pub fn from_fault(envelope: Envelope, fault: Fault) -> Self {
        Self::raw(envelope, RawPayload::Fault(fault))
    }

    fn raw(envelope: Envelope, payload: RawPayload) -> Self {
        Self {
            node: Arc::new(Node {
                layer: Layer::Raw(Raw { envelope, payload }),
                parent: None,
            }),
        }
    }

    fn parent(&self) -> Option<&Message> {
        self.node.parent.as_ref()
    }

    pub fn id(&self) -> Uuid {
        match &self.node.layer {
            Layer::Origin(id) | Layer::Id(id) => *id,
            Layer::Raw(r) => r.envelope.id,
            _ => self.parent().map(Message::id).unwrap_or_default(),
        }
    }

    pub fn from(&self) -> &str {
        match &self.node.layer {
            Layer::From(s) => s,
            Layer::Raw(r) => &r.envelope.from,
            Layer::Answer => self.parent().map(Message::to).unwrap_or_default(),
            _ => self.parent().map(Message::from).unwrap_or_default(),
        }
    }

    pub fn to(&self) -> &str {
        match &self.node.layer {
            Layer::To(s) => s,
            Layer::Raw(r) => &r.envelope.to,
            Layer::Answer => self.parent().map(Message::from).unwrap_or_default(),
            _ => self.parent().map(Message::to).unwrap_or_default(),
        }
    }

    /// Return path (prior hops, innermost last).
    pub fn path(&self) -> &[String] {
        match &self.node.layer {
            Layer::Path(p) => p,
            Layer::Raw(r) => &r.envelope.path,
            _ => self.parent().map(Message::path).unwrap_or(NO_PATH),
        }
    }

    pub fn kind(&self) -> Type {
        match &self.node.layer {
            Layer::Kind(t) => *t,
            Layer::Raw(r) => r.envelope.kind,
            Layer::Error(_) => Type::Failure,
            Layer::Answer => match self.parent().map(Message::kind) {
                Some(Type::Failure) => Type::Failure,
                _ => Type::Answer,
            },
            _ => self.parent().map(Message::kind).unwrap_or_default(),
        }
    }

    pub fn method(&self) -> &str {
        match &self.node.layer {
            Layer::Method(s) => s,
            Layer::Raw(r) => &r.envelope.method,
            _ => self.parent().map(Message::method).unwrap_or_default(),
        }
    }

    pub fn payload(&self) -> Payload<'_> {
        match &self.node.layer {
            Layer::Body(b) => Payload::Body(b),
            Layer::Error(f) => Payload::Fault(f),
            Layer::Raw(r) => match &r.payload {
                RawPayload::Body(b) => Payload::Body(b),
                RawPayload::Fault(f) => Payload::Fault(f),
            },
            _ => self.parent().map(Message::payload).unwrap_or(Payload::Empty),
        }
    }

    /// Body, unless the message carries a fault or nothing at all.
    pub fn body(&self) -> Option<Body> {
        match self.payload() {
            Payload::Body(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// Decode the body. A failure message yields its fault instead.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self.payload() {
            Payload::Fault(f) => Err(Error::Failure(f.clone())),
            Payload::Body(b) => b.decode(),
            Payload::Empty => Ok(serde_json::from_str("null")?),
        }
    }

    /// Wire header for this message with the given middleware names.
    pub fn envelope(&self, uses: Vec<String>) -> Envelope {
        Envelope {
            id: self.id(),
            from: self.from().to_owned(),
            path: self.path().to_vec(),
            to: self.to().to_owned(),
            kind: self.kind(),
            method: self.method().to_owned(),
            uses,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id())
            .field("from", &self.from())
            .field("path", &self.path())
            .field("to", &self.to())
            .field("type", &self.kind())
            .field("method", &self.method())
            .field("payload", &self.payload())
            .finish()
    }
}

/// Fluent builder over the decorator chain.
#[derive(Clone, Debug)]
pub struct Builder(Message);

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Origin message with a fresh id and empty routing.
    pub fn new() -> Self {
        Self(Message::origin(Uuid::new_v4()))
    }

    /// Origin message with a fixed id.
    pub fn with_origin(id: Uuid) -> Self {
        Self(Message::origin(id))
    }

    fn push(self, layer: Layer) -> Self {
        Self(Message {
            node: Arc::new(Node {
                layer,
                parent: Some(self.0),
            }),
        })
    }

    pub fn with_id(self, id: Uuid) -> Self {
        self.push(Layer::Id(id))
    }

    pub fn with_from(self, from: impl Into<String>) -> Self {
        self.push(Layer::From(from.into()))
    }

    pub fn with_to(self, to: impl Into<String>) -> Self {
        self.push(Layer::To(to.into()))
    }

    pub fn with_method(self, method: impl Into<String>) -> Self {
        self.push(Layer::Method(method.into()))
    }

    pub fn with_type(self, kind: Type) -> Self {
        self.push(Layer::Kind(kind))
    }

    pub fn with_path<I, S>(self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(Layer::Path(path.into_iter().map(Into::into).collect()))
    }

    pub fn with_body(self, body: Body) -> Self {
        self.push(Layer::Body(body))
    }

    /// Attach a failure; the type becomes `Failure`.
    pub fn with_error(self, err: impl Into<Fault>) -> Self {
        self.push(Layer::Error(err.into()))
    }

    /// Derive the reply: from/to swapped, type Answer, or Failure when the
    /// message already carries one.
    pub fn answer(self) -> Self {
        self.push(Layer::Answer)
    }

    /// Relay one hop deeper: the current sender is pushed onto the return
    /// path, the current destination becomes the sender.
    pub fn forward(self, to: impl Into<String>) -> Self {
        let from = self.0.to().to_owned();
        let mut path = self.0.path().to_vec();
        path.push(self.0.from().to_owned());
        self.push(Layer::From(from))
            .push(Layer::Path(path))
            .push(Layer::To(to.into()))
            .push(Layer::Kind(Type::Query))
    }

    /// Unwind one hop toward the origin. No-op on an empty return path.
    pub fn backward(self) -> Self {
        let mut path = self.0.path().to_vec();
        let Some(to) = path.pop() else {
            return self;
        };
        let from = self.0.to().to_owned();
        self.push(Layer::From(from))
            .push(Layer::To(to))
            .push(Layer::Path(path))
    }

    pub fn message(&self) -> &Message {
        &self.0
    }

    pub fn build(self) -> Message {
        self.0
    }
}

impl From<Message> for Builder {
    fn from(m: Message) -> Self {
        Self(m)
    }
}

impl Deref for Builder {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.0
    }
}
