//! Envelope (wire header) and payload primitives.
//!
//! Bodies are kept as `RawValue` so a relay never re-parses what it only
//! forwards; handlers decode lazily into their own types.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Message type. Serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Type {
    #[default]
    Query,
    Answer,
    Request,
    Failure,
    Broadcast,
}

impl Type {
    /// Answer or Failure.
    pub fn is_reply(self) -> bool {
        matches!(self, Type::Answer | Type::Failure)
    }

    pub fn is_query(&self) -> bool {
        *self == Type::Query
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Type::Query => "query",
            Type::Answer => "answer",
            Type::Request => "request",
            Type::Failure => "failure",
            Type::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Type> for u8 {
    fn from(t: Type) -> u8 {
        match t {
            Type::Query => 0,
            Type::Answer => 1,
            Type::Request => 2,
            Type::Failure => 3,
            Type::Broadcast => 4,
        }
    }
}

impl TryFrom<u8> for Type {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Type::Query),
            1 => Ok(Type::Answer),
            2 => Ok(Type::Request),
            3 => Ok(Type::Failure),
            4 => Ok(Type::Broadcast),
            _ => Err(Error::IllegalType),
        }
    }
}

/// Wire header accompanying every frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Envelope {
    pub id: Uuid,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub from: String,
    /// Return path: prior hops, innermost last.
    #[serde(rename = "return", skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(rename = "type", skip_serializing_if = "Type::is_query")]
    pub kind: Type,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Middleware names applied on encode, in order.
    #[serde(rename = "use", skip_serializing_if = "Vec::is_empty")]
    pub uses: Vec<String>,
}

// Type is read as a bare integer so an unknown code is reported as
// `IllegalType` rather than as a generic JSON error.
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    id: Uuid,
    #[serde(default)]
    from: String,
    #[serde(rename = "return", default)]
    path: Vec<String>,
    #[serde(default)]
    to: String,
    #[serde(rename = "type", default)]
    kind: u8,
    #[serde(default)]
    method: String,
    #[serde(rename = "use", default)]
    uses: Vec<String>,
}

impl Envelope {
    /// Parse an envelope segment.
    pub fn from_json(s: &str) -> Result<Self> {
        let w: WireEnvelope = serde_json::from_str(s)?;
        Ok(Self {
            id: w.id,
            from: w.from,
            path: w.path,
            to: w.to,
            kind: Type::try_from(w.kind)?,
            method: w.method,
            uses: w.uses,
        })
    }
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// Failure payload carried by `Type::Failure` messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{text}")]
pub struct Fault {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl Fault {
    pub fn new(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Wrap an arbitrary error with code 500.
    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(500, err.to_string())
    }
}

impl From<Error> for Fault {
    fn from(e: Error) -> Self {
        match e {
            Error::Failure(f) => f,
            other => Fault::internal(other),
        }
    }
}

/// Opaque JSON body. Cheap to clone, decoded on demand.
#[derive(Clone)]
pub struct Body(Arc<RawValue>);

impl Body {
    /// Serialize a value into a body.
    pub fn new<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(value)?;
        Ok(Self(Arc::from(raw)))
    }

    pub fn from_raw(raw: Box<RawValue>) -> Self {
        Self(Arc::from(raw))
    }

    /// Raw JSON text.
    pub fn get(&self) -> &str {
        self.0.get()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.0.get())?)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Body({})", self.get())
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}
