//! Message model and wire format.
//!
//! - `envelope`: wire header, message type, failure payload and raw JSON body.
//! - `builder`: immutable decorator chain (`Message`) and its fluent `Builder`.
//! - `context`: typed value chain threaded through middleware and handlers.
//! - `frame`: JSON array frame codec and the middleware/mediator contracts.

pub mod builder;
pub mod context;
pub mod envelope;
pub mod frame;

pub use builder::{Builder, Message, Payload};
pub use context::Context;
pub use envelope::{Body, Envelope, Fault, Type};
pub use frame::{Buffer, Decoder, Encoder, Headers, Mediator, Middleware, Writer};
