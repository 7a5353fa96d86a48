//! `!authorize`: user principal travelling with the request.
//!
//! On encode the principal found in the context wins over the configured
//! one, so a service relaying a request keeps the original caller.

use serde::{Deserialize, Serialize};

use nocopy_core::message::{Context, Headers, Middleware};
use nocopy_core::Result;

use super::segment;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorize {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
}

impl Authorize {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }
}

impl Middleware for Authorize {
    fn name(&self) -> &str {
        "!authorize"
    }

    fn encode(&self, ctx: &Context) -> Result<Vec<u8>> {
        let who = ctx.value::<Authorize>().unwrap_or(self);
        Ok(serde_json::to_vec(who)?)
    }

    fn decode(
        &self,
        ctx: Context,
        _headers: &Headers,
        frame: &[u8],
        begin: usize,
        len: usize,
    ) -> Result<Context> {
        let who: Authorize = serde_json::from_slice(segment(frame, begin, len)?)?;
        Ok(ctx.with_value(who))
    }
}
