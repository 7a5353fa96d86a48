//! `!signature`: frame digest carried in the `Digest` header.
//!
//! The sender wraps the frame writer so every byte of the final frame is
//! hashed; the hex digest travels out of band. The receiver checks the
//! algorithm named in the segment against its own, recomputes the digest
//! over the raw frame and compares.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};

use nocopy_core::message::{Context, Headers, Middleware, Writer};
use nocopy_core::{Error, Result};

use super::segment;

pub const DIGEST_HEADER: &str = "Digest";

/// Digest algorithm, serialized by its registry number (5: SHA-256, 7: SHA-512).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    fn hasher(self) -> Hasher {
        match self {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// Hex digest of `data`.
    pub fn digest(self, data: &[u8]) -> String {
        let mut h = self.hasher();
        h.update(data);
        h.finish()
    }
}

impl From<Algorithm> for u8 {
    fn from(a: Algorithm) -> u8 {
        match a {
            Algorithm::Sha256 => 5,
            Algorithm::Sha512 => 7,
        }
    }
}

impl TryFrom<u8> for Algorithm {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            5 => Ok(Algorithm::Sha256),
            7 => Ok(Algorithm::Sha512),
            _ => Err(Error::AlgorithmMismatch),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Algorithm::Sha256),
            "sha512" | "sha-512" => Ok(Algorithm::Sha512),
            other => Err(Error::Config(format!("unknown digest algorithm: {other}"))),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Sha256 => f.write_str("SHA-256"),
            Algorithm::Sha512 => f.write_str("SHA-512"),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Writer hashing everything that passes through it.
struct DigestWriter {
    inner: Box<dyn Writer>,
    hasher: Hasher,
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(buf.get(..n).unwrap_or(buf));
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Writer for DigestWriter {
    fn finish(self: Box<Self>) -> (Headers, Vec<u8>) {
        let DigestWriter { inner, hasher } = *self;
        let (inner_headers, bytes) = inner.finish();
        let mut headers = Headers::new();
        headers.insert(DIGEST_HEADER.to_owned(), vec![hasher.finish()]);
        for (k, v) in inner_headers {
            headers.entry(k).or_default().extend(v);
        }
        (headers, bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub algorithm: Algorithm,
}

impl Signature {
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm }
    }
}

impl Middleware for Signature {
    fn name(&self) -> &str {
        "!signature"
    }

    fn encode(&self, _ctx: &Context) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(
        &self,
        ctx: Context,
        headers: &Headers,
        frame: &[u8],
        begin: usize,
        len: usize,
    ) -> Result<Context> {
        let theirs: Signature = serde_json::from_slice(segment(frame, begin, len)?)
            .map_err(|_| Error::AlgorithmMismatch)?;
        if theirs.algorithm != self.algorithm {
            return Err(Error::AlgorithmMismatch);
        }
        let want = self.algorithm.digest(frame);
        match headers.get(DIGEST_HEADER).and_then(|v| v.first()) {
            Some(got) if *got == want => Ok(ctx),
            _ => Err(Error::DigestMismatch),
        }
    }

    fn writer(&self, inner: Box<dyn Writer>) -> Box<dyn Writer> {
        Box::new(DigestWriter {
            inner,
            hasher: self.algorithm.hasher(),
        })
    }
}
