use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use nocopy_core::{Error, Result};

use crate::exchange::{Exchange, Settings};
use crate::middleware::{Algorithm, Authorize, Signature};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub version: u32,

    #[serde(default)]
    pub exchange: ExchangeSection,

    #[serde(default)]
    pub transport: TransportSection,

    #[serde(default)]
    pub signature: Option<SignatureSection>,

    #[serde(default)]
    pub authorize: Option<AuthorizeSection>,

    #[serde(default)]
    pub echo: EchoSection,
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(Error::UnsupportedVersion);
        }

        self.exchange.validate()?;
        self.transport.validate()?;
        if let Some(s) = &self.signature {
            s.validate()?;
        }
        self.echo.validate()?;

        Ok(())
    }

    /// Install the configured middlewares on `ex`: authorize first, then signature.
    pub fn apply(&self, ex: &mut Exchange) -> Result<()> {
        if let Some(a) = &self.authorize {
            ex.use_middleware(Arc::new(Authorize::new(a.user.clone())));
        }
        if let Some(s) = &self.signature {
            let mw = Arc::new(Signature::new(s.algorithm()?));
            if s.methods.is_empty() {
                ex.use_middleware(mw);
            } else {
                for m in &s.methods {
                    ex.use_method_middleware(m.clone(), mw.clone());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeSection {
    /// 0 disables the default deadline.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ExchangeSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ExchangeSection {
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms > 600000 {
            return Err(Error::Config(
                "exchange.request_timeout_ms must be between 0 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        Settings {
            timeout: Some(Duration::from_millis(self.request_timeout_ms)).filter(|t| !t.is_zero()),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    30000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_no_echo")]
    pub no_echo: bool,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            no_echo: default_no_echo(),
        }
    }
}

impl TransportSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1_048_576).contains(&self.queue_capacity) {
            return Err(Error::Config(
                "transport.queue_capacity must be between 1 and 1048576".into(),
            ));
        }
        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_no_echo() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureSection {
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Methods to sign; empty signs every method.
    #[serde(default)]
    pub methods: Vec<String>,
}

impl SignatureSection {
    pub fn validate(&self) -> Result<()> {
        self.algorithm().map(|_| ())
    }

    pub fn algorithm(&self) -> Result<Algorithm> {
        self.algorithm.parse()
    }
}

fn default_algorithm() -> String {
    "sha256".into()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizeSection {
    pub user: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EchoSection {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_quantity")]
    pub quantity: u64,

    #[serde(default = "default_instances")]
    pub instances: usize,
}

impl Default for EchoSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            quantity: default_quantity(),
            instances: default_instances(),
        }
    }
}

impl EchoSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1024).contains(&self.concurrency) {
            return Err(Error::Config("echo.concurrency must be between 1 and 1024".into()));
        }
        if !(1..=64).contains(&self.instances) {
            return Err(Error::Config("echo.instances must be between 1 and 64".into()));
        }
        Ok(())
    }
}

fn default_concurrency() -> usize {
    8
}
fn default_quantity() -> u64 {
    1000
}
fn default_instances() -> usize {
    2
}
