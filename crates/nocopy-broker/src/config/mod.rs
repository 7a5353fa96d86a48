//! Broker config loader (strict parsing).

pub mod schema;

use std::fs;

use nocopy_core::{Error, Result};

pub use schema::{
    AuthorizeSection, BrokerConfig, EchoSection, ExchangeSection, SignatureSection,
    TransportSection,
};

pub fn load_from_file(path: &str) -> Result<BrokerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BrokerConfig> {
    let cfg: BrokerConfig =
        serde_yaml::from_str(s).map_err(|e| Error::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
