#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::Duration;

use nocopy_broker::config;
use nocopy_broker::middleware::Algorithm;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
exchange:
  request_timeout_ms: 1000
signature:
  algoritm: sha256 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.kind().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.exchange.settings().timeout, Some(Duration::from_secs(30)));
    assert_eq!(cfg.transport.queue_capacity, 1024);
    assert!(cfg.transport.no_echo);
    assert!(cfg.signature.is_none());
    assert!(cfg.authorize.is_none());
}

#[test]
fn full_config() {
    let ok = r#"
version: 1
exchange:
  request_timeout_ms: 0
transport:
  queue_capacity: 16
  no_echo: false
signature:
  algorithm: sha512
  methods: ["file", "head"]
authorize:
  user: "proxy"
echo:
  concurrency: 4
  quantity: 10
  instances: 3
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.exchange.settings().timeout, None);
    assert_eq!(cfg.transport.queue_capacity, 16);
    let sig = cfg.signature.as_ref().unwrap();
    assert_eq!(sig.algorithm().unwrap(), Algorithm::Sha512);
    assert_eq!(sig.methods, vec!["file", "head"]);
    assert_eq!(cfg.authorize.as_ref().unwrap().user, "proxy");
    assert_eq!(cfg.echo.instances, 3);
}

#[test]
fn unsupported_version() {
    let err = config::load_from_str("version: 2").expect_err("must fail");
    assert_eq!(err, nocopy_core::Error::UnsupportedVersion);
}

#[test]
fn out_of_range_values() {
    for bad in [
        "version: 1\nexchange:\n  request_timeout_ms: 600001\n",
        "version: 1\ntransport:\n  queue_capacity: 0\n",
        "version: 1\nsignature:\n  algorithm: md5\n",
        "version: 1\necho:\n  concurrency: 0\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.kind().as_str(), "CONFIG", "{bad}");
    }
}
