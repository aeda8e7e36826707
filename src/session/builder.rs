//! Session configuration.
//!
//! ```rust,no_run
//! use snmp_query::{Credential, CredentialParams, Retry, Session, Version};
//! use snmp_query::v3::{AuthProtocol, PrivProtocol};
//!
//! # async fn example() -> snmp_query::Result<()> {
//! let credential = Credential::build(
//!     Version::V3,
//!     CredentialParams::usm("monitor")
//!         .auth(AuthProtocol::Sha256, "authpass123")
//!         .privacy(PrivProtocol::Aes128, "privpass123"),
//! )?;
//!
//! let session = Session::builder("switch-3.example.net", credential)
//!     .retry(Retry::exponential(4))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::credential::Credential;
use crate::error::{ConfigError, Error, Result};
use crate::transport::{Transport, UdpTransport};
use crate::v3::EngineCache;

use super::{Backoff, Retry, Session, SessionConfig, WalkMode};

/// Agent port used when the target names none.
pub const DEFAULT_PORT: u16 = 161;

/// Builder returned by [`Session::builder`].
#[derive(Debug)]
pub struct SessionBuilder {
    target: String,
    credential: Credential,
    config: SessionConfig,
    engine_cache: Option<Arc<EngineCache>>,
    recv_buffer_size: Option<usize>,
}

impl SessionBuilder {
    pub(crate) fn new(target: impl Into<String>, credential: Credential) -> Self {
        Self {
            target: target.into(),
            credential,
            config: SessionConfig::default(),
            engine_cache: None,
            recv_buffer_size: None,
        }
    }

    /// Fixed per-attempt timeout, keeping the attempt count.
    ///
    /// Clamped to 1..=5 seconds when used.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.retry.backoff = Backoff::Fixed { timeout };
        self
    }

    pub fn retry(mut self, retry: impl Into<Retry>) -> Self {
        self.config.retry = retry.into();
        self
    }

    /// OIDs per GET in [`Session::get_many`]. Default 10.
    pub fn max_oids_per_request(mut self, max: usize) -> Self {
        self.config.max_oids_per_request = max.max(1);
        self
    }

    /// Bindings per GETBULK during walks. Default 10.
    pub fn max_repetitions(mut self, max: u32) -> Self {
        self.config.max_repetitions = max.max(1);
        self
    }

    pub fn walk_mode(mut self, mode: WalkMode) -> Self {
        self.config.walk_mode = mode;
        self
    }

    /// Stop walks after this many bindings.
    pub fn max_walk_results(mut self, max: usize) -> Self {
        self.config.max_walk_results = Some(max);
        self
    }

    /// Share discovered SNMPv3 engines with other sessions.
    pub fn engine_cache(mut self, cache: Arc<EngineCache>) -> Self {
        self.engine_cache = Some(cache);
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    /// Resolve the target and open a dedicated UDP socket to it.
    pub async fn connect(self) -> Result<Session<UdpTransport>> {
        let target = resolve_target(&self.target).await?;
        let transport = UdpTransport::connect_with_buffer(target, self.recv_buffer_size).await?;
        self.build(transport)
    }

    /// Build over an existing transport. The builder's target string is
    /// ignored; the transport's peer is used.
    pub fn build<T: Transport>(self, transport: T) -> Result<Session<T>> {
        let version = self.credential.version();
        if self.config.walk_mode == WalkMode::GetBulk && !version.supports_bulk() {
            return Err(ConfigError::BulkUnsupported { version }.into());
        }

        tracing::debug!(
            target: "snmp_query::session",
            {
                snmp.target = %transport.peer_addr(),
                snmp.version = %version,
                max_attempts = self.config.retry.max_attempts,
            },
            "session created"
        );
        Ok(Session::from_parts(
            transport,
            self.credential,
            self.config,
            self.engine_cache,
        ))
    }
}

/// Address literals: `ip`, `ip:port`, `[v6]` and `[v6]:port`.
fn parse_literal(target: &str) -> Option<SocketAddr> {
    if let Ok(addr) = target.parse::<SocketAddr>() {
        return Some(addr);
    }
    let bare = target
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(target);
    bare.parse::<IpAddr>()
        .ok()
        .map(|ip| SocketAddr::new(ip, DEFAULT_PORT))
}

async fn resolve_target(target: &str) -> Result<SocketAddr> {
    let invalid = || -> Error {
        ConfigError::InvalidTarget {
            target: target.to_owned(),
        }
        .into()
    };
    if let Some(addr) = parse_literal(target) {
        return Ok(addr);
    }
    if target.is_empty() || target.starts_with('[') {
        return Err(invalid());
    }

    let lookup = if target.contains(':') {
        target.to_owned()
    } else {
        format!("{target}:{DEFAULT_PORT}")
    };
    match tokio::net::lookup_host(lookup.as_str()).await {
        Ok(mut addrs) => addrs.next().ok_or_else(invalid),
        Err(e) => {
            tracing::debug!(
                target: "snmp_query::session",
                { snmp.target = target, error = %e },
                "target resolution failed"
            );
            Err(invalid())
        }
    }
}
