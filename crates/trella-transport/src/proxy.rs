//! Process-wide HTTP proxy fallback configuration.
//!
//! The proxy setting lives at process scope so every outbound
//! connection shares one answer to "are we behind a proxy". Each
//! connection still latches its own direct-vs-proxy decision at open
//! time.

use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::time::Duration;

/// A configured fallback proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy address.
    pub ip: Ipv4Addr,
    /// Proxy port.
    pub port: u16,
    /// How long to try the direct path before falling back.
    pub direct_timeout: Duration,
}

static PROXY: RwLock<Option<ProxyConfig>> = RwLock::new(None);

/// Configure (or clear, with `None`) the process-wide proxy.
pub fn set_proxy(config: Option<ProxyConfig>) {
    match PROXY.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// The current proxy configuration.
pub fn proxy() -> Option<ProxyConfig> {
    match PROXY.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}
