//! # trella-transport
//!
//! Dual-mode TCP connections for the overlay.
//!
//! A [`Connection`] frames nothing by itself: it is a byte stream
//! with a pushback ("unget") buffer consulted before the socket, so
//! protocol detection and HTTP header parsing can peek without
//! disturbing the peer-visible stream. Inbound connections are
//! classified raw or HTTP by their first bytes; outbound connections
//! fall back to a process-wide HTTP proxy when direct connects fail.
//!
//! ## Modules
//!
//! - [`connection`] — the connection itself, outbound connect, unget
//! - [`listener`] — listening sockets with ephemeral-port probing and
//!   accept-time protocol detection
//! - [`http`] — HTTP header reading/writing over a connection
//! - [`proxy`] — the process-wide proxy fallback configuration

pub mod connection;
pub mod http;
pub mod listener;
pub mod proxy;

pub use connection::{Connection, Direction, Mode, ReadHalf, WriteHalf};
pub use http::HttpHeader;
pub use listener::Listener;

/// Listen backlog for inbound sockets.
pub const LISTEN_BACKLOG: u32 = 6;

/// HTTP status codes the toolkit traffics in.
pub const HTTP_OK: u16 = 200;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_UNAUTHORIZED: u16 = 401;
pub const HTTP_NOT_FOUND: u16 = 404;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect did not complete within the caller's timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Neither the direct path nor the proxy produced a connection.
    #[error("connection failed directly and via proxy")]
    ProxyExhausted,

    /// The peer closed before a full HTTP header arrived, or the
    /// header exceeded the size limit.
    #[error("HTTP header truncated or oversized")]
    BadHeader,

    /// No free port could be bound.
    #[error("no free listening port found")]
    NoFreePort,
}

pub type Result<T> = std::result::Result<T, TransportError>;
