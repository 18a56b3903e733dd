//! # trella-overlay
//!
//! The secure overlay: a Gnutella-compatible flood-search network
//! with a trust layer on top.
//!
//! A [`Node`] participates in the open network like any Gnutella
//! servent — it originates and answers flood searches and serves
//! files over HTTP — while members of a named *secure group* share a
//! symmetric key that conceals their search queries, search replies,
//! and transferred bytes from everyone else. Group keys bootstrap
//! through the overlay itself: the key lives in the collection as a
//! synthetic `/secure/<group>/key` entry, discovered by search and
//! fetched over a mutually authenticated transfer that seals the key
//! to the requester's RSA public key.
//!
//! ## Modules
//!
//! - [`wire`] — the Gnutella packet codec (23-byte header, banners,
//!   search and search-reply payloads)
//! - [`node`] — the node itself: ports, peers, groups, shares,
//!   searches, transfers, callbacks
//! - [`auth_http`] — the Identity/Challenge/Response HTTP handshake
//! - [`transfer`] — upload and download workers
//!
//! ## Callbacks
//!
//! All callbacks are invoked from worker tasks, possibly several at
//! once; they must be re-entrant and are expected to return quickly.

pub mod auth_http;
pub mod node;
pub mod transfer;
pub mod wire;

pub use node::{
    AcceptCallback, FileHandle, GetCallback, GetEvent, HostInfo, JoinCallback, JoinStatus, Node,
    NodeCallbacks, SearchCallback, ShareInfo,
};

/// Default overlay port.
pub const PORT_DEFAULT: u16 = 6346;

/// Challenge lifetime for transfer authentication, in seconds.
pub const CHALLENGE_TIME_SECS: u64 = 10 * 60;

/// Prefix marking group-scoped search queries and key files.
pub const SECURE_PREFIX: &str = "/secure/";

/// Error types for overlay operations.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] trella_transport::TransportError),

    /// The peer's handshake banner was not the expected one.
    #[error("bad handshake banner")]
    BadHandshake,

    /// A packet violated the wire layout.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Payload length beyond the sanity cap.
    #[error("packet payload of {0} bytes exceeds the cap")]
    OversizedPayload(u32),

    /// The peer closed the connection.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The HTTP mutual authentication failed.
    #[error("transfer authentication failed: {0}")]
    AuthFailed(&'static str),

    /// The transfer target reported an error or vanished.
    #[error("transfer failed: {0}")]
    TransferFailed(&'static str),

    /// No local identity with a private key is available.
    #[error("no local identity with a private key")]
    NoLocalIdentity,

    /// Unknown group, port, host, or get id.
    #[error("unknown {0}")]
    Unknown(&'static str),

    /// Session-cipher failure.
    #[error(transparent)]
    Crypto(#[from] trella_crypto::CryptoError),

    /// Identity failure.
    #[error(transparent)]
    Identity(#[from] trella_identity::IdentityError),

    /// Authenticator failure.
    #[error(transparent)]
    Auth(#[from] trella_auth::AuthError),

    /// Filesystem failure on a transfer target.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OverlayError>;
