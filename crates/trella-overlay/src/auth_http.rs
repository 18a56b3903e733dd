//! The Identity/Challenge/Response handshake over HTTP.
//!
//! Authenticated transfers run a mutual challenge/response before any
//! payload moves. The values travel as Base64 in custom headers:
//!
//! ```text
//! C→S: GET /gets/<group>/<ref>   Identity: <client modulus>
//! S→C: 401                      Identity: <server modulus>
//!                               Challenge: <sealed to client>
//! C→S: GET /gets/<group>/<ref>   Response: <to server's challenge>
//!                               Challenge: <sealed to server>
//! S→C: 200                      Response: <to client's challenge>
//!      [body]
//! ```
//!
//! The server closes after the 401, so the client's second request
//! rides a fresh connection; the pending-challenge table carries the
//! handshake state across the two connections. Both sides look the
//! peer's modulus up in their own store — a peer whose certificate
//! was never imported cannot authenticate.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use trella_auth::Authenticator;
use trella_encoding::base64;
use trella_identity::Identity;
use trella_store::Store;
use trella_transport::{Connection, HttpHeader, Mode, HTTP_UNAUTHORIZED};

use crate::{OverlayError, Result, CHALLENGE_TIME_SECS};

/// Header carrying a peer's public modulus.
pub const IDENTITY_HEADER: &str = "Identity";
/// Header carrying a sealed challenge.
pub const CHALLENGE_HEADER: &str = "Challenge";
/// Header carrying a challenge response.
pub const RESPONSE_HEADER: &str = "Response";

const KEEP_ALIVE: &str = "Connection: Keep-Alive\r\n";

/// Maps pending-challenge contexts to the identity being challenged,
/// so a verified response resolves back to a peer.
pub struct AuthTokens {
    next: AtomicU64,
    map: Mutex<HashMap<u64, Identity>>,
}

impl Default for AuthTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthTokens {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Record `peer` under a fresh non-zero token.
    pub fn issue(&self, peer: Identity) -> u64 {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(token, peer);
        token
    }

    /// Resolve and consume a token.
    pub fn redeem(&self, token: u64) -> Option<Identity> {
        self.lock().remove(&token)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Identity>> {
        match self.map.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Append a Base64 header line.
pub fn append_value(extra: &mut String, name: &str, value: &[u8]) {
    extra.push_str(name);
    extra.push_str(": ");
    extra.push_str(&base64::encode_compact(value));
    extra.push_str("\r\n");
}

/// Decode a Base64 header value.
pub fn header_bytes(header: &HttpHeader, name: &str) -> Option<Vec<u8>> {
    header.field(name).map(|v| base64::decode_str(v))
}

/// Outcome of the server side of the handshake.
pub enum ServerAuth {
    /// Not a `/gets/` request: no authentication, header pushed back.
    Public,
    /// Handshake complete. `response_header` must ride on the 200 so
    /// the client can verify us; the request header is pushed back.
    Authenticated {
        peer: Identity,
        response_header: String,
    },
}

/// Run the server side over one inbound HTTP connection.
///
/// Returns `Ok(None)` when this connection was consumed by issuing
/// the 401 challenge — the caller just closes it; the client comes
/// back on a new connection that completes the handshake.
pub async fn server_handshake(
    store: &Store,
    auth: &Authenticator,
    local: Option<&Identity>,
    tokens: &AuthTokens,
    conn: &mut Connection,
) -> Result<Option<ServerAuth>> {
    let header = conn.read_http_header().await?;
    if !header.start_line().starts_with("GET /gets/") {
        let raw = header.raw().to_owned();
        conn.unget(raw.as_bytes());
        return Ok(Some(ServerAuth::Public));
    }

    if let Some(modulus) = header_bytes(&header, IDENTITY_HEADER) {
        // First contact: challenge the claimed identity.
        let local = local.ok_or(OverlayError::NoLocalIdentity)?;
        let (_, peer) = store
            .find_identity(None, false, Some(&modulus), 0)
            .ok_or(OverlayError::AuthFailed("unknown peer identity"))?;
        let token = tokens.issue(peer.clone());
        let chal = auth.challenge(&peer, CHALLENGE_TIME_SECS, token)?;

        let mut extra = KEEP_ALIVE.to_string();
        append_value(&mut extra, IDENTITY_HEADER, &local.public_key_bytes());
        append_value(&mut extra, CHALLENGE_HEADER, &chal);
        conn.write_http_response(HTTP_UNAUTHORIZED, &extra, None)
            .await?;
        tracing::trace!(peer = ?peer.name(), "transfer challenge issued");
        return Ok(None);
    }

    let response = header_bytes(&header, RESPONSE_HEADER)
        .ok_or(OverlayError::AuthFailed("missing response header"))?;
    let challenge = header_bytes(&header, CHALLENGE_HEADER)
        .ok_or(OverlayError::AuthFailed("missing challenge header"))?;

    let token = auth.verify(&response);
    if token == 0 {
        return Err(OverlayError::AuthFailed("response did not verify"));
    }
    let peer = tokens
        .redeem(token)
        .ok_or(OverlayError::AuthFailed("stale challenge token"))?;

    let ours = auth.respond(&challenge)?;
    let mut response_header = String::new();
    append_value(&mut response_header, RESPONSE_HEADER, &ours);

    let raw = header.raw().to_owned();
    conn.unget(raw.as_bytes());
    tracing::trace!(peer = ?peer.name(), "transfer peer authenticated");
    Ok(Some(ServerAuth::Authenticated {
        peer,
        response_header,
    }))
}

/// Run the client side: send the request, complete the mutual
/// handshake when challenged, and verify the server.
///
/// On return the final response header sits in the returned
/// connection's unget buffer, ready for status and length parsing.
/// For secure requests the server closes after its 401, so the
/// second round rides a freshly dialed connection.
#[allow(clippy::too_many_arguments)]
pub async fn client_handshake(
    store: &Store,
    auth: &Authenticator,
    local: Option<&Identity>,
    tokens: &AuthTokens,
    mut conn: Connection,
    target: (Ipv4Addr, u16),
    path: &str,
    secure: bool,
) -> Result<Connection> {
    let mut extra = KEEP_ALIVE.to_string();
    if secure {
        let local = local.ok_or(OverlayError::NoLocalIdentity)?;
        append_value(&mut extra, IDENTITY_HEADER, &local.public_key_bytes());
    }
    conn.write_http_request("GET", path, &extra, None).await?;

    let header = conn.read_http_header().await?;
    if !secure {
        let raw = header.raw().to_owned();
        conn.unget(raw.as_bytes());
        return Ok(conn);
    }

    let server_modulus = header_bytes(&header, IDENTITY_HEADER)
        .ok_or(OverlayError::AuthFailed("missing server identity"))?;
    let server_challenge = header_bytes(&header, CHALLENGE_HEADER)
        .ok_or(OverlayError::AuthFailed("missing server challenge"))?;
    let (_, server) = store
        .find_identity(None, false, Some(&server_modulus), 0)
        .ok_or(OverlayError::AuthFailed("unknown server identity"))?;

    // The server closed after the 401; come back fresh.
    drop(conn);
    let mut conn = Connection::connect(Mode::Http, target.0, target.1, None).await?;

    let token = tokens.issue(server.clone());
    let our_challenge = auth.challenge(&server, CHALLENGE_TIME_SECS, token)?;
    let our_response = auth.respond(&server_challenge)?;

    let mut extra = KEEP_ALIVE.to_string();
    append_value(&mut extra, RESPONSE_HEADER, &our_response);
    append_value(&mut extra, CHALLENGE_HEADER, &our_challenge);
    conn.write_http_request("GET", path, &extra, None).await?;

    let header = conn.read_http_header().await?;
    let server_response = header_bytes(&header, RESPONSE_HEADER)
        .ok_or(OverlayError::AuthFailed("server sent no response"))?;
    let token = auth.verify(&server_response);
    if token == 0 {
        return Err(OverlayError::AuthFailed("server response did not verify"));
    }
    tokens.redeem(token);

    let raw = header.raw().to_owned();
    conn.unget(raw.as_bytes());
    tracing::trace!(server = ?server.name(), "transfer server authenticated");
    Ok(conn)
}
