//! File transfer workers.
//!
//! Three envelopes, chosen by URL and entry kind:
//!
//! - `GET /get/<ref>/<name>` — public transfer, plaintext bytes.
//! - `GET /gets/<group>/<ref-hex>` — group transfer: mutual
//!   authentication first, then the bytes stream under the group key
//!   (IV prepended, digest appended).
//! - the group's `key` file — served RSA-sealed to the authenticated
//!   requester's public key, gated by the group's accept callback.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use trella_crypto::{stream, CipherOpts, SessionKey};
use trella_transport::http::CONTENT_TYPE_DEFAULT;
use trella_transport::{Connection, Mode, HTTP_NOT_FOUND, HTTP_OK};

use crate::auth_http::{self, ServerAuth};
use crate::node::{FileHandle, GetCallback, GetEvent, Node};
use crate::{OverlayError, Result, SECURE_PREFIX};

const NOT_FOUND_BODY: &str = "<B>404 NOT FOUND</B>\n";

/// Serve one inbound HTTP connection (the upload side).
///
/// Failures drop the transfer and the connection; the node keeps
/// serving.
pub(crate) async fn serve_upload(node: Arc<Node>, mut conn: Connection) {
    if let Err(e) = run_upload(&node, &mut conn).await {
        tracing::debug!(error = %e, "upload aborted");
    }
}

async fn run_upload(node: &Arc<Node>, conn: &mut Connection) -> Result<()> {
    let local = node.local_identity();
    let auth = auth_http::server_handshake(
        node.store(),
        node.auth(),
        local.as_ref(),
        node.tokens(),
        conn,
    )
    .await?;
    let (peer, response_header) = match auth {
        None => return Ok(()), // challenged; client returns on a new connection
        Some(ServerAuth::Public) => (None, String::new()),
        Some(ServerAuth::Authenticated {
            peer,
            response_header,
        }) => (Some(peer), response_header),
    };

    let header = conn.read_http_header().await?;
    let line = header.start_line().to_owned();

    if let Some(rest) = line.strip_prefix("GET /get/") {
        let Some(ref_id) = rest.split('/').next().and_then(|s| s.parse::<u32>().ok()) else {
            return not_found(conn).await;
        };
        return serve_public(node, conn, ref_id).await;
    }

    if let Some(rest) = line.strip_prefix("GET /gets/") {
        let path = rest.split_whitespace().next().unwrap_or(rest);
        let Some((group_name, ref_hex)) = path.split_once('/') else {
            return not_found(conn).await;
        };
        let Ok(ref_id) = u32::from_str_radix(ref_hex, 16) else {
            return not_found(conn).await;
        };
        return serve_group(node, conn, group_name, ref_id, peer, &response_header).await;
    }

    not_found(conn).await
}

/// `GET /get/<ref>/<name>`: plaintext bytes. Group-tagged entries
/// and key files never leave through this path — a ref probe must
/// not defeat the group envelope.
async fn serve_public(node: &Arc<Node>, conn: &mut Connection, ref_id: u32) -> Result<()> {
    let Some(entry) = node.collection().find_by_id(ref_id) else {
        return not_found(conn).await;
    };
    if entry.label().is_some() || entry.name().starts_with(SECURE_PREFIX) {
        return not_found(conn).await;
    }

    conn.write_http_response(HTTP_OK, "", Some((CONTENT_TYPE_DEFAULT, entry.size())))
        .await?;

    if let Some(path) = entry.path() {
        let mut file = tokio::fs::File::open(path).await?;
        stream::transfer(&mut file, conn).await?;
    } else if let Some(data) = entry.data() {
        conn.write_all(data).await?;
    }
    tracing::debug!(ref_id, name = entry.name(), "public transfer served");
    Ok(())
}

/// `GET /gets/<group>/<ref-hex>`: group-keyed streaming, or the
/// RSA-sealed key file.
async fn serve_group(
    node: &Arc<Node>,
    conn: &mut Connection,
    group_name: &str,
    ref_id: u32,
    peer: Option<trella_identity::Identity>,
    response_header: &str,
) -> Result<()> {
    let Some(key) = node.group_key(group_name) else {
        return not_found(conn).await;
    };
    let Some(entry) = node.collection().find_by_id(ref_id) else {
        return not_found(conn).await;
    };
    // The authenticated handshake is mandatory on this path.
    let Some(peer) = peer else {
        return not_found(conn).await;
    };

    let is_key = entry.name().starts_with(SECURE_PREFIX) && entry.name().ends_with("/key");
    if is_key {
        // Membership gate: the accept callback sees the requester's
        // certified common name.
        if let Some(accept) = node.group_accept(group_name) {
            let peer_name = peer.name().unwrap_or_default().to_owned();
            if !accept(group_name, &peer_name) {
                tracing::info!(group = group_name, peer = %peer_name, "key request denied");
                return not_found(conn).await;
            }
        }
        let Some(raw) = entry.data() else {
            return not_found(conn).await;
        };
        let sealed = peer.encrypt(raw)?;
        conn.write_http_response(
            HTTP_OK,
            response_header,
            Some((CONTENT_TYPE_DEFAULT, sealed.len() as u64)),
        )
        .await?;
        conn.write_all(&sealed).await?;
        tracing::info!(group = group_name, peer = ?peer.name(), "group key served");
        return Ok(());
    }

    let total = SessionKey::encrypted_len(entry.size() as usize, CipherOpts::default()) as u64;
    conn.write_http_response(
        HTTP_OK,
        response_header,
        Some((CONTENT_TYPE_DEFAULT, total)),
    )
    .await?;

    if let Some(path) = entry.path() {
        let mut file = tokio::fs::File::open(path).await?;
        key.encrypt_stream(&mut file, conn, CipherOpts::default())
            .await?;
    } else if let Some(data) = entry.data() {
        let sealed = key.encrypt(data)?;
        conn.write_all(&sealed).await?;
    }
    tracing::debug!(group = group_name, ref_id, "group transfer served");
    Ok(())
}

async fn not_found(conn: &mut Connection) -> Result<()> {
    conn.write_http_response(
        HTTP_NOT_FOUND,
        "",
        Some(("text/html", NOT_FOUND_BODY.len() as u64)),
    )
    .await?;
    conn.write_all(NOT_FOUND_BODY.as_bytes()).await?;
    Ok(())
}

/// Run one download (the client side); events go to `callback`.
pub(crate) async fn download(
    node: &Arc<Node>,
    file: &FileHandle,
    save_path: Option<PathBuf>,
    callback: &GetCallback,
) {
    match run_download(node, file, save_path, callback).await {
        Ok(size) => tracing::debug!(name = %file.name, size, "download complete"),
        Err(e) => {
            tracing::debug!(name = %file.name, error = %e, "download failed");
            callback(file, GetEvent::Error);
        }
    }
}

async fn run_download(
    node: &Arc<Node>,
    file: &FileHandle,
    save_path: Option<PathBuf>,
    callback: &GetCallback,
) -> Result<u64> {
    let secure = file.group.is_some();
    let is_key = secure && file.name == "key";
    let group_key = match &file.group {
        Some(name) if !is_key => Some(
            node.group_key(name)
                .ok_or(OverlayError::Unknown("group"))?,
        ),
        _ => None,
    };

    let path = match &file.group {
        Some(group) => format!("/gets/{group}/{:04x}", file.ref_id),
        None => format!("/get/{}/{}", file.ref_id, file.name),
    };

    let conn = Connection::connect(Mode::Http, file.ip, file.port, None).await?;
    let local = node.local_identity();
    let mut conn = auth_http::client_handshake(
        node.store(),
        node.auth(),
        local.as_ref(),
        node.tokens(),
        conn,
        (file.ip, file.port),
        &path,
        secure,
    )
    .await?;

    let header = conn.read_http_header().await?;
    if header.status() != Some(HTTP_OK) {
        return Err(OverlayError::TransferFailed("remote refused"));
    }
    let size = header
        .content_length()
        .filter(|&n| n > 0)
        .ok_or(OverlayError::TransferFailed("no content"))?;

    if is_key {
        // The key file arrives RSA-sealed to us, always in memory.
        let mut sealed = vec![0u8; size as usize];
        if conn.read_all(&mut sealed).await? < sealed.len() {
            return Err(OverlayError::TransferFailed("short body"));
        }
        let local = local.ok_or(OverlayError::NoLocalIdentity)?;
        let raw = local.decrypt(&sealed)?;
        let total = raw.len() as u64;
        callback(
            file,
            GetEvent::Done {
                data: Some(raw),
                size: total,
            },
        );
        return Ok(total);
    }

    if let Some(save) = save_path {
        let out = tokio::fs::File::create(&save).await?;
        let mut progress = ProgressWriter {
            inner: out,
            file,
            callback,
            transferred: 0,
        };
        let total = match &group_key {
            Some(key) => {
                key.decrypt_stream(&mut conn, &mut progress, CipherOpts::default())
                    .await?
            }
            None => stream::transfer(&mut conn, &mut progress).await?,
        };
        callback(
            file,
            GetEvent::Done {
                data: None,
                size: total,
            },
        );
        return Ok(total);
    }

    let mut body = vec![0u8; size as usize];
    if conn.read_all(&mut body).await? < body.len() {
        return Err(OverlayError::TransferFailed("short body"));
    }
    let data = match &group_key {
        Some(key) => key.decrypt(&body)?,
        None => body,
    };
    let total = data.len() as u64;
    callback(
        file,
        GetEvent::Done {
            data: Some(data),
            size: total,
        },
    );
    Ok(total)
}

/// Write adapter reporting progress to the get callback.
struct ProgressWriter<'a, W> {
    inner: W,
    file: &'a FileHandle,
    callback: &'a GetCallback,
    transferred: u64,
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<'_, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_write(cx, data) {
            Poll::Ready(Ok(n)) => {
                this.transferred += n as u64;
                (this.callback)(
                    this.file,
                    GetEvent::Progress {
                        transferred: this.transferred,
                    },
                );
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
