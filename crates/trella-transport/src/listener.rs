//! Listening sockets.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};

use crate::connection::{Connection, Mode};
use crate::{Result, TransportError, LISTEN_BACKLOG};

/// How long the in-use probe waits for a loopback connect.
const PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// How many successive ports to try before giving up.
const PORT_SCAN_LIMIT: u16 = 64;

/// A listening socket producing [`Connection`]s.
#[derive(Debug)]
pub struct Listener {
    mode: Mode,
    port: u16,
    inner: tokio::net::TcpListener,
}

impl Listener {
    /// Bind a listener.
    ///
    /// A `port` of zero binds an OS-assigned ephemeral port. A
    /// nonzero port is probed first with a loopback connect: if
    /// something answers, the port is taken and the next one is
    /// tried. REUSEADDR is set so restarts do not trip over
    /// TIME_WAIT sockets.
    pub async fn bind(mode: Mode, port: u16) -> Result<Self> {
        if port == 0 {
            let listener = bind_port(0)?;
            let port = listener.local_addr()?.port();
            tracing::debug!(port, "listener bound (ephemeral)");
            return Ok(Self {
                mode,
                port,
                inner: listener,
            });
        }

        let mut candidate = port;
        for _ in 0..PORT_SCAN_LIMIT {
            let probe = tokio::time::timeout(
                PROBE_TIMEOUT,
                TcpStream::connect(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::LOCALHOST,
                    candidate,
                ))),
            )
            .await;
            let in_use = matches!(probe, Ok(Ok(_)));
            if !in_use {
                if let Ok(listener) = bind_port(candidate) {
                    tracing::debug!(port = candidate, "listener bound");
                    return Ok(Self {
                        mode,
                        port: candidate,
                        inner: listener,
                    });
                }
            }
            candidate = candidate.checked_add(1).ok_or(TransportError::NoFreePort)?;
        }
        Err(TransportError::NoFreePort)
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept the next connection.
    ///
    /// With `detect` set, the first bytes are peeked to classify the
    /// stream: `GET `, `PUT `, or `POST ` means HTTP, anything else
    /// raw. The peeked bytes go back into the unget buffer, so the
    /// peer-visible stream is unchanged.
    pub async fn accept(&self, detect: bool) -> Result<Connection> {
        let (stream, peer) = self.inner.accept().await?;
        let mut conn = Connection::accepted(self.mode, stream, peer);

        if detect {
            let mut head = [0u8; 64];
            let n = conn.read(&mut head).await?;
            if n == 0 {
                return Err(TransportError::BadHeader);
            }
            conn.unget(&head[..n]);
            let mode = if head.starts_with(b"GET ")
                || head.starts_with(b"PUT ")
                || head.starts_with(b"POST ")
            {
                Mode::Http
            } else {
                Mode::Raw
            };
            conn.set_mode(mode);
            tracing::trace!(peer = %peer, ?mode, "connection classified");
        }

        Ok(conn)
    }
}

fn bind_port(port: u16) -> Result<tokio::net::TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::UNSPECIFIED,
        port,
    )))?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ephemeral_bind_reports_port() {
        let listener = Listener::bind(Mode::Raw, 0).await.expect("bind");
        assert_ne!(listener.port(), 0);
    }

    #[tokio::test]
    async fn test_busy_port_moves_to_next() {
        let first = Listener::bind(Mode::Raw, 0).await.expect("bind first");
        let busy = first.port();
        // Keep `first` accepting so the probe connect succeeds.
        let accept_task = tokio::spawn(async move {
            let _ = first.accept(false).await;
        });

        let second = Listener::bind(Mode::Raw, busy).await.expect("bind second");
        assert_ne!(second.port(), busy);
        accept_task.abort();
    }

    #[tokio::test]
    async fn test_detection_classifies_and_preserves_bytes() {
        let listener = Listener::bind(Mode::Raw, 0).await.expect("bind");
        let port = listener.port();

        let client = tokio::spawn(async move {
            let mut conn = Connection::connect(Mode::Http, Ipv4Addr::LOCALHOST, port, None)
                .await
                .expect("connect");
            conn.write_all(b"GET /get/1/alpha.txt HTTP/1.0\r\n\r\n")
                .await
                .expect("write");
        });

        let mut conn = listener.accept(true).await.expect("accept");
        assert_eq!(conn.mode(), Mode::Http);
        let mut buf = [0u8; 33];
        let n = conn.read_all(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"GET /get/1/alpha.txt HTTP/1.0\r\n\r\n");
        client.await.expect("client");
    }

    #[tokio::test]
    async fn test_detection_raw_banner() {
        let listener = Listener::bind(Mode::Raw, 0).await.expect("bind");
        let port = listener.port();

        let client = tokio::spawn(async move {
            let mut conn = Connection::connect(Mode::Raw, Ipv4Addr::LOCALHOST, port, None)
                .await
                .expect("connect");
            conn.write_all(b"GNUTELLA CONNECT/0.4\n\n")
                .await
                .expect("write");
        });

        let conn = listener.accept(true).await.expect("accept");
        assert_eq!(conn.mode(), Mode::Raw);
        client.await.expect("client");
    }
}
