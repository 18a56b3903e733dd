//! The connection: a TCP stream with a pushback buffer.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::{proxy, Result, TransportError};

/// Connection framing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Raw application bytes (the overlay packet stream).
    Raw,
    /// HTTP requests and responses (the transfer surface).
    Http,
}

/// Connection direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// A byte-stream connection to one peer.
///
/// Reads always drain the unget buffer before touching the socket,
/// so bytes pushed back with [`Connection::unget`] reappear in
/// order. All I/O takes `&mut self`; callers that share a
/// connection across tasks serialize through their own channel or
/// lock.
#[derive(Debug)]
pub struct Connection {
    mode: Mode,
    dir: Direction,
    peer_ip: Ipv4Addr,
    peer_port: u16,
    proxied: bool,
    unget: Vec<u8>,
    stream: TcpStream,
}

impl Connection {
    /// Open an outbound connection.
    ///
    /// With no process-wide proxy configured this is a plain direct
    /// connect (a `timeout` of `None` blocks until the OS gives up).
    /// With a proxy configured, the direct path is tried first under
    /// the proxy's direct-timeout; on failure the proxy is dialed
    /// with the caller's timeout, and the result is latched in
    /// [`Connection::is_proxied`].
    pub async fn connect(
        mode: Mode,
        ip: Ipv4Addr,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let target = SocketAddr::V4(SocketAddrV4::new(ip, port));

        let (stream, proxied) = match proxy::proxy() {
            None => (dial(target, timeout).await?, false),
            Some(cfg) => {
                let direct_timeout = timeout.unwrap_or(cfg.direct_timeout);
                match dial(target, Some(direct_timeout)).await {
                    Ok(stream) => (stream, false),
                    Err(direct_err) => {
                        let via = SocketAddr::V4(SocketAddrV4::new(cfg.ip, cfg.port));
                        tracing::debug!(%target, error = %direct_err, "direct connect failed, trying proxy");
                        let stream = dial(via, timeout)
                            .await
                            .map_err(|_| TransportError::ProxyExhausted)?;
                        (stream, true)
                    }
                }
            }
        };

        tracing::debug!(%target, proxied, "connection opened");
        Ok(Self {
            mode,
            dir: Direction::Outbound,
            peer_ip: ip,
            peer_port: port,
            proxied,
            unget: Vec::new(),
            stream,
        })
    }

    pub(crate) fn accepted(mode: Mode, stream: TcpStream, peer: SocketAddr) -> Self {
        let (peer_ip, peer_port) = match peer {
            SocketAddr::V4(v4) => (*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => (
                v6.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
                v6.port(),
            ),
        };
        Self {
            mode,
            dir: Direction::Inbound,
            peer_ip,
            peer_port,
            proxied: false,
            unget: Vec::new(),
            stream,
        }
    }

    /// Current framing mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Connection direction.
    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// Peer IPv4 address.
    pub fn peer_ip(&self) -> Ipv4Addr {
        self.peer_ip
    }

    /// Peer port.
    pub fn peer_port(&self) -> u16 {
        self.peer_port
    }

    /// Whether this connection runs through the fallback proxy.
    pub fn is_proxied(&self) -> bool {
        self.proxied
    }

    /// Push bytes back onto the read side. They are returned by the
    /// next reads, ahead of both earlier ungets and the socket.
    pub fn unget(&mut self, data: &[u8]) {
        let mut fresh = Vec::with_capacity(data.len() + self.unget.len());
        fresh.extend_from_slice(data);
        fresh.append(&mut self.unget);
        self.unget = fresh;
    }

    /// Read into `buf`, preferring the unget buffer. Returns the
    /// byte count; zero means the peer closed (and no pushback
    /// remains).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.unget.is_empty() {
            let n = self.unget.len().min(buf.len());
            buf[..n].copy_from_slice(&self.unget[..n]);
            self.unget.drain(..n);
            return Ok(n);
        }
        Ok(self.stream.read(buf).await?)
    }

    /// Read until `buf` is full or the peer closes. Returns the
    /// bytes read, which is short only at EOF.
    pub async fn read_all(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Write the whole buffer.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Split into independently owned read and write halves, so one
    /// task can block on reads while others write. Pending unget
    /// bytes travel with the read half.
    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        let (read, write) = self.stream.into_split();
        (
            ReadHalf {
                unget: self.unget,
                inner: read,
            },
            WriteHalf { inner: write },
        )
    }
}

/// The read side of a split [`Connection`].
#[derive(Debug)]
pub struct ReadHalf {
    unget: Vec<u8>,
    inner: tokio::net::tcp::OwnedReadHalf,
}

impl ReadHalf {
    /// Read, preferring the unget buffer; zero means EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.unget.is_empty() {
            let n = self.unget.len().min(buf.len());
            buf[..n].copy_from_slice(&self.unget[..n]);
            self.unget.drain(..n);
            return Ok(n);
        }
        Ok(self.inner.read(buf).await?)
    }

    /// Read until full or EOF; short only at EOF.
    pub async fn read_all(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl AsyncRead for ReadHalf {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.unget.is_empty() {
            let n = self.unget.len().min(buf.remaining());
            let this = &mut *self;
            buf.put_slice(&this.unget[..n]);
            this.unget.drain(..n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// The write side of a split [`Connection`].
#[derive(Debug)]
pub struct WriteHalf {
    inner: tokio::net::tcp::OwnedWriteHalf,
}

impl WriteHalf {
    /// Write the whole buffer.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

impl AsyncWrite for WriteHalf {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
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

async fn dial(target: SocketAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, TcpStream::connect(target))
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(TransportError::Io),
        None => TcpStream::connect(target).await.map_err(TransportError::Io),
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.unget.is_empty() {
            let n = self.unget.len().min(buf.remaining());
            let this = &mut *self;
            buf.put_slice(&this.unget[..n]);
            this.unget.drain(..n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Listener;

    #[tokio::test]
    async fn test_unget_precedes_socket() {
        let listener = Listener::bind(Mode::Raw, 0).await.expect("bind");
        let port = listener.port();
        let server = tokio::spawn(async move {
            let mut conn = listener.accept(false).await.expect("accept");
            conn.write_all(b"socket bytes").await.expect("write");
        });

        let mut conn = Connection::connect(Mode::Raw, Ipv4Addr::LOCALHOST, port, None)
            .await
            .expect("connect");
        conn.unget(b"later ");
        conn.unget(b"first ");

        let mut buf = [0u8; 24];
        let n = conn.read_all(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"first later socket bytes");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_read_all_is_short_only_at_eof() {
        let listener = Listener::bind(Mode::Raw, 0).await.expect("bind");
        let port = listener.port();
        let server = tokio::spawn(async move {
            let mut conn = listener.accept(false).await.expect("accept");
            conn.write_all(b"abc").await.expect("write");
        });

        let mut conn = Connection::connect(Mode::Raw, Ipv4Addr::LOCALHOST, port, None)
            .await
            .expect("connect");
        let mut buf = [0u8; 16];
        let n = conn.read_all(&mut buf).await.expect("read");
        assert_eq!(&buf[..n], b"abc");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_connect_timeout_fires() {
        // RFC 5737 TEST-NET address: nothing answers.
        let err = Connection::connect(
            Mode::Raw,
            Ipv4Addr::new(192, 0, 2, 1),
            6346,
            Some(Duration::from_millis(50)),
        )
        .await
        .expect_err("must time out");
        assert!(matches!(
            err,
            TransportError::ConnectTimeout | TransportError::Io(_)
        ));
    }
}
