//! One accepted connection.
//!
//! A [`Client`] is created by the connector on accept and moved into exactly
//! one worker. Plain and TLS sockets share the same code path: after
//! [`Client::handshake`] both are just a boxed [`ClientStream`]. Every read
//! and write is bounded by the client timeout; a timeout surfaces as
//! [`io::ErrorKind::TimedOut`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

/// Any bidirectional byte stream a client can be served over.
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

enum Transport {
    Ready(Box<dyn ClientStream>),
    /// TLS connection whose handshake has not run yet.
    Handshake(TcpStream, TlsAcceptor),
    Closed,
}

pub struct Client {
    transport: Transport,
    remote_addr: SocketAddr,
    timeout: Duration,
}

impl Client {
    pub fn plain(stream: TcpStream, remote_addr: SocketAddr, timeout: Duration) -> Self {
        Self::from_stream(stream, remote_addr, timeout)
    }

    pub fn tls(
        stream: TcpStream,
        acceptor: TlsAcceptor,
        remote_addr: SocketAddr,
        timeout: Duration,
    ) -> Self {
        Self {
            transport: Transport::Handshake(stream, acceptor),
            remote_addr,
            timeout,
        }
    }

    /// Wraps an arbitrary stream, e.g. one end of `tokio::io::duplex`.
    pub fn from_stream<S: ClientStream + 'static>(
        stream: S,
        remote_addr: SocketAddr,
        timeout: Duration,
    ) -> Self {
        Self {
            transport: Transport::Ready(Box::new(stream)),
            remote_addr,
            timeout,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Peer IP without the port.
    pub fn remote_ip(&self) -> String {
        self.remote_addr.ip().to_string()
    }

    /// Completes the TLS handshake if there is one pending. No-op for plain
    /// connections.
    pub async fn handshake(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.transport, Transport::Closed) {
            Transport::Handshake(stream, acceptor) => {
                let tls = timeout(self.timeout, acceptor.accept(stream))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out"))??;
                self.transport = Transport::Ready(Box::new(tls));
                Ok(())
            }
            other => {
                self.transport = other;
                Ok(())
            }
        }
    }

    /// Splits a ready client into its read and write halves.
    pub fn into_split(self) -> io::Result<(ClientReader, ClientWriter)> {
        match self.transport {
            Transport::Ready(stream) => {
                let (read, write) = tokio::io::split(stream);
                Ok((
                    ClientReader {
                        inner: read,
                        timeout: self.timeout,
                    },
                    ClientWriter::new(Box::new(write), self.timeout),
                ))
            }
            Transport::Handshake(..) => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "tls handshake has not completed",
            )),
            Transport::Closed => Err(io::Error::new(io::ErrorKind::NotConnected, "client closed")),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = match self.transport {
            Transport::Ready(_) => "ready",
            Transport::Handshake(..) => "handshake",
            Transport::Closed => "closed",
        };
        f.debug_struct("Client")
            .field("remote_addr", &self.remote_addr)
            .field("transport", &transport)
            .finish()
    }
}

pub struct ClientReader {
    inner: ReadHalf<Box<dyn ClientStream>>,
    timeout: Duration,
}

impl ClientReader {
    /// Reads into `buf`. `Ok(0)` means the peer closed the connection.
    pub async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        timeout(self.timeout, self.inner.read(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "recv timed out"))?
    }
}

pub struct ClientWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
    timeout: Duration,
}

impl ClientWriter {
    pub fn new(inner: Box<dyn AsyncWrite + Send + Unpin>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Writes all of `data`.
    pub async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        timeout(self.timeout, async {
            self.inner.write_all(data).await?;
            self.inner.flush().await
        })
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "send timed out"))?
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        timeout(self.timeout, self.inner.shutdown())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "shutdown timed out"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_client_round_trip() {
        let (server, mut peer) = tokio::io::duplex(256);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let mut client = Client::from_stream(server, addr, Duration::from_secs(1));
        client.handshake().await.unwrap();
        assert_eq!(client.remote_ip(), "127.0.0.1");

        let (mut reader, mut writer) = client.into_split().unwrap();

        peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 8];
        let n = reader.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        writer.send(b"pong").await.unwrap();
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test(start_paused = true)]
    async fn recv_times_out() {
        let (server, _peer) = tokio::io::duplex(64);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let client = Client::from_stream(server, addr, Duration::from_millis(50));
        let (mut reader, _writer) = client.into_split().unwrap();

        let mut buf = [0u8; 8];
        let err = reader.recv(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
