//! Byte-level transport: plain TCP, optionally upgraded to TLS in place.
//!
//! The upgrade methods consume the transport so a half-upgraded stream can
//! never be written to. Both directions land in the same [`Transport::Tls`]
//! variant via `tokio_rustls`'s unified stream type.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::{Error, Result};

#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plaintext TCP stream
    Plain(TcpStream),
    /// TLS session over TCP, either accepted or initiated
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::TlsStream<TcpStream>>),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Plain(_) => f.write_str("Transport::Plain(TcpStream)"),
            #[cfg(feature = "tls")]
            Transport::Tls(_) => f.write_str("Transport::Tls(TlsStream)"),
        }
    }
}

impl Transport {
    /// Whether the stream is running over an established TLS session.
    pub fn is_secured(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            matches!(self, Transport::Tls(_))
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let addr = match self {
            Transport::Plain(stream) => stream.peer_addr()?,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.get_ref().0.peer_addr()?,
        };
        Ok(addr)
    }

    /// Write all bytes to the stream.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.write_all(buf).await?,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.write_all(buf).await?,
        }
        Ok(())
    }

    /// Flush buffered bytes out to the peer.
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush().await?,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Read whatever is available into `buf`, returning the byte count.
    /// Zero means the peer closed the stream.
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Plain(stream) => stream.read_buf(buf).await?,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Read exactly `buf.len()` bytes. An early close surfaces as
    /// [`Error::ConnectionClosed`].
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let res = match self {
            Transport::Plain(stream) => stream.read_exact(buf).await,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.read_exact(buf).await,
        };
        match res {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::ConnectionClosed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close the write half and let in-flight bytes drain.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Plain(stream) => stream.shutdown().await?,
            #[cfg(feature = "tls")]
            Transport::Tls(stream) => stream.shutdown().await?,
        }
        Ok(())
    }

    /// Run the acceptor-side handshake over a plaintext stream.
    ///
    /// Consumes `self`; an already-secured transport is a caller bug and
    /// reported as [`Error::InvalidState`].
    #[cfg(feature = "tls")]
    pub async fn accept_tls(self, acceptor: tokio_rustls::TlsAcceptor) -> Result<Self> {
        match self {
            Transport::Plain(stream) => {
                let tls_stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|e| Error::Handshake(format!("accept handshake failed: {e}")))?;
                Ok(Transport::Tls(Box::new(tls_stream.into())))
            }
            Transport::Tls(_) => Err(Error::InvalidState {
                expected: "plaintext transport".into(),
                actual: "secured transport".into(),
            }),
        }
    }

    /// Run the initiator-side handshake over a plaintext stream.
    #[cfg(feature = "tls")]
    pub async fn connect_tls(
        self,
        connector: tokio_rustls::TlsConnector,
        server_name: rustls_pki_types::ServerName<'static>,
    ) -> Result<Self> {
        match self {
            Transport::Plain(stream) => {
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| Error::Handshake(format!("connect handshake failed: {e}")))?;
                Ok(Transport::Tls(Box::new(tls_stream.into())))
            }
            Transport::Tls(_) => Err(Error::InvalidState {
                expected: "plaintext transport".into(),
                actual: "secured transport".into(),
            }),
        }
    }
}
