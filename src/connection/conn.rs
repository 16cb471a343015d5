//! Core connection type for both sides of the proxy.
//!
//! A `Connection` wraps one accepted client socket (frontend role) or one
//! dialed backend socket (backend role) and drives the security negotiation
//! exchange: an 8-byte probe, a single `'S'`/`'N'` marker byte, then
//! optionally a TLS handshake on the same stream. Every read in the exchange
//! runs under the explicit negotiation timeout from [`TlsSettings`].

use bytes::BytesMut;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::Instrument;

use super::state::SecurityState;
use super::tls::TlsSettings;
use super::transport::Transport;
use crate::context::ExecContext;
use crate::protocol::{
    decode_packet_header, encode_probe, encode_reply, NegotiationReply, PacketHeader,
};
use crate::{Error, Result};

/// Grace period for draining close_notify and FIN during teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Which side of the proxy this connection faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Accepted from a database client; we answer the probe
    Frontend,
    /// Dialed to a pooled backend; we send the probe
    Backend,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Frontend => "frontend",
            ConnectionRole::Backend => "backend",
        }
    }
}

impl std::fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the acceptor-side negotiation.
#[derive(Debug)]
pub enum InboundNegotiation {
    /// The probe was consumed and answered; inspect [`Connection::state`]
    /// for whether the stream ended up secured or plaintext
    Negotiated,
    /// The first 8 bytes were an ordinary packet header, not the probe.
    /// Nothing was consumed beyond the header; the caller owns the rest of
    /// the packet
    Passthrough(PacketHeader),
}

/// One proxied stream with its security state.
pub struct Connection {
    role: ConnectionRole,
    state: SecurityState,
    transport: Option<Transport>,
    node_id: Option<i32>,
    peer_host: Option<String>,
    mandate_security: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("node_id", &self.node_id)
            .field("secured", &self.is_secured())
            .finish()
    }
}

impl Connection {
    /// Wrap a stream accepted from a database client.
    pub fn frontend(stream: TcpStream) -> Self {
        Self {
            role: ConnectionRole::Frontend,
            state: SecurityState::Unnegotiated,
            transport: Some(Transport::Plain(stream)),
            node_id: None,
            peer_host: None,
            mandate_security: false,
        }
    }

    /// Wrap a stream dialed to a pooled backend. The hostname is kept for
    /// TLS server name indication; the node id for failure reporting.
    pub fn backend(stream: TcpStream, host: impl Into<String>, node_id: i32) -> Self {
        Self {
            role: ConnectionRole::Backend,
            state: SecurityState::Unnegotiated,
            transport: Some(Transport::Plain(stream)),
            node_id: Some(node_id),
            peer_host: Some(host.into()),
            mandate_security: false,
        }
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn state(&self) -> SecurityState {
        self.state
    }

    pub fn node_id(&self) -> Option<i32> {
        self.node_id
    }

    /// Whether bytes currently travel over an established TLS session.
    pub fn is_secured(&self) -> bool {
        self.transport
            .as_ref()
            .map(Transport::is_secured)
            .unwrap_or(false)
    }

    /// Run the acceptor side of security negotiation.
    ///
    /// Reads exactly 8 bytes under the negotiation timeout. If they are not
    /// the probe the header is handed back untouched via
    /// [`InboundNegotiation::Passthrough`] and the caller continues its own
    /// startup handling. Otherwise a single `'S'` or `'N'` is written and
    /// flushed, and on `'S'` the server-side handshake runs on the same
    /// stream.
    pub async fn negotiate_inbound(&mut self, ctx: &ExecContext) -> Result<InboundNegotiation> {
        if self.role != ConnectionRole::Frontend {
            return Err(Error::InvalidState {
                expected: "frontend role".into(),
                actual: self.role.to_string(),
            });
        }
        if ctx.is_shutting_down() {
            return Err(Error::InvalidState {
                expected: "accepting connections".into(),
                actual: "shutting down".into(),
            });
        }

        let settings = ctx.security();
        self.mandate_security = settings.policy().mandates_security();

        async move {
            let started = Instant::now();
            let deadline = settings.negotiate_timeout();

            let mut probe = [0u8; 8];
            {
                let transport = self.transport_mut()?;
                timed(deadline, "negotiation probe read", transport.read_exact(&mut probe))
                    .await?;
            }

            let header = decode_packet_header(&probe);
            if !header.is_negotiation_probe() {
                tracing::debug!(
                    length = header.length,
                    code = header.code,
                    "first packet is not a negotiation probe"
                );
                crate::metrics::counters::negotiation_completed(
                    self.role.as_str(),
                    "passthrough",
                );
                return Ok(InboundNegotiation::Passthrough(header));
            }

            self.state.transition(SecurityState::Requested)?;

            if !settings.offers_security() {
                self.write_reply(NegotiationReply::Declined).await?;
                self.state.transition(SecurityState::Declined)?;
                tracing::debug!("declined security request, continuing in plaintext");
                crate::metrics::counters::negotiation_completed(self.role.as_str(), "declined");
                return Ok(InboundNegotiation::Negotiated);
            }

            self.write_reply(NegotiationReply::Accepted).await?;
            match self.secure_inbound(settings).await {
                Ok(()) => {
                    tracing::info!("secured inbound connection");
                    crate::metrics::counters::negotiation_completed(self.role.as_str(), "secured");
                    crate::metrics::histograms::negotiation_duration(
                        self.role.as_str(),
                        started.elapsed().as_millis() as u64,
                    );
                    Ok(InboundNegotiation::Negotiated)
                }
                Err(e) => {
                    crate::metrics::counters::negotiation_completed(self.role.as_str(), "failed");
                    Err(e)
                }
            }
        }
        .instrument(tracing::info_span!("negotiate_inbound"))
        .await
    }

    /// Run the initiator side of security negotiation.
    ///
    /// Under a `Disable` policy (or with security support compiled out) the
    /// connection is marked `Declined` locally and nothing is written. The
    /// peer declining with `'N'` is also `Declined`; a `Require` policy is
    /// enforced later, at I/O time. Any reply byte other than `'S'`/`'N'`
    /// poisons the connection.
    pub async fn negotiate_outbound(&mut self, ctx: &ExecContext) -> Result<()> {
        if self.role != ConnectionRole::Backend {
            return Err(Error::InvalidState {
                expected: "backend role".into(),
                actual: self.role.to_string(),
            });
        }
        if ctx.is_shutting_down() {
            return Err(Error::InvalidState {
                expected: "accepting connections".into(),
                actual: "shutting down".into(),
            });
        }

        let settings = ctx.security();
        self.mandate_security = settings.policy().mandates_security();
        let node = self.node_id.unwrap_or(-1);

        async move {
            let started = Instant::now();
            let deadline = settings.negotiate_timeout();

            if !settings.initiates_security() {
                self.state.transition(SecurityState::Declined)?;
                tracing::debug!("security not initiated, continuing in plaintext");
                crate::metrics::counters::negotiation_completed(self.role.as_str(), "declined");
                return Ok(());
            }

            let mut buf = BytesMut::with_capacity(8);
            encode_probe(&mut buf);
            {
                let transport = self.transport_mut()?;
                transport.write_all(&buf).await?;
                transport.flush().await?;
            }
            self.state.transition(SecurityState::Requested)?;

            let mut reply = [0u8; 1];
            {
                let transport = self.transport_mut()?;
                timed(deadline, "negotiation reply read", transport.read_exact(&mut reply))
                    .await?;
            }

            match NegotiationReply::from_byte(reply[0]) {
                Some(NegotiationReply::Accepted) => match self.secure_outbound(settings).await {
                    Ok(()) => {
                        tracing::info!("secured outbound connection");
                        crate::metrics::counters::negotiation_completed(
                            self.role.as_str(),
                            "secured",
                        );
                        crate::metrics::histograms::negotiation_duration(
                            self.role.as_str(),
                            started.elapsed().as_millis() as u64,
                        );
                        Ok(())
                    }
                    Err(e) => {
                        crate::metrics::counters::negotiation_completed(
                            self.role.as_str(),
                            "failed",
                        );
                        Err(e)
                    }
                },
                Some(NegotiationReply::Declined) => {
                    self.state.transition(SecurityState::Declined)?;
                    tracing::debug!("peer declined security, continuing in plaintext");
                    crate::metrics::counters::negotiation_completed(self.role.as_str(), "declined");
                    Ok(())
                }
                None => {
                    self.state.transition(SecurityState::Failed)?;
                    crate::metrics::counters::negotiation_completed(self.role.as_str(), "failed");
                    Err(Error::Protocol(format!(
                        "unexpected negotiation reply: 0x{:02X}",
                        reply[0]
                    )))
                }
            }
        }
        .instrument(tracing::info_span!("negotiate_outbound", node))
        .await
    }

    /// Write a message to the peer, routed through the TLS session when one
    /// is active.
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        self.guard_io()?;
        let node = self.node_id;
        let transport = self.transport_mut()?;
        let res = async {
            transport.write_all(buf).await?;
            transport.flush().await
        }
        .await;
        if let (Err(e), Some(node)) = (&res, node) {
            tracing::warn!(node, error = %e, "backend write failed");
        }
        res
    }

    /// Read available bytes from the peer into `buf`. A peer that closed
    /// the stream surfaces as [`Error::ConnectionClosed`].
    pub async fn receive(&mut self, buf: &mut BytesMut) -> Result<usize> {
        self.guard_io()?;
        let node = self.node_id;
        let transport = self.transport_mut()?;
        let res = match transport.read_buf(buf).await {
            Ok(0) => Err(Error::ConnectionClosed),
            other => other,
        };
        if let (Err(e), Some(node)) = (&res, node) {
            tracing::warn!(node, error = %e, "backend read failed");
        }
        res
    }

    /// Tear the connection down. For a secured stream this sends
    /// close_notify first; draining is best-effort under a short grace
    /// period and never blocks teardown.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            match tokio::time::timeout(CLOSE_GRACE, transport.shutdown()).await {
                Ok(res) => res?,
                Err(_) => {
                    tracing::debug!("close grace period expired before shutdown completed");
                }
            }
        }
        Ok(())
    }

    #[cfg(feature = "tls")]
    async fn secure_inbound(&mut self, settings: &TlsSettings) -> Result<()> {
        let config = settings
            .server_config()
            .ok_or_else(|| Error::Config("no server certificate configured".into()))?;
        let acceptor = tokio_rustls::TlsAcceptor::from(config);
        let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;

        match timed(
            settings.negotiate_timeout(),
            "security handshake",
            transport.accept_tls(acceptor),
        )
        .await
        {
            Ok(secured) => {
                self.transport = Some(secured);
                self.state.transition(SecurityState::Active)?;
                Ok(())
            }
            Err(e) => {
                self.state.transition(SecurityState::Failed)?;
                Err(e)
            }
        }
    }

    #[cfg(not(feature = "tls"))]
    async fn secure_inbound(&mut self, _settings: &TlsSettings) -> Result<()> {
        Err(Error::Unsupported("TLS support is not built in".into()))
    }

    #[cfg(feature = "tls")]
    async fn secure_outbound(&mut self, settings: &TlsSettings) -> Result<()> {
        let config = settings
            .client_config()
            .ok_or_else(|| Error::Config("no client TLS configuration available".into()))?;
        let host = self
            .peer_host
            .clone()
            .ok_or_else(|| Error::Config("backend hostname required for TLS".into()))?;
        let name = super::tls::parse_server_name(&host)?;
        let server_name = rustls_pki_types::ServerName::try_from(name)
            .map_err(|_| Error::Config(format!("invalid hostname for TLS: '{host}'")))?;
        let connector = tokio_rustls::TlsConnector::from(config);
        let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;

        match timed(
            settings.negotiate_timeout(),
            "security handshake",
            transport.connect_tls(connector, server_name),
        )
        .await
        {
            Ok(secured) => {
                self.transport = Some(secured);
                self.state.transition(SecurityState::Active)?;
                Ok(())
            }
            Err(e) => {
                self.state.transition(SecurityState::Failed)?;
                Err(e)
            }
        }
    }

    #[cfg(not(feature = "tls"))]
    async fn secure_outbound(&mut self, _settings: &TlsSettings) -> Result<()> {
        Err(Error::Unsupported("TLS support is not built in".into()))
    }

    async fn write_reply(&mut self, reply: NegotiationReply) -> Result<()> {
        let mut buf = BytesMut::with_capacity(1);
        encode_reply(&mut buf, reply);
        let transport = self.transport_mut()?;
        transport.write_all(&buf).await?;
        transport.flush().await
    }

    /// Refuse I/O on a poisoned connection, and on any unsecured connection
    /// when the policy mandates security.
    fn guard_io(&self) -> Result<()> {
        if self.state == SecurityState::Failed {
            return Err(Error::InvalidState {
                expected: "negotiated transport".into(),
                actual: "failed security handshake".into(),
            });
        }
        if self.mandate_security && !self.is_secured() {
            #[cfg(feature = "tls")]
            return Err(Error::InvalidState {
                expected: "secured transport".into(),
                actual: "plaintext transport".into(),
            });
            #[cfg(not(feature = "tls"))]
            return Err(Error::Unsupported(
                "security required but TLS support is not built in".into(),
            ));
        }
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(Error::ConnectionClosed)
    }
}

async fn timed<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(format!("{what} timed out after {limit:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn disabled_ctx() -> ExecContext {
        ExecContext::new(TlsSettings::disabled())
    }

    #[cfg(feature = "tls")]
    fn prefer_ctx() -> ExecContext {
        let settings = TlsSettings::builder()
            .policy(crate::connection::SecurityPolicy::Prefer)
            .build()
            .unwrap();
        ExecContext::new(settings)
    }

    async fn loopback() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_inbound_passthrough_returns_header() {
        let (client, server) = loopback().await;
        let mut conn = Connection::frontend(server);

        // An ordinary startup header: length 100, protocol 3.0.
        let mut peer = client;
        peer.write_all(&[0, 0, 0, 100, 0x00, 0x03, 0x00, 0x00])
            .await
            .unwrap();

        let ctx = disabled_ctx();
        match conn.negotiate_inbound(&ctx).await.unwrap() {
            InboundNegotiation::Passthrough(header) => {
                assert_eq!(header.length, 100);
                assert_eq!(header.code, 0x0003_0000);
            }
            other => panic!("expected passthrough, got {other:?}"),
        }
        assert_eq!(conn.state(), SecurityState::Unnegotiated);
    }

    #[tokio::test]
    async fn test_inbound_declines_without_material() {
        let (client, server) = loopback().await;
        let mut conn = Connection::frontend(server);

        let mut peer = client;
        peer.write_all(&[0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F])
            .await
            .unwrap();

        let ctx = disabled_ctx();
        let outcome = conn.negotiate_inbound(&ctx).await.unwrap();
        assert!(matches!(outcome, InboundNegotiation::Negotiated));
        assert_eq!(conn.state(), SecurityState::Declined);

        let mut reply = [0u8; 1];
        peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], b'N');
    }

    #[tokio::test]
    async fn test_outbound_disable_policy_sends_nothing() {
        let (client, server) = loopback().await;
        let mut conn = Connection::backend(client, "127.0.0.1", 0);

        let ctx = disabled_ctx();
        conn.negotiate_outbound(&ctx).await.unwrap();
        assert_eq!(conn.state(), SecurityState::Declined);

        // Closing without having written a single byte: the peer reads EOF.
        conn.close().await.unwrap();
        let mut peer = server;
        let mut seen = Vec::new();
        peer.read_to_end(&mut seen).await.unwrap();
        assert!(seen.is_empty());
    }

    #[tokio::test]
    #[cfg(feature = "tls")]
    async fn test_outbound_junk_reply_poisons_connection() {
        let (client, server) = loopback().await;
        let mut conn = Connection::backend(client, "127.0.0.1", 3);

        let peer_task = tokio::spawn(async move {
            let mut peer = server;
            let mut probe = [0u8; 8];
            peer.read_exact(&mut probe).await.unwrap();
            assert_eq!(probe, [0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F]);
            peer.write_all(b"Q").await.unwrap();
            peer
        });

        let ctx = prefer_ctx();
        let err = conn.negotiate_outbound(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("0x51"));
        assert_eq!(conn.state(), SecurityState::Failed);

        // A poisoned connection refuses further traffic.
        let err = conn.send(b"hello").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_role_mismatch_is_rejected() {
        let (client, server) = loopback().await;
        let ctx = disabled_ctx();

        let mut front = Connection::frontend(server);
        let err = front.negotiate_outbound(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let mut back = Connection::backend(client, "127.0.0.1", 1);
        let err = back.negotiate_inbound(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_negotiations() {
        let (client, server) = loopback().await;
        let ctx = disabled_ctx();
        ctx.shutdown().trigger();

        let mut conn = Connection::frontend(server);
        let err = conn.negotiate_inbound(&ctx).await.unwrap_err();
        match err {
            Error::InvalidState { expected, actual } => {
                assert_eq!(expected, "accepting connections");
                assert_eq!(actual, "shutting down");
            }
            other => panic!("unexpected error: {other}"),
        }

        drop(client);
    }

    #[tokio::test]
    async fn test_plaintext_send_receive_after_decline() {
        let (client, server) = loopback().await;
        let mut conn = Connection::frontend(server);

        let mut peer = client;
        peer.write_all(&[0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F])
            .await
            .unwrap();

        let ctx = disabled_ctx();
        conn.negotiate_inbound(&ctx).await.unwrap();
        let mut reply = [0u8; 1];
        peer.read_exact(&mut reply).await.unwrap();

        conn.send(b"ready").await.unwrap();
        let mut seen = [0u8; 5];
        peer.read_exact(&mut seen).await.unwrap();
        assert_eq!(&seen, b"ready");

        peer.write_all(b"go").await.unwrap();
        let mut buf = BytesMut::new();
        let n = conn.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"go");
    }

    #[tokio::test]
    async fn test_probe_read_timeout() {
        let (client, server) = loopback().await;
        let settings = TlsSettings::builder()
            .negotiate_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let ctx = ExecContext::new(settings);

        let mut conn = Connection::frontend(server);
        // Peer sends nothing at all.
        let err = conn.negotiate_inbound(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        drop(client);
    }
}
