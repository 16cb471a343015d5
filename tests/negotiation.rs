//! Integration tests for security negotiation on both roles.
//!
//! Every test runs over a real loopback socket pair. The secured paths use
//! a certificate generated on the fly, so a full TLS handshake happens
//! in-process with no external services or fixture files.

mod negotiation {
    #[cfg(feature = "tls")]
    use std::sync::atomic::{AtomicUsize, Ordering};
    #[cfg(feature = "tls")]
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[cfg(feature = "tls")]
    use poolgate_wire::connection::SecurityPolicy;
    use poolgate_wire::connection::{SecurityState, TlsSettings};
    use poolgate_wire::{Connection, Error, ExecContext, InboundNegotiation};

    const PROBE: [u8; 8] = [0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F];

    #[cfg(feature = "tls")]
    static MATERIAL_SEQ: AtomicUsize = AtomicUsize::new(0);

    async fn loopback() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    /// Context with a freshly generated server certificate and key.
    #[cfg(feature = "tls")]
    fn secured_ctx(policy: SecurityPolicy) -> ExecContext {
        let seq = MATERIAL_SEQ.fetch_add(1, Ordering::Relaxed);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();

        let dir = std::env::temp_dir();
        let cert_path = dir.join(format!(
            "poolgate-negotiation-{}-{seq}.crt",
            std::process::id()
        ));
        let key_path = dir.join(format!(
            "poolgate-negotiation-{}-{seq}.key",
            std::process::id()
        ));
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key.serialize_pem()).unwrap();

        let settings = TlsSettings::builder()
            .policy(policy)
            .cert_path(cert_path.to_string_lossy())
            .key_path(key_path.to_string_lossy())
            .negotiate_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        ExecContext::new(settings)
    }

    /// Context that wants security but has no server material.
    #[cfg(feature = "tls")]
    fn client_only_ctx(policy: SecurityPolicy) -> ExecContext {
        let settings = TlsSettings::builder()
            .policy(policy)
            .negotiate_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        ExecContext::new(settings)
    }

    /// An acceptor without material answers the probe with exactly one 'N'
    /// and the stream continues in plaintext right behind it.
    #[tokio::test]
    async fn test_acceptor_declines_once_then_plaintext() {
        let (mut peer, server) = loopback().await;
        let ctx = ExecContext::new(TlsSettings::disabled());

        let server_task = tokio::spawn(async move {
            let mut conn = Connection::frontend(server);
            let outcome = conn.negotiate_inbound(&ctx).await.unwrap();
            assert!(matches!(outcome, InboundNegotiation::Negotiated));
            assert_eq!(conn.state(), SecurityState::Declined);
            conn.send(b"after").await.unwrap();
            conn.close().await.unwrap();
        });

        peer.write_all(&PROBE).await.unwrap();

        // The very next bytes after the single 'N' are application data.
        let mut seen = Vec::new();
        peer.read_to_end(&mut seen).await.unwrap();
        assert_eq!(seen, b"Nafter");

        server_task.await.unwrap();
        println!("✓ acceptor declined with a single marker byte");
    }

    /// Both roles of this crate negotiating against each other end up with
    /// an encrypted stream that carries traffic both ways.
    #[tokio::test]
    #[cfg(feature = "tls")]
    async fn test_secured_round_trip_between_both_roles() {
        let (client, server) = loopback().await;
        let server_ctx = secured_ctx(SecurityPolicy::Prefer);
        let client_ctx = client_only_ctx(SecurityPolicy::Prefer);

        let server_task = tokio::spawn(async move {
            let mut front = Connection::frontend(server);
            let outcome = front.negotiate_inbound(&server_ctx).await.unwrap();
            assert!(matches!(outcome, InboundNegotiation::Negotiated));
            assert_eq!(front.state(), SecurityState::Active);
            assert!(front.is_secured());

            let mut buf = BytesMut::new();
            let n = front.receive(&mut buf).await.unwrap();
            front.send(&buf[..n]).await.unwrap();
            front.close().await.unwrap();
        });

        let mut back = Connection::backend(client, "localhost", 1);
        back.negotiate_outbound(&client_ctx).await.unwrap();
        assert_eq!(back.state(), SecurityState::Active);
        assert!(back.is_secured());

        back.send(b"ping").await.unwrap();
        let mut buf = BytesMut::new();
        let n = back.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        back.close().await.unwrap();

        server_task.await.unwrap();
        println!("✓ secured round trip through both roles");
    }

    /// The initiator sends the exact probe bytes and falls back to
    /// plaintext when the peer answers 'N'.
    #[tokio::test]
    #[cfg(feature = "tls")]
    async fn test_initiator_declined_by_peer_falls_back() {
        let (client, mut peer) = loopback().await;
        let ctx = client_only_ctx(SecurityPolicy::Prefer);

        let peer_task = tokio::spawn(async move {
            let mut probe = [0u8; 8];
            peer.read_exact(&mut probe).await.unwrap();
            assert_eq!(probe, PROBE);
            peer.write_all(b"N").await.unwrap();

            let mut seen = [0u8; 5];
            peer.read_exact(&mut seen).await.unwrap();
            assert_eq!(&seen, b"hello");
            peer.write_all(b"world").await.unwrap();
        });

        let mut back = Connection::backend(client, "localhost", 2);
        back.negotiate_outbound(&ctx).await.unwrap();
        assert_eq!(back.state(), SecurityState::Declined);
        assert!(!back.is_secured());

        back.send(b"hello").await.unwrap();
        let mut buf = BytesMut::new();
        let n = back.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");

        peer_task.await.unwrap();
        println!("✓ initiator fell back to plaintext after 'N'");
    }

    /// A require policy still lets the peer decline, but any explicit I/O
    /// on the resulting plaintext connection is refused.
    #[tokio::test]
    #[cfg(feature = "tls")]
    async fn test_require_policy_blocks_plaintext_io() {
        let (client, mut peer) = loopback().await;
        let ctx = client_only_ctx(SecurityPolicy::Require);

        let peer_task = tokio::spawn(async move {
            let mut probe = [0u8; 8];
            peer.read_exact(&mut probe).await.unwrap();
            peer.write_all(b"N").await.unwrap();
            peer
        });

        let mut back = Connection::backend(client, "localhost", 4);
        back.negotiate_outbound(&ctx).await.unwrap();
        assert_eq!(back.state(), SecurityState::Declined);

        let err = back.send(b"data").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let mut buf = BytesMut::new();
        let err = back.receive(&mut buf).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        peer_task.await.unwrap();
        println!("✓ require policy refused plaintext I/O");
    }

    /// A first packet that is not the probe is handed back whole; the
    /// bytes behind the header stay in the stream for the caller.
    #[tokio::test]
    async fn test_passthrough_preserves_following_bytes() {
        let (mut peer, server) = loopback().await;
        let ctx = ExecContext::new(TlsSettings::disabled());

        // Startup-style header (length 13, protocol 3.0) plus body bytes.
        peer.write_all(&[0, 0, 0, 13, 0x00, 0x03, 0x00, 0x00])
            .await
            .unwrap();
        peer.write_all(b"extra").await.unwrap();

        let mut conn = Connection::frontend(server);
        match conn.negotiate_inbound(&ctx).await.unwrap() {
            InboundNegotiation::Passthrough(header) => {
                assert_eq!(header.length, 13);
                assert_eq!(header.code, 0x0003_0000);
            }
            other => panic!("expected passthrough, got {other:?}"),
        }
        assert_eq!(conn.state(), SecurityState::Unnegotiated);

        let mut buf = BytesMut::new();
        let n = conn.receive(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"extra");

        println!("✓ passthrough preserved the rest of the stream");
    }

    /// An accepted probe whose peer then goes silent fails the handshake
    /// with a timeout and poisons the connection.
    #[tokio::test]
    #[cfg(feature = "tls")]
    async fn test_handshake_timeout_poisons_connection() {
        let (client, mut peer) = loopback().await;
        let settings = TlsSettings::builder()
            .policy(SecurityPolicy::Prefer)
            .negotiate_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let ctx = ExecContext::new(settings);

        let peer_task = tokio::spawn(async move {
            let mut probe = [0u8; 8];
            peer.read_exact(&mut probe).await.unwrap();
            peer.write_all(b"S").await.unwrap();
            // Never speak TLS; just hold the socket open.
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(peer);
        });

        let mut back = Connection::backend(client, "localhost", 5);
        let err = back.negotiate_outbound(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(back.state(), SecurityState::Failed);

        peer_task.abort();
        println!("✓ silent handshake timed out and poisoned the connection");
    }

    /// Shutdown already in progress refuses fresh negotiations at entry.
    #[tokio::test]
    async fn test_shutdown_blocks_new_negotiations() {
        let (client, server) = loopback().await;
        let ctx = ExecContext::new(TlsSettings::disabled());
        ctx.shutdown().trigger();

        let mut front = Connection::frontend(server);
        let err = front.negotiate_inbound(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let mut back = Connection::backend(client, "127.0.0.1", 0);
        let err = back.negotiate_outbound(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        println!("✓ shutdown context refused both roles");
    }
}
