//! Single-use administrative session against the control listener.
//!
//! The lifecycle is `connect → send → receive → disconnect`, enforced by
//! the types rather than by runtime checks: [`ControlSession::connect`]
//! returns only after authentication succeeded, and `receive` exists only
//! on the [`PendingReply`] produced by a successful `send`. Every network
//! operation honors the timeout configured on the target; a timeout of
//! zero seconds disables the bound.

use bytes::{Buf, BytesMut};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::connection::Transport;
use crate::protocol::constants::limits;
use crate::protocol::{
    decode_response, encode_authenticate, encode_command, encode_goodbye, Command, Response,
};
use crate::{Error, Result};

/// Where and how to reach the control listener.
///
/// Constructing a target validates every field, so a session built from one
/// can no longer fail on argument problems; anything wrong afterwards is a
/// network or peer condition.
#[derive(Clone)]
pub struct ControlTarget {
    host: String,
    port: u16,
    user: String,
    secret: String,
    timeout: Option<Duration>,
}

impl ControlTarget {
    /// Validate and build a target. `timeout_secs` of zero disables the
    /// per-operation deadline.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the host is empty or too long, a credential
    /// is too long, the port is outside `1025..=65535`, or the timeout is
    /// negative. No network I/O happens here or in any failing path.
    pub fn new(
        host: impl Into<String>,
        port: i64,
        user: impl Into<String>,
        secret: impl Into<String>,
        timeout_secs: i64,
    ) -> Result<ControlTarget> {
        let host = host.into();
        let user = user.into();
        let secret = secret.into();

        if host.is_empty() {
            return Err(Error::InvalidArgument("hostname must not be empty".into()));
        }
        if host.len() >= limits::MAX_HOST_LEN {
            return Err(Error::InvalidArgument(format!(
                "hostname must be shorter than {} bytes",
                limits::MAX_HOST_LEN
            )));
        }
        if port <= limits::MIN_PORT_EXCLUSIVE || port > 65535 {
            return Err(Error::InvalidArgument(format!(
                "port must be between {} and 65535, got {port}",
                limits::MIN_PORT_EXCLUSIVE + 1
            )));
        }
        if user.len() >= limits::MAX_CREDENTIAL_LEN {
            return Err(Error::InvalidArgument(format!(
                "username must be shorter than {} bytes",
                limits::MAX_CREDENTIAL_LEN
            )));
        }
        if secret.len() >= limits::MAX_CREDENTIAL_LEN {
            return Err(Error::InvalidArgument(format!(
                "password must be shorter than {} bytes",
                limits::MAX_CREDENTIAL_LEN
            )));
        }
        if timeout_secs < 0 {
            return Err(Error::InvalidArgument(format!(
                "timeout must not be negative, got {timeout_secs}"
            )));
        }

        let timeout = if timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(timeout_secs as u64))
        };

        Ok(ControlTarget {
            host,
            port: port as u16,
            user,
            secret,
            timeout,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Per-operation deadline; `None` means unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Hex-encoded SHA-256 digest of the secret; the secret itself never
    /// goes on the wire.
    fn secret_digest(&self) -> String {
        let digest = Sha256::digest(self.secret.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Debug for ControlTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// An authenticated control connection.
///
/// Dropping a session without calling [`disconnect`](Self::disconnect)
/// closes the socket without the goodbye frame.
pub struct ControlSession {
    transport: Option<Transport>,
    read_buf: BytesMut,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ControlSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("connected", &self.transport.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ControlSession {
    /// Connect and authenticate in one step.
    ///
    /// # Errors
    ///
    /// `Unreachable` when the listener cannot be reached, `Timeout` when
    /// the deadline passes, `AuthFailed` when the listener refuses the
    /// credentials. There is no unauthenticated session value: a failure
    /// here leaves nothing behind but a closed socket.
    pub async fn connect(target: &ControlTarget) -> Result<ControlSession> {
        async move {
            crate::metrics::counters::control_auth_attempted();

            let stream = maybe_timeout(target.timeout(), "connect", async {
                TcpStream::connect((target.host(), target.port()))
                    .await
                    .map_err(|e| {
                        Error::Unreachable(format!("{}:{}: {e}", target.host(), target.port()))
                    })
            })
            .await?;

            let mut session = ControlSession {
                transport: Some(Transport::Plain(stream)),
                read_buf: BytesMut::with_capacity(1024),
                timeout: target.timeout(),
            };

            let frame = encode_authenticate(target.user(), &target.secret_digest());
            session.write_frame(&frame).await?;

            let ack = session.read_response().await?;
            if !ack.is_success() {
                let reason = ack
                    .message
                    .unwrap_or_else(|| "credentials rejected".to_string());
                crate::metrics::counters::control_auth_failed("rejected");
                session.hangup().await;
                return Err(Error::AuthFailed(reason));
            }

            tracing::debug!("control session authenticated");
            Ok(session)
        }
        .instrument(tracing::info_span!(
            "control_connect",
            host = %target.host(),
            port = target.port()
        ))
        .await
    }

    /// Encode and write one command frame. The reply must be taken from
    /// the returned [`PendingReply`].
    pub async fn send(&mut self, command: &Command) -> Result<PendingReply<'_>> {
        let frame = encode_command(command);
        self.write_frame(&frame).await?;
        tracing::debug!(command = %command, "control command sent");

        Ok(PendingReply {
            command: command.kind(),
            started: Instant::now(),
            session: self,
        })
    }

    /// Send the goodbye frame and close. Idempotent: later calls are
    /// no-ops, and failures while saying goodbye only get logged.
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let timeout = self.timeout;
            let res = maybe_timeout(timeout, "goodbye", async {
                transport.write_all(&encode_goodbye()).await?;
                transport.flush().await?;
                transport.shutdown().await
            })
            .await;
            if let Err(e) = res {
                tracing::debug!(error = %e, "goodbye on disconnect failed");
            }
            tracing::debug!("control session disconnected");
        }
    }

    /// Close without the goodbye frame.
    async fn hangup(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.shutdown().await;
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        let transport = self
            .transport
            .as_mut()
            .ok_or(Error::ConnectionClosed)?;
        maybe_timeout(timeout, "control write", async {
            transport.write_all(frame).await?;
            transport.flush().await
        })
        .await
    }

    async fn read_response(&mut self) -> Result<Response> {
        let timeout = self.timeout;
        loop {
            if let Some((response, consumed)) = decode_response(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return Ok(response);
            }

            let transport = self
                .transport
                .as_mut()
                .ok_or(Error::ConnectionClosed)?;
            let n = maybe_timeout(timeout, "control read", async {
                transport.read_buf(&mut self.read_buf).await
            })
            .await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

/// Receipt for a command in flight; the only place a reply can be read.
#[derive(Debug)]
pub struct PendingReply<'a> {
    command: &'static str,
    started: Instant,
    session: &'a mut ControlSession,
}

impl PendingReply<'_> {
    /// Read and decode the listener's reply to the sent command.
    pub async fn receive(self) -> Result<Response> {
        let res = self.session.read_response().await;
        match &res {
            Ok(response) => {
                let outcome = if response.is_success() { "ok" } else { "error" };
                crate::metrics::counters::control_command_completed(self.command, outcome);
                crate::metrics::histograms::control_round_trip_duration(
                    self.command,
                    self.started.elapsed().as_millis() as u64,
                );
            }
            Err(Error::Timeout(_)) => {
                crate::metrics::counters::control_command_completed(self.command, "timeout");
            }
            Err(_) => {
                crate::metrics::counters::control_command_completed(self.command, "error");
            }
        }
        res
    }
}

async fn maybe_timeout<T>(
    limit: Option<Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(format!("{what} timed out after {limit:?}"))),
        },
        None => fut.await,
    }
}
