//! Shared execution context for negotiation entry points.
//!
//! One `ExecContext` is built at process startup and cloned into every
//! worker. It carries the compiled TLS material and a shutdown handle, so
//! nothing in the library reads process-global state. Workers observe
//! shutdown between operations; a negotiation or teardown already in flight
//! runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::connection::TlsSettings;

/// Execution context passed by reference into negotiation calls.
#[derive(Debug, Clone)]
pub struct ExecContext {
    security: Arc<TlsSettings>,
    shutdown: ShutdownHandle,
}

impl ExecContext {
    /// Context with a fresh shutdown handle.
    pub fn new(security: TlsSettings) -> Self {
        Self::with_shutdown(security, ShutdownHandle::new())
    }

    /// Context sharing an externally owned shutdown handle, for embedding
    /// into a process that already coordinates shutdown.
    pub fn with_shutdown(security: TlsSettings, shutdown: ShutdownHandle) -> Self {
        Self {
            security: Arc::new(security),
            shutdown,
        }
    }

    pub fn security(&self) -> &TlsSettings {
        &self.security
    }

    pub fn shutdown(&self) -> &ShutdownHandle {
        &self.shutdown
    }

    /// Checked at operation entry; never inside a critical section.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

/// Broadcast-based shutdown signal shared by every worker.
///
/// Triggering is sticky: listeners subscribing after the fact still observe
/// the shutdown immediately.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    triggered: Arc<AtomicBool>,
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(8);
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Signal shutdown to every current and future listener.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::Release);
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            triggered: Arc::clone(&self.triggered),
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// One worker's view of the shutdown signal.
pub struct ShutdownListener {
    triggered: Arc<AtomicBool>,
    rx: broadcast::Receiver<()>,
}

impl ShutdownListener {
    /// Wait until shutdown is triggered. Returns immediately if it already
    /// was.
    pub async fn recv(&mut self) {
        if self.triggered.load(Ordering::Acquire) {
            return;
        }
        loop {
            match self.rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_context_is_not_shutting_down() {
        let ctx = ExecContext::new(TlsSettings::disabled());
        assert!(!ctx.is_shutting_down());
    }

    #[test]
    fn test_trigger_is_observed_by_clones() {
        let ctx = ExecContext::new(TlsSettings::disabled());
        let worker_ctx = ctx.clone();

        ctx.shutdown().trigger();
        assert!(worker_ctx.is_shutting_down());
    }

    #[tokio::test]
    async fn test_listener_wakes_on_trigger() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.subscribe();

        let waiter = tokio::spawn(async move {
            listener.recv().await;
        });

        handle.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("listener did not wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_sticky_trigger() {
        let handle = ShutdownHandle::new();
        handle.trigger();

        let mut listener = handle.subscribe();
        tokio::time::timeout(std::time::Duration::from_millis(100), listener.recv())
            .await
            .expect("sticky trigger not observed");
    }
}
