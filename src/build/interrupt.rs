use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Something that resolves once the user asks to stop
#[async_trait]
pub trait InterruptSource: Send + Sync {
    async fn interrupted(&self);
}

/// Ctrl-C, plus SIGTERM on unix.
///
/// Tokio keeps a signal handler installed for the rest of the process once it
/// has been awaited, so after a guard ends Ctrl-C no longer terminates the
/// process on its own. Use [`InterruptSupervisor::spawn_fallback`] to act on
/// interrupts that arrive outside a guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignals;

#[async_trait]
impl InterruptSource for OsSignals {
    async fn interrupted(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        result = tokio::signal::ctrl_c() => {
                            if let Err(e) = result {
                                warn!("⚠️ Unable to listen for Ctrl-C: {}", e);
                                std::future::pending::<()>().await;
                            }
                        }
                        _ = terminate.recv() => {}
                    }
                    return;
                }
                Err(e) => warn!("⚠️ Unable to listen for SIGTERM: {}", e),
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️ Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Interrupt fired programmatically; used by tests and embedders
#[derive(Debug, Clone, Default)]
pub struct ManualInterrupt {
    notify: Arc<Notify>,
}

impl ManualInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the interrupt. A trigger with no listener is kept until one registers.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

#[async_trait]
impl InterruptSource for ManualInterrupt {
    async fn interrupted(&self) {
        self.notify.notified().await;
    }
}

/// Runs build work with a cleanup step that is guaranteed on every exit path.
///
/// A listener task is registered right before the work starts. If the source
/// fires, the work is dropped and the result is [`AppError::Interrupted`]. The
/// listener is aborted as soon as the work finishes, so a late signal never
/// triggers a stale cleanup.
#[derive(Clone)]
pub struct InterruptSupervisor {
    source: Arc<dyn InterruptSource>,
}

impl InterruptSupervisor {
    pub fn new(source: Arc<dyn InterruptSource>) -> Self {
        Self { source }
    }

    pub fn os() -> Self {
        Self::new(Arc::new(OsSignals))
    }

    /// Listen for the rest of the process and call `on_interrupt` on the next interrupt
    pub fn spawn_fallback<F>(&self, on_interrupt: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let source = self.source.clone();
        tokio::spawn(async move {
            source.interrupted().await;
            warn!("🛑 Interrupt received outside a guarded build");
            on_interrupt();
        })
    }

    pub async fn guard<T, W, C>(&self, label: &str, work: W, cleanup: C) -> Result<T>
    where
        W: Future<Output = Result<T>>,
        C: Future<Output = Result<()>>,
    {
        let token = CancellationToken::new();
        let listener = {
            let source = self.source.clone();
            let token = token.clone();
            tokio::spawn(async move {
                source.interrupted().await;
                token.cancel();
            })
        };
        debug!("🛡️ Interrupt listener registered for {}", label);

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                warn!("🛑 Interrupt received, cleaning up {}", label);
                Err(AppError::Interrupted(format!("{} was interrupted", label)))
            }
            result = work => result,
        };

        listener.abort();
        // wait until the listener is dropped so it cannot swallow a later interrupt
        let _ = listener.await;
        debug!("🛡️ Interrupt listener removed for {}", label);

        let cleaned = cleanup.await;
        match (outcome, cleaned) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
            (Err(primary), Err(cleanup_err)) => {
                error!("❌ Cleanup of {} failed: {}", label, cleanup_err);
                Err(primary)
            }
            (Err(primary), Ok(())) => Err(primary),
        }
    }
}
