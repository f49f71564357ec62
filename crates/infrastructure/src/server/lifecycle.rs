use super::ServerError;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Why the service is shutting down. Only the first cause is kept.
#[derive(Error, Debug)]
pub enum ShutdownCause {
    #[error("server exited, {source}")]
    ServerExited {
        listener: String,
        #[source]
        source: ServerError,
    },

    #[error("server exited, {listener} returned without error")]
    ServerStopped { listener: String },

    #[error("server exited, {listener} panicked")]
    ServerPanicked { listener: String },

    #[error("received {0}")]
    Signal(&'static str),
}

impl ShutdownCause {
    /// Whether the shutdown was requested rather than caused by a failure.
    pub fn is_graceful(&self) -> bool {
        matches!(self, ShutdownCause::Signal(_))
    }
}

/// Shutdown coordination shared by every listener of the service.
///
/// The first attached loop to return closes the whole service; closing the
/// service cancels the token every server derives its own from.
pub struct Lifecycle {
    token: CancellationToken,
    cause: Mutex<Option<ShutdownCause>>,
}

impl Lifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            cause: Mutex::new(None),
        })
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `serve` in the background. If it returns before the service is
    /// closed, the service is closed with that result as the cause. If the
    /// service closes first, `serve` is left to wind down on its own.
    pub fn attach<F>(self: &Arc<Self>, listener: impl Into<String>, serve: F)
    where
        F: Future<Output = Result<(), ServerError>> + Send + 'static,
    {
        let listener = listener.into();
        let lifecycle = Arc::clone(self);
        let serve = tokio::spawn(serve);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = lifecycle.token.cancelled() => {}
                result = serve => {
                    let cause = match result {
                        Ok(Err(source)) => ShutdownCause::ServerExited { listener, source },
                        Ok(Ok(())) => ShutdownCause::ServerStopped { listener },
                        Err(_) => ShutdownCause::ServerPanicked { listener },
                    };
                    lifecycle.send_close_signal(cause);
                }
            }
        });
    }

    /// Close the service. Later causes are logged and dropped.
    pub fn send_close_signal(&self, cause: ShutdownCause) {
        {
            let mut slot = self
                .cause
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if slot.is_none() {
                if cause.is_graceful() {
                    info!(cause = %cause, "Shutting down");
                } else {
                    error!(cause = %cause, "Shutting down");
                }
                *slot = Some(cause);
            }
        }
        self.token.cancel();
    }

    /// Wait until the service is closed and return the first cause.
    pub async fn wait(&self) -> Option<ShutdownCause> {
        self.token.cancelled().await;
        self.cause
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    #[tokio::test]
    async fn test_returning_loop_closes_service() {
        let lifecycle = Lifecycle::new();
        lifecycle.attach("udp://test", async {
            Err(ServerError::UnexpectedRead(io::Error::other("boom")))
        });

        let cause = tokio::time::timeout(Duration::from_secs(1), lifecycle.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(cause.to_string().starts_with("server exited, "));
        assert!(cause.to_string().contains("boom"));
        assert!(lifecycle.is_closed());
    }

    #[tokio::test]
    async fn test_first_cause_wins() {
        let lifecycle = Lifecycle::new();
        lifecycle.send_close_signal(ShutdownCause::Signal("SIGTERM"));
        lifecycle.send_close_signal(ShutdownCause::ServerStopped {
            listener: "tcp://x".into(),
        });

        let cause = lifecycle.wait().await.unwrap();
        assert!(matches!(cause, ShutdownCause::Signal("SIGTERM")));
        assert!(cause.is_graceful());
    }

    #[tokio::test]
    async fn test_external_close_leaves_loop_running() {
        let lifecycle = Lifecycle::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        lifecycle.attach("udp://test", async move {
            let _ = rx.await;
            Err(ServerError::ServerClosed)
        });

        lifecycle.send_close_signal(ShutdownCause::Signal("SIGINT"));
        let cause = lifecycle.wait().await.unwrap();
        assert!(matches!(cause, ShutdownCause::Signal("SIGINT")));

        // The loop finishing afterwards does not replace the cause.
        let _ = tx.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lifecycle.wait().await.is_none());
    }

    #[tokio::test]
    async fn test_token_reflects_close() {
        let lifecycle = Lifecycle::new();
        let token = lifecycle.token();
        assert!(!token.is_cancelled());
        lifecycle.send_close_signal(ShutdownCause::Signal("SIGTERM"));
        assert!(token.is_cancelled());
    }
}
