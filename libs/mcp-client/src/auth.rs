//! OAuth provider wrapping (§4.1, §9 "OAuth provider wrapping"). Rather than
//! subclassing a vendor OAuth client, the transport layer is handed a
//! wrapper that forwards every operation to the embedder's real provider
//! except the redirect callback, which is intercepted so the URL reaches the
//! state machine before the wrapped call proceeds.

use async_trait::async_trait;
use tokio::sync::watch;
use zypher_types::{ConnectingSubstate, McpClientStatus};

/// An embedder-supplied OAuth provider. Only the redirect callback is of
/// interest to the core; everything else about how the provider obtains and
/// refreshes tokens is opaque to it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn redirect_to_authorization(&self, url: &str) -> Result<(), String>;
}

/// Wraps an `AuthProvider` so every redirect is first published onto the
/// client's status channel as `connecting.awaitingOAuth`, then forwarded to
/// the real provider.
pub(crate) struct InterceptingAuthProvider {
    inner: std::sync::Arc<dyn AuthProvider>,
    status_tx: watch::Sender<McpClientStatus>,
}

impl InterceptingAuthProvider {
    pub(crate) fn new(
        inner: std::sync::Arc<dyn AuthProvider>,
        status_tx: watch::Sender<McpClientStatus>,
    ) -> Self {
        Self { inner, status_tx }
    }
}

#[async_trait]
impl AuthProvider for InterceptingAuthProvider {
    async fn redirect_to_authorization(&self, url: &str) -> Result<(), String> {
        self.status_tx.send_modify(|status| {
            *status = McpClientStatus::Connecting {
                sub: ConnectingSubstate::AwaitingOAuth {
                    oauth_url: url.to_string(),
                },
            };
        });
        self.inner.redirect_to_authorization(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingProvider {
        called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AuthProvider for RecordingProvider {
        async fn redirect_to_authorization(&self, _url: &str) -> Result<(), String> {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn wrapper_publishes_status_before_forwarding() {
        let (tx, mut rx) = watch::channel(McpClientStatus::Disconnected);
        let called = Arc::new(AtomicBool::new(false));
        let wrapper = InterceptingAuthProvider::new(
            Arc::new(RecordingProvider {
                called: called.clone(),
            }),
            tx,
        );

        wrapper
            .redirect_to_authorization("https://example.com/authorize")
            .await
            .expect("redirect succeeds");

        assert!(called.load(Ordering::SeqCst));
        rx.changed().await.expect("status changed");
        assert_eq!(
            rx.borrow().pending_oauth_url(),
            Some("https://example.com/authorize")
        );
    }
}
