//! Readiness gate
//!
//! Defers work until the observed connection reports [`ConnectionState::Ready`].
//! There is no timeout: establishing the connection is the backend's job, and a
//! connection that never becomes ready simply keeps callers suspended.

use std::future::Future;
use tokio::sync::watch;
use tracing::debug;

use crate::connection::ConnectionState;

/// Suspends operations until a connection is ready
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionGate {
    pub fn new(state: watch::Receiver<ConnectionState>) -> Self {
        Self { state }
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    /// Resolve once the connection is ready
    ///
    /// Resolves in the same poll when it already is. Failed or closed
    /// connections are not errors here; the future just stays pending, also
    /// when the publishing side is dropped.
    pub async fn wait_ready(&self) {
        if self.is_ready() {
            return;
        }

        let mut state = self.state.clone();
        debug!(state = %*state.borrow(), "Waiting for connection to become ready");
        let released = state.wait_for(ConnectionState::is_ready).await.is_ok();
        if !released {
            std::future::pending::<()>().await;
        }
    }

    /// Run `action` exactly once, after the connection is ready
    pub async fn run_when_ready<F, Fut, T>(&self, action: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.wait_ready().await;
        action().await
    }
}
