//! Background worker handle shared by the long-running components

use log::error;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned background task plus the token that stops it
///
/// The token is a child of the caller's token, so cancelling the parent
/// stops the worker as well.
#[derive(Debug)]
pub(crate) struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn `run` on the tokio runtime with a fresh child token
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn<F, Fut>(parent: &CancellationToken, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = parent.child_token();
        let handle = tokio::spawn(run(token.clone()));
        Self { token, handle }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the worker and wait for it to exit
    pub(crate) async fn shutdown(self, component: &str) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!("{} worker terminated abnormally: {}", component, e);
        }
    }
}
