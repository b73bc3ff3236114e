//! PinHandler port - 実際の pin 処理（queue からは不透明）

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{HandlerError, Request};

/// Performs the actual pin for one admitted request.
///
/// Called once per admission and concurrently up to `max_concurrency` times.
/// `Ok(())` marks the request `Pinned`; any error marks it `Failed`.
/// The token is cancelled when the queue closes (or, if configured, when the
/// request is removed); handlers should stop promptly when it fires.
///
/// Execution is at-least-once across restarts, so handlers must be idempotent.
#[async_trait]
pub trait PinHandler: Send + Sync {
    async fn handle(&self, cancel: CancellationToken, request: Request) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`PinHandler`].
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(CancellationToken, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> PinHandler for FnHandler<F>
where
    F: Fn(CancellationToken, Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<(), HandlerError> {
        (self.f)(cancel, request).await
    }
}
