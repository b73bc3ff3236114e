//! Dispatcher - 並列度制限つきの実行ループ
//!
//! # フロー
//! 1. 空きスロット分だけ、最も古い `Queued` を取得（全 key 横断の FIFO）
//! 2. `Queued -> Pinning` を永続化してから handler を起動
//! 3. handler の結果で `Pinned` / `Failed` を永続化（失敗時は backoff 付きで再試行）
//! 4. ジョブが終わるとスロットが空き、次の `Queued` を取りに行く
//!
//! 起床条件は `add_request` の通知、ジョブ完了、shutdown のいずれか。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::QueueConfig;
use crate::domain::{Request, RequestId, Status, StoreError, Transition};
use crate::ports::{Clock, PinHandler, RequestStore};

/// Upper bound for the pause after a failed admission scan.
const MAX_ADMISSION_BACKOFF: Duration = Duration::from_secs(5);

/// State shared by the façade, the dispatch loop and running jobs.
pub(crate) struct Shared {
    pub store: Arc<dyn RequestStore>,
    pub handler: Arc<dyn PinHandler>,
    pub clock: Arc<dyn Clock>,
    pub config: QueueConfig,
    pub max_concurrency: AtomicUsize,

    /// Raised on add and on limit changes.
    pub wake: Notify,

    /// Parent of every job token; cancelled by `close()`.
    pub shutdown: CancellationToken,

    /// Cancellation handles of running jobs.
    pub in_flight: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl Shared {
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::Acquire)
    }
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn spawn(shared: Arc<Shared>) -> JoinHandle<()> {
        tokio::spawn(Self { shared }.run())
    }

    async fn run(self) {
        let mut jobs = JoinSet::new();
        let mut scan_failures = 0u32;

        loop {
            while let Some(done) = jobs.try_join_next() {
                log_join(done);
            }
            if self.shared.shutdown.is_cancelled() {
                break;
            }

            let capacity = self.shared.max_concurrency().saturating_sub(jobs.len());
            if capacity > 0 {
                match self.admit(capacity, &mut jobs).await {
                    Ok(fetched) => {
                        scan_failures = 0;
                        if fetched == capacity {
                            // まだ Queued が残っている可能性がある
                            continue;
                        }
                    }
                    Err(err) => {
                        scan_failures += 1;
                        let delay = self
                            .shared
                            .config
                            .write_retry
                            .next_delay(scan_failures)
                            .min(MAX_ADMISSION_BACKOFF);
                        warn!(error = %err, ?delay, "admission failed; backing off");
                        tokio::select! {
                            _ = self.shared.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                            Some(done) = jobs.join_next(), if !jobs.is_empty() => log_join(done),
                        }
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = self.shared.shutdown.cancelled() => break,
                _ = self.shared.wake.notified() => {}
                Some(done) = jobs.join_next(), if !jobs.is_empty() => log_join(done),
            }
        }

        self.drain(jobs).await;
    }

    /// Admit up to `capacity` of the oldest queued requests.
    /// Returns how many candidates the store handed back.
    async fn admit(&self, capacity: usize, jobs: &mut JoinSet<()>) -> Result<usize, StoreError> {
        let candidates = self
            .shared
            .store
            .scan_all(&[Status::Queued], None, capacity)
            .await?;
        let fetched = candidates.len();

        for request in candidates {
            let transition = Transition::start_pinning(self.shared.clock.now());
            match self
                .shared
                .store
                .transition(&request.key, request.request_id, &transition)
                .await
            {
                Ok(pinning) => self.start(pinning, jobs).await,
                // removed or already taken since the scan
                Err(err @ (StoreError::NotFound { .. } | StoreError::Conflict { .. })) => {
                    debug!(
                        key = %request.key,
                        id = %request.request_id,
                        error = %err,
                        "skipping candidate"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(fetched)
    }

    async fn start(&self, request: Request, jobs: &mut JoinSet<()>) {
        let cancel = self.shared.shutdown.child_token();
        self.shared
            .in_flight
            .lock()
            .await
            .insert(request.request_id, cancel.clone());

        debug!(key = %request.key, id = %request.request_id, cid = %request.pin.cid, "admitted");
        jobs.spawn(execute(Arc::clone(&self.shared), request, cancel));
    }

    async fn drain(&self, mut jobs: JoinSet<()>) {
        if jobs.is_empty() {
            info!("dispatcher stopped");
            return;
        }

        let limit = self.shared.config.shutdown_timeout();
        info!(in_flight = jobs.len(), ?limit, "waiting for in-flight pins");
        let wait = async {
            while let Some(done) = jobs.join_next().await {
                log_join(done);
            }
        };
        if tokio::time::timeout(limit, wait).await.is_err() {
            // aborted jobs stay `Pinning` and are requeued on the next start
            warn!(remaining = jobs.len(), "shutdown timeout; aborting in-flight pins");
            jobs.shutdown().await;
        }
        info!("dispatcher stopped");
    }
}

/// One job: run the handler, then persist the outcome.
async fn execute(shared: Arc<Shared>, request: Request, cancel: CancellationToken) {
    let key = request.key.clone();
    let id = request.request_id;

    let outcome = run_handler(&shared, request, cancel).await;
    shared.in_flight.lock().await.remove(&id);

    let now = shared.clock.now();
    let transition = match outcome {
        Ok(()) => Transition::pinned(now),
        Err(reason) if shared.shutdown.is_cancelled() => {
            debug!(%key, %id, %reason, "interrupted by shutdown; requeueing");
            Transition::requeue(now)
        }
        Err(reason) => {
            warn!(%key, %id, %reason, "pin failed");
            Transition::failed(now, reason)
        }
    };
    persist(&shared, &key, id, &transition).await;
}

async fn run_handler(
    shared: &Shared,
    request: Request,
    cancel: CancellationToken,
) -> Result<(), String> {
    let attempt = AssertUnwindSafe(shared.handler.handle(cancel.clone(), request)).catch_unwind();

    let result = match shared.config.handler_timeout() {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                return Err(format!("pin timed out after {limit:?}"));
            }
        },
        None => attempt.await,
    };

    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Persist a job outcome, retrying backend failures with backoff.
async fn persist(shared: &Shared, key: &str, id: RequestId, transition: &Transition) {
    let policy = &shared.config.write_retry;
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match shared.store.transition(key, id, transition).await {
            Ok(_) => {
                debug!(%key, %id, status = %transition.to, "transition stored");
                return;
            }
            Err(StoreError::NotFound { .. }) => {
                debug!(%key, %id, "request removed while pinning; dropping outcome");
                return;
            }
            Err(err @ StoreError::Conflict { .. }) => {
                warn!(%key, %id, error = %err, "unexpected state; dropping outcome");
                return;
            }
            Err(err) if attempts >= max_attempts => {
                error!(
                    %key, %id, status = %transition.to, error = %err, attempts,
                    "transition lost; request stays pinning until the next recovery"
                );
                return;
            }
            Err(err) => {
                let delay = policy.next_delay(attempts);
                warn!(
                    %key, %id, error = %err, attempts, ?delay,
                    "transition write failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn log_join(done: Result<(), JoinError>) {
    match done {
        Ok(()) => {}
        Err(err) if err.is_panic() => error!(error = %err, "pin job panicked"),
        Err(err) => debug!(error = %err, "pin job cancelled"),
    }
}

/// Move every `Pinning` record back to `Queued`.
///
/// Runs before the dispatcher starts, so any `Pinning` record belongs to a
/// previous process that died mid-attempt.
pub(crate) async fn requeue_interrupted(shared: &Shared) -> Result<usize, StoreError> {
    let mut interrupted = shared.store.iterate(vec![Status::Pinning]);
    let mut requeued = 0;

    while let Some(request) = interrupted.next().await {
        let request = request?;
        let transition = Transition::requeue(shared.clock.now());
        match shared
            .store
            .transition(&request.key, request.request_id, &transition)
            .await
        {
            Ok(_) => requeued += 1,
            Err(StoreError::NotFound { .. } | StoreError::Conflict { .. }) => {}
            Err(err) => return Err(err),
        }
    }

    if requeued > 0 {
        info!(requeued, "requeued interrupted pin requests");
    }
    Ok(requeued)
}
