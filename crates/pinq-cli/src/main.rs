//! pinq demo: queue N simulated pins against a redb store and report counts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use pinq_core::impls::RedbRequestStore;
use pinq_core::{HandlerError, Pin, PinHandler, PinQueue, QueueConfig, Request};

#[derive(Debug, Parser)]
#[command(name = "pinq", about = "Run simulated pins through a pin request queue")]
struct Args {
    /// Directory holding `requests.redb`.
    #[arg(long, env = "PINQ_DB", default_value = "./pinq-data")]
    db: PathBuf,

    /// Bucket key the requests are filed under.
    #[arg(long, env = "PINQ_KEY", default_value = "demo")]
    key: String,

    /// Number of requests to submit.
    #[arg(long, env = "PINQ_REQUESTS", default_value_t = 500)]
    requests: usize,

    #[arg(long, env = "PINQ_MAX_CONCURRENCY", default_value_t = 100)]
    max_concurrency: usize,

    /// Simulated pin duration.
    #[arg(long, env = "PINQ_DELAY_MS", default_value_t = 1)]
    delay_ms: u64,

    /// Fail every Nth request (0 disables failures).
    #[arg(long, env = "PINQ_FAIL_EVERY", default_value_t = 10)]
    fail_every: usize,

    /// Per-pin deadline.
    #[arg(long, env = "PINQ_HANDLER_TIMEOUT_MS")]
    handler_timeout_ms: Option<u64>,
}

/// Sleeps instead of fetching content; cid is the submission index.
struct SimulatedPin {
    delay: Duration,
    fail_every: usize,
}

#[async_trait]
impl PinHandler for SimulatedPin {
    async fn handle(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<(), HandlerError> {
        tokio::select! {
            _ = cancel.cancelled() => return Err("cancelled".into()),
            _ = tokio::time::sleep(self.delay) => {}
        }

        let n: usize = request.pin.cid.parse()?;
        if self.fail_every > 0 && n % self.fail_every == 0 {
            return Err(format!("simulated failure for #{n}").into());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    std::fs::create_dir_all(&args.db)
        .with_context(|| format!("creating {}", args.db.display()))?;
    let store = RedbRequestStore::open(&args.db).context("opening request store")?;

    let config = QueueConfig {
        max_concurrency: args.max_concurrency,
        handler_timeout_ms: args.handler_timeout_ms,
        ..QueueConfig::default()
    };
    let handler = SimulatedPin {
        delay: Duration::from_millis(args.delay_ms),
        fail_every: args.fail_every,
    };
    let queue = PinQueue::builder(Arc::new(store), Arc::new(handler))
        .config(config)
        .build()
        .await?;

    for i in 1..=args.requests {
        queue
            .submit(&args.key, Pin::new(i.to_string()).with_name(format!("demo-{i}")))
            .await?;
    }
    info!(requests = args.requests, key = %args.key, "submitted");

    // Ctrl-C で途中終了しても、Pinning は次回起動時に Queued へ戻る
    let counts = loop {
        let counts = queue.counts(&args.key).await?;
        if counts.pending() == 0 {
            break counts;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break queue.counts(&args.key).await?;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    };

    println!("{}", serde_json::to_string_pretty(&counts)?);
    queue.close().await?;
    Ok(())
}
