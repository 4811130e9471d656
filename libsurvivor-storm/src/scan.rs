//! Scan orchestration.
//!
//! Domains are pulled from the input stream in fixed-size batches, each one
//! admitted through the [`ConcurrencyLimiter`] before its probe task is
//! spawned. Matches fan in to the single result sink, whose channel closes
//! only after every spawned task has been joined.

use crate::{
    http::ClientError,
    limiter::ConcurrencyLimiter,
    prober::Prober,
    sink::spawn_sink,
    types::{ScanStats, StatsCounters},
};
use futures::{Stream, StreamExt};
use std::{pin::pin, sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{
    io::AsyncWrite,
    sync::AcquireError,
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Admission limiter closed: {0}")]
    LimiterClosed(#[from] AcquireError),
    #[error("Result writer task failed: {0}")]
    Sink(#[from] JoinError),
}

#[derive(Debug)]
pub struct ScanOutcome<W> {
    pub stats: ScanStats,
    pub writer: W,
}

pub struct Scanner {
    prober: Prober,
    limiter: ConcurrencyLimiter,
}

impl Scanner {
    pub fn new(prober: Prober) -> Self {
        let limiter = ConcurrencyLimiter::new(prober.config().workers);
        Self { prober, limiter }
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Probes every domain from `domains` and writes matches to `writer`.
    pub async fn run<S, W>(&self, domains: S, writer: W) -> Result<ScanOutcome<W>, ScanError>
    where
        S: Stream<Item = String>,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let start = Instant::now();
        let config = self.prober.config();
        let counters = Arc::new(StatsCounters::default());
        let (results, sink) = spawn_sink(writer, config.workers);
        let mut tasks = JoinSet::new();

        let mut batches = pin!(domains.chunks(config.batch_size.max(1)));
        while let Some(batch) = batches.next().await {
            debug!(size = batch.len(), "dispatching batch");
            for domain in batch {
                let permit = self.limiter.acquire().await?;
                let prober = self.prober.clone();
                let results = results.clone();
                let counters = Arc::clone(&counters);

                tasks.spawn(async move {
                    let _permit = permit;
                    let result = prober.probe_one(&domain).await;
                    counters.record(&result);
                    if result.verdict.is_match() && results.send(result.domain).await.is_err() {
                        warn!("result sink closed before scan finished");
                    }
                });

                while let Some(finished) = tasks.try_join_next() {
                    reap(finished);
                }
            }
        }

        while let Some(finished) = tasks.join_next().await {
            reap(finished);
        }
        drop(results);

        let report = sink.await?;
        let stats = ScanStats {
            written: report.written,
            write_errors: report.write_errors,
            elapsed: start.elapsed(),
            ..counters.snapshot()
        };

        info!(
            processed = stats.processed,
            matched = stats.matched,
            written = stats.written,
            elapsed_secs = stats.elapsed.as_secs_f64(),
            peak_in_flight = self.limiter.peak(),
            "scan completed"
        );

        Ok(ScanOutcome {
            stats,
            writer: report.writer,
        })
    }
}

fn reap(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "probe task failed");
    }
}
