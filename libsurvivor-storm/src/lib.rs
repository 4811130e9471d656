mod baseline;
pub mod classify;
mod http;
mod limiter;
mod prober;
pub mod proxy;
mod scan;
mod sink;
mod types;

pub use baseline::{baseline_url, random_token};
pub use classify::{jaro_winkler, Classification, Classifier};
pub use http::{ClientError, ClientOptions};
pub use limiter::{AdmissionPermit, ConcurrencyLimiter};
pub use prober::Prober;
pub use proxy::{ProxyEndpoint, ProxyError, ProxyRotator};
pub use scan::{ScanError, ScanOutcome, Scanner};
pub use sink::{spawn_sink, SinkReport};
pub use types::{
    DomainVerdict, ProbeResult, ScanConfig, ScanStats, Scheme, DEFAULT_IP_ECHO_URL, PROBE_SCHEMES,
};

use tokio::io::AsyncWrite;

pub async fn probe(domain: &str, config: ScanConfig) -> Result<ProbeResult, ClientError> {
    Ok(Prober::new(config)?.probe_one(domain).await)
}

/// Scans `domains` over direct connections and writes matches to `writer`.
pub async fn scan_domains<I, W>(
    domains: I,
    config: ScanConfig,
    writer: W,
) -> Result<ScanOutcome<W>, ScanError>
where
    I: IntoIterator<Item = String>,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let scanner = Scanner::new(Prober::new(config)?);
    scanner.run(futures::stream::iter(domains), writer).await
}
