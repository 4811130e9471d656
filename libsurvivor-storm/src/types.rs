use serde::Serialize;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

pub const DEFAULT_IP_ECHO_URL: &str = "https://ip.oxylabs.io/location";

/// Protocols are always attempted in this order.
pub const PROBE_SCHEMES: [Scheme; 2] = [Scheme::Http, Scheme::Https];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn url_for(self, domain: &str) -> String {
        format!("{}://{}", self.as_str(), domain)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scan-wide matching criteria and transport settings.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub workers: usize,
    pub timeout: Duration,
    pub target_status: u16,
    pub check_alive: bool,
    pub use_baseline: bool,
    pub baseline_threshold: f64,
    pub drop_redirects: bool,
    pub new_connection: bool,
    pub log_fetch_ip: bool,
    pub ip_echo_url: String,
    pub batch_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 100,
            timeout: Duration::from_secs(5),
            target_status: 200,
            check_alive: false,
            use_baseline: false,
            baseline_threshold: 0.9,
            drop_redirects: false,
            new_connection: false,
            log_fetch_ip: false,
            ip_echo_url: DEFAULT_IP_ECHO_URL.to_string(),
            batch_size: 1000,
        }
    }
}

/// Final outcome of evaluating one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainVerdict {
    Matched { scheme: Scheme },
    NoMatch,
    RedirectDropped { scheme: Scheme, status: u16 },
    BaselineUnavailable { reason: String },
}

impl DomainVerdict {
    pub fn is_match(&self) -> bool {
        matches!(self, DomainVerdict::Matched { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub domain: String,
    pub verdict: DomainVerdict,
    pub transport_errors: u32,
    pub duration: Duration,
}

/// Aggregate counters reported at the end of a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanStats {
    pub processed: u64,
    pub matched: u64,
    pub no_match: u64,
    pub redirects_dropped: u64,
    pub baseline_failures: u64,
    pub transport_errors: u64,
    pub write_errors: u64,
    pub written: u64,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    processed: AtomicU64,
    matched: AtomicU64,
    no_match: AtomicU64,
    redirects_dropped: AtomicU64,
    baseline_failures: AtomicU64,
    transport_errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record(&self, result: &ProbeResult) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.transport_errors
            .fetch_add(u64::from(result.transport_errors), Ordering::Relaxed);
        let counter = match result.verdict {
            DomainVerdict::Matched { .. } => &self.matched,
            DomainVerdict::NoMatch => &self.no_match,
            DomainVerdict::RedirectDropped { .. } => &self.redirects_dropped,
            DomainVerdict::BaselineUnavailable { .. } => &self.baseline_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ScanStats {
        ScanStats {
            processed: self.processed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            redirects_dropped: self.redirects_dropped.load(Ordering::Relaxed),
            baseline_failures: self.baseline_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            ..ScanStats::default()
        }
    }
}
