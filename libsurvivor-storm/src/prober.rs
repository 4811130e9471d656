use crate::{
    baseline::fetch_baseline,
    classify::{Classification, Classifier},
    http::{ClientError, ClientOptions, ClientRegistry},
    proxy::{ProxyEndpoint, ProxyRotator},
    types::{DomainVerdict, ProbeResult, ScanConfig, Scheme, PROBE_SCHEMES},
};
use reqwest::Client;
use std::{sync::Arc, time::Instant};
use tokio::task;
use tracing::{debug, info, warn};

enum Attempt {
    Matched(Classification),
    Rejected(Classification),
    RedirectDropped(u16),
    Failed,
}

pub struct Prober {
    clients: Arc<ClientRegistry>,
    rotator: Arc<ProxyRotator>,
    classifier: Classifier,
    config: Arc<ScanConfig>,
}

impl Prober {
    /// A prober that connects directly, without proxies.
    pub fn new(config: ScanConfig) -> Result<Self, ClientError> {
        Self::with_rotator(config, Arc::new(ProxyRotator::direct()))
    }

    pub fn with_rotator(config: ScanConfig, rotator: Arc<ProxyRotator>) -> Result<Self, ClientError> {
        let clients = ClientRegistry::new(ClientOptions {
            timeout: config.timeout,
            follow_redirects: !config.drop_redirects,
            fresh_connections: config.new_connection,
        })?;
        clients.warm(rotator.endpoints())?;

        Ok(Self {
            clients: Arc::new(clients),
            rotator,
            classifier: Classifier::new(&config),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn rotator(&self) -> &ProxyRotator {
        &self.rotator
    }

    /// Picks the egress for one outbound request.
    fn next_client(&self) -> Result<(Client, Option<ProxyEndpoint>), ClientError> {
        let proxy = self.rotator.next();
        let client = self.clients.client_for(proxy.as_ref())?;
        Ok((client, proxy))
    }

    pub async fn probe_one(&self, domain: &str) -> ProbeResult {
        let start = Instant::now();
        let mut transport_errors = 0;

        let baseline = if self.config.use_baseline {
            match self.baseline(domain).await {
                Ok(body) => Some(Arc::<[u8]>::from(body)),
                Err(reason) => {
                    debug!(%domain, %reason, "baseline unavailable, skipping domain");
                    return ProbeResult {
                        domain: domain.to_string(),
                        verdict: DomainVerdict::BaselineUnavailable { reason },
                        transport_errors: 1,
                        duration: start.elapsed(),
                    };
                }
            }
        } else {
            None
        };

        for scheme in PROBE_SCHEMES {
            let verdict = match self.attempt(domain, scheme, baseline.clone()).await {
                Attempt::Matched(classification) => {
                    debug!(%domain, %scheme, ?classification, "matched");
                    DomainVerdict::Matched { scheme }
                }
                Attempt::RedirectDropped(status) => {
                    DomainVerdict::RedirectDropped { scheme, status }
                }
                Attempt::Rejected(classification) => {
                    debug!(%domain, %scheme, ?classification, "no match");
                    continue;
                }
                Attempt::Failed => {
                    transport_errors += 1;
                    continue;
                }
            };

            return ProbeResult {
                domain: domain.to_string(),
                verdict,
                transport_errors,
                duration: start.elapsed(),
            };
        }

        ProbeResult {
            domain: domain.to_string(),
            verdict: DomainVerdict::NoMatch,
            transport_errors,
            duration: start.elapsed(),
        }
    }

    async fn baseline(&self, domain: &str) -> Result<Vec<u8>, String> {
        let (client, _) = self.next_client().map_err(|e| e.to_string())?;
        fetch_baseline(&client, domain)
            .await
            .map_err(|e| e.to_string())
    }

    async fn attempt(&self, domain: &str, scheme: Scheme, baseline: Option<Arc<[u8]>>) -> Attempt {
        let url = scheme.url_for(domain);
        let (client, proxy) = match self.next_client() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%url, error = %e, "no client for egress");
                return Attempt::Failed;
            }
        };
        let egress = proxy.map_or_else(|| "direct".to_string(), |p| p.to_string());

        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(%url, %egress, error = %e, "error fetching");
                return Attempt::Failed;
            }
        };

        if self.config.log_fetch_ip {
            self.log_egress_ip(&client, &url).await;
        }

        let status = response.status();
        if self.config.drop_redirects && status.is_redirection() {
            debug!(%url, status = status.as_u16(), "skipping redirect");
            return Attempt::RedirectDropped(status.as_u16());
        }

        let classifier = self.classifier;
        let classification = if classifier.needs_body(status.as_u16()) {
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(%url, %egress, error = %e, "error reading response body");
                    return Attempt::Failed;
                }
            };
            // Jaro-Winkler is quadratic in the page size; keep it off the reactor.
            let compared = task::spawn_blocking(move || {
                classifier.classify(status.as_u16(), Some(&body[..]), baseline.as_deref())
            })
            .await;
            match compared {
                Ok(classification) => classification,
                Err(e) => {
                    warn!(%url, error = %e, "baseline comparison failed");
                    return Attempt::Failed;
                }
            }
        } else {
            classifier.classify(status.as_u16(), None, baseline.as_deref())
        };

        if let Classification::Distinct { similarity } | Classification::CatchAll { similarity } =
            classification
        {
            debug!(%url, similarity, "baseline comparison");
        }

        if classification.is_match() {
            Attempt::Matched(classification)
        } else {
            Attempt::Rejected(classification)
        }
    }

    /// Diagnostic only: reports which address the egress presented.
    async fn log_egress_ip(&self, client: &Client, fetched: &str) {
        let echo = &self.config.ip_echo_url;
        let result = match client.get(echo).send().await {
            Ok(response) => response.text().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(ip) => info!(url = %fetched, ip = %ip.trim(), "fetched using egress ip"),
            Err(e) => warn!(url = %fetched, error = %e, "error getting fetch ip"),
        }
    }
}

impl Clone for Prober {
    fn clone(&self) -> Self {
        Self {
            clients: Arc::clone(&self.clients),
            rotator: Arc::clone(&self.rotator),
            classifier: self.classifier,
            config: Arc::clone(&self.config),
        }
    }
}
