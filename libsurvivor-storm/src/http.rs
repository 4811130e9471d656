use crate::proxy::ProxyEndpoint;
use dashmap::DashMap;
use reqwest::{redirect::Policy, Client, Proxy};
use std::time::Duration;
use thiserror::Error;

const MAX_REDIRECT_HOPS: usize = 10;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid proxy {proxy}: {source}")]
    Proxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to create HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub fresh_connections: bool,
}

pub fn create_http_pool(
    options: ClientOptions,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client, ClientError> {
    let redirect = if options.follow_redirects {
        Policy::limited(MAX_REDIRECT_HOPS)
    } else {
        Policy::none()
    };

    // An idle pool of zero forces a fresh dial, and so a fresh egress, per request.
    let max_idle = if options.fresh_connections { 0 } else { 100 };

    let mut builder = Client::builder()
        .timeout(options.timeout)
        .connect_timeout(options.timeout)
        .redirect(redirect)
        .pool_max_idle_per_host(max_idle)
        .pool_idle_timeout(Duration::from_secs(5))
        .tcp_keepalive(Duration::from_secs(5))
        .tcp_nodelay(true)
        .use_rustls_tls();

    builder = match proxy {
        Some(endpoint) => {
            let mut proxy = Proxy::all(endpoint.url()).map_err(|source| ClientError::Proxy {
                proxy: endpoint.to_string(),
                source,
            })?;
            if let Some((user, pass)) = endpoint.credentials() {
                proxy = proxy.basic_auth(user, pass);
            }
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    builder.build().map_err(ClientError::Build)
}

/// One client per egress: the direct client plus one per proxy endpoint, built on first use.
pub struct ClientRegistry {
    options: ClientOptions,
    direct: Client,
    proxied: DashMap<String, Client>,
}

impl ClientRegistry {
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        Ok(Self {
            options,
            direct: create_http_pool(options, None)?,
            proxied: DashMap::new(),
        })
    }

    pub fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, ClientError> {
        let Some(endpoint) = proxy else {
            return Ok(self.direct.clone());
        };

        let key = endpoint.url();
        if let Some(client) = self.proxied.get(&key) {
            return Ok(client.clone());
        }

        let client = create_http_pool(self.options, Some(endpoint))?;
        Ok(self.proxied.entry(key).or_insert(client).clone())
    }

    /// Builds every proxied client up front so a bad endpoint fails at startup.
    pub fn warm<'a, I>(&self, endpoints: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = &'a ProxyEndpoint>,
    {
        for endpoint in endpoints {
            self.client_for(Some(endpoint))?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.proxied.len()
    }
}
