//! Egress proxy pool with round-robin rotation.
//!
//! The pool is fixed at construction. Every call to [`ProxyRotator::next`]
//! advances a shared cursor by one under a mutex, so concurrent probes are
//! spread evenly across the configured endpoints. Bad proxies are never
//! removed; the rotator knows nothing about request outcomes.

use std::{
    fmt,
    sync::{Mutex, PoisonError},
};
use thiserror::Error;

const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Unsupported proxy scheme '{scheme}' in entry: {entry}")]
    UnsupportedScheme { scheme: String, entry: String },
    #[error("Proxy entry must be host:port: {0}")]
    MissingPort(String),
    #[error("Invalid proxy port in entry: {0}")]
    InvalidPort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyEndpoint {
    /// Parses `host:port`, optionally prefixed with a scheme such as `socks5://`.
    pub fn parse(entry: &str) -> Result<Self, ProxyError> {
        let entry = entry.trim();
        let (scheme, rest) = match entry.split_once("://") {
            Some((scheme, rest)) => (scheme.to_lowercase(), rest),
            None => ("http".to_string(), entry),
        };

        if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(ProxyError::UnsupportedScheme {
                scheme,
                entry: entry.to_string(),
            });
        }

        let rest = rest.trim_end_matches('/');
        let (host, port) = rest
            .rsplit_once(':')
            .filter(|(host, _)| !host.is_empty())
            .ok_or_else(|| ProxyError::MissingPort(entry.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ProxyError::InvalidPort(entry.to_string()))?;

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            username: None,
            password: None,
        })
    }

    /// Proxy URL without credentials; credentials travel separately as basic auth.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

pub struct ProxyRotator {
    endpoints: Vec<ProxyEndpoint>,
    cursor: Mutex<usize>,
    username: Option<String>,
    password: Option<String>,
}

impl ProxyRotator {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            endpoints,
            cursor: Mutex::new(0),
            username: None,
            password: None,
        }
    }

    /// A rotator that always answers "direct connection".
    pub fn direct() -> Self {
        Self::new(Vec::new())
    }

    /// Builds the pool from a comma-separated address list. Blank entries are skipped.
    pub fn from_list(addresses: &str) -> Result<Self, ProxyError> {
        let endpoints = addresses
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ProxyEndpoint::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(endpoints))
    }

    /// Shared credentials, applied only when both parts are non-empty.
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        let username = username.filter(|u| !u.is_empty());
        let password = password.filter(|p| !p.is_empty());
        if username.is_some() && password.is_some() {
            self.username = username;
            self.password = password;
        }
        self
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[ProxyEndpoint] {
        &self.endpoints
    }

    /// Returns the next endpoint in round-robin order, or `None` for a direct connection.
    pub fn next(&self) -> Option<ProxyEndpoint> {
        if self.endpoints.is_empty() {
            return None;
        }

        let index = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            let index = *cursor;
            *cursor = (index + 1) % self.endpoints.len();
            index
        };

        let mut endpoint = self.endpoints[index].clone();
        if endpoint.credentials().is_none() {
            endpoint.username = self.username.clone();
            endpoint.password = self.password.clone();
        }
        Some(endpoint)
    }
}

impl Default for ProxyRotator {
    fn default() -> Self {
        Self::direct()
    }
}

impl fmt::Debug for ProxyRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRotator")
            .field("endpoints", &self.endpoints)
            .field("authenticated", &self.username.is_some())
            .finish()
    }
}
