use libsurvivor_storm::{ProxyError, ProxyRotator};
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    path::{Path, PathBuf},
};

pub const ENV_PROXY_ADDRESSES: &str = "PROXY_ADDRESSES";
pub const ENV_PROXY_USERNAME: &str = "PROXY_USERNAME";
pub const ENV_PROXY_PASSWORD: &str = "PROXY_PASSWORD";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Proxy settings after merging the environment over the config file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub addresses: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxySettings {
    pub fn resolve<F>(config: &Config, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        match non_empty(ENV_PROXY_ADDRESSES) {
            Some(addresses) => Self {
                addresses,
                username: non_empty(ENV_PROXY_USERNAME),
                password: non_empty(ENV_PROXY_PASSWORD),
            },
            None => Self {
                addresses: config.proxy.addresses.join(","),
                username: non_empty(ENV_PROXY_USERNAME).or_else(|| config.proxy.username.clone()),
                password: non_empty(ENV_PROXY_PASSWORD).or_else(|| config.proxy.password.clone()),
            },
        }
    }

    pub fn into_rotator(self) -> Result<ProxyRotator, ProxyError> {
        Ok(ProxyRotator::from_list(&self.addresses)?.with_credentials(self.username, self.password))
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ds").join("config.toml"))
}

/// Loads the TOML config. A missing default config is not an error; an
/// explicitly requested one must exist and parse.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(Config::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
    let config = toml::from_str(&content)
        .map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))?;
    Ok(config)
}

/// Loads `.env` style variables into the process environment. Missing files are fine.
pub fn load_env_file(explicit: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let loaded = match explicit {
        Some(path) => dotenvy::from_path(path).map(|_| Some(path.to_path_buf())),
        None => dotenvy::dotenv().map(Some),
    };

    match loaded {
        Ok(Some(path)) => {
            tracing::debug!(path = %path.display(), "loaded proxy environment");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) if e.not_found() && explicit.is_none() => {
            tracing::debug!("no .env file found, proceeding without .env proxies");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_default_config_toml() -> String {
    r#"# Domain Survivor (ds) Configuration

[proxy]
# Egress proxies, used round-robin. PROXY_ADDRESSES in the environment or a
# .env file takes precedence over this list.
# addresses = ["proxy1.example.com:8080", "socks5://proxy2.example.com:1080"]
addresses = []

# Shared credentials, applied only when both are set.
# username = "user"
# password = "secret"
"#
    .to_string()
}
