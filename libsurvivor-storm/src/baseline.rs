use rand::{distributions::Alphanumeric, Rng};
use reqwest::Client;

const PATH_LEN: usize = 12;
const QUERY_KEY_LEN: usize = 6;
const QUERY_VALUE_LEN: usize = 12;

pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A fresh, presumptively non-existent URL on `domain`. Always plain http.
pub fn baseline_url(domain: &str) -> String {
    format!(
        "http://{}/{}?{}={}",
        domain,
        random_token(PATH_LEN),
        random_token(QUERY_KEY_LEN),
        random_token(QUERY_VALUE_LEN)
    )
}

/// Captures the catch-all body a domain serves for unknown paths.
pub async fn fetch_baseline(client: &Client, domain: &str) -> Result<Vec<u8>, reqwest::Error> {
    let url = baseline_url(domain);
    tracing::debug!(%domain, %url, "fetching baseline");
    let response = client.get(&url).send().await?;
    let body = response.bytes().await?;
    Ok(body.to_vec())
}
