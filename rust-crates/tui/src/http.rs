use anyhow::{
    Context,
    Result,
    anyhow,
};
use std::time::Duration;

/// Shared HTTP client for every upstream. No timeout unless one is given.
pub fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// GETs `url` and returns the body, failing on non-2xx with the body quoted.
pub async fn fetch_bytes(
    http: &reqwest::Client,
    url: &str,
    what: &str,
) -> Result<Vec<u8>> {
    let res = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("{what} request failed"))?;
    let status = res.status();
    let bytes = res
        .bytes()
        .await
        .with_context(|| format!("failed to read {what} response body"))?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes);
        return Err(anyhow!("{what} responded with {status}: {body}"));
    }
    Ok(bytes.to_vec())
}
