//! Blocking source downloads with a certificate-trust fallback chain.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use url::Url;

/// Environment flag that opts in to the insecure last-resort download.
pub const ALLOW_INSECURE_ENV: &str = "EEPORTAL_ALLOW_INSECURE_SSL";

/// Downloader for corpus sources.
///
/// Some regulatory file servers present certificate chains that a default
/// client rejects (and corporate TLS inspection makes it worse), so a
/// failing download is retried with the alternate TLS backend's trust
/// roots, and finally without verification — but only when the operator
/// has set [`ALLOW_INSECURE_ENV`] to `1`. A document that fails the whole
/// chain aborts the ingestion run.
pub struct Fetcher {
    timeout: Duration,
}

impl Fetcher {
    /// Builds a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Downloads a URL's body bytes through the fallback chain.
    pub fn download(&self, url: &Url) -> Result<Vec<u8>> {
        let default_client = Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build download client")?;
        let first_error = match fetch_bytes(&default_client, url) {
            Ok(bytes) => return Ok(bytes),
            Err(err) => err,
        };

        let rustls_client = Client::builder()
            .timeout(self.timeout)
            .use_rustls_tls()
            .build()
            .context("failed to build rustls download client")?;
        let second_error = match fetch_bytes(&rustls_client, url) {
            Ok(bytes) => return Ok(bytes),
            Err(err) => err,
        };

        if !insecure_allowed() {
            return Err(second_error.context(format!(
                "failed to download {url} (first attempt: {first_error}); if you are behind \
                 TLS inspection and accept the risk, set {ALLOW_INSECURE_ENV}=1 and rerun"
            )));
        }

        eprintln!("warning: downloading {url} without certificate verification");
        let insecure_client = Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build insecure download client")?;
        fetch_bytes(&insecure_client, url)
            .with_context(|| format!("failed to download {url} even without verification"))
    }
}

fn fetch_bytes(client: &Client, url: &Url) -> Result<Vec<u8>> {
    let response = client
        .get(url.clone())
        .send()
        .with_context(|| format!("request to {url} failed"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("{url} answered with an error status"))?;
    let bytes = response
        .bytes()
        .with_context(|| format!("failed to read body from {url}"))?;
    Ok(bytes.to_vec())
}

fn insecure_allowed() -> bool {
    std::env::var(ALLOW_INSECURE_ENV)
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}
