//! Manifest source reading `assets.txt` over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::render_asset_url;
use ula_core::asset::{Asset, ManifestError, ManifestSource};
use ula_core::error::{Result, UlaError};

const MANIFEST_FILE: &str = "assets.txt";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches `<base>/assets.txt`, one `filename timestamp` pair per line.
#[derive(Clone)]
pub struct HttpManifestSource {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for HttpManifestSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpManifestSource")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpManifestSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("ula/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UlaError::network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn manifest_url(&self, asset_type: &str, architecture: &str) -> String {
        format!(
            "{}/{}",
            render_asset_url(&self.base_url, asset_type, architecture),
            MANIFEST_FILE
        )
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch_manifest(
        &self,
        asset_type: &str,
        architecture: &str,
    ) -> std::result::Result<Vec<Asset>, ManifestError> {
        let url = self.manifest_url(asset_type, architecture);
        tracing::debug!(%url, "Fetching asset manifest");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ManifestError::Unreachable(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(ManifestError::Unreachable(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ManifestError::Unreachable(format!("{}: {}", url, e)))?;

        parse_manifest(&body, asset_type, architecture)
    }
}

/// Parses manifest lines of the form `filename timestamp`.
///
/// Blank lines and the manifest's own entry are skipped.
pub fn parse_manifest(
    body: &str,
    asset_type: &str,
    architecture: &str,
) -> std::result::Result<Vec<Asset>, ManifestError> {
    let mut assets = Vec::new();
    for (index, line) in body.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(filename) = fields.next() else {
            continue;
        };
        if filename == MANIFEST_FILE {
            continue;
        }

        let timestamp = fields
            .next()
            .and_then(|field| field.parse::<u64>().ok())
            .ok_or_else(|| {
                ManifestError::Malformed(format!("line {}: '{}'", index + 1, line.trim()))
            })?;
        assets.push(Asset::new(filename, asset_type, architecture, timestamp));
    }
    Ok(assets)
}
