use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use modwright_core::UpdateError;
use serde_json::Value;

use modwright_catalog::CatalogFetch;

pub const RELEASE_API_BASE: &str = "https://api.github.com";
pub const RELEASE_WEB_BASE: &str = "https://github.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub tag: String,
    pub asset_url: Option<String>,
}

// Remote side effects the update services need. Rate limiting and auth
// failures surface as Communication errors; a missing release is Ok(None),
// which is a different condition.
pub trait UpdateClient {
    fn latest_release(
        &self,
        repository: &str,
        token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError>;

    fn release_by_tag(
        &self,
        repository: &str,
        tag: &str,
        token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError>;

    fn download(&self, url: &str, destination: &Path) -> Result<u64, UpdateError>;
}

pub fn parse_release(payload: &Value) -> Option<ReleaseInfo> {
    let tag = payload.get("tag_name")?.as_str()?.to_string();
    let asset_url = payload
        .get("assets")
        .and_then(Value::as_array)
        .and_then(|assets| assets.first())
        .and_then(|asset| asset.get("browser_download_url"))
        .and_then(Value::as_str)
        .map(ToString::to_string);
    Some(ReleaseInfo { tag, asset_url })
}

#[derive(Debug)]
pub struct HttpUpdateClient {
    api_base: String,
    client: reqwest::blocking::Client,
}

impl HttpUpdateClient {
    pub fn new() -> Result<Self> {
        Self::with_api_base(RELEASE_API_BASE)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("modwright/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: api_base.into(),
            client,
        })
    }

    fn fetch_release(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError> {
        let mut request = self.client.get(url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|err| UpdateError::communication("release host", err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(UpdateError::communication(
                "release host",
                format!("unexpected status {status} from {url}"),
            ));
        }

        let body = response
            .text()
            .map_err(|err| UpdateError::communication("release host", err.to_string()))?;
        let payload: Value = serde_json::from_str(&body).map_err(|err| {
            UpdateError::communication("release host", format!("invalid release metadata: {err}"))
        })?;
        Ok(parse_release(&payload))
    }
}

impl UpdateClient for HttpUpdateClient {
    fn latest_release(
        &self,
        repository: &str,
        token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError> {
        let url = format!("{}/repos/{repository}/releases/latest", self.api_base);
        self.fetch_release(&url, token)
    }

    fn release_by_tag(
        &self,
        repository: &str,
        tag: &str,
        token: Option<&str>,
    ) -> Result<Option<ReleaseInfo>, UpdateError> {
        let url = format!("{}/repos/{repository}/releases/tags/{tag}", self.api_base);
        self.fetch_release(&url, token)
    }

    fn download(&self, url: &str, destination: &Path) -> Result<u64, UpdateError> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|err| UpdateError::communication("download host", err.to_string()))?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                UpdateError::staging(format!("failed to create {}: {err}", parent.display()))
            })?;
        }

        let mut file = fs::File::create(destination).map_err(|err| {
            UpdateError::staging(format!("failed to create {}: {err}", destination.display()))
        })?;

        let mut reader = response;
        io::copy(&mut reader, &mut file).map_err(|err| {
            UpdateError::communication("download host", format!("transfer failed: {err}"))
        })
    }
}

// Fetches the remotely published catalog document.
#[derive(Debug)]
pub struct HttpCatalogFetch {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpCatalogFetch {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("modwright/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl CatalogFetch for HttpCatalogFetch {
    fn fetch_catalog(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .with_context(|| format!("failed to fetch catalog from {}", self.url))?;
        response
            .text()
            .with_context(|| format!("failed to read catalog body from {}", self.url))
    }
}
