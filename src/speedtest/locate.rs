use super::{Discovery, Location, Target};
use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DOWNLOAD_KEY: &str = "wss:///ndt/v7/download";
const UPLOAD_KEY: &str = "wss:///ndt/v7/upload";

#[derive(Debug, Deserialize)]
struct NearestResponse {
    #[serde(default)]
    results: Vec<NearestResult>,
}

#[derive(Debug, Deserialize)]
struct NearestResult {
    machine: String,
    #[serde(default)]
    location: Location,
    #[serde(default)]
    urls: HashMap<String, String>,
}

impl From<NearestResult> for Target {
    fn from(mut result: NearestResult) -> Self {
        Self {
            download_url: result.urls.remove(DOWNLOAD_KEY),
            upload_url: result.urls.remove(UPLOAD_KEY),
            machine: result.machine,
            location: result.location,
        }
    }
}

/// Client for the Measurement Lab locate v2 API.
pub struct LocateClient {
    http: reqwest::Client,
    base_url: String,
    client_name: String,
    client_version: String,
}

impl LocateClient {
    pub fn new(base_url: &str, client_name: &str, client_version: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("{client_name}/{client_version}"))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_name: client_name.to_string(),
            client_version: client_version.to_string(),
        })
    }
}

impl Discovery for LocateClient {
    async fn nearest(&self, service: &str) -> Result<Vec<Target>> {
        let url = format!("{}/v2/nearest/{}", self.base_url, service.trim_matches('/'));
        debug!(%url, "locating nearest servers");

        let response = self
            .http
            .get(&url)
            .query(&[
                ("client_name", self.client_name.as_str()),
                ("client_version", self.client_version.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            bail!("locate service returned {status}");
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }

        let body: NearestResponse = response.json().await?;
        Ok(body.results.into_iter().map(Target::from).collect())
    }
}
