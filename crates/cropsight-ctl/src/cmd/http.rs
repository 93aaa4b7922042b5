//! Shared HTTP request helpers for CLI commands.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

const OWNER_HEADER: &str = "x-owner-id";

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    owner: String,
}

/// Error body the daemon returns with non-2xx statuses.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl Client {
    pub fn new(port: u16, owner: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://127.0.0.1:{}/api", port),
            owner: owner.to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let req = self.http.get(self.url(path));
        self.send(req).await
    }

    pub async fn delete_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let req = self.http.delete(self.url(path));
        self.send(req).await
    }

    pub async fn post_multipart<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T> {
        let req = self.http.post(self.url(path)).multipart(form);
        self.send(req).await
    }

    async fn send<T: for<'de> Deserialize<'de>>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = req
            .header(OWNER_HEADER, &self.owner)
            .send()
            .await
            .with_context(|| format!("failed to connect to cropsightd at {}, is it running?", self.base_url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            bail!("daemon returned {}: {}", status, message);
        }
        resp.json::<T>().await.context("failed to parse response")
    }
}
