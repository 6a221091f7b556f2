//! Thin HTTP client for the management API

use anyhow::{anyhow, Context, Result};
use reqwest::{Method, StatusCode};
use serde_json::Value;

const SECRET_HEADER: &str = "x-taskq-secret";

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

impl ApiClient {
    pub fn new(base_url: &str, secret: Option<&str>) -> Result<Self> {
        let secret = secret
            .ok_or_else(|| anyhow!("no secret configured; set TASKQ_SECRET or pass --secret"))?
            .to_string();

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path).await
    }

    pub async fn post(&self, path: &str) -> Result<Value> {
        self.request(Method::POST, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::DELETE, path).await
    }

    async fn request(&self, method: Method, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(%method, %url, "management request");

        let response = self
            .http
            .request(method, &url)
            .header(SECRET_HEADER, &self.secret)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("invalid response from {url}"))?;

        if !status.is_success() {
            return Err(anyhow!(
                "{}: {}",
                friendly_status(status),
                body["error"]["message"].as_str().unwrap_or("unknown error")
            ));
        }

        Ok(body)
    }
}

fn friendly_status(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "unauthorized (check TASKQ_SECRET)",
        StatusCode::NOT_FOUND => "not found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "rejected",
        _ => "server error",
    }
}
