//! Authenticated HTTP client for the chat REST API
//!
//! Wraps reqwest::Client with bearer token injection and status checking.

use anyhow::{bail, Context, Result};
use reqwest::header::CONTENT_TYPE;

/// Authenticated client bound to one API base URL and session token.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    /// Build a client for `base_url` (must be http or https).
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self> {
        let parsed = url::Url::parse(base_url)
            .with_context(|| format!("Invalid API URL '{}'", base_url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("API URL must be http or https, got '{}'", base_url);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET request (bearer auth), returning the decoded JSON body.
    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let resp = check_response(resp, &url).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// POST request with an optional JSON body (bearer auth).
    pub async fn post(
        &self,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let mut req = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request returning the decoded JSON body.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = self.url(path);
        let resp = self.post(path, Some(body)).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run 'ridechat signin'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/api/", "t").unwrap();
        assert_eq!(
            client.url("/messages/42"),
            "http://localhost:8000/api/messages/42"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(ApiClient::new("localhost:8000", "t").is_err());
        assert!(ApiClient::new("ftp://localhost/api", "t").is_err());
        assert!(ApiClient::new("not a url", "t").is_err());
    }
}
