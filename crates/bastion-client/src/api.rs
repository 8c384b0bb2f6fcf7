//! REST client for the registry server.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{ClientConfig, check_server_url};
use crate::error::{ClientError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub owner: &'a str,
    pub local_user: &'a str,
    pub public_key: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub name: String,
    pub port: u16,
    pub server: String,
    pub tunnel_port: u16,
    pub ssh_user: String,
    #[serde(default)]
    pub server_public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineEntry {
    pub name: String,
    pub owner: String,
    pub port: u16,
    pub local_user: String,
    #[serde(default)]
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub status: String,
    pub machine_count: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Registry API client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        check_server_url(base_url)?;

        let mut headers = HeaderMap::new();
        if !api_key.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| ClientError::NotConfigured("api_key"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.require_server_url()?, config.require_api_key()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Turn a non-2xx response into `ClientError::Api`, then decode the body.
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or(text);
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn status(&self) -> Result<ServerStatus> {
        let resp = self.http.get(self.url("/api/status")).send().await?;
        Self::decode(resp).await
    }

    pub async fn register(&self, req: &RegisterRequest<'_>) -> Result<Registration> {
        let resp = self
            .http
            .post(self.url("/api/register"))
            .json(req)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn list(&self) -> Result<Vec<MachineEntry>> {
        let resp = self.http.get(self.url("/api/machines")).send().await?;
        Self::decode(resp).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/machines/{name}")))
            .send()
            .await?;
        Self::decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    pub async fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        let resp = self
            .http
            .put(self.url(&format!("/api/machines/{name}/rename")))
            .json(&json!({ "new_name": new_name }))
            .send()
            .await?;
        Self::decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    pub async fn heartbeat(&self, name: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/api/heartbeat"))
            .json(&json!({ "name": name }))
            .send()
            .await?;
        Self::decode::<serde_json::Value>(resp).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rejects_plain_http_to_remote_hosts() {
        assert!(matches!(
            ApiClient::new("http://bastion.example.com", "k"),
            Err(ClientError::InsecureUrl(_))
        ));
        assert!(ApiClient::new("https://bastion.example.com/", "k").is_ok());
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = ApiClient::new("https://bastion.example.com/", "k").unwrap();
        assert_eq!(
            client.url("/api/status"),
            "https://bastion.example.com/api/status"
        );
    }

    #[test]
    fn from_config_requires_credentials() {
        let cfg = ClientConfig {
            server_url: "https://b.example".into(),
            ..Default::default()
        };
        assert!(matches!(
            ApiClient::from_config(&cfg),
            Err(ClientError::NotConfigured("api_key"))
        ));
    }
}
