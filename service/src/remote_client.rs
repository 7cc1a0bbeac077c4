//! Concrete [`shared::remote::RemoteHost`] backed by an OpenList-compatible
//! file listing API (login, `fs/list`, `fs/get`, `fs/remove`, `/me`).
//!
//! Grounded directly on the donor project's Python client: same endpoints,
//! same request shapes, same token-lazily-obtained-on-first-use behavior.

use anyhow::Context;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use shared::remote::{ListingPage, RemoteFile, RemoteHost};
use std::sync::RwLock;
use tracing::{debug, warn};

pub struct OpenListClient {
    base_url: String,
    public_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    token: RwLock<Option<String>>,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i32,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListDirData {
    #[serde(default)]
    content: Vec<ListEntry>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified: String,
    #[serde(default)]
    sign: String,
}

impl OpenListClient {
    pub fn new(
        url: &str,
        username: Option<String>,
        password: Option<String>,
        token: Option<String>,
        public_url: Option<String>,
        timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client for remote host")?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            public_url: public_url.map(|u| u.trim_end_matches('/').to_string()),
            username,
            password,
            token: RwLock::new(token),
            http,
        })
    }

    fn current_token(&self) -> Option<String> {
        self.token.read().unwrap().clone()
    }

    async fn ensure_token(&self) -> anyhow::Result<Option<String>> {
        if let Some(token) = self.current_token() {
            return Ok(Some(token));
        }
        if self.username.is_some() && self.password.is_some() {
            return Ok(Some(self.login().await?));
        }
        Ok(None)
    }

    async fn auth_headers(&self) -> anyhow::Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = self.ensure_token().await? {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token).parse()?,
            );
        }
        Ok(headers)
    }

    /// Build the download URL for a remote file, substituting the public
    /// base URL when one is configured (for a client-facing stub rather
    /// than the backend's own address).
    pub fn download_url(&self, file: &RemoteFile) -> Option<String> {
        let sign = file.sign.as_ref()?;
        let url = format!("{}/d/{}/{}", self.base_url, sign, file.name);
        Some(match &self.public_url {
            Some(public) => url.replacen(&self.base_url, public, 1),
            None => url,
        })
    }

    /// Build the raw (un-signed) URL variant some remotes expose.
    pub fn raw_url(&self, file: &RemoteFile) -> String {
        format!("{}/d{}", self.base_url, file.path)
    }

    /// Send a request, retrying on 429/5xx with exponential backoff up to
    /// [`shared::defaults::default_remote_max_retries`] total retries
    /// (§8.1.8). `build` is called fresh on every attempt since a sent
    /// `RequestBuilder` cannot be replayed.
    async fn send_with_retry<F>(&self, build: F) -> shared::Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_retries = shared::defaults::default_remote_max_retries();
        let mut attempt = 0;

        loop {
            let response = build()
                .send()
                .await
                .map_err(|e| shared::Error::RemoteHost(format!("request failed: {}", e)))?;

            let status = response.status();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            if !retryable || attempt >= max_retries {
                return Ok(response);
            }

            let delay_ms = shared::utils::calculate_backoff_delay(attempt, 500, 10_000);
            warn!(status = %status, attempt, delay_ms, "remote host call failed, retrying");
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            attempt += 1;
        }
    }
}

impl RemoteHost for OpenListClient {
    async fn login(&self) -> shared::Result<String> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| shared::Error::RemoteHost("no username configured".to_string()))?;
        let password = self
            .password
            .clone()
            .ok_or_else(|| shared::Error::RemoteHost("no password configured".to_string()))?;

        let response = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| shared::Error::RemoteHost(format!("login request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(shared::Error::RemoteHost(format!(
                "login failed: HTTP {}",
                response.status()
            )));
        }

        let envelope: Envelope<LoginData> = response
            .json()
            .await
            .map_err(|e| shared::Error::RemoteHost(format!("login response malformed: {}", e)))?;

        if envelope.code != 200 {
            return Err(shared::Error::RemoteHost(format!(
                "login rejected: {}",
                envelope.message
            )));
        }

        let token = envelope
            .data
            .ok_or_else(|| shared::Error::RemoteHost("login response missing token".to_string()))?
            .token;

        *self.token.write().unwrap() = Some(token.clone());
        debug!(url = %self.base_url, "authenticated with remote host");
        Ok(token)
    }

    async fn list_dir(&self, path: &str, page: u32, per_page: u32) -> shared::Result<ListingPage> {
        let headers = self
            .auth_headers()
            .await
            .map_err(|e| shared::Error::RemoteHost(e.to_string()))?;

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(format!("{}/api/fs/list", self.base_url))
                    .headers(headers.clone())
                    .json(&json!({
                        "path": path,
                        "page": page,
                        "per_page": per_page,
                        "refresh": false,
                    }))
            })
            .await?;

        if !response.status().is_success() {
            return Err(shared::Error::RemoteHost(format!(
                "list_dir({}) failed: HTTP {}",
                path,
                response.status()
            )));
        }

        let envelope: Envelope<ListDirData> = response.json().await.map_err(|e| {
            shared::Error::RemoteHost(format!("list_dir({}) response malformed: {}", path, e))
        })?;

        if envelope.code != 200 {
            warn!(path, message = %envelope.message, "list_dir rejected by remote");
            return Err(shared::Error::RemoteHost(envelope.message));
        }

        let data = envelope.data.unwrap_or(ListDirData {
            content: Vec::new(),
            total: 0,
        });

        let entries = data
            .content
            .into_iter()
            .map(|entry| {
                let full_path = format!("{}/{}", path.trim_end_matches('/'), entry.name);
                RemoteFile {
                    name: entry.name,
                    path: full_path,
                    is_dir: entry.is_dir,
                    size: entry.size,
                    modified: parse_modified(&entry.modified),
                    sign: if entry.sign.is_empty() {
                        None
                    } else {
                        Some(entry.sign)
                    },
                }
            })
            .collect();

        Ok(ListingPage {
            entries,
            total: data.total,
        })
    }

    async fn get_file_info(&self, path: &str) -> shared::Result<RemoteFile> {
        let headers = self
            .auth_headers()
            .await
            .map_err(|e| shared::Error::RemoteHost(e.to_string()))?;

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(format!("{}/api/fs/get", self.base_url))
                    .headers(headers.clone())
                    .json(&json!({ "path": path }))
            })
            .await?;

        if !response.status().is_success() {
            return Err(shared::Error::RemoteHost(format!(
                "get_file_info({}) failed: HTTP {}",
                path,
                response.status()
            )));
        }

        let envelope: Envelope<ListEntry> = response.json().await.map_err(|e| {
            shared::Error::RemoteHost(format!("get_file_info({}) response malformed: {}", path, e))
        })?;

        if envelope.code != 200 {
            return Err(shared::Error::RemoteHost(envelope.message));
        }

        let entry = envelope
            .data
            .ok_or_else(|| shared::Error::RemoteHost("get_file_info missing data".to_string()))?;

        Ok(RemoteFile {
            name: entry.name,
            path: path.to_string(),
            is_dir: entry.is_dir,
            size: entry.size,
            modified: parse_modified(&entry.modified),
            sign: if entry.sign.is_empty() {
                None
            } else {
                Some(entry.sign)
            },
        })
    }

    async fn remove(&self, paths: &[String]) -> shared::Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let headers = self
            .auth_headers()
            .await
            .map_err(|e| shared::Error::RemoteHost(e.to_string()))?;

        let response = self
            .send_with_retry(|| {
                self.http
                    .post(format!("{}/api/fs/remove", self.base_url))
                    .headers(headers.clone())
                    .json(&json!({ "paths": paths }))
            })
            .await?;

        if !response.status().is_success() {
            return Err(shared::Error::RemoteHost(format!(
                "remove failed: HTTP {}",
                response.status()
            )));
        }

        let envelope: Envelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| shared::Error::RemoteHost(format!("remove response malformed: {}", e)))?;

        if envelope.code != 200 {
            return Err(shared::Error::RemoteHost(envelope.message));
        }

        Ok(())
    }

    async fn test_connection(&self) -> shared::Result<()> {
        let headers = self
            .auth_headers()
            .await
            .map_err(|e| shared::Error::RemoteHost(e.to_string()))?;

        let response = self
            .http
            .get(format!("{}/api/me", self.base_url))
            .headers(headers)
            .send()
            .await
            .map_err(|e| shared::Error::RemoteHost(format!("connection test failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(());
        }

        if self.current_token().is_none() && self.username.is_some() && self.password.is_some() {
            self.login().await?;
            return Ok(());
        }

        Err(shared::Error::RemoteHost(format!(
            "connection test failed: HTTP {}",
            response.status()
        )))
    }
}

fn parse_modified(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_url_substitutes_public_base() {
        let client = OpenListClient::new(
            "http://backend.internal:5244",
            None,
            None,
            Some("tok".to_string()),
            Some("https://public.example".to_string()),
            30,
        )
        .unwrap();

        let file = RemoteFile {
            name: "movie.mkv".to_string(),
            path: "/media/movie.mkv".to_string(),
            is_dir: false,
            size: 100,
            modified: None,
            sign: Some("abc123".to_string()),
        };

        assert_eq!(
            client.download_url(&file),
            Some("https://public.example/d/abc123/movie.mkv".to_string())
        );
    }

    #[test]
    fn test_download_url_none_without_sign() {
        let client =
            OpenListClient::new("http://backend.internal:5244", None, None, None, None, 30)
                .unwrap();
        let file = RemoteFile {
            name: "movie.mkv".to_string(),
            path: "/media/movie.mkv".to_string(),
            is_dir: false,
            size: 100,
            modified: None,
            sign: None,
        };
        assert_eq!(client.download_url(&file), None);
    }
}
