//! # Vault HTTP Client
//!
//! Minimal client for the pieces of the Vault HTTP API this operator needs:
//!
//! - mount preflight (`/v1/sys/internal/ui/mounts/{path}`) to discover a
//!   path's KV engine version and mount point
//! - version-aware secret reads (KV2 paths get a `data` segment inserted
//!   after the mount)
//! - listing for the recursive wildcard crawl (KV2 uses `metadata`)
//! - JWT login for the service-account token exchange
//!
//! Requests honor the configured timeout and are retried on transport errors
//! and 5xx responses up to the configured retry count. Everything above the
//! transport layer surfaces failures immediately.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use super::data::SecretBundle;
use super::error::VaultError;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug, Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    addr: String,
    token: String,
    max_retries: u32,
}

impl VaultClient {
    pub fn new(addr: &str, timeout: Duration, max_retries: u32) -> Result<Self, VaultError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::Request {
                path: addr.to_string(),
                source: e,
            })?;

        Ok(Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            token: String::new(),
            max_retries,
        })
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = token;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Discover the mount point and KV engine version for `path`.
    ///
    /// A 404 from the preflight endpoint means a Vault predating it; those
    /// only speak KV1. Any version other than 1 or 2 is a hard error.
    pub async fn mount_info(&self, path: &str) -> Result<(String, u8), VaultError> {
        let url = format!("{}/v1/sys/internal/ui/mounts/{}", self.addr, path);
        let response = self.send(Method::GET, &url, path, None).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok((String::new(), 1));
        }
        let body = self.parse_body(response, path).await?;
        let data = body
            .get("data")
            .ok_or_else(|| VaultError::MalformedResponse(format!("no data in preflight for {path:?}")))?;

        let mount = data
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let version = match data.pointer("/options/version").and_then(Value::as_str) {
            None | Some("" | "1") => 1,
            Some("2") => 2,
            Some(other) => {
                return Err(VaultError::UnsupportedVersion {
                    path: path.to_string(),
                    version: other.to_string(),
                })
            }
        };

        debug!(path = %path, mount = %mount, version, "vault mount preflight");
        Ok((mount, version))
    }

    /// Read the secret at `path`, addressing it per the mount's KV version.
    /// Returns the bundle plus the discovered engine version.
    pub async fn read(&self, path: &str) -> Result<(SecretBundle, u8), VaultError> {
        let (mount, version) = self.mount_info(path).await?;
        let api_path = match version {
            2 => add_kv_prefix(path, &mount, "data"),
            _ => path.to_string(),
        };

        let url = format!("{}/v1/{}", self.addr, api_path);
        let response = self.send(Method::GET, &url, path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(VaultError::NotFound(path.to_string()));
        }
        let body = self.parse_body(response, path).await?;

        // KV2 wraps the payload one level deeper than KV1.
        let payload = if version == 2 {
            body.pointer("/data/data")
        } else {
            body.get("data")
        };
        let bundle = match payload {
            Some(Value::Object(fields)) if !fields.is_empty() => fields.clone(),
            Some(Value::Null) | None => return Err(VaultError::Empty(path.to_string())),
            Some(Value::Object(_)) => return Err(VaultError::Empty(path.to_string())),
            Some(_) => {
                return Err(VaultError::MalformedResponse(format!(
                    "secret data at {path:?} is not an object"
                )))
            }
        };
        Ok((bundle, version))
    }

    /// List the entries directly under `api_path` (already version-aware;
    /// the caller inserts `metadata` for KV2 mounts). Entries ending in `/`
    /// are sub-directories.
    pub async fn list(&self, api_path: &str) -> Result<Vec<String>, VaultError> {
        let url = format!("{}/v1/{}?list=true", self.addr, api_path);
        let response = self.send(Method::GET, &url, api_path, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(VaultError::NotFound(api_path.to_string()));
        }
        let body = self.parse_body(response, api_path).await?;

        let keys = body
            .pointer("/data/keys")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                VaultError::MalformedResponse(format!("no keys in listing of {api_path:?}"))
            })?;
        keys.iter()
            .map(|key| {
                key.as_str().map(str::to_string).ok_or_else(|| {
                    VaultError::MalformedResponse(format!(
                        "non-string key in listing of {api_path:?}"
                    ))
                })
            })
            .collect()
    }

    /// Exchange a JWT for a Vault token via the login endpoint at
    /// `auth_path`. Returns the client token and its TTL in seconds.
    pub async fn login(
        &self,
        auth_path: &str,
        role: &str,
        jwt: &str,
    ) -> Result<(String, u64), VaultError> {
        let auth_path = auth_path.trim_start_matches('/');
        let url = format!("{}/v1/{}", self.addr, auth_path);
        let body = json!({ "role": role, "jwt": jwt });

        let response = self.send(Method::POST, &url, auth_path, Some(&body)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VaultError::ExchangeFailed(format!(
                "login at {auth_path:?} returned status {status}"
            )));
        }
        let body: Value = response.json().await.map_err(|e| {
            VaultError::MalformedResponse(format!("login response at {auth_path:?}: {e}"))
        })?;

        let token = body
            .pointer("/auth/client_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                VaultError::MalformedResponse("login response carries no client token".to_string())
            })?
            .to_string();
        let ttl = body
            .pointer("/auth/lease_duration")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                VaultError::MalformedResponse("login response carries no token TTL".to_string())
            })?;

        Ok((token, ttl))
    }

    /// One request with linear-backoff retries on transport errors and 5xx.
    async fn send(
        &self,
        method: Method,
        url: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, VaultError> {
        let mut attempt: u32 = 0;
        loop {
            let result = self.build(method.clone(), url, body).send().await;
            match result {
                Ok(response) if response.status().is_server_error() && attempt < self.max_retries => {
                    debug!(path = %path, status = %response.status(), attempt, "retrying vault request");
                }
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_retries => {
                    debug!(path = %path, error = %e, attempt, "retrying vault request");
                }
                Err(e) => {
                    return Err(VaultError::Request {
                        path: path.to_string(),
                        source: e,
                    })
                }
            }
            attempt += 1;
            tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
        }
    }

    fn build(&self, method: Method, url: &str, body: Option<&Value>) -> RequestBuilder {
        let mut request = self.http.request(method, url);
        if !self.token.is_empty() {
            request = request.header(VAULT_TOKEN_HEADER, &self.token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
    }

    async fn parse_body(&self, response: Response, path: &str) -> Result<Value, VaultError> {
        let status = response.status();
        if !status.is_success() {
            return Err(VaultError::Api {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|e| {
            VaultError::MalformedResponse(format!("response body at {path:?}: {e}"))
        })
    }
}

/// Insert `api_prefix` (`data` or `metadata`) right after the mount point of
/// `path`, the way versioned KV engines address reads and listings.
pub fn add_kv_prefix(path: &str, mount: &str, api_prefix: &str) -> String {
    let mount = mount.trim_end_matches('/');
    if mount.is_empty() {
        return format!("{api_prefix}/{path}");
    }
    if path == mount {
        return format!("{mount}/{api_prefix}");
    }
    let rest = path
        .strip_prefix(mount)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(path);
    format!("{mount}/{api_prefix}/{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_kv_prefix_inserts_after_mount() {
        assert_eq!(
            add_kv_prefix("secret/seeds/team1/project1", "secret/", "data"),
            "secret/data/seeds/team1/project1"
        );
        assert_eq!(
            add_kv_prefix("secret/seeds/team1/", "secret/", "metadata"),
            "secret/metadata/seeds/team1/"
        );
    }

    #[test]
    fn test_add_kv_prefix_mount_root() {
        assert_eq!(add_kv_prefix("secret", "secret/", "data"), "secret/data");
    }

    #[test]
    fn test_add_kv_prefix_unknown_mount() {
        // Old Vaults answer the preflight with 404; mount stays empty.
        assert_eq!(add_kv_prefix("kv/app", "", "data"), "data/kv/app");
    }
}
