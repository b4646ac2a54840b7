//! Consul KV client
//!
//! Speaks the Consul HTTP KV API over plain `reqwest`: recursive listings
//! carry base64 values and a per-key `ModifyIndex`, which maps directly onto
//! [`RemoteEntry`]. A 404 on a listing means "no keys under this prefix", not
//! an error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{KvStore, RemoteEntry};
use crate::error::KvError;

/// [`KvStore`] implementation backed by a Consul agent's HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulKv {
    client: reqwest::Client,
    base_url: String,
}

/// Wire shape of one entry in a `GET /v1/kv/<prefix>?recurse` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvPair {
    key: String,
    /// Base64-encoded; `null` for zero-length values.
    value: Option<String>,
    modify_index: u64,
}

impl ConsulKv {
    /// Connect to the agent at `host:port` over plain HTTP.
    pub fn new(host: &str, port: u16) -> Self {
        Self::from_url(format!("http://{host}:{port}"))
    }

    /// Connect to an agent by base URL (scheme and authority, no path).
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: url.into().trim_end_matches('/').to_string(),
        }
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{key}", self.base_url)
    }
}

#[async_trait::async_trait]
impl KvStore for ConsulKv {
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteEntry>, KvError> {
        let response = self
            .client
            .get(self.kv_url(prefix))
            .query(&[("recurse", "true")])
            .send()
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(prefix, "no keys under prefix");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(KvError::Transport(format!(
                "listing {prefix} returned {}",
                response.status()
            )));
        }

        let pairs: Vec<KvPair> = response
            .json()
            .await
            .map_err(|e| KvError::Decode(e.to_string()))?;

        pairs
            .into_iter()
            .map(|pair| {
                let value = match pair.value {
                    Some(encoded) => BASE64
                        .decode(encoded)
                        .map_err(|e| KvError::Decode(format!("{}: {e}", pair.key)))?,
                    None => Vec::new(),
                };
                Ok(RemoteEntry {
                    key: pair.key,
                    value,
                    modification_index: pair.modify_index,
                })
            })
            .collect()
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let response = self
            .client
            .put(self.kv_url(key))
            .body(value.to_vec())
            .send()
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KvError::Transport(format!(
                "putting {key} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let response = self
            .client
            .delete(self.kv_url(key))
            .send()
            .await
            .map_err(|e| KvError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KvError::Transport(format!(
                "deleting {key} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_bytes, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_decodes_values_and_indices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/app.plugins"))
            .and(query_param("recurse", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "CreateIndex": 10,
                    "ModifyIndex": 42,
                    "LockIndex": 0,
                    "Key": "app.plugins.alpha.rs",
                    "Flags": 0,
                    "Value": BASE64.encode(b"fn main() {}")
                },
                {
                    "CreateIndex": 11,
                    "ModifyIndex": 43,
                    "LockIndex": 0,
                    "Key": "app.plugins.empty.rs",
                    "Flags": 0,
                    "Value": null
                }
            ])))
            .mount(&server)
            .await;

        let store = ConsulKv::from_url(server.uri());
        let mut entries = store.list("app.plugins").await.unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "app.plugins.alpha.rs");
        assert_eq!(entries[0].value, b"fn main() {}");
        assert_eq!(entries[0].modification_index, 42);
        assert!(entries[1].value.is_empty());
    }

    #[tokio::test]
    async fn test_list_missing_prefix_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/nothing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = ConsulKv::from_url(server.uri());
        assert!(store.list("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/kv/app.plugins.alpha.rs"))
            .and(body_bytes(b"source".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/kv/app.plugins.alpha.rs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("true"))
            .expect(1)
            .mount(&server)
            .await;

        let store = ConsulKv::from_url(server.uri());
        store.put("app.plugins.alpha.rs", b"source").await.unwrap();
        store.delete("app.plugins.alpha.rs").await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/app"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = ConsulKv::from_url(server.uri());
        assert!(matches!(
            store.list("app").await,
            Err(KvError::Transport(_))
        ));
    }
}
