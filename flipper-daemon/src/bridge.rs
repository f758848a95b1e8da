//! HTTP adapter for the scoreboard's admin bridge.
//!
//! The bridge exposes the admin surface as a small JSON API. Every routine
//! opens its own bridge session and releases it when done:
//!
//! | Call                        | Route                                          |
//! |-----------------------------|------------------------------------------------|
//! | open session                | `POST   /sessions`                             |
//! | close session               | `DELETE /sessions/{session}`                   |
//! | list entries                | `GET    /sessions/{session}/entries`           |
//! | create entry                | `POST   /sessions/{session}/entries`           |
//! | rename, tag, lock, show ... | `POST   /sessions/{session}/entries/{id}/{op}` |
//! | delete entry                | `DELETE /sessions/{session}/entries/{id}`      |
//! | ranked results              | `GET    /sessions/{session}/entries/{id}/results` |

use crate::config::BridgeConfig;
use crate::error::DaemonResult;
use async_trait::async_trait;
use flipper_core::{ConfigError, ExternalId, FlipperResult, RemoteError};
use flipper_engine::{LineupAdapter, LineupSession, RankedResult, RemoteEntry};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode, Url};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct SessionOpened {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct EntryCreated {
    external_id: ExternalId,
}

#[derive(Debug, Serialize)]
struct NameBody<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct LabelBody<'a> {
    label: &'a str,
}

/// Shared HTTP plumbing for the adapter and its sessions.
#[derive(Clone)]
struct BridgeClient {
    client: reqwest::Client,
    base_url: Url,
    headers: HeaderMap,
}

impl BridgeClient {
    fn url(&self, operation: &str, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Rejected {
                operation: operation.to_string(),
                reason: format!("bridge URL {} cannot take a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(
        &self,
        operation: &str,
        external_id: Option<&ExternalId>,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = request
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(operation, external_id, status, &body))
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &str,
        external_id: Option<&ExternalId>,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        self.execute(operation, external_id, request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Rejected {
                operation: operation.to_string(),
                reason: format!("unexpected response body: {}", e),
            })
    }
}

/// Map a non-success status to the engine's remote error taxonomy.
fn status_error(
    operation: &str,
    external_id: Option<&ExternalId>,
    status: StatusCode,
    body: &str,
) -> RemoteError {
    let reason = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };
    match (status, external_id) {
        (StatusCode::NOT_FOUND, Some(id)) => RemoteError::EntryNotFound {
            external_id: id.clone(),
        },
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => RemoteError::Session { reason },
        (StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS, _) => RemoteError::Transient {
            operation: operation.to_string(),
            reason,
        },
        (s, _) if s.is_server_error() => RemoteError::Transient {
            operation: operation.to_string(),
            reason,
        },
        _ => RemoteError::Rejected {
            operation: operation.to_string(),
            reason,
        },
    }
}

fn transport_error(operation: &str, e: &reqwest::Error) -> RemoteError {
    if e.is_builder() {
        RemoteError::Rejected {
            operation: operation.to_string(),
            reason: e.to_string(),
        }
    } else {
        // Timeouts and refused connections are retryable.
        RemoteError::Transient {
            operation: operation.to_string(),
            reason: e.to_string(),
        }
    }
}

fn build_auth_headers(config: &BridgeConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = &config.token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| ConfigError::InvalidValue {
                field: crate::constants::ENV_BRIDGE_TOKEN.to_string(),
                value: "[REDACTED]".to_string(),
                reason: e.to_string(),
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/// [`LineupAdapter`] backed by the admin bridge.
#[derive(Clone)]
pub struct HttpLineupAdapter {
    client: BridgeClient,
}

impl HttpLineupAdapter {
    pub fn new(config: &BridgeConfig) -> DaemonResult<Self> {
        let base_url = Url::parse(&config.url).map_err(|e| ConfigError::InvalidValue {
            field: "bridge.url".to_string(),
            value: config.url.clone(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client: BridgeClient {
                client,
                base_url,
                headers: build_auth_headers(config)?,
            },
        })
    }
}

impl std::fmt::Debug for HttpLineupAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLineupAdapter")
            .field("base_url", &self.client.base_url.as_str())
            .field("authenticated", &!self.client.headers.is_empty())
            .finish()
    }
}

#[async_trait]
impl LineupAdapter for HttpLineupAdapter {
    async fn open_session(&self) -> FlipperResult<Box<dyn LineupSession>> {
        let bridge = &self.client;
        let url = bridge.url("open_session", &["sessions"])?;
        let opened: SessionOpened = bridge
            .json("open_session", None, bridge.client.post(url))
            .await
            .map_err(|e| match e {
                RemoteError::Rejected { reason, .. } => RemoteError::Session { reason },
                other => other,
            })?;
        Ok(Box::new(HttpSession {
            client: bridge.clone(),
            session_id: opened.session_id,
        }))
    }
}

/// One bridge session.
struct HttpSession {
    client: BridgeClient,
    session_id: String,
}

impl HttpSession {
    fn entries_url(&self, operation: &str) -> Result<Url, RemoteError> {
        self.client
            .url(operation, &["sessions", self.session_id.as_str(), "entries"])
    }

    fn entry_url(&self, operation: &str, id: &ExternalId, action: Option<&str>) -> Result<Url, RemoteError> {
        let mut segments = vec!["sessions", self.session_id.as_str(), "entries", id.as_str()];
        segments.extend(action);
        self.client.url(operation, &segments)
    }

    /// POST a bodiless entry action such as `lock` or `show`.
    async fn entry_action(&self, action: &str, id: &ExternalId) -> FlipperResult<()> {
        let url = self.entry_url(action, id, Some(action))?;
        self.client
            .execute(action, Some(id), self.client.client.post(url))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LineupSession for HttpSession {
    async fn create_entry(&mut self, name: &str) -> FlipperResult<ExternalId> {
        let url = self.entries_url("create_entry")?;
        let request = self.client.client.post(url).json(&NameBody { name });
        let created: EntryCreated = self.client.json("create_entry", None, request).await?;
        Ok(created.external_id)
    }

    async fn rename(&mut self, id: &ExternalId, name: &str) -> FlipperResult<()> {
        let url = self.entry_url("rename", id, Some("rename"))?;
        let request = self.client.client.post(url).json(&NameBody { name });
        self.client.execute("rename", Some(id), request).await?;
        Ok(())
    }

    async fn tag(&mut self, id: &ExternalId, label: &str) -> FlipperResult<()> {
        let url = self.entry_url("tag", id, Some("tag"))?;
        let request = self.client.client.post(url).json(&LabelBody { label });
        self.client.execute("tag", Some(id), request).await?;
        Ok(())
    }

    async fn lock(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.entry_action("lock", id).await
    }

    async fn unlock(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.entry_action("unlock", id).await
    }

    async fn hide(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.entry_action("hide", id).await
    }

    async fn show(&mut self, id: &ExternalId) -> FlipperResult<()> {
        self.entry_action("show", id).await
    }

    async fn delete(&mut self, id: &ExternalId) -> FlipperResult<()> {
        let url = self.entry_url("delete", id, None)?;
        self.client
            .execute("delete", Some(id), self.client.client.delete(url))
            .await?;
        Ok(())
    }

    async fn list_entries(&mut self) -> FlipperResult<Vec<RemoteEntry>> {
        let url = self.entries_url("list_entries")?;
        Ok(self
            .client
            .json("list_entries", None, self.client.client.get(url))
            .await?)
    }

    async fn fetch_ranked_results(&mut self, id: &ExternalId) -> FlipperResult<Vec<RankedResult>> {
        let url = self.entry_url("fetch_ranked_results", id, Some("results"))?;
        Ok(self
            .client
            .json("fetch_ranked_results", Some(id), self.client.client.get(url))
            .await?)
    }

    async fn close(&mut self) -> FlipperResult<()> {
        let url = self
            .client
            .url("close_session", &["sessions", self.session_id.as_str()])?;
        self.client
            .execute("close_session", None, self.client.client.delete(url))
            .await
            .map_err(|e| RemoteError::Session {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
