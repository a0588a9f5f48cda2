//! Target discovery over the DevTools HTTP endpoint.
//!
//! The host exposes `GET /json/list` (older builds: `GET /json`) returning
//! an array of target descriptors. Only interactive document surfaces are
//! worth connecting to; workers and the browser target are filtered out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CdpError;

/// One entry of the DevTools target listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(
        rename = "webSocketDebuggerUrl",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub websocket_url: Option<String>,
}

/// Classified target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Page,
    Iframe,
    Webview,
    Worker,
    ServiceWorker,
    SharedWorker,
    BackgroundPage,
    Browser,
    Other,
}

impl TargetKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "page" => TargetKind::Page,
            "iframe" => TargetKind::Iframe,
            "webview" => TargetKind::Webview,
            "worker" => TargetKind::Worker,
            "service_worker" => TargetKind::ServiceWorker,
            "shared_worker" => TargetKind::SharedWorker,
            "background_page" => TargetKind::BackgroundPage,
            "browser" => TargetKind::Browser,
            _ => TargetKind::Other,
        }
    }

    /// Whether this kind renders a document a user can interact with.
    pub fn is_document(self) -> bool {
        matches!(
            self,
            TargetKind::Page | TargetKind::Iframe | TargetKind::Webview
        )
    }
}

impl TargetDescriptor {
    pub fn target_kind(&self) -> TargetKind {
        TargetKind::parse(&self.kind)
    }

    /// Document surface with a WebSocket URL to attach to.
    pub fn is_connectable(&self) -> bool {
        self.target_kind().is_document()
            && self
                .websocket_url
                .as_deref()
                .is_some_and(|url| !url.is_empty())
    }
}

/// Anything that can report the current target list.
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn targets(&self) -> Result<Vec<TargetDescriptor>, CdpError>;
}

/// HTTP client for the DevTools target listing.
pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DiscoveryClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:9222`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CdpError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CdpError::Discovery {
                url: base_url.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch every target the endpoint reports, connectable or not.
    pub async fn list_targets(&self) -> Result<Vec<TargetDescriptor>, CdpError> {
        let list_url = format!("{}/json/list", self.base_url);
        match self.fetch(&list_url).await? {
            Some(targets) => Ok(targets),
            None => {
                let legacy_url = format!("{}/json", self.base_url);
                self.fetch(&legacy_url).await?.ok_or_else(|| CdpError::Discovery {
                    url: legacy_url,
                    reason: "endpoint returned 404".into(),
                })
            }
        }
    }

    /// Fetch only the targets worth connecting to.
    pub async fn connectable_targets(&self) -> Result<Vec<TargetDescriptor>, CdpError> {
        let targets = self.list_targets().await?;
        Ok(targets.into_iter().filter(|t| t.is_connectable()).collect())
    }

    /// Whether the endpoint answers at all.
    pub async fn is_reachable(&self) -> bool {
        self.list_targets().await.is_ok()
    }

    /// `Ok(None)` on 404 so the caller can try the legacy path.
    async fn fetch(&self, url: &str) -> Result<Option<Vec<TargetDescriptor>>, CdpError> {
        let discovery_err = |reason: String| CdpError::Discovery {
            url: url.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| discovery_err(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(discovery_err(format!("HTTP {}", response.status())));
        }

        let targets = response
            .json::<Vec<TargetDescriptor>>()
            .await
            .map_err(|e| discovery_err(format!("invalid target list: {e}")))?;
        Ok(Some(targets))
    }
}

#[async_trait]
impl TargetSource for DiscoveryClient {
    async fn targets(&self) -> Result<Vec<TargetDescriptor>, CdpError> {
        self.list_targets().await
    }
}
