//! Per-target sessions and the connector that opens them.
//!
//! The pool only talks to [`TargetSession`] and [`TargetConnector`], so the
//! connection management can be exercised without a real DevTools endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::cdp::{
    build_evaluate_params, build_key_event_params, parse_evaluate_result, CdpClient, CloseNotice,
};
use crate::discovery::TargetDescriptor;
use crate::error::CdpError;

/// An open connection to one debuggable target.
#[async_trait]
pub trait TargetSession: Send + Sync {
    fn target_id(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Evaluate `expression` in the target's document and return its value.
    async fn evaluate(&self, expression: &str) -> Result<Value, CdpError>;

    /// Send a keyDown/keyUp pair for `key` to the focused element.
    async fn press_key(&self, key: &str) -> Result<(), CdpError>;

    async fn close(&self);
}

/// Opens sessions for discovered targets.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    async fn connect(&self, target: &TargetDescriptor)
        -> Result<Arc<dyn TargetSession>, CdpError>;
}

/// [`TargetSession`] backed by a [`CdpClient`] WebSocket.
pub struct CdpSession {
    target_id: String,
    client: CdpClient,
}

impl CdpSession {
    pub fn new(target_id: impl Into<String>, client: CdpClient) -> Self {
        Self {
            target_id: target_id.into(),
            client,
        }
    }

    pub fn client(&self) -> &CdpClient {
        &self.client
    }
}

#[async_trait]
impl TargetSession for CdpSession {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    fn is_open(&self) -> bool {
        self.client.is_open()
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .client
            .send_command("Runtime.evaluate", build_evaluate_params(expression))
            .await?;
        parse_evaluate_result(&result)
    }

    async fn press_key(&self, key: &str) -> Result<(), CdpError> {
        for event_type in ["keyDown", "keyUp"] {
            self.client
                .send_command("Input.dispatchKeyEvent", build_key_event_params(event_type, key))
                .await?;
        }
        Ok(())
    }

    async fn close(&self) {
        self.client.close().await;
    }
}

/// Connects over WebSocket and routes unsolicited closes to `close_tx`.
pub struct CdpConnector {
    request_timeout: Duration,
    close_tx: mpsc::UnboundedSender<CloseNotice>,
}

impl CdpConnector {
    pub fn new(request_timeout: Duration, close_tx: mpsc::UnboundedSender<CloseNotice>) -> Self {
        Self {
            request_timeout,
            close_tx,
        }
    }
}

#[async_trait]
impl TargetConnector for CdpConnector {
    async fn connect(
        &self,
        target: &TargetDescriptor,
    ) -> Result<Arc<dyn TargetSession>, CdpError> {
        let url = target
            .websocket_url
            .as_deref()
            .ok_or_else(|| CdpError::ConnectionFailed {
                url: String::new(),
                reason: format!("target {} has no webSocketDebuggerUrl", target.id),
            })?;
        let client = CdpClient::connect_with_notice(
            url,
            self.request_timeout,
            Some((target.id.clone(), self.close_tx.clone())),
        )
        .await?;
        Ok(Arc::new(CdpSession::new(target.id.clone(), client)))
    }
}
