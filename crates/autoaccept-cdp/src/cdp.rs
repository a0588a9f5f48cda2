//! Low-level CDP (Chrome DevTools Protocol) WebSocket client.
//!
//! One client owns one persistent WebSocket to one debuggable target and
//! provides request/response correlation over it:
//! - command ids come from a per-connection increasing counter
//! - responses are matched back to the pending command by id
//! - every command has its own timeout; a timed-out command is removed from
//!   the pending map without affecting the connection
//! - when the remote closes (or the socket errors) every pending command
//!   fails and an optional close notice is sent with the target id

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::CdpError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

/// Command timeout used when the caller does not pick one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A CDP command to send to the target.
#[derive(Debug, Clone, serde::Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: Value,
}

/// A CDP response from the target.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    /// The command ID this response correlates to.
    pub id: u64,
    /// The result value on success.
    pub result: Option<Value>,
    /// The error object on failure.
    pub error: Option<CdpResponseError>,
}

/// Error object in a CDP response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

/// Sent on the close channel when a connection goes away on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseNotice {
    pub target_id: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// CdpClient
// ---------------------------------------------------------------------------

/// CDP client bound to a single target WebSocket.
pub struct CdpClient {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: Mutex<WsSink>,
    open: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint.
    ///
    /// The `ws_url` is the target's `webSocketDebuggerUrl`, of the form
    /// `ws://127.0.0.1:{port}/devtools/page/{target_id}`.
    pub async fn connect(ws_url: &str, request_timeout: Duration) -> Result<Self, CdpError> {
        Self::connect_with_notice(ws_url, request_timeout, None).await
    }

    /// Connect and report an unsolicited close as a [`CloseNotice`] carrying
    /// `target_id` on `close_tx`.
    pub async fn connect_with_notice(
        ws_url: &str,
        request_timeout: Duration,
        close_tx: Option<(String, mpsc::UnboundedSender<CloseNotice>)>,
    ) -> Result<Self, CdpError> {
        tracing::debug!(url = ws_url, "connecting to DevTools WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| CdpError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = ws_stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&open),
            close_tx,
        ));

        tracing::debug!(url = ws_url, "DevTools WebSocket connection established");

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            open,
            request_timeout,
            reader_handle,
        })
    }

    /// Whether the underlying socket is still believed to be open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of commands still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a CDP command with the client's default timeout.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        self.send_command_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Send a CDP command with a custom timeout.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CdpError> {
        if !self.is_open() {
            return Err(CdpError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&CdpCommand {
            id,
            method: method.to_string(),
            params,
        })
        .map_err(|e| CdpError::Protocol {
            detail: format!("failed to serialize command: {e}"),
        })?;

        tracing::trace!(id, method, "sending CDP command");

        // Register before sending so a fast response cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let sent = {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(json.into())).await
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(CdpError::Protocol {
                detail: format!("failed to send WebSocket message: {e}"),
            });
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(CdpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(CdpError::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        if let Some(err) = response.error {
            return Err(CdpError::CdpError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Close the connection deliberately.
    ///
    /// Pending commands fail with [`CdpError::Closed`]. No close notice is
    /// sent, since the caller already knows.
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader_handle.abort();
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        }
        self.pending.lock().await.clear();
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Background task that reads WebSocket messages and resolves pending
/// commands.
///
/// Messages with an `id` are responses; anything else is a CDP event, which
/// this client does not subscribe to.
async fn read_loop(
    mut reader: SplitStream<WsStream>,
    pending: PendingMap,
    open: Arc<AtomicBool>,
    close_tx: Option<(String, mpsc::UnboundedSender<CloseNotice>)>,
) {
    let reason = loop {
        let msg = match reader.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => break format!("read error: {e}"),
            None => break "stream ended".to_string(),
        };

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Message::Close(_) => break "closed by remote".to_string(),
            _ => continue,
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "failed to parse CDP message as JSON");
                continue;
            }
        };

        match parse_cdp_response(&json) {
            Some(response) => {
                let id = response.id;
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(response);
                } else {
                    tracing::debug!(id, "response for unknown or expired command id");
                }
            }
            None => {
                if let Some(method) = json.get("method").and_then(Value::as_str) {
                    tracing::trace!(method, "ignoring CDP event");
                }
            }
        }
    };

    open.store(false, Ordering::SeqCst);

    // Dropping the senders fails every waiter with `Closed`.
    pending.lock().await.clear();

    if let Some((target_id, tx)) = close_tx {
        tracing::info!(target_id = %target_id, reason = %reason, "DevTools connection lost");
        let _ = tx.send(CloseNotice { target_id, reason });
    }
}

// ---------------------------------------------------------------------------
// CDP protocol helpers
// ---------------------------------------------------------------------------

/// Build a CDP request envelope.
pub fn build_cdp_message(id: u64, method: &str, params: Value) -> Value {
    serde_json::json!({
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Parse a CDP response envelope. Returns `None` for events.
pub fn parse_cdp_response(json: &Value) -> Option<CdpResponse> {
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok()),
    })
}

/// Parameters for `Runtime.evaluate` returning the value by copy.
pub fn build_evaluate_params(expression: &str) -> Value {
    serde_json::json!({
        "expression": expression,
        "returnByValue": true,
    })
}

/// Extract the value of a `Runtime.evaluate` result, mapping a thrown
/// exception to [`CdpError::JsException`].
pub fn parse_evaluate_result(result: &Value) -> Result<Value, CdpError> {
    if let Some(exception) = result.get("exceptionDetails") {
        let message = exception
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| exception.get("text").and_then(Value::as_str))
            .unwrap_or("unknown exception")
            .to_string();
        return Err(CdpError::JsException { message });
    }

    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Parameters for one `Input.dispatchKeyEvent` call.
pub fn build_key_event_params(event_type: &str, key: &str) -> Value {
    let (code, key_code) = match key {
        "Enter" => ("Enter", 13),
        "Tab" => ("Tab", 9),
        "Escape" => ("Escape", 27),
        " " => ("Space", 32),
        other => (other, 0),
    };
    let mut params = serde_json::json!({
        "type": event_type,
        "key": key,
        "code": code,
        "windowsVirtualKeyCode": key_code,
        "nativeVirtualKeyCode": key_code,
    });
    if event_type == "keyDown" && key == "Enter" {
        params["text"] = Value::String("\r".into());
    }
    params
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_cdp_message() {
        let msg = build_cdp_message(42, "Runtime.evaluate", build_evaluate_params("1 + 1"));
        assert_eq!(msg["id"], 42);
        assert_eq!(msg["method"], "Runtime.evaluate");
        assert_eq!(msg["params"]["expression"], "1 + 1");
        assert_eq!(msg["params"]["returnByValue"], true);
    }

    #[test]
    fn test_parse_cdp_response_success() {
        let json = serde_json::json!({
            "id": 1,
            "result": { "result": { "type": "number", "value": 2 } }
        });
        let resp = parse_cdp_response(&json).unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["result"]["value"], 2);
    }

    #[test]
    fn test_parse_cdp_response_error() {
        let json = serde_json::json!({
            "id": 2,
            "error": {
                "code": -32602,
                "message": "Invalid params",
                "data": "missing required field 'expression'"
            }
        });
        let resp = parse_cdp_response(&json).unwrap();
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "Invalid params");
        assert_eq!(
            err.data.as_deref(),
            Some("missing required field 'expression'")
        );
    }

    #[test]
    fn test_parse_cdp_response_rejects_events() {
        let json = serde_json::json!({
            "method": "Runtime.executionContextCreated",
            "params": {}
        });
        assert!(parse_cdp_response(&json).is_none());
    }

    #[test]
    fn test_cdp_command_serialization() {
        let cmd = CdpCommand {
            id: 7,
            method: "Runtime.evaluate".to_string(),
            params: build_evaluate_params("document.title"),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "Runtime.evaluate");
        assert_eq!(json["params"]["expression"], "document.title");
    }

    #[test]
    fn test_parse_evaluate_result_value() {
        let result = serde_json::json!({ "result": { "type": "number", "value": 3 } });
        assert_eq!(parse_evaluate_result(&result).unwrap(), 3);
    }

    #[test]
    fn test_parse_evaluate_result_undefined_is_null() {
        let result = serde_json::json!({ "result": { "type": "undefined" } });
        assert_eq!(parse_evaluate_result(&result).unwrap(), Value::Null);
    }

    #[test]
    fn test_parse_evaluate_result_exception() {
        let result = serde_json::json!({
            "result": { "type": "object", "subtype": "error" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "ReferenceError: foo is not defined" }
            }
        });
        match parse_evaluate_result(&result) {
            Err(CdpError::JsException { message }) => {
                assert!(message.contains("ReferenceError"));
            }
            other => panic!("expected JsException, got {other:?}"),
        }
    }

    #[test]
    fn test_key_event_params_enter() {
        let down = build_key_event_params("keyDown", "Enter");
        assert_eq!(down["type"], "keyDown");
        assert_eq!(down["windowsVirtualKeyCode"], 13);
        assert_eq!(down["text"], "\r");
        let up = build_key_event_params("keyUp", "Enter");
        assert!(up.get("text").is_none());
    }

    #[test]
    fn test_cdp_response_error_deserialization() {
        let err: CdpResponseError =
            serde_json::from_str(r#"{"code": -32601, "message": "Method not found"}"#).unwrap();
        assert_eq!(err.code, -32601);
        assert!(err.data.is_none());
    }
}
