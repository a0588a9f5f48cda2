//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use autoaccept_cdp::TargetDescriptor;
use autoaccept_core::CapabilityInvoker;
use autoaccept_types::{ActionOutcome, CapabilityAction};

/// What the fake DevTools endpoint does with one command.
pub enum Reply {
    /// Answer with this `result` object.
    Result(Value),
    /// Answer with a CDP error object.
    Error { code: i64, message: String },
    /// Never answer.
    Silent,
    /// Close the socket instead of answering.
    Close,
}

type Handler = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

/// A WebSocket server speaking just enough CDP for the tests.
pub struct DevToolsServer {
    pub port: u16,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl DevToolsServer {
    pub async fn start(handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind a local port");
        let port = listener.local_addr().expect("local addr").port();
        let handler: Handler = Arc::new(handler);
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&handler)));
            }
        });

        Self {
            port,
            connections,
            task,
        }
    }

    pub fn ws_url(&self, target_id: &str) -> String {
        format!("ws://127.0.0.1:{}/devtools/page/{target_id}", self.port)
    }

    /// A listing entry for a target on this server.
    pub fn descriptor(&self, target_id: &str, kind: &str) -> TargetDescriptor {
        TargetDescriptor {
            id: target_id.to_string(),
            kind: kind.to_string(),
            title: format!("{kind} {target_id}"),
            url: format!("vscode-file://vscode-app/{target_id}.html"),
            websocket_url: Some(self.ws_url(target_id)),
        }
    }

    /// WebSocket connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for DevToolsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, handler: Handler) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let id = request["id"].as_u64().unwrap_or(0);
        let method = request["method"].as_str().unwrap_or_default().to_string();

        match handler(&method, &request["params"]) {
            Reply::Result(result) => {
                let body = json!({ "id": id, "result": result });
                if ws.send(Message::Text(body.to_string().into())).await.is_err() {
                    break;
                }
            }
            Reply::Error { code, message } => {
                let body = json!({ "id": id, "error": { "code": code, "message": message } });
                if ws.send(Message::Text(body.to_string().into())).await.is_err() {
                    break;
                }
            }
            Reply::Silent => {}
            Reply::Close => {
                let _ = ws.close(None).await;
                break;
            }
        }
    }
}

/// `Runtime.evaluate` result carrying `value`.
pub fn evaluated(value: Value) -> Reply {
    Reply::Result(json!({ "result": { "type": "object", "value": value } }))
}

/// An approval dialog as the recognizer scripts see it.
///
/// Answers the survey with its controls and applies activations by index,
/// stamping each activated control the way the activate script does.
pub struct FakeDocument {
    controls: Mutex<Vec<FakeControl>>,
    clicks: AtomicUsize,
    key_presses: AtomicUsize,
}

struct FakeControl {
    label: String,
    stamp: Option<f64>,
}

impl FakeDocument {
    pub fn new(labels: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            controls: Mutex::new(
                labels
                    .iter()
                    .map(|label| FakeControl {
                        label: label.to_string(),
                        stamp: None,
                    })
                    .collect(),
            ),
            clicks: AtomicUsize::new(0),
            key_presses: AtomicUsize::new(0),
        })
    }

    pub fn clicks(&self) -> usize {
        self.clicks.load(Ordering::SeqCst)
    }

    pub fn key_presses(&self) -> usize {
        self.key_presses.load(Ordering::SeqCst)
    }

    /// CDP handler for this document.
    pub fn handle(&self, method: &str, params: &Value) -> Reply {
        match method {
            "Runtime.evaluate" => {
                let expression = params["expression"].as_str().unwrap_or_default();
                if expression.contains("fallbackAvailable") {
                    evaluated(self.survey())
                } else if let Some(targets) = activation_targets(expression) {
                    evaluated(json!(self.activate(&targets)))
                } else {
                    evaluated(Value::Bool(false))
                }
            }
            "Input.dispatchKeyEvent" => {
                if params["type"] == "keyDown" {
                    self.key_presses.fetch_add(1, Ordering::SeqCst);
                }
                Reply::Result(json!({}))
            }
            _ => Reply::Result(json!({})),
        }
    }

    fn survey(&self) -> Value {
        let controls = self.controls.lock().expect("controls lock");
        let surveyed: Vec<Value> = controls
            .iter()
            .enumerate()
            .map(|(index, control)| {
                json!({
                    "index": index,
                    "label": control.label,
                    "visible": true,
                    "disabled": false,
                    "lastActivated": control.stamp,
                })
            })
            .collect();
        json!({ "now": now_ms(), "controls": surveyed, "fallbackAvailable": false })
    }

    fn activate(&self, targets: &[Value]) -> usize {
        let mut controls = self.controls.lock().expect("controls lock");
        let mut activated = 0;
        for target in targets {
            let index = target["index"].as_u64().unwrap_or(u64::MAX) as usize;
            let Some(control) = controls.get_mut(index) else {
                continue;
            };
            if target["label"].as_str() != Some(control.label.as_str()) {
                continue;
            }
            control.stamp = Some(now_ms());
            activated += 1;
        }
        self.clicks.fetch_add(activated, Ordering::SeqCst);
        activated
    }
}

/// The selection list embedded in an activate script.
fn activation_targets(expression: &str) -> Option<Vec<Value>> {
    let start = expression.find("const targets = ")? + "const targets = ".len();
    let end = expression[start..].find(";\n")?;
    serde_json::from_str(&expression[start..start + end]).ok()
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as f64
}

/// Applies every action and counts them.
#[derive(Default)]
pub struct CountingInvoker {
    pub calls: AtomicUsize,
}

impl CountingInvoker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityInvoker for CountingInvoker {
    async fn invoke(&self, _action: CapabilityAction) -> ActionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ActionOutcome::Applied
    }
}

/// A local port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("should bind a local port");
    listener.local_addr().expect("local addr").port()
}
