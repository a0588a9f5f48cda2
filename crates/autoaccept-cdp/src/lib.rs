//! Remote-debugging layer for autoaccept.
//!
//! Reaches approval prompts the host command API cannot address by attaching
//! to the host's DevTools endpoint:
//!
//! - **`discovery`**: lists debuggable targets over `GET /json/list`.
//! - **`cdp`**: one WebSocket per target with id-correlated commands,
//!   per-command timeouts and close notification.
//! - **`session`**: the [`TargetSession`]/[`TargetConnector`] seam the pool
//!   is written against.
//! - **`pool`**: at most one session per target id, reconciled against each
//!   discovery result and swept once per acceptance pass.
//! - **`recognizer`**: survey/select/activate scripts that find and click
//!   approval controls.
//! - **`bootstrap`**: enables the endpoint in the host's `argv.json`.
//!
//! # Host setup
//!
//! The host must be started with a debugging port, normally through its
//! launch configuration:
//!
//! ```jsonc
//! {
//!     "remote-debugging-port": 9222
//! }
//! ```
//!
//! `autoaccept bootstrap` writes that key when it is missing.

pub mod bootstrap;
pub mod cdp;
pub mod discovery;
pub mod error;
pub mod pool;
pub mod recognizer;
pub mod session;

pub use bootstrap::{ensure_remote_debugging, BootstrapOutcome};
pub use cdp::{CdpClient, CloseNotice};
pub use discovery::{DiscoveryClient, TargetDescriptor, TargetKind, TargetSource};
pub use error::{BootstrapError, CdpError};
pub use pool::{PooledTarget, ReconcileReport, SweepOptions, SweepReport, TargetPool};
pub use recognizer::{ButtonPrefixRecognizer, ControlSurvey, PromptRecognizer, Selection};
pub use session::{CdpConnector, CdpSession, TargetConnector, TargetSession};
