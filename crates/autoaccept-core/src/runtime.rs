//! The agent control task.
//!
//! A single task owns the scheduler, every timer and the diagnostic log.
//! Everything else talks to it through [`AgentCommand`]s sent by an
//! [`AgentHandle`]. Timers are arms of one biased `select!`:
//!
//! 1. commands (triggers, toggle, force-accept, show-log, shutdown)
//! 2. the scheduler's repeating pass timer
//! 3. the scheduler's expiry timer
//! 4. the text-change debounce
//! 5. heartbeat
//! 6. liveness sampling
//! 7. discovery
//! 8. target close notices
//! 9. reload, prune, discovery and pass completions
//!
//! Passes, discovery cycles and configuration reloads run as spawned tasks
//! so the loop never waits on the host, the network or the filesystem.
//! Passes are serialized by the [`PassGuard`]; discovery cycles and reloads
//! by in-flight flags.

use std::any::Any;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, trace, warn};

use autoaccept_cdp::{CloseNotice, ReconcileReport, TargetPool, TargetSource};
use autoaccept_types::{AcceptConfig, AcceptError, SchedulerState, StatusIndicator, Trigger};

use crate::capability::CapabilityInvoker;
use crate::diagnostics::{DiagnosticLog, DEFAULT_CAPACITY};
use crate::error::RuntimeError;
use crate::guard::PassGuard;
use crate::heartbeat::{Heartbeat, HeartbeatAction};
use crate::liveness::{LivenessCheck, LivenessMonitor, SystemClock, WallClock};
use crate::pass::{run_pass, PassContext, PassReason, PassReport};
use crate::scheduler::{Scheduler, Transition};
use crate::settings::SettingsSource;
use crate::status::{AgentStatus, RemoteStatus};

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 64;

/// Requests handled by the control task.
#[derive(Debug)]
pub enum AgentCommand {
    /// Host activity.
    Trigger(Trigger),
    /// Flip the enabled state; replies with the new state.
    Toggle { reply: oneshot::Sender<bool> },
    SetEnabled(bool),
    /// Run a pass now, unless one is in flight.
    ForceAccept {
        reply: oneshot::Sender<ForceAcceptOutcome>,
    },
    /// The most recent diagnostic lines, oldest first.
    ShowLog {
        limit: usize,
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown,
}

/// Result of a force-accept request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceAcceptOutcome {
    Completed(PassReport),
    /// Another pass was in flight; nothing ran.
    Skipped,
    /// The pass panicked.
    Failed(String),
}

/// Notifications for embedders and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    StateChanged {
        from: SchedulerState,
        to: SchedulerState,
    },
    EnabledChanged(bool),
    PassCompleted(PassReport),
    PassSkipped(PassReason),
    PassFailed {
        reason: PassReason,
        error: String,
    },
    /// A suspend was detected and FAST was forced.
    Recovered {
        gap_ms: i64,
    },
    TargetsReconciled(ReconcileReport),
    DiscoveryFailed(String),
    TargetClosed {
        target_id: String,
        reason: String,
    },
}

/// The remote-debugging collaborators.
pub struct RemoteLink {
    pub pool: Arc<TargetPool>,
    pub source: Arc<dyn TargetSource>,
    /// Receives a notice whenever a pooled connection drops on its own.
    pub close_rx: mpsc::UnboundedReceiver<CloseNotice>,
}

/// Cloneable front end to a running [`AgentRuntime`].
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentCommand>,
    status: watch::Receiver<AgentStatus>,
}

impl AgentHandle {
    pub async fn trigger(&self, trigger: Trigger) -> Result<(), RuntimeError> {
        self.send(AgentCommand::Trigger(trigger)).await
    }

    /// Non-blocking variant for synchronous callers such as file watchers.
    ///
    /// A trigger dropped because the channel is full is not an error: the
    /// queued commands already keep the scheduler busy.
    pub fn try_trigger(&self, trigger: Trigger) -> Result<(), RuntimeError> {
        match self.tx.try_send(AgentCommand::Trigger(trigger)) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RuntimeError::Stopped),
        }
    }

    /// Flip the enabled state and return the new one.
    pub async fn toggle(&self) -> Result<bool, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::Toggle { reply }).await?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), RuntimeError> {
        self.send(AgentCommand::SetEnabled(enabled)).await
    }

    /// Run a pass now and wait for it to finish.
    pub async fn force_accept(&self) -> Result<ForceAcceptOutcome, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::ForceAccept { reply }).await?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    pub async fn show_log(&self, limit: usize) -> Result<Vec<String>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::ShowLog { limit, reply }).await?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// A receiver that observes every published status.
    pub fn status(&self) -> watch::Receiver<AgentStatus> {
        self.status.clone()
    }

    pub fn status_snapshot(&self) -> AgentStatus {
        self.status.borrow().clone()
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.send(AgentCommand::Shutdown).await
    }

    async fn send(&self, command: AgentCommand) -> Result<(), RuntimeError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }
}

/// Builder for [`AgentRuntime`].
pub struct AgentRuntimeBuilder {
    settings: Arc<dyn SettingsSource>,
    invoker: Arc<dyn CapabilityInvoker>,
    remote: Option<RemoteLink>,
    clock: Arc<dyn WallClock>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl AgentRuntimeBuilder {
    #[must_use]
    pub fn with_remote(mut self, remote: RemoteLink) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> (AgentRuntime, AgentHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (pass_done_tx, pass_done_rx) = mpsc::unbounded_channel();
        let (discovery_done_tx, discovery_done_rx) = mpsc::unbounded_channel();
        let (reload_done_tx, reload_done_rx) = mpsc::unbounded_channel();
        let (pruned_tx, pruned_rx) = mpsc::unbounded_channel();

        let mut ctx = PassContext::new(self.invoker);
        let (source, close_rx) = match self.remote {
            Some(remote) => {
                ctx = ctx.with_pool(remote.pool);
                (Some(remote.source), Some(remote.close_rx))
            }
            None => (None, None),
        };

        let config = self.settings.current();
        let remote_status = idle_remote_status(source.is_some(), &config);
        let status = AgentStatus::initial(remote_status);
        let (status_tx, status_rx) = watch::channel(status.clone());

        let runtime = AgentRuntime {
            liveness: LivenessMonitor::new(config.liveness_interval()),
            heartbeat: Heartbeat::from_config(&config),
            settings: self.settings,
            ctx,
            source,
            guard: PassGuard::new(),
            clock: self.clock,
            commands,
            close_rx,
            pass_done_tx,
            pass_done_rx,
            discovery_done_tx,
            discovery_done_rx,
            reload_done_tx,
            reload_done_rx,
            pruned_tx,
            pruned_rx,
            status_tx,
            events: self.events,
            log: DiagnosticLog::new(DEFAULT_CAPACITY),
            scheduler: Scheduler::new(),
            timers: Timers::default(),
            periods: ArmedPeriods::default(),
            enabled: false,
            discovery_in_flight: false,
            reload: ReloadState::Idle,
            last_pass_started: None,
            status,
        };
        let handle = AgentHandle {
            tx,
            status: status_rx,
        };
        (runtime, handle)
    }
}

struct PassCompletion {
    reason: PassReason,
    result: Result<PassReport, String>,
    reply: Option<oneshot::Sender<ForceAcceptOutcome>>,
}

type DiscoveryResult = Result<(ReconcileReport, usize), String>;

type ReloadResult = Result<AcceptConfig, AcceptError>;

/// Configuration reload progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReloadState {
    Idle,
    InFlight,
    /// Another change arrived while a reload was running.
    Queued,
}

#[derive(Default)]
struct Timers {
    pass: Option<Interval>,
    expiry: Option<Pin<Box<Sleep>>>,
    debounce: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    liveness: Option<Interval>,
    discovery: Option<Interval>,
}

impl Timers {
    fn clear(&mut self) {
        *self = Timers::default();
    }
}

/// Periods the ambient timers were last armed with.
#[derive(Debug, Default, PartialEq, Eq)]
struct ArmedPeriods {
    heartbeat: Option<Duration>,
    liveness: Option<Duration>,
    discovery: Option<Duration>,
}

/// The control task. Drive it with [`AgentRuntime::run`].
pub struct AgentRuntime {
    settings: Arc<dyn SettingsSource>,
    ctx: PassContext,
    source: Option<Arc<dyn TargetSource>>,
    guard: PassGuard,
    clock: Arc<dyn WallClock>,
    commands: mpsc::Receiver<AgentCommand>,
    close_rx: Option<mpsc::UnboundedReceiver<CloseNotice>>,
    pass_done_tx: mpsc::UnboundedSender<PassCompletion>,
    pass_done_rx: mpsc::UnboundedReceiver<PassCompletion>,
    discovery_done_tx: mpsc::UnboundedSender<DiscoveryResult>,
    discovery_done_rx: mpsc::UnboundedReceiver<DiscoveryResult>,
    reload_done_tx: mpsc::UnboundedSender<ReloadResult>,
    reload_done_rx: mpsc::UnboundedReceiver<ReloadResult>,
    /// Pool size after a close notice actually removed a session.
    pruned_tx: mpsc::UnboundedSender<usize>,
    pruned_rx: mpsc::UnboundedReceiver<usize>,
    status_tx: watch::Sender<AgentStatus>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    log: DiagnosticLog,
    scheduler: Scheduler,
    liveness: LivenessMonitor,
    heartbeat: Heartbeat,
    timers: Timers,
    periods: ArmedPeriods,
    enabled: bool,
    discovery_in_flight: bool,
    reload: ReloadState,
    last_pass_started: Option<Instant>,
    status: AgentStatus,
}

impl AgentRuntime {
    pub fn builder(
        settings: Arc<dyn SettingsSource>,
        invoker: Arc<dyn CapabilityInvoker>,
    ) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            settings,
            invoker,
            remote: None,
            clock: Arc::new(SystemClock),
            events: None,
        }
    }

    /// Run until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        let config = self.settings.current();
        if config.enabled {
            self.enable(&config, "startup");
        } else {
            self.log.record("agent started disabled");
            self.publish();
        }

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(AgentCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = tick(&mut self.timers.pass) => {
                    let reason = PassReason::Timer(self.scheduler.state());
                    self.start_pass(reason, None);
                }
                _ = fire(&mut self.timers.expiry) => self.on_expiry(),
                _ = fire(&mut self.timers.debounce) => self.on_debounce(),
                _ = tick(&mut self.timers.heartbeat) => self.on_heartbeat(),
                _ = tick(&mut self.timers.liveness) => self.on_liveness(),
                _ = tick(&mut self.timers.discovery) => self.on_discovery_tick(),
                Some(notice) = recv_opt(&mut self.close_rx) => self.on_target_closed(notice),
                Some(result) = self.reload_done_rx.recv() => self.on_reload_done(result),
                Some(pooled) = self.pruned_rx.recv() => self.on_pruned(pooled),
                Some(result) = self.discovery_done_rx.recv() => self.on_discovery_done(result),
                Some(done) = self.pass_done_rx.recv() => self.on_pass_done(done),
            }
        }

        self.stop().await;
    }

    fn handle_command(&mut self, command: AgentCommand) {
        match command {
            AgentCommand::Trigger(trigger) => self.on_trigger(trigger),
            AgentCommand::Toggle { reply } => {
                if self.enabled {
                    self.disable("toggle");
                } else {
                    let config = self.settings.current();
                    self.enable(&config, "toggle");
                }
                let _ = reply.send(self.enabled);
            }
            AgentCommand::SetEnabled(enabled) => {
                if enabled && !self.enabled {
                    let config = self.settings.current();
                    self.enable(&config, "request");
                } else if !enabled && self.enabled {
                    self.disable("request");
                }
            }
            AgentCommand::ForceAccept { reply } => self.start_pass(PassReason::Forced, Some(reply)),
            AgentCommand::ShowLog { limit, reply } => {
                let _ = reply.send(self.log.recent_lines(limit));
            }
            AgentCommand::Shutdown => {}
        }
    }

    // -- scheduler ----------------------------------------------------------

    fn on_trigger(&mut self, trigger: Trigger) {
        if trigger == Trigger::ConfigurationChanged {
            // Escalation waits for the reload so it uses the new settings.
            self.start_reload();
            return;
        }
        self.escalate(trigger);
    }

    fn escalate(&mut self, trigger: Trigger) {
        if !self.enabled {
            trace!(trigger = trigger.name(), "ignoring trigger while disabled");
            return;
        }

        if trigger.is_debounced() {
            if self.scheduler.accepts_text_change() {
                let debounce = self.settings.current().text_change_debounce();
                self.timers.debounce = Some(Box::pin(sleep(debounce)));
            }
            return;
        }

        let config = self.settings.current();
        let transition = self.scheduler.on_trigger(&config);
        self.apply(transition, trigger.name());
    }

    fn on_expiry(&mut self) {
        self.timers.expiry = None;
        let config = self.settings.current();
        if let Some(transition) = self.scheduler.on_expiry(&config) {
            self.apply(transition, "expired");
        }
    }

    fn on_debounce(&mut self) {
        self.timers.debounce = None;
        if self.enabled && self.scheduler.accepts_text_change() {
            let config = self.settings.current();
            let transition = self.scheduler.on_trigger(&config);
            self.apply(transition, Trigger::TextChanged.name());
        }
    }

    /// Replace both scheduler timers with the transition's plan and publish.
    fn apply(&mut self, transition: Transition, cause: &str) {
        let plan = transition.plan;
        let now = Instant::now();
        let reentry = transition.from == transition.to;
        let last_pass = self.last_pass_started;
        self.timers.pass = plan.pass_interval.map(|period| {
            let start = match last_pass {
                // Re-entering FAST keeps the pass phase.
                Some(last) if plan.immediate_first_pass && reentry => (last + period).max(now),
                _ if plan.immediate_first_pass => now,
                _ => now + period,
            };
            repeating(start, period)
        });
        self.timers.expiry = plan.expiry.map(|after| Box::pin(sleep(after)));
        if transition.to != SchedulerState::Idle {
            self.timers.debounce = None;
        }

        if transition.changed() {
            info!(from = %transition.from, to = %transition.to, cause, "scheduler transition");
            self.log
                .record(format!("{} -> {} ({cause})", transition.from, transition.to));
            self.emit(AgentEvent::StateChanged {
                from: transition.from,
                to: transition.to,
            });
        } else {
            debug!(state = %transition.to, cause, "scheduler window extended");
        }

        self.status.state = transition.to;
        self.status.indicator = if self.enabled {
            transition.to.indicator()
        } else {
            StatusIndicator::Disabled
        };
        self.publish();
    }

    // -- enable / disable ---------------------------------------------------

    fn enable(&mut self, config: &AcceptConfig, cause: &str) {
        self.enabled = true;
        self.scheduler = Scheduler::new();
        self.timers.clear();
        self.periods = ArmedPeriods::default();
        self.arm_ambient(config, true);

        self.status.enabled = true;
        self.status.state = SchedulerState::Idle;
        self.status.indicator = StatusIndicator::Idle;
        self.status.remote = idle_remote_status(self.source.is_some(), config);

        info!(cause, "agent enabled");
        self.log.record(format!("enabled ({cause})"));
        self.emit(AgentEvent::EnabledChanged(true));
        self.publish();
    }

    fn disable(&mut self, cause: &str) {
        self.enabled = false;
        self.scheduler.reset();
        self.timers.clear();
        self.periods = ArmedPeriods::default();
        self.close_pool();

        let config = self.settings.current();
        self.status.enabled = false;
        self.status.state = SchedulerState::Idle;
        self.status.indicator = StatusIndicator::Disabled;
        self.status.remote = idle_remote_status(self.source.is_some(), &config);

        info!(cause, "agent disabled");
        self.log.record(format!("disabled ({cause})"));
        self.emit(AgentEvent::EnabledChanged(false));
        self.publish();
    }

    /// Arm heartbeat, liveness and discovery timers whose period changed.
    /// `fresh` also applies the activation delay to the first discovery.
    fn arm_ambient(&mut self, config: &AcceptConfig, fresh: bool) {
        let now = Instant::now();

        self.heartbeat = Heartbeat::from_config(config);
        let heartbeat = self.heartbeat.interval();
        if fresh || heartbeat != self.periods.heartbeat {
            self.timers.heartbeat = heartbeat.map(|period| repeating(now + period, period));
            self.periods.heartbeat = heartbeat;
        }

        let cadence = config.liveness_interval();
        if fresh || Some(cadence) != self.periods.liveness {
            self.liveness = LivenessMonitor::new(cadence);
            self.liveness.reset(self.clock.now());
            self.timers.liveness = Some(repeating(now + cadence, cadence));
            self.periods.liveness = Some(cadence);
        }

        let discovery = (self.source.is_some() && config.cdp.enabled)
            .then(|| config.cdp.discovery_interval());
        if fresh || discovery != self.periods.discovery {
            let first = if fresh {
                now + config.activation_delay()
            } else {
                now
            };
            self.timers.discovery = discovery.map(|period| repeating(first, period));
            self.periods.discovery = discovery;
            if discovery.is_none() {
                self.close_pool();
                self.status.remote = idle_remote_status(self.source.is_some(), config);
            }
        }
    }

    /// Re-read settings on the blocking pool; the result arrives through
    /// [`on_reload_done`](Self::on_reload_done).
    fn start_reload(&mut self) {
        if self.reload != ReloadState::Idle {
            self.reload = ReloadState::Queued;
            return;
        }
        self.reload = ReloadState::InFlight;

        let settings = Arc::clone(&self.settings);
        let done_tx = self.reload_done_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || settings.reload()).await {
                Ok(result) => result,
                Err(e) => Err(AcceptError::ConfigError(format!("reload task failed: {e}"))),
            };
            let _ = done_tx.send(result);
        });
    }

    fn on_reload_done(&mut self, result: ReloadResult) {
        let queued = self.reload == ReloadState::Queued;
        self.reload = ReloadState::Idle;

        match result {
            Ok(config) => {
                self.log.record("configuration reloaded");
                match (self.enabled, config.enabled) {
                    (true, false) => self.disable("configuration"),
                    (false, true) => self.enable(&config, "configuration"),
                    (true, true) => {
                        self.arm_ambient(&config, false);
                        self.publish();
                    }
                    (false, false) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "configuration reload failed, keeping previous settings");
                self.log.record(format!("configuration reload failed: {e}"));
            }
        }

        self.escalate(Trigger::ConfigurationChanged);
        if queued {
            self.start_reload();
        }
    }

    // -- passes -------------------------------------------------------------

    fn start_pass(&mut self, reason: PassReason, reply: Option<oneshot::Sender<ForceAcceptOutcome>>) {
        let Some(token) = self.guard.try_begin() else {
            debug!(reason = %reason, "pass already in flight, skipping");
            self.status.stats.skipped += 1;
            self.emit(AgentEvent::PassSkipped(reason));
            if let Some(reply) = reply {
                let _ = reply.send(ForceAcceptOutcome::Skipped);
            }
            self.publish();
            return;
        };

        self.last_pass_started = Some(Instant::now());
        let config = self.settings.current();
        let ctx = self.ctx.clone();
        let work = tokio::spawn(async move {
            let _token = token;
            run_pass(&ctx, &config, reason).await
        });

        let done_tx = self.pass_done_tx.clone();
        tokio::spawn(async move {
            let result = work.await.map_err(|e| {
                if e.is_panic() {
                    format!("pass panicked: {}", panic_message(e.into_panic()))
                } else {
                    format!("pass cancelled: {e}")
                }
            });
            let _ = done_tx.send(PassCompletion {
                reason,
                result,
                reply,
            });
        });
    }

    fn on_pass_done(&mut self, done: PassCompletion) {
        match done.result {
            Ok(report) => {
                let stats = &mut self.status.stats;
                stats.passes += 1;
                stats.actions_applied += report.capabilities.applied as u64;
                if let Some(sweep) = report.sweep {
                    stats.controls_activated += sweep.activated as u64;
                    stats.key_fallbacks += sweep.fallbacks as u64;
                }
                self.status.last_pass_at = Some(report.started_at);

                let acted = report.capabilities.applied > 0
                    || report.sweep.is_some_and(|s| s.activated > 0 || s.fallbacks > 0);
                if acted || report.reason == PassReason::Forced {
                    self.log.record(report.summary());
                }
                self.emit(AgentEvent::PassCompleted(report.clone()));
                if let Some(reply) = done.reply {
                    let _ = reply.send(ForceAcceptOutcome::Completed(report));
                }
            }
            Err(error) => {
                self.status.stats.failed += 1;
                warn!(reason = %done.reason, error = %error, "acceptance pass failed");
                self.log.record(format!("pass ({}) failed: {error}", done.reason));
                self.emit(AgentEvent::PassFailed {
                    reason: done.reason,
                    error: error.clone(),
                });
                if let Some(reply) = done.reply {
                    let _ = reply.send(ForceAcceptOutcome::Failed(error));
                }
            }
        }
        self.publish();
    }

    fn on_heartbeat(&mut self) {
        match self.heartbeat.on_tick(self.scheduler.state()) {
            HeartbeatAction::RunPass => self.start_pass(PassReason::Heartbeat, None),
            HeartbeatAction::Skip => trace!(state = %self.scheduler.state(), "heartbeat skipped"),
        }
    }

    fn on_liveness(&mut self) {
        let LivenessCheck::Resumed { gap } = self.liveness.sample(self.clock.now()) else {
            return;
        };
        let gap_ms = gap.num_milliseconds();
        info!(gap_ms, "resume detected, forcing fast polling");
        self.status.stats.recoveries += 1;
        self.emit(AgentEvent::Recovered { gap_ms });

        let config = self.settings.current();
        let transition = self.scheduler.on_trigger(&config);
        self.apply(transition, "resume");
    }

    // -- remote path --------------------------------------------------------

    fn on_discovery_tick(&mut self) {
        let (Some(source), Some(pool)) = (&self.source, &self.ctx.pool) else {
            return;
        };
        if self.discovery_in_flight {
            debug!("discovery still in flight, skipping cycle");
            return;
        }
        self.discovery_in_flight = true;

        let source = Arc::clone(source);
        let pool = Arc::clone(pool);
        let work = tokio::spawn(async move {
            let targets = source.targets().await.map_err(|e| e.to_string())?;
            let report = pool.reconcile(&targets).await;
            Ok::<_, String>((report, pool.len().await))
        });

        let done_tx = self.discovery_done_tx.clone();
        tokio::spawn(async move {
            let result = match work.await {
                Ok(result) => result,
                Err(e) => Err(format!("discovery task failed: {e}")),
            };
            let _ = done_tx.send(result);
        });
    }

    fn on_discovery_done(&mut self, result: DiscoveryResult) {
        self.discovery_in_flight = false;
        if !self.enabled {
            self.close_pool();
            return;
        }

        match result {
            Ok((report, targets)) => {
                if !report.is_noop() {
                    info!(
                        connected = report.connected.len(),
                        dropped = report.dropped.len(),
                        failed = report.failed.len(),
                        targets,
                        "target pool reconciled"
                    );
                    self.log.record(format!(
                        "targets: +{} -{} ({} failed), {targets} pooled",
                        report.connected.len(),
                        report.dropped.len(),
                        report.failed.len()
                    ));
                }
                if !matches!(self.status.remote, RemoteStatus::Active { .. }) {
                    self.log.record("remote debugging endpoint active");
                }
                self.status.remote = RemoteStatus::Active { targets };
                self.emit(AgentEvent::TargetsReconciled(report));
            }
            Err(error) => {
                if matches!(self.status.remote, RemoteStatus::Active { .. }) {
                    warn!(error = %error, "remote debugging endpoint lost");
                    self.log.record(format!("remote debugging endpoint lost: {error}"));
                } else {
                    debug!(error = %error, "remote debugging endpoint not reachable");
                }
                self.status.remote = RemoteStatus::NotActive;
                self.emit(AgentEvent::DiscoveryFailed(error));
            }
        }
        self.publish();
    }

    fn on_target_closed(&mut self, notice: CloseNotice) {
        debug!(target_id = %notice.target_id, reason = %notice.reason, "target connection closed");
        self.log
            .record(format!("target {} closed: {}", notice.target_id, notice.reason));
        if let Some(pool) = &self.ctx.pool {
            let pool = Arc::clone(pool);
            let target_id = notice.target_id.clone();
            let pruned_tx = self.pruned_tx.clone();
            tokio::spawn(async move {
                if pool.remove_closed(&target_id).await {
                    let _ = pruned_tx.send(pool.len().await);
                }
            });
        }
        self.emit(AgentEvent::TargetClosed {
            target_id: notice.target_id,
            reason: notice.reason,
        });
    }

    fn on_pruned(&mut self, pooled: usize) {
        if let RemoteStatus::Active { targets } = &mut self.status.remote {
            *targets = pooled;
            self.publish();
        }
    }

    fn close_pool(&self) {
        if let Some(pool) = &self.ctx.pool {
            let pool = Arc::clone(pool);
            tokio::spawn(async move { pool.close_all().await });
        }
    }

    // -- plumbing -----------------------------------------------------------

    async fn stop(&mut self) {
        self.timers.clear();
        if let Some(pool) = &self.ctx.pool {
            pool.close_all().await;
        }
        self.enabled = false;
        self.status.enabled = false;
        self.status.indicator = StatusIndicator::Disabled;
        self.publish();
        info!("agent runtime stopped");
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

fn idle_remote_status(wired: bool, config: &AcceptConfig) -> RemoteStatus {
    if wired && config.cdp.enabled {
        RemoteStatus::NotActive
    } else {
        RemoteStatus::Off
    }
}

fn repeating(start: Instant, period: Duration) -> Interval {
    let mut interval = interval_at(start, period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn tick(interval: &mut Option<Interval>) -> Instant {
    match interval {
        Some(interval) => interval.tick().await,
        None => pending().await,
    }
}

async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SharedSettings;
    use async_trait::async_trait;
    use autoaccept_cdp::{CdpError, TargetConnector, TargetDescriptor, TargetSession};
    use autoaccept_types::{ActionOutcome, CapabilityAction};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    /// Records when each pass reached its first action.
    #[derive(Default)]
    struct RecordingInvoker {
        passes: parking_lot::Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl CapabilityInvoker for RecordingInvoker {
        async fn invoke(&self, action: CapabilityAction) -> ActionOutcome {
            if action == CapabilityAction::AgentStep {
                self.passes.lock().push(Instant::now());
            }
            ActionOutcome::NotApplicable
        }
    }

    impl RecordingInvoker {
        fn offsets_ms(&self, start: Instant) -> Vec<u128> {
            self.passes
                .lock()
                .iter()
                .map(|at| at.duration_since(start).as_millis())
                .collect()
        }
    }

    /// Blocks the first pass until released.
    #[derive(Default)]
    struct BlockingInvoker {
        started: Notify,
        release: Notify,
        blocked_once: AtomicBool,
    }

    #[async_trait]
    impl CapabilityInvoker for BlockingInvoker {
        async fn invoke(&self, action: CapabilityAction) -> ActionOutcome {
            if action == CapabilityAction::AgentStep && !self.blocked_once.swap(true, Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            ActionOutcome::Applied
        }
    }

    /// Panics on the very first action it sees.
    #[derive(Default)]
    struct PanickingInvoker {
        panicked: AtomicBool,
    }

    #[async_trait]
    impl CapabilityInvoker for PanickingInvoker {
        async fn invoke(&self, _action: CapabilityAction) -> ActionOutcome {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("host bridge exploded");
            }
            ActionOutcome::NotApplicable
        }
    }

    struct ManualClock(parking_lot::Mutex<DateTime<Utc>>);

    impl WallClock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    fn quiet_config() -> AcceptConfig {
        let mut config = AcceptConfig::default();
        config.heartbeat_interval_ms = 0;
        config.cdp.enabled = false;
        config
    }

    fn spawn_runtime(
        config: AcceptConfig,
        invoker: Arc<dyn CapabilityInvoker>,
    ) -> (AgentHandle, mpsc::UnboundedReceiver<AgentEvent>, Arc<SharedSettings>) {
        let settings = Arc::new(SharedSettings::new(config));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (runtime, handle) = AgentRuntime::builder(settings.clone(), invoker)
            .with_events(events_tx)
            .build();
        tokio::spawn(runtime.run());
        (handle, events_rx, settings)
    }

    fn state_changes(events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<(SchedulerState, SchedulerState)> {
        let mut changes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::StateChanged { from, to } = event {
                changes.push((from, to));
            }
        }
        changes
    }

    #[tokio::test(start_paused = true)]
    async fn fast_window_timeline() {
        let mut config = quiet_config();
        config.fast_interval_ms = 200;
        config.fast_duration_ms = 1_000;
        let invoker = Arc::new(RecordingInvoker::default());
        let start = Instant::now();
        let (handle, mut events, _) = spawn_runtime(config, invoker.clone());

        handle.trigger(Trigger::TerminalOpened).await.unwrap();

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(handle.status_snapshot().state, SchedulerState::Fast);
        assert_eq!(handle.status_snapshot().indicator, StatusIndicator::Active);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(handle.status_snapshot().state, SchedulerState::Slow);
        assert_eq!(handle.status_snapshot().indicator, StatusIndicator::Watching);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(invoker.offsets_ms(start), vec![0, 200, 400, 600, 800, 1_000]);
        assert_eq!(
            state_changes(&mut events),
            vec![
                (SchedulerState::Idle, SchedulerState::Fast),
                (SchedulerState::Fast, SchedulerState::Slow),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_back_to_idle() {
        let mut config = quiet_config();
        config.fast_duration_ms = 1_000;
        config.slow_interval_ms = 500;
        config.cooldown_duration_ms = 2_000;
        let invoker = Arc::new(RecordingInvoker::default());
        let start = Instant::now();
        let (handle, mut events, _) = spawn_runtime(config, invoker.clone());

        handle.trigger(Trigger::TaskStarted).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        assert_eq!(handle.status_snapshot().state, SchedulerState::Idle);
        assert_eq!(
            state_changes(&mut events),
            vec![
                (SchedulerState::Idle, SchedulerState::Fast),
                (SchedulerState::Fast, SchedulerState::Slow),
                (SchedulerState::Slow, SchedulerState::Idle),
            ]
        );
        // SLOW passes start one interval after entry.
        let slow: Vec<u128> = invoker
            .offsets_ms(start)
            .into_iter()
            .filter(|ms| *ms > 1_000)
            .collect();
        assert_eq!(slow, vec![1_500, 2_000, 2_500, 3_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_in_fast_extends_window_and_keeps_pass_phase() {
        let mut config = quiet_config();
        config.fast_interval_ms = 200;
        config.fast_duration_ms = 1_000;
        let invoker = Arc::new(RecordingInvoker::default());
        let start = Instant::now();
        let (handle, mut events, settings) = spawn_runtime(config, invoker.clone());

        handle.trigger(Trigger::TerminalOpened).await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        settings.update(|c| c.fast_interval_ms = 300);
        handle.trigger(Trigger::EditorFocused).await.unwrap();

        // Expiry moved from 1000 to 1700.
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(handle.status_snapshot().state, SchedulerState::Fast);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status_snapshot().state, SchedulerState::Slow);

        // The next pass lands one fresh interval after the pass at 600.
        assert_eq!(
            invoker.offsets_ms(start),
            vec![0, 200, 400, 600, 900, 1_200, 1_500]
        );
        assert_eq!(state_changes(&mut events).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_burst_does_not_outpace_fast_interval() {
        let mut config = quiet_config();
        config.fast_interval_ms = 200;
        config.fast_duration_ms = 1_000;
        let invoker = Arc::new(RecordingInvoker::default());
        let start = Instant::now();
        let (handle, _events, _) = spawn_runtime(config, invoker.clone());

        handle.trigger(Trigger::FileCreated).await.unwrap();
        for _ in 0..15 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.trigger(Trigger::FileCreated).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.status_snapshot().state, SchedulerState::Fast);
        assert_eq!(invoker.offsets_ms(start), vec![0, 200, 400]);
    }

    #[tokio::test(start_paused = true)]
    async fn text_change_is_debounced_and_only_escalates_from_idle() {
        let mut config = quiet_config();
        config.text_change_debounce_ms = 2_000;
        let (handle, mut events, _) = spawn_runtime(config, Arc::new(RecordingInvoker::default()));

        handle.trigger(Trigger::TextChanged).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        handle.trigger(Trigger::TextChanged).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(handle.status_snapshot().state, SchedulerState::Idle);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status_snapshot().state, SchedulerState::Fast);

        // Text changes do not extend an active window.
        tokio::time::sleep(Duration::from_millis(9_000)).await;
        handle.trigger(Trigger::TextChanged).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(handle.status_snapshot().state, SchedulerState::Slow);
        assert_eq!(state_changes(&mut events).len(), 2);
    }

    #[tokio::test]
    async fn force_accept_during_pass_is_skipped() {
        let mut config = quiet_config();
        config.enabled = false;
        let invoker = Arc::new(BlockingInvoker::default());
        let (handle, _events, _) = spawn_runtime(config, invoker.clone());

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.force_accept().await })
        };
        invoker.started.notified().await;

        assert_eq!(handle.force_accept().await.unwrap(), ForceAcceptOutcome::Skipped);

        invoker.release.notify_one();
        match first.await.unwrap().unwrap() {
            ForceAcceptOutcome::Completed(report) => {
                assert_eq!(report.reason, PassReason::Forced);
                assert_eq!(report.capabilities.applied, 5);
            }
            other => panic!("expected completed pass, got {other:?}"),
        }

        // The guard is free again.
        assert!(matches!(
            handle.force_accept().await.unwrap(),
            ForceAcceptOutcome::Completed(_)
        ));
        let stats = handle.status_snapshot().stats;
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[tokio::test]
    async fn panicking_pass_clears_guard() {
        let mut config = quiet_config();
        config.enabled = false;
        let (handle, _events, _) = spawn_runtime(config, Arc::new(PanickingInvoker::default()));

        match handle.force_accept().await.unwrap() {
            ForceAcceptOutcome::Failed(error) => assert!(error.contains("host bridge exploded")),
            other => panic!("expected failed pass, got {other:?}"),
        }
        assert!(matches!(
            handle.force_accept().await.unwrap(),
            ForceAcceptOutcome::Completed(_)
        ));
        assert_eq!(handle.status_snapshot().stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_gap_forces_fast() {
        let mut config = quiet_config();
        config.liveness_interval_ms = 5_000;
        let settings = Arc::new(SharedSettings::new(config));
        let base = Utc::now();
        let clock = Arc::new(ManualClock(parking_lot::Mutex::new(base)));
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (runtime, handle) =
            AgentRuntime::builder(settings, Arc::new(RecordingInvoker::default()))
                .with_clock(clock.clone())
                .with_events(events_tx)
                .build();
        tokio::spawn(runtime.run());

        // Move the clock halfway between samples so no tick races the update.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        for i in 1..=3 {
            *clock.0.lock() = base + chrono::Duration::seconds(5 * i);
            tokio::time::sleep(Duration::from_millis(5_000)).await;
        }
        assert_eq!(handle.status_snapshot().state, SchedulerState::Idle);

        // The machine slept for an hour between two samples.
        *clock.0.lock() = base + chrono::Duration::seconds(15 + 3_600);
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        let status = handle.status_snapshot();
        assert_eq!(status.state, SchedulerState::Fast);
        assert_eq!(status.stats.recoveries, 1);
        let recovered = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, AgentEvent::Recovered { gap_ms } if gap_ms == 3_600_000));
        assert!(recovered);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_disables_and_ignores_triggers() {
        let (handle, _events, _) = spawn_runtime(quiet_config(), Arc::new(RecordingInvoker::default()));
        let mut status = handle.status();
        status.wait_for(|s| s.enabled).await.unwrap();

        assert!(!handle.toggle().await.unwrap());
        handle.trigger(Trigger::TerminalOpened).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let status = handle.status_snapshot();
        assert_eq!(status.indicator, StatusIndicator::Disabled);
        assert_eq!(status.state, SchedulerState::Idle);

        assert!(handle.toggle().await.unwrap());
        handle.trigger(Trigger::TerminalOpened).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.status_snapshot().indicator, StatusIndicator::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_change_reloads_before_escalating() {
        let mut config = quiet_config();
        config.fast_duration_ms = 1_000;
        let fresh = AcceptConfig {
            fast_interval_ms: 400,
            ..config.clone()
        };
        let settings = Arc::new(
            SharedSettings::new(config).with_reloader(move || Ok(fresh.clone())),
        );
        let invoker = Arc::new(RecordingInvoker::default());
        let (runtime, handle) = AgentRuntime::builder(settings, invoker.clone()).build();
        tokio::spawn(runtime.run());
        let start = Instant::now();

        handle.trigger(Trigger::ConfigurationChanged).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(invoker.offsets_ms(start), vec![0, 400, 800]);

        let log = handle.show_log(10).await.unwrap();
        assert!(log.iter().any(|l| l.contains("configuration reloaded")));
        assert!(log.iter().any(|l| l.contains("IDLE -> FAST (configuration_changed)")));
    }

    #[tokio::test]
    async fn slow_reload_does_not_stall_the_control_task() {
        let config = quiet_config();
        let fresh = config.clone();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);
        let settings = Arc::new(SharedSettings::new(config).with_reloader(move || {
            let _ = release_rx.lock().recv();
            Ok(fresh.clone())
        }));
        let (runtime, handle) =
            AgentRuntime::builder(settings, Arc::new(RecordingInvoker::default())).build();
        tokio::spawn(runtime.run());

        handle.trigger(Trigger::ConfigurationChanged).await.unwrap();
        let log = tokio::time::timeout(Duration::from_secs(1), handle.show_log(10))
            .await
            .expect("control task answers while the reload blocks")
            .unwrap();
        assert!(!log.iter().any(|l| l.contains("configuration reloaded")));
        assert_eq!(handle.status_snapshot().state, SchedulerState::Idle);

        release_tx.send(()).unwrap();
        let mut status = handle.status();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == SchedulerState::Fast),
        )
        .await
        .expect("escalates once the reload lands")
        .unwrap();
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn configuration_change_can_disable() {
        let config = quiet_config();
        let disabled = AcceptConfig {
            enabled: false,
            ..config.clone()
        };
        let settings = Arc::new(
            SharedSettings::new(config).with_reloader(move || Ok(disabled.clone())),
        );
        let (runtime, handle) =
            AgentRuntime::builder(settings, Arc::new(RecordingInvoker::default())).build();
        tokio::spawn(runtime.run());

        handle.trigger(Trigger::ConfigurationChanged).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.status_snapshot().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_runs_passes_only_when_idle() {
        let mut config = quiet_config();
        config.heartbeat_interval_ms = 1_000;
        config.fast_interval_ms = 5_000;
        config.fast_duration_ms = 2_500;
        config.slow_interval_ms = 60_000;
        let invoker = Arc::new(RecordingInvoker::default());
        let start = Instant::now();
        let (handle, _events, _) = spawn_runtime(config, invoker.clone());

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        handle.trigger(Trigger::WindowFocusGained).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3_000)).await;

        // Heartbeats at 1000 and 2000 while idle, the FAST entry pass at 2500,
        // then nothing in FAST or SLOW.
        assert_eq!(invoker.offsets_ms(start), vec![1_000, 2_000, 2_500]);
    }

    /// Session whose liveness the test controls.
    struct StubSession {
        id: String,
        open: AtomicBool,
    }

    #[async_trait]
    impl TargetSession for StubSession {
        fn target_id(&self) -> &str {
            &self.id
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn evaluate(&self, _expression: &str) -> Result<serde_json::Value, CdpError> {
            Ok(serde_json::Value::Null)
        }

        async fn press_key(&self, _key: &str) -> Result<(), CdpError> {
            Ok(())
        }

        async fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct StubConnector {
        opened: parking_lot::Mutex<Vec<Arc<StubSession>>>,
    }

    #[async_trait]
    impl TargetConnector for StubConnector {
        async fn connect(
            &self,
            target: &TargetDescriptor,
        ) -> Result<Arc<dyn TargetSession>, CdpError> {
            let session = Arc::new(StubSession {
                id: target.id.clone(),
                open: AtomicBool::new(true),
            });
            self.opened.lock().push(session.clone());
            Ok(session)
        }
    }

    struct FixedListing(Vec<TargetDescriptor>);

    #[async_trait]
    impl TargetSource for FixedListing {
        async fn targets(&self) -> Result<Vec<TargetDescriptor>, CdpError> {
            Ok(self.0.clone())
        }
    }

    fn listed_page(id: &str) -> TargetDescriptor {
        TargetDescriptor {
            id: id.into(),
            kind: "page".into(),
            title: id.into(),
            url: String::new(),
            websocket_url: Some(format!("ws://127.0.0.1:9222/devtools/page/{id}")),
        }
    }

    #[tokio::test]
    async fn close_notices_only_prune_dead_sessions() {
        let mut config = quiet_config();
        config.cdp.enabled = true;
        config.cdp.discovery_interval_ms = 60_000;
        let connector = Arc::new(StubConnector::default());
        let pool = Arc::new(TargetPool::new(connector.clone()));
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (runtime, handle) = AgentRuntime::builder(
            Arc::new(SharedSettings::new(config)),
            Arc::new(RecordingInvoker::default()),
        )
        .with_remote(RemoteLink {
            pool: pool.clone(),
            source: Arc::new(FixedListing(vec![listed_page("a"), listed_page("b")])),
            close_rx,
        })
        .with_events(events_tx)
        .build();
        tokio::spawn(runtime.run());

        let mut status = handle.status();
        let wait = Duration::from_secs(5);
        tokio::time::timeout(wait, status.wait_for(|s| s.remote == RemoteStatus::Active { targets: 2 }))
            .await
            .expect("pool should fill")
            .unwrap();

        // Notices for unknown ids and for sessions that are still open change nothing.
        for target_id in ["ghost", "a"] {
            close_tx
                .send(CloseNotice {
                    target_id: target_id.into(),
                    reason: "socket closed".into(),
                })
                .unwrap();
        }
        let mut closed = 0;
        while closed < 2 {
            if let Some(AgentEvent::TargetClosed { .. }) = events.recv().await {
                closed += 1;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status_snapshot().remote, RemoteStatus::Active { targets: 2 });
        assert_eq!(pool.ids().await, vec!["a", "b"]);

        let session_a = connector
            .opened
            .lock()
            .iter()
            .find(|s| s.id == "a")
            .cloned()
            .unwrap();
        session_a.open.store(false, Ordering::SeqCst);
        close_tx
            .send(CloseNotice {
                target_id: "a".into(),
                reason: "socket closed".into(),
            })
            .unwrap();
        tokio::time::timeout(wait, status.wait_for(|s| s.remote == RemoteStatus::Active { targets: 1 }))
            .await
            .expect("dead session should be pruned")
            .unwrap();
        assert_eq!(pool.ids().await, vec!["b"]);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handle_reports_stopped_runtime() {
        let (handle, _events, _) = spawn_runtime(quiet_config(), Arc::new(RecordingInvoker::default()));
        handle.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            handle.toggle().await,
            Err(RuntimeError::Stopped)
        ));
        assert!(!handle.status_snapshot().enabled);
    }
}
