//! The pool of live target sessions.
//!
//! Holds at most one session per target id. Discovery results are applied
//! with [`TargetPool::reconcile`]; acceptance rounds run with
//! [`TargetPool::sweep`] over a snapshot so the pool lock is never held
//! across a script evaluation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use autoaccept_types::CdpConfig;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::discovery::TargetDescriptor;
use crate::error::CdpError;
use crate::recognizer::{ControlSurvey, PromptRecognizer};
use crate::session::{TargetConnector, TargetSession};

/// A pooled session plus the bookkeeping the sweep needs.
pub struct PooledTarget {
    pub descriptor: TargetDescriptor,
    pub session: Arc<dyn TargetSession>,
    last_fallback: parking_lot::Mutex<Option<Instant>>,
}

impl PooledTarget {
    fn new(descriptor: TargetDescriptor, session: Arc<dyn TargetSession>) -> Self {
        Self {
            descriptor,
            session,
            last_fallback: parking_lot::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Claim the key fallback if it has not fired within `cooldown`.
    fn claim_fallback(&self, cooldown: Duration) -> bool {
        let mut last = self.last_fallback.lock();
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// What a reconcile changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids newly connected.
    pub connected: Vec<String>,
    /// Ids closed because they vanished or their connection had died.
    pub dropped: Vec<String>,
    /// Ids whose connection attempt failed; retried next cycle.
    pub failed: Vec<String>,
    /// Descriptors ignored as not connectable.
    pub excluded: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.connected.is_empty() && self.dropped.is_empty() && self.failed.is_empty()
    }
}

/// Totals from one evaluation round across the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub targets: usize,
    pub activated: usize,
    pub fallbacks: usize,
    pub errors: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: TargetSweep) {
        self.activated += other.activated;
        self.fallbacks += usize::from(other.fallback);
    }
}

/// Key fallback parameters for a sweep.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    pub fallback_key: String,
    pub fallback_cooldown: Duration,
}

impl SweepOptions {
    pub fn from_config(config: &CdpConfig) -> Self {
        Self {
            fallback_key: config.key_fallback_key.clone(),
            fallback_cooldown: config.click_cooldown(),
        }
    }
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            fallback_key: "Enter".into(),
            fallback_cooldown: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct TargetSweep {
    activated: usize,
    fallback: bool,
}

/// Live sessions keyed by target id.
pub struct TargetPool {
    connector: Arc<dyn TargetConnector>,
    entries: Mutex<HashMap<String, Arc<PooledTarget>>>,
}

impl TargetPool {
    pub fn new(connector: Arc<dyn TargetConnector>) -> Self {
        Self {
            connector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Bring the pool in line with a discovery result.
    ///
    /// Afterwards the pooled ids equal the connectable ids in `targets`,
    /// minus those whose connection attempt failed.
    pub async fn reconcile(&self, targets: &[TargetDescriptor]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut wanted: Vec<TargetDescriptor> = Vec::new();
        let mut seen = HashSet::new();
        for target in targets {
            if !target.is_connectable() {
                report.excluded += 1;
                continue;
            }
            if seen.insert(target.id.clone()) {
                wanted.push(target.clone());
            }
        }

        let (stale, missing) = {
            let mut entries = self.entries.lock().await;
            let stale_ids: Vec<String> = entries
                .iter()
                .filter(|(id, entry)| !seen.contains(*id) || !entry.session.is_open())
                .map(|(id, _)| id.clone())
                .collect();
            let stale: Vec<Arc<PooledTarget>> = stale_ids
                .iter()
                .filter_map(|id| entries.remove(id))
                .collect();
            let missing: Vec<TargetDescriptor> = wanted
                .into_iter()
                .filter(|t| !entries.contains_key(&t.id))
                .collect();
            (stale, missing)
        };

        for entry in stale {
            debug!(target_id = %entry.id(), "closing stale target session");
            entry.session.close().await;
            report.dropped.push(entry.id().to_string());
        }

        let attempts = join_all(missing.iter().map(|t| self.connector.connect(t))).await;
        let mut fresh = Vec::new();
        for (target, result) in missing.into_iter().zip(attempts) {
            match result {
                Ok(session) => fresh.push(PooledTarget::new(target, session)),
                Err(e) => {
                    warn!(target_id = %target.id, error = %e, "failed to connect to target");
                    report.failed.push(target.id);
                }
            }
        }

        let mut duplicates = Vec::new();
        {
            let mut entries = self.entries.lock().await;
            for entry in fresh {
                let id = entry.id().to_string();
                if entries.contains_key(&id) {
                    duplicates.push(entry);
                    continue;
                }
                info!(target_id = %id, title = %entry.descriptor.title, "connected to target");
                entries.insert(id.clone(), Arc::new(entry));
                report.connected.push(id);
            }
        }
        for entry in duplicates {
            entry.session.close().await;
        }

        report.connected.sort();
        report.dropped.sort();
        report.failed.sort();
        report
    }

    /// Remove and close one target, e.g. after its connection reported a
    /// close. Returns whether it was pooled.
    pub async fn remove(&self, target_id: &str) -> bool {
        let entry = self.entries.lock().await.remove(target_id);
        match entry {
            Some(entry) => {
                entry.session.close().await;
                true
            }
            None => false,
        }
    }

    /// Remove a target only if its pooled session is no longer open.
    ///
    /// Close notices can arrive after discovery has already replaced the
    /// dead session with a fresh one under the same id; that one stays.
    pub async fn remove_closed(&self, target_id: &str) -> bool {
        let entry = {
            let mut entries = self.entries.lock().await;
            match entries.get(target_id) {
                Some(entry) if !entry.session.is_open() => entries.remove(target_id),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                entry.session.close().await;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the pooled targets.
    pub async fn sessions(&self) -> Vec<Arc<PooledTarget>> {
        self.entries.lock().await.values().cloned().collect()
    }

    /// Sorted pooled ids.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Close every session and empty the pool.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<PooledTarget>> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.session.close().await;
        }
    }

    /// Run one recognition round on every pooled target.
    ///
    /// Per-target failures are counted and logged; they never stop the round.
    pub async fn sweep(
        &self,
        recognizer: &dyn PromptRecognizer,
        options: &SweepOptions,
    ) -> SweepReport {
        let targets = self.sessions().await;
        let mut report = SweepReport {
            targets: targets.len(),
            ..SweepReport::default()
        };

        let results = join_all(
            targets
                .iter()
                .map(|t| sweep_target(t, recognizer, options)),
        )
        .await;

        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(swept) => report.absorb(swept),
                Err(e) => {
                    report.errors += 1;
                    debug!(target_id = %target.id(), error = %e, "target evaluation failed");
                }
            }
        }
        report
    }
}

async fn sweep_target(
    target: &PooledTarget,
    recognizer: &dyn PromptRecognizer,
    options: &SweepOptions,
) -> Result<TargetSweep, CdpError> {
    let session = &target.session;
    let raw = session.evaluate(&recognizer.survey_script()).await?;
    let survey: ControlSurvey = serde_json::from_value(raw).map_err(|e| CdpError::Protocol {
        detail: format!("unexpected survey result: {e}"),
    })?;

    let selections = recognizer.select(&survey);
    if !selections.is_empty() {
        let value = session
            .evaluate(&recognizer.activate_script(&selections))
            .await?;
        let activated = value.as_u64().unwrap_or(0) as usize;
        if activated > 0 {
            let labels: Vec<&str> = selections.iter().map(|s| s.label.as_str()).collect();
            info!(
                target_id = %target.id(),
                activated,
                labels = ?labels,
                "activated approval controls"
            );
        }
        return Ok(TargetSweep {
            activated,
            fallback: false,
        });
    }

    if !survey.fallback_available {
        return Ok(TargetSweep::default());
    }
    let Some(focus_script) = recognizer.focus_fallback_script() else {
        return Ok(TargetSweep::default());
    };
    if !target.claim_fallback(options.fallback_cooldown) {
        return Ok(TargetSweep::default());
    }

    let focused = session.evaluate(&focus_script).await?;
    if focused.as_bool() != Some(true) {
        return Ok(TargetSweep::default());
    }
    session.press_key(&options.fallback_key).await?;
    info!(target_id = %target.id(), key = %options.fallback_key, "dispatched key fallback");
    Ok(TargetSweep {
        activated: 0,
        fallback: true,
    })
}
