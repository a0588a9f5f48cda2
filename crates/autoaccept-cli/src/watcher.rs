//! Filesystem activity as a trigger source.
//!
//! Created files become [`Trigger::FileCreated`], written files become
//! [`Trigger::DocumentSaved`], and any change to a loaded config file
//! becomes [`Trigger::ConfigurationChanged`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info};

use autoaccept_core::AgentHandle;
use autoaccept_types::Trigger;

/// Keeps the underlying watcher alive; dropping it stops delivery.
pub struct TriggerWatcher {
    _watcher: RecommendedWatcher,
}

impl TriggerWatcher {
    /// Watch `roots` recursively and `config_files` individually.
    pub fn start(roots: &[PathBuf], config_files: &[PathBuf], handle: AgentHandle) -> Result<Self> {
        let roots: Vec<PathBuf> = roots.iter().map(|p| absolute(p)).collect();
        let config_files: Vec<PathBuf> = config_files.iter().map(|p| absolute(p)).collect();
        let watched_configs = config_files.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                let Ok(event) = res else {
                    return;
                };
                if let Some(trigger) = trigger_for(&event, &watched_configs) {
                    if handle.try_trigger(trigger).is_err() {
                        debug!("agent stopped, dropping filesystem trigger");
                    }
                }
            },
            Config::default(),
        )
        .context("failed to create filesystem watcher")?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("failed to watch {}", root.display()))?;
            info!(path = %root.display(), "watching for file activity");
        }
        for file in &config_files {
            if roots.iter().any(|root| file.starts_with(root)) {
                continue;
            }
            watcher
                .watch(file, RecursiveMode::NonRecursive)
                .with_context(|| format!("failed to watch {}", file.display()))?;
        }

        Ok(Self { _watcher: watcher })
    }
}

/// The trigger a filesystem event maps to, if any.
pub fn trigger_for(event: &notify::Event, config_files: &[PathBuf]) -> Option<Trigger> {
    let touches_config = event
        .paths
        .iter()
        .any(|path| is_config_file(path, config_files));

    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(_) if touches_config => {
            Some(Trigger::ConfigurationChanged)
        }
        EventKind::Create(_) => Some(Trigger::FileCreated),
        EventKind::Modify(notify::event::ModifyKind::Data(_))
        | EventKind::Modify(notify::event::ModifyKind::Any) => Some(Trigger::DocumentSaved),
        _ => None,
    }
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn is_config_file(path: &Path, config_files: &[PathBuf]) -> bool {
    config_files.iter().any(|config| config == path)
}
