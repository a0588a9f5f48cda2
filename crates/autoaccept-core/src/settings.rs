//! Read access to the agent configuration.
//!
//! The runtime never caches settings: every decision point asks the
//! [`SettingsSource`] for the current values, so edits take effect at the
//! next timer entry without restarting the agent.

use parking_lot::RwLock;

use autoaccept_types::{AcceptConfig, AcceptError};

/// Where the runtime reads its configuration from.
pub trait SettingsSource: Send + Sync {
    /// The configuration as it is now.
    fn current(&self) -> AcceptConfig;

    /// Re-read the backing store, returning the new configuration.
    ///
    /// Sources without a backing store just return [`current`](Self::current).
    fn reload(&self) -> Result<AcceptConfig, AcceptError> {
        Ok(self.current())
    }
}

type Reloader = Box<dyn Fn() -> Result<AcceptConfig, AcceptError> + Send + Sync>;

/// In-memory settings, optionally backed by a reload function.
pub struct SharedSettings {
    config: RwLock<AcceptConfig>,
    reloader: Option<Reloader>,
}

impl SharedSettings {
    pub fn new(config: AcceptConfig) -> Self {
        Self {
            config: RwLock::new(config),
            reloader: None,
        }
    }

    /// Use `reload` to refresh the settings on a configuration change.
    #[must_use]
    pub fn with_reloader(
        mut self,
        reload: impl Fn() -> Result<AcceptConfig, AcceptError> + Send + Sync + 'static,
    ) -> Self {
        self.reloader = Some(Box::new(reload));
        self
    }

    /// Replace the settings in place.
    pub fn set(&self, config: AcceptConfig) {
        *self.config.write() = config;
    }

    /// Edit the settings in place.
    pub fn update(&self, edit: impl FnOnce(&mut AcceptConfig)) {
        edit(&mut self.config.write());
    }
}

impl SettingsSource for SharedSettings {
    fn current(&self) -> AcceptConfig {
        self.config.read().clone()
    }

    fn reload(&self) -> Result<AcceptConfig, AcceptError> {
        let Some(reload) = &self.reloader else {
            return Ok(self.current());
        };
        let fresh = reload()?;
        fresh.validate()?;
        self.set(fresh.clone());
        Ok(fresh)
    }
}
