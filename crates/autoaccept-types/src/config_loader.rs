//! Hierarchical configuration loading with multiple sources merged in priority order.
//!
//! The priority chain (later overrides earlier):
//! 1. Built-in defaults ([`AcceptConfig::default()`])
//! 2. User-level: `~/.autoaccept/config.toml`
//! 3. Workspace-level: `./.autoaccept/config.toml`
//! 4. `AUTOACCEPT_*` environment variables
//! 5. CLI flags (applied by the caller through [`ConfigLoader::with_override`])
//!
//! Each key in the final [`EffectiveConfig`] is annotated with the
//! [`ConfigSource`] that determined its value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{AcceptConfig, CONFIG_DIR, CONFIG_FILENAME};
use crate::AcceptError;

/// Files larger than this are rejected.
const MAX_CONFIG_FILE_SIZE: u64 = 256 * 1024;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    BuiltinDefault,
    UserFile(PathBuf),
    WorkspaceFile(PathBuf),
    EnvVar(String),
    CliFlag(String),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::BuiltinDefault => write!(f, "built-in default"),
            ConfigSource::UserFile(p) => write!(f, "user file: {}", p.display()),
            ConfigSource::WorkspaceFile(p) => write!(f, "workspace file: {}", p.display()),
            ConfigSource::EnvVar(name) => write!(f, "env var: {name}"),
            ConfigSource::CliFlag(name) => write!(f, "CLI flag: {name}"),
        }
    }
}

/// The merged config plus provenance information for each key.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: AcceptConfig,
    /// Dot-separated key path -> the source that determined its value.
    pub sources: HashMap<String, ConfigSource>,
    /// Config files that were found and loaded, in priority order.
    pub source_files: Vec<PathBuf>,
}

impl EffectiveConfig {
    /// The source of a dot-separated key, defaulting to the built-in value.
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.sources
            .get(key)
            .cloned()
            .unwrap_or(ConfigSource::BuiltinDefault)
    }
}

/// Hierarchical configuration loader.
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    workspace_config_path: Option<PathBuf>,
    /// Replaces the process environment when set (used by tests).
    env: Option<HashMap<String, String>>,
    /// Dot-path overrides from CLI flags, applied last.
    overrides: Vec<(String, String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: None,
            workspace_config_path: None,
            env: None,
            overrides: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_user_path(mut self, path: PathBuf) -> Self {
        self.user_config_path = Some(path);
        self
    }

    #[must_use]
    pub fn with_workspace_path(mut self, path: PathBuf) -> Self {
        self.workspace_config_path = Some(path);
        self
    }

    /// Read environment overrides from `env` instead of the process environment.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Apply a CLI flag override for a dot-separated key path.
    ///
    /// `raw_value` is parsed as a TOML literal, falling back to a string.
    #[must_use]
    pub fn with_override(mut self, flag: &str, path: &str, raw_value: &str) -> Self {
        self.overrides
            .push((flag.to_string(), path.to_string(), raw_value.to_string()));
        self
    }

    fn user_path(&self) -> PathBuf {
        self.user_config_path.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
            PathBuf::from(home).join(CONFIG_DIR).join(CONFIG_FILENAME)
        })
    }

    fn workspace_path(&self) -> PathBuf {
        self.workspace_config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILENAME))
    }

    /// Load and merge configuration from all sources.
    pub fn load(&self) -> Result<EffectiveConfig, AcceptError> {
        let mut sources = HashMap::new();
        let mut source_files = Vec::new();

        let mut merged = toml::Value::try_from(AcceptConfig::default())
            .map_err(|e| AcceptError::ConfigError(format!("failed to serialize defaults: {e}")))?;

        let user_path = self.user_path();
        if user_path.exists() {
            let layer = read_layer(&user_path, "user")?;
            deep_merge(&mut merged, &layer);
            record_sources(&layer, &mut sources, ConfigSource::UserFile(user_path.clone()));
            source_files.push(user_path);
        }

        let workspace_path = self.workspace_path();
        if workspace_path.exists() {
            let layer = read_layer(&workspace_path, "workspace")?;
            deep_merge(&mut merged, &layer);
            record_sources(
                &layer,
                &mut sources,
                ConfigSource::WorkspaceFile(workspace_path.clone()),
            );
            source_files.push(workspace_path);
        }

        self.apply_env_overrides(&mut merged, &mut sources)?;

        for (flag, path, raw) in &self.overrides {
            set_dot_value(&mut merged, path, raw)?;
            sources.insert(path.clone(), ConfigSource::CliFlag(flag.clone()));
        }

        let config: AcceptConfig = merged
            .try_into()
            .map_err(|e| AcceptError::ConfigError(format!("failed to parse merged config: {e}")))?;
        config.validate()?;

        Ok(EffectiveConfig {
            config,
            sources,
            source_files,
        })
    }

    fn env_var(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    fn apply_env_overrides(
        &self,
        merged: &mut toml::Value,
        sources: &mut HashMap<String, ConfigSource>,
    ) -> Result<(), AcceptError> {
        for mapping in ENV_MAPPINGS {
            if let Some(raw_value) = self.env_var(mapping.env_var) {
                validate_env_value(mapping.env_var, &raw_value)?;
                let value = env_value_to_toml(mapping, &raw_value)?;
                set_nested_value(merged, mapping.toml_path, value);
                sources.insert(
                    mapping.toml_path.join("."),
                    ConfigSource::EnvVar(mapping.env_var.to_string()),
                );
            }
        }
        Ok(())
    }
}

fn read_layer(path: &Path, label: &str) -> Result<toml::Value, AcceptError> {
    let content = read_config_file(path)?;
    toml::from_str(&content)
        .map_err(|e| AcceptError::ConfigError(format!("invalid {label} config: {e}")))
}

/// Read a config file with a size limit and a null-byte check.
fn read_config_file(path: &Path) -> Result<String, AcceptError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        AcceptError::ConfigError(format!("cannot read config file {}: {e}", path.display()))
    })?;

    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(AcceptError::ConfigError(format!(
            "config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes (actual: {} bytes)",
            path.display(),
            metadata.len()
        )));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        AcceptError::ConfigError(format!("cannot read config file {}: {e}", path.display()))
    })?;

    if content.contains('\0') {
        return Err(AcceptError::ConfigError(format!(
            "config file {} contains null bytes",
            path.display()
        )));
    }

    Ok(content)
}

/// Deep-merge `overlay` into `base`. Tables merge key by key; anything else
/// is replaced.
fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn record_sources(
    layer: &toml::Value,
    sources: &mut HashMap<String, ConfigSource>,
    source: ConfigSource,
) {
    fn walk(
        value: &toml::Value,
        prefix: &str,
        sources: &mut HashMap<String, ConfigSource>,
        source: &ConfigSource,
    ) {
        if let toml::Value::Table(table) = value {
            for (key, val) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                sources.insert(path.clone(), source.clone());
                walk(val, &path, sources, source);
            }
        }
    }
    walk(layer, "", sources, &source);
}

/// How a value read from an environment variable is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    Bool,
    Integer,
    Text,
}

/// Known environment variable mapping.
pub struct EnvMapping {
    pub env_var: &'static str,
    /// Dot-separated TOML path segments.
    pub toml_path: &'static [&'static str],
    pub kind: EnvKind,
}

/// All supported `AUTOACCEPT_*` environment variable mappings.
pub const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        env_var: "AUTOACCEPT_ENABLED",
        toml_path: &["enabled"],
        kind: EnvKind::Bool,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_FAST_INTERVAL_MS",
        toml_path: &["fast_interval_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_SLOW_INTERVAL_MS",
        toml_path: &["slow_interval_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_HEARTBEAT_INTERVAL_MS",
        toml_path: &["heartbeat_interval_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_FAST_DURATION_MS",
        toml_path: &["fast_duration_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_COOLDOWN_DURATION_MS",
        toml_path: &["cooldown_duration_ms"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_CDP_ENABLED",
        toml_path: &["cdp", "enabled"],
        kind: EnvKind::Bool,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_CDP_HOST",
        toml_path: &["cdp", "host"],
        kind: EnvKind::Text,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_CDP_PORT",
        toml_path: &["cdp", "port"],
        kind: EnvKind::Integer,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_LAUNCH_CONFIG",
        toml_path: &["cdp", "launch_config_path"],
        kind: EnvKind::Text,
    },
    EnvMapping {
        env_var: "AUTOACCEPT_HOST_PROGRAM",
        toml_path: &["host", "program"],
        kind: EnvKind::Text,
    },
];

/// Reject null bytes and control characters (except whitespace).
fn validate_env_value(var_name: &str, value: &str) -> Result<(), AcceptError> {
    for ch in value.chars() {
        if ch.is_control() && ch != '\t' && ch != '\n' && ch != '\r' {
            return Err(AcceptError::ConfigError(format!(
                "environment variable {var_name} contains control character U+{:04X}",
                ch as u32
            )));
        }
    }
    Ok(())
}

fn env_value_to_toml(mapping: &EnvMapping, raw: &str) -> Result<toml::Value, AcceptError> {
    let env_var = mapping.env_var;
    match mapping.kind {
        EnvKind::Bool => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(AcceptError::ConfigError(format!(
                "environment variable {env_var} must be a boolean, got {raw:?}"
            ))),
        },
        EnvKind::Integer => {
            let num: i64 = raw.trim().parse().map_err(|e| {
                AcceptError::ConfigError(format!(
                    "environment variable {env_var} must be numeric: {e}"
                ))
            })?;
            Ok(toml::Value::Integer(num))
        }
        EnvKind::Text => Ok(toml::Value::String(raw.to_string())),
    }
}

/// Set a value at a nested path, creating intermediate tables as needed.
fn set_nested_value(root: &mut toml::Value, path: &[&str], value: toml::Value) {
    match path {
        [] => {}
        [last] => {
            if let toml::Value::Table(table) = root {
                table.insert((*last).to_string(), value);
            }
        }
        [first, rest @ ..] => {
            if let toml::Value::Table(table) = root {
                let entry = table
                    .entry((*first).to_string())
                    .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
                set_nested_value(entry, rest, value);
            }
        }
    }
}

/// Set a value in a TOML tree using a dot-separated key path.
pub fn set_dot_value(root: &mut toml::Value, path: &str, raw_value: &str) -> Result<(), AcceptError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(AcceptError::ConfigError(
            "config key path must be non-empty with no empty segments".into(),
        ));
    }
    set_nested_value(root, &segments, parse_toml_literal(raw_value));
    Ok(())
}

/// Parse a string as a TOML literal value: integer, float, boolean, then any
/// inline TOML value. Falls back to a plain string.
fn parse_toml_literal(raw: &str) -> toml::Value {
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    let wrapped = format!("v = {raw}");
    if let Ok(toml::Value::Table(mut table)) = toml::from_str::<toml::Value>(&wrapped) {
        if let Some(v) = table.remove("v") {
            return v;
        }
    }
    toml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated_loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_user_path(dir.join("user.toml"))
            .with_workspace_path(dir.join("workspace.toml"))
            .with_env(HashMap::new())
    }

    #[test]
    fn defaults_when_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let effective = isolated_loader(dir.path()).load().unwrap();
        assert_eq!(effective.config, AcceptConfig::default());
        assert!(effective.source_files.is_empty());
        assert_eq!(
            effective.source_of("fast_interval_ms"),
            ConfigSource::BuiltinDefault
        );
    }

    #[test]
    fn workspace_overrides_user() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("user.toml"),
            "fast_interval_ms = 300\nslow_interval_ms = 4000\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("workspace.toml"),
            "fast_interval_ms = 150\n[cdp]\nport = 9300\n",
        )
        .unwrap();

        let effective = isolated_loader(dir.path()).load().unwrap();
        assert_eq!(effective.config.fast_interval_ms, 150);
        assert_eq!(effective.config.slow_interval_ms, 4000);
        assert_eq!(effective.config.cdp.port, 9300);
        assert_eq!(effective.source_files.len(), 2);
        assert!(matches!(
            effective.source_of("slow_interval_ms"),
            ConfigSource::UserFile(_)
        ));
        assert!(matches!(
            effective.source_of("cdp.port"),
            ConfigSource::WorkspaceFile(_)
        ));
    }

    #[test]
    fn env_overrides_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("workspace.toml"), "[cdp]\nport = 9300\n").unwrap();
        let env = HashMap::from([
            ("AUTOACCEPT_CDP_PORT".to_string(), "9400".to_string()),
            ("AUTOACCEPT_CDP_ENABLED".to_string(), "off".to_string()),
        ]);
        let effective = isolated_loader(dir.path()).with_env(env).load().unwrap();
        assert_eq!(effective.config.cdp.port, 9400);
        assert!(!effective.config.cdp.enabled);
        assert_eq!(
            effective.source_of("cdp.port"),
            ConfigSource::EnvVar("AUTOACCEPT_CDP_PORT".into())
        );
    }

    #[test]
    fn invalid_env_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([("AUTOACCEPT_FAST_INTERVAL_MS".to_string(), "fast".to_string())]);
        let err = isolated_loader(dir.path()).with_env(env).load().unwrap_err();
        assert!(err.to_string().contains("must be numeric"));
    }

    #[test]
    fn cli_override_applies_last() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([("AUTOACCEPT_CDP_PORT".to_string(), "9400".to_string())]);
        let effective = isolated_loader(dir.path())
            .with_env(env)
            .with_override("--port", "cdp.port", "9500")
            .load()
            .unwrap();
        assert_eq!(effective.config.cdp.port, 9500);
        assert_eq!(
            effective.source_of("cdp.port"),
            ConfigSource::CliFlag("--port".into())
        );
    }

    #[test]
    fn invalid_merged_config_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("user.toml"), "slow_interval_ms = 0\n").unwrap();
        let err = isolated_loader(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("slow_interval_ms"));
    }

    #[test]
    fn null_bytes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("user.toml"), "enabled = true\0").unwrap();
        let err = isolated_loader(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("null bytes"));
    }

    #[test]
    fn parse_literal_variants() {
        assert_eq!(parse_toml_literal("42"), toml::Value::Integer(42));
        assert_eq!(parse_toml_literal("true"), toml::Value::Boolean(true));
        assert_eq!(
            parse_toml_literal("[\"a\", \"b\"]"),
            toml::Value::Array(vec!["a".into(), "b".into()])
        );
        assert_eq!(parse_toml_literal("code"), toml::Value::String("code".into()));
    }
}
