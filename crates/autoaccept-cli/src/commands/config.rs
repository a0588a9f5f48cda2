//! Configuration inspection commands.
//!
//! `autoaccept config show`   -- every effective key with its source
//! `autoaccept config path`   -- the config files that were loaded

use anyhow::{Context, Result};

use autoaccept_types::EffectiveConfig;

use crate::options::ConfigArgs;

/// Run `autoaccept config show`.
pub fn show(args: &ConfigArgs) -> Result<()> {
    let effective = args.load()?;
    for line in render(&effective)? {
        println!("{line}");
    }
    Ok(())
}

/// Run `autoaccept config path`.
pub fn path(args: &ConfigArgs) -> Result<()> {
    let effective = args.load()?;
    if effective.source_files.is_empty() {
        println!("(no config files found, using defaults)");
    }
    for file in &effective.source_files {
        println!("{}", file.display());
    }
    Ok(())
}

/// One `key = value  # source` line per leaf key, sorted by key.
pub fn render(effective: &EffectiveConfig) -> Result<Vec<String>> {
    let value =
        toml::Value::try_from(&effective.config).context("failed to serialize configuration")?;
    let mut leaves = Vec::new();
    flatten(&value, "", &mut leaves);
    leaves.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(leaves
        .into_iter()
        .map(|(key, value)| format!("{key} = {value}  # {}", effective.source_of(&key)))
        .collect())
}

fn flatten(value: &toml::Value, prefix: &str, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) if !table.is_empty() => {
            for (key, val) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(val, &path, out);
            }
        }
        other => out.push((prefix.to_string(), other.to_string())),
    }
}
