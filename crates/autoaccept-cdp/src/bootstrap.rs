//! One-time enabling of the remote-debugging endpoint.
//!
//! The host reads its launch flags from a JSON-with-comments file
//! (`argv.json`). If it does not already carry `"remote-debugging-port"`,
//! a free port is chosen and the key is inserted textually before the final
//! `}` so the user's comments and formatting survive. The host has to be
//! restarted before the endpoint exists.

use std::net::TcpListener;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::BootstrapError;

/// Launch-configuration key the host reads.
pub const PORT_KEY: &str = "remote-debugging-port";

/// Result of [`ensure_remote_debugging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The file already names a port; nothing was written.
    AlreadyConfigured { port: u16 },
    /// The key was added; the host must restart to open the endpoint.
    Written { port: u16, path: PathBuf },
}

impl BootstrapOutcome {
    pub fn port(&self) -> u16 {
        match self {
            BootstrapOutcome::AlreadyConfigured { port } | BootstrapOutcome::Written { port, .. } => {
                *port
            }
        }
    }

    pub fn restart_required(&self) -> bool {
        matches!(self, BootstrapOutcome::Written { .. })
    }
}

/// `$HOME/.vscode/argv.json`, or `None` without a home directory.
pub fn default_launch_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".vscode").join("argv.json"))
}

/// Whether nothing is listening on `127.0.0.1:port`.
pub fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// First port in `preferred ..= preferred + range` for which `is_free` holds.
pub fn select_free_port(
    preferred: u16,
    range: u16,
    is_free: impl Fn(u16) -> bool,
) -> Result<u16, BootstrapError> {
    let last = preferred.saturating_add(range);
    (preferred..=last)
        .find(|port| is_free(*port))
        .ok_or(BootstrapError::NoFreePort {
            first: preferred,
            last,
        })
}

/// Make sure the launch configuration at `path` enables remote debugging,
/// probing real sockets for a free port.
pub fn ensure_remote_debugging(
    path: &Path,
    preferred: u16,
    range: u16,
) -> Result<BootstrapOutcome, BootstrapError> {
    ensure_remote_debugging_with(path, preferred, range, port_is_free)
}

/// [`ensure_remote_debugging`] with an injectable port probe.
pub fn ensure_remote_debugging_with(
    path: &Path,
    preferred: u16,
    range: u16,
    is_free: impl Fn(u16) -> bool,
) -> Result<BootstrapOutcome, BootstrapError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(BootstrapError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let config = parse_launch_config(&text).map_err(|reason| BootstrapError::Parse {
        path: path.to_path_buf(),
        reason,
    })?;

    match configured_port(&config) {
        Ok(Some(port)) => {
            debug!(path = %path.display(), port, "remote debugging already configured");
            return Ok(BootstrapOutcome::AlreadyConfigured { port });
        }
        Ok(None) => {}
        Err(reason) => {
            return Err(BootstrapError::Parse {
                path: path.to_path_buf(),
                reason,
            })
        }
    }

    let port = select_free_port(preferred, range, is_free)?;
    let updated = insert_port(&text, port).map_err(|reason| BootstrapError::Parse {
        path: path.to_path_buf(),
        reason,
    })?;
    write_atomically(path, &updated)?;

    info!(path = %path.display(), port, "enabled remote debugging; restart the host to apply");
    Ok(BootstrapOutcome::Written {
        port,
        path: path.to_path_buf(),
    })
}

/// Parse JSON-with-comments into an object. Blank input is an empty object.
pub fn parse_launch_config(text: &str) -> Result<Map<String, Value>, String> {
    let plain = strip_jsonc(text);
    if plain.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&plain) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("top level is {}", json_type(&other))),
        Err(e) => Err(e.to_string()),
    }
}

/// The configured port, `None` when absent, an error when malformed.
pub fn configured_port(config: &Map<String, Value>) -> Result<Option<u16>, String> {
    let Some(value) = config.get(PORT_KEY) else {
        return Ok(None);
    };
    let port = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match port {
        Some(p) if (1..=u64::from(u16::MAX)).contains(&p) => Ok(Some(p as u16)),
        _ => Err(format!("\"{PORT_KEY}\" is not a port number: {value}")),
    }
}

/// Remove comments and trailing commas so the text parses as plain JSON.
pub fn strip_jsonc(text: &str) -> String {
    let mut bytes = mask_comments(text);

    // Blank out commas followed only by whitespace before `}` or `]`.
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == b',' {
            let next = bytes[i + 1..]
                .iter()
                .find(|c| !c.is_ascii_whitespace())
                .copied();
            if matches!(next, Some(b'}') | Some(b']')) {
                bytes[i] = b' ';
            }
        }
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Insert the port key before the final `}` of `text`, keeping everything
/// else byte for byte.
pub fn insert_port(text: &str, port: u16) -> Result<String, String> {
    let entry = format!("\"{PORT_KEY}\": {port}");
    if strip_jsonc(text).trim().is_empty() {
        let mut out = String::from(text.trim_end());
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("{{\n\t{entry}\n}}\n"));
        return Ok(out);
    }

    let masked = mask_comments(text);
    let close = masked
        .iter()
        .rposition(|b| *b == b'}')
        .ok_or_else(|| "no closing brace".to_string())?;
    let last_significant = masked[..close]
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .ok_or_else(|| "no opening brace".to_string())?;
    let needs_comma = !matches!(masked[last_significant], b'{' | b',');

    let line_start = masked[..close]
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |p| p + 1);
    let brace_on_own_line = masked[line_start..close]
        .iter()
        .all(|b| b.is_ascii_whitespace());

    let indent = detect_indent(text);
    let mut out = String::with_capacity(text.len() + entry.len() + 8);
    out.push_str(&text[..=last_significant]);
    if needs_comma {
        out.push(',');
    }
    if brace_on_own_line {
        out.push_str(&text[last_significant + 1..line_start]);
        out.push_str(&format!("{indent}{entry}\n"));
        out.push_str(&text[line_start..]);
    } else {
        out.push_str(&text[last_significant + 1..close]);
        out.push_str(&format!("\n{indent}{entry}\n"));
        out.push_str(&text[close..]);
    }
    Ok(out)
}

/// Replace comment bytes with spaces, preserving offsets and newlines.
fn mask_comments(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    let mut i = 0;
    let mut in_string = false;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        match (b, bytes.get(i + 1).copied()) {
            (b'"', _) => {
                in_string = true;
                i += 1;
            }
            (b'/', Some(b'/')) => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    bytes[i] = b' ';
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                bytes[i] = b' ';
                bytes[i + 1] = b' ';
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        bytes[i] = b' ';
                        bytes[i + 1] = b' ';
                        i += 2;
                        break;
                    }
                    if bytes[i] != b'\n' {
                        bytes[i] = b' ';
                    }
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes
}

/// Leading whitespace of the first key line, tab when there is none.
fn detect_indent(text: &str) -> String {
    text.lines()
        .find(|line| line.trim_start().starts_with('"'))
        .map(|line| {
            line.chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .collect::<String>()
        })
        .filter(|indent| !indent.is_empty())
        .unwrap_or_else(|| "\t".to_string())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), BootstrapError> {
    let write_err = |source| BootstrapError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents).map_err(write_err)?;
    std::fs::rename(&tmp_path, path).map_err(write_err)
}
