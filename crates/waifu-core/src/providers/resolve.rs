//! Credential and model-name resolution
//!
//! Both providers resolve their credential and model the same way:
//! environment variable first, then a single-line file in the operator's
//! home directory, then (for models) a hard-coded default. A missing file
//! is a fallback signal, not an error.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Read a trimmed single-line value from `path`
///
/// Returns `None` for a missing file, an unreadable file, or a file that
/// trims to nothing.
pub fn read_single_line(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        debug!(path = %path.display(), "loaded value from file");
        Some(trimmed.to_string())
    }
}

/// A dot-file in the operator's home directory
pub fn home_file(name: &str) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(name))
}

/// First non-blank environment variable among `names`
pub fn env_value(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Resolve a credential: env vars, then a home-directory file
pub fn resolve_credential(env_names: &[&str], file_name: &str) -> Option<String> {
    env_value(env_names).or_else(|| home_file(file_name).and_then(|p| read_single_line(&p)))
}

/// Resolve a model name: explicit override, then file, then default
pub fn resolve_model(override_model: Option<&str>, file_name: &str, default: &str) -> String {
    if let Some(model) = override_model {
        let trimmed = model.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    home_file(file_name)
        .and_then(|p| read_single_line(&p))
        .unwrap_or_else(|| default.to_string())
}

/// Truncate a response body for diagnostics, respecting char boundaries
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}
