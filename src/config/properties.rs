// # Property Loading
//
// Reads `ojp.properties` plus an optional `ojp-<env>.properties` overlay,
// where the environment comes from the `ojp.environment` property or the
// `OJP_ENVIRONMENT` variable. A process-wide property store backs `${key}`
// placeholder substitution in connection URLs.

use crate::error::{OjpError, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;

/// Ordered key/value property set. Ordering keeps the set hashable and makes
/// connection-hash input deterministic.
pub type Properties = BTreeMap<String, String>;

/// Property naming the active environment.
pub const ENVIRONMENT_PROPERTY: &str = "ojp.environment";
/// Environment variable naming the active environment.
pub const ENVIRONMENT_VARIABLE: &str = "OJP_ENVIRONMENT";

/// Base property file name.
pub const BASE_FILE: &str = "ojp.properties";

static PROCESS_PROPERTIES: Lazy<RwLock<Properties>> = Lazy::new(|| RwLock::new(Properties::new()));

/// Process-wide properties used for placeholder resolution.
pub fn process_properties() -> &'static RwLock<Properties> {
    &PROCESS_PROPERTIES
}

/// Replace the process-wide property set (startup and tests).
pub fn install_process_properties(props: Properties) {
    *PROCESS_PROPERTIES.write() = props;
}

/// Look up one process-wide property.
pub fn process_property(key: &str) -> Option<String> {
    PROCESS_PROPERTIES.read().get(key).cloned()
}

/// Parse `key=value` lines. Lines starting with `#` or `!` are comments.
/// Keys and values are trimmed; later occurrences win.
pub fn parse_properties(text: &str) -> Properties {
    let mut props = Properties::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    props
}

/// Resolve the active environment name.
///
/// The `ojp.environment` property wins over `OJP_ENVIRONMENT`; both are
/// trimmed and an empty result means the default (base) environment.
pub fn resolve_environment(base: &Properties) -> Option<String> {
    let from_props = base.get(ENVIRONMENT_PROPERTY).cloned();
    let raw = from_props.or_else(|| std::env::var(ENVIRONMENT_VARIABLE).ok())?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Load properties from `dir`: the base file overlaid with the environment
/// file when one applies. A missing environment file falls back to the base
/// set; a missing base file yields an empty set.
pub fn load_properties(dir: &Path) -> Result<Properties> {
    let base_path = dir.join(BASE_FILE);
    let mut props = if base_path.exists() {
        parse_properties(&std::fs::read_to_string(&base_path)?)
    } else {
        Properties::new()
    };

    if let Some(env) = resolve_environment(&props) {
        let env_path = dir.join(format!("ojp-{}.properties", env));
        if env_path.exists() {
            let overlay = parse_properties(&std::fs::read_to_string(&env_path)?);
            tracing::info!(environment = %env, "applying environment property overlay");
            props.extend(overlay);
        } else {
            tracing::warn!(environment = %env, "environment property file not found, using defaults");
        }
    }

    Ok(props)
}

/// Substitute `${key}` placeholders from the process property set.
///
/// An unresolved placeholder is a hard failure that names the missing key.
pub fn substitute_placeholders(input: &str) -> Result<String> {
    substitute_with(input, &PROCESS_PROPERTIES.read())
}

/// Placeholder substitution against an explicit property set.
pub fn substitute_with(input: &str, props: &Properties) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            OjpError::Config(format!("unterminated placeholder in '{}'", input))
        })?;
        let key = &after[..end];
        let value = props.get(key).ok_or_else(|| {
            OjpError::Config(format!("unresolved placeholder '{}': property not set", key))
        })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
