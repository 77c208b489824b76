//! Helpers for reading the workspace manifests in consistency tests

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use toml::Value;

/// Root of the workspace (the parent of this crate)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".."))
}

/// Parse a manifest file into a TOML table
pub fn read_manifest(path: &Path) -> Result<toml::Table, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    parse_manifest(&raw).map_err(|e| format!("Failed to parse {:?}: {}", path, e))
}

pub fn parse_manifest(raw: &str) -> Result<toml::Table, toml::de::Error> {
    raw.parse::<toml::Table>()
}

/// Member directories listed under `[workspace] members`
pub fn workspace_members(root_manifest: &toml::Table) -> Vec<String> {
    root_manifest
        .get("workspace")
        .and_then(|workspace| workspace.get("members"))
        .and_then(Value::as_array)
        .map(|members| {
            members
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Names declared under `[workspace.dependencies]`
pub fn shared_dependencies(root_manifest: &toml::Table) -> Vec<String> {
    root_manifest
        .get("workspace")
        .and_then(|workspace| workspace.get("dependencies"))
        .and_then(Value::as_table)
        .map(|deps| deps.keys().cloned().collect())
        .unwrap_or_default()
}

/// Every dependency of a member manifest mapped to whether it inherits from the workspace.
/// Covers `[dependencies]`, `[dev-dependencies]` and `[build-dependencies]`.
pub fn member_dependencies(manifest: &toml::Table) -> BTreeMap<String, bool> {
    let mut dependencies = BTreeMap::new();
    for section in ["dependencies", "dev-dependencies", "build-dependencies"] {
        if let Some(table) = manifest.get(section).and_then(Value::as_table) {
            for (name, spec) in table {
                let inherits = spec
                    .get("workspace")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let entry = dependencies.entry(name.clone()).or_insert(true);
                *entry = *entry && inherits;
            }
        }
    }
    dependencies
}

/// Whether a package field such as `version` is inherited with `field.workspace = true`
pub fn inherits_package_field(manifest: &toml::Table, field: &str) -> bool {
    manifest
        .get("package")
        .and_then(|package| package.get(field))
        .and_then(|value| value.get("workspace"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
