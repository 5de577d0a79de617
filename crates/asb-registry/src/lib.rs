// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-registry
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Service policy lookup for Agent Switchboard.
//!
//! Policies live under `{hub}/registry/` as one file per service, either
//! YAML (`billing.yaml`) or a structured-header markdown file
//! (`billing.md`). The registry is a read-through snapshot: the scheduler
//! rebuilds it at the start of every tick, which is all the hot-reload
//! this system needs.

use asb_core::{Maintainer, ServicePolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

/// Errors from loading a single policy file.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Underlying filesystem failure.
    #[error("registry i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A policy file could not be parsed.
    #[error("failed to parse policy {path}: {reason}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Human-readable parse failure.
        reason: String,
    },
}

/// YAML shape of a policy file.
#[derive(Debug, Deserialize)]
struct RawPolicy {
    maintainer: String,
    #[serde(default)]
    a2a_url: Option<String>,
    #[serde(default)]
    directory: Option<PathBuf>,
}

/// An immutable snapshot of every service policy.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    policies: BTreeMap<String, ServicePolicy>,
}

impl Registry {
    /// Load a snapshot from `{root}/registry/`.
    ///
    /// Malformed policy files are logged and skipped; a missing registry
    /// directory yields an empty snapshot.
    #[must_use]
    pub fn load(root: &Path) -> Self {
        let dir = root.join("registry");
        let mut policies = BTreeMap::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Self::default(),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect();
        paths.sort();

        for path in paths {
            let Some(service) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let parsed = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml") | Some("yml") => load_yaml(&path),
                Some("md") => load_markdown(&path),
                _ => continue,
            };
            match parsed {
                Ok(policy) => {
                    policies.insert(service.to_string(), policy);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping malformed policy"),
            }
        }

        Self { policies }
    }

    /// Policy for one service, or `None` when the service is unknown.
    #[must_use]
    pub fn policy_for(&self, service: &str) -> Option<&ServicePolicy> {
        self.policies.get(service)
    }

    /// Every known service name, sorted.
    #[must_use]
    pub fn service_names(&self) -> Vec<String> {
        self.policies.keys().cloned().collect()
    }

    /// Number of known services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` when no policies are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

fn load_yaml(path: &Path) -> Result<ServicePolicy, RegistryError> {
    let text = std::fs::read_to_string(path)?;
    let raw: RawPolicy = serde_yaml::from_str(&text).map_err(|e| RegistryError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    into_policy(raw, path)
}

fn load_markdown(path: &Path) -> Result<ServicePolicy, RegistryError> {
    let text = std::fs::read_to_string(path)?;
    let doc = asb_store::header::parse(&text);
    let maintainer = doc.get("maintainer").ok_or_else(|| RegistryError::Parse {
        path: path.to_path_buf(),
        reason: "missing maintainer field".into(),
    })?;
    into_policy(
        RawPolicy {
            maintainer: maintainer.to_string(),
            a2a_url: doc.get("a2a_url").map(str::to_string),
            directory: doc.get("directory").map(PathBuf::from),
        },
        path,
    )
}

fn into_policy(raw: RawPolicy, path: &Path) -> Result<ServicePolicy, RegistryError> {
    let maintainer = Maintainer::from_str(&raw.maintainer).map_err(|e| RegistryError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(ServicePolicy {
        maintainer,
        a2a_url: raw.a2a_url,
        directory: raw.directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let reg = dir.path().join("registry");
        std::fs::create_dir_all(&reg).unwrap();
        let root = dir.path().to_path_buf();
        (dir, root)
    }

    #[test]
    fn loads_yaml_policies() {
        let (_dir, root) = registry_dir();
        std::fs::write(
            root.join("registry/billing.yaml"),
            "maintainer: ai\ndirectory: services/billing\n",
        )
        .unwrap();

        let registry = Registry::load(&root);
        let policy = registry.policy_for("billing").unwrap();
        assert_eq!(policy.maintainer, Maintainer::Ai);
        assert_eq!(policy.directory.as_deref(), Some(Path::new("services/billing")));
        assert!(policy.a2a_url.is_none());
    }

    #[test]
    fn loads_markdown_policies() {
        let (_dir, root) = registry_dir();
        std::fs::write(
            root.join("registry/shipping.md"),
            "# shipping\n\nmaintainer: hybrid\na2a_url: https://agents.example/shipping\n",
        )
        .unwrap();

        let registry = Registry::load(&root);
        let policy = registry.policy_for("shipping").unwrap();
        assert_eq!(policy.maintainer, Maintainer::Hybrid);
        assert_eq!(
            policy.a2a_url.as_deref(),
            Some("https://agents.example/shipping")
        );
    }

    #[test]
    fn unknown_service_is_none() {
        let (_dir, root) = registry_dir();
        let registry = Registry::load(&root);
        assert!(registry.policy_for("nope").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn malformed_policy_is_skipped() {
        let (_dir, root) = registry_dir();
        std::fs::write(root.join("registry/bad.yaml"), "maintainer: [nonsense\n").unwrap();
        std::fs::write(root.join("registry/good.yaml"), "maintainer: ai\n").unwrap();

        let registry = Registry::load(&root);
        assert_eq!(registry.service_names(), vec!["good".to_string()]);
    }

    #[test]
    fn missing_registry_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path());
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_maintainer_is_skipped() {
        let (_dir, root) = registry_dir();
        std::fs::write(root.join("registry/odd.yaml"), "maintainer: robot\n").unwrap();
        let registry = Registry::load(&root);
        assert!(registry.policy_for("odd").is_none());
    }
}
