//! Plugin identity as declared by its metadata file.

use crate::capability::{CapabilityRegistry, ResolverCapabilities};
use resolver_core::models::ResolverId;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory inside a plugin holding its metadata and scripts.
pub const CONTENT_DIR: &str = "content";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read plugin metadata at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse plugin metadata at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("plugin metadata at {path} has an empty pluginName")]
    MissingId { path: PathBuf },
}

/// `metadata.json` as shipped with a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub plugin_name: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub static_capabilities: Vec<String>,
    pub manifest: ManifestFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFiles {
    /// Main script, relative to the content directory.
    pub main: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub icon_white: Option<String>,
    #[serde(default)]
    pub icon_background: Option<String>,
}

/// Immutable identity of one resolver plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverIdentity {
    pub id: ResolverId,
    pub manifest: PluginManifest,
    /// Root directory of the installed plugin.
    pub base_dir: PathBuf,
}

impl ResolverIdentity {
    pub fn new(manifest: PluginManifest, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: ResolverId::new(manifest.plugin_name.clone()),
            manifest,
            base_dir: base_dir.into(),
        }
    }

    /// Read `<plugin_dir>/content/metadata.json`.
    pub fn load(plugin_dir: &Path) -> Result<Self, ManifestError> {
        let path = plugin_dir.join(CONTENT_DIR).join(METADATA_FILE);
        let contents = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        let manifest: PluginManifest =
            serde_json::from_str(&contents).map_err(|source| ManifestError::Parse {
                path: path.clone(),
                source,
            })?;
        if manifest.plugin_name.trim().is_empty() {
            return Err(ManifestError::MissingId { path });
        }
        Ok(Self::new(manifest, plugin_dir))
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn description(&self) -> &str {
        &self.manifest.description
    }

    pub fn static_capabilities(&self) -> ResolverCapabilities {
        CapabilityRegistry::from_names(self.manifest.static_capabilities.iter().map(String::as_str))
    }

    pub fn content_dir(&self) -> PathBuf {
        self.base_dir.join(CONTENT_DIR)
    }

    /// Manifest icon, resolved inside the content directory.
    pub fn icon_path(&self) -> Option<PathBuf> {
        self.manifest
            .manifest
            .icon
            .as_ref()
            .map(|icon| self.content_dir().join(icon))
    }

    /// Resolve an icon file named by the plugin's collection metadata.
    ///
    /// The icon is relative to the directory of the main script.
    pub fn collection_icon_path(&self, iconfile: &str) -> PathBuf {
        let script_dir = parent_dir(&self.manifest.manifest.main);
        self.content_dir()
            .join(normalize_relative(script_dir, iconfile))
    }
}

/// Everything before the last `/`, or empty when there is none.
fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|idx| &path[..idx]).unwrap_or("")
}

/// Apply `relative` to `base`: every `../` segment strips one trailing
/// component of `base`, then the remainder is appended.
pub fn normalize_relative(base: &str, relative: &str) -> String {
    let ups = relative.matches("../").count();
    let remainder = relative.replace("../", "");

    let mut components: Vec<&str> = base.split('/').filter(|c| !c.is_empty()).collect();
    let keep = components.len().saturating_sub(ups);
    components.truncate(keep);

    let remainder = remainder.trim_start_matches('/');
    if !remainder.is_empty() {
        components.push(remainder);
    }
    components.join("/")
}
