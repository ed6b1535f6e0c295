//! Package, route, and workspace manifests.
//!
//! Manifests are plain `package.json` files. Only the fields the build reads
//! are modelled, everything else is ignored by serde.

use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use serde::Deserialize;

use crate::error::ManifestError;

/// A parsed package manifest. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageManifest {
    /// Declared full name, e.g. `@acme/block-editor`.
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Runtime dependencies, full name to version range. The range is kept
    /// for completeness, the graph ignores it.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub build: BuildFlags,
}

/// Build flags declared under the `"build"` key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildFlags {
    /// Transpile `src/` into CommonJS and ES module trees.
    #[serde(default)]
    pub library: bool,
    #[serde(default)]
    pub browser_global: Option<BrowserGlobal>,
    #[serde(default)]
    pub module_exports: Option<ModuleExports>,
    /// Worker name to source path, relative to the package root.
    #[serde(default)]
    pub workers: BTreeMap<String, String>,
    /// Globs relative to the package root.
    #[serde(default)]
    pub style_entry_points: Vec<String>,
    #[serde(default)]
    pub copy_files: Option<CopyFiles>,
}

/// `"browserGlobal": true` or `"browserGlobal": { "global": "...", "defaultExport": true }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BrowserGlobal {
    Enabled(bool),
    Options {
        #[serde(default)]
        global: Option<String>,
        #[serde(default, rename = "defaultExport")]
        default_export: bool,
    },
}

impl BrowserGlobal {
    pub fn is_enabled(&self) -> bool {
        match self {
            BrowserGlobal::Enabled(enabled) => *enabled,
            BrowserGlobal::Options { .. } => true,
        }
    }

    pub fn global(&self) -> Option<&str> {
        match self {
            BrowserGlobal::Enabled(_) => None,
            BrowserGlobal::Options { global, .. } => global.as_deref(),
        }
    }

    pub fn default_export(&self) -> bool {
        match self {
            BrowserGlobal::Enabled(_) => false,
            BrowserGlobal::Options { default_export, .. } => *default_export,
        }
    }
}

/// `"moduleExports": "./src/index.js"` or a map of export name to path.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModuleExports {
    Single(String),
    Map(BTreeMap<String, String>),
}

impl ModuleExports {
    /// Normalized `(export name, path)` pairs. A single path is exported as
    /// `index`.
    pub fn entries(&self) -> Vec<(String, String)> {
        match self {
            ModuleExports::Single(path) => vec![("index".to_string(), path.clone())],
            ModuleExports::Map(map) => map
                .iter()
                .map(|(name, path)| (export_name(name), path.clone()))
                .collect(),
        }
    }
}

/// `"./interactivity"` -> `interactivity`, `"."` -> `index`.
fn export_name(key: &str) -> String {
    let trimmed = key.trim_start_matches("./").trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        "index".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopyFiles {
    /// Globs relative to the package root.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub transforms: Vec<TextTransform>,
}

/// Literal find/replace applied to copied files with a matching extension.
#[derive(Debug, Clone, Deserialize)]
pub struct TextTransform {
    pub extension: String,
    pub find: String,
    pub replace: String,
}

impl PackageManifest {
    pub fn from_file(path: &Utf8Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|e| ManifestError::Read(path.to_owned(), e))?;
        serde_json::from_str(&text).map_err(|e| ManifestError::Parse(path.to_owned(), e))
    }

    pub fn is_library(&self) -> bool {
        self.build.library
    }

    pub fn browser_global(&self) -> Option<&BrowserGlobal> {
        self.build.browser_global.as_ref().filter(|g| g.is_enabled())
    }

    pub fn has_module_exports(&self) -> bool {
        self.build.module_exports.is_some()
    }

    /// A terminal package bundles itself for direct consumption, so rebuild
    /// propagation stops at it.
    pub fn is_terminal(&self) -> bool {
        self.browser_global().is_some() || self.has_module_exports()
    }

    pub fn has_styles(&self) -> bool {
        !self.build.style_entry_points.is_empty()
    }

    pub fn has_workers(&self) -> bool {
        !self.build.workers.is_empty()
    }
}

/// Workspace-wide settings from the root manifest's `"build"` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSettings {
    #[serde(default = "default_prefix")]
    pub handle_prefix: String,
    #[serde(default = "default_prefix")]
    pub global_namespace: String,
    #[serde(default)]
    pub pages: Vec<String>,
}

fn default_prefix() -> String {
    String::from("ws")
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            handle_prefix: default_prefix(),
            global_namespace: default_prefix(),
            pages: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct RootManifest {
    #[serde(default)]
    build: Option<WorkspaceSettings>,
}

impl WorkspaceSettings {
    /// Reads settings from the root manifest. A missing root manifest or a
    /// missing `"build"` key yields the defaults.
    pub fn load(root: &Utf8Path) -> Result<Self, ManifestError> {
        let path = root.join("package.json");
        if !path.is_file() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).map_err(|e| ManifestError::Read(path.clone(), e))?;
        let root: RootManifest =
            serde_json::from_str(&text).map_err(|e| ManifestError::Parse(path.clone(), e))?;

        Ok(root.build.unwrap_or_default())
    }

    /// Registration handle for a package, e.g. `ws-block-editor`.
    pub fn handle(&self, short: &str) -> String {
        format!("{}-{short}", self.handle_prefix)
    }

    /// Global namespace expression for a package, e.g. `ws.blockEditor`.
    pub fn global_for(&self, short: &str) -> String {
        format!("{}.{}", self.global_namespace, camel_case(short))
    }
}

/// `block-editor` -> `blockEditor`.
pub(crate) fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;

    for c in name.chars() {
        if c == '-' || c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }

    out
}

/// A route manifest, `routes/<name>/package.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteManifest {
    #[serde(default)]
    pub name: Option<String>,
    pub route: RouteSettings,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteSettings {
    pub path: String,
    #[serde(default)]
    pub pages: Vec<String>,
}

impl RouteManifest {
    pub fn from_file(path: &Utf8Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|e| ManifestError::Read(path.to_owned(), e))?;
        serde_json::from_str(&text).map_err(|e| ManifestError::Parse(path.to_owned(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let manifest: PackageManifest = serde_json::from_str(
            r#"{
                "name": "@acme/editor",
                "version": "1.2.0",
                "dependencies": { "@acme/data": "^1.0.0", "react": "^18" },
                "build": {
                    "library": true,
                    "browserGlobal": { "global": "acme.editor", "defaultExport": true },
                    "workers": { "parser": "./src/parser.worker.js" },
                    "styleEntryPoints": ["src/style.scss"]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.name, "@acme/editor");
        assert!(manifest.is_library());
        assert!(manifest.is_terminal());
        assert!(manifest.has_workers());
        assert!(manifest.has_styles());

        let global = manifest.browser_global().unwrap();
        assert_eq!(global.global(), Some("acme.editor"));
        assert!(global.default_export());
    }

    #[test]
    fn test_browser_global_false_is_not_terminal() {
        let manifest: PackageManifest =
            serde_json::from_str(r#"{ "name": "a", "build": { "browserGlobal": false } }"#)
                .unwrap();

        assert!(manifest.browser_global().is_none());
        assert!(!manifest.is_terminal());
    }

    #[test]
    fn test_module_exports_forms() {
        let single = ModuleExports::Single("./src/index.js".into());
        assert_eq!(
            single.entries(),
            vec![("index".to_string(), "./src/index.js".to_string())]
        );

        let map: ModuleExports =
            serde_json::from_str(r#"{ ".": "./src/index.js", "./router": "./src/router.js" }"#)
                .unwrap();
        assert_eq!(
            map.entries(),
            vec![
                ("index".to_string(), "./src/index.js".to_string()),
                ("router".to_string(), "./src/router.js".to_string()),
            ]
        );
    }

    #[test]
    fn test_workspace_handles() {
        let settings = WorkspaceSettings::default();
        assert_eq!(settings.handle("block-editor"), "ws-block-editor");
        assert_eq!(settings.global_for("block-editor"), "ws.blockEditor");
    }
}
