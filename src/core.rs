use std::fmt::Display;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

/// Atomic reference-counted string type used for package names.
pub(crate) type ArcStr = std::sync::Arc<str>;

const ANSI_BLUE: Style = Style::new().blue();

/// Formats the time elapsed since `s` as a dimmed `(+Nms)` suffix.
pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// A 32-byte BLAKE3 hash.
///
/// Used for asset versions and scoped class names. It never decides whether
/// something gets rebuilt, rebuilds are driven by change notifications only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for byte in self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    /// Short hex prefix, good enough for versions and class name suffixes.
    pub(crate) fn short(self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// How a parallel batch reacts to a failing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The first failure fails the batch. Targets already running still
    /// finish, nothing new is started.
    #[default]
    FailFast,
    /// Every target runs, all failures are reported together.
    CollectAll,
}

impl FailurePolicy {
    pub fn from_env() -> Self {
        if env_flag("MONOBUILD_COLLECT_ERRORS") {
            Self::CollectAll
        } else {
            Self::FailFast
        }
    }
}

/// Compile-time constants baked into every compiled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    pub plugin: bool,
    pub core: bool,
}

impl FeatureFlags {
    pub fn from_env() -> Self {
        Self {
            plugin: env_flag("MONOBUILD_PLUGIN"),
            core: env_flag("MONOBUILD_CORE"),
        }
    }

    /// The flags as backend defines.
    pub(crate) fn defines(&self) -> Vec<(String, String)> {
        vec![
            ("globalThis.IS_PLUGIN_BUILD".into(), self.plugin.to_string()),
            ("globalThis.IS_CORE_BUILD".into(), self.core.to_string()),
        ]
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false)
}

/// Everything the orchestrator needs to know about the workspace on disk and
/// the run it is performing.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Workspace root, holding the root `package.json`.
    pub root: Utf8PathBuf,
    /// Directory with one sub-directory per package, relative to `root`.
    pub packages_dir: Utf8PathBuf,
    /// Directory with one sub-directory per route, relative to `root`.
    pub routes_dir: Utf8PathBuf,
    /// Shared output directory, relative to `root`.
    pub output_dir: Utf8PathBuf,
    /// Expression used as the base URL when rendering registration data.
    pub base_url: String,
    pub flags: FeatureFlags,
    pub policy: FailurePolicy,
}

impl BuildConfig {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            packages_dir: "packages".into(),
            routes_dir: "routes".into(),
            output_dir: "build".into(),
            base_url: String::from("/"),
            flags: FeatureFlags::default(),
            policy: FailurePolicy::default(),
        }
    }

    /// Reads feature flags and the failure policy from the environment.
    pub fn with_env(mut self) -> Self {
        self.flags = FeatureFlags::from_env();
        self.policy = FailurePolicy::from_env();
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn flags(mut self, flags: FeatureFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn packages_root(&self) -> Utf8PathBuf {
        self.root.join(&self.packages_dir)
    }

    pub fn routes_root(&self) -> Utf8PathBuf {
        self.root.join(&self.routes_dir)
    }

    pub fn output_root(&self) -> Utf8PathBuf {
        self.root.join(&self.output_dir)
    }

    /// Path of `path` relative to the workspace root, used in registries.
    pub(crate) fn relative<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_short_prefix() {
        let hash = Hash32::hash(b"monobuild");
        assert_eq!(hash.short(8).len(), 8);
        assert!(hash.to_hex().starts_with(&hash.short(8)));
        assert_eq!(hash, Hash32::hash(b"monobuild"));
    }

    #[test]
    fn test_flags_as_defines() {
        let flags = FeatureFlags {
            plugin: true,
            core: false,
        };

        assert_eq!(
            flags.defines(),
            vec![
                ("globalThis.IS_PLUGIN_BUILD".to_string(), "true".to_string()),
                ("globalThis.IS_CORE_BUILD".to_string(), "false".to_string()),
            ]
        );
    }

    #[test]
    fn test_config_paths() {
        let config = BuildConfig::new("/ws");
        assert_eq!(config.packages_root(), Utf8Path::new("/ws/packages"));
        assert_eq!(config.routes_root(), Utf8Path::new("/ws/routes"));
        assert_eq!(
            config.relative(Utf8Path::new("/ws/build/scripts/a/index.js")),
            Utf8Path::new("build/scripts/a/index.js")
        );
    }
}
