//! The compilation backend: one entry point in, one output file out.
//!
//! The orchestrator never transforms source itself, it describes what it
//! wants in a [`CompileRequest`] and hands it to a [`Backend`].

use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Output module format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Esm,
    Cjs,
    Iife,
}

impl Format {
    fn as_flag(self) -> &'static str {
        match self {
            Format::Esm => "esm",
            Format::Cjs => "cjs",
            Format::Iife => "iife",
        }
    }
}

/// A single "compile this entry to that file" job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub entry: Utf8PathBuf,
    pub outfile: Utf8PathBuf,
    pub format: Format,
    /// Inline imports into one file instead of transpiling the entry alone.
    pub bundle: bool,
    pub minify: bool,
    /// Global the IIFE result is assigned to.
    pub global_name: Option<String>,
    /// Code appended after the bundle.
    pub footer: Option<String>,
    /// Module specifiers left as imports.
    pub externals: Vec<String>,
    /// Compile-time constants.
    pub defines: Vec<(String, String)>,
}

impl CompileRequest {
    pub fn new(entry: impl Into<Utf8PathBuf>, outfile: impl Into<Utf8PathBuf>, format: Format) -> Self {
        Self {
            entry: entry.into(),
            outfile: outfile.into(),
            format,
            bundle: false,
            minify: false,
            global_name: None,
            footer: None,
            externals: Vec::new(),
            defines: Vec::new(),
        }
    }

    pub fn bundle(mut self) -> Self {
        self.bundle = true;
        self
    }

    pub fn minify(mut self, minify: bool) -> Self {
        self.minify = minify;
        self
    }

    pub fn global_name(mut self, name: impl Into<String>) -> Self {
        self.global_name = Some(name.into());
        self
    }

    pub fn footer(mut self, footer: Option<String>) -> Self {
        self.footer = footer;
        self
    }

    pub fn externals(mut self, externals: impl IntoIterator<Item = String>) -> Self {
        self.externals.extend(externals);
        self
    }

    pub fn defines(mut self, defines: Vec<(String, String)>) -> Self {
        self.defines = defines;
        self
    }

    /// The same request for the minified twin, `index.js` -> `index.min.js`.
    pub fn minified(&self) -> Self {
        let mut request = self.clone().minify(true);
        request.outfile = min_path(&self.outfile);
        request
    }
}

/// `dir/index.js` -> `dir/index.min.js`.
pub fn min_path(path: &Utf8Path) -> Utf8PathBuf {
    let stem = path.file_stem().unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.min.{ext}"),
        None => format!("{stem}.min"),
    };
    path.with_file_name(name)
}

/// Anything that can turn a [`CompileRequest`] into a file on disk.
pub trait Backend: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> anyhow::Result<()>;
}

/// Errors that can occur when invoking esbuild.
#[derive(Debug, Error)]
pub enum EsbuildError {
    /// Spawning the process failed, usually because esbuild is not on PATH.
    #[error("Couldn't run esbuild: {0}")]
    Io(#[from] std::io::Error),

    /// The esbuild process returned a non-zero exit code.
    #[error("Esbuild execution failed:\n{0}")]
    Failed(String),
}

/// Invokes the `esbuild` binary.
///
/// **Note:** requires `esbuild` to be available in the system PATH, or an
/// explicit binary passed to [`EsbuildBackend::with_binary`].
#[derive(Debug, Clone)]
pub struct EsbuildBackend {
    binary: Utf8PathBuf,
}

impl EsbuildBackend {
    pub fn new() -> Self {
        Self {
            binary: "esbuild".into(),
        }
    }

    pub fn with_binary(binary: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(request: &CompileRequest) -> Vec<String> {
        let mut args = vec![
            request.entry.to_string(),
            format!("--format={}", request.format.as_flag()),
            format!("--outfile={}", request.outfile),
            "--log-level=warning".to_string(),
        ];

        if request.bundle {
            args.push("--bundle".into());
        }
        if request.minify {
            args.push("--minify".into());
        }
        if let Some(name) = &request.global_name {
            args.push(format!("--global-name={name}"));
        }
        if let Some(footer) = &request.footer {
            args.push(format!("--footer:js={footer}"));
        }
        for external in &request.externals {
            args.push(format!("--external:{external}"));
        }
        for (key, value) in &request.defines {
            args.push(format!("--define:{key}={value}"));
        }

        args
    }
}

impl Default for EsbuildBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for EsbuildBackend {
    fn compile(&self, request: &CompileRequest) -> anyhow::Result<()> {
        let output = Command::new(self.binary.as_str())
            .args(Self::args(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(EsbuildError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EsbuildError::Failed(stderr.into_owned()).into());
        }

        Ok(())
    }
}
