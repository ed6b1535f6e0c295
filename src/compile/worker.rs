use std::fs;

use camino::Utf8PathBuf;

use super::{Step, StepContext, StepPhase};
use crate::artifact::{ArtifactEntry, ArtifactKind, BuildArtifact};
use crate::backend::{Format, min_path};
use crate::error::CompileError;

/// Bundles a worker entry point for direct loading, then embeds the bundle
/// as source text into a companion module so the worker can also be started
/// from a blob.
#[derive(Debug, Clone)]
pub struct WorkerStep {
    name: String,
    /// Relative to the package root.
    source: String,
}

/// A bundled worker whose inline companion module is not written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWorkerSource {
    pub name: String,
    /// The direct-load bundle.
    pub output: Utf8PathBuf,
    /// Minified bundle text to embed.
    pub source: String,
}

impl WorkerStep {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
        }
    }

    /// First pass: the self-contained bundle.
    pub fn bundle(&self, cx: &StepContext) -> Result<PendingWorkerSource, CompileError> {
        let entry = cx.package.dir.join(&self.source);
        if !entry.is_file() {
            return Err(CompileError::MissingEntry(self.name(), entry));
        }

        let output = cx
            .config
            .output_root()
            .join("workers")
            .join(cx.package.short.as_ref())
            .join(format!("{}.js", self.name));

        let request = cx.request(&entry, &output, Format::Iife).bundle();
        cx.compile_pair(&request)?;

        let source = fs::read_to_string(min_path(&output))?;

        Ok(PendingWorkerSource {
            name: self.name.clone(),
            output,
            source,
        })
    }
}

impl PendingWorkerSource {
    /// Second pass: writes `<name>.inline.js` into both library trees.
    pub fn emit(self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        let text = serde_json::to_string(&self.source)
            .map_err(|e| CompileError::Backend(self.output.clone(), e.into()))?;
        let file = format!("{}.inline.js", self.name);

        let esm = cx.package.dir.join("build-module");
        fs::create_dir_all(&esm)?;
        fs::write(esm.join(&file), format!("export default {text};\n"))?;

        let cjs = cx.package.dir.join("build");
        fs::create_dir_all(&cjs)?;
        fs::write(cjs.join(&file), format!("module.exports = {text};\n"))?;

        artifact.push(ArtifactEntry::new(
            ArtifactKind::Worker,
            format!("{}-{}-worker", cx.handle(), self.name),
            cx.relative(&self.output),
        ));

        Ok(())
    }
}

impl Step for WorkerStep {
    fn name(&self) -> &'static str {
        "worker"
    }

    fn phase(&self) -> StepPhase {
        StepPhase::Transpile
    }

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        self.bundle(cx)?.emit(cx, artifact)
    }
}
