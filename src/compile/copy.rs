use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;

use super::{Step, StepContext, StepPhase};
use crate::artifact::{ArtifactEntry, ArtifactKind, BuildArtifact};
use crate::error::CompileError;
use crate::manifest::{CopyFiles, TextTransform};

/// Copies files verbatim, optionally with literal text replacements.
#[derive(Debug, Clone)]
pub struct CopyStep {
    files: Vec<String>,
    transforms: Vec<TextTransform>,
}

impl CopyStep {
    pub fn new(copy: &CopyFiles) -> Self {
        Self {
            files: copy.files.clone(),
            transforms: copy.transforms.clone(),
        }
    }

    fn transform(&self, path: &Utf8Path, bytes: Vec<u8>) -> Vec<u8> {
        let rules: Vec<&TextTransform> = self
            .transforms
            .iter()
            .filter(|rule| path.extension() == Some(rule.extension.trim_start_matches('.')))
            .collect();

        if rules.is_empty() {
            return bytes;
        }

        match String::from_utf8(bytes) {
            Ok(text) => rules
                .iter()
                .fold(text, |text, rule| text.replace(&rule.find, &rule.replace))
                .into_bytes(),
            Err(e) => e.into_bytes(),
        }
    }
}

impl Step for CopyStep {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn phase(&self) -> StepPhase {
        StepPhase::Transpile
    }

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        let out = cx
            .config
            .output_root()
            .join("files")
            .join(cx.package.short.as_ref());

        let mut paths = Vec::new();
        for pattern in &self.files {
            for path in glob(cx.package.dir.join(pattern).as_str())? {
                let path = Utf8PathBuf::try_from(path?)?;
                if path.is_file() {
                    paths.push(path);
                }
            }
        }
        paths.sort();
        paths.dedup();

        let handle = cx.handle();
        for path in paths {
            let relative = path.strip_prefix(&cx.package.dir).unwrap_or(&path);
            let target = out.join(relative);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            let bytes = self.transform(&path, fs::read(&path)?);
            fs::write(&target, bytes)?;

            artifact.push(ArtifactEntry::new(
                ArtifactKind::Copied,
                format!("{handle}:{relative}"),
                cx.relative(&target),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::artifact::ArtifactKind;
    use crate::backend::testing::Recorder;
    use crate::compile::PackageCompiler;
    use crate::compile::fixture::Workspace;

    #[test]
    fn test_copy_with_transforms() {
        let ws = Workspace::new();
        ws.write(
            "packages/blocks/package.json",
            r#"{
                "name": "@acme/blocks",
                "build": {
                    "copyFiles": {
                        "files": ["src/**/block.json", "src/**/*.php"],
                        "transforms": [{ "extension": ".php", "find": "acme_", "replace": "ws_" }]
                    }
                }
            }"#,
        );
        ws.write("packages/blocks/src/quote/block.json", r#"{ "name": "acme_quote" }"#);
        ws.write("packages/blocks/src/quote/index.php", "<?php acme_render();");

        let (config, settings, catalog, graph) = ws.load();
        let backend = Recorder::default();
        let compiler = PackageCompiler::new(&config, &settings, &catalog, &graph, &backend);

        let artifact = compiler.compile("@acme/blocks").unwrap();
        assert_eq!(artifact.count(ArtifactKind::Copied), 2);

        assert_eq!(
            ws.read("build/files/blocks/src/quote/index.php"),
            "<?php ws_render();"
        );
        assert_eq!(
            ws.read("build/files/blocks/src/quote/block.json"),
            r#"{ "name": "acme_quote" }"#
        );
    }
}
