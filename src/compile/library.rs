use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use super::{Step, StepContext, StepPhase, is_excluded_source};
use crate::artifact::{ArtifactEntry, ArtifactKind, BuildArtifact};
use crate::backend::Format;
use crate::error::CompileError;

const SOURCE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// Transpiles every source file under `src/` one to one, into `build/` as
/// CommonJS and into `build-module/` as ES modules.
#[derive(Debug, Clone, Copy)]
pub struct LibraryStep;

impl LibraryStep {
    fn sources(src: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CompileError> {
        let mut paths = Vec::new();

        for path in glob(src.join("**/*").as_str())? {
            let path = Utf8PathBuf::try_from(path?)?;

            let is_source = path
                .extension()
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));

            let excluded = path
                .strip_prefix(src)
                .is_ok_and(|relative| is_excluded_source(relative));

            if !path.is_file() || !is_source || excluded || path.as_str().ends_with(".d.ts") {
                continue;
            }

            paths.push(path);
        }

        paths.sort();
        Ok(paths)
    }
}

impl Step for LibraryStep {
    fn name(&self) -> &'static str {
        "library"
    }

    fn phase(&self) -> StepPhase {
        StepPhase::Transpile
    }

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        let src = cx.package.src_dir();
        let cjs = cx.package.dir.join("build");
        let esm = cx.package.dir.join("build-module");

        Self::sources(&src)?
            .into_par_iter()
            .map(|path| {
                let relative = path.strip_prefix(&src).unwrap_or(&path).with_extension("js");

                cx.compile(&cx.request(&path, cjs.join(&relative), Format::Cjs))?;
                cx.compile(&cx.request(&path, esm.join(&relative), Format::Esm))
            })
            .collect::<Result<Vec<_>, _>>()?;

        artifact.push(ArtifactEntry::new(
            ArtifactKind::Library,
            cx.package.full.to_string(),
            cx.relative(&esm),
        ));

        Ok(())
    }
}
