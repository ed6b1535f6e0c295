use super::{Step, StepContext, StepPhase};
use crate::artifact::{ArtifactEntry, ArtifactKind, AssetMeta, BuildArtifact, asset_path};
use crate::backend::Format;
use crate::error::CompileError;
use crate::manifest::{BrowserGlobal, ModuleExports};

/// Bundles `src/index.*` into an IIFE assigned to a browser global.
#[derive(Debug, Clone)]
pub struct BrowserBundleStep {
    /// Overrides the workspace default namespace.
    global: Option<String>,
    default_export: bool,
}

impl BrowserBundleStep {
    pub fn new(global: &BrowserGlobal) -> Self {
        Self {
            global: global.global().map(str::to_string),
            default_export: global.default_export(),
        }
    }
}

impl Step for BrowserBundleStep {
    fn name(&self) -> &'static str {
        "browser-global"
    }

    fn phase(&self) -> StepPhase {
        StepPhase::Bundle
    }

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        let entry = cx.find_entry(self.name(), "index")?;
        let global = self
            .global
            .clone()
            .unwrap_or_else(|| cx.settings.global_for(&cx.package.short));

        let footer = self
            .default_export
            .then(|| format!("{global} = {global}.default;"));

        let outfile = cx
            .config
            .output_root()
            .join("scripts")
            .join(cx.package.short.as_ref())
            .join("index.js");

        let request = cx
            .request(&entry, &outfile, Format::Iife)
            .bundle()
            .global_name(&global)
            .footer(footer)
            .externals(cx.externals());

        cx.compile_pair(&request)?;

        let asset = asset_path(&outfile);
        let dependencies = cx.script_dependency_handles();
        AssetMeta::write(&outfile, &asset, dependencies.clone())
            .map_err(|e| CompileError::Asset(outfile.clone(), e))?;

        artifact.push(
            ArtifactEntry::new(ArtifactKind::Script, cx.handle(), cx.relative(&outfile))
                .asset(cx.relative(&asset))
                .dependencies(dependencies),
        );

        Ok(())
    }
}

/// Bundles each script-module export into its own ES module.
#[derive(Debug, Clone)]
pub struct ModuleExportsStep {
    exports: Vec<(String, String)>,
}

impl ModuleExportsStep {
    pub fn new(exports: &ModuleExports) -> Self {
        Self {
            exports: exports.entries(),
        }
    }
}

impl Step for ModuleExportsStep {
    fn name(&self) -> &'static str {
        "module-exports"
    }

    fn phase(&self) -> StepPhase {
        StepPhase::Bundle
    }

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        let out = cx
            .config
            .output_root()
            .join("modules")
            .join(cx.package.short.as_ref());

        let dependencies = cx.module_dependency_ids();

        for (export, source) in &self.exports {
            let entry = cx.package.dir.join(source);
            if !entry.is_file() {
                return Err(CompileError::MissingEntry(self.name(), entry));
            }

            let outfile = out.join(format!("{export}.js"));
            let request = cx
                .request(&entry, &outfile, Format::Esm)
                .bundle()
                .externals(cx.externals());

            cx.compile_pair(&request)?;

            let asset = asset_path(&outfile);
            AssetMeta::write(&outfile, &asset, dependencies.clone())
                .map_err(|e| CompileError::Asset(outfile.clone(), e))?;

            let id = match export.as_str() {
                "index" => cx.package.full.to_string(),
                export => format!("{}/{export}", cx.package.full),
            };

            artifact.push(
                ArtifactEntry::new(ArtifactKind::Module, id, cx.relative(&outfile))
                    .asset(cx.relative(&asset))
                    .dependencies(dependencies.clone()),
            );
        }

        Ok(())
    }
}
