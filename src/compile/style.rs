use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use glob::glob;

use super::{Step, StepContext, StepPhase};
use crate::artifact::{ArtifactEntry, ArtifactKind, BuildArtifact};
use crate::core::BuildConfig;
use crate::error::CompileError;
use crate::manifest::WorkspaceSettings;
use crate::registry::{Catalog, Package};
use crate::styles;

/// Stem of the style sheet a package is known by.
const MAIN_STYLE: &str = "style";

/// Compiles style entry points into LTR and RTL sheets.
#[derive(Debug, Clone)]
pub struct StyleStep {
    entry_points: Vec<String>,
}

impl StyleStep {
    pub fn new(entry_points: Vec<String>) -> Self {
        Self { entry_points }
    }

    fn entries(&self, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CompileError> {
        let mut paths = Vec::new();

        for pattern in &self.entry_points {
            for path in glob(dir.join(pattern).as_str())? {
                let path = Utf8PathBuf::try_from(path?)?;

                // Sass partials are only ever imported.
                if path.file_name().is_some_and(|name| name.starts_with('_')) {
                    continue;
                }

                paths.push(path);
            }
        }

        paths.sort();
        paths.dedup();
        Ok(paths)
    }
}

/// Where a package's compiled sheets go.
fn style_dir(config: &BuildConfig, short: &str) -> Utf8PathBuf {
    config.output_root().join("styles").join(short)
}

/// `button.module.scss` -> `button.module`.
fn sheet_stem(path: &Utf8Path) -> &str {
    path.file_stem().unwrap_or_default()
}

impl Step for StyleStep {
    fn name(&self) -> &'static str {
        "style"
    }

    fn phase(&self) -> StepPhase {
        StepPhase::Transpile
    }

    fn run(&self, cx: &StepContext, artifact: &mut BuildArtifact) -> Result<(), CompileError> {
        let out = style_dir(cx.config, &cx.package.short);
        fs::create_dir_all(&out)?;

        let handle = cx.handle();
        // Every in-workspace dependency is a script dependency, including
        // style-only ones without a browser global. Manifest order and
        // `dependency_handles` order are both by full name.
        let dependencies = infer_style_dependencies(
            &cx.dependency_handles(),
            cx.package,
            cx.catalog,
            cx.settings,
            cx.config,
        );

        for path in self.entries(&cx.package.dir)? {
            let css = styles::compile_source(&path, &cx.package.dir)
                .map_err(|e| CompileError::Style(path.clone(), e))?;

            let stem = sheet_stem(&path);
            let scope = styles::is_module_style(&path)
                .then(|| format!("{}/{}", cx.package.full, cx.relative(&path)));

            let output = styles::process(&css, scope.as_deref());

            let ltr = out.join(format!("{stem}.css"));
            fs::write(&ltr, &output.ltr)?;
            fs::write(out.join(format!("{stem}-rtl.css")), &output.rtl)?;

            let id = match stem {
                MAIN_STYLE => handle.clone(),
                stem => format!("{handle}-{}", stem.replace('.', "-")),
            };

            if let Some(map) = &output.class_map {
                let json = serde_json::to_string_pretty(map)
                    .map_err(|e| CompileError::Style(path.clone(), e.into()))?;
                fs::write(out.join(format!("{stem}.json")), json)?;

                let module = styles::injection_module(&id, &output.ltr, map)
                    .map_err(|e| CompileError::Style(path.clone(), e))?;
                fs::write(out.join(format!("{stem}.js")), module)?;
            }

            artifact.push(
                ArtifactEntry::new(ArtifactKind::Style, id, cx.relative(&ltr))
                    .dependencies(dependencies.clone()),
            );
        }

        Ok(())
    }
}

/// Narrows a package's script dependency handles to those whose package is
/// in the workspace, declares a main style sheet, and has already produced
/// it. Entry points are globbed, so `src/*.scss` declares `src/style.scss`
/// when that file exists. Order is kept. A package with no style entry points gets nothing.
pub fn infer_style_dependencies(
    handles: &[String],
    package: &Package,
    catalog: &Catalog,
    settings: &WorkspaceSettings,
    config: &BuildConfig,
) -> Vec<String> {
    if !package.manifest.has_styles() {
        return Vec::new();
    }

    let prefix = format!("{}-", settings.handle_prefix);
    let mut seen = Vec::new();

    for handle in handles {
        let Some(dependency) = handle
            .strip_prefix(&prefix)
            .and_then(|short| catalog.by_short(short))
        else {
            continue;
        };

        let declares_main = StyleStep::new(dependency.manifest.build.style_entry_points.clone())
            .entries(&dependency.dir)
            .is_ok_and(|entries| entries.iter().any(|path| sheet_stem(path) == MAIN_STYLE));

        let produced = style_dir(config, &dependency.short)
            .join(format!("{MAIN_STYLE}.css"))
            .is_file();

        if declares_main && produced && !seen.contains(handle) {
            seen.push(handle.clone());
        }
    }

    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::Recorder;
    use crate::compile::PackageCompiler;
    use crate::compile::fixture::Workspace;

    fn workspace() -> Workspace {
        let ws = Workspace::new();
        ws.write(
            "packages/base/package.json",
            r#"{ "name": "@acme/base", "build": { "styleEntryPoints": ["src/style.css"] } }"#,
        );
        ws.write("packages/base/src/style.css", ".base { float: left; }");
        ws.write(
            "packages/plain/package.json",
            r#"{ "name": "@acme/plain" }"#,
        );
        ws.write(
            "packages/ui/package.json",
            r#"{
                "name": "@acme/ui",
                "dependencies": { "@acme/base": "*", "@acme/plain": "*" },
                "build": { "styleEntryPoints": ["src/*.css"] }
            }"#,
        );
        ws.write("packages/ui/src/style.css", ".ui { user-select: none; }");
        ws.write("packages/ui/src/button.module.css", ".button { margin-left: 1px; }");
        ws.write("packages/ui/src/_partial.css", ".x {}");
        ws
    }

    #[test]
    fn test_style_outputs() {
        let ws = workspace();
        let (config, settings, catalog, graph) = ws.load();
        let backend = Recorder::default();
        let compiler = PackageCompiler::new(&config, &settings, &catalog, &graph, &backend);

        compiler.compile("@acme/base").unwrap();
        let artifact = compiler.compile("@acme/ui").unwrap();

        let ids: Vec<_> = artifact
            .of_kind(ArtifactKind::Style)
            .map(|entry| entry.id.as_str())
            .collect();
        assert_eq!(ids, vec!["ws-ui-button-module", "ws-ui"]);

        assert!(ws.read("build/styles/ui/style.css").contains("-webkit-user-select"));
        assert!(ws.read("build/styles/ui/button.module-rtl.css").contains("margin-right"));
        assert!(ws.exists("build/styles/ui/button.module.json"));
        assert!(ws.exists("build/styles/ui/button.module.js"));
        assert!(!ws.exists("build/styles/ui/_partial.css"));

        let main = artifact.of_kind(ArtifactKind::Style).last().unwrap();
        assert_eq!(main.dependencies, vec!["ws-base"]);

        // Styles never go through the script backend.
        assert!(backend.outfiles().is_empty());
    }

    #[test]
    fn test_infer_requires_produced_sheet() {
        let ws = workspace();
        let (config, settings, catalog, _) = ws.load();
        let ui = catalog.get("@acme/ui").unwrap();
        let handles = vec!["ws-base".to_string(), "ws-plain".to_string(), "ws-react".to_string()];

        assert!(infer_style_dependencies(&handles, ui, &catalog, &settings, &config).is_empty());

        ws.write("build/styles/base/style.css", "");
        assert_eq!(
            infer_style_dependencies(&handles, ui, &catalog, &settings, &config),
            vec!["ws-base"]
        );
    }

    #[test]
    fn test_infer_through_glob_entry_points() {
        let ws = workspace();
        ws.write(
            "packages/theme/package.json",
            r#"{ "name": "@acme/theme", "build": { "styleEntryPoints": ["src/*.scss"] } }"#,
        );
        ws.write("packages/theme/src/style.scss", ".theme { color: red; }");
        ws.write(
            "packages/icons/package.json",
            r#"{ "name": "@acme/icons", "build": { "styleEntryPoints": ["src/*.css"] } }"#,
        );
        ws.write("packages/icons/src/icons.css", ".icon {}");
        ws.write("build/styles/theme/style.css", "");
        ws.write("build/styles/icons/style.css", "");

        let (config, settings, catalog, _) = ws.load();
        let ui = catalog.get("@acme/ui").unwrap();
        let handles = vec!["ws-icons".to_string(), "ws-theme".to_string()];

        // `icons` matches its glob but has no `style` sheet among the matches.
        assert_eq!(
            infer_style_dependencies(&handles, ui, &catalog, &settings, &config),
            vec!["ws-theme"]
        );
    }

    #[test]
    fn test_infer_without_styles_is_empty() {
        let ws = workspace();
        ws.write("build/styles/base/style.css", "");
        let (config, settings, catalog, _) = ws.load();
        let plain = catalog.get("@acme/plain").unwrap();

        let handles = vec!["ws-base".to_string()];
        assert!(infer_style_dependencies(&handles, plain, &catalog, &settings, &config).is_empty());
    }
}
