use std::fs;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use monobuild::artifact::ArtifactKind;
use monobuild::compile::infer_style_dependencies;
use monobuild::manifest::WorkspaceSettings;
use monobuild::{
    Backend, BuildConfig, BuildError, CompileRequest, FailurePolicy, GraphError, Orchestrator,
    PackageRegistry, QueueState, RebuildTarget, WatchQueue,
};

/// Copies the entry to the outfile behind a header naming the request.
#[derive(Default)]
struct Stub {
    outfiles: Mutex<Vec<Utf8PathBuf>>,
    fail_on: Option<&'static str>,
}

impl Backend for Stub {
    fn compile(&self, request: &CompileRequest) -> anyhow::Result<()> {
        self.outfiles.lock().unwrap().push(request.outfile.clone());

        if let Some(pattern) = self.fail_on
            && request.entry.as_str().contains(pattern)
        {
            anyhow::bail!("unexpected token in {}", request.entry);
        }

        let source = fs::read_to_string(&request.entry).unwrap_or_default();
        fs::create_dir_all(request.outfile.parent().unwrap())?;
        fs::write(
            &request.outfile,
            format!("/* {:?} bundle={} min={} */\n{source}", request.format, request.bundle, request.minify),
        )?;
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        fs::create_dir_all(root.join("packages")).unwrap();
        Self { _dir: dir, root }
    }

    fn write(&self, path: &str, content: &str) {
        let path = self.root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(&self, path: &str) -> String {
        fs::read_to_string(self.root.join(path)).unwrap()
    }

    fn exists(&self, path: &str) -> bool {
        self.root.join(path).exists()
    }

    fn config(&self) -> BuildConfig {
        BuildConfig::new(self.root.clone()).base_url("/assets/")
    }

    fn orchestrator(&self, backend: Stub) -> Orchestrator {
        Orchestrator::load(self.config(), Box::new(backend)).unwrap()
    }

    /// util <- core <- ui (terminal), plus a route depending on core.
    fn editor(self) -> Self {
        self.write(
            "package.json",
            r#"{ "name": "root", "build": { "handlePrefix": "acme", "globalNamespace": "acme", "pages": ["editor"] } }"#,
        );
        self.write(
            "packages/util/package.json",
            r#"{ "name": "@acme/util", "build": { "library": true } }"#,
        );
        self.write("packages/util/src/index.js", "export const id = (x) => x;");
        self.write(
            "packages/core/package.json",
            r#"{
                "name": "@acme/core",
                "dependencies": { "@acme/util": "^1.0.0", "react": "^18.0.0" },
                "build": { "library": true, "styleEntryPoints": ["src/style.scss"] }
            }"#,
        );
        self.write("packages/core/src/index.js", "export * from '@acme/util';");
        self.write("packages/core/src/style.scss", ".core { margin-left: 1px; }");
        self.write(
            "packages/ui/package.json",
            r#"{
                "name": "@acme/ui",
                "dependencies": { "@acme/core": "*" },
                "build": {
                    "library": true,
                    "browserGlobal": { "defaultExport": true },
                    "moduleExports": { "./interactivity": "./src/interactivity.js" },
                    "styleEntryPoints": ["src/*.scss"]
                }
            }"#,
        );
        self.write("packages/ui/src/index.js", "export default 1;");
        self.write("packages/ui/src/interactivity.js", "export const store = {};");
        self.write("packages/ui/src/style.scss", ".ui { padding: 0 1px 0 2px; }");
        self.write(
            "routes/home/package.json",
            r#"{ "route": { "path": "/", "pages": ["editor"] }, "dependencies": { "@acme/core": "*" } }"#,
        );
        self.write("routes/home/route.js", "export const redirect = null;");
        self.write("routes/home/stage.tsx", "export default () => null;");
        self
    }
}

#[test]
fn full_build_produces_registration_data() {
    let fixture = Fixture::new().editor();
    let mut orchestrator = fixture.orchestrator(Stub::default());

    let registries = orchestrator.build_all().unwrap();

    let scripts: Vec<_> = registries.scripts.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(scripts, vec!["acme-ui"]);

    let modules: Vec<_> = registries.modules.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(modules, vec!["@acme/ui/interactivity"]);

    let styles: Vec<_> = registries.styles.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(styles, vec!["acme-core", "acme-ui"]);

    // ui depends on core, which ships a main style sheet.
    let ui_style = registries.styles.iter().find(|e| e.id == "acme-ui").unwrap();
    assert_eq!(ui_style.dependencies, vec!["acme-core"]);

    let routes: Vec<_> = registries.routes.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(routes, vec!["home/content", "home/route"]);
    assert_eq!(registries.pages.len(), 1);
    assert!(registries.route_info[0].has_route && registries.route_info[0].has_content);

    assert!(fixture.exists("build/scripts/ui/index.js"));
    assert!(fixture.exists("build/scripts/ui/index.min.js"));
    assert!(fixture.exists("build/scripts/ui/index.asset.json"));
    assert!(fixture.read("build/scripts/ui/index.js").contains("bundle=true"));
    assert!(fixture.exists("build/styles/core/style-rtl.css"));
    assert!(fixture.read("build/styles/core/style-rtl.css").contains("margin-right"));
    assert!(fixture.exists("build/pages/editor.js"));
    assert!(!fixture.exists("routes/home/.route-entry.generated.js"));

    let scripts: serde_json::Value =
        serde_json::from_str(&fixture.read("build/registration/scripts.json")).unwrap();
    assert_eq!(scripts["base_url"], "/assets/");
}

#[test]
fn registration_is_idempotent() {
    let fixture = Fixture::new().editor();
    let files = ["modules", "scripts", "styles", "routes", "pages"];

    fixture.orchestrator(Stub::default()).build_all().unwrap();
    let first: Vec<String> = files
        .iter()
        .map(|name| fixture.read(&format!("build/registration/{name}.json")))
        .collect();

    fixture.orchestrator(Stub::default()).build_all().unwrap();
    let second: Vec<String> = files
        .iter()
        .map(|name| fixture.read(&format!("build/registration/{name}.json")))
        .collect();

    assert_eq!(first, second);
}

#[test]
fn rebuild_stops_at_terminal_boundary() {
    let fixture = Fixture::new().editor();
    let mut orchestrator = fixture.orchestrator(Stub::default());
    orchestrator.build_all().unwrap();

    let graph = orchestrator.graph();
    assert_eq!(graph.depth("@acme/util"), Some(0));
    assert_eq!(graph.depth("@acme/core"), Some(1));
    assert_eq!(graph.depth("@acme/ui"), Some(2));

    let rebuilt = orchestrator
        .rebuild(&RebuildTarget::Package("@acme/util".into()))
        .unwrap();
    assert_eq!(rebuilt, vec!["@acme/util", "@acme/core", "@acme/ui", "route:home"]);
}

#[test]
fn routing_script_alone_yields_one_pair() {
    let fixture = Fixture::new();
    fixture.write("routes/redirect/package.json", r#"{ "route": { "path": "/old" } }"#);
    fixture.write("routes/redirect/route.ts", "export default '/new';");

    let mut orchestrator = fixture.orchestrator(Stub::default());
    let registries = orchestrator.build_all().unwrap();

    assert_eq!(registries.routes.len(), 1);
    assert_eq!(registries.routes[0].id, "redirect/route");
    assert!(fixture.exists("build/routes/redirect/route.min.js"));
    assert!(!fixture.exists("build/routes/redirect/content.js"));
}

#[test]
fn no_style_entry_points_no_style_dependencies() {
    let fixture = Fixture::new().editor();
    fixture.write(
        "packages/plain/package.json",
        r#"{ "name": "@acme/plain", "dependencies": { "@acme/core": "*" }, "build": { "browserGlobal": true } }"#,
    );
    fixture.write("packages/plain/src/index.js", "export default 1;");

    let mut orchestrator = fixture.orchestrator(Stub::default());
    let registries = orchestrator.build_all().unwrap();
    assert_eq!(registries.styles.len(), 2);

    let config = fixture.config();
    let catalog = PackageRegistry::new()
        .scan(&config.packages_root())
        .unwrap();
    let plain = catalog.get("@acme/plain").unwrap();
    let settings = WorkspaceSettings::load(&config.root).unwrap();

    let inferred = infer_style_dependencies(&["acme-core".to_string()], plain, &catalog, &settings, &config);
    assert!(inferred.is_empty());
    assert_eq!(orchestrator.store().package("@acme/plain").unwrap().count(ArtifactKind::Style), 0);
}

#[test]
fn cycle_is_reported() {
    let fixture = Fixture::new();
    fixture.write(
        "packages/a/package.json",
        r#"{ "name": "a", "dependencies": { "b": "*" } }"#,
    );
    fixture.write(
        "packages/b/package.json",
        r#"{ "name": "b", "dependencies": { "a": "*" } }"#,
    );

    let mut orchestrator = fixture.orchestrator(Stub::default());

    // Depth computation still terminates.
    assert_eq!(orchestrator.graph().levels().iter().map(|l| l.len()).sum::<usize>(), 2);

    let err = orchestrator.build_all().unwrap_err();
    let BuildError::Graph(GraphError::Cycle(members)) = &err else {
        panic!("expected a cycle, got {err}");
    };
    assert_eq!(members, &["a", "b", "a"]);
}

#[test]
fn collect_all_keeps_building_siblings() {
    let fixture = Fixture::new();
    for name in ["left", "right"] {
        fixture.write(
            &format!("packages/{name}/package.json"),
            &format!(r#"{{ "name": "{name}", "build": {{ "library": true }} }}"#),
        );
        fixture.write(&format!("packages/{name}/src/index.js"), "export default 1;");
    }

    let backend = Stub {
        fail_on: Some("left/src"),
        ..Default::default()
    };
    let config = fixture.config().policy(FailurePolicy::CollectAll);
    let mut orchestrator = Orchestrator::load(config, Box::new(backend)).unwrap();

    let err = orchestrator.build_all().unwrap_err();
    let BuildError::Batch(failures) = &err else {
        panic!("expected a batch failure, got {err}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].target, "left");
    assert!(err.to_string().contains("unexpected token"));
    assert!(fixture.exists("packages/right/build-module/index.js"));
}

#[test]
fn watch_queue_coalesces() {
    let mut queue = WatchQueue::new();
    let ui = RebuildTarget::Package("@acme/ui".into());

    assert_eq!(queue.notify(ui.clone()), Some(ui.clone()));
    for _ in 0..3 {
        assert_eq!(queue.notify(ui.clone()), None);
    }
    assert_eq!(queue.notify(RebuildTarget::Route("home".into())), None);

    assert_eq!(queue.complete(), Some(ui));
    assert_eq!(queue.complete(), Some(RebuildTarget::Route("home".into())));
    assert_eq!(queue.state(), QueueState::Rebuilding);
    assert_eq!(queue.complete(), None);
    assert_eq!(queue.state(), QueueState::Idle);
}

#[test]
fn paths_map_to_owners() {
    let fixture = Fixture::new().editor();
    let orchestrator = fixture.orchestrator(Stub::default());
    let mapper = monobuild::PathMapper::new(orchestrator.catalog(), orchestrator.routes());

    let path = |p: &str| fixture.root.join(p);

    assert_eq!(
        mapper.target_for(&path("packages/core/src/index.js")),
        Some(RebuildTarget::Package("@acme/core".into()))
    );
    assert_eq!(
        mapper.target_for(&path("routes/home/stage.tsx")),
        Some(RebuildTarget::Route("home".into()))
    );
    assert_eq!(mapper.target_for(&path("packages/core/src/index.test.js")), None);
    assert_eq!(mapper.target_for(Utf8Path::new("/elsewhere/index.js")), None);
}
