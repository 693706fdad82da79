use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use webrtc_lib_builder::config::{ConfigDoc, Settings};
use webrtc_lib_builder::executor::{ChainStatus, CommandChain, CommandRunner};
use webrtc_lib_builder::pipeline::{Builder, Stage};
use webrtc_lib_builder::request::BuildRequest;
use webrtc_lib_builder::{ErrorCode, Result};

const BUILD_GN: &str = "static_library(\"webrtc\") {\n  deps = [\n    \"api\",\n  ]\n}\n";

#[derive(Default)]
struct FakeState {
    calls: Vec<(String, PathBuf)>,
    fail_when: Vec<String>,
    ninja_outputs: Vec<String>,
    watch: Option<PathBuf>,
    watched: Vec<String>,
}

/// Stands in for ninja, lib.exe and msbuild. Ninja "produces" the configured
/// files in its working directory and the archiver writes its `/OUT:` file.
#[derive(Clone, Default)]
struct FakeTools {
    state: Rc<RefCell<FakeState>>,
}

impl FakeTools {
    fn fail_when(&self, needle: &str) {
        self.state.borrow_mut().fail_when.push(needle.to_string());
    }

    fn produce(&self, files: &[&str]) {
        self.state
            .borrow_mut()
            .ninja_outputs
            .extend(files.iter().map(|f| f.to_string()));
    }

    fn watch(&self, path: &Path) {
        self.state.borrow_mut().watch = Some(path.to_path_buf());
    }

    fn lines(&self) -> Vec<String> {
        self.state.borrow().calls.iter().map(|(l, _)| l.clone()).collect()
    }
}

impl CommandRunner for FakeTools {
    fn run(&self, chain: &CommandChain, cwd: &Path) -> Result<ChainStatus> {
        let mut s = self.state.borrow_mut();
        let line = chain.to_shell_line();
        s.calls.push((line.clone(), cwd.to_path_buf()));
        if let Some(w) = s.watch.clone() {
            let snapshot = fs::read_to_string(&w).unwrap_or_default();
            s.watched.push(snapshot);
        }
        if s.fail_when.iter().any(|f| line.contains(f.as_str())) {
            return Ok(ChainStatus::from_code(Some(1)));
        }
        if chain.payload.starts_with("ninja") {
            for f in &s.ninja_outputs {
                fs::write(cwd.join(f), b"artifact")?;
            }
        }
        if let Some(out) = chain
            .payload
            .split(' ')
            .find_map(|tok| tok.strip_prefix("/OUT:"))
        {
            fs::write(out, b"lib")?;
        }
        Ok(ChainStatus::from_code(Some(0)))
    }
}

struct Fixture {
    tmp: tempfile::TempDir,
    tools: FakeTools,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("BUILD.gn"), BUILD_GN).expect("write BUILD.gn");
        Self {
            tmp,
            tools: FakeTools::default(),
        }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn working_dir(&self, cpu: &str) -> PathBuf {
        self.root().join(format!("out/webrtc_win_{cpu}_Debug"))
    }

    fn prepare(&self, cpu: &str) -> PathBuf {
        let dir = self.working_dir(cpu);
        fs::create_dir_all(&dir).expect("mkdir working dir");
        dir
    }

    fn builder(&self, extra_config: &str) -> Builder {
        let raw = format!(
            r#"
[targets.webrtc]
subtargets = ["webrtc"]
combine_libs = true

[descriptor]
target = "webrtc"
extra_targets = ["//third_party/jsoncpp"]

{extra_config}
"#
        );
        let doc = ConfigDoc::parse("<mem>", &raw).expect("parse");
        let settings = Settings::from_doc_in(&doc, self.root()).expect("settings");
        Builder::new(settings, Box::new(self.tools.clone()))
    }

    fn destination(&self, cpu: &str) -> PathBuf {
        self.root().join(format!("webrtc_output/webrtc/win/{cpu}/Debug"))
    }
}

fn request(builder: &Builder, cpu: &str) -> BuildRequest {
    BuildRequest::for_target(builder.settings(), "webrtc", "win", cpu, "Debug")
}

fn leftover_temp_dirs(dir: &Path) -> usize {
    fs::read_dir(dir)
        .expect("read_dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("combine"))
        .count()
}

#[test]
fn empty_working_dir_builds_successfully() {
    let fx = Fixture::new();
    let work = fx.prepare("x64");
    fx.tools.watch(&fx.root().join("BUILD.gn"));
    let builder = fx.builder("");

    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::NoError);
    assert_eq!(outcome.failed_stage, None);
    assert_eq!(outcome.destination, Some(fx.destination("x64")));

    assert_eq!(fx.tools.lines(), vec!["ninja webrtc"]);
    let state = fx.tools.state.borrow();
    assert_eq!(state.calls[0].1, work);
    assert!(
        state.watched[0].contains("//third_party/jsoncpp"),
        "descriptor is patched while ninja runs"
    );

    assert_eq!(
        fs::read_to_string(fx.root().join("BUILD.gn")).expect("read"),
        BUILD_GN
    );
    assert_eq!(builder.dir_stack().depth(), 0);
    assert!(fx.destination("x64").join("pdbs").is_dir());
    assert!(!work.join("webrtc.lib").exists(), "no objects means no merged library");
    assert_eq!(leftover_temp_dirs(&work), 0);
}

#[test]
fn missing_working_dir_fails_before_touching_anything() {
    let fx = Fixture::new();
    let builder = fx.builder("");

    let outcome = builder.run(&request(&builder, "arm64"));
    assert_eq!(outcome.code, ErrorCode::OutputFolderNotExist);
    assert_eq!(outcome.failed_stage, Some(Stage::Locating));
    assert!(fx.tools.lines().is_empty());
    assert_eq!(builder.dir_stack().depth(), 0);
    assert_eq!(
        fs::read_to_string(fx.root().join("BUILD.gn")).expect("read"),
        BUILD_GN
    );
    assert!(!fx.destination("arm64").exists());
}

#[test]
fn failed_build_restores_descriptor_and_skips_later_stages() {
    let fx = Fixture::new();
    fx.prepare("x64");
    fx.tools.fail_when("ninja webrtc");
    let builder = fx.builder("[backup]\npath = \"backup\"\n");

    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::BuildFailed);
    assert_eq!(outcome.failed_stage, Some(Stage::Building));
    assert_eq!(
        fs::read_to_string(fx.root().join("BUILD.gn")).expect("read"),
        BUILD_GN
    );
    assert_eq!(builder.dir_stack().depth(), 0);
    assert!(!fx.destination("x64").exists(), "copy must not run");
    assert!(!fx.root().join("backup").exists(), "backup must not run");
}

#[test]
fn first_failing_subtarget_stops_the_rest() {
    let fx = Fixture::new();
    fx.prepare("x64");
    fx.tools.fail_when("ninja second");
    let builder = fx.builder("[targets.ortc]\nsubtargets = [\"first\", \"second\", \"third\"]\n");

    let mut req = request(&builder, "x64");
    req.target_name = "ortc".into();
    req.subtargets = builder.settings().target("ortc").subtargets;
    req.working_path = Some(PathBuf::from("out/webrtc_win_x64_Debug"));

    let outcome = builder.run(&req);
    assert_eq!(outcome.code, ErrorCode::BuildFailed);
    assert_eq!(fx.tools.lines(), vec!["ninja first", "ninja second"]);
}

#[test]
fn merged_library_is_copied_and_backed_up() {
    let fx = Fixture::new();
    let work = fx.prepare("x64");
    fs::create_dir_all(work.join("obj/api")).expect("mkdir");
    fs::write(work.join("obj/api/a.obj"), b"").expect("write");
    fs::write(work.join("obj/api/b.o"), b"").expect("write");
    fx.tools.produce(&["boringssl.dll", "webrtc.pdb"]);

    let backup = fx.root().join("backup");
    fs::create_dir_all(&backup).expect("mkdir");
    fs::write(backup.join("stale.lib"), b"old").expect("write");

    let builder = fx.builder("[backup]\npath = \"backup\"\n");
    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::NoError, "{:?}", fx.tools.lines());

    let lines = fx.tools.lines();
    assert_eq!(lines.len(), 3, "ninja, one batch, final combine: {lines:?}");
    assert!(lines[1].contains("webrtc0.lib"));
    assert!(lines[2].contains(&format!("/OUT:{}", work.join("webrtc.lib").display())));
    assert!(lines[2].trim_end().ends_with("webrtc0.lib"));

    let dest = fx.destination("x64");
    assert!(dest.join("webrtc.lib").is_file());
    assert!(dest.join("boringssl.dll").is_file());
    assert!(dest.join("pdbs/webrtc.pdb").is_file());
    assert!(backup.join("webrtc.lib").is_file());
    assert!(backup.join("pdbs/webrtc.pdb").is_file());
    assert!(!backup.join("stale.lib").exists());
    assert_eq!(leftover_temp_dirs(&work), 0);
}

#[test]
fn merge_failure_is_reported_as_merge_stage() {
    let fx = Fixture::new();
    let work = fx.prepare("x64");
    fs::create_dir_all(work.join("obj")).expect("mkdir");
    fs::write(work.join("obj/a.obj"), b"").expect("write");
    fx.tools.fail_when("/OUT:");
    let builder = fx.builder("");

    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::MergeLibsFailed);
    assert_eq!(outcome.failed_stage, Some(Stage::Merging));
    assert!(!fx.destination("x64").exists());
    assert_eq!(leftover_temp_dirs(&work), 0);
}

#[test]
fn misconfigured_backup_fails_after_copy() {
    let fx = Fixture::new();
    fx.prepare("x64");
    let builder = fx.builder("[backup]\nenabled = true\n");

    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::BackupFailed);
    assert_eq!(outcome.failed_stage, Some(Stage::BackingUp));
    assert_eq!(outcome.destination, Some(fx.destination("x64")));
}

#[test]
fn wrapper_solution_is_built_in_the_work_dir() {
    let fx = Fixture::new();
    fx.prepare("x86");
    fs::create_dir_all(fx.root().join("templates")).expect("mkdir");
    fs::write(fx.root().join("templates/Wrapper.sln"), b"sln").expect("write");
    let builder = fx.builder(
        r#"
[wrapper]
template_dir = "templates"

[wrapper.solutions.webrtc]
win = "Wrapper.sln"
"#,
    );

    let outcome = builder.run(&request(&builder, "x86"));
    assert_eq!(outcome.code, ErrorCode::NoError);
    let lines = fx.tools.lines();
    assert_eq!(
        lines.last().map(String::as_str),
        Some("msbuild Wrapper.sln /p:Configuration=Debug /p:Platform=Win32")
    );
    assert!(!fx.root().join("Wrapper.sln").exists());
}

#[test]
fn wrapper_failure_and_misconfiguration_map_to_wrapper_code() {
    let fx = Fixture::new();
    fx.prepare("x64");
    let builder = fx.builder("[wrapper]\nenabled = true\n");
    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::WrapperBuildFailed);
    assert_eq!(outcome.failed_stage, Some(Stage::WrapperBuilding));

    fs::create_dir_all(fx.root().join("templates")).expect("mkdir");
    fs::write(fx.root().join("templates/Wrapper.sln"), b"sln").expect("write");
    fx.tools.fail_when("msbuild");
    let builder = fx.builder(
        "[wrapper]\ntemplate_dir = \"templates\"\n[wrapper.solutions.webrtc]\nwin = \"Wrapper.sln\"\n",
    );
    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::WrapperBuildFailed);
    assert!(!fx.root().join("Wrapper.sln").exists());
}

#[test]
fn wrapper_template_in_preparation_root_survives_the_build() {
    let fx = Fixture::new();
    fx.prepare("x64");
    fs::write(fx.root().join("Wrapper.sln"), b"sln").expect("write");
    let builder = fx.builder(
        "[wrapper]\ntemplate_dir = \".\"\n[wrapper.solutions.webrtc]\nwin = \"Wrapper.sln\"\n",
    );

    let outcome = builder.run(&request(&builder, "x64"));
    assert_eq!(outcome.code, ErrorCode::NoError);
    assert_eq!(
        fs::read(fx.root().join("Wrapper.sln")).expect("template kept"),
        b"sln"
    );
}

#[test]
fn invalid_request_is_rejected_before_locating() {
    let fx = Fixture::new();
    fx.prepare("x64");
    let builder = fx.builder("");

    let outcome = builder.run(&request(&builder, "x64/../x64"));
    assert_eq!(outcome.code, ErrorCode::OutputFolderNotExist);
    assert_eq!(outcome.failed_stage, Some(Stage::Locating));
    assert!(fx.tools.lines().is_empty());
    assert_eq!(builder.dir_stack().depth(), 0);
}
