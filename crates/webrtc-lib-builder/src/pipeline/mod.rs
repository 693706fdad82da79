pub mod copy;
pub mod wrapper;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::config::settings::Feature;
use crate::descriptor::DescriptorPatch;
use crate::error::ErrorCode;
use crate::executor::{CommandChain, CommandRunner};
use crate::merge::LibraryMerger;
use crate::request::BuildRequest;
use crate::toolchain::Toolchain;
use crate::workspace::DirStack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Locating,
    Patching,
    Building,
    Merging,
    Copying,
    BackingUp,
    WrapperBuilding,
}

impl Stage {
    /// Terminal code reported when this stage fails.
    pub fn failure_code(self) -> ErrorCode {
        match self {
            Stage::Locating => ErrorCode::OutputFolderNotExist,
            Stage::Patching | Stage::Building => ErrorCode::BuildFailed,
            Stage::Merging => ErrorCode::MergeLibsFailed,
            Stage::Copying => ErrorCode::CopyOutputFailed,
            Stage::BackingUp => ErrorCode::BackupFailed,
            Stage::WrapperBuilding => ErrorCode::WrapperBuildFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Locating => "locating",
            Stage::Patching => "patching",
            Stage::Building => "building",
            Stage::Merging => "merging",
            Stage::Copying => "copying",
            Stage::BackingUp => "backing up",
            Stage::WrapperBuilding => "wrapper building",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub code: ErrorCode,
    pub failed_stage: Option<Stage>,
    /// Set once the copy stage has produced it.
    pub destination: Option<PathBuf>,
    pub elapsed: Duration,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

struct StageFailure {
    stage: Stage,
    destination: Option<PathBuf>,
}

/// Drives one build request through
/// locate, patch, build, merge, copy, backup and wrapper build.
pub struct Builder {
    settings: Settings,
    toolchain: Toolchain,
    runner: Box<dyn CommandRunner>,
    dirs: DirStack,
}

impl Builder {
    pub fn new(settings: Settings, runner: Box<dyn CommandRunner>) -> Self {
        let toolchain = Toolchain::from_settings(&settings);
        tracing::debug!(
            host_cpu = toolchain.host_cpu(),
            backup = settings.backup.is_enabled(),
            wrapper = settings.wrapper.is_enabled(),
            "builder configured"
        );
        Self {
            settings,
            toolchain,
            runner,
            dirs: DirStack::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn dir_stack(&self) -> &DirStack {
        &self.dirs
    }

    pub fn run(&self, req: &BuildRequest) -> BuildOutcome {
        let started = Instant::now();
        tracing::info!("Running build for {req}");

        let outcome = match self.run_stages(req) {
            Ok(destination) => BuildOutcome {
                code: ErrorCode::NoError,
                failed_stage: None,
                destination: Some(destination),
                elapsed: Duration::ZERO,
            },
            Err(f) => BuildOutcome {
                code: f.stage.failure_code(),
                failed_stage: Some(f.stage),
                destination: f.destination,
                elapsed: Duration::ZERO,
            },
        };
        let outcome = BuildOutcome {
            elapsed: started.elapsed(),
            ..outcome
        };

        if outcome.is_success() {
            tracing::info!(
                target_name = %req.target_name,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "build finished"
            );
        }
        outcome
    }

    fn fail(
        &self,
        req: &BuildRequest,
        stage: Stage,
        detail: impl fmt::Display,
        destination: Option<&Path>,
    ) -> StageFailure {
        tracing::error!(
            target_name = %req.target_name,
            platform = %req.platform,
            cpu = %req.cpu,
            configuration = %req.configuration,
            stage = %stage,
            code = stage.failure_code().exit_code(),
            "{stage} failed: {detail}"
        );
        StageFailure {
            stage,
            destination: destination.map(Path::to_path_buf),
        }
    }

    fn run_stages(&self, req: &BuildRequest) -> Result<PathBuf, StageFailure> {
        req.validate().map_err(|e| {
            self.fail(req, Stage::Locating, format!("invalid build request: {e}"), None)
        })?;
        let layout = &self.settings.layout;
        let working_dir = layout
            .working_dir(req)
            .map_err(|e| self.fail(req, Stage::Locating, e, None))?;
        if !working_dir.is_dir() {
            return Err(self.fail(
                req,
                Stage::Locating,
                format!(
                    "output folder at {} doesn't exist; it looks like prepare was not run",
                    working_dir.display()
                ),
                None,
            ));
        }
        let destination = layout
            .destination(req)
            .map_err(|e| self.fail(req, Stage::Locating, e, None))?;

        let guard = self
            .dirs
            .push(&working_dir)
            .map_err(|e| self.fail(req, Stage::Locating, e, None))?;
        let cwd = guard.path();

        self.build_targets(req, &cwd)?;

        if req.combine_libs {
            tracing::info!(cpu = %req.cpu, "merging libraries");
            let merger = LibraryMerger::new(
                &self.settings.merge,
                &self.toolchain,
                self.runner.as_ref(),
                &cwd,
            );
            if !merger.merge(&req.cpu, &cwd).succeeded() {
                return Err(self.fail(req, Stage::Merging, "library merge failed", None));
            }
        }

        copy::copy_outputs(&cwd, &destination, &self.settings.copy)
            .map_err(|e| self.fail(req, Stage::Copying, e, None))?;
        let dest = Some(destination.as_path());

        match &self.settings.backup {
            Feature::Disabled => {}
            Feature::Misconfigured(reason) => {
                return Err(self.fail(req, Stage::BackingUp, reason, dest));
            }
            Feature::Enabled(backup_dir) => {
                copy::backup(&destination, backup_dir)
                    .map_err(|e| self.fail(req, Stage::BackingUp, e, dest))?;
            }
        }

        match &self.settings.wrapper {
            Feature::Disabled => {}
            Feature::Misconfigured(reason) => {
                return Err(self.fail(req, Stage::WrapperBuilding, reason, dest));
            }
            Feature::Enabled(w) => {
                wrapper::build_wrapper(w, &self.toolchain, self.runner.as_ref(), req)
                    .map_err(|e| self.fail(req, Stage::WrapperBuilding, e, dest))?;
            }
        }

        drop(guard);
        Ok(destination)
    }

    /// Runs every sub-target through ninja. The build descriptor stays
    /// patched for the whole stage when the request is for the patched
    /// target.
    fn build_targets(&self, req: &BuildRequest, cwd: &Path) -> Result<(), StageFailure> {
        let patch = match &self.settings.descriptor {
            Some(d) if d.target == req.target_name && !d.extra_targets.is_empty() => {
                let path = self.settings.preparation_root.join(&d.path);
                let patch = DescriptorPatch::apply(&path, &d.target, &d.extra_targets)
                    .map_err(|e| self.fail(req, Stage::Patching, e, None))?;
                Some(patch)
            }
            _ => None,
        };

        let built = self.run_ninja(req, cwd);

        if let Some(patch) = patch {
            patch
                .restore()
                .map_err(|e| self.fail(req, Stage::Patching, e, None))?;
        }
        built
    }

    fn run_ninja(&self, req: &BuildRequest, cwd: &Path) -> Result<(), StageFailure> {
        for target in &req.subtargets {
            let chain = CommandChain::new(self.toolchain.ninja_command(target));
            match self.runner.run(&chain, cwd) {
                Ok(status) if status.success() => {
                    tracing::info!("Successfully finished building libs for target {target}");
                }
                Ok(status) => {
                    return Err(self.fail(
                        req,
                        Stage::Building,
                        format!("building {target} target libraries has failed ({status})"),
                        None,
                    ));
                }
                Err(e) => return Err(self.fail(req, Stage::Building, e, None)),
            }
        }
        Ok(())
    }
}
