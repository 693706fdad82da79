use std::fs;
use std::path::{Path, PathBuf};

use crate::config::settings::WrapperSettings;
use crate::error::{Error, Result};
use crate::executor::{CommandChain, CommandRunner};
use crate::request::BuildRequest;
use crate::toolchain::Toolchain;

use super::copy::copy_file;

/// Solution file copied out of the template folder; removed again on drop.
/// When the template already lives in the work dir it is used in place and
/// never removed.
struct WorkingCopy {
    path: Option<PathBuf>,
}

impl WorkingCopy {
    fn create(template: &Path, dst: &Path) -> Result<Self> {
        if !template.is_file() {
            return Err(Error::msg(format!(
                "wrapper template not found: {}",
                template.display()
            )));
        }
        if same_file(template, dst)? {
            tracing::debug!(path = %template.display(), "wrapper template used in place");
            return Ok(Self { path: None });
        }
        copy_file(template, dst)?;
        Ok(Self {
            path: Some(dst.to_path_buf()),
        })
    }
}

fn same_file(a: &Path, b: &Path) -> Result<bool> {
    if !b.exists() {
        return Ok(false);
    }
    let canon = |p: &Path| {
        fs::canonicalize(p)
            .map_err(|e| Error::msg(format!("failed to resolve {}: {e}", p.display())))
    };
    Ok(canon(a)? == canon(b)?)
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), "failed to remove wrapper working copy: {e}");
        }
    }
}

/// Build the wrapper solution configured for the request's target and
/// platform. Returns `Ok(false)` when none is configured.
pub fn build_wrapper(
    wrapper: &WrapperSettings,
    toolchain: &Toolchain,
    runner: &dyn CommandRunner,
    req: &BuildRequest,
) -> Result<bool> {
    let Some(solution) = wrapper.solution_for(&req.target_name, &req.platform) else {
        tracing::debug!(
            target_name = %req.target_name,
            platform = %req.platform,
            "no wrapper solution configured"
        );
        return Ok(false);
    };

    let working = WorkingCopy::create(
        &wrapper.template_dir.join(solution),
        &wrapper.work_dir.join(solution),
    )?;
    tracing::info!(solution, "building wrapper projects");

    let chain = CommandChain::new(toolchain.msbuild_command(
        Path::new(solution),
        &req.configuration,
        &req.cpu,
    ))
    .with_setup(toolchain.env_setup(&req.cpu)?)
    .with_teardown(toolchain.env_teardown());
    let status = runner.run(&chain, &wrapper.work_dir)?;
    drop(working);

    if !status.success() {
        return Err(Error::msg(format!("msbuild {solution} failed ({status})")));
    }
    Ok(true)
}
