use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorCode, Result};
use crate::executor::{CommandChain, CommandRunner, quote_arg};
use crate::toolchain::Toolchain;
use crate::workspace;

/// Runs the platform archiver (`lib.exe`) over a set of objects or
/// libraries, inside the toolchain environment for the target CPU.
pub struct ArchiveCombiner<'a> {
    toolchain: &'a Toolchain,
    runner: &'a dyn CommandRunner,
    ignore_warnings: &'a [u32],
    cwd: &'a Path,
}

impl<'a> ArchiveCombiner<'a> {
    pub fn new(
        toolchain: &'a Toolchain,
        runner: &'a dyn CommandRunner,
        ignore_warnings: &'a [u32],
        cwd: &'a Path,
    ) -> Self {
        Self {
            toolchain,
            runner,
            ignore_warnings,
            cwd,
        }
    }

    /// Produce `output_folder/output_file` from `inputs`. Every failure is
    /// logged and reported as [`ErrorCode::MergeLibsFailed`].
    pub fn combine(
        &self,
        cpu: &str,
        inputs: &[PathBuf],
        output_folder: &Path,
        output_file: &str,
    ) -> std::result::Result<PathBuf, ErrorCode> {
        match self.try_combine(cpu, inputs, output_folder, output_file) {
            Ok(out) => Ok(out),
            Err(e) => {
                tracing::error!(
                    cpu,
                    output = output_file,
                    "{}: {e}",
                    ErrorCode::MergeLibsFailed.describe()
                );
                Err(ErrorCode::MergeLibsFailed)
            }
        }
    }

    fn try_combine(
        &self,
        cpu: &str,
        inputs: &[PathBuf],
        output_folder: &Path,
        output_file: &str,
    ) -> Result<PathBuf> {
        if inputs.is_empty() {
            return Err(Error::msg("no input files to combine"));
        }
        workspace::ensure_dir(output_folder)?;
        let output = output_folder.join(output_file);

        let chain = CommandChain::new(self.archiver_line(cpu, inputs, &output))
            .with_setup(self.toolchain.env_setup(cpu)?)
            .with_teardown(self.toolchain.env_teardown());
        let status = self.runner.run(&chain, self.cwd)?;
        if !status.success() {
            return Err(Error::msg(format!(
                "archiver failed for {} ({status})",
                output.display()
            )));
        }
        tracing::debug!(output = %output.display(), inputs = inputs.len(), "combined archive");
        Ok(output)
    }

    fn archiver_line(&self, cpu: &str, inputs: &[PathBuf], output: &Path) -> String {
        let mut line = format!(
            "\"{}\"",
            self.toolchain.archiver(cpu).to_string_lossy()
        );
        if !self.ignore_warnings.is_empty() {
            let codes: Vec<String> = self.ignore_warnings.iter().map(u32::to_string).collect();
            line.push_str(&format!(" /IGNORE:{}", codes.join(",")));
        }
        line.push(' ');
        line.push_str(&quote_arg(&format!("/OUT:{}", output.to_string_lossy())));
        for input in inputs {
            line.push(' ');
            line.push_str(&quote_arg(&input.to_string_lossy()));
        }
        line
    }
}
