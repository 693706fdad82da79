use std::path::{Path, PathBuf};

use crate::archive::ArchiveCombiner;
use crate::collect::FileCollector;
use crate::config::settings::MergeConfig;
use crate::executor::CommandRunner;
use crate::toolchain::Toolchain;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Path of the final combined library.
    Merged(PathBuf),
    /// No objects were found; nothing was written.
    NothingToMerge,
    Failed,
}

impl MergeResult {
    pub fn succeeded(&self) -> bool {
        !matches!(self, MergeResult::Failed)
    }
}

/// Packs every object under the configured folders into numbered
/// intermediate libraries, then combines those into `<prefix>.lib`.
pub struct LibraryMerger<'a> {
    config: &'a MergeConfig,
    combiner: ArchiveCombiner<'a>,
    working_dir: &'a Path,
}

impl<'a> LibraryMerger<'a> {
    pub fn new(
        config: &'a MergeConfig,
        toolchain: &'a Toolchain,
        runner: &'a dyn CommandRunner,
        working_dir: &'a Path,
    ) -> Self {
        Self {
            config,
            combiner: ArchiveCombiner::new(toolchain, runner, &config.ignore_warnings, working_dir),
            working_dir,
        }
    }

    fn collector(&self) -> FileCollector {
        FileCollector::new(
            self.config.folders.iter().map(|f| self.working_dir.join(f)),
            &self.config.extensions,
        )
        .excluding(
            self.config
                .excluded_subfolders
                .iter()
                .map(|f| self.working_dir.join(f)),
        )
        .max_batch_chars(self.config.max_batch_chars)
    }

    pub fn merge(&self, cpu: &str, destination: &Path) -> MergeResult {
        let temp = match tempfile::Builder::new()
            .prefix("combine")
            .tempdir_in(self.working_dir)
        {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(
                    dir = %self.working_dir.display(),
                    "failed to create temporary merge folder: {e}"
                );
                return MergeResult::Failed;
            }
        };

        let prefix = self.config.library_prefix.trim();
        let mut intermediates = Vec::new();
        for batch in self.collector().batches() {
            let batch = match batch {
                Ok(b) => b,
                Err(e) => {
                    tracing::error!(cpu, "collecting objects failed: {e}");
                    return MergeResult::Failed;
                }
            };
            let name = format!("{prefix}{}.lib", intermediates.len());
            match self.combiner.combine(cpu, &batch.paths, temp.path(), &name) {
                Ok(lib) => intermediates.push(lib),
                // The temporary folder is removed when `temp` drops.
                Err(_) => return MergeResult::Failed,
            }
        }

        let result = if intermediates.is_empty() {
            tracing::warn!(cpu, "there are no libs to merge for target cpu {cpu}");
            MergeResult::NothingToMerge
        } else {
            tracing::info!(cpu, count = intermediates.len(), "combining intermediate libraries");
            match self.combiner.combine(
                cpu,
                &intermediates,
                destination,
                &format!("{prefix}.lib"),
            ) {
                Ok(lib) => MergeResult::Merged(lib),
                Err(_) => MergeResult::Failed,
            }
        };

        if let Err(e) = temp.close() {
            tracing::warn!("failed to remove temporary merge folder: {e}");
        }
        result
    }
}
