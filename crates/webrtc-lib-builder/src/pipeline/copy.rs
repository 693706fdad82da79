use std::fs;
use std::path::Path;

use crate::collect::FileCollector;
use crate::config::settings::CopyConfig;
use crate::error::{Error, Result};
use crate::workspace;

/// Files copied by [`copy_outputs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub libraries: usize,
    pub symbols: usize,
}

/// Copy libraries from the top level of `working_dir` into `destination`
/// and debug symbols into `destination/<symbols_dir>`. File names are kept;
/// both folders are created even when there is nothing to copy.
pub fn copy_outputs(
    working_dir: &Path,
    destination: &Path,
    cfg: &CopyConfig,
) -> Result<CopyReport> {
    let symbols_dir = destination.join(&cfg.symbols_dir);
    workspace::ensure_dir(destination)?;
    workspace::ensure_dir(&symbols_dir)?;

    let libraries = copy_matching(working_dir, &cfg.library_extensions, destination)?;
    let symbols = copy_matching(working_dir, &cfg.symbol_extensions, &symbols_dir)?;
    tracing::info!(
        destination = %destination.display(),
        libraries,
        symbols,
        "copied build outputs"
    );
    Ok(CopyReport { libraries, symbols })
}

fn copy_matching(src_dir: &Path, extensions: &[String], dst_dir: &Path) -> Result<usize> {
    let mut copied = 0;
    for file in FileCollector::new([src_dir], extensions).max_depth(0).files() {
        let file = file?;
        let Some(name) = file.file_name() else {
            continue;
        };
        copy_file(&file, &dst_dir.join(name))?;
        copied += 1;
    }
    Ok(copied)
}

/// Replace `backup_dir` with a fresh copy of `source`.
pub fn backup(source: &Path, backup_dir: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(Error::msg(format!(
            "backup source is not a directory: {}",
            source.display()
        )));
    }
    let src_can = source
        .canonicalize()
        .map_err(|e| Error::msg(format!("failed to resolve {}: {e}", source.display())))?;
    if backup_dir.exists() {
        let dst_can = backup_dir
            .canonicalize()
            .map_err(|e| Error::msg(format!("failed to resolve {}: {e}", backup_dir.display())))?;
        if src_can.starts_with(&dst_can) || dst_can.starts_with(&src_can) {
            return Err(Error::msg(format!(
                "backup folder {} overlaps the output folder {}",
                backup_dir.display(),
                source.display()
            )));
        }
        fs::remove_dir_all(&dst_can)
            .map_err(|e| Error::msg(format!("failed to remove dir {}: {e}", dst_can.display())))?;
    } else if backup_dir.starts_with(source) {
        return Err(Error::msg(format!(
            "backup folder {} is inside the output folder {}",
            backup_dir.display(),
            source.display()
        )));
    }

    copy_dir_all(source, backup_dir)?;
    tracing::info!(backup = %backup_dir.display(), "backed up build outputs");
    Ok(())
}

pub(crate) fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        workspace::ensure_dir(parent)?;
    }
    fs::copy(src, dst).map_err(|e| {
        Error::msg(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    workspace::ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dst.join(rel);
        if entry.file_type().is_dir() {
            workspace::ensure_dir(&out)?;
        } else {
            copy_file(entry.path(), &out)?;
        }
    }
    Ok(())
}
