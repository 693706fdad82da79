use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};

/// Extra dependencies added to one target block of a GN build file for the
/// duration of a build.
///
/// The file's original bytes are written back by [`DescriptorPatch::restore`],
/// or on drop if `restore` was never reached.
#[derive(Debug)]
pub struct DescriptorPatch {
    path: PathBuf,
    original: Option<Vec<u8>>,
}

impl DescriptorPatch {
    pub fn apply(path: &Path, target: &str, extra_targets: &[String]) -> Result<Self> {
        let original = fs::read(path)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        let text = String::from_utf8(original.clone())
            .map_err(|_| Error::msg(format!("{} is not valid UTF-8", path.display())))?;
        let patched = add_deps(&text, target, extra_targets)
            .map_err(|e| Error::msg(format!("{}: {e}", path.display())))?;

        fs::write(path, patched)
            .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))?;
        tracing::debug!(
            path = %path.display(),
            gn_target = target,
            extras = extra_targets.len(),
            "patched build descriptor"
        );
        Ok(Self {
            path: path.to_path_buf(),
            original: Some(original),
        })
    }

    pub fn restore(mut self) -> Result<()> {
        self.write_back()
    }

    fn write_back(&mut self) -> Result<()> {
        let Some(original) = self.original.take() else {
            return Ok(());
        };
        fs::write(&self.path, &original).map_err(|e| {
            Error::msg(format!(
                "failed to restore {}: {e}",
                self.path.display()
            ))
        })?;
        tracing::debug!(path = %self.path.display(), "restored build descriptor");
        Ok(())
    }
}

impl Drop for DescriptorPatch {
    fn drop(&mut self) {
        if let Err(e) = self.write_back() {
            tracing::error!("{e}");
        }
    }
}

/// Insert `extras` into the `deps` list of `<kind>("<target>") { ... }`, or
/// add a `deps +=` line at the end of the block when it has none.
fn add_deps(text: &str, target: &str, extras: &[String]) -> Result<String> {
    let header = Regex::new(&format!(
        r#"(?m)^[ \t]*[A-Za-z_][A-Za-z0-9_]*\(\s*"{}"\s*\)\s*\{{"#,
        regex::escape(target)
    ))
    .map_err(|e| Error::msg(format!("invalid target pattern: {e}")))?;
    let Some(m) = header.find(text) else {
        return Err(Error::msg(format!("target \"{target}\" not found")));
    };
    let body_start = m.end();
    let body_end = body_start + matching_brace(&text[body_start..])?;
    let body = &text[body_start..body_end];

    let items: String = extras.iter().map(|t| format!("\n    \"{t}\",")).collect();
    let deps = Regex::new(r"(?m)^[ \t]*deps\s*=\s*\[")
        .map_err(|e| Error::msg(format!("invalid deps pattern: {e}")))?;

    let mut out = String::with_capacity(text.len() + items.len() + 16);
    match deps.find(body) {
        Some(d) => {
            let at = body_start + d.end();
            out.push_str(&text[..at]);
            out.push_str(&items);
            out.push_str(&text[at..]);
        }
        None => {
            out.push_str(&text[..body_end]);
            if !body.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!("  deps += [{items}\n  ]\n"));
            out.push_str(&text[body_end..]);
        }
    }
    Ok(out)
}

/// Offset of the `}` closing a block whose `{` was just consumed. Braces in
/// strings and `#` comments are ignored.
fn matching_brace(s: &str) -> Result<usize> {
    let mut depth = 1usize;
    let mut in_string = false;
    let mut in_comment = false;
    let mut prev = '\0';
    for (i, c) in s.char_indices() {
        if in_comment {
            in_comment = c != '\n';
        } else if in_string {
            in_string = !(c == '"' && prev != '\\');
        } else {
            match c {
                '#' => in_comment = true,
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        prev = c;
    }
    Err(Error::msg("unterminated target block"))
}
