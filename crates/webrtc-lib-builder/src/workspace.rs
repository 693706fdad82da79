use std::cell::RefCell;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::request::BuildRequest;

pub const DEFAULT_DESTINATION: &str = "[BUILD_OUTPUT]/[TARGET]/[PLATFORM]/[CPU]/[CONFIGURATION]";

/// One piece of the destination layout. Placeholders are resolved from the
/// request fields, never by string replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    BuildOutput,
    Target,
    Platform,
    Cpu,
    Configuration,
}

/// Where a build request's outputs live, relative to the preparation root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    build_output: String,
    destination: Vec<Vec<Segment>>,
}

impl OutputLayout {
    /// Parse a destination template such as
    /// `[BUILD_OUTPUT]/[TARGET]_[PLATFORM]/[CPU]/[CONFIGURATION]`.
    /// Unknown placeholders, unbalanced brackets and `..` components are
    /// rejected up front.
    pub fn parse(root: &Path, build_output: &str, template: &str) -> Result<Self> {
        let template = template.trim();
        if template.is_empty() {
            return Err(Error::msg("destination template is empty"));
        }
        if Path::new(template).is_absolute() {
            return Err(Error::msg(format!(
                "destination template '{}' must be relative to the preparation root",
                template
            )));
        }
        validate_rel_like_path(build_output)?;

        let mut destination = Vec::new();
        for component in template.split(['/', '\\']) {
            if component.is_empty() || component == "." {
                continue;
            }
            if component == ".." {
                return Err(Error::msg(format!(
                    "destination template '{}' contains '..'",
                    template
                )));
            }
            destination.push(parse_component(template, component)?);
        }
        if destination.is_empty() {
            return Err(Error::msg(format!(
                "destination template '{}' has no path components",
                template
            )));
        }

        Ok(Self {
            root: root.to_path_buf(),
            build_output: build_output.trim().to_string(),
            destination,
        })
    }

    /// Directory produced by the prepare step for this request.
    pub fn working_dir(&self, req: &BuildRequest) -> Result<PathBuf> {
        req.validate()?;
        if let Some(p) = &req.working_path {
            return Ok(if p.is_absolute() {
                p.clone()
            } else {
                self.root.join(p)
            });
        }
        Ok(self.root.join("out").join(format!(
            "{}_{}_{}_{}",
            req.target_name, req.platform, req.cpu, req.configuration
        )))
    }

    /// Directory the built libraries are copied to.
    pub fn destination(&self, req: &BuildRequest) -> Result<PathBuf> {
        req.validate()?;
        let mut out = self.root.clone();
        for component in &self.destination {
            let mut part = String::new();
            for seg in component {
                part.push_str(match seg {
                    Segment::Literal(s) => s,
                    Segment::BuildOutput => &self.build_output,
                    Segment::Target => &req.target_name,
                    Segment::Platform => &req.platform,
                    Segment::Cpu => &req.cpu,
                    Segment::Configuration => &req.configuration,
                });
            }
            // build_output may itself be nested ("out/libs").
            out.push(part);
        }
        Ok(out)
    }
}

fn parse_component(template: &str, component: &str) -> Result<Vec<Segment>> {
    let mut out = Vec::new();
    let mut rest = component;
    while !rest.is_empty() {
        match rest.find('[') {
            Some(0) => {
                let Some(end) = rest.find(']') else {
                    return Err(Error::msg(format!(
                        "unterminated placeholder in destination template '{}'",
                        template
                    )));
                };
                let seg = match &rest[1..end] {
                    "BUILD_OUTPUT" => Segment::BuildOutput,
                    "TARGET" => Segment::Target,
                    "PLATFORM" => Segment::Platform,
                    "CPU" => Segment::Cpu,
                    "CONFIGURATION" => Segment::Configuration,
                    other => {
                        return Err(Error::msg(format!(
                            "unknown placeholder '[{}]' in destination template '{}' (known: BUILD_OUTPUT, TARGET, PLATFORM, CPU, CONFIGURATION)",
                            other, template
                        )));
                    }
                };
                out.push(seg);
                rest = &rest[end + 1..];
            }
            Some(start) => {
                out.push(literal(template, &rest[..start])?);
                rest = &rest[start..];
            }
            None => {
                out.push(literal(template, rest)?);
                rest = "";
            }
        }
    }
    Ok(out)
}

fn literal(template: &str, s: &str) -> Result<Segment> {
    if s.contains(']') {
        return Err(Error::msg(format!(
            "stray ']' in destination template '{}'",
            template
        )));
    }
    Ok(Segment::Literal(s.to_string()))
}

pub fn validate_rel_like_path(p: &str) -> Result<()> {
    let path = p.trim();
    if path.is_empty() {
        return Err(Error::msg("path is empty"));
    }
    let pb = Path::new(path);
    if pb.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::msg(format!("path '{}' contains '..'", path)));
    }
    Ok(())
}

/// Resolve a user-configured path: absolute paths are used as-is, relative
/// ones are rooted at `base`.
pub fn resolve_user_path(base: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::msg("empty path"));
    }
    let pb = PathBuf::from(p);
    let joined = if pb.is_absolute() { pb } else { base.join(pb) };
    // Drop `.` components.
    Ok(joined.components().collect())
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
}

/// Explicit replacement for a process-wide pushd/popd stack. Nothing here
/// calls `chdir`; commands receive the current entry as their working
/// directory.
#[derive(Debug, Default)]
pub struct DirStack {
    stack: RefCell<Vec<PathBuf>>,
}

impl DirStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, dir: &Path) -> Result<DirGuard<'_>> {
        if !dir.is_dir() {
            return Err(Error::msg(format!(
                "cannot enter {}: not a directory",
                dir.display()
            )));
        }
        tracing::debug!(dir = %dir.display(), "pushd");
        self.stack.borrow_mut().push(dir.to_path_buf());
        Ok(DirGuard { owner: self })
    }

    pub fn current(&self) -> Option<PathBuf> {
        self.stack.borrow().last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }
}

/// Pops its [`DirStack`] entry when dropped.
#[derive(Debug)]
pub struct DirGuard<'a> {
    owner: &'a DirStack,
}

impl DirGuard<'_> {
    pub fn path(&self) -> PathBuf {
        // The entry pushed by this guard stays on top until it is dropped.
        self.owner.current().unwrap_or_default()
    }
}

impl Drop for DirGuard<'_> {
    fn drop(&mut self) {
        if let Some(dir) = self.owner.stack.borrow_mut().pop() {
            tracing::debug!(dir = %dir.display(), "popd");
        }
    }
}
