use std::fmt;
use std::path::PathBuf;

use crate::config::Settings;
use crate::error::{Error, Result};

/// Everything one pipeline invocation needs to know about what to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub target_name: String,
    pub subtargets: Vec<String>,
    pub platform: String,
    pub cpu: String,
    pub configuration: String,
    pub combine_libs: bool,
    /// Overrides the default `out/<target>_<platform>_<cpu>_<configuration>`
    /// working directory. Relative paths are rooted at the preparation root.
    pub working_path: Option<PathBuf>,
}

impl BuildRequest {
    /// Build a request using the configured sub-targets and combine flag for
    /// `target`.
    pub fn for_target(
        settings: &Settings,
        target: &str,
        platform: &str,
        cpu: &str,
        configuration: &str,
    ) -> Self {
        let target_cfg = settings.target(target);
        Self {
            target_name: target.to_string(),
            subtargets: target_cfg.subtargets,
            platform: platform.to_string(),
            cpu: cpu.to_string(),
            configuration: configuration.to_string(),
            combine_libs: target_cfg.combine_libs,
            working_path: None,
        }
    }

    /// Every field that ends up in a path must be a single plain component.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("target", &self.target_name),
            ("platform", &self.platform),
            ("cpu", &self.cpu),
            ("configuration", &self.configuration),
        ] {
            let v = value.trim();
            if v.is_empty() {
                return Err(Error::msg(format!("build request {name} is empty")));
            }
            if v != value.as_str()
                || v == "."
                || v == ".."
                || v.contains(['/', '\\', '[', ']'])
            {
                return Err(Error::msg(format!(
                    "build request {name} '{value}' is not a plain path component"
                )));
            }
        }
        Ok(())
    }

    pub fn key(&self) -> TupleKey {
        TupleKey {
            target: self.target_name.clone(),
            platform: self.platform.clone(),
            cpu: self.cpu.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

impl fmt::Display for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target: {}; platform: {}; cpu: {}; configuration: {}",
            self.target_name, self.platform, self.cpu, self.configuration
        )
    }
}

/// (target, platform, cpu, configuration)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleKey {
    pub target: String,
    pub platform: String,
    pub cpu: String,
    pub configuration: String,
}

impl TupleKey {
    pub fn new(target: &str, platform: &str, cpu: &str, configuration: &str) -> Self {
        Self {
            target: target.to_string(),
            platform: platform.to_string(),
            cpu: cpu.to_string(),
            configuration: configuration.to_string(),
        }
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}   {}   {}   {}",
            self.target, self.platform, self.cpu, self.configuration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(cpu: &str) -> BuildRequest {
        BuildRequest {
            target_name: "webrtc".into(),
            subtargets: vec!["webrtc".into()],
            platform: "win".into(),
            cpu: cpu.into(),
            configuration: "Release".into(),
            combine_libs: false,
            working_path: None,
        }
    }

    #[test]
    fn plain_components_validate() {
        req("x64").validate().expect("valid request");
    }

    #[test]
    fn separators_and_parent_dirs_are_rejected() {
        for bad in ["", "..", "x64/../..", "x\\64", " x64", "[CPU]"] {
            assert!(req(bad).validate().is_err(), "'{bad}' should be rejected");
        }
    }
}
