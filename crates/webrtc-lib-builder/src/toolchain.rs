use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::config::settings::ToolsConfig;
use crate::error::{Error, Result};
use crate::executor::quote_arg;

/// CPU name of the machine running the tool, in the vocabulary the
/// environment-setup table uses.
pub fn detect_host_cpu() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "x86" => "x86",
        "aarch64" => "arm64",
        "arm" => "arm",
        other => other,
    }
}

/// Command lines for the external tools, built from configuration.
#[derive(Debug, Clone)]
pub struct Toolchain {
    tools: ToolsConfig,
    env_setup_args: BTreeMap<String, BTreeMap<String, String>>,
    host_cpu: String,
    root: PathBuf,
}

impl Toolchain {
    pub fn from_settings(settings: &Settings) -> Self {
        let host_cpu = settings
            .tools
            .host_cpu
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| detect_host_cpu())
            .to_string();
        Self {
            tools: settings.tools.clone(),
            env_setup_args: settings.toolchain.env_setup_args.clone(),
            host_cpu,
            root: settings.preparation_root.clone(),
        }
    }

    pub fn host_cpu(&self) -> &str {
        &self.host_cpu
    }

    /// `"<vcvarsall>" <host>_<target>`, or `None` when no setup script is
    /// configured.
    pub fn env_setup(&self, target_cpu: &str) -> Result<Option<String>> {
        let Some(script) = self.tools.vcvarsall.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if script.is_empty() {
            return Ok(None);
        }
        let args = self
            .env_setup_args
            .get(&self.host_cpu)
            .and_then(|t| t.get(target_cpu))
            .ok_or_else(|| {
                Error::msg(format!(
                    "no environment setup arguments for host cpu '{}' and target cpu '{}'",
                    self.host_cpu, target_cpu
                ))
            })?;
        Ok(Some(format!(
            "\"{}\" {}",
            self.tool_path(script).display(),
            args
        )))
    }

    pub fn env_teardown(&self) -> Option<String> {
        self.tools
            .env_teardown
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
    }

    pub fn archiver(&self, target_cpu: &str) -> PathBuf {
        if let Some(explicit) = self.tools.archiver.as_deref().map(str::trim)
            && !explicit.is_empty()
        {
            return self.tool_path(explicit);
        }
        match self.tools.msvc_bin.as_deref().map(str::trim) {
            Some(bin) if !bin.is_empty() => self.tool_path(bin).join(target_cpu).join("lib.exe"),
            _ => PathBuf::from("lib.exe"),
        }
    }

    /// `<ninja> [-j N] <target>`
    pub fn ninja_command(&self, target: &str) -> String {
        let mut out = quote_arg(&self.tool_path(&self.tools.ninja).to_string_lossy());
        if let Some(jobs) = self.tools.ninja_jobs {
            let jobs = if jobs == 0 {
                num_cpus::get().max(1)
            } else {
                jobs
            };
            out.push_str(&format!(" -j {jobs}"));
        }
        out.push(' ');
        out.push_str(&quote_arg(target));
        out
    }

    /// `<msbuild> <solution> /p:Configuration=<cfg> /p:Platform=<platform>`
    pub fn msbuild_command(&self, solution: &Path, configuration: &str, cpu: &str) -> String {
        format!(
            "{} {} /p:Configuration={} /p:Platform={}",
            quote_arg(&self.tool_path(&self.tools.msbuild).to_string_lossy()),
            quote_arg(&solution.to_string_lossy()),
            configuration,
            msbuild_platform(cpu)
        )
    }

    // Bare names ("ninja") stay bare so the shell resolves them on PATH;
    // anything that looks like a path is rooted at the preparation root.
    fn tool_path(&self, raw: &str) -> PathBuf {
        let p = Path::new(raw);
        if p.is_absolute() || p.components().count() == 1 {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

/// Solution platform names differ from GN cpu names for 32-bit x86.
pub fn msbuild_platform(cpu: &str) -> &str {
    match cpu {
        "x86" => "Win32",
        other => other,
    }
}
