use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::{Error, Result};
use crate::workspace::{self, OutputLayout};

fn default_true() -> bool {
    true
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Source checkout the prepare step generated projects into.
    pub preparation_root: String,
    /// Directory the tool was launched from; backups are rooted here.
    pub user_root: String,
    pub build_output: String,
    pub destination: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            preparation_root: ".".into(),
            user_root: ".".into(),
            build_output: "webrtc_output".into(),
            destination: workspace::DEFAULT_DESTINATION.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ninja: String,
    /// `0` means one job per logical CPU; unset leaves ninja's own default.
    pub ninja_jobs: Option<usize>,
    pub vcvarsall: Option<String>,
    /// Directory holding `<cpu>/lib.exe`.
    pub msvc_bin: Option<String>,
    /// Explicit archiver; wins over `msvc_bin`.
    pub archiver: Option<String>,
    pub msbuild: String,
    pub env_teardown: Option<String>,
    pub host_cpu: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ninja: "ninja".into(),
            ninja_jobs: None,
            vcvarsall: None,
            msvc_bin: None,
            archiver: None,
            msbuild: "msbuild".into(),
            env_teardown: None,
            host_cpu: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// host cpu -> target cpu -> vcvarsall argument
    pub env_setup_args: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        let table = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        let mut env_setup_args = BTreeMap::new();
        env_setup_args.insert(
            "x64".to_string(),
            table(&[
                ("x64", "amd64"),
                ("x86", "amd64_x86"),
                ("arm", "amd64_arm"),
                ("arm64", "amd64_arm64"),
            ]),
        );
        env_setup_args.insert(
            "x86".to_string(),
            table(&[
                ("x64", "x86_amd64"),
                ("x86", "x86"),
                ("arm", "x86_arm"),
                ("arm64", "x86_arm64"),
            ]),
        );
        Self { env_setup_args }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    pub subtargets: Vec<String>,
    pub combine_libs: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            subtargets: Vec::new(),
            combine_libs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Scanned for objects, relative to the working directory.
    pub folders: Vec<String>,
    /// Skipped entirely while scanning, relative to the working directory.
    pub excluded_subfolders: Vec<String>,
    pub extensions: Vec<String>,
    pub ignore_warnings: Vec<u32>,
    pub max_batch_chars: usize,
    pub library_prefix: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            folders: strings(&["obj"]),
            excluded_subfolders: Vec::new(),
            extensions: strings(&["obj", "o"]),
            ignore_warnings: vec![4221, 4006],
            max_batch_chars: crate::collect::DEFAULT_MAX_BATCH_CHARS,
            library_prefix: "webrtc".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relative to the preparation root.
    pub path: String,
    /// Only builds of this target patch the descriptor.
    pub target: String,
    pub extra_targets: Vec<String>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "BUILD.gn".into(),
            target: "webrtc".into(),
            extra_targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    pub library_extensions: Vec<String>,
    pub symbol_extensions: Vec<String>,
    pub symbols_dir: String,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            library_extensions: strings(&["lib", "dll"]),
            symbol_extensions: strings(&["pdb"]),
            symbols_dir: "pdbs".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct BackupConfig {
    #[serde(default = "default_true")]
    enabled: bool,
    path: Option<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct WrapperConfig {
    #[serde(default = "default_true")]
    enabled: bool,
    template_dir: Option<String>,
    work_dir: Option<String>,
    /// target -> platform -> solution file name
    solutions: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            template_dir: None,
            work_dir: None,
            solutions: BTreeMap::new(),
        }
    }
}

/// Optional pipeline stages keep "switched off" apart from "switched on but
/// unusable" so the latter fails loudly when the stage is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feature<T> {
    Disabled,
    Enabled(T),
    Misconfigured(String),
}

impl<T> Feature<T> {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Feature::Enabled(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperSettings {
    pub template_dir: PathBuf,
    pub work_dir: PathBuf,
    pub solutions: BTreeMap<String, BTreeMap<String, String>>,
}

impl WrapperSettings {
    pub fn solution_for(&self, target: &str, platform: &str) -> Option<&str> {
        self.solutions
            .get(target)?
            .get(platform)
            .map(String::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Resolved, typed view of a [`ConfigDoc`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub preparation_root: PathBuf,
    pub user_root: PathBuf,
    pub layout: OutputLayout,
    pub tools: ToolsConfig,
    pub toolchain: ToolchainConfig,
    pub targets: BTreeMap<String, TargetConfig>,
    pub merge: MergeConfig,
    pub descriptor: Option<DescriptorConfig>,
    pub copy: CopyConfig,
    pub backup: Feature<PathBuf>,
    pub wrapper: Feature<WrapperSettings>,
}

impl Settings {
    /// Relative workspace roots are resolved against the current directory.
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
        Self::from_doc_in(doc, &cwd)
    }

    pub fn from_doc_in(doc: &ConfigDoc, base: &Path) -> Result<Self> {
        let ws: WorkspaceConfig = doc.deserialize_path("workspace")?.unwrap_or_default();
        let preparation_root = workspace::resolve_user_path(base, &ws.preparation_root)?;
        let user_root = workspace::resolve_user_path(base, &ws.user_root)?;
        let layout = OutputLayout::parse(&preparation_root, &ws.build_output, &ws.destination)?;

        let tools: ToolsConfig = doc.deserialize_path("tools")?.unwrap_or_default();
        let toolchain: ToolchainConfig = doc.deserialize_path("toolchain")?.unwrap_or_default();
        let targets: BTreeMap<String, TargetConfig> =
            doc.deserialize_path("targets")?.unwrap_or_default();

        let merge: MergeConfig = doc.deserialize_path("merge")?.unwrap_or_default();
        if merge.max_batch_chars == 0 {
            return Err(Error::msg("merge.max_batch_chars must be greater than 0"));
        }
        if merge.library_prefix.trim().is_empty() {
            return Err(Error::msg("merge.library_prefix is empty"));
        }

        let descriptor = doc
            .deserialize_path::<DescriptorConfig>("descriptor")?
            .filter(|d| d.enabled);
        if let Some(d) = &descriptor {
            workspace::validate_rel_like_path(&d.path)?;
        }

        let copy: CopyConfig = doc.deserialize_path("copy")?.unwrap_or_default();
        workspace::validate_rel_like_path(&copy.symbols_dir)?;

        let backup = match doc.deserialize_path::<BackupConfig>("backup")? {
            None => Feature::Disabled,
            Some(b) if !b.enabled => Feature::Disabled,
            Some(b) => match b.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                Some(p) => Feature::Enabled(workspace::resolve_user_path(&user_root, p)?),
                None => {
                    Feature::Misconfigured("backup is enabled but backup.path is not set".into())
                }
            },
        };

        let wrapper = match doc.deserialize_path::<WrapperConfig>("wrapper")? {
            None => Feature::Disabled,
            Some(w) if !w.enabled => Feature::Disabled,
            Some(w) => wrapper_feature(&preparation_root, w)?,
        };

        Ok(Self {
            preparation_root,
            user_root,
            layout,
            tools,
            toolchain,
            targets,
            merge,
            descriptor,
            copy,
            backup,
            wrapper,
        })
    }

    /// Sub-targets and combine flag for `name`. Unknown targets build
    /// themselves and are not merged.
    pub fn target(&self, name: &str) -> TargetConfig {
        match self.targets.get(name) {
            Some(cfg) if !cfg.subtargets.is_empty() => cfg.clone(),
            Some(cfg) => TargetConfig {
                subtargets: vec![name.to_string()],
                combine_libs: cfg.combine_libs,
            },
            None => TargetConfig {
                subtargets: vec![name.to_string()],
                combine_libs: false,
            },
        }
    }
}

fn wrapper_feature(root: &Path, w: WrapperConfig) -> Result<Feature<WrapperSettings>> {
    let Some(template_dir) = w
        .template_dir
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Ok(Feature::Misconfigured(
            "wrapper is enabled but wrapper.template_dir is not set".into(),
        ));
    };
    let template_dir = workspace::resolve_user_path(root, template_dir)?;
    let work_dir = match w.work_dir.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(p) => workspace::resolve_user_path(root, p)?,
        None => root.to_path_buf(),
    };
    for (target, platforms) in &w.solutions {
        for (platform, solution) in platforms {
            let sol = Path::new(solution.trim());
            if sol.is_absolute() || sol.components().count() > 1 {
                return Err(Error::msg(format!(
                    "wrapper.solutions.{target}.{platform} must be a bare file name, got '{solution}'"
                )));
            }
        }
    }
    Ok(Feature::Enabled(WrapperSettings {
        template_dir,
        work_dir,
        solutions: w.solutions,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(raw: &str) -> Result<Settings> {
        let doc = ConfigDoc::parse("<mem>", raw)?;
        Settings::from_doc_in(&doc, Path::new("/work"))
    }

    #[test]
    fn defaults_apply_without_tables() {
        let s = settings("").expect("settings");
        assert_eq!(s.preparation_root.to_string_lossy(), "/work");
        assert_eq!(s.merge.max_batch_chars, 7000);
        assert_eq!(s.merge.library_prefix, "webrtc");
        assert!(s.descriptor.is_none());
        assert_eq!(s.backup, Feature::Disabled);
        assert_eq!(s.wrapper, Feature::Disabled);
    }

    #[test]
    fn unknown_target_defaults_to_itself_without_combine() {
        let s = settings(
            r#"
[targets.webrtc]
subtargets = ["webrtc", "webrtc_extras"]
combine_libs = true
"#,
        )
        .expect("settings");
        assert_eq!(
            s.target("webrtc"),
            TargetConfig {
                subtargets: vec!["webrtc".into(), "webrtc_extras".into()],
                combine_libs: true,
            }
        );
        assert_eq!(
            s.target("ortc"),
            TargetConfig {
                subtargets: vec!["ortc".into()],
                combine_libs: false,
            }
        );
    }

    #[test]
    fn backup_disabled_and_misconfigured_are_distinct() {
        let off = settings("[backup]\nenabled = false\npath = \"bk\"\n").expect("settings");
        assert_eq!(off.backup, Feature::Disabled);

        let broken = settings("[backup]\n").expect("settings");
        assert!(matches!(broken.backup, Feature::Misconfigured(_)));

        let on = settings("[workspace]\nuser_root = \"/home/me\"\n[backup]\npath = \"bk\"\n")
            .expect("settings");
        assert_eq!(on.backup, Feature::Enabled(PathBuf::from("/home/me/bk")));
    }

    #[test]
    fn wrapper_requires_template_dir() {
        let broken = settings("[wrapper]\nenabled = true\n").expect("settings");
        assert!(matches!(broken.wrapper, Feature::Misconfigured(_)));

        let on = settings(
            r#"
[workspace]
preparation_root = "/src"

[wrapper]
template_dir = "templates"

[wrapper.solutions.webrtc]
winuwp = "WebRtc.Universal.sln"
"#,
        )
        .expect("settings");
        let Feature::Enabled(w) = on.wrapper else {
            panic!("wrapper should be enabled");
        };
        assert_eq!(w.template_dir, PathBuf::from("/src/templates"));
        assert_eq!(w.work_dir, PathBuf::from("/src"));
        assert_eq!(w.solution_for("webrtc", "winuwp"), Some("WebRtc.Universal.sln"));
        assert_eq!(w.solution_for("webrtc", "win"), None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(settings("[merge]\nmax_batch_chars = 0\n").is_err());
        assert!(settings("[workspace]\ndestination = \"[NOPE]\"\n").is_err());
        assert!(settings("[descriptor]\npath = \"../BUILD.gn\"\n").is_err());
        assert!(
            settings(
                "[wrapper]\ntemplate_dir = \"t\"\n[wrapper.solutions.webrtc]\nwin = \"a/b.sln\"\n"
            )
            .is_err()
        );
    }
}
