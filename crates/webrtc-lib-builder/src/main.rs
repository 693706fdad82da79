use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use webrtc_lib_builder::config::{self, Settings};
use webrtc_lib_builder::executor::ShellRunner;
use webrtc_lib_builder::logging::{self, LogFormat};
use webrtc_lib_builder::pipeline::Builder;
use webrtc_lib_builder::request::BuildRequest;
use webrtc_lib_builder::summary::{self, Summary};
use webrtc_lib_builder::{Error, ErrorCode, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Stream tool output and debug logs
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build, merge and copy libraries for every requested combination
    Build {
        /// Path to a build configuration TOML
        config: PathBuf,
        /// Targets to build (e.g. webrtc, ortc)
        #[arg(long = "target", short = 't', required = true, num_args = 1..)]
        targets: Vec<String>,
        #[arg(long = "platform", short = 'p', required = true, num_args = 1..)]
        platforms: Vec<String>,
        #[arg(long = "cpu", short = 'c', required = true, num_args = 1..)]
        cpus: Vec<String>,
        #[arg(long = "configuration", required = true, num_args = 1..)]
        configurations: Vec<String>,
        /// Generated project folder, relative to the preparation root
        #[arg(long)]
        working_path: Option<PathBuf>,
        /// Summary written by the prepare run; combinations whose prepare
        /// failed are skipped
        #[arg(long)]
        prepare_summary: Option<PathBuf>,
        /// Write the run summary as JSON
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },
    /// Load config and print the fully-resolved TOML (after imports/extends)
    Resolve {
        /// Path to a build configuration TOML
        config: PathBuf,
    },
    /// List configured targets with their sub-targets
    Targets {
        /// Path to a build configuration TOML
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    if let Err(e) = logging::init(args.verbose, args.log_format) {
        eprintln!("ERROR: {e}");
        return ExitCode::FAILURE;
    }

    let result = match args.cmd {
        Command::Build {
            config,
            targets,
            platforms,
            cpus,
            configurations,
            working_path,
            prepare_summary,
            summary_json,
        } => cmd_build(
            &config,
            &BuildMatrix {
                targets,
                platforms,
                cpus,
                configurations,
            },
            working_path,
            prepare_summary.as_deref(),
            summary_json.as_deref(),
            args.verbose,
        ),
        Command::Resolve { config } => cmd_resolve(&config).map(|()| ErrorCode::NoError),
        Command::Targets { config } => cmd_targets(&config).map(|()| ErrorCode::NoError),
    };

    match result {
        Ok(code) => ExitCode::from(code.exit_code()),
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

struct BuildMatrix {
    targets: Vec<String>,
    platforms: Vec<String>,
    cpus: Vec<String>,
    configurations: Vec<String>,
}

impl BuildMatrix {
    fn requests(&self, settings: &Settings, working_path: Option<&Path>) -> Vec<BuildRequest> {
        let mut out = Vec::new();
        for target in &self.targets {
            for platform in &self.platforms {
                for cpu in &self.cpus {
                    for configuration in &self.configurations {
                        let mut req = BuildRequest::for_target(
                            settings,
                            target,
                            platform,
                            cpu,
                            configuration,
                        );
                        req.working_path = working_path.map(Path::to_path_buf);
                        out.push(req);
                    }
                }
            }
        }
        out
    }
}

fn cmd_build(
    path: &Path,
    matrix: &BuildMatrix,
    working_path: Option<PathBuf>,
    prepare_summary: Option<&Path>,
    summary_json: Option<&Path>,
    verbose: bool,
) -> Result<ErrorCode> {
    let started = Instant::now();
    let doc = config::load(path)?;
    let settings = Settings::from_doc(&doc)?;
    let requests = matrix.requests(&settings, working_path.as_deref());

    let mut summary = match prepare_summary {
        Some(p) => summary::load_json(p)?,
        None => Summary::new(),
    };
    let builder = Builder::new(settings, Box::new(ShellRunner::new(verbose)));

    let mut first_failure = None;
    for req in &requests {
        let key = req.key();
        if summary.was_prepare_failed(&key) {
            tracing::warn!("Skipping build for {req}: prepare failed");
            continue;
        }
        let outcome = builder.run(req);
        summary.record("build", &key, outcome.code, outcome.elapsed);
        if !outcome.is_success() && first_failure.is_none() {
            first_failure = Some(outcome.code);
        }
    }

    let total = started.elapsed();
    summary.print(total);
    if let Some(out) = summary_json {
        let body = serde_json::to_string_pretty(&summary.to_json(total))
            .map_err(|e| Error::msg(format!("failed to encode summary: {e}")))?;
        std::fs::write(out, body)
            .map_err(|e| Error::msg(format!("failed to write {}: {e}", out.display())))?;
    }
    Ok(first_failure.unwrap_or(ErrorCode::NoError))
}

fn cmd_resolve(path: &Path) -> Result<()> {
    let doc = config::load(path)?;
    let s = toml::to_string_pretty(&doc.value)
        .map_err(|e| Error::msg(format!("failed to render config: {e}")))?;
    print!("{s}");
    Ok(())
}

fn cmd_targets(path: &Path) -> Result<()> {
    let doc = config::load(path)?;
    let settings = Settings::from_doc(&doc)?;
    if settings.targets.is_empty() {
        println!("(no targets configured; every target builds itself without merging)");
        return Ok(());
    }
    for name in settings.targets.keys() {
        let t = settings.target(name);
        println!(
            "{:<16} combine_libs={:<5}  {}",
            name,
            t.combine_libs,
            t.subtargets.join(" ")
        );
    }
    Ok(())
}
