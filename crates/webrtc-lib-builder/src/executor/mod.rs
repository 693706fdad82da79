use std::fmt;
use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;

use crate::error::{Error, Result};

/// An environment-setup / payload / environment-teardown sequence that runs
/// as one unit in a single shell, so the setup's environment is visible to
/// the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandChain {
    pub setup: Option<String>,
    pub payload: String,
    pub teardown: Option<String>,
}

impl CommandChain {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            setup: None,
            payload: payload.into(),
            teardown: None,
        }
    }

    pub fn with_setup(mut self, setup: Option<String>) -> Self {
        self.setup = setup.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_teardown(mut self, teardown: Option<String>) -> Self {
        self.teardown = teardown.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn commands(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(3);
        out.extend(self.setup.as_deref());
        out.push(self.payload.as_str());
        out.extend(self.teardown.as_deref());
        out
    }

    /// Steps joined with `&&`: a failing setup skips the payload and a
    /// failing teardown fails the unit.
    pub fn to_shell_line(&self) -> String {
        self.commands().join(" && ")
    }
}

impl fmt::Display for CommandChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_shell_line())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStatus {
    code: Option<i32>,
}

impl ChainStatus {
    pub fn from_code(code: Option<i32>) -> Self {
        Self { code }
    }

    pub fn success(self) -> bool {
        self.code == Some(0)
    }

    /// `None` when the child was killed by a signal.
    pub fn code(self) -> Option<i32> {
        self.code
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(c) => write!(f, "exit code {c}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Runs command chains. `Err` means the chain could not be started at all;
/// a chain that ran and failed is `Ok` with a non-success status.
pub trait CommandRunner {
    fn run(&self, chain: &CommandChain, cwd: &Path) -> Result<ChainStatus>;
}

/// Runs chains through the platform shell (`cmd /C` or `sh -c`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner {
    verbose: bool,
}

impl ShellRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, chain: &CommandChain, cwd: &Path) -> Result<ChainStatus> {
        let line = chain.to_shell_line();
        tracing::debug!(cwd = %cwd.display(), command = %line, "running command chain");

        let mut cmd = shell_command(&line);
        cmd.current_dir(cwd).stdin(Stdio::null());

        if !self.verbose {
            let status = cmd
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map_err(|e| Error::msg(format!("spawn failed: {e}")))?;
            return Ok(ChainStatus::from_code(status.code()));
        }

        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::msg(format!("spawn failed: {e}")))?;

        let (tx, rx) = mpsc::channel::<String>();
        let mut pumps = Vec::new();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            pumps.push(std::thread::spawn(move || read_output_stream(out, tx)));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            pumps.push(std::thread::spawn(move || read_output_stream(err, tx)));
        }
        drop(tx);

        for raw in rx {
            let line = strip_terminal_codes(&raw);
            if !line.is_empty() {
                tracing::info!(target: "process", "{line}");
            }
        }
        for pump in pumps {
            let _ = pump.join();
        }

        let status = child
            .wait()
            .map_err(|e| Error::msg(format!("wait failed: {e}")))?;
        Ok(ChainStatus::from_code(status.code()))
    }
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    use std::os::windows::process::CommandExt;

    let mut cmd = Command::new("cmd");
    // /S keeps cmd from re-parsing the quotes around the whole line.
    cmd.arg("/S").arg("/C").raw_arg(format!("\"{line}\""));
    cmd
}

#[cfg(not(windows))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

/// Quote a command-line argument when it contains whitespace.
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}

fn read_output_stream<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    const MAX_PENDING_BYTES: usize = 16 * 1024;
    let mut r = BufReader::new(reader);
    let mut buf = [0u8; 8192];
    let mut pending = Vec::with_capacity(1024);

    let flush = |pending: &mut Vec<u8>| {
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(pending).into_owned());
            pending.clear();
        }
    };

    loop {
        let n = match r.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                flush(&mut pending);
            } else {
                pending.push(b);
                if pending.len() >= MAX_PENDING_BYTES {
                    flush(&mut pending);
                }
            }
        }
    }
    flush(&mut pending);
}

/// Drop ANSI escape sequences (CSI and OSC) and other control characters
/// from one line of tool output. Tabs become spaces.
pub fn strip_terminal_codes(input: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Text,
        Esc,
        Csi,
        Osc,
    }

    let mut out = String::with_capacity(input.len());
    let mut state = State::Text;
    for c in input.chars() {
        state = match state {
            State::Text if c == '\x1b' => State::Esc,
            State::Text => {
                if c == '\t' {
                    out.push(' ');
                } else if !c.is_control() {
                    out.push(c);
                }
                State::Text
            }
            State::Esc => match c {
                '[' => State::Csi,
                ']' => State::Osc,
                _ => State::Text,
            },
            State::Csi if ('@'..='~').contains(&c) => State::Text,
            State::Csi => State::Csi,
            State::Osc if c == '\x07' || c == '\\' => State::Text,
            State::Osc => State::Osc,
        };
    }
    out.trim_end().to_string()
}
