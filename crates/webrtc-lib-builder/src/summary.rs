use std::fs;
use std::path::Path;
use std::time::Duration;

use crossterm::style::Stylize;

use crate::error::{Error, ErrorCode, Result};
use crate::request::TupleKey;

/// Action that never appears in the rendered report.
pub const HIDDEN_ACTION: &str = "cleanup";
pub const PREPARE_ACTION: &str = "prepare";

const FRAME_WIDTH: usize = 91;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryEntry {
    pub code: ErrorCode,
    pub elapsed: Duration,
}

/// Outcome of every (action, target, platform, cpu, configuration) seen
/// during a run, in the order actions and tuples were first recorded.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    actions: Vec<(String, Vec<(TupleKey, SummaryEntry)>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Frame,
    Action,
    Success,
    Failure,
}

impl Summary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-recording a tuple overwrites its entry without moving it.
    pub fn record(&mut self, action: &str, key: &TupleKey, code: ErrorCode, elapsed: Duration) {
        let entry = SummaryEntry { code, elapsed };
        let idx = match self.actions.iter().position(|(a, _)| a == action) {
            Some(i) => i,
            None => {
                self.actions.push((action.to_string(), Vec::new()));
                self.actions.len() - 1
            }
        };
        let bucket = &mut self.actions[idx].1;
        match bucket.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = entry,
            None => bucket.push((key.clone(), entry)),
        }
    }

    pub fn get(&self, action: &str, key: &TupleKey) -> Option<SummaryEntry> {
        self.actions
            .iter()
            .find(|(a, _)| a == action)?
            .1
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, e)| *e)
    }

    /// True only when a prepare result exists for `key` and it failed.
    pub fn was_prepare_failed(&self, key: &TupleKey) -> bool {
        self.get(PREPARE_ACTION, key)
            .is_some_and(|e| !e.code.is_success())
    }

    /// Plain-text report; the grand total is always the last line.
    pub fn render(&self, total: Duration) -> String {
        let mut out = String::new();
        for (_, line) in self.lines(total) {
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    pub fn print(&self, total: Duration) {
        for (tone, line) in self.lines(total) {
            let line = line.as_str();
            match tone {
                Tone::Frame => println!("{}", line.yellow()),
                Tone::Action => println!("{}", line.white()),
                Tone::Success => println!("{}", line.green()),
                Tone::Failure => println!("{}", line.red()),
            }
        }
    }

    fn lines(&self, total: Duration) -> Vec<(Tone, String)> {
        let title = " SUMMARY ";
        let pad = FRAME_WIDTH.saturating_sub(title.len()) / 2;
        let mut out = vec![
            (Tone::Frame, String::new()),
            (Tone::Frame, format!("{}{title}{}", "=".repeat(pad), "=".repeat(pad))),
            (Tone::Frame, String::new()),
        ];
        for (action, bucket) in &self.actions {
            if action == HIDDEN_ACTION {
                continue;
            }
            out.push((Tone::Action, format!("ACTION: {action}")));
            for (key, entry) in bucket {
                let time = format_elapsed_hms(entry.elapsed);
                if entry.code.is_success() {
                    out.push((
                        Tone::Success,
                        format!("     SUCCESSFUL: {key}      execution time: {time}"),
                    ));
                } else {
                    out.push((
                        Tone::Failure,
                        format!("         FAILED: {key}      execution time: {time}"),
                    ));
                }
            }
            out.push((Tone::Frame, String::new()));
            out.push((Tone::Frame, "-".repeat(FRAME_WIDTH)));
        }
        out.push((
            Tone::Frame,
            format!("Total execution time: {}", format_elapsed_hms(total)),
        ));
        out
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let mut summary = Summary::new();
        let actions = value["actions"]
            .as_array()
            .ok_or_else(|| Error::msg("summary has no 'actions' array"))?;
        for action in actions {
            let name = action["action"]
                .as_str()
                .ok_or_else(|| Error::msg("summary action without a name"))?;
            for r in action["results"].as_array().into_iter().flatten() {
                let field = |k: &str| {
                    r[k].as_str()
                        .ok_or_else(|| Error::msg(format!("summary result without '{k}'")))
                };
                let key = TupleKey::new(
                    field("target")?,
                    field("platform")?,
                    field("cpu")?,
                    field("configuration")?,
                );
                let code = if r["success"].as_bool().unwrap_or(false) {
                    ErrorCode::NoError
                } else {
                    r["code"]
                        .as_u64()
                        .and_then(|c| u8::try_from(c).ok())
                        .and_then(ErrorCode::from_exit_code)
                        .filter(|c| !c.is_success())
                        .unwrap_or(ErrorCode::BuildFailed)
                };
                let elapsed = Duration::from_millis(r["elapsed_ms"].as_u64().unwrap_or(0));
                summary.record(name, &key, code, elapsed);
            }
        }
        Ok(summary)
    }

    pub fn to_json(&self, total: Duration) -> serde_json::Value {
        let actions: Vec<serde_json::Value> = self
            .actions
            .iter()
            .map(|(action, bucket)| {
                let results: Vec<serde_json::Value> = bucket
                    .iter()
                    .map(|(key, entry)| {
                        serde_json::json!({
                            "target": key.target,
                            "platform": key.platform,
                            "cpu": key.cpu,
                            "configuration": key.configuration,
                            "success": entry.code.is_success(),
                            "code": entry.code.exit_code(),
                            "result": entry.code.describe(),
                            "elapsed_ms": entry.elapsed.as_millis() as u64,
                        })
                    })
                    .collect();
                serde_json::json!({ "action": action, "results": results })
            })
            .collect();
        serde_json::json!({
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "total_elapsed_ms": total.as_millis() as u64,
            "actions": actions,
        })
    }
}

/// Read a summary previously written by [`Summary::to_json`], typically by
/// the prepare run.
pub fn load_json(path: &Path) -> Result<Summary> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| Error::msg(format!("invalid summary JSON in {}: {e}", path.display())))?;
    Summary::from_json(&value)
        .map_err(|e| Error::msg(format!("{}: {e}", path.display())))
}

pub fn format_elapsed_hms(elapsed: Duration) -> String {
    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
