use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

pub mod settings;

pub use settings::Settings;

/// A fully merged build configuration document.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn parse(path: impl Into<PathBuf>, raw: &str) -> Result<Self> {
        let path = path.into();
        let value: Value = toml::from_str(raw)
            .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;
        Ok(Self { path, value })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("invalid config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }
}

/// Overlay `child` onto `base`: tables merge key by key, everything else
/// (arrays included) is replaced.
pub fn merge(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut loader = Loader::default();
    let value = loader.load_file(path)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

#[derive(Default)]
struct Loader {
    active: HashSet<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, path: &Path) -> Result<Value> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.active.insert(key.clone()) {
            return Err(Error::msg(format!(
                "config include cycle detected at {}",
                key.display()
            )));
        }

        let raw = fs::read_to_string(path)
            .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
        let mut value: Value = toml::from_str(&raw)
            .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

        // `extends` only makes sense at the root; the child wins over its base.
        let mut out = Value::Table(Default::default());
        if let Some(tbl) = value.as_table_mut()
            && let Some(base) = tbl.remove("extends")
        {
            let Some(base) = base.as_str() else {
                return Err(Error::msg(format!(
                    "'extends' in {} must be a string",
                    path.display()
                )));
            };
            out = self.load_file(&sibling(path, base))?;
        }

        self.inline_imports(path, &mut value)?;
        merge(&mut out, value);

        self.active.remove(&key);
        Ok(out)
    }

    fn inline_imports(&mut self, file: &Path, value: &mut Value) -> Result<()> {
        let Value::Table(tbl) = value else {
            return Ok(());
        };

        if let Some(imports) = tbl.remove("imports") {
            let Value::Array(entries) = imports else {
                return Err(Error::msg(format!(
                    "'imports' in {} must be an array of strings",
                    file.display()
                )));
            };
            let mut acc = Value::Table(Default::default());
            for entry in entries {
                let Some(rel) = entry.as_str().map(str::trim) else {
                    return Err(Error::msg(format!(
                        "invalid imports entry in {} (expected string)",
                        file.display()
                    )));
                };
                if rel.is_empty() {
                    continue;
                }
                let imported = self.load_file(&sibling(file, rel))?;
                merge(&mut acc, imported);
            }
            merge(&mut acc, Value::Table(std::mem::take(tbl)));
            if let Value::Table(merged) = acc {
                *tbl = merged;
            }
        }

        for (_, child) in tbl.iter_mut() {
            self.inline_imports(file, child)?;
        }
        Ok(())
    }
}

fn sibling(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}
