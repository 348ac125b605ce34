//! Module directive scanner and the filesystem program host.
//!
//! Units are read line by line; only top-level directives matter:
//!
//! ```text
//! import "./util"                 reference, marks a module
//! import { a } from "./util"      reference, marks a module
//! export * from "./util"          reference, marks a module
//! export const x = 1              marks a module
//! declare module "name" { }       ambient declaration (augmentation inside a module)
//! declare global { }              affects the global scope
//! ```

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::resolver::{ProgramHost, UnitMetadata};

/// First string literal on the line, in single or double quotes
fn quoted(line: &str) -> Option<&str> {
    let start = line.find(['"', '\''])?;
    let quote = line[start..].chars().next()?;
    let rest = &line[start + 1..];
    let end = rest.find(quote)?;
    Some(&rest[..end])
}

fn has_keyword(line: &str, keyword: &str) -> bool {
    line.strip_prefix(keyword).is_some_and(|rest| {
        !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_')
    })
}

/// Extract the facts the resolver needs from a unit's text
pub fn parse_directives(text: &str) -> UnitMetadata {
    let mut meta = UnitMetadata::default();
    let mut declares_global = false;
    let mut other_statements = false;
    let mut depth = 0usize;

    for raw in text.lines() {
        let line = raw.trim();
        let top_level = depth == 0;
        depth = brace_depth(line, depth);
        if !top_level || line.is_empty() || line.starts_with("//") || line.starts_with('}') {
            continue;
        }

        if has_keyword(line, "import") {
            meta.is_module = true;
            if let Some(identifier) = quoted(line) {
                push_unique(&mut meta.references, identifier);
            }
        } else if has_keyword(line, "export") {
            meta.is_module = true;
            if line.contains(" from ") {
                if let Some(identifier) = quoted(line) {
                    push_unique(&mut meta.references, identifier);
                }
            }
        } else if let Some(rest) = line.strip_prefix("declare ") {
            let rest = rest.trim_start();
            if has_keyword(rest, "global") {
                declares_global = true;
            } else if has_keyword(rest, "module") {
                match quoted(rest) {
                    Some(name) => push_unique(&mut meta.ambient_modules, name),
                    None => other_statements = true,
                }
            } else {
                other_statements = true;
            }
        } else {
            other_statements = true;
        }
    }

    // a script's declarations are global; a module only touches it through `declare global`
    meta.affects_global_scope = declares_global || (!meta.is_module && other_statements);
    meta
}

fn brace_depth(line: &str, depth: usize) -> usize {
    let mut depth = depth;
    for c in line.chars() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

/// Lexically normalize `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Resolve a relative identifier (`./x`, `../x`) against the importing unit.
///
/// Tries the bare path, then each extension appended, then `index.<ext>` in
/// the directory. Non-relative identifiers never resolve here; they are left
/// to ambient declarations.
pub fn resolve_relative(
    identifier: &str,
    from: &Path,
    extensions: &[String],
    exists: impl Fn(&Path) -> bool,
) -> Option<PathBuf> {
    let relative = identifier == "."
        || identifier == ".."
        || identifier.starts_with("./")
        || identifier.starts_with("../");
    if !relative {
        return None;
    }
    let dir = from.parent().unwrap_or_else(|| Path::new(""));
    let base = normalize(&dir.join(identifier));

    if exists(&base) {
        return Some(base);
    }
    for ext in extensions {
        let mut candidate = base.clone().into_os_string();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        if exists(&candidate) {
            return Some(candidate);
        }
    }
    extensions
        .iter()
        .map(|ext| base.join(format!("index.{ext}")))
        .find(|candidate| exists(candidate))
}

/// [`ProgramHost`] over files on disk.
///
/// Unit texts are read once and memoized; call [`FsProgram::reload`] after a
/// file changed on disk.
pub struct FsProgram {
    units: Vec<PathBuf>,
    unit_set: FxHashSet<PathBuf>,
    extensions: Vec<String>,
    texts: Mutex<FxHashMap<PathBuf, Option<Arc<str>>>>,
}

impl FsProgram {
    pub fn new(units: Vec<PathBuf>, extensions: Vec<String>) -> Self {
        let unit_set = units.iter().cloned().collect();
        Self {
            units,
            unit_set,
            extensions,
            texts: Mutex::new(FxHashMap::default()),
        }
    }

    /// Drop the memoized text of `unit`
    pub fn reload(&self, unit: &Path) {
        self.texts.lock().remove(unit);
    }

    /// Replace the unit list, for files added or removed on disk
    pub fn set_units(&mut self, units: Vec<PathBuf>) {
        self.unit_set = units.iter().cloned().collect();
        self.units = units;
        self.texts.lock().retain(|unit, _| self.unit_set.contains(unit));
    }

    fn text(&self, unit: &Path) -> Option<Arc<str>> {
        if let Some(text) = self.texts.lock().get(unit) {
            return text.clone();
        }
        let text = match fs::read_to_string(unit) {
            Ok(text) => Some(Arc::<str>::from(text)),
            Err(e) => {
                debug!("cannot read {}: {}", unit.display(), e);
                None
            }
        };
        self.texts.lock().insert(unit.to_path_buf(), text.clone());
        text
    }
}

impl ProgramHost for FsProgram {
    fn units(&self) -> Vec<PathBuf> {
        self.units.clone()
    }

    fn source_text(&self, unit: &Path) -> Option<String> {
        self.text(unit).map(|text| text.to_string())
    }

    fn metadata(&self, unit: &Path) -> UnitMetadata {
        self.text(unit)
            .map(|text| parse_directives(&text))
            .unwrap_or_default()
    }

    fn resolve(&self, identifiers: &[String], from: &Path) -> Vec<Option<PathBuf>> {
        identifiers
            .iter()
            .map(|identifier| {
                resolve_relative(identifier, from, &self.extensions, |candidate| {
                    self.unit_set.contains(candidate) || candidate.is_file()
                })
            })
            .collect()
    }
}
