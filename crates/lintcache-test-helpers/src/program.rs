use lintcache_core::resolver::{ProgramHost, UnitMetadata};
use lintcache_core::source::{parse_directives, resolve_relative};
use lintcache_core::ProgramStateOptions;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory virtual units live in unless given an absolute path
pub const PROJECT_ROOT: &str = "/project";

/// Options for the project rooted at [`PROJECT_ROOT`]
pub fn options() -> ProgramStateOptions {
    ProgramStateOptions::new(Path::new(PROJECT_ROOT).join("lintcache.yaml"))
}

/// In-memory program; units are ordered by path
#[derive(Debug, Clone)]
pub struct VirtualProgram {
    files: BTreeMap<PathBuf, String>,
    extensions: Vec<String>,
}

impl VirtualProgram {
    /// Build a program from `(path, text)` pairs; relative paths are placed under [`PROJECT_ROOT`]
    pub fn new(files: &[(&str, &str)]) -> Self {
        let mut program = Self {
            files: BTreeMap::new(),
            extensions: vec!["ts".to_string(), "tsx".to_string(), "js".to_string()],
        };
        for (path, text) in files {
            program.write(path, text);
        }
        program
    }

    /// Absolute path of a unit name as used by this program
    pub fn path(name: &str) -> PathBuf {
        Path::new(PROJECT_ROOT).join(name)
    }

    /// Create or replace a unit, returning its path
    pub fn write(&mut self, name: &str, text: &str) -> PathBuf {
        let path = Self::path(name);
        self.files.insert(path.clone(), text.to_string());
        path
    }

    /// Remove a unit, returning its path
    pub fn remove(&mut self, name: &str) -> PathBuf {
        let path = Self::path(name);
        self.files.remove(&path);
        path
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for VirtualProgram {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl ProgramHost for VirtualProgram {
    fn units(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    fn source_text(&self, unit: &Path) -> Option<String> {
        self.files.get(unit).cloned()
    }

    fn metadata(&self, unit: &Path) -> UnitMetadata {
        self.files
            .get(unit)
            .map(|text| parse_directives(text))
            .unwrap_or_default()
    }

    fn resolve(&self, identifiers: &[String], from: &Path) -> Vec<Option<PathBuf>> {
        identifiers
            .iter()
            .map(|identifier| {
                resolve_relative(identifier, from, &self.extensions, |candidate| {
                    self.files.contains_key(candidate)
                })
            })
            .collect()
    }
}
