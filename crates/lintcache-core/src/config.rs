use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cache::{hash_config, CacheError, ProgramStateOptions, Result, CACHE_DIR_NAME};

/// Name of the optional configuration file in the project root
pub const CONFIG_FILE_NAME: &str = "lintcache.yaml";

/// Project configuration, read from `lintcache.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Source file extensions, without the leading dot
    pub extensions: Vec<String>,
    pub case_sensitive: bool,
    pub assume_changes_only_affect_direct_dependencies: bool,
    /// Cache directory, relative to the project root
    pub cache_dir: PathBuf,
    pub max_line_length: usize,
    /// Glob patterns of files to leave out, relative to the project root
    pub exclude: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["ts".to_string(), "tsx".to_string(), "js".to_string()],
            case_sensitive: true,
            assume_changes_only_affect_direct_dependencies: false,
            cache_dir: PathBuf::from(CACHE_DIR_NAME),
            max_line_length: 120,
            exclude: Vec::new(),
        }
    }
}

/// The subset of the configuration that changes how units resolve
#[derive(Serialize)]
struct ResolutionSettings<'a> {
    extensions: &'a [String],
    exclude: &'a [String],
}

impl CacheConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document is a valid, all-default configuration
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(CacheError::from)
    }

    /// Load `lintcache.yaml` from `root`, falling back to defaults when it does not exist
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        match fs::read_to_string(&path) {
            Ok(text) => Self::from_yaml(&text),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no {} in {}, using defaults", CONFIG_FILE_NAME, root.display());
                Ok(Self::default())
            }
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Identity of everything that decides how the program graph is built
    pub fn resolution_identity(&self) -> Result<String> {
        hash_config(&ResolutionSettings {
            extensions: &self.extensions,
            exclude: &self.exclude,
        })
    }

    /// Engine options for the project rooted at `root`
    pub fn program_state_options(&self, root: &Path) -> Result<ProgramStateOptions> {
        Ok(ProgramStateOptions::new(root.join(CONFIG_FILE_NAME))
            .with_config_identity(self.resolution_identity()?)
            .with_case_sensitive(self.case_sensitive)
            .with_direct_dependencies_only(self.assume_changes_only_affect_direct_dependencies))
    }

    /// Whether `path` carries one of the configured extensions
    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}
