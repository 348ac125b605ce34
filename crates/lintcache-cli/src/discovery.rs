use anyhow::{Context, Result};
use glob::Pattern;
use lintcache_core::CacheConfig;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories never scanned for units
const SKIPPED_DIRS: &[&str] = &["node_modules", "target"];

/// Decides which files under a project root are units
pub struct UnitFilter<'a> {
    root: &'a Path,
    config: &'a CacheConfig,
    exclude: Vec<Pattern>,
}

impl<'a> UnitFilter<'a> {
    pub fn new(root: &'a Path, config: &'a CacheConfig) -> Result<Self> {
        let exclude = config
            .exclude
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).with_context(|| format!("Invalid exclude pattern '{}'", pattern))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            root,
            config,
            exclude,
        })
    }

    fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(self.root).unwrap_or(path)
    }

    fn is_skipped_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.')
            || SKIPPED_DIRS.contains(&name.as_ref())
            || self.relative(entry.path()) == self.config.cache_dir
    }

    /// Whether `path` is a unit of the project
    pub fn accepts(&self, path: &Path) -> bool {
        if !self.config.matches_extension(path) {
            return false;
        }
        let relative = self.relative(path);
        if relative
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        {
            return false;
        }
        !self.exclude.iter().any(|pattern| pattern.matches_path(relative))
    }

    /// All units under the root, sorted by path
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut units = Vec::new();
        let walker = WalkDir::new(self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_skipped_dir(entry));
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to scan {}", self.root.display()))?;
            if entry.file_type().is_file() && self.accepts(entry.path()) {
                units.push(entry.into_path());
            }
        }
        units.sort();
        debug!("discovered {} units under {}", units.len(), self.root.display());
        Ok(units)
    }
}
