use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CacheError, Result, CACHE_VERSION};

/// Persisted state of a whole program at one point in time.
///
/// `version` must stay the first field: [`Snapshot::peek_version`] reads it
/// without decoding the rest of the blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<R> {
    /// Schema version for the snapshot format
    pub version: u32,

    /// Analyzer/environment version that produced the snapshot
    pub environment_marker: String,

    /// Whether `lookup` keys preserve case
    pub case_sensitive: bool,

    /// Identity of the configuration that affects resolution of every unit
    pub config_identity: String,

    /// Units affecting the global scope, as indexes into `files`, sorted by identity
    pub global: Vec<u32>,

    /// Project relative path -> index into `files`
    pub lookup: IndexMap<String, u32>,

    pub files: Vec<FileEntry<R>>,
}

/// State of a single unit within a [`Snapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry<R> {
    /// Content identity of the unit when the snapshot was taken
    pub identity: String,

    /// Identifier -> target indexes sorted by identity; `None` for unresolved identifiers.
    /// Absent when the unit had no dependencies.
    pub dependencies: Option<IndexMap<String, Option<Vec<u32>>>>,

    pub result: Option<R>,

    /// Config identity `result` was computed under
    pub result_config: Option<String>,
}

impl<R> FileEntry<R> {
    /// Entry for a unit that only appears as a dependency target
    pub fn identity_only(identity: String) -> Self {
        Self {
            identity,
            dependencies: None,
            result: None,
            result_config: None,
        }
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.as_ref().map_or(0, IndexMap::len)
    }
}

impl<R> Snapshot<R> {
    /// Create an empty snapshot for the current schema version
    pub fn new(environment_marker: String, case_sensitive: bool, config_identity: String) -> Self {
        Self {
            version: CACHE_VERSION,
            environment_marker,
            case_sensitive,
            config_identity,
            global: Vec::new(),
            lookup: IndexMap::new(),
            files: Vec::new(),
        }
    }

    /// Read the schema version from the head of an encoded snapshot
    pub fn peek_version(bytes: &[u8]) -> Result<u32> {
        bincode::deserialize::<u32>(bytes).map_err(CacheError::from)
    }

    pub fn is_version_compatible(&self) -> bool {
        self.version == CACHE_VERSION
    }

    pub fn index_of(&self, relative_path: &str) -> Option<usize> {
        self.lookup.get(relative_path).map(|&index| index as usize)
    }

    pub fn entry(&self, index: usize) -> Option<&FileEntry<R>> {
        self.files.get(index)
    }

    /// Check the structural invariants the cache engine relies on:
    /// `lookup` is injective and every index points into `files`.
    pub fn validate(&self) -> Result<()> {
        let len = self.files.len();
        let mut seen = FxHashSet::default();
        for (path, &index) in &self.lookup {
            if index as usize >= len {
                return Err(CacheError::Inconsistent(format!(
                    "lookup entry {path} points at {index}, but there are only {len} files"
                )));
            }
            if !seen.insert(index) {
                return Err(CacheError::Inconsistent(format!(
                    "lookup entry {path} shares index {index} with another path"
                )));
            }
        }
        if let Some(&index) = self.global.iter().find(|&&index| index as usize >= len) {
            return Err(CacheError::Inconsistent(format!(
                "global unit index {index} is out of bounds"
            )));
        }
        for (position, file) in self.files.iter().enumerate() {
            let targets = file
                .dependencies
                .iter()
                .flat_map(|dependencies| dependencies.values())
                .flatten()
                .flatten();
            for &index in targets {
                if index as usize >= len {
                    return Err(CacheError::Inconsistent(format!(
                        "file {position} depends on index {index}, which is out of bounds"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl<R: Serialize> Snapshot<R> {
    /// Serialize to binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(CacheError::from)
    }

    /// Serialize to indented JSON for inspection
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(CacheError::from)
    }
}

impl<R: DeserializeOwned> Snapshot<R> {
    /// Deserialize from binary format, rejecting other schema versions and
    /// snapshots that violate the structural invariants
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let found = Self::peek_version(bytes)?;
        if found != CACHE_VERSION {
            return Err(CacheError::VersionMismatch {
                expected: CACHE_VERSION,
                found,
            });
        }
        let snapshot: Self = bincode::deserialize(bytes)?;
        snapshot.validate()?;
        Ok(snapshot)
    }
}
