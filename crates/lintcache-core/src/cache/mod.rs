//! Incremental result cache for lintcache
//!
//! This module decides, unit by unit, whether an analysis result from a
//! previous run can be reused, and persists that knowledge between runs.
//! Freshness is derived from content identities and the dependency graph
//! produced by [`crate::resolver::DependencyResolver`], including cycles.

mod error;
mod freshness;
mod hash;
mod persistence;
mod program_state;
mod snapshot;

pub use error::{CacheError, Result};
pub use hash::{hash_config, Blake3Identity, ContentIdentity};
pub use persistence::{FileStatePersistence, MemoryStatePersistence, StatePersistence};
pub use program_state::{ProgramState, ProgramStateOptions};
pub use snapshot::{FileEntry, Snapshot};

/// Snapshot schema version - increment when the persisted structure changes
/// v1: indexed file table with lookup map and per-result config identity
pub const CACHE_VERSION: u32 = 1;

/// Default cache directory name
pub const CACHE_DIR_NAME: &str = ".lintcache";

/// Extension appended to the project file name to form the state file name
pub const STATE_FILE_EXTENSION: &str = "state";

/// Dependency key under which module augmentations of a unit itself are recorded
pub const AUGMENTATIONS_KEY: &str = "\0";
