pub mod cache;
pub mod config;
pub mod resolver;
pub mod runner;
pub mod source;

pub use cache::{
    hash_config, Blake3Identity, CacheError, ContentIdentity, FileStatePersistence,
    MemoryStatePersistence, ProgramState, ProgramStateOptions, Snapshot, StatePersistence,
};
pub use config::CacheConfig;
pub use resolver::{DependencyResolver, ProgramHost, Target, UnitMetadata};
pub use runner::{Analyzer, RunSummary, Runner};
pub use source::{parse_directives, FsProgram};
