//! Dependency resolution over the current program graph.
//!
//! The [`DependencyResolver`] answers two questions for the cache engine:
//! which units a given unit depends on (keyed by the identifier that caused
//! the edge), and which units affect the global scope of every other unit.
//! Everything it learns from the [`ProgramHost`] is memoized until
//! [`DependencyResolver::update`] is called for the unit in question.

mod pattern;

pub use pattern::best_matching_pattern;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::trace;

use crate::cache::AUGMENTATIONS_KEY;

/// Facts about a single unit that the resolver needs from the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitMetadata {
    /// Raw module identifiers referenced by the unit, in source order
    pub references: Vec<String>,
    /// Identifiers of `declare module "..."` blocks; may contain a single `*` wildcard
    pub ambient_modules: Vec<String>,
    /// Whether the unit augments the global scope
    pub affects_global_scope: bool,
    /// Whether the unit is a module (has imports or exports) rather than a script
    pub is_module: bool,
}

/// The program the cache is computed for.
///
/// Implementations must be deterministic for a fixed program state.
pub trait ProgramHost {
    /// The primary unit set, in program order
    fn units(&self) -> Vec<PathBuf>;

    /// Current text of a unit, `None` if it cannot be read
    fn source_text(&self, unit: &Path) -> Option<String>;

    fn metadata(&self, unit: &Path) -> UnitMetadata;

    /// Resolve each identifier as seen from `from`; the result has the same length as `identifiers`
    fn resolve(&self, identifiers: &[String], from: &Path) -> Vec<Option<PathBuf>>;
}

/// Resolution outcome of one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Resolved to a single unit
    Unit(PathBuf),
    /// Every unit that contributes to an ambient declaration or augmentation
    Candidates(Vec<PathBuf>),
    Unresolved,
}

impl Target {
    /// The units this target points at, `None` when unresolved
    pub fn units(&self) -> Option<&[PathBuf]> {
        match self {
            Target::Unit(unit) => Some(std::slice::from_ref(unit)),
            Target::Candidates(units) => Some(units),
            Target::Unresolved => None,
        }
    }
}

/// Dependencies of one unit: identifier -> target, in discovery order
pub type Dependencies = IndexMap<String, Target>;

/// Program-wide ambient declaration tables, rebuilt lazily after any update
#[derive(Debug, Default)]
struct GlobalState {
    affects_global_scope: Vec<PathBuf>,
    ambient_modules: FxHashMap<String, Vec<PathBuf>>,
    pattern_ambient_modules: IndexMap<String, Vec<PathBuf>>,
    module_augmentations: FxHashMap<PathBuf, Vec<PathBuf>>,
}

pub struct DependencyResolver<H> {
    host: H,
    metadata: FxHashMap<PathBuf, Rc<UnitMetadata>>,
    /// Identifier -> directly resolved unit, per referencing unit
    references: FxHashMap<PathBuf, Rc<IndexMap<String, Option<PathBuf>>>>,
    dependencies: FxHashMap<PathBuf, Rc<Dependencies>>,
    state: Option<GlobalState>,
}

impl<H: ProgramHost> DependencyResolver<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            metadata: FxHashMap::default(),
            references: FxHashMap::default(),
            dependencies: FxHashMap::default(),
            state: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the host. Call [`Self::update`] for every unit changed through it.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Forget everything derived from `unit`.
    ///
    /// Ambient tables are program wide, so the combined dependency maps of all
    /// units are dropped as well; resolved references of other units survive.
    pub fn update(&mut self, unit: &Path) {
        self.metadata.remove(unit);
        self.references.remove(unit);
        self.dependencies.clear();
        self.state = None;
    }

    /// Units whose presence affects every other unit, in program order
    pub fn files_affecting_global_scope(&mut self) -> Vec<PathBuf> {
        self.global_state().affects_global_scope.clone()
    }

    /// Dependencies of `unit`, memoized until the next update
    pub fn dependencies_of(&mut self, unit: &Path) -> Rc<Dependencies> {
        if let Some(dependencies) = self.dependencies.get(unit) {
            return Rc::clone(dependencies);
        }
        let dependencies = Rc::new(self.collect_dependencies(unit));
        self.dependencies
            .insert(unit.to_path_buf(), Rc::clone(&dependencies));
        dependencies
    }

    fn collect_dependencies(&mut self, unit: &Path) -> Dependencies {
        self.ensure_global_state();
        let references = self.external_references(unit);
        let meta = self.unit_metadata(unit);
        let Some(state) = self.state.as_ref() else {
            return Dependencies::default();
        };

        let mut result = Dependencies::default();
        if let Some(augmentations) = state.module_augmentations.get(unit) {
            result.insert(
                AUGMENTATIONS_KEY.to_string(),
                Target::Candidates(augmentations.clone()),
            );
        }

        for (identifier, resolved) in references.iter() {
            let target = if let Some(declaring) = state.ambient_modules.get(identifier) {
                // an ambient declaration wins over a file on disk
                Target::Candidates(declaring.clone())
            } else if let Some(resolved) = resolved {
                match state.module_augmentations.get(resolved) {
                    Some(augmentations) => {
                        let mut units = Vec::with_capacity(augmentations.len() + 1);
                        units.push(resolved.clone());
                        units.extend(augmentations.iter().cloned());
                        Target::Candidates(units)
                    }
                    None => Target::Unit(resolved.clone()),
                }
            } else {
                match best_matching_pattern(identifier, state.pattern_ambient_modules.keys()) {
                    Some(pattern) => {
                        Target::Candidates(state.pattern_ambient_modules[pattern].clone())
                    }
                    None => Target::Unresolved,
                }
            };
            result.insert(identifier.clone(), target);
        }

        if !meta.is_module {
            // a script declaring an ambient module depends on every other declaration of it
            for name in &meta.ambient_modules {
                let declaring = if name.contains('*') {
                    state.pattern_ambient_modules.get(name)
                } else {
                    state.ambient_modules.get(name)
                };
                let target = declaring
                    .map(|units| Target::Candidates(units.clone()))
                    .unwrap_or(Target::Unresolved);
                result.insert(name.clone(), target);
            }
        }

        trace!(unit = %unit.display(), count = result.len(), "collected dependencies");
        result
    }

    fn unit_metadata(&mut self, unit: &Path) -> Rc<UnitMetadata> {
        if let Some(meta) = self.metadata.get(unit) {
            return Rc::clone(meta);
        }
        let meta = Rc::new(self.host.metadata(unit));
        self.metadata.insert(unit.to_path_buf(), Rc::clone(&meta));
        meta
    }

    /// Identifiers of a unit resolved by the host; module augmentations are
    /// resolved like imports so they point at the augmented unit.
    fn external_references(&mut self, unit: &Path) -> Rc<IndexMap<String, Option<PathBuf>>> {
        if let Some(references) = self.references.get(unit) {
            return Rc::clone(references);
        }
        let meta = self.unit_metadata(unit);
        let mut identifiers: Vec<String> = Vec::new();
        for identifier in &meta.references {
            if !identifiers.contains(identifier) {
                identifiers.push(identifier.clone());
            }
        }
        if meta.is_module {
            for identifier in &meta.ambient_modules {
                if !identifiers.contains(identifier) {
                    identifiers.push(identifier.clone());
                }
            }
        }

        let mut references = IndexMap::with_capacity(identifiers.len());
        if !identifiers.is_empty() {
            let resolved = self.host.resolve(&identifiers, unit);
            for (i, identifier) in identifiers.into_iter().enumerate() {
                references.insert(identifier, resolved.get(i).cloned().flatten());
            }
        }
        let references = Rc::new(references);
        self.references
            .insert(unit.to_path_buf(), Rc::clone(&references));
        references
    }

    fn global_state(&mut self) -> &GlobalState {
        self.ensure_global_state();
        self.state.get_or_insert_with(GlobalState::default)
    }

    fn ensure_global_state(&mut self) {
        if self.state.is_none() {
            let state = self.build_global_state();
            self.state = Some(state);
        }
    }

    fn build_global_state(&mut self) -> GlobalState {
        let mut state = GlobalState::default();
        let mut augmentations: IndexMap<String, Vec<PathBuf>> = IndexMap::default();

        for unit in self.host.units() {
            let meta = self.unit_metadata(&unit);
            if meta.affects_global_scope {
                state.affects_global_scope.push(unit.clone());
            }
            for name in &meta.ambient_modules {
                let declaring = if meta.is_module {
                    augmentations.entry(name.clone()).or_default()
                } else if name.contains('*') {
                    state
                        .pattern_ambient_modules
                        .entry(name.clone())
                        .or_default()
                } else {
                    state.ambient_modules.entry(name.clone()).or_default()
                };
                if !declaring.contains(&unit) {
                    declaring.push(unit.clone());
                }
            }
        }

        for (name, units) in augmentations {
            // an augmentation of a name that is also declared ambient applies to that declaration
            if let Some(declaring) = state.ambient_modules.get_mut(&name) {
                declaring.extend(units);
                continue;
            }
            for unit in units {
                let resolved = self
                    .external_references(&unit)
                    .get(&name)
                    .cloned()
                    .flatten();
                if let Some(resolved) = resolved {
                    state
                        .module_augmentations
                        .entry(resolved)
                        .or_default()
                        .push(unit);
                } else {
                    // otherwise it extends the best matching pattern declaration, if any
                    let pattern =
                        best_matching_pattern(&name, state.pattern_ambient_modules.keys())
                            .map(str::to_string);
                    if let Some(pattern) = pattern {
                        state
                            .pattern_ambient_modules
                            .entry(pattern)
                            .or_default()
                            .push(unit);
                    }
                }
            }
        }

        trace!(
            global = state.affects_global_scope.len(),
            ambient = state.ambient_modules.len(),
            patterns = state.pattern_ambient_modules.len(),
            "rebuilt ambient module tables"
        );
        state
    }
}
