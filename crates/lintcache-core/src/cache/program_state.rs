use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, trace};

use super::freshness::{self, CurrentGraph, Freshness};
use super::{Blake3Identity, ContentIdentity, FileEntry, Result, Snapshot, StatePersistence};
use crate::resolver::{Dependencies, DependencyResolver, ProgramHost};

/// Settings that decide whether a persisted snapshot may be trusted at all
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramStateOptions {
    /// Project key; its directory is the root all unit paths are stored relative to
    pub project: PathBuf,
    /// Analyzer/environment version; snapshots from another environment are ignored
    pub environment_marker: String,
    /// Identity of the configuration that affects every unit
    pub config_identity: String,
    pub case_sensitive: bool,
    /// Only compare the direct dependency set, never the dependencies' own freshness
    pub assume_changes_only_affect_direct_dependencies: bool,
}

impl ProgramStateOptions {
    pub fn new(project: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            environment_marker: concat!("lintcache@", env!("CARGO_PKG_VERSION")).to_string(),
            config_identity: String::new(),
            case_sensitive: true,
            assume_changes_only_affect_direct_dependencies: false,
        }
    }

    pub fn with_environment_marker(mut self, marker: impl Into<String>) -> Self {
        self.environment_marker = marker.into();
        self
    }

    pub fn with_config_identity(mut self, identity: impl Into<String>) -> Self {
        self.config_identity = identity.into();
        self
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_direct_dependencies_only(mut self, direct_only: bool) -> Self {
        self.assume_changes_only_affect_direct_dependencies = direct_only;
        self
    }

    /// Directory unit paths are made relative to
    pub fn root(&self) -> &Path {
        self.project.parent().unwrap_or_else(|| Path::new(""))
    }
}

/// Memoized content identities of the current run
struct IdentityCache<I> {
    identity: I,
    tokens: FxHashMap<PathBuf, String>,
}

impl<I: ContentIdentity> IdentityCache<I> {
    fn get<H: ProgramHost>(&mut self, host: &H, unit: &Path) -> &str {
        if !self.tokens.contains_key(unit) {
            // unreadable units get the empty identity, which no digest produces
            let token = host
                .source_text(unit)
                .map(|text| self.identity.identity_of(&text))
                .unwrap_or_default();
            self.tokens.insert(unit.to_path_buf(), token);
        }
        &self.tokens[unit]
    }

    fn forget(&mut self, unit: &Path) {
        self.tokens.remove(unit);
    }
}

/// View of the current program handed to the freshness walk
struct Current<'a, H, I> {
    resolver: &'a mut DependencyResolver<H>,
    identities: &'a mut IdentityCache<I>,
}

impl<H: ProgramHost, I: ContentIdentity> CurrentGraph for Current<'_, H, I> {
    fn dependencies(&mut self, unit: &Path) -> Rc<Dependencies> {
        self.resolver.dependencies_of(unit)
    }

    fn sorted_by_identity(&mut self, units: &[PathBuf]) -> Vec<(PathBuf, String)> {
        sort_by_identity(self.resolver.host(), self.identities, units)
    }
}

fn sort_by_identity<H: ProgramHost, I: ContentIdentity>(
    host: &H,
    identities: &mut IdentityCache<I>,
    units: &[PathBuf],
) -> Vec<(PathBuf, String)> {
    let mut sorted: Vec<(PathBuf, String)> = Vec::with_capacity(units.len());
    for unit in units {
        if sorted.iter().any(|(seen, _)| seen == unit) {
            continue;
        }
        let identity = identities.get(host, unit).to_string();
        sorted.push((unit.clone(), identity));
    }
    sorted.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Snapshot the current run is compared against
struct Baseline<R> {
    snapshot: Snapshot<R>,
    /// The snapshot was written case-insensitively but lookups are case-sensitive now
    fold_queries: bool,
}

/// A result recorded during this run, not yet part of any snapshot
#[derive(Debug, Clone)]
struct PendingResult<R> {
    config: String,
    result: R,
}

/// Incremental result cache of one project for one run.
///
/// Created from the persisted snapshot (if compatible), queried per unit with
/// [`ProgramState::get_up_to_date_result`], fed with fresh results through
/// [`ProgramState::set_result`] and finally written back with
/// [`ProgramState::save`]. Not reentrant: one call at a time.
pub struct ProgramState<H, P, R, I = Blake3Identity> {
    resolver: DependencyResolver<H>,
    persistence: P,
    identities: IdentityCache<I>,
    options: ProgramStateOptions,
    baseline: Option<Baseline<R>>,
    /// The global scope check against the baseline has to run again
    recheck_baseline: bool,
    freshness: Vec<Freshness>,
    pending: FxHashMap<PathBuf, PendingResult<R>>,
}

impl<H, P, R> ProgramState<H, P, R, Blake3Identity>
where
    H: ProgramHost,
    P: StatePersistence,
    R: Clone + Serialize + DeserializeOwned,
{
    pub fn new(host: H, persistence: P, options: ProgramStateOptions) -> Self {
        Self::with_identity(host, persistence, Blake3Identity, options)
    }
}

impl<H, P, R, I> ProgramState<H, P, R, I>
where
    H: ProgramHost,
    P: StatePersistence,
    R: Clone + Serialize + DeserializeOwned,
    I: ContentIdentity,
{
    pub fn with_identity(host: H, persistence: P, identity: I, options: ProgramStateOptions) -> Self {
        let baseline = persistence
            .load::<R>(&options.project)
            .and_then(|snapshot| accept_snapshot(snapshot, &options));
        let len = baseline.as_ref().map_or(0, |b| b.snapshot.files.len());
        if baseline.is_some() {
            debug!("loaded state for {} ({} files)", options.project.display(), len);
        }
        Self {
            resolver: DependencyResolver::new(host),
            persistence,
            identities: IdentityCache {
                identity,
                tokens: FxHashMap::default(),
            },
            options,
            baseline,
            recheck_baseline: true,
            freshness: vec![Freshness::Unknown; len],
            pending: FxHashMap::default(),
        }
    }

    pub fn host(&self) -> &H {
        self.resolver.host()
    }

    /// Mutable access to the host. Call [`Self::update`] for every unit changed through it.
    pub fn host_mut(&mut self) -> &mut H {
        self.resolver.host_mut()
    }

    pub fn options(&self) -> &ProgramStateOptions {
        &self.options
    }

    /// Whether a snapshot from a previous run (or re-anchoring) is still in use
    pub fn has_baseline(&mut self) -> bool {
        self.try_reuse_baseline()
    }

    /// Number of results recorded since the last save or re-anchoring
    pub fn pending_results(&self) -> usize {
        self.pending.len()
    }

    /// `unit` changed: forget everything derived from it and re-verify all units.
    pub fn update(&mut self, unit: &Path) {
        trace!("update {}", unit.display());
        self.resolver.update(unit);
        self.identities.forget(unit);
        self.pending.remove(unit);
        self.recheck_baseline = true;
        self.freshness.fill(Freshness::Unknown);
    }

    /// The cached result of `unit`, if it was computed under `config_identity`
    /// and neither the unit nor anything it depends on changed since.
    pub fn get_up_to_date_result(&mut self, unit: &Path, config_identity: &str) -> Option<&R> {
        if !self.try_reuse_baseline() {
            return None;
        }
        let index = self.old_index_of(unit)?;
        let identity = self.identity_of(unit);
        {
            let entry = self.baseline.as_ref()?.snapshot.entry(index)?;
            if entry.result.is_none()
                || entry.result_config.as_deref() != Some(config_identity)
                || entry.identity != identity
            {
                return None;
            }
        }
        if !self.dependencies_up_to_date(unit, index) {
            return None;
        }
        trace!("reusing result of {}", unit.display());
        self.baseline
            .as_ref()?
            .snapshot
            .entry(index)?
            .result
            .as_ref()
    }

    /// Record a freshly computed result.
    ///
    /// If `unit` is not up to date relative to the baseline, the baseline is
    /// replaced by a snapshot of the current program first, carrying over
    /// every result that is still valid.
    pub fn set_result(&mut self, unit: &Path, config_identity: impl Into<String>, result: R) {
        if !self.is_up_to_date(unit) {
            debug!(
                "{} is outdated, re-anchoring state on the current program",
                unit.display()
            );
            let snapshot = self.aggregate();
            self.adopt(snapshot);
        }
        self.pending.insert(
            unit.to_path_buf(),
            PendingResult {
                config: config_identity.into(),
                result,
            },
        );
    }

    /// Persist the state of this run and continue from what was written.
    ///
    /// When the baseline still describes the program and every unit in it
    /// was verified, only the recorded results are patched in; otherwise a
    /// new snapshot is aggregated from the current program.
    pub fn save(&mut self) -> Result<()> {
        let snapshot = match self.patched_baseline() {
            Some(snapshot) => {
                debug!("state unchanged, patching {} results", self.pending.len());
                snapshot
            }
            None => {
                debug!("dependencies changed, aggregating new state");
                self.aggregate()
            }
        };
        self.persistence.save(&self.options.project, &snapshot)?;
        info!(
            "saved state for {} ({} files)",
            self.options.project.display(),
            snapshot.files.len()
        );
        self.adopt(snapshot);
        Ok(())
    }

    fn patched_baseline(&mut self) -> Option<Snapshot<R>> {
        if !self.try_reuse_baseline() || self.freshness.iter().any(|s| *s != Freshness::Ok) {
            return None;
        }
        let units = self.resolver.host().units();
        if units.iter().any(|unit| self.old_index_of(unit).is_none()) {
            return None;
        }
        let mut indexes = Vec::with_capacity(self.pending.len());
        for unit in self.pending.keys() {
            indexes.push((self.old_index_of(unit)?, unit));
        }
        let mut snapshot = self.baseline.as_ref()?.snapshot.clone();
        for (index, unit) in indexes {
            let pending = &self.pending[unit];
            let entry = snapshot.files.get_mut(index)?;
            entry.result = Some(pending.result.clone());
            entry.result_config = Some(pending.config.clone());
        }
        Some(snapshot)
    }

    /// Make `snapshot` the baseline; it describes the current program, so every unit is verified
    fn adopt(&mut self, snapshot: Snapshot<R>) {
        self.freshness = vec![Freshness::Ok; snapshot.files.len()];
        self.pending.clear();
        self.recheck_baseline = false;
        self.baseline = Some(Baseline {
            fold_queries: !snapshot.case_sensitive && self.options.case_sensitive,
            snapshot,
        });
    }

    /// Discard the baseline if the set of global scope units or any of their identities changed
    fn try_reuse_baseline(&mut self) -> bool {
        if !self.recheck_baseline {
            return self.baseline.is_some();
        }
        self.recheck_baseline = false;
        if self.baseline.is_none() {
            return false;
        }
        let global = self.resolver.files_affecting_global_scope();
        let global = sort_by_identity(self.resolver.host(), &mut self.identities, &global);
        let Some(baseline) = &self.baseline else {
            return false;
        };
        let old = &baseline.snapshot;
        let unchanged = old.global.len() == global.len()
            && old.global.iter().zip(&global).all(|(&index, (_, identity))| {
                old.entry(index as usize)
                    .is_some_and(|entry| entry.identity == *identity)
            });
        if !unchanged {
            debug!("global scope changed, discarding previous state");
            self.baseline = None;
            self.freshness.clear();
        }
        unchanged
    }

    fn is_up_to_date(&mut self, unit: &Path) -> bool {
        if !self.try_reuse_baseline() {
            return false;
        }
        let Some(index) = self.old_index_of(unit) else {
            return false;
        };
        let identity = self.identity_of(unit);
        let same = self
            .baseline
            .as_ref()
            .and_then(|b| b.snapshot.entry(index))
            .is_some_and(|entry| entry.identity == identity);
        same && self.dependencies_up_to_date(unit, index)
    }

    fn dependencies_up_to_date(&mut self, unit: &Path, index: usize) -> bool {
        let Some(baseline) = &self.baseline else {
            return false;
        };
        let mut graph = Current {
            resolver: &mut self.resolver,
            identities: &mut self.identities,
        };
        freshness::dependencies_up_to_date(
            &mut graph,
            &baseline.snapshot,
            &mut self.freshness,
            unit,
            index as u32,
            self.options.assume_changes_only_affect_direct_dependencies,
        )
    }

    fn identity_of(&mut self, unit: &Path) -> String {
        self.identities.get(self.resolver.host(), unit).to_string()
    }

    /// Path of `unit` relative to the project root, with `/` separators,
    /// folded to lower case when the project is case-insensitive
    fn relative_path(&self, unit: &Path) -> String {
        let relative = unit.strip_prefix(self.options.root()).unwrap_or(unit);
        let relative = relative.to_string_lossy().replace('\\', "/");
        if self.options.case_sensitive {
            relative
        } else {
            relative.to_lowercase()
        }
    }

    fn old_index_of(&self, unit: &Path) -> Option<usize> {
        let baseline = self.baseline.as_ref()?;
        let relative = self.relative_path(unit);
        if baseline.fold_queries {
            baseline.snapshot.index_of(&relative.to_lowercase())
        } else {
            baseline.snapshot.index_of(&relative)
        }
    }

    /// A still valid result of `unit` from the baseline
    fn reusable_result(&mut self, unit: &Path, identity: &str) -> Option<PendingResult<R>> {
        let index = self.old_index_of(unit)?;
        let (result, config) = {
            let entry = self.baseline.as_ref()?.snapshot.entry(index)?;
            if entry.identity != identity {
                return None;
            }
            (entry.result.clone()?, entry.result_config.clone()?)
        };
        self.dependencies_up_to_date(unit, index)
            .then_some(PendingResult { config, result })
    }

    /// Indexes of `units` ordered by identity, allocating slots after the
    /// primary units for anything not in `lookup` yet
    fn indexes_for(
        &mut self,
        units: &[PathBuf],
        lookup: &mut IndexMap<String, u32>,
        additional: &mut Vec<PathBuf>,
        primary: usize,
    ) -> Vec<u32> {
        let sorted = sort_by_identity(self.resolver.host(), &mut self.identities, units);
        sorted
            .iter()
            .map(|(unit, _)| self.index_for(unit, lookup, additional, primary))
            .collect()
    }

    fn index_for(
        &self,
        unit: &Path,
        lookup: &mut IndexMap<String, u32>,
        additional: &mut Vec<PathBuf>,
        primary: usize,
    ) -> u32 {
        let relative = self.relative_path(unit);
        if let Some(&index) = lookup.get(&relative) {
            return index;
        }
        let index = (primary + additional.len()) as u32;
        additional.push(unit.to_path_buf());
        lookup.insert(relative, index);
        index
    }

    /// Current dependencies of `unit` as target indexes; `None` when it has none
    fn dependency_indexes(
        &mut self,
        unit: &Path,
        lookup: &mut IndexMap<String, u32>,
        additional: &mut Vec<PathBuf>,
        primary: usize,
    ) -> Option<IndexMap<String, Option<Vec<u32>>>> {
        let current = self.resolver.dependencies_of(unit);
        if current.is_empty() {
            return None;
        }
        let mut dependencies = IndexMap::with_capacity(current.len());
        for (identifier, target) in current.iter() {
            let indexes = target
                .units()
                .map(|targets| self.indexes_for(targets, lookup, additional, primary));
            dependencies.insert(identifier.clone(), indexes);
        }
        Some(dependencies)
    }

    /// Snapshot of the current program, merging recorded results with every
    /// baseline result that is still valid
    fn aggregate(&mut self) -> Snapshot<R> {
        let reuse = self.try_reuse_baseline();
        let units = self.resolver.host().units();
        let primary = units.len();

        let mut lookup: IndexMap<String, u32> = IndexMap::with_capacity(primary);
        for (i, unit) in units.iter().enumerate() {
            lookup.insert(self.relative_path(unit), i as u32);
        }
        // units only reachable as dependency targets
        let mut additional: Vec<PathBuf> = Vec::new();

        let global = self.resolver.files_affecting_global_scope();
        let global = self.indexes_for(&global, &mut lookup, &mut additional, primary);

        let mut files = Vec::with_capacity(primary);
        let mut reused = 0usize;
        for unit in &units {
            let identity = self.identity_of(unit);
            let recorded = match self.pending.get(unit) {
                Some(pending) => Some(pending.clone()),
                None if reuse => {
                    let result = self.reusable_result(unit, &identity);
                    reused += usize::from(result.is_some());
                    result
                }
                None => None,
            };

            let dependencies =
                self.dependency_indexes(unit, &mut lookup, &mut additional, primary);

            let (result, result_config) = match recorded {
                Some(recorded) => (Some(recorded.result), Some(recorded.config)),
                None => (None, None),
            };
            files.push(FileEntry {
                identity,
                dependencies,
                result,
                result_config,
            });
        }
        // recording their dependencies may discover further units
        let mut next = 0;
        while let Some(unit) = additional.get(next).cloned() {
            let identity = self.identity_of(&unit);
            let dependencies =
                self.dependency_indexes(&unit, &mut lookup, &mut additional, primary);
            files.push(FileEntry {
                identity,
                dependencies,
                result: None,
                result_config: None,
            });
            next += 1;
        }

        debug!(
            "aggregated state: {} units, {} dependency-only, {} results reused, {} recorded",
            primary,
            additional.len(),
            reused,
            self.pending.len()
        );
        Snapshot {
            version: super::CACHE_VERSION,
            environment_marker: self.options.environment_marker.clone(),
            case_sensitive: self.options.case_sensitive,
            config_identity: self.options.config_identity.clone(),
            global,
            lookup,
            files,
        }
    }
}

/// Decide whether a loaded snapshot can be trusted under `options`
fn accept_snapshot<R>(mut snapshot: Snapshot<R>, options: &ProgramStateOptions) -> Option<Baseline<R>> {
    if !snapshot.is_version_compatible() {
        debug!("discarding state: schema version {}", snapshot.version);
        return None;
    }
    if snapshot.environment_marker != options.environment_marker {
        debug!(
            "discarding state: written by {}, running {}",
            snapshot.environment_marker, options.environment_marker
        );
        return None;
    }
    if snapshot.config_identity != options.config_identity {
        debug!("discarding state: configuration changed");
        return None;
    }
    if snapshot.case_sensitive && !options.case_sensitive {
        // fold the lookup table to match how paths are queried now
        let mut folded = IndexMap::with_capacity(snapshot.lookup.len());
        for (path, index) in std::mem::take(&mut snapshot.lookup) {
            folded.entry(path.to_lowercase()).or_insert(index);
        }
        snapshot.lookup = folded;
        snapshot.case_sensitive = false;
    }
    Some(Baseline {
        fold_queries: !snapshot.case_sensitive && options.case_sensitive,
        snapshot,
    })
}
