use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cache::{ContentIdentity, ProgramState, StatePersistence};
use crate::resolver::ProgramHost;

/// Produces the result cached per unit
pub trait Analyzer<R>: Sync {
    /// Identity of everything besides the unit's text that shapes the result
    fn config_identity(&self) -> String;

    fn analyze(&self, unit: &Path, text: &str) -> R;
}

/// Outcome of one pass over the program
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary<R> {
    /// Units answered from the cache
    pub hits: usize,
    /// Units that had to be analyzed
    pub misses: usize,
    /// Result per unit, in program order; unreadable units are left out
    pub results: Vec<(PathBuf, R)>,
}

/// Drives an [`Analyzer`] over every unit of a [`ProgramState`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Runner {
    parallel: bool,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze cache misses on the rayon thread pool
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn run<H, P, R, I, A>(&self, state: &mut ProgramState<H, P, R, I>, analyzer: &A) -> RunSummary<R>
    where
        H: ProgramHost,
        P: StatePersistence,
        R: Clone + Send + Serialize + DeserializeOwned,
        I: ContentIdentity,
        A: Analyzer<R>,
    {
        let config = analyzer.config_identity();
        let units = state.host().units();
        let mut results: Vec<Option<R>> = Vec::with_capacity(units.len());
        let mut jobs: Vec<(usize, String)> = Vec::new();

        for (i, unit) in units.iter().enumerate() {
            match state.get_up_to_date_result(unit, &config) {
                Some(result) => results.push(Some(result.clone())),
                None => {
                    results.push(None);
                    match state.host().source_text(unit) {
                        Some(text) => jobs.push((i, text)),
                        None => warn!("skipping unreadable unit {}", unit.display()),
                    }
                }
            }
        }
        let hits = results.iter().filter(|r| r.is_some()).count();
        let misses = jobs.len();
        debug!("{} cached, {} to analyze", hits, misses);

        let analyzed: Vec<(usize, R)> = if self.parallel {
            use rayon::prelude::*;
            jobs.par_iter()
                .map(|(i, text)| (*i, analyzer.analyze(&units[*i], text)))
                .collect()
        } else {
            jobs.iter()
                .map(|(i, text)| (*i, analyzer.analyze(&units[*i], text)))
                .collect()
        };

        // recorded in program order so the persisted snapshot does not depend on scheduling
        for (i, result) in analyzed {
            state.set_result(&units[i], config.clone(), result.clone());
            results[i] = Some(result);
        }

        info!("analyzed {} units, {} from cache", misses, hits);
        RunSummary {
            hits,
            misses,
            results: units
                .into_iter()
                .zip(results)
                .filter_map(|(unit, result)| result.map(|result| (unit, result)))
                .collect(),
        }
    }
}
