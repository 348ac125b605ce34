use anyhow::{Context, Result};
use clap::ValueEnum;
use lintcache_core::{
    CacheConfig, FileStatePersistence, FsProgram, MemoryStatePersistence, ProgramHost,
    ProgramState, ProgramStateOptions, RunSummary, Runner, StatePersistence,
};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{info, warn};

use crate::analyzer::{Finding, LineRules};
use crate::discovery::UnitFilter;

/// Quiet period after a filesystem event before re-running
const DEBOUNCE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub no_cache: bool,
    pub watch: bool,
    pub parallel: bool,
    pub format: OutputFormat,
}

type LintState<P> = ProgramState<FsProgram, P, Vec<Finding>>;

/// Everything a pass needs besides the state itself
struct Session<'a> {
    root: &'a Path,
    filter: UnitFilter<'a>,
    rules: LineRules,
    runner: Runner,
    format: OutputFormat,
}

/// Lint the project at `dir`; returns whether any unit has findings
pub fn check(dir: &Path, options: &CheckOptions) -> Result<bool> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("Cannot open project directory {}", dir.display()))?;
    let config = CacheConfig::load(&root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
    let filter = UnitFilter::new(&root, &config)?;
    let units = filter.discover()?;
    let program = FsProgram::new(units, config.extensions.clone());
    let state_options = config.program_state_options(&root)?;

    let session = Session {
        root: &root,
        filter,
        rules: LineRules::from_config(&config)?,
        runner: Runner::new().parallel(options.parallel),
        format: options.format,
    };

    if options.no_cache {
        // nothing is loaded and nothing outlives the process
        session.start(program, MemoryStatePersistence::new(), state_options, options.watch)
    } else {
        let persistence = FileStatePersistence::new(&config.cache_dir);
        session.start(program, persistence, state_options, options.watch)
    }
}

impl Session<'_> {
    fn start<P: StatePersistence>(
        &self,
        program: FsProgram,
        persistence: P,
        state_options: ProgramStateOptions,
        watch: bool,
    ) -> Result<bool> {
        let mut state: LintState<P> = ProgramState::new(program, persistence, state_options);
        let failed = self.pass(&mut state)?;
        if watch {
            self.watch(&mut state)?;
        }
        Ok(failed)
    }

    fn pass<P: StatePersistence>(&self, state: &mut LintState<P>) -> Result<bool> {
        let summary = self.runner.run(state, &self.rules);
        state.save().context("Failed to save cache state")?;
        self.report(&summary)
    }

    /// Re-run after every batch of filesystem changes; only returns on error
    fn watch<P: StatePersistence>(&self, state: &mut LintState<P>) -> Result<()> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .context("Failed to create filesystem watcher")?;
        watcher
            .watch(self.root, RecursiveMode::Recursive)
            .context("Failed to watch project directory")?;
        info!("watching {}", self.root.display());

        loop {
            let mut changed = FxHashSet::default();
            let first = rx.recv().context("Watcher channel closed")?;
            self.collect(first, &mut changed);
            while let Ok(event) = rx.recv_timeout(DEBOUNCE) {
                self.collect(event, &mut changed);
            }
            if changed.is_empty() {
                continue;
            }

            let units = self.filter.discover()?;
            if units != state.host().units() {
                state.host_mut().set_units(units);
            }
            for path in &changed {
                state.host().reload(path);
                state.update(path);
            }
            info!("{} files changed, re-checking", changed.len());
            self.pass(state)?;
        }
    }

    fn collect(&self, event: notify::Result<Event>, changed: &mut FxHashSet<PathBuf>) {
        match event {
            Ok(event) => changed.extend(
                event
                    .paths
                    .into_iter()
                    .filter(|path| self.filter.accepts(path)),
            ),
            Err(e) => warn!("watch error: {}", e),
        }
    }

    fn report(&self, summary: &RunSummary<Vec<Finding>>) -> Result<bool> {
        let findings: usize = summary.results.iter().map(|(_, f)| f.len()).sum();
        match self.format {
            OutputFormat::Text => {
                for (unit, unit_findings) in &summary.results {
                    let display = self.display_path(unit);
                    for finding in unit_findings {
                        println!(
                            "{}:{}: {}: {}",
                            display, finding.line, finding.rule, finding.message
                        );
                    }
                }
            }
            OutputFormat::Json => {
                let report = JsonReport {
                    checked: summary.results.len(),
                    cached: summary.hits,
                    files: summary
                        .results
                        .iter()
                        .filter(|(_, findings)| !findings.is_empty())
                        .map(|(unit, findings)| FileReport {
                            file: self.display_path(unit),
                            findings,
                        })
                        .collect(),
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to encode report")?
                );
            }
        }
        eprintln!(
            "checked {} files ({} cached, {} analyzed): {} findings",
            summary.results.len(),
            summary.hits,
            summary.misses,
            findings
        );
        Ok(findings > 0)
    }

    fn display_path(&self, unit: &Path) -> String {
        unit.strip_prefix(self.root)
            .unwrap_or(unit)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    checked: usize,
    cached: usize,
    files: Vec<FileReport<'a>>,
}

#[derive(Serialize)]
struct FileReport<'a> {
    file: String,
    findings: &'a [Finding],
}
