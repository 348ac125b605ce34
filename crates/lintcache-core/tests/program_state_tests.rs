//! Incremental cache behavior across runs.
//!
//! Each test simulates one or more analysis runs: a fresh `ProgramState` is
//! created per run from whatever the previous run persisted.

use indoc::indoc;
use lintcache_core::cache::{
    FileStatePersistence, MemoryStatePersistence, ProgramState, ProgramStateOptions, Snapshot,
    StatePersistence,
};
use lintcache_core::{FsProgram, ProgramHost};
use lintcache_test_helpers::{options, VirtualProgram};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

type Findings = Vec<String>;
type State<'a> = ProgramState<VirtualProgram, &'a MemoryStatePersistence, Findings>;

const CONFIG: &str = "1234";

fn path(name: &str) -> PathBuf {
    VirtualProgram::path(name)
}

fn project() -> PathBuf {
    options().project
}

/// Run that records a `finding in <file name>` result for every unit and persists it
fn seed(program: VirtualProgram, persistence: &MemoryStatePersistence, opts: ProgramStateOptions) {
    let mut state: State = ProgramState::new(program, persistence, opts);
    let units = state.host().units();
    for unit in units {
        let name = unit.file_name().unwrap().to_string_lossy().into_owned();
        state.set_result(&unit, CONFIG, vec![format!("finding in {name}")]);
    }
    state.save().unwrap();
}

fn cached(state: &mut State, name: &str) -> Option<Findings> {
    state.get_up_to_date_result(&path(name), CONFIG).cloned()
}

fn import_graph() -> VirtualProgram {
    VirtualProgram::new(&[
        ("a.ts", "import \"./b\"\nexport const a = 1\n"),
        ("b.ts", "export const b = 2\n"),
    ])
}

fn cycle_graph() -> VirtualProgram {
    VirtualProgram::new(&[
        ("a.ts", "import \"./b\"\nexport const a = 1\n"),
        ("b.ts", "import \"./c\"\nexport const b = 1\n"),
        ("c.ts", "import \"./a\"\nexport const c = 1\n"),
        ("d.ts", "export const d = 1\n"),
    ])
}

#[test]
fn test_cached_results_survive_reload() {
    let persistence = MemoryStatePersistence::new();
    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    state.set_result(&path("a.ts"), CONFIG, vec![]);
    state.set_result(&path("b.ts"), CONFIG, vec![]);
    state.save().unwrap();

    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    assert_eq!(cached(&mut state, "a.ts"), Some(vec![]));
    assert_eq!(cached(&mut state, "b.ts"), Some(vec![]));

    state.host_mut().write("b.ts", "export const b = 3\n");
    state.update(&path("b.ts"));
    assert_eq!(cached(&mut state, "a.ts"), None);
    assert_eq!(cached(&mut state, "b.ts"), None);
}

#[test]
fn test_change_in_cycle_invalidates_members_only() {
    let persistence = MemoryStatePersistence::new();
    seed(cycle_graph(), &persistence, options());

    let mut state: State = ProgramState::new(cycle_graph(), &persistence, options());
    state
        .host_mut()
        .write("a.ts", "import \"./b\"\nexport const a = 2\n");
    state.update(&path("a.ts"));

    for name in ["a.ts", "b.ts", "c.ts"] {
        assert_eq!(cached(&mut state, name), None, "{name} should be outdated");
    }
    assert_eq!(
        cached(&mut state, "d.ts"),
        Some(vec!["finding in d.ts".to_string()])
    );
}

#[test]
fn test_unrelated_change_leaves_cycle_cached() {
    let persistence = MemoryStatePersistence::new();
    seed(cycle_graph(), &persistence, options());

    let mut program = cycle_graph();
    program.write("d.ts", "export const d = 42\n");
    let mut state: State = ProgramState::new(program, &persistence, options());

    for name in ["a.ts", "b.ts", "c.ts"] {
        assert!(cached(&mut state, name).is_some(), "{name} should be cached");
    }
    assert_eq!(cached(&mut state, "d.ts"), None);
}

#[test]
fn test_outdated_schema_version_is_cold_start() {
    let persistence = MemoryStatePersistence::new();
    seed(import_graph(), &persistence, options());

    let mut snapshot: Snapshot<Findings> = persistence.load(&project()).unwrap();
    snapshot.version = 0;
    persistence.insert_raw(project(), snapshot.to_bytes().unwrap());

    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    assert!(!state.has_baseline());
    assert_eq!(cached(&mut state, "a.ts"), None);
    assert_eq!(cached(&mut state, "b.ts"), None);
}

#[test]
fn test_garbage_state_is_cold_start() {
    let persistence = MemoryStatePersistence::new();
    persistence.insert_raw(project(), b"definitely not a snapshot".to_vec());

    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    assert!(!state.has_baseline());
    assert_eq!(cached(&mut state, "a.ts"), None);
}

#[test]
fn test_environment_marker_mismatch_is_cold_start() {
    let persistence = MemoryStatePersistence::new();
    seed(
        import_graph(),
        &persistence,
        options().with_environment_marker("analyzer@1"),
    );

    let mut state: State = ProgramState::new(
        import_graph(),
        &persistence,
        options().with_environment_marker("analyzer@2"),
    );
    assert!(!state.has_baseline());
    assert_eq!(cached(&mut state, "b.ts"), None);
}

#[test]
fn test_config_identity_mismatch_is_cold_start() {
    let persistence = MemoryStatePersistence::new();
    seed(
        import_graph(),
        &persistence,
        options().with_config_identity("resolution-a"),
    );

    let mut state: State = ProgramState::new(
        import_graph(),
        &persistence,
        options().with_config_identity("resolution-b"),
    );
    assert_eq!(cached(&mut state, "b.ts"), None);
}

#[test]
fn test_result_config_must_match_exactly() {
    let persistence = MemoryStatePersistence::new();
    seed(import_graph(), &persistence, options());

    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    assert!(state
        .get_up_to_date_result(&path("b.ts"), "5678")
        .is_none());
    assert!(state.get_up_to_date_result(&path("b.ts"), CONFIG).is_some());
}

#[test]
fn test_new_result_config_is_persisted_without_losing_others() {
    let persistence = MemoryStatePersistence::new();
    seed(import_graph(), &persistence, options());

    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    assert!(state.get_up_to_date_result(&path("a.ts"), "v2").is_none());
    state.set_result(&path("a.ts"), "v2", vec!["v2 finding".to_string()]);
    // a.ts was up to date, so the loaded baseline is kept
    assert!(state.has_baseline());
    assert_eq!(state.pending_results(), 1);
    state.save().unwrap();

    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    assert_eq!(
        state.get_up_to_date_result(&path("a.ts"), "v2").cloned(),
        Some(vec!["v2 finding".to_string()])
    );
    assert_eq!(
        cached(&mut state, "b.ts"),
        Some(vec!["finding in b.ts".to_string()])
    );
}

#[test]
fn test_adding_global_unit_invalidates_everything() {
    let persistence = MemoryStatePersistence::new();
    seed(import_graph(), &persistence, options());

    let mut program = import_graph();
    program.write("globals.ts", "const injected = 1\n");
    let mut state: State = ProgramState::new(program, &persistence, options());
    assert_eq!(cached(&mut state, "a.ts"), None);
    assert_eq!(cached(&mut state, "b.ts"), None);
    assert!(!state.has_baseline());
}

#[test]
fn test_removing_or_changing_global_unit_invalidates_everything() {
    let with_globals = || {
        let mut program = import_graph();
        program.write("globals.ts", "const injected = 1\n");
        program
    };

    let persistence = MemoryStatePersistence::new();
    seed(with_globals(), &persistence, options());

    let mut state: State = ProgramState::new(with_globals(), &persistence, options());
    assert!(cached(&mut state, "b.ts").is_some());

    let mut changed = with_globals();
    changed.write("globals.ts", "const injected = 2\n");
    let mut state: State = ProgramState::new(changed, &persistence, options());
    assert_eq!(cached(&mut state, "b.ts"), None);

    let mut removed = with_globals();
    removed.remove("globals.ts");
    let mut state: State = ProgramState::new(removed, &persistence, options());
    assert_eq!(cached(&mut state, "b.ts"), None);
}

#[test]
fn test_module_declare_global_is_global_unit() {
    let with_augmentation = |value: u32| {
        let mut program = import_graph();
        program.write(
            "env.ts",
            &format!("export {{}}\ndeclare global {{\n  const value: {value}\n}}\n"),
        );
        program
    };

    let persistence = MemoryStatePersistence::new();
    seed(with_augmentation(1), &persistence, options());

    let mut state: State = ProgramState::new(with_augmentation(2), &persistence, options());
    assert_eq!(cached(&mut state, "b.ts"), None);
}

#[test]
fn test_queries_are_idempotent() {
    let persistence = MemoryStatePersistence::new();
    seed(cycle_graph(), &persistence, options());
    let before = persistence.raw(&project()).unwrap();

    let mut state: State = ProgramState::new(cycle_graph(), &persistence, options());
    for name in ["a.ts", "b.ts", "c.ts", "d.ts"] {
        let first = cached(&mut state, name);
        let second = cached(&mut state, name);
        assert_eq!(first, second);
        assert!(first.is_some());
    }
    state.save().unwrap();
    assert_eq!(persistence.raw(&project()).unwrap(), before);

    // saving again without new results writes the same bytes
    state.save().unwrap();
    assert_eq!(persistence.raw(&project()).unwrap(), before);
}

#[test]
fn test_round_trip_keeps_results_of_unchanged_units() {
    let persistence = MemoryStatePersistence::new();
    seed(cycle_graph(), &persistence, options());

    // second run changes d.ts and records its new result
    let mut program = cycle_graph();
    program.write("d.ts", "export const d = 2\n");
    let mut state: State = ProgramState::new(program.clone(), &persistence, options());
    assert_eq!(cached(&mut state, "d.ts"), None);
    state.set_result(&path("d.ts"), CONFIG, vec!["new d".to_string()]);
    state.save().unwrap();

    let mut state: State = ProgramState::new(program, &persistence, options());
    assert_eq!(
        cached(&mut state, "a.ts"),
        Some(vec!["finding in a.ts".to_string()])
    );
    assert_eq!(cached(&mut state, "d.ts"), Some(vec!["new d".to_string()]));
}

#[test]
fn test_reanchoring_keeps_valid_results() {
    let persistence = MemoryStatePersistence::new();
    seed(import_graph(), &persistence, options());

    let mut program = import_graph();
    program.write("c.ts", "export const c = 1\n");
    program.write("a.ts", "import \"./b\"\nimport \"./c\"\nexport const a = 1\n");
    let mut state: State = ProgramState::new(program.clone(), &persistence, options());

    // a.ts gained a dependency; recording it moves the baseline to the current program
    assert_eq!(cached(&mut state, "a.ts"), None);
    state.set_result(&path("a.ts"), CONFIG, vec!["a with c".to_string()]);
    assert_eq!(
        cached(&mut state, "b.ts"),
        Some(vec!["finding in b.ts".to_string()])
    );
    // not recorded yet, so not part of the new baseline
    assert_eq!(cached(&mut state, "a.ts"), None);
    assert_eq!(cached(&mut state, "c.ts"), None);
    state.set_result(&path("c.ts"), CONFIG, vec![]);
    state.save().unwrap();

    let mut state: State = ProgramState::new(program, &persistence, options());
    assert_eq!(cached(&mut state, "a.ts"), Some(vec!["a with c".to_string()]));
    assert_eq!(
        cached(&mut state, "b.ts"),
        Some(vec!["finding in b.ts".to_string()])
    );
    assert_eq!(cached(&mut state, "c.ts"), Some(vec![]));
}

#[test]
fn test_update_drops_pending_result() {
    let persistence = MemoryStatePersistence::new();
    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    state.set_result(&path("b.ts"), CONFIG, vec!["stale".to_string()]);
    assert_eq!(state.pending_results(), 1);

    state.host_mut().write("b.ts", "export const b = 9\n");
    state.update(&path("b.ts"));
    assert_eq!(state.pending_results(), 0);
    state.save().unwrap();

    let mut state: State = ProgramState::new(import_graph(), &persistence, options());
    assert_eq!(cached(&mut state, "b.ts"), None);
}

#[test]
fn test_removed_unit_is_dropped_from_state() {
    let persistence = MemoryStatePersistence::new();
    seed(cycle_graph(), &persistence, options());

    let mut program = cycle_graph();
    program.remove("d.ts");
    let mut state: State = ProgramState::new(program, &persistence, options());
    assert!(cached(&mut state, "a.ts").is_some());
    state.save().unwrap();

    let snapshot: Snapshot<Findings> = persistence.load(&project()).unwrap();
    assert!(!snapshot.lookup.contains_key("d.ts"));
    assert_eq!(snapshot.files.len(), 3);
    assert!(snapshot.files.iter().all(|file| file.result.is_some()));
}

#[test]
fn test_direct_only_ignores_transitive_changes() {
    let chain = |c: &str| {
        VirtualProgram::new(&[
            ("a.ts", "import \"./b\"\nexport {}\n"),
            ("b.ts", "import \"./c\"\nexport {}\n"),
            ("c.ts", c),
        ])
    };
    let direct = || options().with_direct_dependencies_only(true);

    let persistence = MemoryStatePersistence::new();
    seed(chain("export const c = 1\n"), &persistence, direct());

    let mut state: State = ProgramState::new(chain("export const c = 2\n"), &persistence, direct());
    assert!(cached(&mut state, "a.ts").is_some());
    assert_eq!(cached(&mut state, "b.ts"), None);
    assert_eq!(cached(&mut state, "c.ts"), None);

    // the same change propagates when transitive checks are on
    let persistence = MemoryStatePersistence::new();
    seed(chain("export const c = 1\n"), &persistence, options());
    let mut state: State = ProgramState::new(chain("export const c = 2\n"), &persistence, options());
    assert_eq!(cached(&mut state, "a.ts"), None);
}

#[test]
fn test_case_insensitive_run_reuses_case_sensitive_state() {
    let program = || VirtualProgram::new(&[("Main.ts", "export const main = 1\n")]);
    let persistence = MemoryStatePersistence::new();
    seed(program(), &persistence, options());

    let insensitive = options().with_case_sensitive(false);
    let mut state: State = ProgramState::new(program(), &persistence, insensitive.clone());
    assert_eq!(
        cached(&mut state, "Main.ts"),
        Some(vec!["finding in Main.ts".to_string()])
    );
    state.save().unwrap();

    let snapshot: Snapshot<Findings> = persistence.load(&project()).unwrap();
    assert!(!snapshot.case_sensitive);
    assert!(snapshot.lookup.contains_key("main.ts"));

    // and back: a case-sensitive run can still find the folded entries
    let mut state: State = ProgramState::new(program(), &persistence, options());
    assert!(cached(&mut state, "Main.ts").is_some());
}

#[test]
fn test_snapshot_layout() {
    let persistence = MemoryStatePersistence::new();
    let mut program = import_graph();
    program.write("c.ts", "import \"./missing\"\nexport {}\n");
    seed(program, &persistence, options().with_config_identity("cfg"));

    let snapshot: Snapshot<Findings> = persistence.load(&project()).unwrap();
    assert_eq!(snapshot.config_identity, "cfg");
    assert!(snapshot.global.is_empty());
    assert_eq!(
        snapshot.lookup.keys().collect::<Vec<_>>(),
        vec!["a.ts", "b.ts", "c.ts"]
    );

    let a = &snapshot.files[0];
    let deps = a.dependencies.as_ref().unwrap();
    assert_eq!(deps["./b"], Some(vec![1]));
    assert_eq!(a.result_config.as_deref(), Some(CONFIG));

    assert!(snapshot.files[1].dependencies.is_none());

    let c = snapshot.files[2].dependencies.as_ref().unwrap();
    assert_eq!(c["./missing"], None);
}

#[test]
fn test_dependency_only_units_are_indexed() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let a = root.join("a.ts");
    let lib = root.join("lib.ts");
    fs::write(&a, "import \"./lib\"\nexport {}\n").unwrap();
    fs::write(&lib, "export const lib = 1\n").unwrap();

    let extensions = vec!["ts".to_string()];
    let opts = ProgramStateOptions::new(root.join("lintcache.yaml"));
    let persistence = FileStatePersistence::default();

    // lib.ts is resolvable but not part of the primary unit set
    let program = FsProgram::new(vec![a.clone()], extensions.clone());
    let mut state: ProgramState<_, _, Findings> =
        ProgramState::new(program, &persistence, opts.clone());
    state.set_result(&a, CONFIG, vec![]);
    state.save().unwrap();

    let snapshot: Snapshot<Findings> = persistence.load(&opts.project).unwrap();
    assert_eq!(snapshot.lookup.get("lib.ts"), Some(&1));
    assert_eq!(snapshot.files.len(), 2);
    assert!(snapshot.files[1].result.is_none());

    let program = FsProgram::new(vec![a.clone()], extensions.clone());
    let mut state: ProgramState<_, _, Findings> =
        ProgramState::new(program, &persistence, opts.clone());
    assert!(state.get_up_to_date_result(&a, CONFIG).is_some());

    fs::write(&lib, "export const lib = 2\n").unwrap();
    let program = FsProgram::new(vec![a.clone()], extensions);
    let mut state: ProgramState<_, _, Findings> = ProgramState::new(program, &persistence, opts);
    assert!(state.get_up_to_date_result(&a, CONFIG).is_none());
}

fn disk_state<'a>(
    units: Vec<PathBuf>,
    extensions: &[String],
    persistence: &'a FileStatePersistence,
    opts: &ProgramStateOptions,
) -> ProgramState<FsProgram, &'a FileStatePersistence, Findings> {
    ProgramState::new(FsProgram::new(units, extensions.to_vec()), persistence, opts.clone())
}

#[test]
fn test_dependency_only_units_keep_their_imports() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let a = root.join("a.ts");
    let lib = root.join("lib.ts");
    let other = root.join("other.ts");
    fs::write(&a, "import \"./lib\"\nexport {}\n").unwrap();
    fs::write(&lib, "import \"./other\"\nexport const lib = 1\n").unwrap();
    fs::write(&other, "export const other = 1\n").unwrap();

    let extensions = vec!["ts".to_string()];
    let opts = ProgramStateOptions::new(root.join("lintcache.yaml"));
    let persistence = FileStatePersistence::default();
    let run = || disk_state(vec![a.clone()], &extensions, &persistence, &opts);

    let mut state = run();
    state.set_result(&a, CONFIG, vec![]);
    state.save().unwrap();

    let snapshot: Snapshot<Findings> = persistence.load(&opts.project).unwrap();
    let lib_index = snapshot.index_of("lib.ts").unwrap();
    let other_index = snapshot.index_of("other.ts").unwrap() as u32;
    assert_eq!(snapshot.files.len(), 3);
    assert_eq!(
        snapshot.files[lib_index].dependencies.as_ref().unwrap()["./other"],
        Some(vec![other_index])
    );

    let mut state = run();
    assert!(state.get_up_to_date_result(&a, CONFIG).is_some());

    // a change two hops away, behind a unit outside the primary set
    fs::write(&other, "export const other = 2\n").unwrap();
    let mut state = run();
    assert!(state.get_up_to_date_result(&a, CONFIG).is_none());
}

#[test]
fn test_state_file_on_disk() {
    let dir = TempDir::new().unwrap();
    let opts = ProgramStateOptions::new(dir.path().join("lintcache.yaml"));
    let persistence = FileStatePersistence::default();
    let source = indoc! {"
        export const answer = 42
    "};
    let unit = dir.path().join("answer.ts");
    fs::write(&unit, source).unwrap();

    let program = FsProgram::new(vec![unit.clone()], vec!["ts".to_string()]);
    let mut state: ProgramState<_, _, u32> = ProgramState::new(program, &persistence, opts.clone());
    state.set_result(&unit, CONFIG, 42);
    state.save().unwrap();
    assert!(persistence.state_path(&opts.project).is_file());
    assert!(dir.path().join(".lintcache").is_dir());

    let program = FsProgram::new(vec![unit.clone()], vec!["ts".to_string()]);
    let mut state: ProgramState<_, _, u32> = ProgramState::new(program, &persistence, opts);
    assert_eq!(state.get_up_to_date_result(&unit, CONFIG), Some(&42));
}
