#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tourney_ensemble::ensemble::{Ensemble, EnsembleOptions, Phase};
use tourney_ensemble::roster::Roster;
use tourney_ensemble::solver::SolverInvoker;
use tourney_ensemble::win_prob::WinProbabilityMatrix;

const ECHO_SOLVER: &str = r#"#!/bin/sh
single=no
while [ $# -gt 0 ]; do
  case "$1" in
    --prefix) prefix="$2"; shift 2 ;;
    --single) single=yes; shift ;;
    *) shift ;;
  esac
done
echo "single=$single"
echo "[0.5, 0.25, 0.25]" > "$prefix.dynamic.probs.json"
echo "Run Finished, time: 0.25s"
"#;

const FAILING_SOLVER: &str = "#!/bin/sh\necho 'bad input' >&2\nexit 3\n";

fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn base() -> WinProbabilityMatrix {
    let roster = Roster::new(vec!["ITA".into(), "ENG".into(), "DEN".into()]).unwrap();
    WinProbabilityMatrix::from_strengths(Arc::new(roster), vec![0.3, 0.1, -0.4]).unwrap()
}

fn options() -> EnsembleOptions {
    EnsembleOptions {
        sigma: 0.05,
        seed: 1,
        parallelism: 2,
    }
}

// One test so no other thread forks while a script is open for writing.
#[test]
fn subprocess_solver_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let echo = install_script(tmp.path(), "echo-solver.sh", ECHO_SOLVER);
    let failing = install_script(tmp.path(), "failing-solver.sh", FAILING_SOLVER);

    let mut solver = SolverInvoker::new(&echo);
    solver.set_dynamic(false).set_single();
    let prefix = tmp.path().join("ok");
    let mut ensemble = Ensemble::build(&base(), 3, &prefix, options());
    let report = ensemble.run(&solver);
    assert_eq!(report.succeeded, 3);

    let log = fs::read_to_string(prefix.join("a").join("output.log")).unwrap();
    assert!(log.contains("single=yes"));
    let summary = ensemble.write_outputs().unwrap();
    assert_eq!(summary.average["ITA"], 0.5);
    assert_eq!(summary.average["DEN"], 0.25);
    assert_eq!(summary.average_time, Some(0.25));

    let prefix = tmp.path().join("failing");
    let mut ensemble = Ensemble::build(&base(), 2, &prefix, options());
    let report = ensemble.run(&SolverInvoker::new(&failing));
    assert_eq!(report.launched, 2);
    assert_eq!(report.succeeded, 0);
    assert!(report.failures.iter().all(|f| f.phase == Phase::Invoke));
    let log = fs::read_to_string(prefix.join("b").join("output.log")).unwrap();
    assert!(log.contains("bad input"));
    assert!(log.contains("exited with status"));

    let summary = ensemble.write_outputs().unwrap();
    assert!(summary.average.is_empty());
    assert_eq!(summary.average_time, None);

    let prefix = tmp.path().join("missing");
    let mut ensemble = Ensemble::build(&base(), 2, &prefix, options());
    let report = ensemble.run(&SolverInvoker::new(tmp.path().join("no-such-solver")));
    assert_eq!(report.launched, 0);
    assert_eq!(report.failures.len(), 2);
    assert!(ensemble.collect_results().iter().all(|r| r.result.is_err()));
}
