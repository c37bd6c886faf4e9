#![forbid(unsafe_code)]

//! End-to-end runs of the fixture suite plus the replicated-dataset scenario
//! driven directly through a session.

use tn_conformance::{
    CaseStatus, DEFAULT_SEED, ForensicEventKind, HarnessConfig, compare_replicated_answer,
    run_case_by_id, run_suite, verify_ordering,
};
use tn_frame::Direction;
use tn_io::read_csv_path;
use tn_runtime::{Session, SessionConfig};

const REPLICATION: usize = 4;

fn fixture_frame(config: &HarnessConfig, relative: &str) -> tn_frame::DataFrame {
    read_csv_path(&config.fixture_path(relative)).expect("fixture csv")
}

#[test]
fn suite_is_green_across_seeds() {
    for seed in [0, 1, 42, DEFAULT_SEED, u64::MAX] {
        let config = HarnessConfig {
            seed,
            ..HarnessConfig::default_paths()
        };
        let report = run_suite(&config).expect("suite");
        for failure in report.failures() {
            eprintln!(
                "[TEST] seed={seed} case={} mismatch={:?}",
                failure.case_id, failure.mismatch
            );
        }
        assert!(report.is_green(), "seed {seed} not green");
        assert_eq!(report.passed, report.fixture_count);
    }
}

#[test]
fn suite_seed_changes_case_seeds() {
    let first = run_suite(&HarnessConfig::default_paths()).expect("default seed");
    let second = run_suite(&HarnessConfig {
        seed: 7,
        ..HarnessConfig::default_paths()
    })
    .expect("seed 7");
    assert_eq!(first.fixture_count, second.fixture_count);
    assert!(
        first
            .results
            .iter()
            .zip(&second.results)
            .all(|(a, b)| a.case_id == b.case_id && a.seed != b.seed)
    );
}

#[test]
fn zero_tolerance_still_green() {
    let config = HarnessConfig {
        tolerance: 0.0,
        ..HarnessConfig::default_paths()
    };
    assert!(run_suite(&config).expect("suite").is_green());
}

#[test]
fn single_case_runs_alone() {
    let report =
        run_case_by_id(&HarnessConfig::default_paths(), "bottom_n_rep4_random").expect("case");
    assert_eq!(report.fixture_count, 1);
    assert_eq!(report.results[0].status, CaseStatus::Pass);
    assert_eq!(report.suite, "top_bottom_n:bottom_n_rep4_random");
}

#[test]
fn forensic_log_is_written_as_jsonl() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("forensics.jsonl");
    let config = HarnessConfig {
        forensic_log_path: Some(path.clone()),
        ..HarnessConfig::default_paths()
    };
    let report = run_suite(&config).expect("suite");

    let body = std::fs::read_to_string(&path).expect("log written");
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), report.forensic_log.len());
    // suite start + start/end per case + suite end
    assert_eq!(lines.len(), 2 * report.fixture_count + 2);
    assert!(lines[0].contains(r#""kind":"suite_start""#));
    assert!(lines[lines.len() - 1].contains(r#""kind":"suite_end""#));

    let last: tn_conformance::ForensicEvent =
        serde_json::from_str(lines[lines.len() - 1]).expect("parse event");
    assert!(matches!(
        last.event,
        ForensicEventKind::SuiteEnd { failed: 0, .. }
    ));
}

#[test]
fn replicated_scenario_through_session() {
    let config = HarnessConfig::default_paths();
    let top_answer = fixture_frame(&config, "data/top_20_percent.csv");
    let bottom_answer = fixture_frame(&config, "data/bottom_20_percent.csv");

    let mut session = Session::connect(SessionConfig::default());
    session
        .register_frame("rep4", fixture_frame(&config, "data/top_bottom_rep4.csv"))
        .expect("register");

    for percent in [4, 8, 12, 16] {
        for column in 0..2 {
            let top = session
                .exec(&format!("(topn rep4 {column} {percent} 0)"))
                .expect("top");
            assert_eq!(top.len(), percent * 4);
            verify_ordering(&top, Direction::Top).expect("top order");
            compare_replicated_answer(&top, &top_answer, REPLICATION, config.tolerance)
                .expect("top answer");

            let bottom = session
                .exec(&format!("(topn rep4 {column} {percent} 1)"))
                .expect("bottom");
            assert_eq!(bottom.len(), percent * 4);
            verify_ordering(&bottom, Direction::Bottom).expect("bottom order");
            compare_replicated_answer(&bottom, &bottom_answer, REPLICATION, config.tolerance)
                .expect("bottom answer");

            // The bottom result is checked against the bottom answer only.
            assert!(
                compare_replicated_answer(&bottom, &top_answer, REPLICATION, config.tolerance)
                    .is_err()
            );
        }
    }
    assert_eq!(session.stats().extractions, 16);
    session.disconnect();
}
