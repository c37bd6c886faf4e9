#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tn_frame::{ColumnSelector, DataFrame, Direction, ORIGINAL_ROW_INDICES, result_value_name};
use tn_io::{IoError, read_csv_path, write_csv_string};
use tn_runtime::{Session, SessionConfig, SessionError};
use tn_types::Scalar;
use tracing::{debug, info, warn};

/// Absolute tolerance for numeric comparison against answer fixtures.
pub const DEFAULT_TOLERANCE: f64 = 1e-12;
pub const DEFAULT_SEED: u64 = 20_161_121;

const SUITE_NAME: &str = "top_bottom_n";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub tolerance: f64,
    pub seed: u64,
    pub forensic_log_path: Option<PathBuf>,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
            forensic_log_path: None,
        }
    }

    #[must_use]
    pub fn packet_fixture_root(&self) -> PathBuf {
        self.fixture_root.join("packets")
    }

    /// Resolve a fixture-relative data path such as `data/top_20_percent.csv`.
    #[must_use]
    pub fn fixture_path(&self, relative: &str) -> PathBuf {
        self.fixture_root.join(relative)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    TopN,
    BottomN,
    SelectorEquivalence,
    Idempotence,
}

impl FixtureOperation {
    #[must_use]
    pub fn operation_name(self) -> &'static str {
        match self {
            Self::TopN => "top_n",
            Self::BottomN => "bottom_n",
            Self::SelectorEquivalence => "selector_equivalence",
            Self::Idempotence => "idempotence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketFixture {
    pub case_id: String,
    pub operation: FixtureOperation,
    /// Source CSV, relative to the fixture root.
    pub source: String,
    #[serde(default)]
    pub column_name: Option<String>,
    #[serde(default)]
    pub column_index: Option<usize>,
    #[serde(default)]
    pub random_column: bool,
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub percent_choices: Option<Vec<f64>>,
    /// Only read by `selector_equivalence` and `idempotence`.
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default)]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub replication: Option<usize>,
    #[serde(default)]
    pub expected_rows: Option<usize>,
    #[serde(default)]
    pub expected_error_contains: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub seed: u64,
    #[serde(default)]
    pub elapsed_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub seed: u64,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
    pub forensic_log: ForensicLog,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&CaseResult> {
        self.results
            .iter()
            .filter(|result| result.status == CaseStatus::Fail)
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Data(#[from] IoError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
}

// === Forensic logging ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ForensicEventKind {
    SuiteStart {
        suite: String,
        seed: u64,
        case_filter: Option<String>,
    },
    SuiteEnd {
        suite: String,
        total_fixtures: usize,
        passed: usize,
        failed: usize,
    },
    CaseStart {
        case_id: String,
        operation: FixtureOperation,
        seed: u64,
    },
    CaseEnd {
        case_id: String,
        status: CaseStatus,
        mismatch: Option<String>,
        elapsed_us: u64,
    },
    Error {
        phase: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForensicEvent {
    pub ts_unix_ms: u64,
    pub event: ForensicEventKind,
}

/// Ordered event trail of one suite run, written as JSONL on request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForensicLog {
    pub events: Vec<ForensicEvent>,
}

impl ForensicLog {
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: ForensicEventKind) {
        self.events.push(ForensicEvent {
            ts_unix_ms: now_unix_ms(),
            event,
        });
    }

    pub fn write_jsonl(&self, path: &Path) -> Result<(), HarnessError> {
        let mut file = fs::File::create(path)?;
        for entry in &self.events {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

// === Suite execution ===

pub fn run_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    run_filtered(config, None)
}

pub fn run_case_by_id(config: &HarnessConfig, case_id: &str) -> Result<SuiteReport, HarnessError> {
    run_filtered(config, Some(case_id))
}

fn run_filtered(
    config: &HarnessConfig,
    case_filter: Option<&str>,
) -> Result<SuiteReport, HarnessError> {
    let suite = case_filter.map_or_else(
        || SUITE_NAME.to_owned(),
        |case_id| format!("{SUITE_NAME}:{case_id}"),
    );
    let mut log = ForensicLog::new();
    log.record(ForensicEventKind::SuiteStart {
        suite: suite.clone(),
        seed: config.seed,
        case_filter: case_filter.map(str::to_owned),
    });

    let fixtures = match load_fixtures(config, case_filter) {
        Ok(fixtures) => fixtures,
        Err(err) => {
            log.record(ForensicEventKind::Error {
                phase: "load_fixtures".to_owned(),
                message: err.to_string(),
            });
            flush_log(config, &log)?;
            return Err(err);
        }
    };
    if let (Some(case_id), true) = (case_filter, fixtures.is_empty()) {
        let err = HarnessError::FixtureFormat(format!("no fixture with case_id '{case_id}'"));
        log.record(ForensicEventKind::Error {
            phase: "select_case".to_owned(),
            message: err.to_string(),
        });
        flush_log(config, &log)?;
        return Err(err);
    }
    info!(%suite, fixtures = fixtures.len(), seed = config.seed, "suite start");

    let mut session = Session::connect(SessionConfig {
        name: suite.clone(),
        ..SessionConfig::default()
    });
    let mut results = Vec::with_capacity(fixtures.len());
    for fixture in &fixtures {
        let seed = case_seed(config.seed, &fixture.case_id);
        log.record(ForensicEventKind::CaseStart {
            case_id: fixture.case_id.clone(),
            operation: fixture.operation,
            seed,
        });
        let result = run_fixture(config, &mut session, fixture, seed);
        log.record(ForensicEventKind::CaseEnd {
            case_id: result.case_id.clone(),
            status: result.status,
            mismatch: result.mismatch.clone(),
            elapsed_us: result.elapsed_us,
        });
        results.push(result);
    }
    session.disconnect();

    let passed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Pass)
        .count();
    let failed = results.len() - passed;
    log.record(ForensicEventKind::SuiteEnd {
        suite: suite.clone(),
        total_fixtures: results.len(),
        passed,
        failed,
    });
    info!(%suite, passed, failed, "suite end");
    flush_log(config, &log)?;

    Ok(SuiteReport {
        suite,
        seed: config.seed,
        fixture_count: results.len(),
        passed,
        failed,
        results,
        forensic_log: log,
    })
}

fn flush_log(config: &HarnessConfig, log: &ForensicLog) -> Result<(), HarnessError> {
    match &config.forensic_log_path {
        Some(path) => log.write_jsonl(path),
        None => Ok(()),
    }
}

pub fn load_fixtures(
    config: &HarnessConfig,
    case_filter: Option<&str>,
) -> Result<Vec<PacketFixture>, HarnessError> {
    let fixture_files = list_fixture_files(&config.packet_fixture_root())?;
    let mut fixtures = Vec::with_capacity(fixture_files.len());

    for fixture_path in fixture_files {
        let fixture = load_fixture(&fixture_path)?;
        if case_filter.is_none_or(|case_id| fixture.case_id == case_id) {
            fixtures.push(fixture);
        }
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

fn load_fixture(path: &Path) -> Result<PacketFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}

pub fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Per-case RNG seed: the suite seed mixed with an FNV-1a hash of the case id.
#[must_use]
pub fn case_seed(suite_seed: u64, case_id: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in case_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    suite_seed ^ hash
}

#[must_use]
pub fn run_fixture(
    config: &HarnessConfig,
    session: &mut Session,
    fixture: &PacketFixture,
    seed: u64,
) -> CaseResult {
    let mut rng = StdRng::seed_from_u64(seed);
    let started = Instant::now();
    let mismatch = run_fixture_operation(config, session, fixture, &mut rng).err();
    let elapsed_us = (started.elapsed().as_micros() as u64).max(1);

    match &mismatch {
        Some(reason) => warn!(case_id = %fixture.case_id, %reason, "case failed"),
        None => debug!(case_id = %fixture.case_id, elapsed_us, "case passed"),
    }

    CaseResult {
        case_id: fixture.case_id.clone(),
        operation: fixture.operation,
        status: if mismatch.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        mismatch,
        seed,
        elapsed_us,
    }
}

fn run_fixture_operation(
    config: &HarnessConfig,
    session: &mut Session,
    fixture: &PacketFixture,
    rng: &mut StdRng,
) -> Result<(), String> {
    let key = fixture.source.as_str();
    let source = load_source(config, session, key)
        .map_err(|err| format!("source '{key}' failed to load: {err}"))?;
    let selector = resolve_selector(fixture, &source, rng)?;
    let percent = resolve_percent(fixture, rng)?;
    debug!(case_id = %fixture.case_id, column = %selector, percent, "case inputs");

    match fixture.operation {
        FixtureOperation::TopN | FixtureOperation::BottomN => {
            let direction = if fixture.operation == FixtureOperation::TopN {
                Direction::Top
            } else {
                Direction::Bottom
            };
            let outcome = session.extract(key, &selector, percent, direction);
            check_extraction(config, fixture, &source, direction, outcome)
        }
        FixtureOperation::SelectorEquivalence => {
            let direction = fixture.direction.unwrap_or(Direction::Top);
            let position = source
                .resolve_column(&selector)
                .map_err(|err| err.to_string())?;
            let (name, _) = source
                .column_at(position)
                .ok_or_else(|| format!("column position {position} vanished"))?;
            let by_name = session
                .extract(key, &ColumnSelector::from(name), percent, direction)
                .map_err(|err| format!("by-name extraction failed: {err}"))?;
            let by_index = session
                .extract(key, &ColumnSelector::ByIndex(position), percent, direction)
                .map_err(|err| format!("by-index extraction failed: {err}"))?;
            compare_results(&by_name, &by_index, config.tolerance)
        }
        FixtureOperation::Idempotence => {
            let direction = fixture.direction.unwrap_or(Direction::Top);
            let first = session
                .extract(key, &selector, percent, direction)
                .map_err(|err| format!("first extraction failed: {err}"))?;
            let second = session
                .extract(key, &selector, percent, direction)
                .map_err(|err| format!("second extraction failed: {err}"))?;
            if first.semantic_eq(&second) {
                Ok(())
            } else {
                Err("repeated extraction returned a different result".to_owned())
            }
        }
    }
}

/// Load a source CSV once per suite and keep it registered in the session.
fn load_source(
    config: &HarnessConfig,
    session: &mut Session,
    key: &str,
) -> Result<Arc<DataFrame>, HarnessError> {
    if let Ok(frame) = session.frame(key) {
        return Ok(frame);
    }
    let frame = read_csv_path(&config.fixture_path(key))?;
    Ok(session.register_frame(key, frame)?)
}

fn resolve_selector(
    fixture: &PacketFixture,
    source: &DataFrame,
    rng: &mut StdRng,
) -> Result<ColumnSelector, String> {
    match (&fixture.column_name, fixture.column_index, fixture.random_column) {
        (Some(name), None, false) => Ok(ColumnSelector::ByName(name.clone())),
        (None, Some(index), false) => Ok(ColumnSelector::ByIndex(index)),
        (None, None, true) => {
            if source.num_columns() == 0 {
                return Err("random_column needs a source with at least one column".to_owned());
            }
            Ok(ColumnSelector::ByIndex(
                rng.gen_range(0..source.num_columns()),
            ))
        }
        _ => Err(
            "fixture must set exactly one of column_name, column_index, random_column".to_owned(),
        ),
    }
}

fn resolve_percent(fixture: &PacketFixture, rng: &mut StdRng) -> Result<f64, String> {
    match (fixture.percent, &fixture.percent_choices) {
        (Some(percent), None) => Ok(percent),
        (None, Some(choices)) => choices
            .choose(rng)
            .copied()
            .ok_or_else(|| "percent_choices is empty".to_owned()),
        _ => Err("fixture must set exactly one of percent, percent_choices".to_owned()),
    }
}

fn check_extraction(
    config: &HarnessConfig,
    fixture: &PacketFixture,
    source: &DataFrame,
    direction: Direction,
    outcome: Result<DataFrame, SessionError>,
) -> Result<(), String> {
    if let Some(needle) = &fixture.expected_error_contains {
        return match outcome {
            Err(err) if err.to_string().contains(needle.as_str()) => Ok(()),
            Err(err) => Err(format!("expected error containing {needle:?}, got: {err}")),
            Ok(frame) => Err(format!(
                "expected error containing {needle:?}, got {} rows",
                frame.len()
            )),
        };
    }

    let actual = outcome.map_err(|err| format!("extraction failed: {err}"))?;
    match fixture.expected_rows {
        Some(expected_rows) if actual.len() != expected_rows => {
            return Err(format!(
                "row count mismatch: actual={}, expected={expected_rows}",
                actual.len()
            ));
        }
        _ => {}
    }

    verify_ordering(&actual, direction)?;
    verify_row_indices(&actual, source, config.tolerance)?;

    if let Some(answer_path) = &fixture.expected_answer {
        let answer = read_csv_path(&config.fixture_path(answer_path))
            .map_err(|err| format!("answer '{answer_path}' failed to load: {err}"))?;
        let replication = fixture.replication.unwrap_or(1);
        if let Err(reason) =
            compare_replicated_answer(&actual, &answer, replication, config.tolerance)
        {
            if let Ok(dump) = write_csv_string(&actual) {
                debug!(case_id = %fixture.case_id, result = %dump, "mismatching result");
            }
            return Err(reason);
        }
    }
    Ok(())
}

fn value_column(result: &DataFrame) -> Result<(&str, &[Scalar]), String> {
    let (name, column) = result
        .column_at(0)
        .ok_or_else(|| "extraction result has no columns".to_owned())?;
    Ok((name, column.values()))
}

fn row_index_column(result: &DataFrame) -> Result<&[Scalar], String> {
    result
        .column(ORIGINAL_ROW_INDICES)
        .map(|column| column.values())
        .ok_or_else(|| format!("extraction result has no '{ORIGINAL_ROW_INDICES}' column"))
}

/// Compare a result drawn from a source replicated `replication` times:
/// result row `i` must match answer row `i / replication`.
pub fn compare_replicated_answer(
    actual: &DataFrame,
    answer: &DataFrame,
    replication: usize,
    tolerance: f64,
) -> Result<(), String> {
    if replication == 0 {
        return Err("replication must be at least 1".to_owned());
    }
    let (name, values) = value_column(actual)?;
    let expected = answer
        .column(name)
        .ok_or_else(|| format!("answer has no column '{name}'"))?
        .values();

    let needed = values.len().div_ceil(replication);
    if needed > expected.len() {
        return Err(format!(
            "answer for '{name}' has {} rows, result needs {needed}",
            expected.len()
        ));
    }

    for (row, value) in values.iter().enumerate() {
        let want = &expected[row / replication];
        if !value.approx_eq(want, tolerance) {
            return Err(format!(
                "'{name}' mismatch at row {row}: actual={value:?}, expected={want:?}"
            ));
        }
    }
    Ok(())
}

/// Every row index must point at a source row holding the reported value.
pub fn verify_row_indices(
    actual: &DataFrame,
    source: &DataFrame,
    tolerance: f64,
) -> Result<(), String> {
    let (name, values) = value_column(actual)?;
    let indices = row_index_column(actual)?;
    let origin = source
        .column_names()
        .iter()
        .find(|candidate| result_value_name(candidate) == name)
        .and_then(|candidate| source.column(candidate))
        .ok_or_else(|| format!("source has no column for result values '{name}'"))?;

    for (row, (value, index)) in values.iter().zip(indices).enumerate() {
        let Scalar::Int64(index) = index else {
            return Err(format!("row {row}: row index {index:?} is not int64"));
        };
        let position = usize::try_from(*index)
            .map_err(|_| format!("row {row}: negative row index {index}"))?;
        let Some(source_value) = origin.value(position) else {
            return Err(format!(
                "row {row}: row index {position} out of range for {} source rows",
                origin.len()
            ));
        };
        if !source_value.approx_eq(value, tolerance) {
            return Err(format!(
                "row {row}: value {value:?} does not match source row {position} ({source_value:?})"
            ));
        }
    }
    Ok(())
}

/// Values must follow `direction`; equal values keep ascending row order.
pub fn verify_ordering(actual: &DataFrame, direction: Direction) -> Result<(), String> {
    let (name, values) = value_column(actual)?;
    let indices = row_index_column(actual)?;

    for row in 1..values.len() {
        let ascending = values[row - 1]
            .numeric_cmp(&values[row])
            .ok_or_else(|| format!("'{name}' row {row}: values are not comparable"))?;
        let in_order = match (direction, ascending) {
            (_, Ordering::Equal) => {
                matches!(indices[row - 1].numeric_cmp(&indices[row]), Some(Ordering::Less))
            }
            (Direction::Top, ordering) => ordering == Ordering::Greater,
            (Direction::Bottom, ordering) => ordering == Ordering::Less,
        };
        if !in_order {
            return Err(format!(
                "'{name}' out of {direction} order at row {row}: {:?} then {:?}",
                values[row - 1],
                values[row]
            ));
        }
    }
    Ok(())
}

/// Row-for-row comparison of two extraction results.
pub fn compare_results(left: &DataFrame, right: &DataFrame, tolerance: f64) -> Result<(), String> {
    if left.column_names() != right.column_names() {
        return Err(format!(
            "column mismatch: left={:?}, right={:?}",
            left.column_names(),
            right.column_names()
        ));
    }
    if left.len() != right.len() {
        return Err(format!(
            "row count mismatch: left={}, right={}",
            left.len(),
            right.len()
        ));
    }

    for name in left.column_names() {
        let (Some(a), Some(b)) = (left.column(name), right.column(name)) else {
            return Err(format!("column '{name}' missing"));
        };
        for (row, (l, r)) in a.values().iter().zip(b.values()).enumerate() {
            if !l.approx_eq(r, tolerance) {
                return Err(format!(
                    "column '{name}' mismatch at row {row}: left={l:?}, right={r:?}"
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tn_columnar::Column;
    use tn_frame::{DataFrame, Direction, ORIGINAL_ROW_INDICES};
    use tn_runtime::{Session, SessionConfig};
    use tn_types::Scalar;

    use super::{
        CaseStatus, FixtureOperation, ForensicEventKind, ForensicLog, HarnessConfig,
        HarnessError, PacketFixture, case_seed, compare_replicated_answer, compare_results,
        list_fixture_files, load_fixtures, run_case_by_id, run_fixture, run_suite,
        verify_ordering, verify_row_indices,
    };

    fn result(values: Column, rows: &[i64]) -> DataFrame {
        DataFrame::new(vec![
            ("v".to_owned(), values),
            (ORIGINAL_ROW_INDICES.to_owned(), Column::from_i64(rows)),
        ])
        .expect("result frame")
    }

    fn floats(values: &[f64]) -> Column {
        Column::from_values(values.iter().copied().map(Scalar::Float64).collect()).expect("floats")
    }

    #[test]
    fn default_paths_find_packet_fixtures() {
        let config = HarnessConfig::default_paths();
        let files = list_fixture_files(&config.packet_fixture_root()).expect("list");
        assert!(!files.is_empty());
        assert!(config.fixture_path("data/top_bottom_rep4.csv").exists());
    }

    #[test]
    fn fixtures_load_sorted_by_case_id() {
        let config = HarnessConfig::default_paths();
        let fixtures = load_fixtures(&config, None).expect("fixtures");
        let ids: Vec<&str> = fixtures.iter().map(|f| f.case_id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert!(
            fixtures
                .iter()
                .any(|f| f.operation == FixtureOperation::SelectorEquivalence)
        );
    }

    #[test]
    fn case_seed_is_stable_and_case_specific() {
        assert_eq!(case_seed(7, "a"), case_seed(7, "a"));
        assert_ne!(case_seed(7, "a"), case_seed(7, "b"));
        assert_ne!(case_seed(7, "a"), case_seed(8, "a"));
    }

    #[test]
    fn replicated_answer_matches_every_copy() {
        let actual = result(floats(&[3.3, 3.3, 2.2, 2.2]), &[0, 3, 1, 4]);
        let answer = DataFrame::new(vec![("v".to_owned(), floats(&[3.3, 2.2, 1.1]))])
            .expect("answer");
        compare_replicated_answer(&actual, &answer, 2, 1e-12).expect("match");

        let err = compare_replicated_answer(&actual, &answer, 1, 1e-12).expect_err("mismatch");
        assert!(err.contains("mismatch at row 1"), "{err}");
    }

    #[test]
    fn replicated_answer_needs_enough_rows_and_a_matching_column() {
        let actual = result(floats(&[3.0, 2.0, 1.0]), &[0, 1, 2]);
        let short = DataFrame::new(vec![("v".to_owned(), floats(&[3.0]))]).expect("short");
        assert!(compare_replicated_answer(&actual, &short, 1, 1e-12).is_err());

        let renamed = DataFrame::new(vec![("w".to_owned(), floats(&[3.0, 2.0, 1.0]))])
            .expect("renamed");
        let err = compare_replicated_answer(&actual, &renamed, 1, 1e-12).expect_err("no column");
        assert!(err.contains("no column 'v'"), "{err}");
    }

    #[test]
    fn row_indices_must_point_at_matching_source_values() {
        let source = DataFrame::new(vec![("v".to_owned(), floats(&[1.0, 5.0, 3.0]))])
            .expect("source");
        let good = result(floats(&[5.0, 3.0]), &[1, 2]);
        verify_row_indices(&good, &source, 1e-12).expect("valid");

        let wrong = result(floats(&[5.0, 3.0]), &[1, 0]);
        assert!(verify_row_indices(&wrong, &source, 1e-12).is_err());

        let out_of_range = result(floats(&[5.0]), &[9]);
        let err = verify_row_indices(&out_of_range, &source, 1e-12).expect_err("range");
        assert!(err.contains("out of range"), "{err}");
    }

    #[test]
    fn ordering_check_enforces_direction_and_tie_order() {
        let top = result(floats(&[5.0, 5.0, 1.0]), &[1, 4, 0]);
        verify_ordering(&top, Direction::Top).expect("top order");
        assert!(verify_ordering(&top, Direction::Bottom).is_err());

        let bad_ties = result(floats(&[5.0, 5.0]), &[4, 1]);
        assert!(verify_ordering(&bad_ties, Direction::Top).is_err());
    }

    #[test]
    fn compare_results_reports_first_difference() {
        let left = result(floats(&[2.0, 1.0]), &[0, 1]);
        let right = result(floats(&[2.0, 1.5]), &[0, 1]);
        compare_results(&left, &left, 1e-12).expect("self");
        let err = compare_results(&left, &right, 1e-12).expect_err("diff");
        assert!(err.contains("column 'v' mismatch at row 1"), "{err}");
    }

    #[test]
    fn ambiguous_column_fixture_fails_the_case() {
        let config = HarnessConfig::default_paths();
        let fixture: PacketFixture = serde_json::from_str(
            r#"{
                "case_id": "ambiguous",
                "operation": "top_n",
                "source": "data/top_bottom_rep4.csv",
                "column_name": "C1",
                "random_column": true,
                "percent": 4
            }"#,
        )
        .expect("fixture json");
        let mut session = Session::connect(SessionConfig::default());
        let outcome = run_fixture(&config, &mut session, &fixture, 1);
        assert_eq!(outcome.status, CaseStatus::Fail);
        assert!(
            outcome
                .mismatch
                .as_deref()
                .is_some_and(|m| m.contains("exactly one of"))
        );
    }

    #[test]
    fn bottom_fixture_checked_against_top_answer_fails() {
        let config = HarnessConfig::default_paths();
        let fixture: PacketFixture = serde_json::from_str(
            r#"{
                "case_id": "crossed_answer",
                "operation": "bottom_n",
                "source": "data/top_bottom_rep4.csv",
                "column_index": 1,
                "percent": 8,
                "expected_answer": "data/top_20_percent.csv",
                "replication": 4
            }"#,
        )
        .expect("fixture json");
        let mut session = Session::connect(SessionConfig::default());
        let outcome = run_fixture(&config, &mut session, &fixture, 1);
        assert_eq!(outcome.status, CaseStatus::Fail);
    }

    #[test]
    fn suite_is_green_and_logs_every_case() {
        let report = run_suite(&HarnessConfig::default_paths()).expect("suite");
        for failure in report.failures() {
            eprintln!("[TEST] {}: {:?}", failure.case_id, failure.mismatch);
        }
        assert!(report.is_green());

        let case_ends = report
            .forensic_log
            .events
            .iter()
            .filter(|entry| matches!(entry.event, ForensicEventKind::CaseEnd { .. }))
            .count();
        assert_eq!(case_ends, report.fixture_count);
        assert!(matches!(
            report.forensic_log.events.first().map(|e| &e.event),
            Some(ForensicEventKind::SuiteStart { .. })
        ));
    }

    #[test]
    fn unknown_case_id_is_an_error() {
        let err = run_case_by_id(&HarnessConfig::default_paths(), "no_such_case")
            .expect_err("unknown case");
        assert!(matches!(err, HarnessError::FixtureFormat(_)));
    }

    #[test]
    fn unknown_case_id_is_logged_before_failing() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let config = HarnessConfig {
            forensic_log_path: Some(file.path().to_path_buf()),
            ..HarnessConfig::default_paths()
        };
        run_case_by_id(&config, "no_such_case").expect_err("unknown case");

        let body = std::fs::read_to_string(file.path()).expect("read back");
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""kind":"suite_start""#), "{}", lines[0]);
        assert!(lines[1].contains(r#""kind":"error""#), "{}", lines[1]);
        assert!(lines[1].contains("no_such_case"), "{}", lines[1]);
    }

    #[test]
    fn row_indices_resolve_a_source_column_named_like_the_index_column() {
        let source = DataFrame::new(vec![(
            ORIGINAL_ROW_INDICES.to_owned(),
            Column::from_i64(&[7, 2, 9]),
        )])
        .expect("source");
        let out = source.bottom_n(0_usize, 50.0).expect("extraction");
        verify_row_indices(&out, &source, 0.0).expect("indices point at source rows");
        verify_ordering(&out, Direction::Bottom).expect("bottom order");
    }

    #[test]
    fn forensic_log_writes_one_line_per_event() {
        let mut log = ForensicLog::new();
        assert!(log.is_empty());
        log.record(ForensicEventKind::Error {
            phase: "test".to_owned(),
            message: "boom".to_owned(),
        });
        log.record(ForensicEventKind::SuiteEnd {
            suite: "s".to_owned(),
            total_fixtures: 0,
            passed: 0,
            failed: 0,
        });

        let file = tempfile::NamedTempFile::new().expect("temp file");
        log.write_jsonl(file.path()).expect("write");
        let body = std::fs::read_to_string(file.path()).expect("read back");
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), log.len());
        assert!(lines[0].contains(r#""kind":"error""#), "{}", lines[0]);
    }
}
