#![forbid(unsafe_code)]

use std::path::PathBuf;

use tn_conformance::{CaseStatus, HarnessConfig, run_case_by_id, run_suite};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut case_filter: Option<String> = None;
    let mut require_green = false;
    let mut verbose = false;
    let mut config = HarnessConfig::default_paths();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--case-id" => {
                let value = args
                    .next()
                    .ok_or("--case-id requires a value (e.g. top_n_rep4_random)")?;
                case_filter = Some(value);
            }
            "--seed" => {
                let value = args.next().ok_or("--seed requires an integer")?;
                config.seed = value
                    .parse()
                    .map_err(|_| format!("invalid --seed value: {value}"))?;
            }
            "--tolerance" => {
                let value = args.next().ok_or("--tolerance requires a number")?;
                config.tolerance = value
                    .parse()
                    .map_err(|_| format!("invalid --tolerance value: {value}"))?;
            }
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a path")?;
                config.fixture_root = PathBuf::from(value);
            }
            "--forensic-log" => {
                let value = args.next().ok_or("--forensic-log requires a path")?;
                config.forensic_log_path = Some(PathBuf::from(value));
            }
            "--require-green" => {
                require_green = true;
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let report = match case_filter.as_deref() {
        Some(case_id) => run_case_by_id(&config, case_id)?,
        None => run_suite(&config)?,
    };

    for result in &report.results {
        let status = match result.status {
            CaseStatus::Pass => "pass",
            CaseStatus::Fail => "FAIL",
        };
        println!(
            "case={} op={} status={} seed={} elapsed_us={}",
            result.case_id,
            result.operation.operation_name(),
            status,
            result.seed,
            result.elapsed_us
        );
        if let Some(mismatch) = &result.mismatch {
            println!("  mismatch: {mismatch}");
        }
    }
    println!(
        "suite={} seed={} fixtures={} passed={} failed={} green={}",
        report.suite,
        report.seed,
        report.fixture_count,
        report.passed,
        report.failed,
        report.is_green()
    );
    if let Some(path) = &config.forensic_log_path {
        println!("wrote forensic_log={}", path.display());
    }

    if require_green && !report.is_green() {
        return Err(format!("{} of {} cases failed", report.failed, report.fixture_count).into());
    }

    Ok(())
}

fn print_help() {
    println!(
        "tn-conformance-cli\n\
         Usage:\n\
         \ttn-conformance-cli [--case-id ID] [--seed N] [--tolerance X] [--forensic-log PATH] [--require-green]\n\
         Options:\n\
         \t--case-id <id>        Run only one fixture case\n\
         \t--seed <n>            Suite seed for random column and percent picks\n\
         \t--tolerance <x>       Absolute tolerance for answer comparison (default 1e-12)\n\
         \t--fixture-root <dir>  Fixture directory holding packets/ and data/\n\
         \t--forensic-log <path> Write the run's forensic events as JSONL\n\
         \t--require-green       Exit non-zero when any case fails\n\
         \t-v, --verbose         Log per-case detail\n\
         \t-h, --help            Show this help"
    );
}
