//! CLI entry point for the snooping topology runner.

use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use interconnect_core::{SimConfig, SimTime};
use rand as _;
use serde as _;
use serde_json as _;
use snoop_sim::{run, RunReport, SimError};
#[cfg(test)]
use tempfile as _;
use thiserror as _;
use tracing as _;
use tracing_subscriber::EnvFilter;

const USAGE_TEXT: &str = "\
Usage: snoop-sim <command> [options]

Commands:
  run  Simulate the reference snooping topology

Options:
  --seed <n>        Seed for memory contents and the access pattern (default: 0)
  --log <file>      Write one line per trace event to <file>
  --json            Print the run report as JSON
  --until-us <n>    Stop once global time would pass <n> microseconds
  -h, --help        Show this help message

Environment:
  RUST_LOG          Diagnostic log filter (default: warn)

Examples:
  snoop-sim run
  snoop-sim run --seed 7 --log snooping.log
  snoop-sim run --json --until-us 3
";

#[derive(Debug, PartialEq, Eq, Default)]
struct RunArgs {
    seed: u64,
    log: Option<PathBuf>,
    json: bool,
    until_us: Option<u64>,
}

#[derive(Debug)]
enum ParseResult {
    Run(RunArgs),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "run" => parse_run_args(args).map(ParseResult::Run),
        other => Err(format!("unknown command: {other}")),
    }
}

fn parse_number(flag: &str, value: Option<OsString>) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("missing value for {flag}"))?;
    let text = value.to_string_lossy();
    text.parse()
        .map_err(|_| format!("invalid value for {flag}: {text}"))
}

#[allow(clippy::while_let_on_iterator)]
fn parse_run_args(mut args: impl Iterator<Item = OsString>) -> Result<RunArgs, String> {
    let mut parsed = RunArgs::default();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--json" {
            parsed.json = true;
            continue;
        }

        if arg == "--seed" {
            parsed.seed = parse_number("--seed", args.next())?;
            continue;
        }

        if arg == "--until-us" {
            parsed.until_us = Some(parse_number("--until-us", args.next())?);
            continue;
        }

        if arg == "--log" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --log".to_string())?;
            parsed.log = Some(PathBuf::from(value));
            continue;
        }

        return Err(format!("unknown option: {}", arg.to_string_lossy()));
    }

    Ok(parsed)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_report(report: &RunReport) {
    let summary = &report.summary;
    let tallies = &report.tallies;
    println!("Simulation finished at {} (seed {})", summary.end_time, report.config.seed);
    println!(
        "  processes: {} finished, {} waiting, {} runnable; {} resumptions",
        summary.finished, summary.waiting, summary.runnable, summary.resumptions
    );
    println!(
        "  accesses: {} regular, {} direct, {} failed",
        tallies.regular_accesses, tallies.direct_accesses, tallies.failed_accesses
    );
    println!(
        "  grants: {} added, {} denied; snoops armed: {}",
        tallies.grants_added, tallies.grants_denied, tallies.snoops_armed
    );
    println!(
        "  cache: {} steps, {} invalidations; synchronisations: {}",
        tallies.cached_steps, tallies.cache_invalidations, tallies.synchronisations
    );
}

fn run_sim(args: &RunArgs) -> Result<(), i32> {
    let config = SimConfig {
        seed: args.seed,
        ..SimConfig::default()
    };
    let until = args.until_us.map(SimTime::from_us);

    let result = match &args.log {
        Some(path) => match File::create(path) {
            Ok(file) => run(config, Some(BufWriter::new(file)), until),
            Err(error) => {
                eprintln!("error: failed to create {}: {error}", path.display());
                return Err(1);
            }
        },
        None => run::<std::io::Sink>(config, None, until),
    };

    let report = match result {
        Ok(report) => report,
        Err(error @ SimError::Protocol(_)) => {
            eprintln!("error: {error}");
            return Err(2);
        }
        Err(error) => {
            eprintln!("error: {error}");
            return Err(1);
        }
    };

    if args.json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(error) => {
                eprintln!("error: {error}");
                return Err(1);
            }
        }
    } else {
        print_report(&report);
    }
    Ok(())
}

fn main() {
    init_tracing();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Run(args)) => match run_sim(&args) {
            Ok(()) => 0,
            Err(code) => code,
        },
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}
