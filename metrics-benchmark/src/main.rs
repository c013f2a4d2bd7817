use std::{env, fs, process::ExitCode, time::Duration};

use getopts::{Matches, Options};
use log::{error, info, warn};
use metrics_harness::{
    reporter::ReporterConfig, AdapterFactory, AdapterKind, Benchmark, IterationMode, Suite,
    SuiteReport, TrialConfig, WarmupAccounting,
};

mod alloc;
use self::alloc::{CountingAllocator, GlobalProbe};

#[global_allocator]
static ALLOCATOR: CountingAllocator = CountingAllocator::new();

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optmulti("a", "adapter", "adapter to benchmark, or `all` (default: all)", "NAME");
    opts.optmulti("b", "benchmark", "benchmark to run, or `all` (default: all)", "NAME");
    opts.optopt("t", "threads", "number of worker threads (default: 16)", "INTEGER");
    opts.optopt("w", "warmup", "number of warm-up iterations (default: 2)", "INTEGER");
    opts.optopt("m", "measure", "number of measurement iterations (default: 2)", "INTEGER");
    opts.optopt("s", "batch-size", "operations per timed batch (default: 1000)", "INTEGER");
    opts.optopt("n", "batches", "batches per worker per iteration (default: 1000)", "INTEGER");
    opts.optopt("d", "iteration-time", "run each iteration for this many milliseconds", "INTEGER");
    opts.optopt("", "timeout", "wall-clock cap per trial in seconds (default: 300)", "INTEGER");
    opts.optopt("", "baseline", "trial to compare every other trial against", "ADAPTER/BENCHMARK");
    opts.optopt("j", "json", "write the results as JSON to this file", "PATH");
    opts.optflag("", "include-warmup", "count warm-up operations in the measured registry");
    opts.optopt("r", "reporter-step", "log every meter every this many seconds", "INTEGER");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn parse_opt<T: std::str::FromStr>(matches: &Matches, name: &str, default: T) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    match matches.opt_str(name) {
        Some(value) => value.parse().map_err(|e| format!("invalid --{} `{}`: {}", name, value, e)),
        None => Ok(default),
    }
}

fn is_all(value: &str) -> bool {
    value.eq_ignore_ascii_case("all")
}

/// Whether `name` was given and names only concrete items.
fn names_concrete(matches: &Matches, name: &str) -> bool {
    let values = matches.opt_strs(name);
    !values.is_empty() && !values.iter().any(|v| is_all(v))
}

fn parse_all<T>(matches: &Matches, name: &str, all: Vec<T>) -> Result<Vec<T>, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if !names_concrete(matches, name) {
        return Ok(all);
    }
    matches.opt_strs(name).iter().map(|v| v.parse().map_err(|e: T::Err| e.to_string())).collect()
}

fn config(matches: &Matches) -> Result<TrialConfig, String> {
    let defaults = TrialConfig::default();

    let iteration = match matches.opt_str("iteration-time") {
        Some(_) => {
            IterationMode::Time(Duration::from_millis(parse_opt(matches, "iteration-time", 0)?))
        }
        None => IterationMode::Operations { batches: parse_opt(matches, "batches", 1_000)? },
    };
    let reporter = match matches.opt_str("reporter-step") {
        Some(_) => Some(ReporterConfig {
            step: Duration::from_secs(parse_opt(matches, "reporter-step", 60)?),
            ..Default::default()
        }),
        None => None,
    };

    Ok(TrialConfig {
        threads: parse_opt(matches, "threads", defaults.threads)?,
        warmup_iterations: parse_opt(matches, "warmup", defaults.warmup_iterations)?,
        measurement_iterations: parse_opt(matches, "measure", defaults.measurement_iterations)?,
        batch_size: parse_opt(matches, "batch-size", defaults.batch_size)?,
        iteration,
        warmup: if matches.opt_present("include-warmup") {
            WarmupAccounting::Included
        } else {
            WarmupAccounting::Excluded
        },
        timeout: Duration::from_secs(parse_opt(matches, "timeout", defaults.timeout.as_secs())?),
        reporter,
        ..defaults
    })
}

fn suite(matches: &Matches) -> Result<Suite, String> {
    let config = config(matches)?;
    config.validate().map_err(|e| e.to_string())?;

    let adapters = parse_all(matches, "adapter", AdapterKind::ALL.to_vec())?;
    let benchmarks = parse_all(matches, "benchmark", Benchmark::all())?;
    let explicit = names_concrete(matches, "adapter") && names_concrete(matches, "benchmark");

    let mut suite = Suite::new(config).with_probe(GlobalProbe(&ALLOCATOR));
    for adapter in adapters {
        let supported = adapter.build().map_err(|e| e.to_string())?;
        for benchmark in &benchmarks {
            // Expanded combinations skip what the adapter cannot do. Explicit ones run and fail.
            let skip = benchmark.policy().is_some_and(|policy| !supported.supports(policy));
            if skip && !explicit {
                info!("skipping {}/{}: unsupported histogram policy", adapter, benchmark);
                continue;
            }
            suite.add(adapter, benchmark.clone());
        }
    }

    Ok(suite)
}

fn main() -> ExitCode {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return ExitCode::from(2);
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return ExitCode::SUCCESS;
    }

    let suite = match suite(&matches) {
        Ok(suite) => suite,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };
    if suite.is_empty() {
        warn!("nothing to run");
        return ExitCode::SUCCESS;
    }

    info!("metrics harness: {} trials", suite.len());
    let results = suite.run();
    let report = SuiteReport::new(&results, matches.opt_str("baseline").as_deref());
    print!("{}", report);

    if let Some(path) = matches.opt_str("json") {
        let written = report.to_json().map_err(|e| e.to_string()).and_then(|json| {
            fs::write(&path, json).map_err(|e| e.to_string())
        });
        match written {
            Ok(()) => info!("results written to {}", path),
            Err(e) => {
                error!("failed to write results to {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        }
    }

    if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
