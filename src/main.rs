//! SeisFlow CLI Entry Point
//!
//! Runs a CyberShake batch described by a configuration file.
//!
//! # Usage
//!
//! ```bash
//! # Run every configured site
//! seisflow setup.json
//!
//! # Resume existing run directories from their checkpoints
//! seisflow setup.json --restart
//!
//! # Write the stage scripts without launching anything
//! seisflow setup.json --dry-run
//!
//! # Override the worker pool size
//! seisflow setup.json --workers 8
//! ```

use std::env;
use std::process::ExitCode;

use colored::Colorize;
use log::info;

use seisflow::config::load_config;
use seisflow::execution::{BatchReport, Dispatcher, RunStatus};
use seisflow::{FlowError, APP_NAME, VERSION};

/// Configuration file used when none is specified.
const DEFAULT_CONFIG: &str = "setup.json";

/// Exit code for malformed command lines.
const USAGE_EXIT_CODE: u8 = 1;

/// Command-line options parsed from arguments.
#[derive(Debug)]
struct CliOptions {
    config_path: String,
    dry_run: bool,
    restart: bool,
    workers: Option<usize>,
    verbose: bool,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            config_path: DEFAULT_CONFIG.to_string(),
            dry_run: false,
            restart: false,
            workers: None,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("CyberShake Workflow Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: seisflow [OPTIONS] [CONFIG_FILE]");
    println!();
    println!("Arguments:");
    println!(
        "  [CONFIG_FILE]       Run configuration, JSON or YAML (default: {})",
        DEFAULT_CONFIG
    );
    println!();
    println!("Options:");
    println!("  --restart           Resume existing run directories from their checkpoints");
    println!("  --dry-run           Write stage scripts without launching them");
    println!("  --workers N         Maximum site pipelines in flight");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  seisflow setup.json");
    println!("  seisflow setup.json --restart --workers 4");
}

/// Parses command-line arguments into [`CliOptions`].
fn parse_arguments(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut positional_seen = false;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => options.dry_run = true,
            "--restart" => options.restart = true,
            "--verbose" | "-v" => options.verbose = true,
            "--workers" => {
                i += 1;
                if i >= args.len() {
                    return Err("--workers requires a number argument".to_string());
                }
                let workers: usize = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid workers value: {}", args[i]))?;
                if workers == 0 {
                    return Err("--workers must be at least 1".to_string());
                }
                options.workers = Some(workers);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if positional_seen {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                options.config_path = arg.clone();
                positional_seen = true;
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Prints one line per site plus the batch totals.
fn print_summary(report: &BatchReport, show_timelines: bool) {
    println!();
    println!("{}", "Run summary".bold());
    for outcome in &report.outcomes {
        let name = outcome.run.name();
        let line = match &outcome.status {
            RunStatus::Completed => format!(
                "  {:<16} {} ({} stages, {:.1}s)",
                name,
                "completed".green(),
                outcome.stages.len(),
                outcome.elapsed.as_secs_f64()
            ),
            RunStatus::AlreadyDone => format!("  {:<16} {}", name, "already done".green()),
            RunStatus::Skipped { reason } => {
                format!("  {:<16} {} ({})", name, "skipped".yellow(), reason)
            }
            RunStatus::Failed { stage, error, .. } => {
                let at = stage.map(|s| s.to_string()).unwrap_or_else(|| "setup".to_string());
                format!("  {:<16} {} at {}: {}", name, "failed".red(), at, error)
            }
            other => format!("  {:<16} {}", name, other.label()),
        };
        println!("{}", line);
    }

    if show_timelines {
        for outcome in &report.outcomes {
            let rendered = outcome.timeline.render();
            if !rendered.is_empty() {
                println!();
                println!("{}", outcome.run.name());
                print!("{}", rendered);
            }
        }
    }

    println!();
    println!(
        "{} completed, {} already done, {} skipped, {} failed in {:.1}s",
        report.count("completed"),
        report.count("already done"),
        report.count("skipped"),
        report.count("failed"),
        report.elapsed.as_secs_f64()
    );
    println!("{}", report.resource_summary);
}

/// Parses the arguments, printing usage and returning the usage exit code
/// on failure.
fn parse_or_usage(args: &[String]) -> Result<CliOptions, u8> {
    parse_arguments(args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        USAGE_EXIT_CODE
    })
}

/// Runs the batch; returns the process exit code.
fn run(options: CliOptions) -> Result<u8, FlowError> {
    setup_logging(options.verbose);
    print_banner();

    let mut config = load_config(&options.config_path)?;
    if options.restart {
        config.compute.restart = true;
    }
    if let Some(workers) = options.workers {
        config.compute.workers = workers;
    }

    info!(
        "{} site(s), output under {}",
        config.input.sites.len(),
        config.output.path.display()
    );
    if options.dry_run {
        info!("Mode: DRY RUN (scripts are written but not launched)");
        println!();
    }

    let mut dispatcher = Dispatcher::new(config);
    dispatcher.set_dry_run(options.dry_run);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(dispatcher.run())?;

    print_summary(&report, options.verbose);
    Ok(report.exit_code())
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let options = match parse_or_usage(&args) {
        Ok(options) => options,
        Err(code) => return ExitCode::from(code),
    };

    match run(options) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("seisflow")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults() {
        let options = parse_arguments(&args(&[])).unwrap();
        assert_eq!(options.config_path, DEFAULT_CONFIG);
        assert!(!options.dry_run);
        assert!(options.workers.is_none());
    }

    #[test]
    fn test_flags_and_config_path() {
        let argv = args(&["run.yaml", "--restart", "--dry-run", "--workers", "3"]);
        let options = parse_arguments(&argv).unwrap();
        assert_eq!(options.config_path, "run.yaml");
        assert!(options.restart);
        assert!(options.dry_run);
        assert_eq!(options.workers, Some(3));
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(parse_arguments(&args(&["--workers"])).is_err());
        assert!(parse_arguments(&args(&["--workers", "0"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.json", "b.json"])).is_err());
    }

    #[test]
    fn test_usage_errors_exit_with_one() {
        for bad in [&["--bogus"][..], &["--workers", "0"], &["a.json", "b.json"]] {
            assert_eq!(parse_or_usage(&args(bad)).unwrap_err(), 1);
        }
        assert_ne!(USAGE_EXIT_CODE, FlowError::Config(String::new()).exit_code());
        assert!(parse_or_usage(&args(&["setup.yaml"])).is_ok());
    }
}
