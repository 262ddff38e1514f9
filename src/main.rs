mod buffer;
mod config;
mod database;
mod error;
mod generator;
mod injector;
mod loader;
mod orchestrator;
mod workload;

use crate::config::{
    BenchConfig, DEFAULT_CACHE_KIB, DEFAULT_DELAY_US, DEFAULT_READS_PER_ROW, DEFAULT_ROWS,
    DEFAULT_SEED,
};
use crate::database::DatabaseType;
use crate::workload::ReadErrorMode;
use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// Measure whether cache-resident reads stay fast while another thread
/// stalls on slow, cache-missing reads.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (repeatable)
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (repeatable)
    #[arg(short = 'q', action = ArgAction::Count)]
    quiet: u8,

    /// Rows to load
    #[arg(short = 'n', value_name = "ROWCOUNT", default_value_t = DEFAULT_ROWS)]
    rows: u64,

    /// Hot-reader reads per loaded row
    #[arg(long, default_value_t = DEFAULT_READS_PER_ROW)]
    reads_per_row: u64,

    /// Artificial delay added to every block read, in microseconds
    #[arg(long, value_name = "MICROS", default_value_t = DEFAULT_DELAY_US)]
    delay_us: u64,

    /// Store page cache size
    #[arg(long, value_name = "KIB", default_value_t = DEFAULT_CACHE_KIB)]
    cache_kib: usize,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Directory to create the store in; only its kvisolate-store subdirectory is
    /// replaced [default: a scratch directory]
    #[arg(long)]
    dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = DatabaseType::Redb)]
    database: DatabaseType,

    /// Reads take exclusive row locks (mem-btree only)
    #[arg(long)]
    exclusive_reads: bool,

    /// Count lock-not-granted and deadlock lookups instead of aborting
    #[arg(long)]
    lenient: bool,

    /// Check every loaded row before the trials
    #[arg(long)]
    verify: bool,

    #[arg(skip)]
    verbosity: u8,
}

impl Cli {
    fn parse_from_args<I, T>(args: I) -> Result<Cli, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let mut cli = Cli::try_parse_from(args.iter())?;
        cli.verbosity = if cli.quiet == 0 { cli.verbose } else { verbosity_in_order(&args) };
        Ok(cli)
    }
}

/// Apply `-v` and `-q` left to right, never dropping below zero. clap only
/// keeps the counts, so the order is read back from arguments it has already
/// accepted; in those, every token starting with `-` is a flag.
fn verbosity_in_order(args: &[OsString]) -> u8 {
    let mut level: u8 = 0;
    for arg in args.iter().skip(1).map(OsString::as_os_str).map(OsStr::to_string_lossy) {
        if arg == "--" {
            break;
        }
        let Some(cluster) = arg.strip_prefix('-') else { continue };
        if cluster.starts_with('-') {
            continue;
        }
        for flag in cluster.chars() {
            match flag {
                'v' => level = level.saturating_add(1),
                'q' => level = level.saturating_sub(1),
                // anything else takes the rest of the cluster as its value
                _ => break,
            }
        }
    }
    level
}

impl From<&Cli> for BenchConfig {
    fn from(cli: &Cli) -> Self {
        BenchConfig {
            rows: cli.rows,
            reads_per_row: cli.reads_per_row,
            injected_delay: Duration::from_micros(cli.delay_us),
            cache_bytes: cli.cache_kib.saturating_mul(1024),
            seed: cli.seed,
            dir: cli.dir.clone(),
            database: cli.database,
            exclusive_reads: cli.exclusive_reads,
            error_mode: if cli.lenient { ReadErrorMode::Lenient } else { ReadErrorMode::Strict },
            verify: cli.verify,
        }
    }
}

/// Parse arguments; a bad flag or value prints usage and exits with 1.
fn parse_args() -> Cli {
    match Cli::parse_from_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::builder().with_default_directive(level.into()).from_env_lossy())
        .init();
}

fn main() -> Result<()> {
    let cli = parse_args();
    init_tracing(cli.verbosity);

    let config = BenchConfig::from(&cli);
    config.validate()?;
    let report = orchestrator::run_benchmark(&config)?;
    println!("{report}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::parse_from_args(std::iter::once("kvisolate").chain(args.iter().copied()))
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.rows, 100_000);
        assert_eq!(cli.verbosity, 0);
        let config = BenchConfig::from(&cli);
        assert_eq!(config.error_mode, ReadErrorMode::Strict);
        assert_eq!(config.database, DatabaseType::Redb);
        assert!(config.dir.is_none());
    }

    #[test]
    fn verbosity_counts_up_and_down() {
        assert_eq!(parse(&["-v", "-v", "-q"]).unwrap().verbosity, 1);
        assert_eq!(parse(&["-vvv"]).unwrap().verbosity, 3);
        assert_eq!(parse(&["-q", "-q"]).unwrap().verbosity, 0);
    }

    #[test]
    fn quiet_before_verbose_cannot_go_below_zero() {
        assert_eq!(parse(&["-q", "-v"]).unwrap().verbosity, 1);
        assert_eq!(parse(&["-qvv"]).unwrap().verbosity, 2);
        assert_eq!(parse(&["-vq", "-q", "-v"]).unwrap().verbosity, 1);
        assert_eq!(parse(&["-q", "-n", "10", "-vv", "--seed", "3", "-q"]).unwrap().verbosity, 1);
        assert_eq!(parse(&["-vn", "10", "-q"]).unwrap().verbosity, 0);
        assert_eq!(parse(&["-qvn5"]).unwrap().verbosity, 1);
    }

    #[test]
    fn row_count_override() {
        let cli = parse(&["-n", "1000"]).unwrap();
        assert_eq!(BenchConfig::from(&cli).hot_reads(), 10_000);
    }

    #[test]
    fn malformed_row_count_is_rejected() {
        assert!(parse(&["-n", "12x"]).is_err());
        assert!(parse(&["-n"]).is_err());
        assert!(parse(&["-n", "-5"]).is_err());
    }

    #[test]
    fn unknown_flag_is_rejected() {
        let err = parse(&["-x"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn long_options_reach_the_config() {
        let cli = parse(&[
            "--delay-us",
            "250",
            "--cache-kib",
            "64",
            "--database",
            "mem-btree",
            "--exclusive-reads",
            "--lenient",
            "--dir",
            "/tmp/kvisolate",
        ])
        .unwrap();
        let config = BenchConfig::from(&cli);
        assert_eq!(config.injected_delay, Duration::from_micros(250));
        assert_eq!(config.cache_bytes, 64 * 1024);
        assert_eq!(config.database, DatabaseType::MemBtree);
        assert_eq!(config.error_mode, ReadErrorMode::Lenient);
        assert_eq!(config.dir, Some(PathBuf::from("/tmp/kvisolate")));
        config.validate().unwrap();
    }
}
