//! fwunit - unit tests for firewall rules
//!
//! Prepares normalized rule sets from configured sources and answers
//! questions about them from the command line.
//!
//! # Usage
//!
//! ```bash
//! fwunit prep                                   # Prepare every source
//! fwunit prep global                            # Prepare one source and its dependencies
//! fwunit query global permitted 10.0.0.1 172.16.0.5 ssh
//! fwunit sources-for global 172.16.0.5 ssh --ignore 10.0.0.0/8
//! fwunit apps global 10.0.0.0/24 172.16.0.5
//! ```
//!
//! # Exit codes
//!
//! - 0: decisive answer (or successful prep)
//! - 1: error
//! - 2: the flow is only partially permitted

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use fwunit::config::Config;
use fwunit::core::assertions::TestContext;
use fwunit::core::cache::RuleCache;
use fwunit::core::query::Coverage;
use fwunit::core::range_set::IpSet;
use fwunit::core::rule::App;
use fwunit::prep::prep;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "fwunit")]
#[command(about = "Unit tests for firewall rules", long_about = None)]
struct Cli {
    /// Path to fwunit.yaml
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Permitted,
    Denied,
}

#[derive(Subcommand)]
enum Commands {
    /// Build rule sets for the named sources (all if none given)
    Prep { sources: Vec<String> },
    /// Ask whether a flow is permitted or denied
    Query {
        source: String,
        mode: Mode,
        src: IpSet,
        dst: IpSet,
        app: String,
    },
    /// List the sources that can reach a destination with an application
    SourcesFor {
        source: String,
        dst: IpSet,
        app: String,
        /// Sources to leave out of the answer
        #[arg(long, default_value = "")]
        ignore: IpSet,
    },
    /// List the applications permitted between two address sets
    Apps {
        source: String,
        src: IpSet,
        dst: IpSet,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(handle_cli(cli));
    if let Err(e) = &result {
        eprintln!("Error: {e}");
    }
    ExitCode::from(exit_status(&result))
}

/// Exit status of a finished command; every error exits with 1
fn exit_status(result: &fwunit::Result<u8>) -> u8 {
    match result {
        Ok(code) => *code,
        Err(_) => 1,
    }
}

/// Lines printed for a query answer, plus its exit status.
///
/// A partial answer also prints the subset `mode` asked about the rest of.
fn report(coverage: &Coverage, mode: Mode) -> (Vec<String>, u8) {
    let outcome = coverage.outcome();
    let mut lines = vec![outcome.to_string()];
    if let Coverage::Partial { permitted, denied } = coverage {
        lines.push(match mode {
            Mode::Permitted => format!("  not permitted: {denied}"),
            Mode::Denied => format!("  permitted: {permitted}"),
        });
    }
    (lines, outcome.exit_code())
}

async fn handle_cli(cli: Cli) -> fwunit::Result<u8> {
    let path = Config::locate(cli.config.as_deref());
    let config = Config::load(&path).await?;
    let cache = RuleCache::new();

    match cli.command {
        Commands::Prep { sources } => {
            let built = prep(Arc::new(config), &sources).await?;
            println!("Prepared {} sources: {}", built.len(), built.join(", "));
        }
        Commands::Query {
            source,
            mode,
            src,
            dst,
            app,
        } => {
            let ctx = TestContext::load(&cache, &config, &source).await?;
            let app = App::from(app.as_str());
            let coverage = ctx.rules().coverage(&src, &dst, &app);
            let (lines, code) = report(&coverage, mode);
            for line in lines {
                println!("{line}");
            }
            if code != 0 && cli.verbose > 0 {
                for rule in ctx.rules().matching_rules(&src, &dst, &app) {
                    println!("  {rule}");
                }
            }
            return Ok(code);
        }
        Commands::SourcesFor {
            source,
            dst,
            app,
            ignore,
        } => {
            let ctx = TestContext::load(&cache, &config, &source).await?;
            println!("{}", ctx.sources_for(&dst, app.as_str(), &ignore));
        }
        Commands::Apps { source, src, dst } => {
            let ctx = TestContext::load(&cache, &config, &source).await?;
            println!("{}", ctx.all_apps(&src, &dst));
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fwunit::core::error::ConfigError;
    use fwunit::core::pairs::IpPairs;

    fn pairs(src: &str, dst: &str) -> IpPairs {
        IpPairs::from_pair(src.parse().unwrap(), dst.parse().unwrap())
    }

    #[test]
    fn test_report_permitted_flow() {
        let (lines, code) = report(&Coverage::Permitted, Mode::Permitted);
        assert_eq!(lines, vec!["Flow permitted"]);
        assert_eq!(code, 0);
    }

    #[test]
    fn test_report_denied_flow_is_decisive() {
        let (lines, code) = report(&Coverage::Denied, Mode::Permitted);
        assert_eq!(lines, vec!["Flow denied"]);
        assert_eq!(code, 0);
    }

    #[test]
    fn test_report_partial_flow_shows_requested_half() {
        let coverage = Coverage::Partial {
            permitted: pairs("10.0.0.0/25", "20.0.0.1"),
            denied: pairs("10.0.0.128/25", "20.0.0.1"),
        };

        let (lines, code) = report(&coverage, Mode::Permitted);
        assert_eq!(code, 2);
        assert_eq!(lines[0], "Flow partially permitted");
        assert!(lines[1].starts_with("  not permitted: "));
        assert!(lines[1].contains("10.0.0.128/25"));

        let (lines, code) = report(&coverage, Mode::Denied);
        assert_eq!(code, 2);
        assert!(lines[1].starts_with("  permitted: "));
        assert!(lines[1].contains("10.0.0.0/25"));
    }

    #[test]
    fn test_errors_exit_with_one() {
        let err = fwunit::Error::Config(ConfigError::UnknownSource("nowhere".into()));
        assert_eq!(exit_status(&Err(err)), 1);
        assert_eq!(exit_status(&Ok(2)), 2);
        assert_eq!(exit_status(&Ok(0)), 0);
    }

    #[test]
    fn test_query_arguments_parse() {
        let cli = Cli::try_parse_from([
            "fwunit", "query", "edge", "denied", "10.0.0.1", "8.8.8.8", "ssh",
        ])
        .unwrap();
        let Commands::Query { source, mode, app, .. } = cli.command else {
            panic!("expected query");
        };
        assert_eq!(source, "edge");
        assert!(matches!(mode, Mode::Denied));
        assert_eq!(app, "ssh");
    }
}
