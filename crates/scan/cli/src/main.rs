use std::io::{self, IsTerminal, Stdout};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use colored::Color;
use nexum_pcsc_scan::{
    CancelToken, CardService, Canceller, DEFAULT_ATR_PARSER, DEFAULT_STRESS_BATCH, PcscMonitor,
    ReaderDirectory, ScanConfig, ScanError, ScanEvent, Session, Spinner,
};
use tracing::{debug, warn};
use tracing_subscriber::filter::LevelFilter;

mod display;

use display::{Console, Palette};

#[derive(Parser)]
#[command(version, about = "PC/SC device scanner")]
struct Cli {
    /// No ATR analysis
    #[arg(short = 'n', long)]
    no_analysis: bool,

    /// Only list the readers and exit
    #[arg(short = 'r', long, conflicts_with = "cards")]
    readers: bool,

    /// Only list the cards in each reader and exit
    #[arg(short = 'c', long)]
    cards: bool,

    /// Stress inserted cards with repeated exchanges
    #[arg(short, long)]
    stress: bool,

    /// Exchanges per stress batch
    #[arg(
        long,
        default_value_t = DEFAULT_STRESS_BATCH,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    batch: u32,

    /// Command used to analyse ATRs
    #[arg(long, default_value = DEFAULT_ATR_PARSER)]
    atr_parser: String,

    /// Show a progress indicator and debug logs
    #[arg(short, long)]
    verbose: bool,

    /// Stop after this many seconds
    #[arg(short = 't', long, value_name = "SECONDS")]
    time: Option<u64>,

    /// Assume reader plug and play is supported
    #[arg(short = 'p', long)]
    pnp: bool,

    /// Dump raw reader states
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn config(&self) -> ScanConfig {
        ScanConfig::new()
            .with_atr_analysis(!self.no_analysis)
            .with_atr_parser(self.atr_parser.clone())
            .with_stress(self.stress)
            .with_stress_batch(self.batch)
            .with_verbose(self.verbose)
            .with_debug(self.debug)
            .with_force_pnp(self.pnp)
            .with_time_budget(self.time.map(Duration::from_secs))
    }
}

fn main() -> ExitCode {
    // Parse command line arguments, usage errors exit with status 2
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose || cli.debug);

    let palette = Palette::new(io::stdout().is_terminal());
    println!("{}", palette.bold("PC/SC device scanner"));
    println!("V {}", env!("CARGO_PKG_VERSION"));

    match run(&cli, &palette) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let palette = Palette::new(io::stderr().is_terminal());
            eprintln!("{}", error_line(&e, &palette));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, palette: &Palette) -> Result<(), ScanError> {
    let config = cli.config();
    let mut console = Console::new(palette, config.debug, io::stdout());
    let session = Session::open()?;

    let result = if cli.readers || cli.cards {
        list(&session, &config, &mut console, cli.cards)
    } else {
        monitor(&session, &config, &mut console)
    };

    // Helper threads are gone, the context can be released
    finish(result, session.close())
}

fn error_line(error: &ScanError, palette: &Palette) -> String {
    palette.paint(&error.to_string(), Color::Red)
}

/// The indicator draws with cursor escapes, only a terminal shows it
const fn wants_spinner(config: &ScanConfig, interactive: bool) -> bool {
    config.verbose && interactive
}

/// Combine the run outcome with the release outcome, the run error wins
fn finish(
    result: Result<(), ScanError>,
    close: Result<(), ScanError>,
) -> Result<(), ScanError> {
    match (result, close) {
        (Err(e), Err(close)) => {
            warn!("{}", close);
            Err(e)
        }
        (result, close) => result.and(close),
    }
}

/// Enumerate once and print the readers, or their cards
fn list(
    session: &Session,
    config: &ScanConfig,
    console: &mut Console<'_, Stdout>,
    cards: bool,
) -> Result<(), ScanError> {
    let directory = ReaderDirectory::new(session.service(), config);
    let printed = if cards {
        console.card_list(&directory.snapshot()?)
    } else {
        console.reader_list(&directory.list()?)
    };
    if let Err(e) = printed {
        debug!("cannot write listing: {}", e);
    }
    Ok(())
}

/// Monitor readers until interrupted or the time budget elapses
fn monitor(
    session: &Session,
    config: &ScanConfig,
    console: &mut Console<'_, Stdout>,
) -> Result<(), ScanError> {
    let token = CancelToken::new();
    let aborter = session.service().aborter();

    let canceller = Canceller::new(token.clone(), aborter.clone())
        .with_signals()?
        .with_deadline(config.time_budget)?;
    let spinner = if wants_spinner(config, io::stdout().is_terminal()) {
        Some(Spinner::spawn(io::stdout(), token.clone(), aborter)?)
    } else {
        None
    };

    let render = |event: ScanEvent| console.render(&event);
    let mut monitor = PcscMonitor::new(session, config, token, render);
    if let Some(spinner) = &spinner {
        monitor = monitor.with_spinner(spinner);
    }
    let result = monitor.run();
    drop(monitor);

    debug!("shutting down");
    canceller.disarm();
    if let Some(spinner) = spinner {
        spinner.shutdown();
    }
    result
}

fn setup_logging(verbose: bool) {
    // Reports go to stdout, the log stays on stderr
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Cli::try_parse_from(["pcsc-scan"]).unwrap().config();
        assert!(config.analyse_atr);
        assert_eq!(config.atr_parser, DEFAULT_ATR_PARSER);
        assert_eq!(config.stress_batch, DEFAULT_STRESS_BATCH);
        assert_eq!(config.time_budget, None);
    }

    #[test]
    fn test_flags() {
        let config = Cli::try_parse_from(["pcsc-scan", "-n", "-s", "-t", "5", "-p", "-d"])
            .unwrap()
            .config();
        assert!(!config.analyse_atr);
        assert!(config.stress);
        assert!(config.force_pnp);
        assert!(config.debug);
        assert_eq!(config.time_budget, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_run_error_survives_release_error() {
        let run = ScanError::service("SCardGetStatusChange", pcsc::Error::NoService);
        let close = ScanError::service("SCardReleaseContext", pcsc::Error::InvalidHandle);

        let err = finish(Err(run), Err(close)).unwrap_err();
        assert!(matches!(
            err,
            ScanError::Service {
                operation: "SCardGetStatusChange",
                ..
            }
        ));

        let close = ScanError::service("SCardReleaseContext", pcsc::Error::InvalidHandle);
        assert!(matches!(
            finish(Ok(()), Err(close)),
            Err(ScanError::Service {
                operation: "SCardReleaseContext",
                ..
            })
        ));
        assert!(finish(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn test_plain_error_line() {
        let err = ScanError::ServiceUnavailable(pcsc::Error::NoService);
        let line = error_line(&err, &Palette::new(false));
        assert!(!line.contains('\x1b'));
        assert!(line.starts_with("PC/SC resource manager unavailable"));
    }

    #[test]
    fn test_spinner_needs_terminal() {
        let verbose = Cli::try_parse_from(["pcsc-scan", "-v"]).unwrap().config();
        assert!(wants_spinner(&verbose, true));
        assert!(!wants_spinner(&verbose, false));

        let quiet = Cli::try_parse_from(["pcsc-scan"]).unwrap().config();
        assert!(!wants_spinner(&quiet, true));
    }

    #[test]
    fn test_usage_errors() {
        assert!(Cli::try_parse_from(["pcsc-scan", "-r", "-c"]).is_err());
        assert!(Cli::try_parse_from(["pcsc-scan", "--batch", "0"]).is_err());
        assert!(Cli::try_parse_from(["pcsc-scan", "-t", "soon"]).is_err());
    }
}
