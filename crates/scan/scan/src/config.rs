//! Configuration options for the reader scanner

use std::time::Duration;

/// Command used to analyse (on screen) an ATR
pub const DEFAULT_ATR_PARSER: &str = "ATR_analysis";

/// Timeout of a single status change wait
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between two reader list polls without plug and play support
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of exchanges in one stress batch
pub const DEFAULT_STRESS_BATCH: u32 = 100;

/// Scanner configuration
///
/// Built once at startup and shared by reference for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Hand every ATR to the analysis command
    pub analyse_atr: bool,

    /// Analysis command invoked with the formatted ATR
    pub atr_parser: String,

    /// Stress inserted cards with repeated exchanges
    pub stress: bool,

    /// Exchanges per stress batch
    pub stress_batch: u32,

    /// Emit a liveness indicator while waiting
    pub verbose: bool,

    /// Report raw state masks with every transition
    pub debug: bool,

    /// Assume plug and play support without probing for it
    pub force_pnp: bool,

    /// Upper bound of a single status change wait
    pub wait_timeout: Duration,

    /// Reader list polling interval when plug and play is unsupported
    pub poll_interval: Duration,

    /// Stop after this much wall-clock time
    pub time_budget: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            analyse_atr: true,
            atr_parser: DEFAULT_ATR_PARSER.to_string(),
            stress: false,
            stress_batch: DEFAULT_STRESS_BATCH,
            verbose: false,
            debug: false,
            force_pnp: false,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            time_budget: None,
        }
    }
}

impl ScanConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether ATRs are analysed
    pub const fn with_atr_analysis(mut self, analyse_atr: bool) -> Self {
        self.analyse_atr = analyse_atr;
        self
    }

    /// Set the ATR analysis command
    pub fn with_atr_parser(mut self, parser: impl Into<String>) -> Self {
        self.atr_parser = parser.into();
        self
    }

    /// Set whether inserted cards are stressed
    pub const fn with_stress(mut self, stress: bool) -> Self {
        self.stress = stress;
        self
    }

    /// Set the number of exchanges per stress batch
    pub const fn with_stress_batch(mut self, batch: u32) -> Self {
        self.stress_batch = batch;
        self
    }

    /// Set verbose mode
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set debug mode
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Force plug and play mode
    pub const fn with_force_pnp(mut self, force_pnp: bool) -> Self {
        self.force_pnp = force_pnp;
        self
    }

    /// Set the status change wait timeout
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the reader list polling interval
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the run-time budget
    pub const fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }
}
