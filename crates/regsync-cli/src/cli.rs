use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use regsync_core::decode::IdentifierRule;
use regsync_core::models::ActivityFilter;
use regsync_core::reconcile::DateComparison;
use regsync_core::report::ReportFormat;

#[derive(Parser)]
#[command(name = "regsync")]
#[command(about = "Synchronize device identifier feeds into a soft-delete registry")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the registry database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Configuration profile name
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile a feed file against the registry
    Sync {
        /// Delimited text export of the spreadsheet (header row first)
        feed: PathBuf,
        /// Acting identity recorded on every write
        #[arg(long, value_name = "NAME")]
        actor: Option<String>,
        /// Label of the feed recorded on the run (defaults to the file name)
        #[arg(long, value_name = "LABEL")]
        source: Option<String>,
        /// Write the report to this path
        #[arg(long, value_name = "PATH")]
        report: Option<PathBuf>,
        /// Report format
        #[arg(long, value_enum, default_value_t = ReportFormatArg::Markdown)]
        format: ReportFormatArg,
        /// Skip the notification
        #[arg(long)]
        no_notify: bool,
    },
    /// Show registry counts and the last run
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registry records
    List {
        /// Which records to show
        #[arg(long, value_enum, default_value_t = StateArg::Active)]
        state: StateArg,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Records to skip
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record
    Show {
        /// Device identifier (IMEI or serial)
        identifier: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent synchronization runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configure profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ReportFormatArg {
    Markdown,
    Json,
}

impl From<ReportFormatArg> for ReportFormat {
    fn from(value: ReportFormatArg) -> Self {
        match value {
            ReportFormatArg::Markdown => Self::Markdown,
            ReportFormatArg::Json => Self::Json,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StateArg {
    Active,
    Inactive,
    All,
}

impl From<StateArg> for ActivityFilter {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::Active => Self::Active,
            StateArg::Inactive => Self::Inactive,
            StateArg::All => Self::All,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ComparisonArg {
    /// Compare calendar days, ignoring time of day
    Day,
    /// Compare full timestamps
    Exact,
}

impl From<ComparisonArg> for DateComparison {
    fn from(value: ComparisonArg) -> Self {
        match value {
            ComparisonArg::Day => Self::Day,
            ComparisonArg::Exact => Self::Exact,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RuleArg {
    /// Any non-empty identifier
    Any,
    /// 15-digit IMEI or 5-50 character serial
    ImeiOrSerial,
}

impl From<RuleArg> for IdentifierRule {
    fn from(value: RuleArg) -> Self {
        match value {
            RuleArg::Any => Self::Any,
            RuleArg::ImeiOrSerial => Self::ImeiOrSerial,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

impl From<CompletionShell> for clap_complete::Shell {
    fn from(value: CompletionShell) -> Self {
        match value {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update a profile
    Init {
        /// Registry database path
        #[arg(long, value_name = "PATH")]
        database: Option<String>,
        /// Default acting identity
        #[arg(long, value_name = "NAME")]
        actor: Option<String>,
        /// Category tag written on inserted records
        #[arg(long, value_name = "TAG")]
        tag: Option<String>,
        /// Country code whose UTC offset applies to naive dates (e.g. CR, MX)
        #[arg(long, value_name = "CODE")]
        region: Option<String>,
        /// Date comparison strategy for refresh detection
        #[arg(long, value_enum)]
        date_comparison: Option<ComparisonArg>,
        /// Identifier column (letter or 1-based number)
        #[arg(long, value_name = "COLUMN")]
        identifier_column: Option<String>,
        /// Date column (letter or 1-based number)
        #[arg(long, value_name = "COLUMN")]
        date_column: Option<String>,
        /// Field delimiter: tab, comma or semicolon (auto-detected when unset)
        #[arg(long, value_name = "DELIMITER")]
        delimiter: Option<String>,
        /// Which identifiers the feed may contain
        #[arg(long, value_enum)]
        identifier_rule: Option<RuleArg>,
        /// Notification recipient (repeatable; replaces the stored list)
        #[arg(long = "recipient", value_name = "ADDRESS")]
        recipients: Vec<String>,
        /// Directory receiving one file per notification
        #[arg(long, value_name = "DIR")]
        outbox_dir: Option<String>,
        /// Endpoint receiving notifications as JSON POSTs
        #[arg(long, value_name = "URL")]
        webhook_url: Option<String>,
        /// SMTP relay host receiving notifications as mail
        #[arg(long, value_name = "HOST")]
        smtp_host: Option<String>,
        /// SMTP relay port (defaults to the security mode's port)
        #[arg(long, value_name = "PORT")]
        smtp_port: Option<u16>,
        /// SMTP connection security: starttls, tls or plain
        #[arg(long, value_name = "MODE")]
        smtp_security: Option<String>,
        /// SMTP login; the password is read from REGSYNC_SMTP_PASSWORD
        #[arg(long, value_name = "USER")]
        smtp_username: Option<String>,
        /// Sender mailbox for notification mail
        #[arg(long, value_name = "ADDRESS")]
        smtp_from: Option<String>,
        /// Seconds a run waits on a concurrent run's lock
        #[arg(long, value_name = "SECONDS")]
        busy_timeout_secs: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile as JSON
    Show,
}
