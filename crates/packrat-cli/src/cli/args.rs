//! Command line arguments. Every setting falls back to an environment
//! variable and then to a fixed default.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use packrat_core::config::{
    ArchiverConfig, DEFAULT_LOCK_PATH, DEFAULT_META_NAME, DEFAULT_STAGING_ROOT, DEFAULT_VAULT_ROOT,
};

#[derive(Parser, Debug)]
#[command(
    name = "packrat",
    version,
    about = "Archive ready staging folders into a sharded vault as verifiable tar.gz files"
)]
pub struct Cli {
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Archive every ready folder in the staging root
    Run(RunArgs),
    /// List staging folders with their eligibility and destination (read-only)
    Scan(ScanArgs),
    /// Print the version
    Version,
}

#[derive(Args, Debug, Clone)]
pub struct PathArgs {
    /// Staging root scanned for job folders
    #[arg(long, env = "ARCHIVE_BASE_DIR", default_value = DEFAULT_STAGING_ROOT)]
    pub base_dir: PathBuf,

    /// Vault root receiving <BUCKET>/<year>/<name>.tar.gz
    #[arg(long, env = "ARCHIVE_DIR", default_value = DEFAULT_VAULT_ROOT)]
    pub archive_dir: PathBuf,

    /// Seed descriptor file name inside each job folder
    #[arg(long, env = "ARCHIVE_META_NAME", default_value = DEFAULT_META_NAME)]
    pub meta_name: String,
}

impl PathArgs {
    pub fn to_config(&self) -> ArchiverConfig {
        ArchiverConfig::new(&self.base_dir, &self.archive_dir).with_meta_name(&self.meta_name)
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    /// Report destinations without writing, moving or deleting anything
    #[arg(long, env = "ARCHIVE_DRY_RUN", value_parser = BoolishValueParser::new())]
    pub dry_run: bool,

    /// Lock file guarding against overlapping runs
    #[arg(long, env = "ARCHIVE_LOCK_PATH", default_value = DEFAULT_LOCK_PATH)]
    pub lock_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log level or filter directive (e.g. info, debug, packrat_core=trace)
    #[arg(long, global = true, env = "PACKRAT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log file path (overrides --log-dir)
    #[arg(long, global = true, env = "PACKRAT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Directory for packrat.log
    #[arg(long, global = true, env = "PACKRAT_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log to stdout only
    #[arg(long, global = true)]
    pub no_log_file: bool,

    /// Log line format for stdout and the log file
    #[arg(
        long,
        global = true,
        value_enum,
        env = "PACKRAT_LOG_FORMAT",
        default_value_t = LogFormat::Text
    )]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
