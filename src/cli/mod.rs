mod parse;
mod remote;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{
    builder::{styling::AnsiColor, Styles},
    ArgAction, Parser,
};
use humantime::parse_duration;
use log::{error, info};

use crate::{
    config::{Config, ConfigFile, DEFAULT_TASK_COUNT},
    error::Result,
    format::format_path,
    locks::LockMode,
    logger,
    ops::Run,
    progress::LogProgress,
    remote::RemoteUrl,
    store::StateStore,
};

use self::{parse::parse_task_count, remote::create_remote};

const DEFAULT_GRANT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Mirror a directory of projects to a local disk and an object store,
/// archiving files that are finished or removed.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, styles = cli_styles())]
pub struct Cli {
    /// Directory holding the backup records
    pub state_dir: PathBuf,

    /// Program that copies a local file to a presigned URL
    pub transfer_command: PathBuf,

    /// Object store: `s3:`, an S3-compatible `http(s)://` endpoint, or `file://<dir>`
    pub remote: RemoteUrl,

    /// Bucket that objects are stored in
    pub bucket: String,

    /// Directory of projects to back up
    pub source_dir: PathBuf,

    /// Directory the local mirror is kept in
    pub mirror_dir: PathBuf,

    /// Number of files backed up concurrently
    #[arg(
        short = 'j',
        long,
        value_name = "NUM",
        default_value_t = DEFAULT_TASK_COUNT,
        value_parser = parse_task_count,
    )]
    pub jobs: usize,

    /// Allow remote operations on different files to run concurrently
    #[arg(long, default_value_t = false)]
    pub parallel_remote: bool,

    /// JSON file overriding ignore rules, immutable extensions and transfer arguments
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// How long presigned upload URLs stay valid
    #[arg(long, value_name = "DURATION", value_parser = parse_duration, default_value = "24h")]
    pub grant_ttl: Duration,

    /// Show what would be backed up and removed without changing anything
    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    /// Log statistics when finished
    #[arg(long, default_value_t = false)]
    pub stats: bool,

    #[arg(short, long, action = ArgAction::Count, group = "verbosity")]
    pub verbose: u8,

    #[arg(short, long, action = ArgAction::Count, group = "verbosity")]
    pub quiet: u8,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(logger::level_from_args(cli.verbose, cli.quiet));

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config_file = match &cli.config {
        Some(path) => {
            info!("using config {}", format_path(path));
            ConfigFile::load(path)?
        }
        None => ConfigFile::default(),
    };

    let config = Config {
        task_count: cli.jobs,
        remote_lock_mode: if cli.parallel_remote {
            LockMode::PerKey
        } else {
            LockMode::Global
        },
        dry_run: cli.dry_run,
        ..Config::new(&cli.source_dir, &cli.mirror_dir, config_file.policy()?)
    };

    let remote = create_remote(cli, &config_file).await;
    let store = StateStore::open(&cli.state_dir)?;
    let run = Run::new(config, remote, store, Arc::new(LogProgress));
    let result = run.execute().await;

    if cli.stats {
        run.stats().await.log();
    }

    result
}

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightMagenta.on_default())
        .usage(AnsiColor::BrightMagenta.on_default())
        .literal(AnsiColor::BrightBlue.on_default())
        .placeholder(AnsiColor::BrightCyan.on_default())
}
