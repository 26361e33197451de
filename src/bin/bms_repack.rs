use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use chrono::{Local, NaiveDate, TimeDelta};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use bms_repack::app::{App, RunOptions, RunSummary, Selection};
use bms_repack::config::{ConfigLoader, RunConfig, read_secret};
use bms_repack::error::RepackError;
use bms_repack::notify::{LogNotifier, MailNotifier, Notifier};
use bms_repack::output::{JsonOutput, LogSink};
use bms_repack::repository::HievHttpClient;
use bms_repack::store::Store;

#[derive(Parser)]
#[command(name = "bms-repack")]
#[command(about = "Repackage daily BMS archives into per-room monthly 5-minute CSV files")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to bms-repack.json in the current directory).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<Utf8PathBuf>,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Process archives for a date range (default: yesterday)")]
    Run(RunArgs),
    #[command(about = "Resolve the archive for a single date")]
    Locate(LocateArgs),
    #[command(about = "Empty the staging directory")]
    Clear,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// First date to process (YYYY-MM-DD).
    #[arg(long)]
    from: Option<NaiveDate>,

    /// End of the range, exclusive (YYYY-MM-DD).
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Upload monthly files after writing them.
    #[arg(long, conflicts_with = "no_upload")]
    upload: bool,

    /// Never upload, whatever the config says.
    #[arg(long)]
    no_upload: bool,

    /// Locate archives only, without downloading or writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Process the one archive uploaded in the window instead of one per date.
    /// The window is yesterday to today, both inclusive, unless given.
    #[arg(long)]
    latest: bool,

    #[arg(long)]
    staging_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    output_dir: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct LocateArgs {
    date: NaiveDate,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RepackError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RepackError) -> u8 {
    match error {
        RepackError::ConfigRead(_)
        | RepackError::ConfigParse(_)
        | RepackError::MissingSecret(_)
        | RepackError::InvalidDateRange { .. } => 2,
        RepackError::NotifyHttp(_) | RepackError::NotifyStatus { .. } => 3,
        error if error.is_remote() => 3,
        _ => 1,
    }
}

/// INFO and above unless `RUST_LOG` says otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy(directives.unwrap_or_default())
}

fn init_tracing(log_file: Option<&Utf8PathBuf>) -> miette::Result<()> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .into_diagnostic()?;
            tracing_subscriber::fmt()
                .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_ref())?;

    let command = cli.command.unwrap_or(Commands::Run(RunArgs::default()));
    let overrides = match &command {
        Commands::Run(args) => (args.staging_dir.clone(), args.output_dir.clone()),
        _ => (None, None),
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = build_app(config, overrides)?;

    match command {
        Commands::Run(args) => run_repack(&app, args, cli.json),
        Commands::Locate(args) => {
            let result = app.locate(args.date, &LogSink)?;
            if cli.json {
                JsonOutput::print_locate(&result).into_diagnostic()?;
            } else {
                println!("{} -> {}", result.date, result.archive.filename);
            }
            Ok(())
        }
        Commands::Clear => {
            let result = app.clear(&LogSink)?;
            if cli.json {
                JsonOutput::print_clear(&result).into_diagnostic()?;
            } else {
                println!("removed {} entries from staging", result.removed);
            }
            Ok(())
        }
    }
}

fn build_app(
    mut config: RunConfig,
    (staging_dir, output_dir): (Option<Utf8PathBuf>, Option<Utf8PathBuf>),
) -> miette::Result<App<HievHttpClient, Box<dyn Notifier>>> {
    if let Some(dir) = staging_dir {
        config.staging_dir = dir;
    }
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }

    let token = read_secret(&config.repository.token_env)?;
    let client = HievHttpClient::new(&config.repository, token)?;
    let notifier: Box<dyn Notifier> = match &config.notify {
        Some(settings) => Box::new(MailNotifier::from_settings(settings)?),
        None => Box::new(LogNotifier),
    };
    let store = Store::new_with_paths(config.staging_dir.clone(), config.output_dir.clone());
    Ok(App::new(config, store, client, notifier))
}

fn run_repack(
    app: &App<HievHttpClient, Box<dyn Notifier>>,
    args: RunArgs,
    json: bool,
) -> miette::Result<()> {
    let today = Local::now().date_naive();
    let from = args.from.unwrap_or(today - TimeDelta::days(1));
    let (to, selection) = if args.latest {
        (args.to.unwrap_or(today), Selection::UploadWindow)
    } else {
        (args.to.unwrap_or(from + TimeDelta::days(1)), Selection::ArchiveDate)
    };
    let upload = match (args.upload, args.no_upload) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };

    tracing::info!("==================================================");
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        facility = %app.config().facility,
        %from,
        %to,
        ?selection,
        dry_run = args.dry_run,
        "BMS repack started"
    );

    let options = RunOptions {
        from,
        to,
        selection,
        dry_run: args.dry_run,
        upload,
    };
    let summary = app.run(&options, &LogSink)?;

    if json {
        JsonOutput::print_run(&summary).into_diagnostic()?;
    } else {
        print_run_summary(&summary);
    }
    tracing::info!("BMS repack finished");
    Ok(())
}

fn print_run_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}BMS repack summary {} .. {}{reset}", summary.from, summary.to);
    println!("{green}Files written: {}{reset}", summary.files_written());
    println!("{yellow}Issues: {}{reset}", summary.issue_count());

    for date in &summary.dates {
        let archive = date.archive.as_deref().unwrap_or("-");
        println!("{cyan}{} {archive}{reset}", date.date);
        for issue in &date.issues {
            println!("{yellow}   ! {issue}{reset}");
        }
        for room in &date.rooms {
            let color = if room.issues.is_empty() { green } else { yellow };
            let uploaded = if room.uploaded { ", uploaded" } else { "" };
            println!(
                "{color}   room {} -> {} ({:?}, {} rows{uploaded}){reset}",
                room.room, room.file, room.policy, room.rows
            );
            for issue in &room.issues {
                println!("{yellow}      ! {issue}{reset}");
            }
        }
    }
}
