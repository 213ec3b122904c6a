//! CLI entry point for `mailgrab`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailgrab::config::{self, Settings};
use mailgrab::credentials::{self, CredentialSource};
use mailgrab::ingest::{IngestionReport, Ingestor, RunStatus};
use mailgrab::parser::eml;
use mailgrab::store::{EmailStore, StoreStats};

#[derive(Parser)]
#[command(
    name = "mailgrab",
    version,
    about = "Ingest an IMAP mailbox into a deduplicating SQLite store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new messages from the server into the store
    Ingest {
        /// Credentials file in `key=value` format
        #[arg(long = "config", value_name = "FILE", conflicts_with_all = ["ini", "env"])]
        credentials_file: Option<PathBuf>,
        /// Credentials file with an `[email]` section
        #[arg(long, value_name = "FILE", conflicts_with = "env")]
        ini: Option<PathBuf>,
        /// Read credentials from `{PREFIX}_USERNAME`, `{PREFIX}_PASSWORD`, ...
        #[arg(long, value_name = "PREFIX")]
        env: Option<String>,
        /// `.env` file read with --env (default: `.env` in or above the working directory)
        #[arg(long, value_name = "FILE", requires = "env")]
        env_file: Option<PathBuf>,
        /// Mailbox to ingest (default from settings, else INBOX)
        #[arg(short, long)]
        mailbox: Option<String>,
        /// SQLite database path
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        /// Directory for raw copies of unparseable messages
        #[arg(long, value_name = "DIR")]
        quarantine: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Normalize every .eml file and .zip archive of them under a directory
    Scan {
        dir: PathBuf,
        /// Body lines to show per message
        #[arg(short = 'n', long)]
        lines: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Extract statement transactions from stored bodies to CSV
    Export {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        /// CSV field separator
        #[arg(long)]
        separator: Option<char>,
    },
    /// Show store statistics
    Stats {
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = config::load_settings();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &settings);

    match cli.command {
        Commands::Ingest {
            credentials_file,
            ini,
            env,
            env_file,
            mailbox,
            db,
            quarantine,
            json,
        } => {
            let source = credential_source(credentials_file, ini, env, env_file, &settings)?;
            cmd_ingest(
                &settings,
                &source,
                mailbox.as_deref(),
                db.as_deref(),
                quarantine,
                json,
            )
        }
        Commands::Scan { dir, lines, json } => {
            cmd_scan(&dir, lines.unwrap_or(settings.scan.preview_lines), json)
        }
        Commands::Export {
            output,
            db,
            separator,
        } => cmd_export(
            &settings,
            db.as_deref(),
            &output,
            separator.unwrap_or(settings.export.csv_separator),
        ),
        Commands::Stats { db, json } => cmd_stats(&settings, db.as_deref(), json),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, settings: &Settings) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(settings);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "mailgrab.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Pick the credentials source: explicit flags first, then settings.
fn credential_source(
    flat: Option<PathBuf>,
    ini: Option<PathBuf>,
    env: Option<String>,
    env_file: Option<PathBuf>,
    settings: &Settings,
) -> anyhow::Result<CredentialSource> {
    if let Some(path) = ini {
        return Ok(CredentialSource::IniFile(path));
    }
    if let Some(prefix) = env {
        return Ok(CredentialSource::Env { prefix, env_file });
    }
    match flat.or_else(|| settings.ingest.credentials_path.clone()) {
        Some(path) => Ok(CredentialSource::FlatFile(path)),
        None => anyhow::bail!(
            "No credentials given: use --config, --ini or --env, or set ingest.credentials_path"
        ),
    }
}

fn open_store(settings: &Settings, db: Option<&Path>) -> anyhow::Result<EmailStore> {
    let path = db
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config::database_path(settings));
    Ok(EmailStore::open(path)?)
}

fn cmd_ingest(
    settings: &Settings,
    source: &CredentialSource,
    mailbox: Option<&str>,
    db: Option<&Path>,
    quarantine: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    // Setup errors end here, before any connection.
    let creds = credentials::load(source)?;
    let store = open_store(settings, db)?;
    let mailbox = mailbox.unwrap_or(&settings.ingest.mailbox).to_string();

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Ingesting [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let span = tracing::info_span!("ingest", user = %creds.username, mailbox = %mailbox);
    let mut ingestor = Ingestor::new(&store)
        .with_mailbox(mailbox)
        .with_span(span)
        .on_progress(|done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        });
    if let Some(dir) = quarantine.or_else(|| settings.ingest.quarantine_dir.clone()) {
        ingestor = ingestor.with_quarantine_dir(dir);
    }

    let start = Instant::now();
    let report = ingestor.run(&creds);
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, start.elapsed());
    }

    match report.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Aborted { reason } => anyhow::bail!("Ingestion aborted: {reason}"),
    }
}

fn print_report(report: &IngestionReport, elapsed: std::time::Duration) {
    println!();
    println!("  {:<20} {}", "Attempted", report.attempted);
    println!("  {:<20} {}", "Ingested", report.ingested);
    println!("  {:<20} {}", "Already stored", report.skipped);
    println!("  {:<20} {}", "Failed", report.failed);
    println!("  {:<20} {:.2?}", "Elapsed", elapsed);
    println!();
}

fn cmd_scan(dir: &Path, lines: usize, json: bool) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }
    let report = eml::scan_dir(dir)?;

    if json {
        let entries: Vec<_> = report
            .entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "path": e.path,
                    "member": e.member,
                    "subject": e.content.subject,
                    "sender": e.content.sender,
                    "sent_at": e.content.sent_at,
                    "format": e.content.format(),
                    "preview": e.preview(lines),
                })
            })
            .collect();
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|(path, e)| serde_json::json!({ "path": path, "error": e.to_string() }))
            .collect();
        let out = serde_json::json!({ "entries": entries, "failed": failed });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for entry in &report.entries {
        let date = entry
            .content
            .sent_at
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("== {}", entry.display_name());
        println!("   Date:    {date}");
        println!("   From:    {}", entry.content.sender);
        println!("   Subject: {}", entry.content.subject);
        let preview = entry.preview(lines);
        if !preview.is_empty() {
            println!();
            for line in preview.lines() {
                println!("   {line}");
            }
        }
        println!();
    }
    for (path, e) in &report.failed {
        eprintln!("!! {}: {e}", path.display());
    }
    println!(
        "  {} parsed, {} failed",
        report.entries.len(),
        report.failed.len()
    );
    Ok(())
}

fn cmd_export(
    settings: &Settings,
    db: Option<&Path>,
    output: &Path,
    separator: char,
) -> anyhow::Result<()> {
    let store = open_store(settings, db)?;
    let rows = mailgrab::export::statement::export_statement(&store, output, separator)?;
    if rows == 0 {
        println!("  No statement rows found; nothing written.");
    } else {
        println!("  Exported {rows} row(s) to {}", output.display());
    }
    Ok(())
}

fn cmd_stats(settings: &Settings, db: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let store = open_store(settings, db)?;
    let stats = store.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats_table(&store, &stats);
    }
    Ok(())
}

fn print_stats_table(store: &EmailStore, stats: &StoreStats) {
    use humansize::{format_size, BINARY};

    let fmt_date = |d: Option<chrono::DateTime<chrono::Utc>>| {
        d.map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!();
    if let Some(path) = store.path() {
        println!("  {:<20} {}", "Database", path.display());
    }
    println!("  {:<20} {}", "Size", format_size(stats.file_size, BINARY));
    println!("  {:<20} {}", "Messages", stats.total);
    println!("  {:<20} {}", "From HTML", stats.html);
    println!("  {:<20} {}", "Without body", stats.without_body);
    println!("  {:<20} {}", "Without date", stats.without_date);
    println!(
        "  {:<20} {} .. {}",
        "Date range",
        fmt_date(stats.earliest),
        fmt_date(stats.latest)
    );
    println!();
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailgrab", &mut std::io::stdout());
    Ok(())
}
