use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Local, NaiveDate, TimeZone};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};

use chatlog_rust::config::AppConfig;
use chatlog_rust::logging::{init_logging, OperationTimer};
use chatlog_rust::metrics::MetricsCollector;
use chatlog_rust::models::{local_time, MediaKind, MessageQuery, TimeRange};
use chatlog_rust::service::{ChatlogDb, ChatlogQuery};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Chat data directory (overrides configuration)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Client platform: windows or darwin
    #[arg(short, long, global = true)]
    platform: Option<String>,

    /// Storage schema major version: 3 or 4
    #[arg(long, global = true)]
    schema_version: Option<u32>,

    /// Log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query messages of one or more talkers
    Messages {
        /// Talker id, or several separated by commas
        #[arg(short, long)]
        talker: String,

        /// Start of the window (YYYY-MM-DD or unix seconds), inclusive
        #[arg(short, long)]
        start: Option<String>,

        /// End of the window (YYYY-MM-DD or unix seconds); a date includes the whole day
        #[arg(short, long)]
        end: Option<String>,

        /// Only messages from these senders, comma separated
        #[arg(long, default_value = "")]
        sender: String,

        /// Only messages whose content matches this keyword or regex
        #[arg(short, long, default_value = "")]
        keyword: String,

        /// Items to skip in the merged result
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum items to return, 0 for the configured default
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },
    /// Search contacts
    Contacts {
        /// Id, alias, remark or nick name to look for
        #[arg(short, long, default_value = "")]
        key: String,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(short, long, default_value = "0")]
        limit: usize,
    },
    /// Search chat rooms
    Chatrooms {
        /// Room id, nick name or remark to look for
        #[arg(short, long, default_value = "")]
        key: String,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(short, long, default_value = "0")]
        limit: usize,
    },
    /// List recent sessions, newest first
    Sessions {
        /// Talker id or display name to look for
        #[arg(short, long, default_value = "")]
        key: String,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(short, long, default_value = "0")]
        limit: usize,
    },
    /// Resolve a media blob by kind and key
    Media {
        /// image, video, file or voice
        #[arg(short = 't', long)]
        kind: String,

        /// Content hash, or server id for voice
        #[arg(short, long)]
        key: String,

        /// Write the blob bytes to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration, then apply command line overrides
    let mut config = AppConfig::load()?;
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.display().to_string();
    }
    if let Some(platform) = &cli.platform {
        config.storage.platform.clone_from(platform);
    }
    if let Some(version) = cli.schema_version {
        config.storage.version = version;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    // One-shot queries have no use for the watcher
    config.storage.watch = false;
    config.validate()?;

    let log_file = config.logging.file_path.as_ref().map(PathBuf::from);
    let _guard = init_logging(
        Some(&config.get_log_level()),
        log_file.as_deref(),
        config.logging.format == "json",
    )?;
    if let Err(e) = MetricsCollector::init() {
        debug!(error = %e, "Metrics recorder not installed");
    }

    info!(
        data_dir = %config.data_dir().display(),
        platform = %config.storage.platform,
        version = config.storage.version,
        "Starting chatlog"
    );

    let db = Arc::new(ChatlogDb::open(&config).context("Failed to open chat data directory")?);
    let result = run(&db, cli.command).await;
    db.close();
    result
}

async fn run(db: &Arc<ChatlogDb>, command: Commands) -> Result<()> {
    let timer = OperationTimer::new("cli_command");
    match command {
        Commands::Messages {
            talker,
            start,
            end,
            sender,
            keyword,
            offset,
            limit,
        } => {
            let range = parse_time_range(start.as_deref(), end.as_deref())?;
            let query = MessageQuery {
                range,
                talker,
                sender,
                keyword,
                offset,
                limit,
            };
            let messages = db.messages(query).await?;
            info!(count = messages.len(), "Messages fetched");
            print_json(&messages)?;
        }
        Commands::Contacts { key, offset, limit } => {
            print_json(&db.contacts(key, offset, limit).await?)?;
        }
        Commands::Chatrooms { key, offset, limit } => {
            print_json(&db.chat_rooms(key, offset, limit).await?)?;
        }
        Commands::Sessions { key, offset, limit } => {
            print_json(&db.sessions(key, offset, limit).await?)?;
        }
        Commands::Media { kind, key, output } => {
            let kind: MediaKind = kind.parse()?;
            let media = db.media(kind, key).await?;
            if let Some(path) = output {
                if media.data.is_empty() {
                    warn!(path = %media.path, "Media file is not available on disk");
                } else {
                    std::fs::write(&path, &media.data)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(path = %path.display(), bytes = media.data.len(), "Media written");
                }
            }
            print_json(&media)?;
        }
    }
    timer.finish();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Parse `YYYY-MM-DD` (local midnight) or unix seconds
fn parse_time(value: &str, end_of_day: bool) -> Result<DateTime<Local>> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(local_time(secs));
    }

    let mut date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date: {value}, use YYYY-MM-DD or unix seconds"))?;
    if end_of_day {
        date = date
            .checked_add_days(Days::new(1))
            .with_context(|| format!("Date out of range: {value}"))?;
    }
    let midnight = date.and_hms_opt(0, 0, 0).context("Invalid time of day")?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .with_context(|| format!("No local midnight on {value}"))
}

fn parse_time_range(start: Option<&str>, end: Option<&str>) -> Result<TimeRange> {
    let start = start.map(|s| parse_time(s, false)).transpose()?;
    let end = end.map(|s| parse_time(s, true)).transpose()?;
    Ok(TimeRange::new(start, end))
}
