use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use favclip::config::{AppPaths, Settings};
use favclip::engine::{ClipStatus, Collaborators, FavouriteClips};
use favclip::errors::{FavError, Result};
use favclip::storage::models::{ClipQuery, DateRange, KeywordRange, StoredClip, TagsRelation};
use favclip::storage::object::LocalObjectStore;
use favclip::storage::sqlite::SqliteIndex;
use favclip::subtitle::MemorySubtitleCache;
use favclip::transcode::FfmpegTranscoder;

#[derive(Parser)]
#[command(name = "favclip", version, about = "Favourite subtitle moments as deduplicated video clips")]
struct Cli {
    /// Output results as JSON
    #[arg(short = 'j', long = "json", global = true)]
    json: bool,

    /// Data directory (defaults to ~/.favclip)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Favourite subtitle lines and materialize their clips
    Add {
        /// Source video
        #[arg(short, long)]
        video: PathBuf,

        /// Subtitle file for the video
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Zero-based subtitle line(s)
        #[arg(short, long = "line", required = true)]
        lines: Vec<usize>,

        /// Seconds to wait for the clips to be written
        #[arg(short, long, default_value = "300")]
        timeout: u64,
    },

    /// Unfavourite subtitle lines and remove their clips
    Cancel {
        /// Subtitle file the lines belong to
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Zero-based subtitle line(s)
        #[arg(short, long = "line", required = true)]
        lines: Vec<usize>,

        /// Seconds to wait for the clips to be removed
        #[arg(short, long, default_value = "60")]
        timeout: u64,
    },

    /// Show whether subtitle lines are favourites
    Status {
        /// Subtitle file the lines belong to
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Zero-based subtitle line(s)
        #[arg(short, long = "line", required = true)]
        lines: Vec<usize>,
    },

    /// Search favourite clips
    Search {
        /// Substring to look for
        keyword: Option<String>,

        /// Match the keyword against the surrounding context instead of the line itself
        #[arg(long)]
        context: bool,

        /// Filter by tag id (repeatable)
        #[arg(short = 't', long = "tag")]
        tags: Vec<i64>,

        /// Require every given tag instead of any
        #[arg(long)]
        all_tags: bool,

        /// Include clips without tags
        #[arg(long)]
        untagged: bool,

        /// Earliest creation date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Latest creation date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },

    /// Manage clip tags
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },

    /// Rebuild the search index from the clip store
    Resync,

    /// Show index statistics
    Stats,
}

#[derive(Subcommand)]
enum TagAction {
    /// Tag a clip, creating the tag if needed
    Add { key: String, name: String },
    /// Remove a tag from a clip
    Remove { key: String, tag_id: i64 },
    /// Rename a tag everywhere
    Rename { tag_id: i64, name: String },
    /// List all tags, or the tags of one clip
    List { key: Option<String> },
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    message: String,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "favclip=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            eprintln!("{}", serde_json::json!({"error": e.to_string()}));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths = match cli.base_dir {
        Some(base) => AppPaths::from_base(base),
        None => AppPaths::new()?,
    };
    let json = cli.json;

    match cli.command {
        Commands::Add {
            video,
            subtitles,
            lines,
            timeout,
        } => cmd_add(&paths, Some(&video), &subtitles, &lines, timeout, json),
        Commands::Cancel {
            subtitles,
            lines,
            timeout,
        } => cmd_add(&paths, None, &subtitles, &lines, timeout, json),
        Commands::Status { subtitles, lines } => cmd_status(&paths, &subtitles, &lines, json),
        Commands::Search {
            keyword,
            context,
            tags,
            all_tags,
            untagged,
            from,
            to,
        } => {
            let query = ClipQuery {
                keyword,
                keyword_range: if context {
                    KeywordRange::Context
                } else {
                    KeywordRange::Clip
                },
                tags,
                tags_relation: if all_tags {
                    TagsRelation::And
                } else {
                    TagsRelation::Or
                },
                date: DateRange {
                    from: from.as_deref().map(|d| parse_day(d, false)).transpose()?,
                    to: to.as_deref().map(|d| parse_day(d, true)).transpose()?,
                },
                include_no_tag: untagged,
            };
            cmd_search(&paths, &query, json)
        }
        Commands::Tag { action } => cmd_tag(&paths, action, json),
        Commands::Resync => cmd_resync(&paths, json),
        Commands::Stats => cmd_stats(&paths, json),
    }
}

struct Opened {
    engine: FavouriteClips,
    subtitles: Arc<MemorySubtitleCache>,
}

fn open_engine(paths: &AppPaths, with_ticker: bool) -> Result<Opened> {
    std::fs::create_dir_all(&paths.base_dir)?;
    let settings = Settings::load(&paths.config_file)?;
    let conn = Connection::open(&paths.db_path)?;
    let subtitles = Arc::new(MemorySubtitleCache::new());
    let collaborators = Collaborators {
        subtitles: subtitles.clone(),
        transcoder: Arc::new(FfmpegTranscoder::new(settings.ffmpeg.clone())),
        objects: Arc::new(LocalObjectStore::new(paths.store_dir.clone())?),
        index: Arc::new(SqliteIndex::new(conn)?),
    };
    let temp_dir = paths.temp_dir.clone();
    let engine = if with_ticker {
        FavouriteClips::spawn(collaborators, settings, temp_dir)?
    } else {
        FavouriteClips::new(collaborators, settings, temp_dir)
    };
    Ok(Opened { engine, subtitles })
}

fn parse_day(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| FavError::InvalidInput(format!("bad date {:?}: {}", s, e)))?;
    let time = if end_of_day {
        day.and_hms_milli_opt(23, 59, 59, 999)
    } else {
        day.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| FavError::InvalidInput(format!("bad date {:?}", s)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn report(success: bool, message: String, json: bool) -> Result<()> {
    if json {
        print_json(&StatusResponse { success, message })
    } else {
        println!("{}", message);
        Ok(())
    }
}

/// Shared by `add` and `cancel`; `video` is `None` for cancel.
fn cmd_add(
    paths: &AppPaths,
    video: Option<&PathBuf>,
    subtitles: &PathBuf,
    lines: &[usize],
    timeout: u64,
    json: bool,
) -> Result<()> {
    let opened = open_engine(paths, true)?;
    let source = opened.subtitles.load_srt_file(subtitles)?;

    let mut keys = Vec::with_capacity(lines.len());
    for &line in lines {
        let key = match video {
            Some(video) => opened.engine.add_clip(&video.to_string_lossy(), &source, line)?,
            None => opened.engine.cancel_add_clip(&source, line)?,
        };
        keys.push(key);
    }

    let drained = opened.engine.wait_idle(Duration::from_secs(timeout));
    opened.engine.shutdown();

    let verb = if video.is_some() { "favourited" } else { "unfavourited" };
    let message = if drained {
        format!("{} {} line(s).", capitalize(verb), keys.len())
    } else {
        format!(
            "Timed out with {} task(s) still pending.",
            opened.engine.pending_task_count()
        )
    };

    if json {
        return print_json(&serde_json::json!({
            "success": drained,
            "message": message,
            "keys": keys,
        }));
    }
    println!("{}", message);
    for (line, key) in lines.iter().zip(&keys) {
        println!("  line {:>5}  {}", line, short(key));
    }
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn cmd_status(paths: &AppPaths, subtitles: &PathBuf, lines: &[usize], json: bool) -> Result<()> {
    let opened = open_engine(paths, false)?;
    let source = opened.subtitles.load_srt_file(subtitles)?;
    let statuses = opened.engine.query_pending_or_persisted(&source, lines)?;

    if json {
        return print_json(&statuses);
    }
    for (line, status) in &statuses {
        let detail = match status {
            ClipStatus::Pending(_) => " (pending)",
            ClipStatus::Persisted(_) => "",
        };
        let mark = if status.is_favourite() { "*" } else { " " };
        println!("{} line {:>5}{}", mark, line, detail);
    }
    Ok(())
}

fn cmd_search(paths: &AppPaths, query: &ClipQuery, json: bool) -> Result<()> {
    let opened = open_engine(paths, false)?;
    let clips = opened.engine.search(query)?;

    if json {
        return print_json(&clips);
    }
    if clips.is_empty() {
        println!("No clips found.");
        return Ok(());
    }
    for clip in &clips {
        print_clip_row(clip);
    }
    Ok(())
}

fn cmd_tag(paths: &AppPaths, action: TagAction, json: bool) -> Result<()> {
    let opened = open_engine(paths, false)?;
    let engine = &opened.engine;

    match action {
        TagAction::Add { key, name } => {
            let tag = engine.bind_tag_name(&key, &name)?;
            report(true, format!("Tagged {} with \"{}\" (#{}).", short(&key), tag.name, tag.id), json)
        }
        TagAction::Remove { key, tag_id } => {
            let deleted = engine.unbind_tag(&key, tag_id)?;
            let message = if deleted {
                format!("Removed tag #{} from {}; tag no longer used and deleted.", tag_id, short(&key))
            } else {
                format!("Removed tag #{} from {}.", tag_id, short(&key))
            };
            report(true, message, json)
        }
        TagAction::Rename { tag_id, name } => {
            engine.rename_tag(tag_id, &name)?;
            report(true, format!("Renamed tag #{} to \"{}\".", tag_id, name.trim()), json)
        }
        TagAction::List { key } => {
            let tags = match key {
                Some(key) => engine.clip_tags(&key)?,
                None => engine.list_tags()?,
            };
            if json {
                return print_json(&tags);
            }
            if tags.is_empty() {
                println!("No tags.");
            }
            for tag in &tags {
                println!("{:>4}  {}", tag.id, tag.name);
            }
            Ok(())
        }
    }
}

fn cmd_resync(paths: &AppPaths, json: bool) -> Result<()> {
    let opened = open_engine(paths, false)?;
    let result = opened.engine.resync_from_object_store()?;
    if json {
        return print_json(&result);
    }
    println!(
        "Rebuilt index with {} clip(s); skipped {} unreadable object(s).",
        result.clips, result.skipped
    );
    Ok(())
}

fn cmd_stats(paths: &AppPaths, json: bool) -> Result<()> {
    let opened = open_engine(paths, false)?;
    let stats = opened.engine.stats()?;

    if json {
        return print_json(&stats);
    }

    println!("Favourite Clips");
    println!("───────────────");
    println!("Clips:        {}", stats.index.total_clips);
    println!("Tags:         {}", stats.index.total_tags);
    println!("Bindings:     {}", stats.index.total_bindings);
    if let Some(oldest) = stats.index.oldest {
        println!("Oldest:       {}", oldest.format("%Y-%m-%d %H:%M"));
    }
    if let Some(newest) = stats.index.newest {
        println!("Newest:       {}", newest.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

fn short(key: &str) -> &str {
    key.get(..16).unwrap_or(key)
}

fn print_clip_row(clip: &StoredClip) {
    let meta = &clip.metadata;
    let oneline = meta.clip_text.replace('\n', " ");
    let preview = if oneline.chars().count() > 60 {
        format!("{}...", oneline.chars().take(57).collect::<String>())
    } else {
        oneline
    };
    let tags = if meta.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", meta.tags.join(", "))
    };
    println!(
        "{}  {:>6}  {}{}",
        short(&meta.key),
        format_age(meta.created_at),
        preview,
        tags
    );
}

fn format_age(dt: DateTime<Utc>) -> String {
    let dur = Utc::now() - dt;
    if dur.num_seconds() < 60 {
        "now".to_string()
    } else if dur.num_minutes() < 60 {
        format!("{}m", dur.num_minutes())
    } else if dur.num_hours() < 24 {
        format!("{}h", dur.num_hours())
    } else {
        format!("{}d", dur.num_days())
    }
}
