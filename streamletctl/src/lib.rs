use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use streamlet_core::{
    load_streamlet_config, ArtifactCache, ArtifactGenerator, ArtifactKind, FfmpegTool,
    GenerationProgress, GenerationService, GenerationSettings, MediaLibrary, SqliteStatsStore,
    StreamletConfig, VideoId, VideoStats,
};
use thiserror::Error;
use tracing::info;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] streamlet_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stats error: {0}")]
    Stats(#[from] streamlet_core::StatsError),
    #[error("library error: {0}")]
    Library(#[from] streamlet_core::LibraryError),
    #[error("generation error: {0}")]
    Generation(#[from] streamlet_core::GenerationError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "streamlet command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to streamlet.toml
    #[arg(long, default_value = "configs/streamlet.toml")]
    pub config: PathBuf,
    /// Alternate stats database (overrides paths.data_dir/streamlet.db)
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize library, cache and database
    Status,
    /// Library operations
    #[command(subcommand)]
    Videos(VideoCommands),
    /// Engagement stats
    #[command(subcommand)]
    Stats(StatsCommands),
    /// Run a batch generation in the foreground
    Generate(GenerateArgs),
    /// Run integrity checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Subcommand, Debug)]
pub enum VideoCommands {
    /// List eligible videos across all roots
    List(VideoListArgs),
}

#[derive(Args, Debug)]
pub struct VideoListArgs {
    /// Case-insensitive substring of the file name
    #[arg(long)]
    pub search: Option<String>,
    /// Maximum rows returned
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum StatsCommands {
    /// Stats for one video identifier
    Show(StatsShowArgs),
    /// Hotness ranking
    Top(StatsTopArgs),
}

#[derive(Args, Debug)]
pub struct StatsShowArgs {
    /// Video identifier, e.g. `0:shows/pilot.mp4`
    pub video: String,
}

#[derive(Args, Debug)]
pub struct StatsTopArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// `thumbnails` or `previews`
    #[arg(value_parser = parse_kind)]
    pub kind: ArtifactKind,
    /// Overrides generation.workers
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Check roots, cache directory, database and media tools
    Check,
}

fn parse_kind(raw: &str) -> std::result::Result<ArtifactKind, String> {
    raw.parse()
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Status => {
            let status = context.gather_status()?;
            render(&status, cli.format)?;
        }
        Commands::Videos(VideoCommands::List(args)) => {
            let videos = context.video_list(args)?;
            render(&videos, cli.format)?;
        }
        Commands::Stats(StatsCommands::Show(args)) => {
            let stats = context.stats_show(args)?;
            render(&stats, cli.format)?;
        }
        Commands::Stats(StatsCommands::Top(args)) => {
            let ranking = context.stats_top(args)?;
            render(&ranking, cli.format)?;
        }
        Commands::Generate(args) => {
            let report = context.generate(args)?;
            render(&report, cli.format)?;
            if report.progress.failed > 0 {
                return Err(AppError::MissingResource(format!(
                    "{} of {} videos failed",
                    report.progress.failed, report.progress.total
                )));
            }
        }
        Commands::Health(HealthCommands::Check) => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: StreamletConfig,
    config_path: PathBuf,
    database: PathBuf,
    library: MediaLibrary,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = load_streamlet_config(&config_path)?;
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        let library = MediaLibrary::from_section(&config.library);
        Ok(Self {
            config,
            config_path,
            database,
            library,
        })
    }

    fn open_stats(&self) -> Result<SqliteStatsStore> {
        let store = SqliteStatsStore::builder()
            .path(&self.database)
            .create_if_missing(true)
            .build()?;
        store.initialize()?;
        Ok(store)
    }

    fn gather_status(&self) -> Result<StatusReport> {
        let stats = self.open_stats()?;
        let rows = stats.all_stats()?;
        let videos = self.library.scan();
        let cache_dir = &self.config.paths.cache_dir;
        let mut thumbnails = 0;
        let mut previews = 0;
        if cache_dir.is_dir() {
            for entry in fs::read_dir(cache_dir)? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                if name.ends_with(ArtifactKind::Thumbnail.extension()) {
                    thumbnails += 1;
                } else if name.ends_with(ArtifactKind::Preview.extension()) {
                    previews += 1;
                }
            }
        }
        Ok(StatusReport {
            config: self.config_path.display().to_string(),
            roots: self
                .library
                .roots()
                .iter()
                .map(|root| root.display().to_string())
                .collect(),
            videos: videos.len(),
            library_bytes: videos.iter().map(|entry| entry.size).sum(),
            tracked_videos: rows.len(),
            total_views: rows.values().map(|row| row.views).sum(),
            cached_thumbnails: thumbnails,
            cached_previews: previews,
        })
    }

    fn video_list(&self, args: &VideoListArgs) -> Result<VideoList> {
        let stats = self.open_stats()?.all_stats()?;
        let needle = args.search.as_deref().map(str::to_lowercase);
        let rows = self
            .library
            .scan()
            .into_iter()
            .filter(|entry| {
                needle
                    .as_deref()
                    .map(|needle| entry.name.to_lowercase().contains(needle))
                    .unwrap_or(true)
            })
            .take(args.limit)
            .map(|entry| {
                let row = stats.get(&entry.id);
                VideoRow {
                    views: row.map(|row| row.views).unwrap_or(0),
                    hotness: row.map(|row| row.hotness).unwrap_or(0.0),
                    id: entry.id,
                    size: entry.size,
                    modified: entry.modified,
                }
            })
            .collect();
        Ok(VideoList { rows })
    }

    fn stats_show(&self, args: &StatsShowArgs) -> Result<StatsReport> {
        let id = self.library.canonical_id(&VideoId::new(args.video.trim()))?;
        let stats = self.open_stats()?.stats(&id)?;
        Ok(StatsReport { stats })
    }

    fn stats_top(&self, args: &StatsTopArgs) -> Result<Ranking> {
        let rows = self.open_stats()?.top_by_hotness(args.limit.max(1))?;
        Ok(Ranking { rows })
    }

    fn generate(&self, args: &GenerateArgs) -> Result<GenerateReport> {
        let stats = self.open_stats()?;
        let mut settings = GenerationSettings::from_section(&self.config.generation);
        if let Some(workers) = args.workers {
            settings.workers = workers.max(1);
        }
        let generator = ArtifactGenerator::new(
            self.library.clone(),
            ArtifactCache::new(&self.config.paths.cache_dir),
            stats,
            Arc::new(FfmpegTool::from_section(&self.config.generation)),
            settings.clone(),
        );
        info!(kind = %args.kind, workers = settings.workers, "starting foreground generation");
        let service = GenerationService::new(Arc::new(generator));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let started = Utc::now();
        let progress = runtime.block_on(service.run(args.kind))?;
        Ok(GenerateReport {
            kind: args.kind,
            progress,
            elapsed_s: (Utc::now() - started).num_milliseconds() as f64 / 1000.0,
        })
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        let mut entries = Vec::new();

        for (index, root) in self.library.roots().iter().enumerate() {
            let name = format!("root[{index}]");
            entries.push(match fs::read_dir(root) {
                Ok(_) => HealthEntry::ok(name, root.display().to_string()),
                Err(err) => HealthEntry::error(name, format!("{}: {err}", root.display())),
            });
        }

        entries.push(check_writable_dir(
            "cache_dir",
            &self.config.paths.cache_dir,
        ));

        entries.push(match self.open_stats() {
            Ok(store) => match store.all_stats() {
                Ok(rows) => HealthEntry::ok("database", format!("{} rows", rows.len())),
                Err(err) => HealthEntry::error("database", err.to_string()),
            },
            Err(err) => HealthEntry::error("database", err.to_string()),
        });

        entries.push(check_tool("ffmpeg", &self.config.generation.ffmpeg));
        entries.push(check_tool("ffprobe", &self.config.generation.ffprobe));
        entries
    }
}

fn check_writable_dir(name: &str, dir: &Path) -> HealthEntry {
    if let Err(err) = fs::create_dir_all(dir) {
        return HealthEntry::error(name, format!("{}: {err}", dir.display()));
    }
    let marker = dir.join(".streamlet-health");
    match fs::write(&marker, b"ok").and_then(|_| fs::remove_file(&marker)) {
        Ok(()) => HealthEntry::ok(name, dir.display().to_string()),
        Err(err) => HealthEntry::error(name, format!("not writable: {err}")),
    }
}

/// A missing media tool only degrades generation, so it is a warning.
fn check_tool(name: &str, program: &Path) -> HealthEntry {
    let status = Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) if status.success() => HealthEntry::ok(name, program.display().to_string()),
        Ok(status) => HealthEntry::warn(name, format!("exited with {status}")),
        Err(err) => HealthEntry::warn(name, format!("{}: {err}", program.display())),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub config: String,
    pub roots: Vec<String>,
    pub videos: usize,
    pub library_bytes: u64,
    pub tracked_videos: usize,
    pub total_views: i64,
    pub cached_thumbnails: usize,
    pub cached_previews: usize,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("config: {}", self.config),
            format!("roots: {}", self.roots.join(", ")),
            format!(
                "videos: {} ({:.1} GiB)",
                self.videos,
                self.library_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
            ),
            format!("tracked: {} ({} views)", self.tracked_videos, self.total_views),
        ];
        lines.push(format!(
            "cache: {} thumbnails, {} previews",
            self.cached_thumbnails, self.cached_previews
        ));
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct VideoList {
    pub rows: Vec<VideoRow>,
}

#[derive(Debug, Serialize)]
pub struct VideoRow {
    pub id: VideoId,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub views: i64,
    pub hotness: f64,
}

impl DisplayFallback for VideoList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no videos found".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "{id}  {mb:.1} MiB  views={views}  hotness={hotness:.1}",
                    id = row.id,
                    mb = row.size as f64 / (1024.0 * 1024.0),
                    views = row.views,
                    hotness = row.hotness
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub stats: VideoStats,
}

impl DisplayFallback for StatsReport {
    fn display(&self) -> String {
        let stats = &self.stats;
        let last_viewed = stats
            .last_viewed
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        [
            format!("video: {}", stats.path),
            format!("views: {}", stats.views),
            format!("likes: {} (liked: {})", stats.likes, stats.liked),
            format!("last viewed: {last_viewed}"),
            format!("hotness: {:.2}", stats.hotness),
            format!(
                "thumbnail: {}",
                stats.thumbnail_hash.as_deref().unwrap_or("-")
            ),
            format!("preview: {}", stats.preview_hash.as_deref().unwrap_or("-")),
        ]
        .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct Ranking {
    pub rows: Vec<VideoStats>,
}

impl DisplayFallback for Ranking {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no engagement recorded".to_string();
        }
        self.rows
            .iter()
            .enumerate()
            .map(|(rank, row)| {
                format!(
                    "{rank:>3}. {hotness:>8.2}  {path}  views={views} likes={likes}",
                    rank = rank + 1,
                    hotness = row.hotness,
                    path = row.path,
                    views = row.views,
                    likes = row.likes
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateReport {
    pub kind: ArtifactKind,
    pub progress: GenerationProgress,
    pub elapsed_s: f64,
}

impl DisplayFallback for GenerateReport {
    fn display(&self) -> String {
        format!(
            "{kind}: {done}/{total} generated, {failed} failed in {elapsed:.1}s",
            kind = self.kind,
            done = self.progress.done,
            total = self.progress.total,
            failed = self.progress.failed,
            elapsed = self.elapsed_s
        )
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prepare_test_context() -> Result<(TempDir, AppContext)> {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let videos = root.join("videos");
        fs::create_dir_all(videos.join("shows")).unwrap();
        fs::write(videos.join("shows/pilot.mp4"), vec![1u8; 32]).unwrap();
        fs::write(videos.join("finale.mp4"), vec![2u8; 64]).unwrap();
        fs::write(videos.join("._finale.mp4"), vec![2u8; 64]).unwrap();

        let configs_dir = root.join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        let config_path = configs_dir.join("streamlet.toml");
        fs::write(
            &config_path,
            "[library]\n\
             roots = [\"../videos\", \"../missing\"]\n\
             min_size_bytes = 1\n\
             [paths]\n\
             cache_dir = \"../cache\"\n\
             data_dir = \"../data\"\n\
             [generation]\n\
             ffmpeg = \"/nonexistent/ffmpeg\"\n\
             ffprobe = \"/nonexistent/ffprobe\"\n",
        )
        .unwrap();

        let cli = Cli {
            config: config_path,
            database: None,
            format: OutputFormat::Json,
            command: Commands::Status,
        };
        let context = AppContext::new(&cli)?;
        Ok((temp, context))
    }

    #[test]
    fn status_counts_eligible_videos() {
        let (_temp, context) = prepare_test_context().unwrap();
        let status = context.gather_status().unwrap();
        assert_eq!(status.videos, 2);
        assert_eq!(status.library_bytes, 96);
        assert_eq!(status.roots.len(), 2);
        assert_eq!(status.tracked_videos, 0);
    }

    #[test]
    fn video_listing_filters_and_limits() {
        let (_temp, context) = prepare_test_context().unwrap();
        let all = context
            .video_list(&VideoListArgs {
                search: None,
                limit: 10,
            })
            .unwrap();
        assert_eq!(all.rows.len(), 2);
        let searched = context
            .video_list(&VideoListArgs {
                search: Some("PILOT".into()),
                limit: 10,
            })
            .unwrap();
        assert_eq!(searched.rows.len(), 1);
        assert_eq!(searched.rows[0].id.as_str(), "0:shows/pilot.mp4");
    }

    #[test]
    fn ranking_reflects_recorded_views() {
        let (_temp, context) = prepare_test_context().unwrap();
        let store = context.open_stats().unwrap();
        let id = VideoId::new("0:finale.mp4");
        store.record_view_at(&id, "finale.mp4", Utc::now()).unwrap();

        let ranking = context.stats_top(&StatsTopArgs { limit: 5 }).unwrap();
        assert_eq!(ranking.rows.len(), 1);
        assert_eq!(ranking.rows[0].path, id);

        let shown = context
            .stats_show(&StatsShowArgs {
                video: "0:finale.mp4".into(),
            })
            .unwrap();
        assert_eq!(shown.stats.views, 1);
        assert!(context
            .stats_show(&StatsShowArgs {
                video: "5:finale.mp4".into()
            })
            .is_err());
    }

    #[test]
    fn health_check_flags_missing_root_and_tools() {
        let (_temp, context) = prepare_test_context().unwrap();
        let report = context.health_check();
        let status_of = |name: &str| {
            report
                .iter()
                .find(|entry| entry.name == name)
                .map(|entry| format!("{}", entry.status))
                .unwrap()
        };
        assert_eq!(status_of("root[0]"), "OK");
        assert_eq!(status_of("root[1]"), "ERROR");
        assert_eq!(status_of("cache_dir"), "OK");
        assert_eq!(status_of("database"), "OK");
        assert_eq!(status_of("ffmpeg"), "WARN");
    }

    #[test]
    fn generate_kind_accepts_plural_names() {
        assert_eq!(parse_kind("previews").unwrap(), ArtifactKind::Preview);
        assert!(parse_kind("posters").is_err());
    }
}
