use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

pub const DEFAULT_MIN_SIZE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamletConfig {
    pub library: LibrarySection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl StreamletConfig {
    /// Anchors every relative path of the config at `base`.
    pub fn resolve_paths<P: AsRef<Path>>(&mut self, base: P) {
        let base = base.as_ref();
        for root in &mut self.library.roots {
            *root = resolve_against(base, root);
        }
        self.paths.cache_dir = resolve_against(base, &self.paths.cache_dir);
        self.paths.data_dir = resolve_against(base, &self.paths.data_dir);
    }

    pub fn database_path(&self) -> PathBuf {
        self.paths.data_dir.join("streamlet.db")
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.library.roots.is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "library.roots must list at least one directory".into(),
            });
        }
        if self.library.extension.trim().is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "library.extension must not be empty".into(),
            });
        }
        Ok(())
    }
}

fn resolve_against(base: &Path, candidate: &Path) -> PathBuf {
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibrarySection {
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_hidden_prefix")]
    pub hidden_prefix: String,
    #[serde(default = "default_min_size")]
    pub min_size_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_preview_segments")]
    pub preview_segments: usize,
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: f64,
    #[serde(default = "default_fallback_clip_seconds")]
    pub fallback_clip_seconds: f64,
    #[serde(default = "default_duration_seconds")]
    pub default_duration_seconds: f64,
    #[serde(default = "default_true")]
    pub on_startup: bool,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
}

impl GenerationSection {
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds.max(1))
    }
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            preview_segments: default_preview_segments(),
            segment_seconds: default_segment_seconds(),
            fallback_clip_seconds: default_fallback_clip_seconds(),
            default_duration_seconds: default_duration_seconds(),
            on_startup: true,
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            command_timeout_seconds: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_extension() -> String {
    "mp4".into()
}

fn default_hidden_prefix() -> String {
    "._".into()
}

fn default_min_size() -> u64 {
    DEFAULT_MIN_SIZE_BYTES
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("thumbnails")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_workers() -> usize {
    4
}

fn default_preview_segments() -> usize {
    60
}

fn default_segment_seconds() -> f64 {
    0.5
}

fn default_fallback_clip_seconds() -> f64 {
    30.0
}

fn default_duration_seconds() -> f64 {
    600.0
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_command_timeout() -> u64 {
    300
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

/// Loads, validates and rebases a config file.
///
/// Relative paths inside the file are resolved against the directory that
/// contains it, so the server can be started from any working directory.
pub fn load_streamlet_config<P: AsRef<Path>>(path: P) -> Result<StreamletConfig> {
    let path = path.as_ref();
    let mut config: StreamletConfig = load_toml(path)?;
    config.validate(path)?;
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    config.resolve_paths(base);
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
