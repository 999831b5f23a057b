//! Application state.

use std::sync::Arc;

use streamlet_core::{
    ArtifactCache, ArtifactGenerator, FfmpegTool, GenerationService, GenerationSettings,
    MediaLibrary, MediaTool, SqliteStatsStore, StatsResult, StreamletConfig,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StreamletConfig>,
    pub library: MediaLibrary,
    pub stats: SqliteStatsStore,
    pub generation: Arc<GenerationService>,
}

impl AppState {
    /// State backed by the ffmpeg tools named in the config.
    pub fn new(config: StreamletConfig) -> StatsResult<Self> {
        let tool = Arc::new(FfmpegTool::from_section(&config.generation));
        Self::with_tool(config, tool)
    }

    /// Opens the stats database and wires the generator around `tool`.
    pub fn with_tool(config: StreamletConfig, tool: Arc<dyn MediaTool>) -> StatsResult<Self> {
        let stats = SqliteStatsStore::builder()
            .path(config.database_path())
            .create_if_missing(true)
            .build()?;
        stats.initialize()?;

        let library = MediaLibrary::from_section(&config.library);
        let generator = ArtifactGenerator::new(
            library.clone(),
            ArtifactCache::new(&config.paths.cache_dir),
            stats.clone(),
            tool,
            GenerationSettings::from_section(&config.generation),
        );
        Ok(Self {
            config: Arc::new(config),
            library,
            stats,
            generation: Arc::new(GenerationService::new(Arc::new(generator))),
        })
    }
}
