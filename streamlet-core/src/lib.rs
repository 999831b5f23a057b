pub mod artifact;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod library;
pub mod media;
pub mod pipeline;
pub mod sqlite;
pub mod stats;
pub mod streaming;

pub use artifact::{ArtifactCache, ArtifactKind};
pub use config::{
    load_streamlet_config, GenerationSection, LibrarySection, PathsSection, ServerSection,
    StreamletConfig,
};
pub use error::{ConfigError, Result};
pub use fingerprint::{fingerprint_file, ContentFingerprint, FINGERPRINT_PREFIX_BYTES};
pub use library::{LibraryEntry, LibraryError, LibraryResult, MediaLibrary, ScanFilter, VideoId};
pub use media::{
    ArtifactRequest, CommandExecutor, FfmpegTool, MediaError, MediaResult, MediaTool, RenderPlan,
    SystemCommandExecutor,
};
pub use pipeline::{
    ArtifactGenerator, ArtifactOrigin, ArtifactOutcome, GenerationError, GenerationProgress,
    GenerationResult, GenerationService, GenerationSettings, RunRegistry, RunTicket,
};
pub use stats::{
    hotness, SqliteStatsStore, SqliteStatsStoreBuilder, StatsError, StatsResult, VideoStats,
};
pub use streaming::{
    open_planned, parse_range, ByteRange, RangeBody, StreamPlan, StreamingError,
    StreamingResult,
};
