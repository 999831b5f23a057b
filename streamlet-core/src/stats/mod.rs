pub mod error;
pub mod hotness;
pub mod models;
pub mod store;

pub use error::{StatsError, StatsResult};
pub use hotness::hotness;
pub use models::VideoStats;
pub use store::{SqliteStatsStore, SqliteStatsStoreBuilder};
