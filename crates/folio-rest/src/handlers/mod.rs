pub mod cache;
pub mod error;
pub mod health;
pub mod resources;

pub use cache::{cache_stats, clear_cache, disk_usage};
pub use health::{health_handler, metrics};
pub use resources::{get_latest, list_versions, prune};
