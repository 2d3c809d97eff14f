//! Metadata repositories for versioned resource records.

mod memory;
mod resource_repository;
mod util;

pub use memory::MemoryResourceRepository;
pub use resource_repository::SqliteResourceRepository;
pub use util::{create_sqlite_pool, run_migrations};

/// Embedded SQL migrations for the metadata database.
pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
