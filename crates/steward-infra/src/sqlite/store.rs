//! The SQLite-backed store handle.

use super::pool::DatabasePool;

/// Implements every repository trait (see the sibling modules), so one
/// cloneable handle satisfies `steward_core::repository::Store`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Open the database at `database_url`, running migrations.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        Ok(Self::new(DatabasePool::new(database_url).await?))
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}
