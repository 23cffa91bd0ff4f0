use std::future::Future;
use std::pin::Pin;

use sqlx::Database;

/// Runs `f` on a transaction that is always rolled back, so seeded data survives
/// whatever `f` does.
pub async fn with_test_transaction<DB, F, T, E>(pool: &sqlx::Pool<DB>, f: F) -> Result<T, E>
where
    DB: Database,
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(
        &'c mut <DB as Database>::Connection,
    ) -> Pin<Box<dyn Future<Output = Result<T, E>> + 'c>>,
{
    let mut tx = pool.begin().await?;
    let result = f(&mut *tx).await;
    tx.rollback().await?;
    result
}

/// A throwaway database for tests.
pub struct TestDatabase<DB: Database> {
    pool: sqlx::Pool<DB>,
}

impl<DB: Database> TestDatabase<DB> {
    pub fn pool(&self) -> &sqlx::Pool<DB> {
        &self.pool
    }

    pub fn into_pool(self) -> sqlx::Pool<DB> {
        self.pool
    }
}

#[cfg(feature = "sqlite")]
impl TestDatabase<sqlx::Sqlite> {
    /// In-memory sqlite; one connection so every statement sees the same database.
    pub async fn new_sqlite() -> Result<Self, sqlx::Error> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Runs `;`-separated statements, e.g. a schema and its seed rows.
    pub async fn run_script(&self, script: &str) -> Result<(), sqlx::Error> {
        for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}
