use crate::dialect::SqlDialect;
use crate::value::{Value, bind_value_query, bind_value_query_as};
use sqlx::{Database, IntoArguments};

/// Target of the debug event emitted for every statement sent to the database.
pub const STATEMENT_TARGET: &str = "smartmix::sql";

pub(crate) fn trace_statement(sql: &str, binds: usize) {
    tracing::debug!(target: STATEMENT_TARGET, sql, binds, "statement");
}

/// Where statements run: a shared pool or one borrowed connection.
///
/// Passing a connection lets callers run smart queries inside their own
/// transaction; nothing here begins, commits or rolls back.
pub enum Executor<'a, DB: Database> {
    /// A shared connection pool.
    Pool(&'a sqlx::Pool<DB>),
    /// A single, mutable database connection.
    Conn(&'a mut DB::Connection),
}

impl<'a, DB: Database> std::fmt::Debug for Executor<'a, DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pool(_) => f.write_str("Executor::Pool"),
            Self::Conn(_) => f.write_str("Executor::Conn"),
        }
    }
}

impl<'a, DB: Database> From<&'a sqlx::Pool<DB>> for Executor<'a, DB> {
    fn from(pool: &'a sqlx::Pool<DB>) -> Self {
        Self::Pool(pool)
    }
}

/// Types that can be turned into an [`Executor`].
pub trait IntoExecutor<'a>: Send + 'a {
    type DB: SqlDialect;
    fn into_executor(self) -> Executor<'a, Self::DB>;
}

impl<'a, DB: SqlDialect> IntoExecutor<'a> for &'a sqlx::Pool<DB> {
    type DB = DB;
    fn into_executor(self) -> Executor<'a, DB> {
        Executor::Pool(self)
    }
}

#[cfg(feature = "sqlite")]
impl<'a> IntoExecutor<'a> for &'a mut sqlx::SqliteConnection {
    type DB = sqlx::Sqlite;
    fn into_executor(self) -> Executor<'a, Self::DB> {
        Executor::Conn(self)
    }
}

#[cfg(feature = "postgres")]
impl<'a> IntoExecutor<'a> for &'a mut sqlx::postgres::PgConnection {
    type DB = sqlx::Postgres;
    fn into_executor(self) -> Executor<'a, Self::DB> {
        Executor::Conn(self)
    }
}

#[cfg(feature = "mysql")]
impl<'a> IntoExecutor<'a> for &'a mut sqlx::mysql::MySqlConnection {
    type DB = sqlx::MySql;
    fn into_executor(self) -> Executor<'a, Self::DB> {
        Executor::Conn(self)
    }
}

impl<'a, DB: SqlDialect> IntoExecutor<'a> for Executor<'a, DB>
where
    DB::Connection: Send,
{
    type DB = DB;
    fn into_executor(self) -> Executor<'a, DB> {
        self
    }
}

impl<'a, DB: Database> Executor<'a, DB> {
    /// A shorter-lived executor over the same pool or connection.
    pub fn reborrow(&mut self) -> Executor<'_, DB> {
        match self {
            Self::Pool(pool) => Executor::Pool(pool),
            Self::Conn(conn) => Executor::Conn(&mut **conn),
        }
    }
}

impl<'a, DB> Executor<'a, DB>
where
    DB: SqlDialect,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    String: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    i64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    f64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    bool: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<String>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    uuid::Uuid: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    chrono::DateTime<chrono::Utc>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    /// Runs a statement with its bind values and returns the driver's result.
    pub async fn execute(
        &mut self,
        sql: &str,
        binds: Vec<Value>,
    ) -> Result<DB::QueryResult, sqlx::Error> {
        trace_statement(sql, binds.len());
        let query = binds
            .into_iter()
            .fold(sqlx::query::<DB>(sql), bind_value_query);
        match self {
            Self::Pool(pool) => query.execute(*pool).await,
            Self::Conn(conn) => query.execute(&mut **conn).await,
        }
    }

    /// Runs a SELECT and returns the raw rows, for callers that read columns by name.
    pub async fn fetch_rows(&mut self, sql: &str, binds: Vec<Value>) -> Result<Vec<DB::Row>, sqlx::Error> {
        trace_statement(sql, binds.len());
        let query = binds
            .into_iter()
            .fold(sqlx::query::<DB>(sql), bind_value_query);
        match self {
            Self::Pool(pool) => query.fetch_all(*pool).await,
            Self::Conn(conn) => query.fetch_all(&mut **conn).await,
        }
    }

    /// Runs a SELECT and maps every row.
    pub async fn fetch_all<T>(&mut self, sql: &str, binds: Vec<Value>) -> Result<Vec<T>, sqlx::Error>
    where
        T: for<'r> sqlx::FromRow<'r, DB::Row> + Send + Unpin,
    {
        trace_statement(sql, binds.len());
        let query = binds
            .into_iter()
            .fold(sqlx::query_as::<DB, T>(sql), bind_value_query_as);
        match self {
            Self::Pool(pool) => query.fetch_all(*pool).await,
            Self::Conn(conn) => query.fetch_all(&mut **conn).await,
        }
    }

    /// Runs a SELECT and maps the first row, if any.
    pub async fn fetch_optional<T>(
        &mut self,
        sql: &str,
        binds: Vec<Value>,
    ) -> Result<Option<T>, sqlx::Error>
    where
        T: for<'r> sqlx::FromRow<'r, DB::Row> + Send + Unpin,
    {
        trace_statement(sql, binds.len());
        let query = binds
            .into_iter()
            .fold(sqlx::query_as::<DB, T>(sql), bind_value_query_as);
        match self {
            Self::Pool(pool) => query.fetch_optional(*pool).await,
            Self::Conn(conn) => query.fetch_optional(&mut **conn).await,
        }
    }

    /// Streams the rows of an already-bound query.
    pub fn fetch_stream<'q, T, A>(
        self,
        query: sqlx::query::QueryAs<'q, DB, T, A>,
    ) -> futures_util::stream::BoxStream<'a, Result<T, sqlx::Error>>
    where
        T: for<'r> sqlx::FromRow<'r, DB::Row> + Send + Unpin + 'a,
        A: sqlx::IntoArguments<'q, DB> + 'q,
        'q: 'a,
    {
        match self {
            Self::Pool(pool) => query.fetch(pool),
            Self::Conn(conn) => query.fetch(conn),
        }
    }
}
