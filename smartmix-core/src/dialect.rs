use crate::expr::DatePart;
use sqlx::Database;

/// What the SQL renderer needs to know about a database: placeholder style,
/// identifier quoting, and the expressions whose spelling differs between engines.
pub trait SqlDialect: Database + Sized + Send + Sync {
    /// Returns the placeholder for the `n`-th parameter in a query (e.g., "?" or "$1").
    fn placeholder(n: usize) -> String;
    /// Returns the number of rows affected by a query result.
    fn rows_affected(res: &Self::QueryResult) -> u64;
    /// Returns the ID of the last inserted row.
    fn last_insert_id(res: &Self::QueryResult) -> i64;
    /// Whether `INSERT ... RETURNING *` is available.
    fn supports_returning() -> bool {
        false
    }

    /// Quotes an identifier (table/column/alias name) to prevent SQL injection.
    fn quote_identifier(ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    /// Extracts a date part from an already-rendered expression as an integer.
    fn date_part(part: DatePart, expr: &str) -> String {
        format!("EXTRACT({} FROM {})", part.sql_keyword(), expr)
    }

    /// Case-insensitive pattern match of `expr` against the placeholder `pattern`.
    fn ilike(expr: &str, pattern: &str) -> String {
        format!("LOWER({}) LIKE LOWER({})", expr, pattern)
    }
}

#[cfg(feature = "sqlite")]
impl SqlDialect for sqlx::Sqlite {
    fn placeholder(_n: usize) -> String {
        "?".to_owned()
    }
    fn rows_affected(res: &sqlx::sqlite::SqliteQueryResult) -> u64 {
        res.rows_affected()
    }
    fn last_insert_id(res: &sqlx::sqlite::SqliteQueryResult) -> i64 {
        res.last_insert_rowid()
    }
    fn supports_returning() -> bool {
        true
    }
    fn date_part(part: DatePart, expr: &str) -> String {
        format!(
            "CAST(strftime('{}', {}) AS INTEGER)",
            part.strftime_format(),
            expr
        )
    }
}

#[cfg(feature = "postgres")]
impl SqlDialect for sqlx::Postgres {
    fn placeholder(n: usize) -> String {
        format!("${}", n)
    }
    fn rows_affected(res: &sqlx::postgres::PgQueryResult) -> u64 {
        res.rows_affected()
    }
    fn last_insert_id(_res: &sqlx::postgres::PgQueryResult) -> i64 {
        0
    }
    fn supports_returning() -> bool {
        true
    }
    fn quote_identifier(ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
    fn date_part(part: DatePart, expr: &str) -> String {
        format!("CAST(EXTRACT({} FROM {}) AS INTEGER)", part.sql_keyword(), expr)
    }
    fn ilike(expr: &str, pattern: &str) -> String {
        format!("{} ILIKE {}", expr, pattern)
    }
}

#[cfg(feature = "mysql")]
impl SqlDialect for sqlx::MySql {
    fn placeholder(_n: usize) -> String {
        "?".to_owned()
    }
    fn rows_affected(res: &sqlx::mysql::MySqlQueryResult) -> u64 {
        res.rows_affected()
    }
    fn last_insert_id(res: &sqlx::mysql::MySqlQueryResult) -> i64 {
        res.last_insert_id() as i64
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use sqlx::Sqlite;

    #[test]
    fn sqlite_extracts_date_parts_with_strftime() {
        let sql = <Sqlite as SqlDialect>::date_part(DatePart::Month, "`c`.`created_at`");
        assert_eq!(sql, "CAST(strftime('%m', `c`.`created_at`) AS INTEGER)");
    }

    #[test]
    fn quoting_escapes_backticks() {
        assert_eq!(<Sqlite as SqlDialect>::quote_identifier("a`b"), "`a``b`");
    }
}
