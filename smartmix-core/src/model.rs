use crate::alias::{AliasMap, Source};
use crate::dialect::SqlDialect;
use crate::eagerload::{LoadNode, LoadSchema};
use crate::error::{Error, QueryResult, SmartmixResult};
use crate::executor::{Executor, IntoExecutor};
use crate::expr::{OrderExpr, Predicate};
use crate::filter::{Filters, compile_filters};
use crate::inspect::Entity;
use crate::order::compile_order;
use crate::path::RelationPath;
use crate::query::{Query, fetch_loaded};
use crate::select::SelectQuery;
use crate::smart_query::QueryBackend;
use crate::value::Value;
use serde::Serialize;
use sqlx::{ColumnIndex, Database, FromRow, IntoArguments, Row, ValueRef};
use std::future::Future;
use std::pin::Pin;

#[inline(never)]
fn default_loader_result() -> SmartmixResult<()> {
    Ok(())
}

/// A model that can be queried with smart queries and persisted with the
/// active-record helpers on [`Query`].
///
/// Implemented by `#[derive(Entity)]` unless `#[smartmix(custom_loader)]` asks for
/// a hand-written impl (to provide [`Model::load_relation`] and the join hooks).
pub trait Model<DB>: Entity + Serialize + Sized + Send + Sync + Unpin
where
    DB: SqlDialect,
    for<'r> Self: FromRow<'r, DB::Row>,
{
    /// A query over this model, run through `executor`.
    fn query<'a, E>(executor: E) -> Query<'a, Self, DB>
    where
        E: IntoExecutor<'a, DB = DB>,
    {
        Query::new(executor.into_executor())
    }

    /// A query over a connection pool.
    fn query_in_pool(pool: &sqlx::Pool<DB>) -> Query<'_, Self, DB> {
        Query::new(Executor::Pool(pool))
    }

    /// A query over one connection, e.g. inside a caller-owned transaction.
    fn query_in_tx(conn: &mut DB::Connection) -> Query<'_, Self, DB> {
        Query::new(Executor::Conn(conn))
    }

    /// Filters, sorts and eager loads in one call.
    fn smart_query<'a, E, S>(
        executor: E,
        filters: &Filters,
        sort_keys: &[S],
        schema: &LoadSchema,
    ) -> QueryResult<Query<'a, Self, DB>>
    where
        E: IntoExecutor<'a, DB = DB>,
        S: AsRef<str>,
    {
        Self::query(executor).smart_query(filters, sort_keys, schema)
    }

    fn where_<'a, E>(executor: E, filters: &Filters) -> QueryResult<Query<'a, Self, DB>>
    where
        E: IntoExecutor<'a, DB = DB>,
    {
        Self::query(executor).where_(filters)
    }

    fn sort<'a, E, S>(executor: E, sort_keys: &[S]) -> QueryResult<Query<'a, Self, DB>>
    where
        E: IntoExecutor<'a, DB = DB>,
        S: AsRef<str>,
    {
        Self::query(executor).sort(sort_keys)
    }

    fn with_<'a, E>(executor: E, schema: &LoadSchema) -> QueryResult<Query<'a, Self, DB>>
    where
        E: IntoExecutor<'a, DB = DB>,
    {
        Self::query(executor).with_(schema)
    }

    fn with_joined<'a, E, S>(executor: E, paths: &[S]) -> QueryResult<Query<'a, Self, DB>>
    where
        E: IntoExecutor<'a, DB = DB>,
        S: AsRef<str>,
    {
        Self::query(executor).with_joined(paths)
    }

    fn with_subquery<'a, E, S>(executor: E, paths: &[S]) -> QueryResult<Query<'a, Self, DB>>
    where
        E: IntoExecutor<'a, DB = DB>,
        S: AsRef<str>,
    {
        Self::query(executor).with_subquery(paths)
    }

    /// Compiles filters on this model's own attributes (no relation hops).
    fn filter_expr(filters: &Filters) -> QueryResult<Vec<Predicate>> {
        compile_filters(Self::meta(), &AliasMap::default(), filters)
    }

    /// Compiles sort keys on this model's own attributes (no relation hops).
    fn order_expr<S: AsRef<str>>(sort_keys: &[S]) -> QueryResult<Vec<OrderExpr>> {
        let aliases = AliasMap::default();
        sort_keys
            .iter()
            .map(|key| compile_order(Self::meta(), &aliases, key.as_ref()))
            .collect()
    }

    /// The value of the first primary-key column, read through serde.
    fn primary_key_value(&self) -> SmartmixResult<Value> {
        let meta = Self::meta();
        let pk = meta
            .primary_keys()
            .first()
            .ok_or_else(|| Error::Message(format!("{} has no primary key", meta.name())))?;
        let serialized = serde_json::to_value(self)?;
        Ok(serialized
            .get(*pk)
            .cloned()
            .map(Value::from)
            .unwrap_or(Value::Null))
    }

    /// Reads one model from the columns named `<prefix><column>`, as selected for
    /// a hydrated join. `None` when the outer join matched nothing.
    ///
    /// Generated by `#[derive(Entity)]`; the default refuses.
    fn decode_prefixed(_row: &DB::Row, _prefix: &str) -> Result<Option<Self>, sqlx::Error> {
        Err(sqlx::Error::Decode(
            format!("{} cannot be read from joined columns", Self::meta().name()).into(),
        ))
    }

    /// Fills the relationships in `nodes` that `row` carries joined columns for.
    ///
    /// Called for every row, so a model repeated by a one-to-many join receives
    /// each of its children. Nodes without a prefix are skipped.
    fn merge_joined(&mut self, _row: &DB::Row, _nodes: &[LoadNode]) -> SmartmixResult<()> {
        Ok(())
    }

    /// Populates the relationship `node` names on already fetched models.
    ///
    /// Called once per top-level node after a select. Hydrated nodes are already
    /// filled by [`merge_joined`](Self::merge_joined) and only descend into their
    /// children; the others are fetched with one `IN` query. The default does
    /// nothing.
    #[inline(never)]
    fn load_relation<'e>(
        _models: &mut [Self],
        _node: &LoadNode,
        _executor: Executor<'e, DB>,
    ) -> impl Future<Output = SmartmixResult<()>> + Send {
        async move { default_loader_result() }
    }
}

#[doc(hidden)]
pub fn prefixed_column(prefix: &str, column: &str) -> String {
    format!("{}{}", prefix, column)
}

/// Whether the joined entity under `prefix` is absent from `row`, judged by its
/// first primary-key column.
#[doc(hidden)]
pub fn joined_row_is_null<T, DB>(row: &DB::Row, prefix: &str) -> Result<bool, sqlx::Error>
where
    T: Entity,
    DB: Database,
    for<'c> &'c str: ColumnIndex<DB::Row>,
{
    let pk = T::meta().primary_keys().first().copied().unwrap_or("id");
    let column = prefixed_column(prefix, pk);
    Ok(row.try_get_raw(column.as_str())?.is_null())
}

/// Fetches the `T` rows whose `column` is one of `keys`, ordered by primary key,
/// and loads `nodes` under them.
///
/// Used by the loaders `#[derive(Entity)]` generates, which box the future:
/// the children's loaders may come back to the parent type.
#[doc(hidden)]
pub async fn fetch_related<T, DB>(
    mut executor: Executor<'_, DB>,
    column: &str,
    keys: Vec<Value>,
    nodes: &[LoadNode],
) -> SmartmixResult<Vec<T>>
where
    DB: SqlDialect,
    T: Model<DB>,
    DB::Connection: Send,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: sqlx::Executor<'c, Database = DB>,
    String: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    i64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    f64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    bool: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<String>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    uuid::Uuid: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    chrono::DateTime<chrono::Utc>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    let meta = T::meta();
    let root = Source::Root(meta);
    let mut select = SelectQuery::new(meta).filter(root.column(column).in_list(keys));
    if let Some(pk) = meta.primary_keys().first() {
        select = select.order_by(OrderExpr::asc(root.column(pk)));
    }
    for node in nodes {
        select = select.eager_load(&node.to_directive(&RelationPath::root()));
    }
    fetch_loaded::<T, DB>(&mut executor, &select, "load_relation").await
}

/// Runs `T::load_relation` behind a boxed future, so models that refer to each
/// other can load each other's relationships.
#[doc(hidden)]
pub fn load_nested<'f, T, DB>(
    models: &'f mut [T],
    node: &'f LoadNode,
    executor: Executor<'f, DB>,
) -> Pin<Box<dyn Future<Output = SmartmixResult<()>> + Send + 'f>>
where
    DB: SqlDialect,
    T: Model<DB>,
{
    Box::pin(T::load_relation(models, node, executor))
}
