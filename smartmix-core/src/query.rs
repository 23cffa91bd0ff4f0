use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use sqlx::{Database, FromRow, IntoArguments};

use crate::alias::{AliasRef, Source};
use crate::dialect::SqlDialect;
use crate::eagerload::{LoadDirective, LoadSchema, LoadStrategy};
use crate::error::{Error, QueryError, QueryResult, SmartmixResult};
use crate::executor::{Executor, trace_statement};
use crate::expr::{OrderExpr, Predicate};
use crate::filter::Filters;
use crate::inspect::EntityMeta;
use crate::model::Model;
use crate::path::RelationPath;
use crate::render::SqlWriter;
use crate::select::SelectQuery;
use crate::smart_query::{QueryBackend, smart_query};
use crate::timestamp;
use crate::value::{Value, bind_value_query_as};

#[cfg(feature = "metrics")]
fn record_query_metrics(operation: &str, table: &str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let labels = [
        ("operation", operation.to_string()),
        ("table", table.to_string()),
    ];
    metrics::histogram!("smartmix.query.duration_ms", &labels).record(elapsed_ms);
    metrics::counter!("smartmix.query.count", &labels).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_query_metrics(_operation: &str, _table: &str, _elapsed: Duration) {}

/// JSON attribute values become bind values; RFC 3339 strings bind as timestamps.
fn column_value(value: serde_json::Value) -> Value {
    if let serde_json::Value::String(text) = &value {
        if let Ok(at) = chrono::DateTime::parse_from_rfc3339(text) {
            return Value::DateTime(at.with_timezone(&chrono::Utc));
        }
    }
    Value::from(value)
}

fn build_insert<DB: SqlDialect>(meta: &EntityMeta, values: &[(String, Value)]) -> (String, Vec<Value>) {
    let mut writer = SqlWriter::<DB>::new();
    writer.push("INSERT INTO ");
    writer.push_ident(meta.table());
    if values.is_empty() {
        writer.push(" DEFAULT VALUES");
    } else {
        writer.push(" (");
        for (i, (column, _)) in values.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push_ident(column);
        }
        writer.push(") VALUES (");
        for (i, (_, value)) in values.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push_bind(value.clone());
        }
        writer.push(")");
    }
    if DB::supports_returning() {
        writer.push(" RETURNING *");
    }
    writer.finish()
}

/// Runs `select`, collapses rows repeated by joins and populates every eager path.
///
/// Relationships the load plan hydrates are read from the same rows; the rest
/// go through [`Model::load_relation`].
pub(crate) async fn fetch_loaded<T, DB>(
    executor: &mut Executor<'_, DB>,
    select: &SelectQuery,
    operation: &'static str,
) -> SmartmixResult<Vec<T>>
where
    DB: SqlDialect,
    T: Model<DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: sqlx::Executor<'c, Database = DB>,
    DB::Connection: Send,
    String: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    i64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    f64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    bool: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<String>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    uuid::Uuid: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    chrono::DateTime<chrono::Utc>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    let plan = select.load_plan();
    let (sql, binds) = select.build_loading::<DB>(&plan);
    let joins = select.joins().len() + plan.extra_joins().len();

    #[cfg(debug_assertions)]
    tracing::debug!(
        operation,
        sql = %sql,
        joins,
        hydrated = plan.hydrated().len(),
        "smartmix query"
    );

    let start = Instant::now();
    let rows = executor.fetch_rows(&sql, binds).await?;
    record_query_metrics(operation, T::meta().table(), start.elapsed());

    let mut models: Vec<T> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in &rows {
        let model = <T as FromRow<'_, DB::Row>>::from_row(row)?;
        let position = if joins == 0 {
            models.push(model);
            models.len() - 1
        } else {
            let key = <T as Model<DB>>::primary_key_value(&model)?.to_display_string();
            match positions.get(&key) {
                Some(&position) => position,
                None => {
                    positions.insert(key, models.len());
                    models.push(model);
                    models.len() - 1
                }
            }
        };
        models[position].merge_joined(row, plan.nodes())?;
    }
    drop(rows);

    for node in plan.nodes() {
        T::load_relation(&mut models, node, executor.reborrow()).await?;
    }
    Ok(models)
}

/// A smart query over model `T`, bound to an executor.
///
/// Building (`smart_query`, `where_`, `sort`, `with_*`) is synchronous and fails
/// fast with a [`QueryError`]; the async methods run the statement.
pub struct Query<'a, T, DB: Database> {
    executor: Executor<'a, DB>,
    select: SelectQuery,
    allow_unsafe: bool,
    _marker: PhantomData<T>,
}

impl<'a, T, DB: Database> std::fmt::Debug for Query<'a, T, DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("select", &self.select)
            .field("allow_unsafe", &self.allow_unsafe)
            .finish()
    }
}

impl<'a, T, DB> Query<'a, T, DB>
where
    DB: SqlDialect,
    T: Model<DB>,
{
    pub fn new(executor: Executor<'a, DB>) -> Self {
        Self {
            executor,
            select: SelectQuery::new(T::meta()),
            allow_unsafe: false,
            _marker: PhantomData,
        }
    }

    fn map_select(mut self, f: impl FnOnce(SelectQuery) -> SelectQuery) -> Self {
        self.select = f(self.select);
        self
    }

    /// Applies filters, sort keys and an eager-load schema in one step.
    pub fn smart_query<S: AsRef<str>>(
        self,
        filters: &Filters,
        sort_keys: &[S],
        schema: &LoadSchema,
    ) -> QueryResult<Self> {
        smart_query(self, filters, sort_keys, schema)
    }

    pub fn where_(self, filters: &Filters) -> QueryResult<Self> {
        self.smart_query(filters, &[] as &[&str], &LoadSchema::new())
    }

    pub fn sort<S: AsRef<str>>(self, sort_keys: &[S]) -> QueryResult<Self> {
        self.smart_query(&Filters::new(), sort_keys, &LoadSchema::new())
    }

    pub fn with_(self, schema: &LoadSchema) -> QueryResult<Self> {
        self.smart_query(&Filters::new(), &[] as &[&str], schema)
    }

    /// Eager loads every dotted (or `___`-joined) path with the joined strategy.
    pub fn with_joined<S: AsRef<str>>(self, paths: &[S]) -> QueryResult<Self> {
        self.with_(&LoadSchema::from_paths(paths, LoadStrategy::Joined))
    }

    /// Eager loads every path with the subquery strategy.
    pub fn with_subquery<S: AsRef<str>>(self, paths: &[S]) -> QueryResult<Self> {
        self.with_(&LoadSchema::from_paths(paths, LoadStrategy::Subquery))
    }

    /// Adds already compiled predicates, e.g. from [`Model::filter_expr`].
    pub fn filter_expr(self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        predicates
            .into_iter()
            .fold(self, |query, predicate| query.filter(predicate))
    }

    pub fn limit(self, limit: u64) -> Self {
        self.map_select(|select| select.limit(limit))
    }

    pub fn offset(self, offset: u64) -> Self {
        self.map_select(|select| select.offset(offset))
    }

    /// Allows bulk `update` / `delete` without any filter.
    pub fn allow_unsafe(mut self) -> Self {
        self.allow_unsafe = true;
        self
    }

    pub fn select(&self) -> &SelectQuery {
        &self.select
    }

    /// The SELECT that [`all`](Self::all) runs, hydrated joins included.
    pub fn to_sql(&self) -> String {
        let plan = self.select.load_plan();
        self.select.build_loading::<DB>(&plan).0
    }

    fn primary_key() -> SmartmixResult<&'static str> {
        let meta = T::meta();
        meta.primary_keys()
            .first()
            .copied()
            .ok_or_else(|| Error::Message(format!("{} has no primary key", meta.name())))
    }

    fn ensure_filtered(&self, operation: &str) -> SmartmixResult<()> {
        if !self.select.has_filters() && !self.allow_unsafe {
            return Err(Error::Message(format!(
                "refusing bulk {} on {} without filters",
                operation,
                T::meta().table()
            )));
        }
        Ok(())
    }

    /// Checks an attribute map against the settable attributes (the columns).
    fn attribute_values(values: serde_json::Value) -> SmartmixResult<Vec<(String, Value)>> {
        let meta = T::meta();
        let serde_json::Value::Object(map) = values else {
            return Err(Error::Message(format!(
                "attributes for {} must be a JSON object",
                meta.name()
            )));
        };
        map.into_iter()
            .map(|(key, value)| {
                if !meta.settable_attributes().contains(&key.as_str()) {
                    return Err(Error::Query(QueryError::UnknownAttribute {
                        attribute: key.clone(),
                        key,
                        entity: meta.name(),
                    }));
                }
                Ok((key, column_value(value)))
            })
            .collect()
    }

    /// The model's column values as serialized by serde.
    fn model_values(model: &T) -> SmartmixResult<Vec<(String, Value)>> {
        let meta = T::meta();
        let serde_json::Value::Object(mut map) = serde_json::to_value(model)? else {
            return Err(Error::Message(format!("{} did not serialize to an object", meta.name())));
        };
        Ok(meta
            .columns()
            .iter()
            .filter_map(|column| {
                map.remove(*column)
                    .map(|value| ((*column).to_owned(), column_value(value)))
            })
            .collect())
    }
}

impl<'a, T, DB> QueryBackend for Query<'a, T, DB>
where
    DB: SqlDialect,
    T: Model<DB>,
{
    fn root_entity(&self) -> &'static EntityMeta {
        self.select.root()
    }

    fn alias_count(&self) -> usize {
        self.select.alias_count()
    }

    fn outer_join(self, alias: &AliasRef) -> Self {
        self.map_select(|select| select.outer_join(alias))
    }

    fn contains_eager(self, path: &RelationPath, alias: &AliasRef) -> Self {
        self.map_select(|select| select.contains_eager(path, alias))
    }

    fn eager_load(self, directive: &LoadDirective) -> Self {
        self.map_select(|select| select.eager_load(directive))
    }

    fn filter(self, predicate: Predicate) -> Self {
        self.map_select(|select| select.filter(predicate))
    }

    fn order_by(self, order: OrderExpr) -> Self {
        self.map_select(|select| select.order_by(order))
    }
}

impl<'a, T, DB> Query<'a, T, DB>
where
    DB: SqlDialect,
    T: Model<DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: sqlx::Executor<'c, Database = DB>,
    DB::Connection: Send,
    String: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    i64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    f64: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    bool: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    Option<String>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    uuid::Uuid: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
    chrono::DateTime<chrono::Utc>: for<'q> sqlx::Encode<'q, DB> + sqlx::Type<DB>,
{
    /// Runs the SELECT and returns every matching model.
    ///
    /// Rows repeated by one-to-many joins are collapsed by primary key. Joined
    /// relationships are read from the same statement unless the query is paged;
    /// subquery ones take one more statement per level.
    #[tracing::instrument(skip(self), fields(table = T::meta().table()))]
    pub async fn all(mut self) -> SmartmixResult<Vec<T>> {
        fetch_loaded(&mut self.executor, &self.select, "select").await
    }

    #[tracing::instrument(skip(self), fields(table = T::meta().table()))]
    pub async fn first(self) -> SmartmixResult<Option<T>> {
        let rows = self.limit(1).all().await?;
        Ok(rows.into_iter().next())
    }

    /// The model with primary key `id`, among the rows this query matches.
    pub async fn find(self, id: impl Into<Value>) -> SmartmixResult<Option<T>> {
        let pk = Self::primary_key()?;
        let predicate = Source::Root(T::meta()).column(pk).equals(id);
        self.filter(predicate).first().await
    }

    /// Like [`find`](Self::find), but a missing row is [`Error::NotFound`].
    pub async fn find_or_fail(self, id: impl Into<Value>) -> SmartmixResult<T> {
        let id = id.into();
        let shown = id.to_display_string();
        self.find(id).await?.ok_or(Error::NotFound {
            entity: T::meta().name(),
            id: shown,
        })
    }

    /// Streams the matching rows.
    ///
    /// Rows are yielded as they arrive: no join de-duplication and no relation
    /// loading happen here.
    #[tracing::instrument(skip(self), fields(table = T::meta().table()))]
    pub fn stream(self) -> futures_util::stream::BoxStream<'a, Result<T, sqlx::Error>>
    where
        T: 'a,
    {
        let (sql, binds) = self.select.build::<DB>();

        #[cfg(debug_assertions)]
        tracing::debug!(operation = "stream", sql = %sql, "smartmix query");

        let executor = self.executor;
        Box::pin(async_stream::try_stream! {
            trace_statement(&sql, binds.len());
            let query = binds
                .into_iter()
                .fold(sqlx::query_as::<DB, T>(&sql), bind_value_query_as);
            let mut rows = executor.fetch_stream(query);
            while let Some(row) = rows.next().await {
                yield row?;
            }
        })
    }

    async fn fetch_by_pk(&mut self, id: Value) -> SmartmixResult<Option<T>> {
        let pk = Self::primary_key()?;
        let (sql, binds) = SelectQuery::new(T::meta())
            .filter(Source::Root(T::meta()).column(pk).equals(id))
            .build::<DB>();
        Ok(self.executor.fetch_optional(&sql, binds).await?)
    }

    async fn insert_row(&mut self, values: Vec<(String, Value)>) -> SmartmixResult<T> {
        let meta = T::meta();
        let (sql, binds) = build_insert::<DB>(meta, &values);
        tracing::debug!(operation = "insert", sql = %sql, "smartmix query");

        let start = Instant::now();
        let inserted = if DB::supports_returning() {
            self.executor.fetch_optional(&sql, binds).await?
        } else {
            let result = self.executor.execute(&sql, binds).await?;
            let pk = Self::primary_key()?;
            let id = values
                .iter()
                .find(|(column, value)| column == pk && !value.is_null())
                .map(|(_, value)| value.clone())
                .unwrap_or(Value::Int(DB::last_insert_id(&result)));
            self.fetch_by_pk(id).await?
        };
        record_query_metrics("insert", meta.table(), start.elapsed());

        inserted.ok_or_else(|| Error::Message(format!("inserted {} row could not be read back", meta.name())))
    }

    /// Inserts a row from an attribute map and returns the stored model.
    ///
    /// Keys must be columns; entities with timestamps get `created_at` and
    /// `updated_at` filled in.
    #[tracing::instrument(skip(self, values), fields(table = T::meta().table()))]
    pub async fn create(mut self, values: serde_json::Value) -> SmartmixResult<T> {
        let mut values = Self::attribute_values(values)?;
        timestamp::stamp_insert(T::meta(), &mut values, timestamp::now());
        self.insert_row(values).await
    }

    /// Inserts `model` when its primary key is unset (null or 0), updates it
    /// otherwise, and returns the row as stored.
    #[tracing::instrument(skip(self, model), fields(table = T::meta().table()))]
    pub async fn save(mut self, model: &T) -> SmartmixResult<T> {
        let meta = T::meta();
        let pk = Self::primary_key()?;
        let mut values = Self::model_values(model)?;
        let id = values
            .iter()
            .find(|(column, _)| column == pk)
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null);
        let now = timestamp::now();

        if id.is_null() || id == Value::Int(0) {
            values.retain(|(column, _)| column != pk);
            timestamp::stamp_insert(meta, &mut values, now);
            return self.insert_row(values).await;
        }

        let mut changes: Vec<(String, Value)> = values
            .iter()
            .filter(|(column, _)| column != pk)
            .cloned()
            .collect();
        timestamp::stamp_update(meta, &mut changes, now);
        let pairs: Vec<(&str, Value)> = changes
            .iter()
            .map(|(column, value)| (column.as_str(), value.clone()))
            .collect();
        let (sql, binds) = SelectQuery::new(meta)
            .filter(Source::Root(meta).column(pk).equals(id.clone()))
            .build_update::<DB>(&pairs);
        tracing::debug!(operation = "save", sql = %sql, "smartmix query");

        let start = Instant::now();
        let result = self.executor.execute(&sql, binds).await?;
        record_query_metrics("save", meta.table(), start.elapsed());

        if DB::rows_affected(&result) == 0 {
            // The key was set by the caller but no such row exists yet.
            timestamp::stamp_insert(meta, &mut values, now);
            return self.insert_row(values).await;
        }
        self.fetch_by_pk(id.clone()).await?.ok_or(Error::NotFound {
            entity: meta.name(),
            id: id.to_display_string(),
        })
    }

    /// Sets columns on every matching row; returns the number of rows changed.
    ///
    /// # Errors
    /// Refuses to run without filters unless [`allow_unsafe`](Self::allow_unsafe)
    /// was called.
    #[inline(never)]
    #[tracing::instrument(skip(self, values), fields(table = T::meta().table()))]
    pub async fn update(mut self, values: serde_json::Value) -> SmartmixResult<u64> {
        self.ensure_filtered("update")?;
        let mut values = Self::attribute_values(values)?;
        timestamp::stamp_update(T::meta(), &mut values, timestamp::now());
        if values.is_empty() {
            return Ok(0);
        }

        let pairs: Vec<(&str, Value)> = values
            .iter()
            .map(|(column, value)| (column.as_str(), value.clone()))
            .collect();
        let (sql, binds) = self.select.build_update::<DB>(&pairs);
        tracing::debug!(operation = "bulk_update", sql = %sql, "smartmix query");

        let start = Instant::now();
        let result = self.executor.execute(&sql, binds).await?;
        record_query_metrics("bulk_update", T::meta().table(), start.elapsed());
        Ok(DB::rows_affected(&result))
    }

    /// Deletes every matching row; same filter rule as [`update`](Self::update).
    #[tracing::instrument(skip(self), fields(table = T::meta().table()))]
    pub async fn delete(mut self) -> SmartmixResult<u64> {
        self.ensure_filtered("delete")?;
        let (sql, binds) = self.select.build_delete::<DB>();
        tracing::debug!(operation = "bulk_delete", sql = %sql, "smartmix query");

        let start = Instant::now();
        let result = self.executor.execute(&sql, binds).await?;
        record_query_metrics("bulk_delete", T::meta().table(), start.elapsed());
        Ok(DB::rows_affected(&result))
    }

    /// Deletes the rows with the given primary keys.
    #[tracing::instrument(skip(self, ids), fields(table = T::meta().table()))]
    pub async fn destroy<I, V>(mut self, ids: I) -> SmartmixResult<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let meta = T::meta();
        let pk = Self::primary_key()?;
        let (sql, binds) = SelectQuery::new(meta)
            .filter(Source::Root(meta).column(pk).in_list(ids))
            .build_delete::<DB>();
        tracing::debug!(operation = "destroy", sql = %sql, "smartmix query");

        let start = Instant::now();
        let result = self.executor.execute(&sql, binds).await?;
        record_query_metrics("destroy", meta.table(), start.elapsed());
        Ok(DB::rows_affected(&result))
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::inspect::Entity;
    use crate::test_utils::TestDatabase;
    use chrono::{DateTime, Utc};
    use serde::Serialize;
    use serde_json::json;
    use sqlx::Sqlite;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, Serialize, sqlx::FromRow)]
    struct Note {
        id: i64,
        title: String,
        views: i64,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    }

    impl Entity for Note {
        fn meta() -> &'static EntityMeta {
            static META: OnceLock<EntityMeta> = OnceLock::new();
            META.get_or_init(|| {
                EntityMeta::builder("Note", "notes")
                    .columns(&["id", "title", "views", "created_at", "updated_at"])
                    .timestamps()
                    .build()
            })
        }
    }

    impl Model<Sqlite> for Note {}

    async fn notes_db() -> TestDatabase<Sqlite> {
        let db = TestDatabase::new_sqlite().await.unwrap();
        db.run_script(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL, \
             views INTEGER NOT NULL DEFAULT 0, created_at TEXT, updated_at TEXT);
             INSERT INTO notes (title, views) VALUES ('alpha', 3), ('beta', 10), ('gamma', 7)",
        )
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn smart_query_filters_and_sorts() {
        let db = notes_db().await;
        let notes = Note::smart_query(
            db.pool(),
            &Filters::new().with("views__ge", 5),
            &["-views"],
            &LoadSchema::new(),
        )
        .unwrap()
        .all()
        .await
        .unwrap();
        let titles: Vec<&str> = notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["beta", "gamma"]);
    }

    #[tokio::test]
    async fn find_and_find_or_fail() {
        let db = notes_db().await;
        let note = Note::query(db.pool()).find(2).await.unwrap().unwrap();
        assert_eq!(note.title, "beta");

        let err = Note::query(db.pool()).find_or_fail(99).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "Note", ref id } if id == "99"));
    }

    #[tokio::test]
    async fn create_validates_keys_and_stamps() {
        let db = notes_db().await;
        let note = Note::query(db.pool())
            .create(json!({"title": "delta", "views": 1}))
            .await
            .unwrap();
        assert_eq!(note.id, 4);
        assert!(note.created_at.is_some());
        assert_eq!(note.created_at, note.updated_at);

        let err = Note::query(db.pool())
            .create(json!({"title": "x", "colour": "red"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Query(QueryError::UnknownAttribute { ref attribute, .. }) if attribute == "colour"
        ));
    }

    #[tokio::test]
    async fn save_inserts_then_updates() {
        let db = notes_db().await;
        let draft = Note {
            id: 0,
            title: "draft".to_owned(),
            views: 0,
            created_at: None,
            updated_at: None,
        };
        let mut saved = Note::query(db.pool()).save(&draft).await.unwrap();
        assert_eq!(saved.id, 4);

        saved.views = 42;
        let updated = Note::query(db.pool()).save(&saved).await.unwrap();
        assert_eq!(updated.id, 4);
        assert_eq!(updated.views, 42);
        assert_eq!(updated.created_at, saved.created_at);
        assert!(updated.updated_at >= saved.updated_at);
    }

    #[tokio::test]
    async fn bulk_operations_need_filters() {
        let db = notes_db().await;
        let err = Note::query(db.pool())
            .update(json!({"views": 0}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refusing bulk update"));

        let changed = Note::where_(db.pool(), &Filters::new().with("views__lt", 8))
            .unwrap()
            .update(json!({"views": 0}))
            .await
            .unwrap();
        assert_eq!(changed, 2);

        let removed = Note::query(db.pool()).destroy([1, 2]).await.unwrap();
        assert_eq!(removed, 2);
        let left = Note::query(db.pool()).allow_unsafe().delete().await.unwrap();
        assert_eq!(left, 1);
    }

    #[tokio::test]
    async fn runs_inside_a_caller_transaction() {
        let db = notes_db().await;
        let mut tx = db.pool().begin().await.unwrap();
        Note::query_in_tx(&mut *tx)
            .create(json!({"title": "tx"}))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let all = Note::query(db.pool()).all().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn stream_yields_rows_in_order() {
        let db = notes_db().await;
        let titles: Vec<String> = Note::sort(db.pool(), &["title"])
            .unwrap()
            .stream()
            .map(|row| row.unwrap().title)
            .collect()
            .await;
        assert_eq!(titles, vec!["alpha", "beta", "gamma"]);
    }
}
