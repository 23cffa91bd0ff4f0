use serde::Serialize;
use serde_json::json;
use smartmix::prelude::*;
use smartmix::test_utils::{TestDatabase, with_test_transaction};
use smartmix::tracing;
use smartmix::{Expr, Predicate, QueryResult, STATEMENT_TARGET};
use sqlx::Sqlite;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

#[derive(Entity, Serialize, Debug, Clone)]
#[smartmix(table = "users", repr(name))]
struct User {
    id: i64,
    name: String,
    #[smartmix(has_many(Post))]
    posts: Option<Vec<Post>>,
    #[smartmix(has_many(Comment))]
    comments: Option<Vec<Comment>>,
}

fn post_public(source: &Source) -> Expr {
    source.column("archived").negate()
}

fn post_is_public(source: &Source, value: &Value) -> QueryResult<Predicate> {
    Ok(source.column("archived").equals(!value.is_truthy()))
}

fn post_is_commented_by_user(source: &Source, value: &Value) -> QueryResult<Predicate> {
    let user_id = value.clone();
    source.any("comments", |comment| comment.column("user_id").equals(user_id))
}

#[derive(Entity, Serialize, Debug, Clone)]
#[smartmix(table = "posts", repr(body, user), property(public = post_public))]
#[smartmix(method(is_public = post_is_public, is_commented_by_user = post_is_commented_by_user))]
struct Post {
    id: i64,
    body: String,
    user_id: i64,
    archived: bool,
    rating: i64,
    #[smartmix(belongs_to(User))]
    user: Option<User>,
    #[smartmix(has_many(Comment))]
    comments: Option<Vec<Comment>>,
}

#[derive(Entity, Serialize, Debug, Clone)]
#[smartmix(table = "comments")]
struct Comment {
    id: i64,
    body: String,
    user_id: i64,
    post_id: i64,
    rating: i64,
    created_at: String,
    #[smartmix(belongs_to(User))]
    user: Option<User>,
    #[smartmix(belongs_to(Post))]
    post: Option<Post>,
}

const SCHEMA: &str = "
    CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
    CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL,
        user_id INTEGER NOT NULL, archived BOOLEAN NOT NULL DEFAULT 0,
        rating INTEGER NOT NULL DEFAULT 0);
    CREATE TABLE comments (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL,
        user_id INTEGER NOT NULL, post_id INTEGER NOT NULL, rating INTEGER NOT NULL,
        created_at TEXT NOT NULL);
    INSERT INTO users (id, name) VALUES (1, 'Bill'), (2, 'Bob'), (3, 'Bishop'), (4, 'Billy'), (5, 'Alex');
    INSERT INTO posts (id, body, user_id, archived, rating) VALUES
        (11, '1234567890', 1, 0, 1),
        (12, 'post 12', 1, 1, 2),
        (13, 'post 13', 2, 0, 3),
        (14, 'post 14', 2, 1, 4),
        (15, 'post 15', 3, 0, 5);
    INSERT INTO comments (id, body, user_id, post_id, rating, created_at) VALUES
        (100, 'c100', 1, 11, 1, '2014-01-01 10:00:00'),
        (101, 'c101', 2, 11, 2, '2014-05-02 10:00:00'),
        (102, 'c102', 3, 11, 3, '2015-03-01 10:00:00'),
        (103, 'c103', 1, 12, 4, '2015-05-01 10:00:00'),
        (104, 'c104', 2, 13, 5, '2016-01-01 10:00:00'),
        (105, 'c105', 5, 13, 6, '2016-05-01 10:00:00'),
        (106, 'c106', 3, 14, 7, '2017-01-01 10:00:00')
";

async fn seeded() -> TestDatabase<Sqlite> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let db = TestDatabase::new_sqlite().await.unwrap();
    db.run_script(SCHEMA).await.unwrap();
    db
}

fn ids<T>(models: &[T], id: impl Fn(&T) -> i64) -> Vec<i64> {
    models.iter().map(id).collect()
}

/// Counts the statements sent to the database on the current thread.
#[derive(Clone, Default)]
struct StatementCounter(Arc<AtomicUsize>);

impl StatementCounter {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> Layer<S> for StatementCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() == STATEMENT_TARGET {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn filters_on_own_columns() {
    let db = seeded().await;
    let posts = Post::smart_query(
        db.pool(),
        &Filters::new().with("rating__gt", 2),
        &["id"],
        &LoadSchema::new(),
    )
    .unwrap()
    .all()
    .await
    .unwrap();
    assert_eq!(ids(&posts, |p| p.id), vec![13, 14, 15]);
}

#[tokio::test]
async fn filter_and_sort_share_one_join() {
    let db = seeded().await;
    let query = Post::smart_query(
        db.pool(),
        &Filters::new().with("user___name__startswith", "Bi"),
        &["-user___name", "id"],
        &LoadSchema::new(),
    )
    .unwrap();
    assert_eq!(query.to_sql().matches("LEFT OUTER JOIN").count(), 1);

    let posts = query.all().await.unwrap();
    assert_eq!(ids(&posts, |p| p.id), vec![15, 11, 12]);
    // The join used for filtering also loads the relationship.
    assert_eq!(posts[0].user.as_ref().unwrap().name, "Bishop");
}

#[tokio::test]
async fn joined_filters_sort_and_schema_together() {
    let db = seeded().await;
    let comments = Comment::smart_query(
        db.pool(),
        &Filters::new()
            .with("post___rating__ge", 2)
            .with("user___name__like", "%Bi%"),
        &["-post___rating"],
        &LoadSchema::new().joined("post").joined("user"),
    )
    .unwrap()
    .all()
    .await
    .unwrap();

    assert_eq!(ids(&comments, |c| c.id), vec![106, 103]);
    assert_eq!(comments[0].user.as_ref().unwrap().name, "Bishop");
    assert_eq!(comments[0].post.as_ref().unwrap().id, 14);
    assert_eq!(comments[1].user.as_ref().unwrap().name, "Bill");
}

#[tokio::test]
async fn one_to_many_joins_do_not_repeat_rows() {
    let db = seeded().await;
    let counter = StatementCounter::default();
    let _guard = counter.install();

    let posts = Post::smart_query(
        db.pool(),
        &Filters::new().with("comments___rating__lt", 3),
        &["id"],
        &LoadSchema::new(),
    )
    .unwrap()
    .all()
    .await
    .unwrap();
    // Post 11 matches through two of its three comments.
    assert_eq!(ids(&posts, |p| p.id), vec![11]);
    let comments = posts[0].comments.as_ref().unwrap();
    assert_eq!(ids(comments, |c| c.id), vec![100, 101]);
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn filtered_relationship_holds_only_matching_children() {
    let db = seeded().await;
    let counter = StatementCounter::default();
    let _guard = counter.install();

    let posts = Post::smart_query(
        db.pool(),
        &Filters::new().with("comments___rating__lt", 2),
        &["id"],
        &LoadSchema::new(),
    )
    .unwrap()
    .all()
    .await
    .unwrap();
    assert_eq!(ids(&posts, |p| p.id), vec![11]);
    let ratings: Vec<i64> = posts[0]
        .comments
        .as_ref()
        .unwrap()
        .iter()
        .map(|c| c.rating)
        .collect();
    assert_eq!(ratings, vec![1]);
    assert_eq!(counter.count(), 1);
}

#[tokio::test]
async fn joined_loads_share_the_statement() {
    let db = seeded().await;
    let counter = StatementCounter::default();
    let _guard = counter.install();

    let posts = Post::with_joined(db.pool(), &["user", "comments___user"])
        .unwrap()
        .sort(&["id"])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(counter.count(), 1);
    assert_eq!(ids(&posts, |p| p.id), vec![11, 12, 13, 14, 15]);
    assert_eq!(posts[0].user.as_ref().unwrap().name, "Bill");
    let names: Vec<&str> = posts[0]
        .comments
        .as_ref()
        .unwrap()
        .iter()
        .map(|c| c.user.as_ref().unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["Bill", "Bob", "Bishop"]);
    assert_eq!(posts[2].comments.as_ref().map(Vec::len), Some(2));
    // Loaded, and empty.
    assert_eq!(posts[4].comments.as_ref().map(Vec::len), Some(0));

    let posts = Post::with_subquery(db.pool(), &["comments"])
        .unwrap()
        .sort(&["id"])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(counter.count(), 3);
    assert_eq!(posts[0].comments.as_ref().map(Vec::len), Some(3));
}

#[tokio::test]
async fn nested_schema_loads_every_level() {
    let db = seeded().await;
    let schema = LoadSchema::new().load_nested(
        "posts",
        LoadStrategy::Subquery,
        LoadSchema::new().joined("comments"),
    );
    let users = User::with_(db.pool(), &schema)
        .unwrap()
        .sort(&["id"])
        .unwrap()
        .all()
        .await
        .unwrap();

    let bill = &users[0];
    let posts = bill.posts.as_ref().unwrap();
    assert_eq!(ids(posts, |p| p.id), vec![11, 12]);
    let first_comments = posts[0].comments.as_ref().unwrap();
    assert_eq!(first_comments.len(), 3);
    assert_eq!(posts[1].comments.as_ref().unwrap().len(), 1);

    let alex = &users[4];
    assert_eq!(alex.posts.as_ref().map(Vec::len), Some(0));
    // Not requested.
    assert!(bill.comments.is_none());
}

#[tokio::test]
async fn dotted_paths_load_through_intermediate_relations() {
    let db = seeded().await;
    let post = Post::with_joined(db.pool(), &["comments.user"])
        .unwrap()
        .find_or_fail(11)
        .await
        .unwrap();
    let names: Vec<&str> = post
        .comments
        .as_ref()
        .unwrap()
        .iter()
        .map(|c| c.user.as_ref().unwrap().name.as_str())
        .collect();
    assert_eq!(names, vec!["Bill", "Bob", "Bishop"]);
}

#[tokio::test]
async fn json_filters_with_or() {
    let db = seeded().await;
    let filters = Filters::from_json(&json!({
        "$or": [{"rating__lt": 2}, {"user___name": "Bishop"}]
    }))
    .unwrap();
    let posts = Post::smart_query(db.pool(), &filters, &["id"], &LoadSchema::new())
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&posts, |p| p.id), vec![11, 15]);
}

#[tokio::test]
async fn computed_properties_and_methods() {
    let db = seeded().await;
    let public = Post::where_(db.pool(), &Filters::new().with("public", true))
        .unwrap()
        .sort(&["id"])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&public, |p| p.id), vec![11, 13, 15]);

    let archived = Post::where_(db.pool(), &Filters::new().with("is_public", false))
        .unwrap()
        .sort(&["id"])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&archived, |p| p.id), vec![12, 14]);

    let commented = Post::where_(db.pool(), &Filters::new().with("is_commented_by_user", 5))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&commented, |p| p.id), vec![13]);
}

#[tokio::test]
async fn relationship_null_checks_and_exclusion() {
    let db = seeded().await;
    let lonely = Post::where_(db.pool(), &Filters::new().with("comments", Value::Null))
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&lonely, |p| p.id), vec![15]);

    let filters = Filters::new()
        .with("rating__ge", 2)
        .exclude(Filters::new().with("archived", true));
    let posts = Post::smart_query(db.pool(), &filters, &["id"], &LoadSchema::new())
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&posts, |p| p.id), vec![13, 15]);
}

#[tokio::test]
async fn date_part_operators() {
    let db = seeded().await;
    let comments = Comment::smart_query(
        db.pool(),
        &Filters::new().with("created_at__year", 2016),
        &["id"],
        &LoadSchema::new(),
    )
    .unwrap()
    .all()
    .await
    .unwrap();
    assert_eq!(ids(&comments, |c| c.id), vec![104, 105]);

    let may = Comment::where_(db.pool(), &Filters::new().with("created_at__month_ge", 5))
        .unwrap()
        .sort(&["id"])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&may, |c| c.id), vec![101, 103, 105]);
}

#[tokio::test]
async fn bad_keys_fail_before_anything_runs() {
    let db = seeded().await;
    let err = Post::where_(db.pool(), &Filters::new().with("author___name", "Bill")).unwrap_err();
    assert!(matches!(err, QueryError::Path { ref relation, .. } if relation == "author"));

    let err = Post::where_(db.pool(), &Filters::new().with("rating__near", 1)).unwrap_err();
    assert!(matches!(err, QueryError::UnknownOperator { ref operator, .. } if operator == "near"));

    let err = Post::sort(db.pool(), &["-user"]).unwrap_err();
    assert!(matches!(err, QueryError::NotSortable { .. }));

    let err = LoadSchema::from_json(&json!({"user": "lazy"})).unwrap_err();
    assert!(matches!(err, QueryError::BadLoadStrategy { ref strategy, .. } if strategy == "lazy"));
}

#[tokio::test]
async fn chained_calls_get_fresh_aliases() {
    let db = seeded().await;
    let query = Post::where_(db.pool(), &Filters::new().with("user___name", "Bill"))
        .unwrap()
        .sort(&["-user___name"])
        .unwrap();
    let sql = query.to_sql();
    assert!(sql.contains("`users_1`"));
    assert!(sql.contains("`users_2`"));
    let posts = query.all().await.unwrap();
    assert_eq!(posts.len(), 2);
}

#[tokio::test]
async fn active_record_round_trip() {
    let db = seeded().await;
    let zed = User::query(db.pool())
        .create(json!({"name": "Zed"}))
        .await
        .unwrap();
    assert_eq!(zed.id, 6);

    let mut found = User::query(db.pool()).find_or_fail(6).await.unwrap();
    found.name = "Zedd".to_owned();
    let saved = User::query(db.pool()).save(&found).await.unwrap();
    assert_eq!(saved.name, "Zedd");

    let removed = User::query(db.pool()).destroy([6]).await.unwrap();
    assert_eq!(removed, 1);
    let err = User::query(db.pool()).find_or_fail(6).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "User", .. }));
}

#[tokio::test]
async fn bulk_update_through_a_join() {
    let db = seeded().await;
    let changed = Post::where_(db.pool(), &Filters::new().with("user___name", "Bob"))
        .unwrap()
        .update(json!({"rating": 0}))
        .await
        .unwrap();
    assert_eq!(changed, 2);

    let zeroed = Post::where_(db.pool(), &Filters::new().with("rating", 0))
        .unwrap()
        .sort(&["id"])
        .unwrap()
        .all()
        .await
        .unwrap();
    assert_eq!(ids(&zeroed, |p| p.id), vec![13, 14]);
}

#[tokio::test]
async fn repr_and_to_dict() {
    let db = seeded().await;
    let post = Post::with_joined(db.pool(), &["user"])
        .unwrap()
        .find(11)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repr(&post).unwrap(), "<Post #11 body:'1234567890' user:<User #1 'Bill'>>");

    let dict = to_dict(&post, &DictOptions::new().nested().exclude(["rating"])).unwrap();
    assert_eq!(dict["user"]["name"], json!("Bill"));
    assert!(!dict.contains_key("rating"));
    assert!(!dict.contains_key("comments"));
}

#[tokio::test]
async fn works_inside_a_caller_transaction() {
    let db = seeded().await;
    let mut tx = db.pool().begin().await.unwrap();
    let bills = User::query_in_tx(&mut *tx)
        .where_(&Filters::new().with("name__startswith", "Bil"))
        .unwrap()
        .delete()
        .await
        .unwrap();
    assert_eq!(bills, 2);
    tx.rollback().await.unwrap();

    let users = User::query(db.pool()).all().await.unwrap();
    assert_eq!(users.len(), 5);
}

#[tokio::test]
async fn streams_rows_in_sort_order() {
    use futures_util::TryStreamExt;

    let db = seeded().await;
    let names: Vec<String> = User::sort(db.pool(), &["-name"])
        .unwrap()
        .stream()
        .map_ok(|user| user.name)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(names, vec!["Bob", "Bishop", "Billy", "Bill", "Alex"]);
}

#[tokio::test]
async fn test_transactions_roll_back_writes() {
    let db = seeded().await;
    let inside = with_test_transaction(db.pool(), |conn| {
        Box::pin(async move {
            User::query_in_tx(&mut *conn)
                .create(json!({"name": "Temp"}))
                .await?;
            User::query_in_tx(&mut *conn).all().await
        })
    })
    .await
    .unwrap();
    assert_eq!(inside.len(), 6);

    let after = User::query(db.pool()).all().await.unwrap();
    assert_eq!(after.len(), 5);
}
