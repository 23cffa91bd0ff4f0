//! # smartmix
//!
//! Django-style smart queries, nested eager-load schemas and active-record
//! shortcuts for sqlx models.
//!
//! - **Filter keys** walk relationships with `___` and pick an operator with `__`:
//!   `comments___user___name__startswith`.
//! - **Sort keys** use the same paths, `-` for descending.
//! - **Joins are shared**: every key that goes through `comments___user` uses the
//!   same join alias, and joined relationships are loaded from that join.
//! - **Eager-load schemas** nest relationships and pick `joined` or `subquery`
//!   loading per level.
//!
//! ```rust,no_run
//! use serde::Serialize;
//! use smartmix::prelude::*;
//!
//! #[derive(Entity, Serialize, Debug, Clone)]
//! #[smartmix(table = "users", repr(name))]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! #[derive(Entity, Serialize, Debug, Clone)]
//! #[smartmix(table = "posts")]
//! struct Post {
//!     id: i64,
//!     user_id: i64,
//!     rating: i64,
//!     #[smartmix(belongs_to(User))]
//!     user: Option<User>,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = smartmix::sqlx::SqlitePool::connect("sqlite::memory:").await?;
//! let posts = Post::smart_query(
//!     &pool,
//!     &Filters::new().with("rating__gt", 2).with("user___name__like", "%Bi%"),
//!     &["-rating", "user___name"],
//!     &LoadSchema::new().joined("user"),
//! )?
//! .all()
//! .await?;
//! # Ok(())
//! # }
//! ```

pub use smartmix_core::*;
pub use smartmix_macros::Entity;
pub use tracing;

pub mod prelude {
    pub use smartmix_core::prelude::*;

    pub use crate::Entity;
}
