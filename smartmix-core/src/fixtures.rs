//! Hand-written entity metadata shared by the unit tests.

use std::sync::OnceLock;

use crate::alias::Source;
use crate::error::QueryResult;
use crate::expr::{Expr, Predicate};
use crate::inspect::{Entity, EntityMeta};
use crate::value::Value;

pub struct User;
pub struct Post;
pub struct Comment;

impl Entity for User {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("User", "users")
                .columns(&["id", "name"])
                .relation("posts", Post::meta, "id", "user_id")
                .relation("comments", Comment::meta, "id", "user_id")
                .repr(&["name"])
                .build()
        })
    }
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

impl Entity for Post {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Post", "posts")
                .columns(&["id", "body", "user_id", "archived", "rating"])
                .relation("user", User::meta, "user_id", "id")
                .relation("comments", Comment::meta, "id", "post_id")
                .property("public", post_public)
                .method("is_commented_by_user", post_is_commented_by_user)
                .method("is_public", post_is_public)
                .repr(&["body", "user"])
                .build()
        })
    }
}

impl Entity for Comment {
    fn meta() -> &'static EntityMeta {
        static META: OnceLock<EntityMeta> = OnceLock::new();
        META.get_or_init(|| {
            EntityMeta::builder("Comment", "comments")
                .columns(&["id", "body", "user_id", "post_id", "rating", "created_at"])
                .relation("user", User::meta, "user_id", "id")
                .relation("post", Post::meta, "post_id", "id")
                .build()
        })
    }
}
