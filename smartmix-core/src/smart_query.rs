//! The smart-query orchestrator.
//!
//! [`smart_query`] plans aliases for every relation path used by filters and sort
//! keys, joins them, compiles predicates and ordering against those aliases, and
//! adds loader directives for whatever part of the eager-load schema the joins did
//! not already cover. Everything is compiled into a [`SmartQueryPlan`] first, so a
//! failing key never leaves a half-augmented query behind.

use std::collections::HashSet;

use crate::alias::{AliasMap, AliasRef, plan_aliases};
use crate::eagerload::{LoadDirective, LoadSchema};
use crate::error::QueryResult;
use crate::expr::{OrderExpr, Predicate};
use crate::filter::{Filters, compile_filters};
use crate::inspect::EntityMeta;
use crate::order::compile_order;
use crate::path::RelationPath;

/// What the orchestrator needs from a query object.
///
/// Every builder method consumes the query and returns the augmented one.
pub trait QueryBackend: Sized {
    /// The entity the query selects.
    fn root_entity(&self) -> &'static EntityMeta;

    /// Number of aliases already on the query; new alias names start after it.
    fn alias_count(&self) -> usize {
        0
    }

    /// `LEFT OUTER JOIN` through `alias` (its parent is already joined or the root).
    fn outer_join(self, alias: &AliasRef) -> Self;

    /// Populate the relationship at `path` from the rows joined through `alias`.
    fn contains_eager(self, path: &RelationPath, alias: &AliasRef) -> Self;

    /// Load the relationship with the directive's own strategy.
    fn eager_load(self, directive: &LoadDirective) -> Self;

    fn filter(self, predicate: Predicate) -> Self;

    fn order_by(self, order: OrderExpr) -> Self;
}

/// A fully compiled smart query, ready to be applied to a query.
#[derive(Debug, Clone)]
pub struct SmartQueryPlan {
    root: &'static EntityMeta,
    aliases: AliasMap,
    eager_from_joins: Vec<AliasRef>,
    predicates: Vec<Predicate>,
    ordering: Vec<OrderExpr>,
    directives: Vec<LoadDirective>,
}

impl SmartQueryPlan {
    /// Compiles a plan. Alias names are numbered from `alias_offset + 1`.
    pub fn build<S: AsRef<str>>(
        root: &'static EntityMeta,
        filters: &Filters,
        sort_keys: &[S],
        schema: &LoadSchema,
        alias_offset: usize,
    ) -> QueryResult<Self> {
        let flat_schema = schema.flatten(root)?;

        let mut keys: Vec<&str> = filters.keys();
        keys.extend(sort_keys.iter().map(|key| key.as_ref()));
        let aliases = plan_aliases(root, &keys, alias_offset)?;

        // Subquery-loaded paths are still joined for filtering, but not populated
        // from the join.
        let mut loaded = HashSet::new();
        let mut eager_from_joins = Vec::new();
        for alias in aliases.iter() {
            if !flat_schema.is_subquery_loaded(alias.path()) {
                loaded.insert(alias.path().clone());
                eager_from_joins.push(alias.clone());
            }
        }

        let predicates = compile_filters(root, &aliases, filters)?;
        let ordering = sort_keys
            .iter()
            .map(|key| compile_order(root, &aliases, key.as_ref()))
            .collect::<QueryResult<Vec<_>>>()?;
        let directives = flat_schema
            .retain(|path| !loaded.contains(path))
            .to_directives();

        tracing::debug!(
            entity = root.name(),
            aliases = aliases.len(),
            eager_from_joins = eager_from_joins.len(),
            predicates = predicates.len(),
            ordering = ordering.len(),
            directives = directives.len(),
            "smart query planned"
        );

        Ok(Self {
            root,
            aliases,
            eager_from_joins,
            predicates,
            ordering,
            directives,
        })
    }

    pub fn root(&self) -> &'static EntityMeta {
        self.root
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn ordering(&self) -> &[OrderExpr] {
        &self.ordering
    }

    pub fn directives(&self) -> &[LoadDirective] {
        &self.directives
    }

    /// Attaches joins, eager loads, predicates and ordering. Cannot fail.
    pub fn apply<Q: QueryBackend>(self, query: Q) -> Q {
        let mut query = query;
        for alias in self.aliases.iter() {
            query = query.outer_join(alias);
        }
        for alias in &self.eager_from_joins {
            query = query.contains_eager(alias.path(), alias);
        }
        for predicate in self.predicates {
            query = query.filter(predicate);
        }
        for order in self.ordering {
            query = query.order_by(order);
        }
        for directive in &self.directives {
            query = query.eager_load(directive);
        }
        query
    }
}

/// Augments `query` with filters, ordering and eager loads.
///
/// On error the query is dropped and nothing is returned half-built.
pub fn smart_query<Q, S>(
    query: Q,
    filters: &Filters,
    sort_keys: &[S],
    schema: &LoadSchema,
) -> QueryResult<Q>
where
    Q: QueryBackend,
    S: AsRef<str>,
{
    let plan = SmartQueryPlan::build(
        query.root_entity(),
        filters,
        sort_keys,
        schema,
        query.alias_count(),
    )?;
    Ok(plan.apply(query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eagerload::LoadStrategy;
    use crate::error::QueryError;
    use crate::fixtures::Post;
    use crate::inspect::Entity;

    /// Records every call as text.
    #[derive(Debug, Clone, Default, PartialEq)]
    struct Recorder {
        calls: Vec<String>,
        aliases: usize,
    }

    impl Recorder {
        fn count(&self, prefix: &str) -> usize {
            self.calls.iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    impl QueryBackend for Recorder {
        fn root_entity(&self) -> &'static EntityMeta {
            Post::meta()
        }

        fn alias_count(&self) -> usize {
            self.aliases
        }

        fn outer_join(mut self, alias: &AliasRef) -> Self {
            self.aliases += 1;
            self.calls.push(format!("join {} as {}", alias.path(), alias.name()));
            self
        }

        fn contains_eager(mut self, path: &RelationPath, alias: &AliasRef) -> Self {
            self.calls.push(format!("contains_eager {} from {}", path, alias.name()));
            self
        }

        fn eager_load(mut self, directive: &LoadDirective) -> Self {
            self.calls.push(format!("load {} {}", directive.path(), directive.strategy()));
            self
        }

        fn filter(mut self, predicate: Predicate) -> Self {
            self.calls.push(format!("filter {:?}", std::mem::discriminant(&predicate)));
            self
        }

        fn order_by(mut self, order: OrderExpr) -> Self {
            self.calls.push(format!("order {:?}", order.direction));
            self
        }
    }

    #[test]
    fn scenario_d_joined_path_serves_filter_and_schema() {
        let filters = Filters::new().with("comments___user___name", "Bob");
        let schema = LoadSchema::new().nested("comments", LoadSchema::new().joined("user"));
        let query = smart_query(Recorder::default(), &filters, &[] as &[&str], &schema).unwrap();

        assert_eq!(query.count("join comments.user "), 1);
        assert_eq!(query.count("join comments "), 1);
        assert_eq!(query.count("contains_eager"), 2);
        assert_eq!(query.count("load"), 0);
    }

    #[test]
    fn subquery_schema_overrides_eager_join() {
        let filters = Filters::new().with("comments___user___name", "Bob");
        let schema = LoadSchema::new().subquery("comments");
        let query = smart_query(Recorder::default(), &filters, &[] as &[&str], &schema).unwrap();

        assert_eq!(query.count("join"), 2);
        assert_eq!(query.count("contains_eager"), 0);
        assert_eq!(query.calls.last().unwrap(), "load comments subquery");
    }

    #[test]
    fn schema_only_paths_become_directives() {
        let schema = LoadSchema::new()
            .joined("user")
            .load_nested("comments", LoadStrategy::Subquery, LoadSchema::new().joined("user"));
        let query = smart_query(Recorder::default(), &Filters::new(), &["-rating"], &schema).unwrap();
        assert_eq!(
            query.calls,
            vec!["order Desc", "load user joined", "load comments subquery"]
        );
    }

    #[test]
    fn sort_only_paths_are_joined_once() {
        let query = smart_query(
            Recorder::default(),
            &Filters::new().with("user___name__like", "B%"),
            &["-user___name", "rating"],
            &LoadSchema::new(),
        )
        .unwrap();
        assert_eq!(query.count("join user "), 1);
        assert_eq!(query.count("order"), 2);
    }

    #[test]
    fn failures_are_atomic() {
        let err = SmartQueryPlan::build(
            Post::meta(),
            &Filters::new().with("rating__frobnicate", 1),
            &["rating"],
            &LoadSchema::new(),
            0,
        )
        .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownOperator {
                key: "rating__frobnicate".to_owned(),
                operator: "frobnicate".to_owned(),
            }
        );

        let err = SmartQueryPlan::build(
            Post::meta(),
            &Filters::new().with("ghost___name", "x"),
            &[] as &[&str],
            &LoadSchema::new(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Path { ref relation, .. } if relation == "ghost"));
    }

    #[test]
    fn building_twice_is_structurally_equal() {
        let filters = Filters::new()
            .with("comments___user___name__startswith", "B")
            .with("rating__ge", 2);
        let keys = ["-comments___rating", "id"];
        let first = SmartQueryPlan::build(Post::meta(), &filters, &keys, &LoadSchema::new(), 0).unwrap();
        let second = SmartQueryPlan::build(Post::meta(), &filters, &keys, &LoadSchema::new(), 0).unwrap();

        assert_eq!(first.predicates(), second.predicates());
        assert_eq!(first.ordering(), second.ordering());
        let first_aliases: Vec<_> = first.aliases().iter().collect();
        let second_aliases: Vec<_> = second.aliases().iter().collect();
        assert_eq!(first_aliases, second_aliases);
        assert!(!std::sync::Arc::ptr_eq(first_aliases[0], second_aliases[0]));
    }

    #[test]
    fn chained_calls_never_reuse_alias_names() {
        let query = smart_query(
            Recorder::default(),
            &Filters::new().with("user___name", "Bob"),
            &[] as &[&str],
            &LoadSchema::new(),
        )
        .unwrap();
        let query = smart_query(query, &Filters::new(), &["comments___user___name"], &LoadSchema::new())
            .unwrap();
        let joins: Vec<&String> = query.calls.iter().filter(|c| c.starts_with("join")).collect();
        assert_eq!(
            joins,
            vec![
                "join user as users_1",
                "join comments as comments_2",
                "join comments.user as users_3",
            ]
        );
    }
}
