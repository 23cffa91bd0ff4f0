//! A plain, cloneable SELECT description that smart queries are applied to.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::alias::{Alias, AliasRef, Source};
use crate::dialect::SqlDialect;
use crate::eagerload::{LoadDirective, LoadNode, LoadStrategy};
use crate::expr::{OrderExpr, Predicate};
use crate::inspect::EntityMeta;
use crate::path::RelationPath;
use crate::render::SqlWriter;
use crate::smart_query::QueryBackend;
use crate::value::Value;

/// How one relationship is populated after the rows are fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum EagerLoad {
    /// Already joined through `alias` for filtering or sorting.
    FromJoin { path: RelationPath, alias: AliasRef },
    /// Declared by a load schema only.
    Directive(LoadDirective),
}

/// How one SELECT fetches its eager paths: which are read from joined columns
/// and which need statements of their own.
#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    joins: Vec<AliasRef>,
    hydrated: Vec<AliasRef>,
    nodes: Vec<LoadNode>,
}

impl LoadPlan {
    /// Joins added only to fetch related rows.
    pub fn extra_joins(&self) -> &[AliasRef] {
        &self.joins
    }

    /// Aliases whose columns are selected, parents before children.
    pub fn hydrated(&self) -> &[AliasRef] {
        &self.hydrated
    }

    /// One node per top-level eager relationship.
    pub fn nodes(&self) -> &[LoadNode] {
        &self.nodes
    }

    pub fn is_hydrating(&self) -> bool {
        !self.hydrated.is_empty()
    }
}

/// State shared while walking the eager paths of one query.
struct Planner<'q> {
    paths: &'q [(RelationPath, LoadStrategy)],
    from_join: HashMap<&'q RelationPath, &'q AliasRef>,
    // Paging counts joined rows, so only aliases the filters need are hydrated.
    may_join: bool,
    next_alias: usize,
    plan: LoadPlan,
}

impl Planner<'_> {
    /// Nodes for the relationships directly under `parent_path`.
    ///
    /// `parent` is the source the parent rows were selected from, or `None` when
    /// the parent is loaded by a later statement.
    fn children(
        &mut self,
        entity: &'static EntityMeta,
        parent_path: &RelationPath,
        parent: Option<Source>,
    ) -> Vec<LoadNode> {
        let mut names: Vec<&str> = Vec::new();
        for (path, _) in self.paths {
            if path.len() > parent_path.len() && path.starts_with(parent_path) {
                let name = path.segments()[parent_path.len()].as_str();
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let mut nodes = Vec::with_capacity(names.len());
        for name in names {
            let Some(relation) = entity.relation(name) else {
                tracing::warn!(entity = entity.name(), relation = name, "eager path skipped");
                continue;
            };
            let path = parent_path.child(name);
            let strategy = self
                .paths
                .iter()
                .find(|(p, _)| *p == path)
                .map(|(_, strategy)| *strategy)
                .unwrap_or(LoadStrategy::Joined);

            let alias = match &parent {
                Some(parent) => match self.from_join.get(&path) {
                    Some(alias) => Some(Arc::clone(alias)),
                    None if strategy == LoadStrategy::Joined && self.may_join => {
                        self.next_alias += 1;
                        let alias_name = format!("{}_{}", relation.target().table(), self.next_alias);
                        let alias = Arc::new(Alias::new(alias_name, path.clone(), relation, parent.clone()));
                        self.plan.joins.push(Arc::clone(&alias));
                        Some(alias)
                    }
                    None => None,
                },
                None => None,
            };

            let prefix = alias.as_ref().map(|alias| format!("{}__", alias.name()));
            if let Some(alias) = &alias {
                self.plan.hydrated.push(Arc::clone(alias));
            }
            let children = self.children(relation.target(), &path, alias.map(Source::Alias));
            let node = LoadNode::new(name, strategy).with_children(children);
            nodes.push(match prefix {
                Some(prefix) => node.hydrated_from(prefix),
                None => node,
            });
        }
        nodes
    }
}

/// Joins, eager loads, predicates, ordering and paging over one root entity.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    root: &'static EntityMeta,
    joins: Vec<AliasRef>,
    eager: Vec<EagerLoad>,
    predicates: Vec<Predicate>,
    ordering: Vec<OrderExpr>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(root: &'static EntityMeta) -> Self {
        Self {
            root,
            joins: Vec::new(),
            eager: Vec::new(),
            predicates: Vec::new(),
            ordering: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn root(&self) -> &'static EntityMeta {
        self.root
    }

    pub fn joins(&self) -> &[AliasRef] {
        &self.joins
    }

    pub fn eager_loads(&self) -> &[EagerLoad] {
        &self.eager
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn ordering(&self) -> &[OrderExpr] {
        &self.ordering
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn has_filters(&self) -> bool {
        !self.predicates.is_empty()
    }

    /// Every eagerly loaded path with its strategy, parents before children, each
    /// path once (the first declaration wins).
    pub fn eager_paths(&self) -> Vec<(RelationPath, LoadStrategy)> {
        let mut paths: Vec<(RelationPath, LoadStrategy)> = Vec::new();
        let mut push = |path: &RelationPath, strategy: LoadStrategy| {
            if !paths.iter().any(|(p, _)| p == path) {
                paths.push((path.clone(), strategy));
            }
        };
        for load in &self.eager {
            match load {
                EagerLoad::FromJoin { path, .. } => push(path, LoadStrategy::Joined),
                EagerLoad::Directive(directive) => {
                    for (path, strategy) in directive.walk() {
                        push(path, strategy);
                    }
                }
            }
        }
        paths.sort_by_key(|(path, _)| path.len());
        paths
    }

    /// Decides, for every eager path, whether this statement fetches it.
    ///
    /// A path already joined for filtering or sorting is read from that join. A
    /// `joined` path gets a join of its own unless the query is paged. Everything
    /// else, and everything under it, is left to a later statement.
    pub fn load_plan(&self) -> LoadPlan {
        let paths = self.eager_paths();
        let mut from_join = HashMap::new();
        for load in &self.eager {
            if let EagerLoad::FromJoin { path, alias } = load {
                from_join.entry(path).or_insert(alias);
            }
        }
        let mut planner = Planner {
            paths: &paths,
            from_join,
            may_join: self.limit.is_none() && self.offset.is_none(),
            next_alias: self.joins.len(),
            plan: LoadPlan::default(),
        };
        let nodes = planner.children(self.root, &RelationPath::root(), Some(Source::Root(self.root)));
        let mut plan = planner.plan;
        plan.nodes = nodes;
        plan
    }

    fn push_from<DB: SqlDialect>(&self, writer: &mut SqlWriter<DB>) {
        writer.push(" FROM ");
        writer.push_ident(self.root.table());
        for alias in &self.joins {
            writer.outer_join(alias);
        }
    }

    fn push_paging<DB: SqlDialect>(&self, writer: &mut SqlWriter<DB>) {
        let mut tail = String::new();
        if let Some(limit) = self.limit {
            let _ = write!(tail, " LIMIT {}", limit);
        }
        if let Some(offset) = self.offset {
            let _ = write!(tail, " OFFSET {}", offset);
        }
        writer.push(&tail);
    }

    /// `SELECT root.* FROM root [joins] [WHERE] [ORDER BY] [LIMIT] [OFFSET]`.
    pub fn build<DB: SqlDialect>(&self) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::<DB>::new();
        writer.push("SELECT ");
        writer.push_ident(self.root.table());
        writer.push(".*");
        self.push_from(&mut writer);
        writer.where_clause(&self.predicates);
        writer.order_clause(&self.ordering);
        self.push_paging(&mut writer);
        writer.finish()
    }

    pub fn to_sql<DB: SqlDialect>(&self) -> String {
        self.build::<DB>().0
    }

    /// Like [`build`](Self::build), but also selects the columns of every alias
    /// `plan` hydrates, as `alias__column`.
    ///
    /// Hydrating statements end their ORDER BY with the primary keys of the root
    /// and each hydrated alias, so related rows come back in a stable order.
    pub fn build_loading<DB: SqlDialect>(&self, plan: &LoadPlan) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::<DB>::new();
        writer.push("SELECT ");
        writer.push_ident(self.root.table());
        writer.push(".*");
        for alias in plan.hydrated() {
            let prefix = format!("{}__", alias.name());
            for column in alias.entity().columns() {
                writer.push(", ");
                writer.push_column(alias.name(), column);
                writer.push(" AS ");
                writer.push_ident(&format!("{}{}", prefix, column));
            }
        }
        self.push_from(&mut writer);
        for alias in plan.extra_joins() {
            writer.outer_join(alias);
        }
        writer.where_clause(&self.predicates);

        let mut ordering = self.ordering.clone();
        if plan.is_hydrating() {
            let mut sources = vec![Source::Root(self.root)];
            sources.extend(plan.hydrated().iter().cloned().map(Source::Alias));
            for source in sources {
                let Some(pk) = source.entity().primary_keys().first() else {
                    continue;
                };
                let key = source.column(pk);
                if !ordering.iter().any(|order| order.expr == key) {
                    ordering.push(OrderExpr::asc(key));
                }
            }
        }
        writer.order_clause(&ordering);
        self.push_paging(&mut writer);
        writer.finish()
    }

    /// Appends the rows this query matches as a condition on `writer`'s statement.
    ///
    /// Without joins the predicates apply directly; with joins the root primary key
    /// is matched against a subselect, so UPDATE/DELETE never see the joined tables.
    fn push_row_condition<DB: SqlDialect>(&self, writer: &mut SqlWriter<DB>) {
        if self.joins.is_empty() {
            writer.where_clause(&self.predicates);
            return;
        }
        let pk = self.root.primary_keys().first().copied().unwrap_or("id");
        writer.push(" WHERE ");
        writer.push_ident(pk);
        writer.push(" IN (SELECT ");
        writer.push_column(self.root.table(), pk);
        self.push_from(writer);
        writer.where_clause(&self.predicates);
        writer.push(")");
    }

    /// `UPDATE root SET col = ?, ... WHERE <matched rows>`.
    pub fn build_update<DB: SqlDialect>(&self, values: &[(&str, Value)]) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::<DB>::new();
        writer.push("UPDATE ");
        writer.push_ident(self.root.table());
        writer.push(" SET ");
        for (i, (column, value)) in values.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push_ident(column);
            writer.push(" = ");
            writer.push_bind(value.clone());
        }
        self.push_row_condition(&mut writer);
        writer.finish()
    }

    /// `DELETE FROM root WHERE <matched rows>`.
    pub fn build_delete<DB: SqlDialect>(&self) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::<DB>::new();
        writer.push("DELETE FROM ");
        writer.push_ident(self.root.table());
        self.push_row_condition(&mut writer);
        writer.finish()
    }
}

impl QueryBackend for SelectQuery {
    fn root_entity(&self) -> &'static EntityMeta {
        self.root
    }

    fn alias_count(&self) -> usize {
        self.joins.len()
    }

    fn outer_join(mut self, alias: &AliasRef) -> Self {
        self.joins.push(alias.clone());
        self
    }

    fn contains_eager(mut self, path: &RelationPath, alias: &AliasRef) -> Self {
        self.eager.push(EagerLoad::FromJoin {
            path: path.clone(),
            alias: alias.clone(),
        });
        self
    }

    fn eager_load(mut self, directive: &LoadDirective) -> Self {
        self.eager.push(EagerLoad::Directive(directive.clone()));
        self
    }

    fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn order_by(mut self, order: OrderExpr) -> Self {
        self.ordering.push(order);
        self
    }
}
