//! Eager-load schemas: nested relation → strategy declarations.
//!
//! ```ignore
//! let schema = LoadSchema::new()
//!     .load("user", LoadStrategy::Joined)
//!     .load_nested(
//!         "comments",
//!         LoadStrategy::Subquery,
//!         LoadSchema::new().load("user", LoadStrategy::Joined),
//!     );
//! ```

use crate::error::{QueryError, QueryResult};
use crate::inspect::EntityMeta;
use crate::path::RelationPath;

/// Textual name of [`LoadStrategy::Joined`].
pub const JOINED: &str = "joined";
/// Textual name of [`LoadStrategy::Subquery`].
pub const SUBQUERY: &str = "subquery";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStrategy {
    /// Join-fetch: related rows come from a join in the same statement.
    Joined,
    /// Separate-query-fetch: related rows come from an additional statement.
    Subquery,
}

impl LoadStrategy {
    /// Parses a strategy name; `path` is only used in the error.
    pub fn parse(name: &str, path: &str) -> QueryResult<Self> {
        match name {
            JOINED | "join" => Ok(Self::Joined),
            SUBQUERY => Ok(Self::Subquery),
            other => Err(QueryError::BadLoadStrategy {
                path: path.to_owned(),
                strategy: other.to_owned(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Joined => JOINED,
            Self::Subquery => SUBQUERY,
        }
    }
}

impl std::fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value declared for one relation in a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaEntry {
    Load(LoadStrategy),
    /// Nested schema; the relation itself is join-fetched.
    Nested(LoadSchema),
    LoadNested(LoadStrategy, LoadSchema),
}

impl SchemaEntry {
    pub fn strategy(&self) -> LoadStrategy {
        match self {
            Self::Load(strategy) | Self::LoadNested(strategy, _) => *strategy,
            Self::Nested(_) => LoadStrategy::Joined,
        }
    }

    pub fn children(&self) -> Option<&LoadSchema> {
        match self {
            Self::Load(_) => None,
            Self::Nested(schema) | Self::LoadNested(_, schema) => Some(schema),
        }
    }
}

/// A nested eager-load schema, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSchema {
    entries: Vec<(String, SchemaEntry)>,
}

impl LoadSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &SchemaEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn entry(mut self, relation: impl Into<String>, entry: SchemaEntry) -> Self {
        self.entries.push((relation.into(), entry));
        self
    }

    pub fn load(self, relation: impl Into<String>, strategy: LoadStrategy) -> Self {
        self.entry(relation, SchemaEntry::Load(strategy))
    }

    pub fn joined(self, relation: impl Into<String>) -> Self {
        self.load(relation, LoadStrategy::Joined)
    }

    pub fn subquery(self, relation: impl Into<String>) -> Self {
        self.load(relation, LoadStrategy::Subquery)
    }

    pub fn nested(self, relation: impl Into<String>, schema: LoadSchema) -> Self {
        self.entry(relation, SchemaEntry::Nested(schema))
    }

    pub fn load_nested(
        self,
        relation: impl Into<String>,
        strategy: LoadStrategy,
        schema: LoadSchema,
    ) -> Self {
        self.entry(relation, SchemaEntry::LoadNested(strategy, schema))
    }

    /// Declares every path with `strategy`. Hops may be written `comments.user` or
    /// `comments___user`; either gives nested entries.
    pub fn from_paths<S: AsRef<str>>(paths: &[S], strategy: LoadStrategy) -> Self {
        let mut flat = FlatSchema::default();
        for path in paths {
            let path = RelationPath::parse(path.as_ref());
            for prefix in path.prefixes() {
                if flat.get(&prefix).is_none() || prefix == path {
                    flat.insert(prefix, strategy);
                }
            }
        }
        flat.to_nested()
    }

    /// Parses a JSON schema.
    ///
    /// A value is a strategy name, an object (nested, join-fetched) or a
    /// `[strategy, object]` pair. Anything else, `null` included, is a bad strategy.
    pub fn from_json(value: &serde_json::Value) -> QueryResult<Self> {
        Self::from_json_at(value, &RelationPath::root())
    }

    fn from_json_at(value: &serde_json::Value, at: &RelationPath) -> QueryResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(QueryError::BadLoadStrategy {
                path: at.to_string(),
                strategy: value.to_string(),
            });
        };
        let mut schema = LoadSchema::new();
        for (relation, value) in map {
            let path = at.child(relation);
            let entry = match value {
                serde_json::Value::String(name) => {
                    SchemaEntry::Load(LoadStrategy::parse(name, &path.to_string())?)
                }
                serde_json::Value::Object(_) => SchemaEntry::Nested(Self::from_json_at(value, &path)?),
                serde_json::Value::Array(pair) => match pair.as_slice() {
                    [serde_json::Value::String(name), nested @ serde_json::Value::Object(_)] => {
                        SchemaEntry::LoadNested(
                            LoadStrategy::parse(name, &path.to_string())?,
                            Self::from_json_at(nested, &path)?,
                        )
                    }
                    _ => {
                        return Err(QueryError::BadLoadStrategy {
                            path: path.to_string(),
                            strategy: value.to_string(),
                        });
                    }
                },
                other => {
                    return Err(QueryError::BadLoadStrategy {
                        path: path.to_string(),
                        strategy: other.to_string(),
                    });
                }
            };
            schema.entries.push((relation.clone(), entry));
        }
        Ok(schema)
    }

    /// Flattens to dotted path → strategy, validating every hop against `root`.
    ///
    /// A path declared twice keeps the last declaration.
    pub fn flatten(&self, root: &'static EntityMeta) -> QueryResult<FlatSchema> {
        let mut flat = FlatSchema::default();
        self.flatten_into(root, &RelationPath::root(), &mut flat)?;
        Ok(flat)
    }

    fn flatten_into(
        &self,
        entity: &'static EntityMeta,
        at: &RelationPath,
        flat: &mut FlatSchema,
    ) -> QueryResult<()> {
        for (relation, entry) in &self.entries {
            let path = at.child(relation);
            let meta = entity.relation(relation).ok_or_else(|| QueryError::Path {
                path: path.to_string(),
                entity: entity.name(),
                relation: relation.clone(),
            })?;
            flat.insert(path.clone(), entry.strategy());
            if let Some(children) = entry.children() {
                children.flatten_into(meta.target(), &path, flat)?;
            }
        }
        Ok(())
    }

    /// Nested loader directives, validated against `root`.
    pub fn directives(&self, root: &'static EntityMeta) -> QueryResult<Vec<LoadDirective>> {
        Ok(self.flatten(root)?.to_directives())
    }
}

/// A flattened schema: relation path → strategy, in first-declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatSchema {
    entries: Vec<(RelationPath, LoadStrategy)>,
}

impl FlatSchema {
    pub fn get(&self, path: &RelationPath) -> Option<LoadStrategy> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == path)
            .map(|(_, strategy)| *strategy)
    }

    /// Records `path`; a repeated path is overwritten in place.
    pub fn insert(&mut self, path: RelationPath, strategy: LoadStrategy) {
        match self.entries.iter_mut().find(|(candidate, _)| *candidate == path) {
            Some(entry) => entry.1 = strategy,
            None => self.entries.push((path, strategy)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RelationPath, LoadStrategy)> {
        self.entries.iter().map(|(path, strategy)| (path, *strategy))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `path` or one of its ancestors is separate-query-fetched.
    pub fn is_subquery_loaded(&self, path: &RelationPath) -> bool {
        path.prefixes()
            .any(|prefix| self.get(&prefix) == Some(LoadStrategy::Subquery))
    }

    /// Regroups entries by shared prefixes.
    ///
    /// Intermediate paths that were never declared are join-fetched, like a bare
    /// nested schema.
    pub fn to_nested(&self) -> LoadSchema {
        let mut schema = LoadSchema::new();
        for (path, strategy) in &self.entries {
            insert_nested(&mut schema, path.segments(), *strategy);
        }
        schema
    }

    /// Entries for which `keep` holds, order preserved.
    pub fn retain(&self, keep: impl Fn(&RelationPath) -> bool) -> FlatSchema {
        FlatSchema {
            entries: self
                .entries
                .iter()
                .filter(|(path, _)| keep(path))
                .cloned()
                .collect(),
        }
    }

    /// Directive trees: each entry nests under its nearest declared ancestor.
    pub fn to_directives(&self) -> Vec<LoadDirective> {
        let parents: Vec<Option<&RelationPath>> = self
            .entries
            .iter()
            .map(|(path, _)| self.nearest_declared_ancestor(path))
            .collect();
        self.directives_under(&parents, None)
    }

    fn nearest_declared_ancestor(&self, path: &RelationPath) -> Option<&RelationPath> {
        let mut current = path.parent();
        while let Some(candidate) = current {
            if candidate.is_root() {
                return None;
            }
            if let Some((declared, _)) = self.entries.iter().find(|(p, _)| *p == candidate) {
                return Some(declared);
            }
            current = candidate.parent();
        }
        None
    }

    fn directives_under(
        &self,
        parents: &[Option<&RelationPath>],
        parent: Option<&RelationPath>,
    ) -> Vec<LoadDirective> {
        self.entries
            .iter()
            .zip(parents)
            .filter(|(_, p)| **p == parent)
            .map(|((path, strategy), _)| LoadDirective {
                path: path.clone(),
                strategy: *strategy,
                nested: self.directives_under(parents, Some(path)),
            })
            .collect()
    }
}

fn insert_nested(schema: &mut LoadSchema, segments: &[String], strategy: LoadStrategy) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let position = schema.entries.iter().position(|(name, _)| name == head);
    let index = match position {
        Some(index) => index,
        None => {
            let entry = if rest.is_empty() {
                SchemaEntry::Load(strategy)
            } else {
                SchemaEntry::Nested(LoadSchema::new())
            };
            schema.entries.push((head.clone(), entry));
            schema.entries.len() - 1
        }
    };

    let entry = &mut schema.entries[index].1;
    if rest.is_empty() {
        *entry = match std::mem::replace(entry, SchemaEntry::Load(strategy)) {
            SchemaEntry::Load(_) => SchemaEntry::Load(strategy),
            SchemaEntry::Nested(children) | SchemaEntry::LoadNested(_, children) => {
                SchemaEntry::LoadNested(strategy, children)
            }
        };
        return;
    }

    let (own, mut children) =
        match std::mem::replace(entry, SchemaEntry::Load(LoadStrategy::Joined)) {
            SchemaEntry::Load(own) => (own, LoadSchema::new()),
            SchemaEntry::Nested(children) => (LoadStrategy::Joined, children),
            SchemaEntry::LoadNested(own, children) => (own, children),
        };
    insert_nested(&mut children, rest, strategy);
    *entry = SchemaEntry::LoadNested(own, children);
}

/// A loader directive: load `path` with `strategy`, then apply `nested` within it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadDirective {
    path: RelationPath,
    strategy: LoadStrategy,
    nested: Vec<LoadDirective>,
}

impl LoadDirective {
    pub fn new(path: RelationPath, strategy: LoadStrategy) -> Self {
        Self {
            path,
            strategy,
            nested: Vec::new(),
        }
    }

    pub fn with_nested(mut self, nested: Vec<LoadDirective>) -> Self {
        self.nested = nested;
        self
    }

    pub fn path(&self) -> &RelationPath {
        &self.path
    }

    pub fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    pub fn nested(&self) -> &[LoadDirective] {
        &self.nested
    }

    /// This directive and all nested ones, parents first.
    pub fn walk(&self) -> Vec<(&RelationPath, LoadStrategy)> {
        let mut out = vec![(&self.path, self.strategy)];
        for child in &self.nested {
            out.extend(child.walk());
        }
        out
    }
}

/// One relationship to populate after a statement has run.
///
/// A node with a prefix was fetched by the statement itself: its columns are in
/// the result rows as `<prefix><column>`. A node without one needs a query of
/// its own.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadNode {
    relation: String,
    strategy: LoadStrategy,
    prefix: Option<String>,
    children: Vec<LoadNode>,
}

impl LoadNode {
    pub fn new(relation: impl Into<String>, strategy: LoadStrategy) -> Self {
        Self {
            relation: relation.into(),
            strategy,
            prefix: None,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<LoadNode>) -> Self {
        self.children = children;
        self
    }

    pub(crate) fn hydrated_from(mut self, prefix: String) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn is_hydrated(&self) -> bool {
        self.prefix.is_some()
    }

    pub fn children(&self) -> &[LoadNode] {
        &self.children
    }

    /// The directive that loads this subtree again under `parent`, with every
    /// prefix dropped.
    pub fn to_directive(&self, parent: &RelationPath) -> LoadDirective {
        let path = parent.child(&self.relation);
        let nested = self
            .children
            .iter()
            .map(|child| child.to_directive(&path))
            .collect();
        LoadDirective::new(path, self.strategy).with_nested(nested)
    }
}
