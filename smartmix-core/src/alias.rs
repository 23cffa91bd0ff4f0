//! Alias planning: one join alias per distinct relation path.
//!
//! Every relation path mentioned by a filter or sort key gets exactly one alias,
//! and every expression that touches that path is built against that same alias
//! (identity, not just name equality), so a query never joins a path twice.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::expr::{Expr, Predicate};
use crate::inspect::{EntityMeta, RelationMeta};
use crate::path::{RELATION_SEPARATOR, RelationPath, strip_desc};

/// A join alias for one relation path.
#[derive(Debug)]
pub struct Alias {
    name: String,
    entity: &'static EntityMeta,
    path: RelationPath,
    relation: &'static RelationMeta,
    parent: Source,
}

/// Shared handle to an alias. Compare with [`Arc::ptr_eq`] for identity.
pub type AliasRef = Arc<Alias>;

impl Alias {
    pub(crate) fn new(
        name: String,
        path: RelationPath,
        relation: &'static RelationMeta,
        parent: Source,
    ) -> Self {
        Self {
            name,
            entity: relation.target(),
            path,
            relation,
            parent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entity(&self) -> &'static EntityMeta {
        self.entity
    }

    pub fn path(&self) -> &RelationPath {
        &self.path
    }

    /// The relationship this alias joins through.
    pub fn relation(&self) -> &'static RelationMeta {
        self.relation
    }

    /// The root or alias this one is joined onto.
    pub fn parent(&self) -> &Source {
        &self.parent
    }
}

impl PartialEq for Alias {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.path == other.path
            && self.entity.table() == other.entity.table()
    }
}

/// What a column expression is qualified by: the root table or a join alias.
#[derive(Debug, Clone)]
pub enum Source {
    Root(&'static EntityMeta),
    Alias(AliasRef),
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Root(a), Self::Root(b)) => a.table() == b.table(),
            (Self::Alias(a), Self::Alias(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl Source {
    pub fn entity(&self) -> &'static EntityMeta {
        match self {
            Self::Root(entity) => entity,
            Self::Alias(alias) => alias.entity,
        }
    }

    /// Name used to qualify columns: the table for the root, otherwise the alias name.
    pub fn qualifier(&self) -> &str {
        match self {
            Self::Root(entity) => entity.table(),
            Self::Alias(alias) => &alias.name,
        }
    }

    pub fn path(&self) -> RelationPath {
        match self {
            Self::Root(_) => RelationPath::root(),
            Self::Alias(alias) => alias.path.clone(),
        }
    }

    /// A column of this source. The name is not checked against the entity.
    pub fn column(&self, name: &str) -> Expr {
        Expr::Column {
            source: self.clone(),
            name: name.to_owned(),
        }
    }

    /// `EXISTS` over `relation` with a condition on the related rows.
    pub fn any<F>(&self, relation: &str, condition: F) -> QueryResult<Predicate>
    where
        F: FnOnce(&Source) -> Predicate,
    {
        let alias = self.correlated(relation)?;
        let predicate = condition(&Source::Alias(alias.clone()));
        Ok(Predicate::Exists {
            alias,
            predicate: Some(Box::new(predicate)),
            negated: false,
        })
    }

    /// `EXISTS` over `relation` with no further condition.
    pub fn has(&self, relation: &str) -> QueryResult<Predicate> {
        Ok(Predicate::Exists {
            alias: self.correlated(relation)?,
            predicate: None,
            negated: false,
        })
    }

    /// An alias for a correlated subquery over `relation`, named after this source.
    pub(crate) fn correlated(&self, relation: &str) -> QueryResult<AliasRef> {
        let entity = self.entity();
        let path = self.path().child(relation);
        let meta = entity.relation(relation).ok_or_else(|| QueryError::Path {
            path: path.to_key(),
            entity: entity.name(),
            relation: relation.to_owned(),
        })?;
        Ok(Arc::new(Alias::new(
            format!("{}__{}", self.qualifier(), relation),
            path,
            meta,
            self.clone(),
        )))
    }
}

/// The aliases planned for one smart-query call, in creation order.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    aliases: Vec<AliasRef>,
    by_path: HashMap<RelationPath, usize>,
}

impl AliasMap {
    pub fn get(&self, path: &RelationPath) -> Option<&AliasRef> {
        self.by_path.get(path).map(|&i| &self.aliases[i])
    }

    /// Aliases in creation order; every parent precedes its children.
    pub fn iter(&self) -> impl Iterator<Item = &AliasRef> {
        self.aliases.iter()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// The source for `path`: the root for the empty path, otherwise its alias.
    pub fn source_for(
        &self,
        root: &'static EntityMeta,
        path: &RelationPath,
    ) -> QueryResult<Source> {
        if path.is_root() {
            return Ok(Source::Root(root));
        }
        self.get(path)
            .map(|alias| Source::Alias(alias.clone()))
            .ok_or_else(|| QueryError::Path {
                path: path.to_key(),
                entity: root.name(),
                relation: path.last().unwrap_or_default().to_owned(),
            })
    }

    fn insert(&mut self, alias: AliasRef) {
        self.by_path.insert(alias.path.clone(), self.aliases.len());
        self.aliases.push(alias);
    }
}

struct Planner {
    counter: usize,
    map: AliasMap,
}

impl Planner {
    fn next_name(&mut self, entity: &EntityMeta) -> String {
        self.counter += 1;
        format!("{}_{}", entity.table(), self.counter)
    }

    /// Depth-first over `paths`, grouped by first segment in first-seen order.
    fn walk(
        &mut self,
        parent: &Source,
        paths: &[(Vec<&str>, &str)],
        depth: usize,
    ) -> QueryResult<()> {
        let mut groups: Vec<(&str, Vec<(Vec<&str>, &str)>)> = Vec::new();
        for (segments, written) in paths {
            let Some(head) = segments.get(depth) else {
                continue;
            };
            match groups.iter_mut().find(|(name, _)| name == head) {
                Some((_, members)) => members.push((segments.clone(), *written)),
                None => groups.push((*head, vec![(segments.clone(), *written)])),
            }
        }

        for (name, members) in groups {
            let entity = parent.entity();
            let relation = entity.relation(name).ok_or_else(|| QueryError::Path {
                path: members[0].1.to_owned(),
                entity: entity.name(),
                relation: name.to_owned(),
            })?;
            let path = parent.path().child(name);
            let alias_name = self.next_name(relation.target());
            let alias = Arc::new(Alias::new(alias_name, path, relation, parent.clone()));
            self.map.insert(alias.clone());
            self.walk(&Source::Alias(alias), &members, depth + 1)?;
        }
        Ok(())
    }
}

/// Plans one alias per distinct relation path among `keys`.
///
/// Keys may be filter keys or sort keys (a leading `-` is ignored). Alias names are
/// `<table>_<n>` with `n` counting up from `offset + 1`, so plans applied one after
/// another to the same query never reuse a name.
pub fn plan_aliases<S: AsRef<str>>(
    root: &'static EntityMeta,
    keys: &[S],
    offset: usize,
) -> QueryResult<AliasMap> {
    let paths: Vec<(Vec<&str>, &str)> = keys
        .iter()
        .filter_map(|key| {
            let key = key.as_ref();
            let (_, stripped) = strip_desc(key);
            let (relations, _) = stripped.rsplit_once(RELATION_SEPARATOR)?;
            Some((relations.split(RELATION_SEPARATOR).collect(), key))
        })
        .collect();

    let mut planner = Planner {
        counter: offset,
        map: AliasMap::default(),
    };
    planner.walk(&Source::Root(root), &paths, 0)?;
    Ok(planner.map)
}
