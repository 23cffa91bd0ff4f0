//! Entity metadata: what a model exposes to filters, sorts and eager loads.
//!
//! Every entity is described once by an [`EntityMeta`], usually generated by
//! `#[derive(Entity)]`. Attribute names are resolved through a single lookup table
//! built when the meta is created, with a fixed precedence:
//! column, then relationship, then computed property, then computed method.

use std::collections::HashMap;

use crate::alias::Source;
use crate::error::QueryResult;
use crate::expr::{Expr, Predicate};
use crate::value::Value;

/// Builds the SQL expression of a computed property for the given source.
pub type PropertyFn = fn(&Source) -> Expr;

/// Builds the predicate of a computed method from its argument.
pub type MethodFn = fn(&Source, &Value) -> QueryResult<Predicate>;

/// Implemented by every model that takes part in smart queries.
pub trait Entity {
    /// Returns the metadata for this entity. Must always return the same instance.
    fn meta() -> &'static EntityMeta;
}

/// A declared relationship from one entity to another.
///
/// The join condition is `target.remote_key = source.local_key`; that covers both
/// many-to-one (`post.user_id -> user.id`) and one-to-many (`user.id -> post.user_id`).
#[derive(Clone, Copy)]
pub struct RelationMeta {
    name: &'static str,
    target: fn() -> &'static EntityMeta,
    local_key: &'static str,
    remote_key: &'static str,
}

impl RelationMeta {
    pub const fn new(
        name: &'static str,
        target: fn() -> &'static EntityMeta,
        local_key: &'static str,
        remote_key: &'static str,
    ) -> Self {
        Self {
            name,
            target,
            local_key,
            remote_key,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The entity on the other side of the relationship.
    pub fn target(&self) -> &'static EntityMeta {
        (self.target)()
    }

    pub fn local_key(&self) -> &'static str {
        self.local_key
    }

    pub fn remote_key(&self) -> &'static str {
        self.remote_key
    }
}

impl std::fmt::Debug for RelationMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationMeta")
            .field("name", &self.name)
            .field("local_key", &self.local_key)
            .field("remote_key", &self.remote_key)
            .finish()
    }
}

/// A derived, read-only expression usable like a column.
#[derive(Debug, Clone, Copy)]
pub struct ComputedProperty {
    name: &'static str,
    expr: PropertyFn,
}

impl ComputedProperty {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Builds the property's expression qualified by `source`.
    pub fn expr(&self, source: &Source) -> Expr {
        (self.expr)(source)
    }
}

/// A parametrized predicate: filtering by it calls the method with the filter value.
#[derive(Debug, Clone, Copy)]
pub struct ComputedMethod {
    name: &'static str,
    predicate: MethodFn,
}

impl ComputedMethod {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn predicate(&self, source: &Source, value: &Value) -> QueryResult<Predicate> {
        (self.predicate)(source, value)
    }
}

/// A resolved attribute of an entity.
#[derive(Debug, Clone, Copy)]
pub enum Attribute<'m> {
    Column(&'static str),
    Relation(&'m RelationMeta),
    Property(&'m ComputedProperty),
    Method(&'m ComputedMethod),
}

impl Attribute<'_> {
    /// Columns and computed properties can be sorted by; methods and relationships cannot.
    pub fn is_sortable(&self) -> bool {
        matches!(self, Self::Column(_) | Self::Property(_))
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Column(usize),
    Relation(usize),
    Property(usize),
    Method(usize),
}

/// Reflection data for one entity.
pub struct EntityMeta {
    name: &'static str,
    table: &'static str,
    primary_keys: Vec<&'static str>,
    columns: Vec<&'static str>,
    relations: Vec<RelationMeta>,
    properties: Vec<ComputedProperty>,
    methods: Vec<ComputedMethod>,
    repr_attrs: Vec<&'static str>,
    repr_max_length: usize,
    timestamps: bool,
    index: HashMap<&'static str, Slot>,
}

impl EntityMeta {
    pub fn builder(name: &'static str, table: &'static str) -> EntityMetaBuilder {
        EntityMetaBuilder {
            meta: EntityMeta {
                name,
                table,
                primary_keys: Vec::new(),
                columns: Vec::new(),
                relations: Vec::new(),
                properties: Vec::new(),
                methods: Vec::new(),
                repr_attrs: Vec::new(),
                repr_max_length: 15,
                timestamps: false,
                index: HashMap::new(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn primary_keys(&self) -> &[&'static str] {
        &self.primary_keys
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn relations(&self) -> &[RelationMeta] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationMeta> {
        match self.index.get(name) {
            Some(Slot::Relation(i)) => self.relations.get(*i),
            _ => self.relations.iter().find(|r| r.name == name),
        }
    }

    pub fn computed_properties(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.properties.iter().map(|p| p.name)
    }

    pub fn computed_methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.iter().map(|m| m.name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        matches!(self.index.get(name), Some(Slot::Column(_)))
    }

    /// Resolves `name` with the fixed precedence (column > relation > property > method).
    pub fn attribute(&self, name: &str) -> Option<Attribute<'_>> {
        match *self.index.get(name)? {
            Slot::Column(i) => Some(Attribute::Column(self.columns[i])),
            Slot::Relation(i) => Some(Attribute::Relation(&self.relations[i])),
            Slot::Property(i) => Some(Attribute::Property(&self.properties[i])),
            Slot::Method(i) => Some(Attribute::Method(&self.methods[i])),
        }
    }

    /// True when `name` resolves to a computed method (those never take an operator).
    pub fn is_computed_method(&self, name: &str) -> bool {
        matches!(self.index.get(name), Some(Slot::Method(_)))
    }

    pub fn filterable_attributes(&self) -> Vec<&'static str> {
        self.relations
            .iter()
            .map(|r| r.name)
            .chain(self.columns.iter().copied())
            .chain(self.computed_properties())
            .chain(self.computed_methods())
            .collect()
    }

    pub fn sortable_attributes(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .copied()
            .chain(self.computed_properties())
            .collect()
    }

    /// Attributes accepted by `create` / `update` attribute maps.
    pub fn settable_attributes(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn repr_attrs(&self) -> &[&'static str] {
        &self.repr_attrs
    }

    pub fn repr_max_length(&self) -> usize {
        self.repr_max_length
    }

    /// Whether `created_at` / `updated_at` are maintained on write.
    pub fn has_timestamps(&self) -> bool {
        self.timestamps
    }
}

impl std::fmt::Debug for EntityMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMeta")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field(
                "relations",
                &self.relations.iter().map(|r| r.name).collect::<Vec<_>>(),
            )
            .field(
                "properties",
                &self.computed_properties().collect::<Vec<_>>(),
            )
            .field("methods", &self.computed_methods().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder returned by [`EntityMeta::builder`].
pub struct EntityMetaBuilder {
    meta: EntityMeta,
}

impl EntityMetaBuilder {
    pub fn primary_key(mut self, column: &'static str) -> Self {
        self.meta.primary_keys.push(column);
        self
    }

    pub fn column(mut self, name: &'static str) -> Self {
        self.meta.columns.push(name);
        self
    }

    pub fn columns(mut self, names: &[&'static str]) -> Self {
        self.meta.columns.extend_from_slice(names);
        self
    }

    pub fn relation(
        mut self,
        name: &'static str,
        target: fn() -> &'static EntityMeta,
        local_key: &'static str,
        remote_key: &'static str,
    ) -> Self {
        self.meta
            .relations
            .push(RelationMeta::new(name, target, local_key, remote_key));
        self
    }

    pub fn property(mut self, name: &'static str, expr: PropertyFn) -> Self {
        self.meta.properties.push(ComputedProperty { name, expr });
        self
    }

    pub fn method(mut self, name: &'static str, predicate: MethodFn) -> Self {
        self.meta.methods.push(ComputedMethod { name, predicate });
        self
    }

    pub fn repr(mut self, attrs: &[&'static str]) -> Self {
        self.meta.repr_attrs.extend_from_slice(attrs);
        self
    }

    pub fn repr_max_length(mut self, length: usize) -> Self {
        self.meta.repr_max_length = length;
        self
    }

    pub fn timestamps(mut self) -> Self {
        self.meta.timestamps = true;
        self
    }

    pub fn build(mut self) -> EntityMeta {
        let meta = &mut self.meta;
        if meta.primary_keys.is_empty() && meta.columns.contains(&"id") {
            meta.primary_keys.push("id");
        }

        // First insertion wins, so the insertion order below is the precedence.
        let mut index = HashMap::new();
        for (i, name) in meta.columns.iter().enumerate() {
            index.entry(*name).or_insert(Slot::Column(i));
        }
        for (i, relation) in meta.relations.iter().enumerate() {
            index.entry(relation.name).or_insert(Slot::Relation(i));
        }
        for (i, property) in meta.properties.iter().enumerate() {
            index.entry(property.name).or_insert(Slot::Property(i));
        }
        for (i, method) in meta.methods.iter().enumerate() {
            index.entry(method.name).or_insert(Slot::Method(i));
        }
        meta.index = index;
        self.meta
    }
}
