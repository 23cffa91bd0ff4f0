//! Smart queries over sqlx: Django-style filter keys (`user___name__like`),
//! `-`-prefixed sort keys and nested eager-load schemas, compiled against
//! declarative entity metadata into one SELECT with shared join aliases.

pub use sqlx;

pub mod alias;
pub mod dialect;
pub mod eagerload;
pub mod error;
pub mod executor;
pub mod expr;
pub mod filter;
pub mod inspect;
pub mod model;
pub mod order;
pub mod path;
pub mod query;
mod render;
pub mod repr;
pub mod select;
pub mod serialize;
pub mod smart_query;
pub mod test_utils;
pub mod timestamp;
pub mod value;

#[cfg(test)]
mod fixtures;

pub use alias::{Alias, AliasMap, AliasRef, Source, plan_aliases};
pub use dialect::SqlDialect;
pub use eagerload::{FlatSchema, LoadDirective, LoadNode, LoadSchema, LoadStrategy, SchemaEntry};
pub use error::{Error, QueryError, QueryResult, SmartmixResult};
pub use executor::{Executor, IntoExecutor, STATEMENT_TARGET};
pub use expr::{CompareOp, DatePart, Direction, Expr, OrderExpr, Predicate};
pub use filter::{FilterNode, Filters, Operator};
pub use inspect::{Attribute, Entity, EntityMeta, EntityMetaBuilder, RelationMeta};
pub use model::Model;
pub use path::{RelationPath, parse_filter_key, parse_sort_key};
pub use query::Query;
pub use repr::repr;
pub use select::{EagerLoad, LoadPlan, SelectQuery};
pub use serialize::{DictOptions, to_dict};
pub use smart_query::{QueryBackend, SmartQueryPlan, smart_query};
pub use value::Value;

pub mod prelude {
    pub use crate::{
        DictOptions, Entity, EntityMeta, Error, Executor, Filters, IntoExecutor, LoadSchema,
        LoadStrategy, Model, Query, QueryError, Source, Value, repr, to_dict,
    };
}
