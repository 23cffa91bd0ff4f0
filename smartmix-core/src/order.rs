//! Sort keys to `ORDER BY` terms.

use crate::alias::{AliasMap, Source};
use crate::error::{QueryError, QueryResult};
use crate::expr::{Direction, OrderExpr};
use crate::inspect::{Attribute, EntityMeta};
use crate::path::parse_sort_key;

/// Compiles one sort key (`-user___name`, `rating`, ...) against planned aliases.
pub fn compile_order(
    root: &'static EntityMeta,
    aliases: &AliasMap,
    key: &str,
) -> QueryResult<OrderExpr> {
    let parsed = parse_sort_key(root, key)?;
    let source = aliases.source_for(root, &parsed.path)?;
    order_by_attribute(&source, &parsed.leaf, parsed.descending, key)
}

/// Orders by `leaf` of `source`, which must be a column or a computed property.
pub fn order_by_attribute(
    source: &Source,
    leaf: &str,
    descending: bool,
    key: &str,
) -> QueryResult<OrderExpr> {
    let entity = source.entity();
    let expr = match entity.attribute(leaf) {
        Some(Attribute::Column(column)) => source.column(column),
        Some(Attribute::Property(property)) => property.expr(source),
        Some(Attribute::Relation(_) | Attribute::Method(_)) => {
            return Err(QueryError::NotSortable {
                key: key.to_owned(),
                attribute: leaf.to_owned(),
                entity: entity.name(),
            });
        }
        None => {
            return Err(QueryError::UnknownAttribute {
                key: key.to_owned(),
                attribute: leaf.to_owned(),
                entity: entity.name(),
            });
        }
    };
    Ok(OrderExpr {
        expr,
        direction: if descending {
            Direction::Desc
        } else {
            Direction::Asc
        },
    })
}
