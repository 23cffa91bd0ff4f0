//! Filter mappings and the predicate compiler.

use crate::alias::{AliasMap, Source};
use crate::error::{QueryError, QueryResult};
use crate::expr::{CompareOp, DatePart, Expr, Predicate};
use crate::inspect::{Attribute, EntityMeta};
use crate::path::parse_filter_key;
use crate::value::Value;

/// JSON key of an AND combinator.
pub const AND_KEY: &str = "$and";
/// JSON key of an OR combinator.
pub const OR_KEY: &str = "$or";
/// JSON key of a NOT combinator.
pub const NOT_KEY: &str = "$not";

/// The fixed operator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Exact,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
    Between,
    Like,
    ILike,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Contains,
    IsNull,
    /// `year`, `month_gt`, `day_le`, ...
    DatePart(DatePart, CompareOp),
}

impl Operator {
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "exact" => Self::Exact,
            "ne" => Self::Ne,
            "gt" => Self::Gt,
            "ge" => Self::Ge,
            "lt" => Self::Lt,
            "le" => Self::Le,
            "in" => Self::In,
            "notin" => Self::NotIn,
            "between" => Self::Between,
            "like" => Self::Like,
            "ilike" => Self::ILike,
            "startswith" => Self::StartsWith,
            "istartswith" => Self::IStartsWith,
            "endswith" => Self::EndsWith,
            "iendswith" => Self::IEndsWith,
            "contains" => Self::Contains,
            "isnull" => Self::IsNull,
            other => {
                let (part, suffix) = match other.split_once('_') {
                    Some((part, suffix)) => (part, Some(suffix)),
                    None => (other, None),
                };
                let part = DatePart::parse(part)?;
                let compare = match suffix {
                    None => CompareOp::Eq,
                    Some("ne") => CompareOp::Ne,
                    Some("gt") => CompareOp::Gt,
                    Some("ge") => CompareOp::Ge,
                    Some("lt") => CompareOp::Lt,
                    Some("le") => CompareOp::Le,
                    Some(_) => return None,
                };
                Self::DatePart(part, compare)
            }
        };
        Some(op)
    }

    pub fn name(&self) -> String {
        let fixed = match self {
            Self::Exact => "exact",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::In => "in",
            Self::NotIn => "notin",
            Self::Between => "between",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::Contains => "contains",
            Self::IsNull => "isnull",
            Self::DatePart(part, op) => {
                let suffix = match op {
                    CompareOp::Eq => "",
                    CompareOp::Ne => "_ne",
                    CompareOp::Gt => "_gt",
                    CompareOp::Ge => "_ge",
                    CompareOp::Lt => "_lt",
                    CompareOp::Le => "_le",
                };
                return format!("{}{}", part.name(), suffix);
            }
        };
        fixed.to_owned()
    }
}

/// One entry of a filter mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Condition { key: String, value: Value },
    And(Vec<Filters>),
    Or(Vec<Filters>),
    Not(Filters),
}

/// A filter mapping: an implicit AND of its entries, in insertion order.
///
/// ```ignore
/// let filters = Filters::new()
///     .with("rating__gt", 2)
///     .or([
///         Filters::new().with("user___name__startswith", "Bi"),
///         Filters::new().with("archived", true),
///     ]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    nodes: Vec<FilterNode>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    /// Adds a `key = value` condition.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.nodes.push(FilterNode::Condition {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Adds an AND over `groups`.
    pub fn and(mut self, groups: impl IntoIterator<Item = Filters>) -> Self {
        self.nodes.push(FilterNode::And(groups.into_iter().collect()));
        self
    }

    /// Adds an OR over `groups`.
    pub fn or(mut self, groups: impl IntoIterator<Item = Filters>) -> Self {
        self.nodes.push(FilterNode::Or(groups.into_iter().collect()));
        self
    }

    /// Adds the negation of `filters`.
    pub fn exclude(mut self, filters: Filters) -> Self {
        self.nodes.push(FilterNode::Not(filters));
        self
    }

    /// Every condition key, including those nested under combinators.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        for node in &self.nodes {
            match node {
                FilterNode::Condition { key, .. } => keys.push(key),
                FilterNode::And(groups) | FilterNode::Or(groups) => {
                    for group in groups {
                        group.collect_keys(keys);
                    }
                }
                FilterNode::Not(inner) => inner.collect_keys(keys),
            }
        }
    }

    /// Parses a JSON filter mapping.
    ///
    /// Objects map keys to values; `"$and"` / `"$or"` take an object or an array of
    /// objects, `"$not"` takes an object or an array (implicitly AND-ed). A
    /// top-level array is an implicit AND of its elements.
    pub fn from_json(value: &serde_json::Value) -> QueryResult<Self> {
        match value {
            serde_json::Value::Object(map) => {
                let mut filters = Filters::new();
                for (key, value) in map {
                    filters = match key.as_str() {
                        AND_KEY => filters.and(Self::groups_from_json(key, value)?),
                        OR_KEY => filters.or(Self::groups_from_json(key, value)?),
                        NOT_KEY => {
                            let groups = Self::groups_from_json(key, value)?;
                            filters.exclude(Filters::new().and(groups))
                        }
                        _ => filters.with(key.clone(), Value::from(value.clone())),
                    };
                }
                Ok(filters)
            }
            serde_json::Value::Array(_) => {
                Ok(Filters::new().and(Self::groups_from_json(AND_KEY, value)?))
            }
            other => Err(QueryError::InvalidValue {
                key: AND_KEY.to_owned(),
                message: format!("expected an object or an array, got {}", other),
            }),
        }
    }

    fn groups_from_json(key: &str, value: &serde_json::Value) -> QueryResult<Vec<Filters>> {
        match value {
            serde_json::Value::Object(_) => Ok(vec![Self::from_json(value)?]),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::Object(_) => Self::from_json(item),
                    other => Err(QueryError::InvalidValue {
                        key: key.to_owned(),
                        message: format!("expected a filter object, got {}", other),
                    }),
                })
                .collect(),
            other => Err(QueryError::InvalidValue {
                key: key.to_owned(),
                message: format!("expected an object or an array, got {}", other),
            }),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Filters
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Filters::new(), |filters, (key, value)| filters.with(key, value))
    }
}

/// Compiles every top-level entry of `filters`, one predicate each.
pub fn compile_filters(
    root: &'static EntityMeta,
    aliases: &AliasMap,
    filters: &Filters,
) -> QueryResult<Vec<Predicate>> {
    filters
        .nodes
        .iter()
        .map(|node| compile_node(root, aliases, node))
        .collect()
}

fn compile_group(
    root: &'static EntityMeta,
    aliases: &AliasMap,
    filters: &Filters,
) -> QueryResult<Predicate> {
    Ok(Predicate::all(compile_filters(root, aliases, filters)?))
}

fn compile_node(
    root: &'static EntityMeta,
    aliases: &AliasMap,
    node: &FilterNode,
) -> QueryResult<Predicate> {
    match node {
        FilterNode::Condition { key, value } => {
            let parsed = parse_filter_key(root, key)?;
            let source = aliases.source_for(root, &parsed.path)?;
            compile_condition(&source, &parsed.leaf, parsed.operator, value, key)
        }
        FilterNode::And(groups) => Ok(Predicate::And(
            groups
                .iter()
                .map(|group| compile_group(root, aliases, group))
                .collect::<QueryResult<_>>()?,
        )),
        FilterNode::Or(groups) => Ok(Predicate::Or(
            groups
                .iter()
                .map(|group| compile_group(root, aliases, group))
                .collect::<QueryResult<_>>()?,
        )),
        FilterNode::Not(inner) => Ok(compile_group(root, aliases, inner)?.negate()),
    }
}

/// Compiles one `leaf__operator = value` condition against `source`.
///
/// `key` is only used in error messages.
pub fn compile_condition(
    source: &Source,
    leaf: &str,
    operator: Operator,
    value: &Value,
    key: &str,
) -> QueryResult<Predicate> {
    let entity = source.entity();
    match entity.attribute(leaf) {
        None => Err(QueryError::UnknownAttribute {
            key: key.to_owned(),
            attribute: leaf.to_owned(),
            entity: entity.name(),
        }),
        Some(Attribute::Method(_)) if operator != Operator::Exact => Err(QueryError::UnknownOperator {
            key: key.to_owned(),
            operator: operator.name(),
        }),
        Some(Attribute::Method(method)) => method.predicate(source, value),
        Some(Attribute::Relation(relation)) => {
            let exists = source.has(relation.name())?;
            let present = match (operator, value) {
                (Operator::Exact, Value::Null) => false,
                (Operator::Ne, Value::Null) => true,
                (Operator::IsNull, value) => !value.is_truthy(),
                _ => {
                    return Err(QueryError::InvalidValue {
                        key: key.to_owned(),
                        message: format!(
                            "relationship `{}` can only be compared with null",
                            leaf
                        ),
                    });
                }
            };
            Ok(if present { exists } else { negate_exists(exists) })
        }
        Some(Attribute::Column(column)) => apply_operator(source.column(column), operator, value, key),
        Some(Attribute::Property(property)) => {
            apply_operator(property.expr(source), operator, value, key)
        }
    }
}

fn negate_exists(predicate: Predicate) -> Predicate {
    match predicate {
        Predicate::Exists {
            alias,
            predicate,
            negated,
        } => Predicate::Exists {
            alias,
            predicate,
            negated: !negated,
        },
        other => other.negate(),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> QueryError {
    QueryError::InvalidValue {
        key: key.to_owned(),
        message: message.into(),
    }
}

fn text_operand<'v>(value: &'v Value, key: &str, operator: Operator) -> QueryResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| invalid(key, format!("`{}` needs a string", operator.name())))
}

fn apply_operator(expr: Expr, operator: Operator, value: &Value, key: &str) -> QueryResult<Predicate> {
    let takes_list = matches!(operator, Operator::In | Operator::NotIn | Operator::Between);
    if !takes_list && value.as_list().is_some() {
        return Err(invalid(key, format!("`{}` needs a single value", operator.name())));
    }
    let predicate = match operator {
        Operator::Exact if value.is_null() => expr.is_null(),
        Operator::Exact => expr.equals(value.clone()),
        Operator::Ne if value.is_null() => expr.is_not_null(),
        Operator::Ne => expr.not_equals(value.clone()),
        Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
            if value.is_null() {
                return Err(invalid(key, "null can't be ordered"));
            }
            let op = match operator {
                Operator::Gt => CompareOp::Gt,
                Operator::Ge => CompareOp::Ge,
                Operator::Lt => CompareOp::Lt,
                _ => CompareOp::Le,
            };
            expr.compare(op, value.clone())
        }
        Operator::In | Operator::NotIn => {
            let values = value
                .as_list()
                .ok_or_else(|| invalid(key, format!("`{}` needs a list", operator.name())))?
                .to_vec();
            if operator == Operator::In {
                expr.in_list(values)
            } else {
                expr.not_in_list(values)
            }
        }
        Operator::Between => match value.as_list() {
            Some([low, high]) => expr.between(low.clone(), high.clone()),
            _ => return Err(invalid(key, "`between` needs a [low, high] pair")),
        },
        Operator::Like => expr.like(text_operand(value, key, operator)?),
        Operator::ILike => expr.ilike(text_operand(value, key, operator)?),
        Operator::StartsWith => expr.like(format!("{}%", text_operand(value, key, operator)?)),
        Operator::IStartsWith => expr.ilike(format!("{}%", text_operand(value, key, operator)?)),
        Operator::EndsWith => expr.like(format!("%{}", text_operand(value, key, operator)?)),
        Operator::IEndsWith => expr.ilike(format!("%{}", text_operand(value, key, operator)?)),
        Operator::Contains => expr.ilike(format!("%{}%", text_operand(value, key, operator)?)),
        Operator::IsNull if value.is_truthy() => expr.is_null(),
        Operator::IsNull => expr.is_not_null(),
        Operator::DatePart(part, op) => expr.date_part(part).compare(op, value.clone()),
    };
    Ok(predicate)
}
