//! A small, dialect-neutral SQL expression tree.
//!
//! Filters, sorts and computed attributes all compile to [`Expr`] / [`Predicate`];
//! the renderer in [`crate::render`] turns them into SQL for a concrete database.

use crate::alias::{AliasRef, Source};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
}

impl DatePart {
    pub fn name(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
        }
    }

    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Year => "YEAR",
            Self::Month => "MONTH",
            Self::Day => "DAY",
        }
    }

    pub fn strftime_format(self) -> &'static str {
        match self {
            Self::Year => "%Y",
            Self::Month => "%m",
            Self::Day => "%d",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "year" => Some(Self::Year),
            "month" => Some(Self::Month),
            "day" => Some(Self::Day),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

/// A scalar SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column qualified by the root table or an alias.
    Column { source: Source, name: String },
    /// A bound parameter.
    Value(Value),
    /// A function call, e.g. `LOWER(x)`.
    Func { name: &'static str, args: Vec<Expr> },
    /// Boolean negation of an expression (`NOT x`).
    Not(Box<Expr>),
    /// Integer year / month / day of a date or datetime expression.
    DatePart { part: DatePart, expr: Box<Expr> },
}

impl Expr {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn func(name: &'static str, args: Vec<Expr>) -> Self {
        Self::Func { name, args }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn date_part(self, part: DatePart) -> Self {
        Self::DatePart {
            part,
            expr: Box::new(self),
        }
    }

    pub fn compare(self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::Compare {
            left: self,
            op,
            right: Expr::Value(value.into()),
        }
    }

    pub fn equals(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Eq, value)
    }

    pub fn not_equals(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ne, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Ge, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(self, value: impl Into<Value>) -> Predicate {
        self.compare(CompareOp::Le, value)
    }

    /// Compares two expressions, e.g. two columns.
    pub fn compare_expr(self, op: CompareOp, right: Expr) -> Predicate {
        Predicate::Compare {
            left: self,
            op,
            right,
        }
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull {
            expr: self,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNull {
            expr: self,
            negated: true,
        }
    }

    pub fn in_list(self, values: Vec<Value>) -> Predicate {
        Predicate::InList {
            expr: self,
            values,
            negated: false,
        }
    }

    pub fn not_in_list(self, values: Vec<Value>) -> Predicate {
        Predicate::InList {
            expr: self,
            values,
            negated: true,
        }
    }

    pub fn between(self, low: impl Into<Value>, high: impl Into<Value>) -> Predicate {
        Predicate::Between {
            expr: self,
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn like(self, pattern: impl Into<String>) -> Predicate {
        Predicate::Like {
            expr: self,
            pattern: pattern.into(),
            case_insensitive: false,
        }
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Predicate {
        Predicate::Like {
            expr: self,
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }

    /// Uses a boolean expression directly as a predicate.
    pub fn is_true(self) -> Predicate {
        Predicate::Expr(self)
    }
}

/// A boolean SQL condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    IsNull {
        expr: Expr,
        negated: bool,
    },
    InList {
        expr: Expr,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        expr: Expr,
        low: Value,
        high: Value,
    },
    Like {
        expr: Expr,
        pattern: String,
        case_insensitive: bool,
    },
    /// Correlated `EXISTS` over a relationship; the alias carries the join condition.
    Exists {
        alias: AliasRef,
        predicate: Option<Box<Predicate>>,
        negated: bool,
    },
    /// A boolean-valued expression.
    Expr(Expr),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        Self::Not(Box::new(self))
    }

    /// Conjunction of `items`; a single item is returned unwrapped.
    pub fn all(mut items: Vec<Predicate>) -> Predicate {
        if items.len() == 1 {
            items.remove(0)
        } else {
            Self::And(items)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One `ORDER BY` term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderExpr {
    pub expr: Expr,
    pub direction: Direction,
}

impl OrderExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: Direction::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: Direction::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Post;
    use crate::inspect::Entity;

    #[test]
    fn and_flattens_left_chains() {
        let root = Source::Root(Post::meta());
        let predicate = root
            .column("rating")
            .gt(1)
            .and(root.column("rating").lt(5))
            .and(root.column("archived").equals(false));
        match predicate {
            Predicate::And(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected predicate: {:?}", other),
        }
    }

    #[test]
    fn all_unwraps_singletons() {
        let root = Source::Root(Post::meta());
        let single = Predicate::all(vec![root.column("id").equals(1)]);
        assert!(matches!(single, Predicate::Compare { op: CompareOp::Eq, .. }));
    }

    #[test]
    fn date_parts_round_trip_names() {
        for part in [DatePart::Year, DatePart::Month, DatePart::Day] {
            assert_eq!(DatePart::parse(part.name()), Some(part));
        }
        assert_eq!(DatePart::parse("week"), None);
    }
}
