use std::fmt::Write;
use std::marker::PhantomData;

use crate::alias::Alias;
use crate::dialect::SqlDialect;
use crate::expr::{Expr, OrderExpr, Predicate};
use crate::value::Value;

/// Accumulates SQL text and the bind values its placeholders refer to.
///
/// Placeholders are numbered by bind position, so everything that binds must go
/// through the same writer, in text order.
pub(crate) struct SqlWriter<DB: SqlDialect> {
    sql: String,
    binds: Vec<Value>,
    _db: PhantomData<DB>,
}

impl<DB: SqlDialect> SqlWriter<DB> {
    pub(crate) fn new() -> Self {
        Self {
            sql: String::with_capacity(128),
            binds: Vec::new(),
            _db: PhantomData,
        }
    }

    pub(crate) fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    pub(crate) fn push_ident(&mut self, ident: &str) {
        self.sql.push_str(&DB::quote_identifier(ident));
    }

    pub(crate) fn push_column(&mut self, qualifier: &str, column: &str) {
        let _ = write!(
            self.sql,
            "{}.{}",
            DB::quote_identifier(qualifier),
            DB::quote_identifier(column)
        );
    }

    /// Binds `value` and returns its placeholder.
    pub(crate) fn bind(&mut self, value: Value) -> String {
        self.binds.push(value);
        DB::placeholder(self.binds.len())
    }

    /// Binds `value`; lists become `(p1, p2, ...)`.
    pub(crate) fn push_bind(&mut self, value: Value) {
        match value {
            Value::List(items) => {
                self.sql.push('(');
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    let placeholder = self.bind(item);
                    self.sql.push_str(&placeholder);
                }
                self.sql.push(')');
            }
            value => {
                let placeholder = self.bind(value);
                self.sql.push_str(&placeholder);
            }
        }
    }

    /// Renders `expr` on its own and returns the text, keeping its binds.
    fn capture(&mut self, expr: &Expr) -> String {
        let start = self.sql.len();
        self.expr(expr);
        self.sql.split_off(start)
    }

    pub(crate) fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { source, name } => self.push_column(source.qualifier(), name),
            Expr::Value(value) => self.push_bind(value.clone()),
            Expr::Func { name, args } => {
                self.sql.push_str(name);
                self.sql.push('(');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.expr(arg);
                }
                self.sql.push(')');
            }
            Expr::Not(inner) => {
                self.sql.push_str("(NOT ");
                self.expr(inner);
                self.sql.push(')');
            }
            Expr::DatePart { part, expr } => {
                let inner = self.capture(expr);
                self.sql.push_str(&DB::date_part(*part, &inner));
            }
        }
    }

    pub(crate) fn predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::Compare { left, op, right } => {
                self.expr(left);
                let _ = write!(self.sql, " {} ", op.sql());
                self.expr(right);
            }
            Predicate::IsNull { expr, negated } => {
                self.expr(expr);
                self.sql
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Predicate::InList {
                expr,
                values,
                negated,
            } => {
                if values.is_empty() {
                    self.sql.push_str(if *negated { "1=1" } else { "1=0" });
                    return;
                }
                self.expr(expr);
                self.sql.push_str(if *negated { " NOT IN " } else { " IN " });
                self.push_bind(Value::List(values.clone()));
            }
            Predicate::Between { expr, low, high } => {
                self.expr(expr);
                self.sql.push_str(" BETWEEN ");
                self.push_bind(low.clone());
                self.sql.push_str(" AND ");
                self.push_bind(high.clone());
            }
            Predicate::Like {
                expr,
                pattern,
                case_insensitive,
            } => {
                if *case_insensitive {
                    let inner = self.capture(expr);
                    let placeholder = self.bind(Value::Text(pattern.clone()));
                    self.sql.push_str(&DB::ilike(&inner, &placeholder));
                } else {
                    self.expr(expr);
                    self.sql.push_str(" LIKE ");
                    self.push_bind(Value::Text(pattern.clone()));
                }
            }
            Predicate::Exists {
                alias,
                predicate,
                negated,
            } => {
                if *negated {
                    self.sql.push_str("NOT ");
                }
                self.sql.push_str("EXISTS (SELECT 1 FROM ");
                self.push_aliased_table(alias);
                self.sql.push_str(" WHERE ");
                self.push_join_condition(alias);
                if let Some(inner) = predicate {
                    self.sql.push_str(" AND ");
                    self.predicate(inner);
                }
                self.sql.push(')');
            }
            Predicate::Expr(expr) => self.expr(expr),
            Predicate::And(items) => self.junction(items, " AND ", "1=1"),
            Predicate::Or(items) => self.junction(items, " OR ", "1=0"),
            Predicate::Not(inner) => {
                self.sql.push_str("NOT (");
                self.predicate(inner);
                self.sql.push(')');
            }
        }
    }

    fn junction(&mut self, items: &[Predicate], separator: &str, empty: &str) {
        match items {
            [] => self.sql.push_str(empty),
            [single] => self.predicate(single),
            _ => {
                self.sql.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(separator);
                    }
                    self.predicate(item);
                }
                self.sql.push(')');
            }
        }
    }

    /// ` WHERE a AND b`, or nothing.
    pub(crate) fn where_clause(&mut self, predicates: &[Predicate]) {
        for (i, predicate) in predicates.iter().enumerate() {
            self.sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            self.predicate(predicate);
        }
    }

    pub(crate) fn order_clause(&mut self, ordering: &[OrderExpr]) {
        for (i, order) in ordering.iter().enumerate() {
            self.sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            self.expr(&order.expr);
            self.sql.push(' ');
            self.sql.push_str(order.direction.sql());
        }
    }

    fn push_aliased_table(&mut self, alias: &Alias) {
        self.push_ident(alias.entity().table());
        self.sql.push_str(" AS ");
        self.push_ident(alias.name());
    }

    fn push_join_condition(&mut self, alias: &Alias) {
        let relation = alias.relation();
        self.push_column(alias.name(), relation.remote_key());
        self.sql.push_str(" = ");
        self.push_column(alias.parent().qualifier(), relation.local_key());
    }

    /// ` LEFT OUTER JOIN target AS alias ON alias.remote = parent.local`
    pub(crate) fn outer_join(&mut self, alias: &Alias) {
        self.sql.push_str(" LEFT OUTER JOIN ");
        self.push_aliased_table(alias);
        self.sql.push_str(" ON ");
        self.push_join_condition(alias);
    }

    pub(crate) fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.binds)
    }
}
