/// Errors raised while a smart query is being built.
///
/// These are input errors: they are reported before anything is executed and a
/// query is never returned half-built when one occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// A relation hop does not name a relationship declared on the entity reached so far.
    Path {
        /// Full offending path as written by the caller.
        path: String,
        /// Entity that was expected to declare the relationship.
        entity: &'static str,
        /// The missing relationship name.
        relation: String,
    },
    /// The terminal attribute is not a column, relationship or computed attribute.
    UnknownAttribute {
        key: String,
        attribute: String,
        entity: &'static str,
    },
    /// The operator suffix is not in the operator table.
    UnknownOperator { key: String, operator: String },
    /// A schema entry names a loader strategy other than `joined` / `subquery`.
    BadLoadStrategy { path: String, strategy: String },
    /// The attribute exists but cannot be used as a sort key.
    NotSortable {
        key: String,
        attribute: String,
        entity: &'static str,
    },
    /// The filter value does not fit the operator (e.g. `between` without a pair).
    InvalidValue { key: String, message: String },
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path {
                path,
                entity,
                relation,
            } => write!(
                f,
                "incorrect path `{}`: {} doesn't have `{}` relationship",
                path, entity, relation
            ),
            Self::UnknownAttribute {
                key,
                attribute,
                entity,
            } => write!(
                f,
                "expression `{}` has incorrect attribute `{}` for {}",
                key, attribute, entity
            ),
            Self::UnknownOperator { key, operator } => write!(
                f,
                "expression `{}` has incorrect operator `{}`",
                key, operator
            ),
            Self::BadLoadStrategy { path, strategy } => {
                write!(f, "bad load strategy `{}` in `{}`", strategy, path)
            }
            Self::NotSortable {
                key,
                attribute,
                entity,
            } => write!(f, "can't order {} by `{}` (in `{}`)", entity, attribute, key),
            Self::InvalidValue { key, message } => {
                write!(f, "invalid value for `{}`: {}", key, message)
            }
        }
    }
}

impl std::error::Error for QueryError {}

/// Result alias for query construction.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors surfaced by execution and the active-record helpers.
#[derive(Debug)]
pub enum Error {
    /// Underlying sqlx error.
    Sqlx(sqlx::Error),
    /// The query could not be built.
    Query(QueryError),
    /// `find_or_fail` found no row.
    NotFound { entity: &'static str, id: String },
    /// A model or attribute map could not be (de)serialized.
    Json(serde_json::Error),
    /// Generic message error.
    Message(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlx(err) => write!(f, "sqlx error: {}", err),
            Self::Query(err) => write!(f, "{}", err),
            Self::NotFound { entity, id } => {
                write!(f, "{} with id '{}' was not found", entity, id)
            }
            Self::Json(err) => write!(f, "json error: {}", err),
            Self::Message(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlx(err) => Some(err),
            Self::Query(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Sqlx(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Self::Query(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// Result alias for execution and active-record operations.
pub type SmartmixResult<T> = Result<T, Error>;
