//! Parsing of `relation___relation___attr__operator` keys.

use smallvec::SmallVec;

use crate::error::{QueryError, QueryResult};
use crate::filter::Operator;
use crate::inspect::EntityMeta;

/// Separates relationship hops in a key.
pub const RELATION_SEPARATOR: &str = "___";
/// Separates an attribute from its operator.
pub const OPERATOR_SEPARATOR: &str = "__";
/// Leading marker of a descending sort key.
pub const DESC_PREFIX: char = '-';

/// A dotted chain of relationship names starting at the root entity.
///
/// The empty path designates the root itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationPath {
    segments: SmallVec<[String; 4]>,
}

impl RelationPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses `"a.b.c"`; the empty string is the root path.
    pub fn from_dotted(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        Self::new(path.split('.'))
    }

    /// Parses a path written with `.` or `___` between hops, or a mix of both.
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        Self::new(path.split(RELATION_SEPARATOR).flat_map(|part| part.split('.')))
    }

    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_owned());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Same as [`is_root`](Self::is_root).
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn starts_with(&self, prefix: &RelationPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Non-empty prefixes from shortest to longest, ending with the path itself.
    pub fn prefixes(&self) -> impl Iterator<Item = RelationPath> + '_ {
        (1..=self.segments.len()).map(|n| Self {
            segments: self.segments[..n].iter().cloned().collect(),
        })
    }

    /// The key form, `a___b___c`.
    pub fn to_key(&self) -> String {
        self.segments.join(RELATION_SEPARATOR)
    }

    /// Walks the path from `root`, returning the entity it ends on.
    ///
    /// `written` is the caller's key, used in the error message.
    pub fn resolve(
        &self,
        root: &'static EntityMeta,
        written: &str,
    ) -> QueryResult<&'static EntityMeta> {
        let mut entity = root;
        for segment in &self.segments {
            let relation = entity.relation(segment).ok_or_else(|| QueryError::Path {
                path: written.to_owned(),
                entity: entity.name(),
                relation: segment.clone(),
            })?;
            entity = relation.target();
        }
        Ok(entity)
    }
}

impl std::fmt::Display for RelationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Splits `a___b___leaf` into the relation path and the unparsed remainder.
pub fn split_relations(key: &str) -> (RelationPath, &str) {
    match key.rsplit_once(RELATION_SEPARATOR) {
        Some((path, leaf)) => (RelationPath::new(path.split(RELATION_SEPARATOR)), leaf),
        None => (RelationPath::root(), key),
    }
}

/// A filter key broken into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedKey {
    pub path: RelationPath,
    pub leaf: String,
    pub operator: Operator,
}

/// Parses a filter key against `root`.
///
/// The leaf is interpreted as follows: a computed method name is taken whole with
/// the implicit `exact` operator; otherwise a leaf containing `__` is split at its
/// last occurrence into attribute and operator; otherwise it is an attribute
/// compared with `exact`.
pub fn parse_filter_key(root: &'static EntityMeta, key: &str) -> QueryResult<ParsedKey> {
    let (path, rest) = split_relations(key);
    let entity = path.resolve(root, key)?;

    if entity.is_computed_method(rest) {
        return Ok(ParsedKey {
            path,
            leaf: rest.to_owned(),
            operator: Operator::Exact,
        });
    }

    let (leaf, operator) = match rest.rsplit_once(OPERATOR_SEPARATOR) {
        Some((attr, op)) => match Operator::parse(op) {
            Some(operator) => (attr, operator),
            // An attribute whose own name contains `__`.
            None if entity.attribute(rest).is_some() => (rest, Operator::Exact),
            None => {
                return Err(QueryError::UnknownOperator {
                    key: key.to_owned(),
                    operator: op.to_owned(),
                });
            }
        },
        None => (rest, Operator::Exact),
    };

    // A method's argument is the filter value; it takes no operator.
    if operator != Operator::Exact && entity.is_computed_method(leaf) {
        return Err(QueryError::UnknownOperator {
            key: key.to_owned(),
            operator: operator.name(),
        });
    }

    if entity.attribute(leaf).is_none() {
        return Err(QueryError::UnknownAttribute {
            key: key.to_owned(),
            attribute: leaf.to_owned(),
            entity: entity.name(),
        });
    }

    Ok(ParsedKey {
        path,
        leaf: leaf.to_owned(),
        operator,
    })
}

/// A sort key broken into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSortKey {
    pub path: RelationPath,
    pub leaf: String,
    pub descending: bool,
}

/// Strips one leading `-`, returning whether it was present.
pub fn strip_desc(key: &str) -> (bool, &str) {
    match key.strip_prefix(DESC_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, key),
    }
}

/// Parses a sort key. Relation hops are validated here; the leaf is checked by the
/// order compiler, which knows what is sortable.
pub fn parse_sort_key(root: &'static EntityMeta, key: &str) -> QueryResult<ParsedSortKey> {
    let (descending, rest) = strip_desc(key);
    let (path, leaf) = split_relations(rest);
    path.resolve(root, key)?;
    Ok(ParsedSortKey {
        path,
        leaf: leaf.to_owned(),
        descending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CompareOp, DatePart};
    use crate::fixtures::{Comment, Post};
    use crate::inspect::Entity;

    #[test]
    fn splits_relations_and_operator() {
        let parsed = parse_filter_key(Comment::meta(), "post___user___name__like").unwrap();
        assert_eq!(parsed.path, RelationPath::new(["post", "user"]));
        assert_eq!(parsed.leaf, "name");
        assert_eq!(parsed.operator, Operator::Like);
    }

    #[test]
    fn bare_attribute_means_exact() {
        let parsed = parse_filter_key(Post::meta(), "rating").unwrap();
        assert!(parsed.path.is_root());
        assert_eq!(parsed.operator, Operator::Exact);
    }

    #[test]
    fn computed_method_names_are_not_split() {
        let parsed = parse_filter_key(Comment::meta(), "post___is_commented_by_user").unwrap();
        assert_eq!(parsed.leaf, "is_commented_by_user");
        assert_eq!(parsed.operator, Operator::Exact);
    }

    #[test]
    fn date_operators_parse() {
        let parsed = parse_filter_key(Comment::meta(), "created_at__month_ge").unwrap();
        assert_eq!(
            parsed.operator,
            Operator::DatePart(DatePart::Month, CompareOp::Ge)
        );
    }

    #[test]
    fn unknown_operator_is_reported() {
        let err = parse_filter_key(Post::meta(), "rating__frobnicate").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownOperator {
                key: "rating__frobnicate".to_owned(),
                operator: "frobnicate".to_owned(),
            }
        );
    }

    #[test]
    fn computed_methods_take_no_operator() {
        let err = parse_filter_key(Post::meta(), "is_public__gt").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnknownOperator {
                key: "is_public__gt".to_owned(),
                operator: "gt".to_owned(),
            }
        );
        let parsed = parse_filter_key(Post::meta(), "is_public__exact").unwrap();
        assert_eq!(parsed.leaf, "is_public");
    }

    #[test]
    fn undeclared_hop_is_a_path_error() {
        let err = parse_filter_key(Post::meta(), "ghost___name").unwrap_err();
        assert!(matches!(err, QueryError::Path { ref relation, .. } if relation == "ghost"));
    }

    #[test]
    fn unknown_leaf_is_reported() {
        let err = parse_filter_key(Post::meta(), "user___nickname").unwrap_err();
        assert!(matches!(
            err,
            QueryError::UnknownAttribute { entity: "User", .. }
        ));
    }

    #[test]
    fn sort_keys_strip_one_marker() {
        let parsed = parse_sort_key(Comment::meta(), "-post___rating").unwrap();
        assert!(parsed.descending);
        assert_eq!(parsed.path, RelationPath::new(["post"]));
        assert_eq!(parsed.leaf, "rating");
    }

    #[test]
    fn prefixes_and_display() {
        let path = RelationPath::from_dotted("post.user.posts");
        let prefixes: Vec<String> = path.prefixes().map(|p| p.to_string()).collect();
        assert_eq!(prefixes, vec!["post", "post.user", "post.user.posts"]);
        assert_eq!(path.to_key(), "post___user___posts");
        assert_eq!(path.parent(), Some(RelationPath::from_dotted("post.user")));
        assert!(RelationPath::from_dotted("").is_root());
    }

    #[test]
    fn parse_accepts_both_separators() {
        let expected = RelationPath::new(["post", "user", "posts"]);
        assert_eq!(RelationPath::parse("post___user___posts"), expected);
        assert_eq!(RelationPath::parse("post.user___posts"), expected);
        assert_eq!(RelationPath::parse(&expected.to_key()), expected);
        assert!(RelationPath::parse("").is_root());
    }
}
