use syn::{Attribute, Field, Ident, LitInt, LitStr, Path};

/// Which side of a relationship holds the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// `Option<Vec<Target>>`; the target holds the key.
    HasMany,
    /// `Option<Target>`; this struct holds the key.
    BelongsTo,
}

#[derive(Debug, Clone)]
pub struct RelationDecl {
    pub name: String,
    pub target: Path,
    pub local_key: String,
    pub remote_key: String,
    /// The struct field populated by the loader, for field-level declarations.
    pub field: Option<(Ident, RelationKind)>,
}

/// Everything `#[smartmix(...)]` says about the struct.
#[derive(Debug, Default)]
pub struct EntityAttrs {
    pub table: Option<String>,
    pub primary_keys: Vec<String>,
    pub relations: Vec<RelationDecl>,
    pub properties: Vec<(String, Path)>,
    pub methods: Vec<(String, Path)>,
    pub repr: Vec<String>,
    pub repr_max_length: Option<usize>,
    pub timestamps: bool,
    pub custom_loader: bool,
    pub databases: Vec<Ident>,
}

/// `snake_case` of a struct name, e.g. `BlogPost` -> `blog_post`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn parse_named_paths(meta: &syn::meta::ParseNestedMeta<'_>) -> syn::Result<Vec<(String, Path)>> {
    let mut out = Vec::new();
    meta.parse_nested_meta(|entry| {
        let name = entry
            .path
            .get_ident()
            .ok_or_else(|| entry.error("expected `name = function`"))?
            .to_string();
        let func: Path = entry.value()?.parse()?;
        out.push((name, func));
        Ok(())
    })?;
    Ok(out)
}

/// Parses the body of `has_many(...)`, `belongs_to(...)` or `relation(...)`:
/// positional paths first, then `local_key = "..."` / `remote_key = "..."`.
fn parse_relation_args(
    meta: &syn::meta::ParseNestedMeta<'_>,
) -> syn::Result<(Vec<Path>, Option<String>, Option<String>)> {
    let mut positional = Vec::new();
    let mut local_key = None;
    let mut remote_key = None;
    meta.parse_nested_meta(|entry| {
        if entry.path.is_ident("local_key") {
            local_key = Some(entry.value()?.parse::<LitStr>()?.value());
        } else if entry.path.is_ident("remote_key") {
            remote_key = Some(entry.value()?.parse::<LitStr>()?.value());
        } else {
            positional.push(entry.path.clone());
        }
        Ok(())
    })?;
    Ok((positional, local_key, remote_key))
}

impl EntityAttrs {
    pub fn parse(attrs: &[Attribute], struct_name: &Ident) -> syn::Result<Self> {
        let mut out = Self::default();
        let owner_key = format!("{}_id", snake_case(&struct_name.to_string()));

        for attr in attrs.iter().filter(|attr| attr.path().is_ident("smartmix")) {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("table") {
                    out.table = Some(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("primary_key") {
                    out.primary_keys.push(meta.value()?.parse::<LitStr>()?.value());
                } else if meta.path.is_ident("relation") {
                    let (positional, local_key, remote_key) = parse_relation_args(&meta)?;
                    let [name, target] = positional.as_slice() else {
                        return Err(meta.error("expected `relation(name, Target, ...)`"));
                    };
                    let name = name
                        .get_ident()
                        .ok_or_else(|| meta.error("relation name must be an identifier"))?;
                    out.relations.push(RelationDecl {
                        name: name.to_string(),
                        target: target.clone(),
                        local_key: local_key.unwrap_or_else(|| "id".to_owned()),
                        remote_key: remote_key.unwrap_or_else(|| owner_key.clone()),
                        field: None,
                    });
                } else if meta.path.is_ident("property") {
                    out.properties.extend(parse_named_paths(&meta)?);
                } else if meta.path.is_ident("method") {
                    out.methods.extend(parse_named_paths(&meta)?);
                } else if meta.path.is_ident("repr") {
                    meta.parse_nested_meta(|attr| {
                        let ident = attr
                            .path
                            .get_ident()
                            .ok_or_else(|| attr.error("repr takes attribute names"))?;
                        out.repr.push(ident.to_string());
                        Ok(())
                    })?;
                } else if meta.path.is_ident("repr_max_length") {
                    out.repr_max_length = Some(meta.value()?.parse::<LitInt>()?.base10_parse()?);
                } else if meta.path.is_ident("timestamps") {
                    out.timestamps = true;
                } else if meta.path.is_ident("custom_loader") {
                    out.custom_loader = true;
                } else if meta.path.is_ident("db") {
                    meta.parse_nested_meta(|db| {
                        let ident = db
                            .path
                            .get_ident()
                            .ok_or_else(|| db.error("expected sqlite, postgres or mysql"))?;
                        out.databases.push(ident.clone());
                        Ok(())
                    })?;
                } else {
                    return Err(meta.error("unknown smartmix attribute"));
                }
                Ok(())
            })?;
        }
        Ok(out)
    }
}

/// What `#[smartmix(...)]` says about one field.
#[derive(Debug, Default)]
pub struct FieldAttrs {
    pub ignore: bool,
    pub relation: Option<RelationDecl>,
}

impl FieldAttrs {
    pub fn parse(field: &Field, struct_name: &Ident) -> syn::Result<Self> {
        let mut out = Self::default();
        let Some(ident) = field.ident.as_ref() else {
            return Ok(out);
        };
        let owner_key = format!("{}_id", snake_case(&struct_name.to_string()));

        for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("smartmix")) {
            attr.parse_nested_meta(|meta| {
                let kind = if meta.path.is_ident("ignore") {
                    out.ignore = true;
                    return Ok(());
                } else if meta.path.is_ident("has_many") {
                    RelationKind::HasMany
                } else if meta.path.is_ident("belongs_to") {
                    RelationKind::BelongsTo
                } else {
                    return Err(meta.error("expected `ignore`, `has_many(..)` or `belongs_to(..)`"));
                };

                let (positional, local_key, remote_key) = parse_relation_args(&meta)?;
                let [target] = positional.as_slice() else {
                    return Err(meta.error("expected exactly one target model"));
                };
                let (local_key, remote_key) = match kind {
                    RelationKind::HasMany => (
                        local_key.unwrap_or_else(|| "id".to_owned()),
                        remote_key.unwrap_or_else(|| owner_key.clone()),
                    ),
                    RelationKind::BelongsTo => (
                        local_key.unwrap_or_else(|| format!("{}_id", ident)),
                        remote_key.unwrap_or_else(|| "id".to_owned()),
                    ),
                };
                out.relation = Some(RelationDecl {
                    name: ident.to_string(),
                    target: target.clone(),
                    local_key,
                    remote_key,
                    field: Some((ident.clone(), kind)),
                });
                Ok(())
            })?;
        }
        Ok(out)
    }
}
