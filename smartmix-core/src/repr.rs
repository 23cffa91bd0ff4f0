//! `<Entity #pk attr:'value'>` renderings for logs and debugging.

use serde::Serialize;
use serde_json::Value as Json;

use crate::error::{Error, SmartmixResult};
use crate::inspect::{Entity, EntityMeta};

/// Renders `model` as `<Name #pk attr:value ...>` using its `repr` attributes.
///
/// Strings are quoted, every value is cut to `repr_max_length` characters (plus
/// `...`), and a single attribute is printed without its name. Related models
/// are rendered with their own entity's settings.
pub fn repr<T: Entity + Serialize>(model: &T) -> SmartmixResult<String> {
    let value = serde_json::to_value(model)?;
    repr_json(T::meta(), &value)
}

/// Same as [`repr`] over an already serialized model.
pub fn repr_json(meta: &EntityMeta, value: &Json) -> SmartmixResult<String> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::Message(format!("{} did not serialize to an object", meta.name())))?;

    let mut out = format!("<{} #{}", meta.name(), id_str(meta, object));
    let single = meta.repr_attrs().len() == 1;
    for attr in meta.repr_attrs() {
        let field = object.get(*attr).ok_or_else(|| {
            Error::Message(format!("{} has no attribute `{}` to repr", meta.name(), attr))
        })?;
        let rendered = attr_str(meta, attr, field)?;
        let rendered = truncate(&rendered, meta.repr_max_length());
        let rendered = if field.is_string() {
            format!("'{}'", rendered)
        } else {
            rendered
        };
        out.push(' ');
        if !single {
            out.push_str(attr);
            out.push(':');
        }
        out.push_str(&rendered);
    }
    out.push('>');
    Ok(out)
}

fn id_str(meta: &EntityMeta, object: &serde_json::Map<String, Json>) -> String {
    let ids: Vec<String> = meta
        .primary_keys()
        .iter()
        .filter_map(|pk| object.get(*pk))
        .filter(|id| !id.is_null())
        .map(plain_str)
        .collect();
    if ids.is_empty() {
        "None".to_owned()
    } else {
        ids.join("-")
    }
}

fn attr_str(meta: &EntityMeta, attr: &str, field: &Json) -> SmartmixResult<String> {
    let Some(relation) = meta.relation(attr) else {
        return Ok(plain_str(field));
    };
    let target = relation.target();
    match field {
        Json::Object(_) => repr_json(target, field),
        Json::Array(items) => {
            let inner = items
                .iter()
                .map(|item| repr_json(target, item))
                .collect::<SmartmixResult<Vec<_>>>()?;
            Ok(format!("[{}]", inner.join(", ")))
        }
        other => Ok(plain_str(other)),
    }
}

fn plain_str(value: &Json) -> String {
    match value {
        Json::Null => "None".to_owned(),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(value: &str, max_length: usize) -> String {
    match value.char_indices().nth(max_length) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_owned(),
    }
}
