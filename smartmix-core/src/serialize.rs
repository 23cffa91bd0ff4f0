use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::error::{Error, SmartmixResult};
use crate::inspect::{Entity, EntityMeta};

/// What [`to_dict`] includes besides the columns.
#[derive(Debug, Clone, Default)]
pub struct DictOptions {
    nested: bool,
    computed: bool,
    exclude: Vec<String>,
}

impl DictOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include loaded relationships, each rendered one level deep.
    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    /// Include serialized fields named after computed properties.
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn exclude<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// The model's columns as a JSON object, plus whatever `options` adds.
pub fn to_dict<T: Entity + Serialize>(model: &T, options: &DictOptions) -> SmartmixResult<Map<String, Json>> {
    let value = serde_json::to_value(model)?;
    dict_from_json(T::meta(), value, options)
}

/// Same as [`to_dict`] over an already serialized model.
pub fn dict_from_json(meta: &EntityMeta, value: Json, options: &DictOptions) -> SmartmixResult<Map<String, Json>> {
    let Json::Object(mut fields) = value else {
        return Err(Error::Message(format!("{} did not serialize to an object", meta.name())));
    };

    let mut dict = Map::new();
    for column in meta.columns() {
        if let Some(field) = fields.remove(*column) {
            dict.insert((*column).to_owned(), field);
        }
    }

    if options.computed {
        for name in meta.computed_properties() {
            if let Some(field) = fields.remove(name) {
                dict.insert(name.to_owned(), field);
            }
        }
    }

    if options.nested {
        let child_options = DictOptions {
            computed: options.computed,
            ..DictOptions::default()
        };
        for relation in meta.relations() {
            let target = relation.target();
            match fields.remove(relation.name()) {
                Some(child @ Json::Object(_)) => {
                    let child = dict_from_json(target, child, &child_options)?;
                    dict.insert(relation.name().to_owned(), Json::Object(child));
                }
                Some(Json::Array(children)) => {
                    let children = children
                        .into_iter()
                        .filter(Json::is_object)
                        .map(|child| dict_from_json(target, child, &child_options).map(Json::Object))
                        .collect::<SmartmixResult<Vec<_>>>()?;
                    dict.insert(relation.name().to_owned(), Json::Array(children));
                }
                // Not loaded.
                _ => {}
            }
        }
    }

    for key in &options.exclude {
        dict.remove(key);
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Post;
    use serde_json::json;

    fn post() -> Json {
        json!({
            "id": 1,
            "body": "hello",
            "user_id": 2,
            "archived": false,
            "rating": 4,
            "public": true,
            "cache_key": "internal",
            "user": {"id": 2, "name": "Bill", "posts": []},
            "comments": [{"id": 5, "body": "hi", "user_id": 2, "post_id": 1, "rating": 1, "created_at": null}],
        })
    }

    #[test]
    fn columns_only_by_default() {
        let dict = dict_from_json(Post::meta(), post(), &DictOptions::new()).unwrap();
        let keys: Vec<&str> = dict.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 5);
        for column in Post::meta().columns() {
            assert!(keys.contains(column));
        }
    }

    #[test]
    fn nested_and_computed_with_exclusions() {
        let options = DictOptions::new().nested().computed().exclude(["rating"]);
        let dict = dict_from_json(Post::meta(), post(), &options).unwrap();
        assert_eq!(dict["public"], json!(true));
        assert!(!dict.contains_key("rating"));
        assert!(!dict.contains_key("cache_key"));
        // Children are one level deep: the user's posts are not rendered.
        assert_eq!(dict["user"], json!({"id": 2, "name": "Bill"}));
        assert_eq!(dict["comments"][0]["body"], json!("hi"));
    }

    #[test]
    fn unloaded_relations_are_skipped() {
        let mut value = post();
        value["user"] = Json::Null;
        let dict = dict_from_json(Post::meta(), value, &DictOptions::new().nested()).unwrap();
        assert!(!dict.contains_key("user"));
    }
}
