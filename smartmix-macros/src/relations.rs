use proc_macro2::{Ident, TokenStream};
use quote::{format_ident, quote};

use crate::attrs::{RelationDecl, RelationKind};

/// Collects the distinct, non-null values of `model.#key` into `keys`.
fn collect_keys(key: &Ident) -> TokenStream {
    quote! {
        let mut keys: Vec<::smartmix::Value> = Vec::with_capacity(models.len());
        for model in models.iter() {
            let key = ::smartmix::Value::from(model.#key.clone());
            if !key.is_null() && !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
}

fn has_many_arm(relation: &RelationDecl, field: &Ident, db: &TokenStream) -> TokenStream {
    let name = &relation.name;
    let target = &relation.target;
    let local = format_ident!("{}", relation.local_key);
    let remote = format_ident!("{}", relation.remote_key);
    let remote_column = &relation.remote_key;
    let keys = collect_keys(&local);

    quote! {
        #name => {
            if !node.is_hydrated() {
                #keys
                let mut grouped: ::std::collections::HashMap<String, Vec<#target>> =
                    ::std::collections::HashMap::new();
                if !keys.is_empty() {
                    let children: Vec<#target> = ::std::boxed::Box::pin(
                        ::smartmix::model::fetch_related::<#target, #db>(
                            executor.reborrow(),
                            #remote_column,
                            keys,
                            node.children(),
                        ),
                    )
                    .await?;
                    for child in children {
                        let key = ::smartmix::Value::from(child.#remote.clone()).to_display_string();
                        grouped.entry(key).or_default().push(child);
                    }
                }
                for model in models.iter_mut() {
                    let key = ::smartmix::Value::from(model.#local.clone()).to_display_string();
                    model.#field = Some(grouped.remove(&key).unwrap_or_default());
                }
            } else if !node.children().is_empty() {
                let mut counts: Vec<Option<usize>> = Vec::with_capacity(models.len());
                let mut children: Vec<#target> = Vec::new();
                for model in models.iter_mut() {
                    let taken = model.#field.take();
                    counts.push(taken.as_ref().map(Vec::len));
                    children.extend(taken.into_iter().flatten());
                }
                for child_node in node.children() {
                    ::smartmix::model::load_nested::<#target, #db>(
                        &mut children,
                        child_node,
                        executor.reborrow(),
                    )
                    .await?;
                }
                let mut children = children.into_iter();
                for (model, count) in models.iter_mut().zip(counts) {
                    model.#field = count.map(|n| children.by_ref().take(n).collect());
                }
            }
        },
    }
}

fn belongs_to_arm(relation: &RelationDecl, field: &Ident, db: &TokenStream) -> TokenStream {
    let name = &relation.name;
    let target = &relation.target;
    let local = format_ident!("{}", relation.local_key);
    let remote = format_ident!("{}", relation.remote_key);
    let remote_column = &relation.remote_key;
    let keys = collect_keys(&local);

    quote! {
        #name => {
            if !node.is_hydrated() {
                #keys
                let mut found: ::std::collections::HashMap<String, #target> =
                    ::std::collections::HashMap::new();
                if !keys.is_empty() {
                    let parents: Vec<#target> = ::std::boxed::Box::pin(
                        ::smartmix::model::fetch_related::<#target, #db>(
                            executor.reborrow(),
                            #remote_column,
                            keys,
                            node.children(),
                        ),
                    )
                    .await?;
                    for parent in parents {
                        let key = ::smartmix::Value::from(parent.#remote.clone()).to_display_string();
                        found.insert(key, parent);
                    }
                }
                for model in models.iter_mut() {
                    let key = ::smartmix::Value::from(model.#local.clone()).to_display_string();
                    model.#field = found.get(&key).cloned();
                }
            } else if !node.children().is_empty() {
                let mut present: Vec<bool> = Vec::with_capacity(models.len());
                let mut parents: Vec<#target> = Vec::new();
                for model in models.iter_mut() {
                    let taken = model.#field.take();
                    present.push(taken.is_some());
                    parents.extend(taken);
                }
                for child_node in node.children() {
                    ::smartmix::model::load_nested::<#target, #db>(
                        &mut parents,
                        child_node,
                        executor.reborrow(),
                    )
                    .await?;
                }
                let mut parents = parents.into_iter();
                for (model, present) in models.iter_mut().zip(present) {
                    if present {
                        model.#field = parents.next();
                    }
                }
            }
        },
    }
}

/// Reads one joined child from the row and files it under its parent, once per
/// primary key, then lets the child pick up its own joined relationships.
fn has_many_merge_arm(relation: &RelationDecl, field: &Ident, db: &TokenStream) -> TokenStream {
    let name = &relation.name;
    let target = &relation.target;

    quote! {
        #name => {
            let children = self.#field.get_or_insert_with(Vec::new);
            if let Some(child) = <#target as ::smartmix::Model<#db>>::decode_prefixed(row, prefix)? {
                let key = <#target as ::smartmix::Model<#db>>::primary_key_value(&child)?;
                let mut position = None;
                for (i, existing) in children.iter().enumerate() {
                    if <#target as ::smartmix::Model<#db>>::primary_key_value(existing)? == key {
                        position = Some(i);
                        break;
                    }
                }
                let position = match position {
                    Some(i) => i,
                    None => {
                        children.push(child);
                        children.len() - 1
                    }
                };
                <#target as ::smartmix::Model<#db>>::merge_joined(&mut children[position], row, node.children())?;
            }
        },
    }
}

fn belongs_to_merge_arm(relation: &RelationDecl, field: &Ident, db: &TokenStream) -> TokenStream {
    let name = &relation.name;
    let target = &relation.target;

    quote! {
        #name => {
            if self.#field.is_none() {
                self.#field = <#target as ::smartmix::Model<#db>>::decode_prefixed(row, prefix)?;
            }
            if let Some(parent) = self.#field.as_mut() {
                <#target as ::smartmix::Model<#db>>::merge_joined(parent, row, node.children())?;
            }
        },
    }
}

/// The `load_relation` and `merge_joined` overrides for field-level
/// relationships, or nothing when the struct has none (the trait defaults then
/// apply).
pub fn generate_load_relation(relations: &[RelationDecl], db: &TokenStream) -> TokenStream {
    let mut arms = TokenStream::new();
    let mut merge_arms = TokenStream::new();
    for relation in relations {
        match &relation.field {
            Some((field, RelationKind::HasMany)) => {
                arms.extend(has_many_arm(relation, field, db));
                merge_arms.extend(has_many_merge_arm(relation, field, db));
            }
            Some((field, RelationKind::BelongsTo)) => {
                arms.extend(belongs_to_arm(relation, field, db));
                merge_arms.extend(belongs_to_merge_arm(relation, field, db));
            }
            None => {}
        }
    }
    if arms.is_empty() {
        return TokenStream::new();
    }

    quote! {
        fn load_relation<'e>(
            models: &mut [Self],
            node: &::smartmix::LoadNode,
            executor: ::smartmix::Executor<'e, #db>,
        ) -> impl ::std::future::Future<Output = ::smartmix::SmartmixResult<()>> + Send {
            async move {
                let mut executor = executor;
                ::smartmix::tracing::debug!(
                    relation = node.relation(),
                    strategy = %node.strategy(),
                    hydrated = node.is_hydrated(),
                    "smartmix eager load"
                );
                match node.relation() {
                    #arms
                    other => {
                        ::smartmix::tracing::warn!("smartmix relation '{}' has no loader field", other);
                    }
                }
                Ok(())
            }
        }

        fn merge_joined(
            &mut self,
            row: &<#db as ::smartmix::sqlx::Database>::Row,
            nodes: &[::smartmix::LoadNode],
        ) -> ::smartmix::SmartmixResult<()> {
            for node in nodes {
                let Some(prefix) = node.prefix() else {
                    continue;
                };
                match node.relation() {
                    #merge_arms
                    other => {
                        ::smartmix::tracing::warn!("smartmix relation '{}' has no loader field", other);
                    }
                }
            }
            Ok(())
        }
    }
}
