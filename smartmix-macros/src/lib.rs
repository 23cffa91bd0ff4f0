use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, parse_macro_input};

mod attrs;
mod relations;

use attrs::{EntityAttrs, FieldAttrs, snake_case};

/// Derives `smartmix::Entity`, `sqlx::FromRow` and `smartmix::Model`.
///
/// ```ignore
/// #[derive(Entity, Serialize, Debug, Clone)]
/// #[smartmix(table = "posts", repr(body, user), property(public = post_public))]
/// struct Post {
///     id: i64,
///     body: String,
///     user_id: i64,
///     #[smartmix(belongs_to(User))]
///     user: Option<User>,
///     #[smartmix(has_many(Comment))]
///     comments: Option<Vec<Comment>>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(smartmix))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match derive_entity_impl(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(err) => TokenStream::from(err.to_compile_error()),
    }
}

fn database_type(ident: &Ident) -> syn::Result<TokenStream2> {
    match ident.to_string().as_str() {
        "sqlite" => Ok(quote! { ::smartmix::sqlx::Sqlite }),
        "postgres" => Ok(quote! { ::smartmix::sqlx::Postgres }),
        "mysql" => Ok(quote! { ::smartmix::sqlx::MySql }),
        _ => Err(syn::Error::new_spanned(
            ident,
            "expected one of `sqlite`, `postgres`, `mysql`",
        )),
    }
}

fn derive_entity_impl(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "smartmix Entity does not support generic structs",
        ));
    }

    let all_fields = if let Data::Struct(data) = &input.data {
        if let Fields::Named(fields) = &data.fields {
            &fields.named
        } else {
            return Err(syn::Error::new_spanned(
                &data.fields,
                "smartmix Entity only supports structs with named fields",
            ));
        }
    } else {
        return Err(syn::Error::new_spanned(
            input,
            "smartmix Entity only supports structs",
        ));
    };

    let mut entity = EntityAttrs::parse(&input.attrs, struct_name)?;
    let mut column_idents = Vec::new();
    let mut column_types = Vec::new();
    let mut skipped_idents = Vec::new();

    for field in all_fields {
        let field_attrs = FieldAttrs::parse(field, struct_name)?;
        let ident = field.ident.as_ref().ok_or_else(|| {
            syn::Error::new_spanned(field, "smartmix Entity only supports named fields")
        })?;
        if let Some(relation) = field_attrs.relation {
            entity.relations.push(relation);
            skipped_idents.push(ident);
        } else if field_attrs.ignore {
            skipped_idents.push(ident);
        } else {
            column_idents.push(ident);
            column_types.push(&field.ty);
        }
    }

    let column_names: Vec<String> = column_idents.iter().map(|ident| ident.to_string()).collect();
    let entity_name = struct_name.to_string();
    let table = entity
        .table
        .clone()
        .unwrap_or_else(|| snake_case(&entity_name) + "s");

    let primary_keys = &entity.primary_keys;
    let relation_calls = entity.relations.iter().map(|relation| {
        let name = &relation.name;
        let target = &relation.target;
        let local = &relation.local_key;
        let remote = &relation.remote_key;
        quote! {
            .relation(#name, <#target as ::smartmix::Entity>::meta, #local, #remote)
        }
    });
    let property_calls = entity.properties.iter().map(|(name, func)| {
        quote! { .property(#name, #func) }
    });
    let method_calls = entity.methods.iter().map(|(name, func)| {
        quote! { .method(#name, #func) }
    });
    let repr = &entity.repr;
    let repr_max_length = entity
        .repr_max_length
        .map(|length| quote! { .repr_max_length(#length) });
    let timestamps = entity.timestamps.then(|| quote! { .timestamps() });

    let entity_impl = quote! {
        impl ::smartmix::Entity for #struct_name {
            fn meta() -> &'static ::smartmix::EntityMeta {
                static META: ::std::sync::OnceLock<::smartmix::EntityMeta> = ::std::sync::OnceLock::new();
                META.get_or_init(|| {
                    ::smartmix::EntityMeta::builder(#entity_name, #table)
                        #( .primary_key(#primary_keys) )*
                        .columns(&[ #( #column_names ),* ])
                        #( #relation_calls )*
                        #( #property_calls )*
                        #( #method_calls )*
                        .repr(&[ #( #repr ),* ])
                        #repr_max_length
                        #timestamps
                        .build()
                })
            }
        }
    };

    let from_row_impl = quote! {
        impl<'r, R> ::smartmix::sqlx::FromRow<'r, R> for #struct_name
        where
            R: ::smartmix::sqlx::Row,
            #(
                #column_types: ::smartmix::sqlx::Type<R::Database> + ::smartmix::sqlx::Decode<'r, R::Database>,
            )*
            for<'c> &'c str: ::smartmix::sqlx::ColumnIndex<R>,
        {
            fn from_row(row: &'r R) -> Result<Self, ::smartmix::sqlx::Error> {
                use ::smartmix::sqlx::Row;
                Ok(Self {
                    #(
                        #column_idents: row.try_get(#column_names)?,
                    )*
                    #(
                        #skipped_idents: ::std::default::Default::default(),
                    )*
                })
            }
        }
    };

    let model_impls = if entity.custom_loader {
        TokenStream2::new()
    } else {
        if entity.databases.is_empty() {
            entity.databases.push(Ident::new("sqlite", proc_macro2::Span::call_site()));
        }
        let pk_name = entity.primary_keys.first().map(String::as_str).unwrap_or("id");
        let primary_key_value = column_idents
            .iter()
            .find(|ident| **ident == pk_name)
            .map(|pk| {
                quote! {
                    fn primary_key_value(&self) -> ::smartmix::SmartmixResult<::smartmix::Value> {
                        Ok(::smartmix::Value::from(::std::clone::Clone::clone(&self.#pk)))
                    }
                }
            });

        let mut impls = TokenStream2::new();
        for db in &entity.databases {
            let db = database_type(db)?;
            let loader = relations::generate_load_relation(&entity.relations, &db);
            impls.extend(quote! {
                impl ::smartmix::Model<#db> for #struct_name {
                    #primary_key_value

                    fn decode_prefixed(
                        row: &<#db as ::smartmix::sqlx::Database>::Row,
                        prefix: &str,
                    ) -> Result<Option<Self>, ::smartmix::sqlx::Error> {
                        use ::smartmix::sqlx::Row;
                        if ::smartmix::model::joined_row_is_null::<Self, #db>(row, prefix)? {
                            return Ok(None);
                        }
                        Ok(Some(Self {
                            #(
                                #column_idents: row.try_get(
                                    ::smartmix::model::prefixed_column(prefix, #column_names).as_str(),
                                )?,
                            )*
                            #(
                                #skipped_idents: ::std::default::Default::default(),
                            )*
                        }))
                    }

                    #loader
                }
            });
        }
        impls
    };

    Ok(quote! {
        #entity_impl
        #from_row_impl
        #model_impls
    })
}

#[cfg(test)]
mod tests {
    use syn::parse_quote;

    use super::*;

    #[test]
    fn emits_metadata_with_default_table() {
        let input: DeriveInput = parse_quote! {
            struct BlogPost {
                id: i64,
                title: String,
            }
        };
        let tokens = derive_entity_impl(&input).unwrap().to_string();
        assert!(tokens.contains("builder (\"BlogPost\" , \"blog_posts\")"));
        assert!(tokens.contains("\"id\" , \"title\""));
        assert!(tokens.contains("impl :: smartmix :: Model < :: smartmix :: sqlx :: Sqlite > for BlogPost"));
    }

    #[test]
    fn joined_columns_decode_under_a_prefix() {
        let input: DeriveInput = parse_quote! {
            #[smartmix(table = "users")]
            struct User {
                id: i64,
                name: String,
                #[smartmix(has_many(Post))]
                posts: Option<Vec<Post>>,
            }
        };
        let tokens = derive_entity_impl(&input).unwrap().to_string();
        assert!(tokens.contains("fn decode_prefixed"));
        assert!(tokens.contains("joined_row_is_null :: < Self , :: smartmix :: sqlx :: Sqlite > (row , prefix)"));
        assert!(tokens.contains("prefixed_column (prefix , \"name\")"));
        assert!(tokens.contains("posts : :: std :: default :: Default :: default ()"));
        assert!(tokens.contains(":: smartmix :: Value :: from (:: std :: clone :: Clone :: clone (& self . id))"));
    }

    #[test]
    fn relation_fields_are_not_columns() {
        let input: DeriveInput = parse_quote! {
            #[smartmix(table = "posts")]
            struct Post {
                id: i64,
                user_id: i64,
                #[smartmix(belongs_to(User))]
                user: Option<User>,
                #[smartmix(ignore)]
                cache: Option<String>,
            }
        };
        let tokens = derive_entity_impl(&input).unwrap().to_string();
        assert!(tokens.contains("columns (& [\"id\" , \"user_id\"])"));
        assert!(tokens.contains(". relation (\"user\" , < User as :: smartmix :: Entity > :: meta , \"user_id\" , \"id\")"));
        assert!(tokens.contains("user : :: std :: default :: Default :: default ()"));
        assert!(tokens.contains("cache : :: std :: default :: Default :: default ()"));
        assert!(tokens.contains("fn load_relation"));
    }

    #[test]
    fn computed_attributes_and_repr() {
        let input: DeriveInput = parse_quote! {
            #[smartmix(property(public = post_public), method(is_public = post_is_public))]
            #[smartmix(repr(body), repr_max_length = 20, timestamps)]
            struct Post {
                id: i64,
                body: String,
            }
        };
        let tokens = derive_entity_impl(&input).unwrap().to_string();
        assert!(tokens.contains(". property (\"public\" , post_public)"));
        assert!(tokens.contains(". method (\"is_public\" , post_is_public)"));
        assert!(tokens.contains(". repr (& [\"body\"])"));
        assert!(tokens.contains(". repr_max_length (20usize)"));
        assert!(tokens.contains(". timestamps ()"));
    }

    #[test]
    fn custom_loader_skips_model_impl() {
        let input: DeriveInput = parse_quote! {
            #[smartmix(custom_loader)]
            struct Post {
                id: i64,
            }
        };
        let tokens = derive_entity_impl(&input).unwrap().to_string();
        assert!(!tokens.contains("smartmix :: Model"));
        assert!(tokens.contains("smartmix :: Entity for Post"));
    }

    #[test]
    fn one_model_impl_per_database() {
        let input: DeriveInput = parse_quote! {
            #[smartmix(db(sqlite, postgres))]
            struct Post {
                id: i64,
            }
        };
        let tokens = derive_entity_impl(&input).unwrap().to_string();
        assert!(tokens.contains("Model < :: smartmix :: sqlx :: Sqlite >"));
        assert!(tokens.contains("Model < :: smartmix :: sqlx :: Postgres >"));
    }

    #[test]
    fn rejects_unsupported_shapes() {
        let tuple: DeriveInput = parse_quote! {
            struct Post(i64, String);
        };
        let err = derive_entity_impl(&tuple).unwrap_err();
        assert!(err.to_string().contains("named fields"));

        let enumeration: DeriveInput = parse_quote! {
            enum Post { A }
        };
        let err = derive_entity_impl(&enumeration).unwrap_err();
        assert!(err.to_string().contains("only supports structs"));

        let unknown_db: DeriveInput = parse_quote! {
            #[smartmix(db(oracle))]
            struct Post { id: i64 }
        };
        let err = derive_entity_impl(&unknown_db).unwrap_err();
        assert!(err.to_string().contains("expected one of"));
    }
}
