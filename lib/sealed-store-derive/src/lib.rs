use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Lit, parse_macro_input, spanned::Spanned};

/// Convert snake_case to camelCase
fn to_camel_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = false;

    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Convert CamelCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);

    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Consume the value of a nested meta item we don't care about.
fn skip_meta_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(syn::Token![=]) {
        meta.input.parse::<syn::Token![=]>()?;
        meta.input.parse::<syn::Expr>()?;
    } else if meta.input.peek(syn::token::Paren) {
        meta.parse_nested_meta(|inner| skip_meta_value(&inner))?;
    }
    Ok(())
}

fn parse_str_value(meta: &syn::meta::ParseNestedMeta) -> syn::Result<String> {
    meta.input.parse::<syn::Token![=]>()?;
    match meta.input.parse::<Lit>()? {
        Lit::Str(s) => Ok(s.value()),
        other => Err(syn::Error::new(other.span(), "expected a string literal")),
    }
}

/// Serde settings that change the JSON key of a field.
#[derive(Default)]
struct SerdeField {
    rename: Option<String>,
    skip: bool,
}

fn parse_serde_field(field: &syn::Field) -> syn::Result<SerdeField> {
    let mut serde = SerdeField::default();
    for attr in &field.attrs {
        if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") && meta.input.peek(syn::Token![=]) {
                    serde.rename = Some(parse_str_value(&meta)?);
                } else if meta.path.is_ident("skip") {
                    serde.skip = true;
                } else {
                    skip_meta_value(&meta)?;
                }
                Ok(())
            })?;
        }
    }
    Ok(serde)
}

/// Whether the container renames fields to camelCase. Other `rename_all`
/// styles are rejected since the derived column names would not match.
fn serde_renames_to_camel_case(input: &DeriveInput) -> syn::Result<bool> {
    let mut camel = false;
    for attr in &input.attrs {
        if attr.path().is_ident("serde") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename_all") && meta.input.peek(syn::Token![=]) {
                    let style = parse_str_value(&meta)?;
                    camel = match style.as_str() {
                        "camelCase" => true,
                        "snake_case" => false,
                        other => {
                            return Err(meta.error(format!(
                                "Model supports rename_all = \"camelCase\" or \"snake_case\", not {:?}",
                                other
                            )));
                        }
                    };
                } else {
                    skip_meta_value(&meta)?;
                }
                Ok(())
            })?;
        }
    }
    Ok(camel)
}

/// Map a Rust field type to a `ColumnType` variant name. Unknown types bind
/// by their JSON shape.
fn rust_type_to_column_type(ty: &syn::Type) -> Option<&'static str> {
    let type_str = quote!(#ty).to_string().replace(' ', "");

    // Check for Option<T> - extract inner type
    let inner_type = type_str
        .strip_prefix("Option<")
        .and_then(|inner| inner.strip_suffix('>'))
        .unwrap_or(&type_str);

    match inner_type {
        s if s.contains("DateTime") => Some("Datetime"),
        "u64" | "i64" => Some("BigInt"),
        "u32" | "i32" | "u16" | "i16" | "usize" | "isize" => Some("Integer"),
        "bool" => Some("Boolean"),
        "Value" | "serde_json::Value" => Some("Json"),
        "String" | "str" | "&str" => Some("Text"),
        _ => None,
    }
}

/// Settings from `#[model(...)]`.
#[derive(Default)]
struct ModelAttr {
    table: Option<String>,
    profile: Option<String>,
}

fn parse_model_attr(input: &DeriveInput) -> syn::Result<ModelAttr> {
    let mut model = ModelAttr::default();
    for attr in &input.attrs {
        if attr.path().is_ident("model") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("table") {
                    model.table = Some(parse_str_value(&meta)?);
                } else if meta.path.is_ident("profile") {
                    model.profile = Some(parse_str_value(&meta)?);
                } else {
                    return Err(meta.error("expected `table` or `profile`"));
                }
                Ok(())
            })?;
        }
    }
    Ok(model)
}

/// Settings from `#[field(...)]`.
#[derive(Default)]
struct FieldAttr {
    role: Option<(&'static str, Span)>,
    name: Option<String>,
    column_type: Option<&'static str>,
    skip: bool,
}

fn parse_field_attr(field: &syn::Field) -> syn::Result<FieldAttr> {
    const ROLES: &[(&str, &str)] = &[
        ("pk", "PrimaryKey"),
        ("profile", "ProfileSelector"),
        ("hash", "Hash"),
        ("encrypt", "Encrypt"),
        ("encrypt_no_hash", "EncryptNoHash"),
        ("auto_crypt", "AutoCrypt"),
        ("auto_crypt_no_hash", "AutoCryptNoHash"),
    ];
    const COLUMN_TYPES: &[(&str, &str)] = &[
        ("text", "Text"),
        ("integer", "Integer"),
        ("bigint", "BigInt"),
        ("boolean", "Boolean"),
        ("datetime", "Datetime"),
        ("json", "Json"),
    ];

    let mut parsed = FieldAttr::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("field") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                parsed.skip = true;
                return Ok(());
            }
            if meta.path.is_ident("name") {
                parsed.name = Some(parse_str_value(&meta)?);
                return Ok(());
            }
            if meta.path.is_ident("column_type") {
                let declared = parse_str_value(&meta)?;
                let Some((_, variant)) = COLUMN_TYPES.iter().find(|(key, _)| *key == declared) else {
                    return Err(meta.error(
                        "expected `text`, `integer`, `bigint`, `boolean`, `datetime` or `json`",
                    ));
                };
                parsed.column_type = Some(*variant);
                return Ok(());
            }
            let Some((_, variant)) = ROLES.iter().find(|(key, _)| meta.path.is_ident(key)) else {
                return Err(meta.error(
                    "expected one of `pk`, `profile`, `hash`, `encrypt`, `encrypt_no_hash`, \
                     `auto_crypt`, `auto_crypt_no_hash`, `skip`, `name`, `column_type`",
                ));
            };
            if parsed.role.is_some() {
                return Err(meta.error("a field can only have one role"));
            }
            parsed.role = Some((*variant, meta.path.span()));
            Ok(())
        })?;
    }
    Ok(parsed)
}

/// Derive macro for the `Model` trait
///
/// Generates `Model::schema()`, a schema descriptor listing every serialized
/// field with its role. Field names follow serde: `#[serde(rename = "...")]`
/// and a container-level `#[serde(rename_all = "camelCase")]` are honored, and
/// `#[serde(skip)]` fields are left out.
///
/// ## Container attributes
///
/// - `#[model(table = "...")]` - table name (defaults to the snake_case type name)
/// - `#[model(profile = "...")]` - default crypto profile for this model
///
/// ## Field attributes
///
/// - `#[field(pk)]` - primary key (at most one)
/// - `#[field(profile)]` - holds the crypto profile name for the row (at most one)
/// - `#[field(hash)]`, `#[field(encrypt)]`, `#[field(encrypt_no_hash)]`,
///   `#[field(auto_crypt)]`, `#[field(auto_crypt_no_hash)]` - crypto roles
/// - `#[field(skip)]` - not a column
/// - `#[field(name = "...")]` - column name; must match the serialized key
/// - `#[field(column_type = "...")]` - SQL type used to bind parameters
///   (`text`, `integer`, `bigint`, `boolean`, `datetime`, `json`); inferred
///   from the field's Rust type when omitted
///
/// ## Example
///
/// ```text
/// #[derive(Serialize, Deserialize, Model)]
/// #[model(table = "users")]
/// struct User {
///     #[field(pk)]
///     pub id: Option<i64>,
///     pub username: String,
///     #[field(encrypt)]
///     pub phone: Option<String>,
///     #[field(hash)]
///     pub password: Option<String>,
/// }
/// // Use: let store = RecordStore::for_model::<User>(pool, config)?;
/// ```
#[proc_macro_derive(Model, attributes(model, field))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_model(&input) {
        Ok(tokens) => TokenStream::from(tokens),
        Err(error) => TokenStream::from(error.to_compile_error()),
    }
}

fn expand_model(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new(
                    input.span(),
                    "Model only supports structs with named fields",
                ));
            }
        },
        _ => return Err(syn::Error::new(input.span(), "Model only supports structs")),
    };

    let model = parse_model_attr(input)?;
    let table = model.table.unwrap_or_else(|| to_snake_case(&name.to_string()));
    let camel = serde_renames_to_camel_case(input)?;

    let mut field_names: Vec<String> = Vec::new();
    let mut field_roles: Vec<syn::Ident> = Vec::new();
    let mut typed_names: Vec<String> = Vec::new();
    let mut typed_columns: Vec<syn::Ident> = Vec::new();
    let mut primary_key: Option<Span> = None;
    let mut profile: Option<Span> = None;

    for field in fields.iter() {
        let attr = parse_field_attr(field)?;
        let serde = parse_serde_field(field)?;
        if attr.skip || serde.skip {
            continue;
        }

        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let ident = ident.to_string();
        let ident = ident.strip_prefix("r#").unwrap_or(&ident);
        let column = attr.name.or(serde.rename).unwrap_or_else(|| {
            if camel {
                to_camel_case(ident)
            } else {
                ident.to_string()
            }
        });

        let (variant, span) = attr.role.unwrap_or(("Plain", field.span()));
        let seen = match variant {
            "PrimaryKey" => Some(&mut primary_key),
            "ProfileSelector" => Some(&mut profile),
            _ => None,
        };
        if let Some(seen) = seen {
            if seen.is_some() {
                return Err(syn::Error::new(
                    span,
                    format!("Model `{}` has more than one {} field", name, variant),
                ));
            }
            *seen = Some(span);
        }

        if let Some(column_type) = attr.column_type.or_else(|| rust_type_to_column_type(&field.ty)) {
            typed_names.push(column.clone());
            typed_columns.push(syn::Ident::new(column_type, field.ty.span()));
        }
        field_names.push(column);
        field_roles.push(syn::Ident::new(variant, span));
    }

    let default_profile = match model.profile {
        Some(profile) => quote! { .default_profile(#profile) },
        None => quote! {},
    };

    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::sealed_store::Model for #name #ty_generics #where_clause {
            fn schema() -> Result<::sealed_store::Schema, ::sealed_store::StorageError> {
                ::sealed_store::Schema::builder(#table)
                    #(.field(#field_names, ::sealed_store::FieldRole::#field_roles))*
                    #(.column_type(#typed_names, ::sealed_store::ColumnType::#typed_columns))*
                    #default_profile
                    .build()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn error_of(input: DeriveInput) -> String {
        match expand_model(&input) {
            Ok(_) => panic!("expected an error"),
            Err(error) => error.to_string(),
        }
    }

    #[test]
    fn test_malformed_serde_rename_is_reported() {
        let input: DeriveInput = parse_quote! {
            struct User {
                #[serde(rename = 5)]
                name: String,
            }
        };
        assert_eq!(error_of(input), "expected a string literal");
    }

    #[test]
    fn test_unsupported_rename_all_is_reported() {
        let input: DeriveInput = parse_quote! {
            #[serde(rename_all = "PascalCase")]
            struct User {
                name: String,
            }
        };
        assert!(error_of(input).contains("PascalCase"));
    }

    #[test]
    fn test_duplicate_primary_key_is_reported() {
        let input: DeriveInput = parse_quote! {
            struct User {
                #[field(pk)]
                id: i64,
                #[field(pk)]
                other: i64,
            }
        };
        assert_eq!(error_of(input), "Model `User` has more than one PrimaryKey field");
    }

    #[test]
    fn test_unknown_column_type_is_reported() {
        let input: DeriveInput = parse_quote! {
            struct User {
                #[field(column_type = "money")]
                balance: String,
            }
        };
        assert!(error_of(input).contains("expected `text`"));
    }

    #[test]
    fn test_column_types_inferred_from_rust_types() {
        let cases: Vec<(syn::Type, Option<&str>)> = vec![
            (parse_quote!(Option<i64>), Some("BigInt")),
            (parse_quote!(i32), Some("Integer")),
            (parse_quote!(bool), Some("Boolean")),
            (parse_quote!(Option<chrono::DateTime<chrono::Utc>>), Some("Datetime")),
            (parse_quote!(serde_json::Value), Some("Json")),
            (parse_quote!(Option<String>), Some("Text")),
            (parse_quote!(f64), None),
            (parse_quote!(Vec<String>), None),
        ];
        for (ty, expected) in cases {
            assert_eq!(rust_type_to_column_type(&ty), expected);
        }
    }

    #[test]
    fn test_declared_column_type_overrides_inference() {
        let input: DeriveInput = parse_quote! {
            struct Event {
                #[field(column_type = "datetime")]
                starts_at: String,
            }
        };
        let syn::Data::Struct(data) = &input.data else {
            panic!("expected a struct");
        };
        let field = data.fields.iter().next().unwrap();
        assert_eq!(parse_field_attr(field).unwrap().column_type, Some("Datetime"));
        assert!(expand_model(&input).is_ok());
    }
}
