//! Proc macros for the flat-config crate.
//!
//! This crate provides the `#[record]` attribute macro

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Attribute, Fields, Ident, ItemStruct, LitStr, Token, Type,
    parse::{Parse, ParseStream},
    parse_macro_input, parse_quote,
    spanned::Spanned,
};

/// Parsed arguments of `#[record(...)]` on the struct itself.
struct RecordArgs {
    name: Option<LitStr>,
}

impl Parse for RecordArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut name = None;

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            if ident == "name" {
                name = Some(input.parse()?);
            } else {
                return Err(syn::Error::new(ident.span(), "expected `name`"));
            }

            // Consume optional trailing comma
            let _ = input.parse::<Token![,]>();
        }

        Ok(Self { name })
    }
}

/// A field together with the configuration path declared on it.
struct TaggedField {
    path: String,
    ty: Type,
}

/// Extracts `#[record(path = "...")]` from a field's attributes, removing it.
fn take_path(attrs: &mut Vec<Attribute>) -> syn::Result<Option<LitStr>> {
    let mut path = None;
    let mut error = None;

    attrs.retain(|attr| {
        if !attr.path().is_ident("record") {
            return true;
        }

        let parsed = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("path") {
                path = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(syn::Error::new(
                    meta.path.span(),
                    format!("unknown record attribute: {:?}", meta.path.get_ident()),
                ))
            }
        });

        if let Err(e) = parsed {
            error = Some(e);
        }
        false
    });

    match error {
        Some(e) => Err(e),
        None => Ok(path),
    }
}

fn validate_path(lit: &LitStr) -> syn::Result<String> {
    let value = lit.value();
    if value.is_empty() || value.split('.').any(str::is_empty) {
        return Err(syn::Error::new(
            lit.span(),
            "record path must be a non-empty dotted name",
        ));
    }
    Ok(value)
}

/// Attribute macro describing a record that can be bound from a flat store.
///
/// The macro:
/// - derives `serde::Deserialize` for the struct
/// - renames every `#[record(path = "...")]` field to its path and marks it
///   `#[serde(default)]`; untagged fields are skipped
/// - implements `Shape` and `Record`
/// - registers non-generic records with `inventory`
///
/// # Example
///
/// ```rust,ignore
/// use flat_config::record;
///
/// #[record]
/// #[derive(Debug, Default)]
/// struct Server {
///     #[record(path = "host")]
///     host: String,
///     #[record(path = "port")]
///     port: u16,
/// }
///
/// #[record]
/// #[derive(Debug, Default)]
/// struct AppConfig {
///     #[record(path = "servers")]
///     servers: Vec<Server>,
/// }
/// ```
#[proc_macro_attribute]
pub fn record(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(args as RecordArgs);
    let input = parse_macro_input!(item as ItemStruct);

    match record_impl(args, input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn record_impl(args: RecordArgs, mut input: ItemStruct) -> syn::Result<proc_macro2::TokenStream> {
    let Fields::Named(named) = &mut input.fields else {
        return Err(syn::Error::new(
            input.ident.span(),
            "#[record] requires a struct with named fields",
        ));
    };

    let mut tagged = Vec::new();
    for field in named.named.iter_mut() {
        match take_path(&mut field.attrs)? {
            Some(lit) => {
                let path = validate_path(&lit)?;
                field
                    .attrs
                    .push(parse_quote!(#[serde(rename = #path, default)]));
                tagged.push(TaggedField {
                    path,
                    ty: field.ty.clone(),
                });
            }
            None => field.attrs.push(parse_quote!(#[serde(skip)])),
        }
    }

    input
        .attrs
        .push(parse_quote!(#[derive(::flat_config::__private::serde::Deserialize)]));
    input
        .attrs
        .push(parse_quote!(#[serde(crate = "::flat_config::__private::serde")]));

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let mut shape_where = where_clause.cloned().unwrap_or_else(|| parse_quote!(where));
    for field in &tagged {
        let ty = &field.ty;
        shape_where
            .predicates
            .push(parse_quote!(#ty: ::flat_config::Shape));
    }
    let mut record_where = shape_where.clone();
    record_where.predicates.push(parse_quote!(
        Self: ::flat_config::__private::serde::de::DeserializeOwned
    ));

    let describe = tagged.iter().map(|field| {
        let (path, ty) = (&field.path, &field.ty);
        quote! {
            <#ty as ::flat_config::Shape>::describe(
                &::flat_config::shape::join(prefix, #path),
                shapes,
            );
        }
    });

    let fields = tagged.iter().map(|field| {
        let (path, ty) = (&field.path, &field.ty);
        quote! {
            ::flat_config::FieldPath {
                path: #path,
                record: <#ty as ::flat_config::Shape>::IS_RECORD,
            }
        }
    });

    let type_identity = args.name.map(|name| {
        quote! {
            fn type_identity() -> &'static str {
                #name
            }
        }
    });

    // Generic records have no single type to register.
    let registration = input.generics.params.is_empty().then(|| {
        quote! {
            ::flat_config::__private::inventory::submit! {
                ::flat_config::RegisteredRecord::new::<#ident>()
            }
        }
    });

    Ok(quote! {
        #input

        impl #impl_generics ::flat_config::Shape for #ident #ty_generics #shape_where {
            const IS_RECORD: bool = true;

            fn describe(prefix: &str, shapes: &mut ::flat_config::ShapeMap) {
                #(#describe)*
            }
        }

        impl #impl_generics ::flat_config::Record for #ident #ty_generics #record_where {
            const FIELDS: &'static [::flat_config::FieldPath] = &[#(#fields),*];

            #type_identity
        }

        #registration
    })
}
