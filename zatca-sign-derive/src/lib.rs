//! `#[derive(Validate)]`: generates a `new(..)` constructor that checks every
//! `String` field against the rules named in `#[validate(..)]` attributes.
//!
//! Struct-level rules apply to every field; field-level rules are added on top.
//! `#[validate(skip)]` exempts a field. Failures are reported through
//! `#[validate_error(E)]`, which must implement `From<(&'static str, String)>`
//! (field name, reason); without it the constructor returns `Result<Self, String>`.
use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Type};

mod rules;

fn extract_error_type(attrs: &[Attribute]) -> syn::Result<Option<TokenStream2>> {
    for attr in attrs.iter().filter(|a| a.path().is_ident("validate_error")) {
        let mut ty = None;
        attr.parse_nested_meta(|meta| {
            ty = Some(meta.path.to_token_stream());
            Ok(())
        })?;
        if ty.is_some() {
            return Ok(ty);
        }
    }
    Ok(None)
}

fn extract_rules(attrs: &[Attribute]) -> syn::Result<Vec<syn::Ident>> {
    let mut out = vec![];
    for attr in attrs.iter().filter(|a| a.path().is_ident("validate")) {
        attr.parse_nested_meta(|meta| {
            match meta.path.get_ident() {
                Some(id) => out.push(id.clone()),
                None => return Err(meta.error("expected a rule name")),
            }
            Ok(())
        })?;
    }
    Ok(out)
}

/// Rules apply to `String` fields only.
fn is_string_type(ty: &Type) -> bool {
    match ty {
        Type::Path(p) => p
            .path
            .segments
            .last()
            .map(|s| s.ident == "String")
            .unwrap_or(false),
        _ => false,
    }
}

#[proc_macro_derive(Validate, attributes(validate, validate_error))]
pub fn derive_validate(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    expand(ast)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(ast: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &ast.ident;
    let error_type = extract_error_type(&ast.attrs)?;
    let struct_rules = extract_rules(&ast.attrs)?;

    let fields = match &ast.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(n) => &n.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    struct_name,
                    "Validate supports named structs only",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                struct_name,
                "Validate can only be used on structs",
            ))
        }
    };

    let mut ctor_params = vec![];
    let mut ctor_assigns = vec![];
    let mut validations = vec![];

    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let ty = &field.ty;
        ctor_params.push(quote! { #ident: #ty });
        ctor_assigns.push(quote! { #ident });

        let field_rules = extract_rules(&field.attrs)?;
        if field_rules.iter().any(|r| r == "skip") {
            continue;
        }
        let mut applied: Vec<&syn::Ident> = Vec::new();
        for rule in struct_rules.iter().chain(&field_rules) {
            if !applied.contains(&rule) {
                applied.push(rule);
            }
        }
        if applied.is_empty() {
            continue;
        }
        if !is_string_type(ty) {
            return Err(syn::Error::new_spanned(
                ty,
                format!("validation rules can only be applied to String fields: {ident}"),
            ));
        }

        for rule in applied {
            let check = rules::dispatch(&rule.to_string(), ident)
                .ok_or_else(|| syn::Error::new_spanned(rule, format!("unknown rule `{rule}`")))?;
            validations.push(check);
        }
    }

    let (result_error, fail) = match error_type {
        Some(error_type) => (
            error_type.clone(),
            quote! {
                let __fail = |field: &'static str, reason: ::std::string::String| -> #error_type {
                    <#error_type as ::core::convert::From<(&'static str, ::std::string::String)>>::from((field, reason))
                };
            },
        ),
        None => (
            quote! { ::std::string::String },
            quote! {
                let __fail = |field: &'static str, reason: ::std::string::String| -> ::std::string::String {
                    ::std::format!("{field} {reason}")
                };
            },
        ),
    };

    Ok(quote! {
        impl #struct_name {
            #[allow(clippy::too_many_arguments)]
            pub fn new(
                #(#ctor_params),*
            ) -> ::core::result::Result<Self, #result_error> {
                #fail

                #(
                    #validations
                )*

                Ok(Self {
                    #(#ctor_assigns),*
                })
            }
        }
    })
}
