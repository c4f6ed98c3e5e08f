//! Builtin validation rules.
//!
//! Each rule expands to a statement that returns `Err(__fail(field, reason))` when
//! the field value is rejected.
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::Ident;

/// Characters that would be read as structure inside an RFC 4514 string.
const DN_RESERVED: &str = ",+=\"\\<>;";

pub(crate) fn dispatch(rule: &str, value: &Ident) -> Option<TokenStream2> {
    let field = value.to_string();
    let check = match rule {
        "non_empty" => quote! {
            if #value.trim().is_empty() {
                return Err(__fail(#field, "must be non-empty".into()));
            }
        },
        "no_special_chars" => quote! {
            if #value.contains(|c: char| !(c.is_alphanumeric() || c.is_whitespace())) {
                return Err(__fail(#field, "must not contain special characters".into()));
            }
        },
        "dn_safe" => quote! {
            if #value.contains(|c: char| #DN_RESERVED.contains(c) || c.is_control()) {
                return Err(__fail(
                    #field,
                    ::std::format!("must not contain any of {}", #DN_RESERVED),
                ));
            }
        },
        "is_country_code" => quote! {
            if ::isocountry::CountryCode::for_alpha2(&#value.to_uppercase()).is_err() {
                return Err(__fail(#field, "must be an ISO 3166 alpha-2 country code".into()));
            }
        },
        "vat_number" => quote! {
            if !(#value.len() == 15
                && #value.bytes().all(|b| b.is_ascii_digit())
                && #value.starts_with('3')
                && #value.ends_with('3'))
            {
                return Err(__fail(
                    #field,
                    "must be 15 digits starting and ending with 3".into(),
                ));
            }
        },
        "invoice_type" => quote! {
            if !(#value.len() == 4 && #value.bytes().all(|b| b == b'0' || b == b'1')) {
                return Err(__fail(#field, "must be 4 characters of 0 or 1".into()));
            }
        },
        "egs_serial" => quote! {
            {
                let parts: ::std::vec::Vec<&str> = #value.split('|').collect();
                let well_formed = parts.len() == 3
                    && parts.iter().zip(["1-", "2-", "3-"]).all(|(part, prefix)| {
                        part.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty())
                    });
                if !well_formed {
                    return Err(__fail(
                        #field,
                        "must have the form 1-<solution>|2-<model>|3-<serial>".into(),
                    ));
                }
            }
        },
        _ => return None,
    };
    Some(check)
}
