use proc_macro::TokenStream;
use proc_macro2::{Ident, Span, TokenStream as TokenStream2};
use proc_macro_crate::{FoundCrate, crate_name};
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Implements `calmform::form::FormValues` for a struct with named fields. Each field
/// maps to the form field of the same name.
#[proc_macro_derive(FormValues)]
pub fn derive_form_values(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(
            input.ident,
            "FormValues derive currently supports only non-generic structs",
        )
        .to_compile_error()
        .into();
    }

    let model_ident = input.ident;

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields.named,
            _ => {
                return syn::Error::new(
                    Span::call_site(),
                    "FormValues derive requires a struct with named fields",
                )
                .to_compile_error()
                .into();
            }
        },
        _ => {
            return syn::Error::new(
                Span::call_site(),
                "FormValues derive is only supported on structs",
            )
            .to_compile_error()
            .into();
        }
    };

    let calmform = calmform_path();
    let mut inserts = Vec::new();
    let mut reads = Vec::new();

    for field in named_fields {
        let Some(field_ident) = field.ident else {
            continue;
        };
        let field_name = field_ident.to_string();

        inserts.push(quote! {
            values.insert(
                #calmform::form::FieldKey::new(#field_name),
                #calmform::form::FieldValue::from(self.#field_ident),
            );
        });

        reads.push(quote! {
            #field_ident: #calmform::form::read_field(fields, #field_name)?
        });
    }

    quote! {
        impl #calmform::form::FormValues for #model_ident {
            fn into_values(
                self,
            ) -> ::std::collections::BTreeMap<#calmform::form::FieldKey, #calmform::form::FieldValue> {
                let mut values = ::std::collections::BTreeMap::new();
                #(#inserts)*
                values
            }

            fn from_fields<E>(
                fields: &#calmform::form::FieldMap<E>,
            ) -> #calmform::form::FormResult<Self> {
                Ok(Self {
                    #(#reads,)*
                })
            }
        }
    }
    .into()
}

fn calmform_path() -> TokenStream2 {
    match crate_name("calmform") {
        Ok(FoundCrate::Name(name)) => {
            let ident = Ident::new(&name, Span::call_site());
            quote!(::#ident)
        }
        Ok(FoundCrate::Itself) => quote!(crate),
        Err(_) => quote!(::calmform),
    }
}
