//! Derive macro for field-ordered wire encoding.
//!
//! `#[derive(WireCodec)]` implements `Encodable` and `Decodable` from the
//! `bitcoin` consensus module by visiting every field in declaration order.
//! The generated code refers to `crate::consensus` and `crate::io`, so the
//! macro is meant to be used from inside `blockchain-p2p`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

/// Derives consensus `Encodable` and `Decodable` for a struct.
///
/// Named and tuple structs are supported. Unit structs encode to zero bytes.
///
/// ```ignore
/// #[derive(WireCodec)]
/// struct FeeFilter {
///     fee_rate: i64,
/// }
/// ```
#[proc_macro_derive(WireCodec)]
pub fn derive_wire_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        Data::Enum(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "WireCodec cannot be derived for enums",
            ));
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "WireCodec cannot be derived for unions",
            ));
        }
    };

    let (encode_body, decode_body) = match fields {
        Fields::Named(named) => {
            let idents: Vec<_> = named.named.iter().filter_map(|f| f.ident.as_ref()).collect();
            let encode = quote! {
                #(
                    len = len.saturating_add(
                        crate::consensus::Encodable::consensus_encode(&self.#idents, writer)?,
                    );
                )*
            };
            let decode = quote! {
                Ok(#name {
                    #(#idents: crate::consensus::Decodable::consensus_decode(reader)?,)*
                })
            };
            (encode, decode)
        }
        Fields::Unnamed(unnamed) => {
            let indices: Vec<_> = (0..unnamed.unnamed.len()).map(syn::Index::from).collect();
            let decoders = indices
                .iter()
                .map(|_| quote! { crate::consensus::Decodable::consensus_decode(reader)? });
            let encode = quote! {
                #(
                    len = len.saturating_add(
                        crate::consensus::Encodable::consensus_encode(&self.#indices, writer)?,
                    );
                )*
            };
            let decode = quote! { Ok(#name(#(#decoders),*)) };
            (encode, decode)
        }
        Fields::Unit => (quote! {}, quote! { Ok(#name) }),
    };

    let reader_unused = if matches!(fields, Fields::Unit) {
        quote! { let _ = reader; }
    } else {
        quote! {}
    };
    let writer_unused = if matches!(fields, Fields::Unit) {
        quote! { let _ = writer; }
    } else {
        quote! {}
    };

    Ok(quote! {
        impl #impl_generics crate::consensus::Encodable for #name #ty_generics #where_clause {
            #[inline]
            fn consensus_encode<W: crate::io::Write + ?Sized>(
                &self,
                writer: &mut W,
            ) -> core::result::Result<usize, crate::io::Error> {
                #writer_unused
                #[allow(unused_mut)]
                let mut len: usize = 0;
                #encode_body
                Ok(len)
            }
        }

        impl #impl_generics crate::consensus::Decodable for #name #ty_generics #where_clause {
            #[inline]
            fn consensus_decode<R: crate::io::Read + ?Sized>(
                reader: &mut R,
            ) -> core::result::Result<Self, crate::consensus::EncodeDecodeError> {
                #reader_unused
                #decode_body
            }
        }
    })
}
