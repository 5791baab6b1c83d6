//! Derive macros for Kestrel's consensus serialization traits.
//!
//! `#[derive(BtcSerialize)]` and `#[derive(BtcDeserialize)]` generate
//! field-ordered `BitcoinSerialize`/`BitcoinDeserialize` impls. Field order
//! in the struct declaration *is* the wire order, so these derives are only
//! appropriate for types whose declaration mirrors the Bitcoin layout.

extern crate proc_macro;
use proc_macro::TokenStream;

mod deserialize;
mod serialize;

#[proc_macro_derive(BtcSerialize)]
pub fn btc_serialize(input: TokenStream) -> TokenStream {
    let ast = syn::parse_macro_input!(input as syn::DeriveInput);
    serialize::expand(&ast)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

#[proc_macro_derive(BtcDeserialize)]
pub fn btc_deserialize(input: TokenStream) -> TokenStream {
    let ast = syn::parse_macro_input!(input as syn::DeriveInput);
    deserialize::expand(&ast)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}
