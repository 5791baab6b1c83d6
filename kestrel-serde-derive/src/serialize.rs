use proc_macro2::TokenStream;
use quote::quote;

pub fn expand(ast: &syn::DeriveInput) -> syn::Result<TokenStream> {
    let name = &ast.ident;
    match &ast.data {
        syn::Data::Struct(data) => {
            let writes: Vec<TokenStream> = data
                .fields
                .iter()
                .enumerate()
                .map(|(index, field)| write_field(field, index))
                .collect();

            Ok(quote! {
                impl BitcoinSerialize for #name {
                    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
                    where
                        W: std::io::Write,
                    {
                        #(#writes)*
                        Ok(())
                    }
                }
            })
        }
        syn::Data::Enum(data) => {
            let arms: Vec<TokenStream> = data
                .variants
                .iter()
                .map(|variant| write_variant(variant, name))
                .collect();

            Ok(quote! {
                impl BitcoinSerialize for #name {
                    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
                    where
                        W: std::io::Write,
                    {
                        match self {
                            #(#arms)*
                        }
                        Ok(())
                    }
                }
            })
        }
        syn::Data::Union(_) => Err(syn::Error::new_spanned(
            name,
            "BtcSerialize cannot be derived for unions",
        )),
    }
}

fn write_field(field: &syn::Field, index: usize) -> TokenStream {
    match &field.ident {
        Some(ident) => quote! { self.#ident.bitcoin_serialize(&mut target)?; },
        None => {
            let index = syn::Index::from(index);
            quote! { self.#index.bitcoin_serialize(&mut target)?; }
        }
    }
}

fn write_variant(variant: &syn::Variant, name: &syn::Ident) -> TokenStream {
    let ident = &variant.ident;

    match &variant.fields {
        syn::Fields::Named(fields) => {
            let bindings: Vec<&syn::Ident> = fields
                .named
                .iter()
                .map(|field| field.ident.as_ref().expect("named field has an ident"))
                .collect();
            let writes = bindings
                .iter()
                .map(|binding| quote! { #binding.bitcoin_serialize(&mut target)?; });
            quote! {
                #name::#ident { #(ref #bindings),* } => { #(#writes)* }
            }
        }
        syn::Fields::Unnamed(fields) => {
            let bindings: Vec<syn::Ident> = (0..fields.unnamed.len())
                .map(|index| quote::format_ident!("field_{}", index))
                .collect();
            let writes = bindings
                .iter()
                .map(|binding| quote! { #binding.bitcoin_serialize(&mut target)?; });
            quote! {
                #name::#ident ( #(ref #bindings),* ) => { #(#writes)* }
            }
        }
        syn::Fields::Unit => quote! { #name::#ident => {} },
    }
}
