use proc_macro2::TokenStream;
use quote::quote;

pub fn expand(ast: &syn::DeriveInput) -> syn::Result<TokenStream> {
    let name = &ast.ident;
    let data = match &ast.data {
        syn::Data::Struct(data) => data,
        _ => {
            // Enum wire layouts carry discriminant tags that differ per type
            // (inventory codes, input kinds, ...), so enums spell out their
            // impls by hand.
            return Err(syn::Error::new_spanned(
                name,
                "BtcDeserialize can only be derived for structs",
            ));
        }
    };

    let reads: Vec<TokenStream> = data
        .fields
        .iter()
        .map(|field| {
            let ty = &field.ty;
            match &field.ident {
                Some(ident) => quote! {
                    #ident: <#ty as BitcoinDeserialize>::bitcoin_deserialize(&mut reader)?,
                },
                None => quote! {
                    <#ty as BitcoinDeserialize>::bitcoin_deserialize(&mut reader)?,
                },
            }
        })
        .collect();

    let body = match data.fields {
        syn::Fields::Unnamed(_) => quote! { Ok(#name ( #(#reads)* )) },
        _ => quote! { Ok(#name { #(#reads)* }) },
    };

    Ok(quote! {
        impl BitcoinDeserialize for #name {
            fn bitcoin_deserialize<R: std::io::Read>(
                mut reader: R,
            ) -> Result<Self, SerializationError> {
                #body
            }
        }
    })
}
