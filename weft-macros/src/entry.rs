use proc_macro2::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::spanned::Spanned;

// syn::AttributeArgs does not implement syn::Parse
type AttributeArgs = syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>;

pub(crate) fn main(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, false)
}

pub(crate) fn test(args: TokenStream, item: TokenStream) -> TokenStream {
    expand(args, item, true)
}

fn expand(args: TokenStream, item: TokenStream, is_test: bool) -> TokenStream {
    // Even when validation fails we emit the (de-asynced) function next to
    // the error, so IDE features on the item keep working.
    let input: syn::ItemFn = match syn::parse2(item.clone()) {
        Ok(input) => input,
        Err(err) => return with_error(item, err),
    };

    match validate(&input, is_test).and_then(|_| parse_config(args)) {
        Ok(config) => expand_fn(input, is_test, config),
        Err(err) => {
            let fallback = expand_fn(input, is_test, Config::default());
            with_error(fallback, err)
        }
    }
}

#[derive(Default)]
struct Config {
    worker_threads: Option<usize>,
}

fn validate(input: &syn::ItemFn, is_test: bool) -> Result<(), syn::Error> {
    if input.sig.asyncness.is_none() {
        let msg = "the `async` keyword is missing from the function declaration";
        return Err(syn::Error::new_spanned(input.sig.fn_token, msg));
    }

    if !is_test && input.sig.ident == "main" && !input.sig.inputs.is_empty() {
        let msg = "the main function cannot accept arguments";
        return Err(syn::Error::new_spanned(&input.sig.ident, msg));
    }

    if is_test {
        if let Some(attr) = input.attrs.iter().find(|attr| attr.path().is_ident("test")) {
            let msg = "second test attribute is supplied, consider removing it";
            return Err(syn::Error::new_spanned(attr, msg));
        }
    }

    Ok(())
}

fn parse_config(args: TokenStream) -> Result<Config, syn::Error> {
    let mut config = Config::default();

    for meta in AttributeArgs::parse_terminated.parse2(args)? {
        let name_value = match &meta {
            syn::Meta::NameValue(name_value) => name_value,
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected `worker_threads = <non-zero integer>`",
                ));
            }
        };

        if !name_value.path.is_ident("worker_threads") {
            return Err(syn::Error::new_spanned(
                &name_value.path,
                "unknown attribute; `worker_threads` is the only supported option",
            ));
        }
        if config.worker_threads.is_some() {
            return Err(syn::Error::new_spanned(
                name_value,
                "`worker_threads` set multiple times",
            ));
        }

        config.worker_threads = Some(parse_worker_threads(&name_value.value)?);
    }

    Ok(config)
}

fn parse_worker_threads(value: &syn::Expr) -> Result<usize, syn::Error> {
    let span = value.span();
    let parsed = match value {
        syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Int(lit),
            ..
        }) => lit.base10_parse::<usize>().map_err(|err| {
            syn::Error::new(span, format!("failed to parse `worker_threads`: {err}"))
        })?,
        _ => {
            return Err(syn::Error::new(
                span,
                "`worker_threads` takes an integer literal",
            ));
        }
    };

    if parsed == 0 {
        return Err(syn::Error::new(span, "`worker_threads` may not be 0"));
    }
    Ok(parsed)
}

fn expand_fn(mut input: syn::ItemFn, is_test: bool, config: Config) -> TokenStream {
    input.sig.asyncness = None;

    let mut rt = quote! { weft::runtime::Builder::new() };
    if let Some(worker_threads) = config.worker_threads {
        rt = quote! { #rt.worker_threads(#worker_threads) };
    }

    let generated_attrs = if is_test {
        quote! { #[::core::prelude::v1::test] }
    } else {
        quote! {}
    };

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;

    quote! {
        #(#attrs)*
        #generated_attrs
        #vis #sig {
            let body = async #block;
            #rt.try_build()
                .expect("Failed building the Runtime")
                .block_on(body)
        }
    }
}

fn with_error(mut tokens: TokenStream, error: syn::Error) -> TokenStream {
    tokens.extend(error.into_compile_error());
    tokens
}
