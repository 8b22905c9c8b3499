use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{Expr, ItemFn, Meta, Token, parse_macro_input};

/// Test attribute that installs tracing before the body runs.
///
/// Sync functions become `#[test]`. Async functions become `#[tokio::test]`
/// with every argument forwarded, except `timeout_ms = <expr>`, which fails
/// the test if the body has not finished within that many (tokio) milliseconds.
/// Workers racing a schema change or polling for convergence hang rather than
/// fail when something is wrong, so scenario tests set it.
///
/// ```ignore
/// #[replcheck::test]
/// fn parses() { ... }
///
/// #[replcheck::test(flavor = "multi_thread", worker_threads = 4, timeout_ms = 10_000)]
/// async fn converges() { ... }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr with Punctuated::<Meta, Token![,]>::parse_terminated);
    let input = parse_macro_input!(item as ItemFn);

    let mut timeout_ms: Option<Expr> = None;
    let mut runtime_args: Vec<Meta> = Vec::new();
    for arg in args {
        match &arg {
            Meta::NameValue(nv) if nv.path.is_ident("timeout_ms") => {
                timeout_ms = Some(nv.value.clone());
            }
            _ => runtime_args.push(arg),
        }
    }

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = &input.sig.ident;

    if sig.asyncness.is_none() {
        if !runtime_args.is_empty() || timeout_ms.is_some() {
            return syn::Error::new_spanned(
                sig.fn_token,
                "replcheck::test arguments are only supported on async tests",
            )
            .to_compile_error()
            .into();
        }
        return quote! {
            #[test]
            #(#attrs)*
            #vis #sig {
                replcheck::trace::with_test_tracing_sync(stringify!(#name), || #block)
            }
        }
        .into();
    }

    let runtime = if runtime_args.is_empty() {
        quote! { #[tokio::test] }
    } else {
        quote! { #[tokio::test(#(#runtime_args),*)] }
    };

    let body = match timeout_ms {
        Some(ms) => quote! {
            tokio::time::timeout(std::time::Duration::from_millis(#ms), async move #block)
                .await
                .unwrap_or_else(|_| panic!("{} timed out after {} ms", stringify!(#name), #ms))
        },
        None => quote! { #block },
    };

    quote! {
        #runtime
        #(#attrs)*
        #vis #sig {
            replcheck::trace::with_test_tracing(stringify!(#name), || async move { #body }).await
        }
    }
    .into()
}
