//! Proc macros for the zest test runner.
//!
//! This crate provides the `#[zest]` attribute for registering root test
//! functions and `zest_main!()` for the binary that runs them.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitStr};

#[derive(Default)]
struct RootArgs {
    name: Option<LitStr>,
    skip: Option<LitStr>,
    group: Option<LitStr>,
}

/// Register a function as a root zest.
///
/// The function takes `&mut Zest<'_>` and returns `()`, `TestResult` or
/// `anyhow::Result<()>`. Registered roots are discovered and run by
/// `zest_main!()`.
///
/// # Example
///
/// ```rust,ignore
/// use zest::{zest, Zest, TestResult};
///
/// #[zest(group = "storage")]
/// fn zest_cache(z: &mut Zest<'_>) -> TestResult {
///     let mut s = z.scope();
///     s.test("it_evicts_oldest", |_z: &mut Zest<'_>| {});
///     s.run()?;
///     Ok(())
/// }
/// ```
///
/// # Attributes
///
/// - `#[zest(name = "custom_name")]` - Use a custom name instead of function name
/// - `#[zest(skip = "reason")]` - Skip the root unless the reason is bypassed
/// - `#[zest(group = "label")]` - Label the root for `--groups` filtering
#[proc_macro_attribute]
pub fn zest(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = RootArgs::default();
    let parser = syn::meta::parser(|meta| {
        let slot = if meta.path.is_ident("name") {
            &mut args.name
        } else if meta.path.is_ident("skip") {
            &mut args.skip
        } else if meta.path.is_ident("group") {
            &mut args.group
        } else {
            return Err(meta.error("expected `name`, `skip` or `group`"));
        };
        *slot = Some(meta.value()?.parse()?);
        Ok(())
    });
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(item as ItemFn);
    match expand_root(args, input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand_root(args: RootArgs, input: ItemFn) -> syn::Result<TokenStream2> {
    if let Some(asyncness) = &input.sig.asyncness {
        return Err(syn::Error::new_spanned(asyncness, "zest roots cannot be async"));
    }
    if input.sig.inputs.len() != 1 {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "zest roots take exactly one argument: `z: &mut Zest<'_>`",
        ));
    }

    let fn_name = &input.sig.ident;
    let fn_name_str = fn_name.to_string();
    let name = match &args.name {
        Some(lit) => lit.value(),
        None => fn_name_str.clone(),
    };
    let skip = optional(&args.skip);
    let group = optional(&args.group);

    let entry_ident = syn::Ident::new(
        &format!("__ZEST_ROOT_{}", fn_name_str.to_uppercase()),
        fn_name.span(),
    );

    Ok(quote! {
        #input

        #[allow(non_upper_case_globals)]
        #[::zest::__private::linkme::distributed_slice(::zest::__private::ZEST_ROOTS)]
        #[linkme(crate = ::zest::__private::linkme)]
        static #entry_ident: ::zest::__private::RootTest = ::zest::__private::RootTest {
            name: #name,
            func: {
                fn __zest_root(z: &mut ::zest::Zest<'_>) -> ::zest::TestResult {
                    ::zest::IntoTestResult::into_test_result(#fn_name(z))
                }
                __zest_root
            },
            skip: #skip,
            group: #group,
            module_path: module_path!(),
            source: concat!(file!(), ":", line!()),
        };
    })
}

fn optional(lit: &Option<LitStr>) -> TokenStream2 {
    match lit {
        Some(lit) => quote!(::core::option::Option::Some(#lit)),
        None => quote!(::core::option::Option::None),
    }
}

/// Generate the main function for a zest binary.
///
/// Place this at the end of a `harness = false` test target to run every
/// `#[zest]` root it registers.
///
/// # Example
///
/// ```rust,ignore
/// use zest::{zest, zest_main, Zest};
///
/// #[zest]
/// fn zest_one(z: &mut Zest<'_>) {
///     let mut s = z.scope();
///     s.test("it_works", |_z: &mut Zest<'_>| {});
///     s.run().unwrap();
/// }
///
/// zest_main!();
/// ```
#[proc_macro]
pub fn zest_main(_input: TokenStream) -> TokenStream {
    let expanded = quote! {
        fn main() {
            ::zest::harness::zest_binary_main();
        }
    };
    TokenStream::from(expanded)
}
