//! Augment the shorthash test suites with procedural macros.
//!
//! Expanded code refers to `::tracing`, `::tracing_subscriber` and (for `async` tests)
//! `::tokio` directly, so crates using these macros must list them as dev-dependencies.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, Error, Ident, ItemFn, LitStr};

/// Levels accepted by [macro@test_traced].
const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Run a test with a `tracing` subscriber installed that writes to the test harness.
///
/// An optional string literal selects the maximum level (defaults to `"DEBUG"`). When applied
/// to an `async fn`, the body is driven to completion on a fresh current-thread Tokio runtime
/// with time and I/O enabled.
///
/// # Example
///
/// ```rust,ignore
/// use shorthash_macros::test_traced;
///
/// #[test_traced("INFO")]
/// async fn test_assign() {
///     tracing::info!("visible");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Parse level
    let level = if attr.is_empty() {
        "DEBUG".to_string()
    } else {
        let literal = parse_macro_input!(attr as LitStr);
        let level = literal.value().to_uppercase();
        if !LEVELS.contains(&level.as_str()) {
            return Error::new(
                literal.span(),
                format!("invalid level `{}`, expected one of {:?}", level, LEVELS),
            )
            .to_compile_error()
            .into();
        }
        level
    };
    let level = Ident::new(&level, Span::call_site());

    // Rebuild the test function
    let attrs = &input.attrs;
    let vis = &input.vis;
    let name = &input.sig.ident;
    let output = &input.sig.output;
    let block = &input.block;
    let body = if input.sig.asyncness.is_some() {
        quote! {
            ::tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build runtime")
                .block_on(async move #block)
        }
    } else {
        quote! { #block }
    };

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() #output {
            let _ = ::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(::tracing::Level::#level)
                .with_line_number(true)
                .try_init();
            #body
        }
    };
    TokenStream::from(expanded)
}
