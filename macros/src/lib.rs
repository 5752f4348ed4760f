//! `#[tap_test]` attribute for the on-device TAP harness of `ble-wifi-prov`.
//!
//! Each annotated function is kept as-is and registered with
//! `ble_wifi_prov::testing` through `inventory`, so the `device-tests`
//! binary finds it without a central list.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Expr, ExprLit, ItemFn, Lit, Meta, ReturnType, Token};

/// Register a function as a TAP test.
///
/// The function either returns `()` (a panic fails it) or a
/// `Result<(), E>` (an `Err` fails it).
///
/// - `#[tap_test]`
/// - `#[tap_test(should_panic)]`
/// - `#[tap_test(should_panic = "message")]`
/// - `#[tap_test(ignore)]` reports the test as skipped
///
/// ```ignore
/// use ble_wifi_prov_macros::tap_test;
///
/// #[tap_test]
/// fn store_roundtrip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     let mut store = CredentialStore::new(EspFlash::new(), DEFAULT_CREDENTIAL_OFFSET);
///     store.save(&Credential::new("Home-WiFi", "s3cr3t!")?)?;
///     Ok(())
/// }
/// ```
#[proc_macro_attribute]
pub fn tap_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);

    let mode = match parse_mode(attr.into()) {
        Ok(mode) => mode,
        Err(e) => return e.to_compile_error().into(),
    };

    let fn_name = &input_fn.sig.ident;
    let fn_name_str = fn_name.to_string();
    let returns_result = matches!(input_fn.sig.output, ReturnType::Type(_, _));

    let register_call = match mode {
        Mode::Run if returns_result => quote! { runner.run(#fn_name_str, #fn_name); },
        Mode::Run => quote! { runner.run_assert(#fn_name_str, #fn_name); },
        Mode::ShouldPanic(None) => {
            quote! { runner.run_should_panic(#fn_name_str, #fn_name, None); }
        }
        Mode::ShouldPanic(Some(msg)) => {
            quote! { runner.run_should_panic(#fn_name_str, #fn_name, Some(#msg)); }
        }
        Mode::Ignore => quote! {
            let _ = #fn_name;
            runner.skip(#fn_name_str);
        },
    };

    let expanded = quote! {
        #input_fn

        ::inventory::submit! {
            ::ble_wifi_prov::testing::TapTestEntry::new(
                #fn_name_str,
                |runner: &mut ::ble_wifi_prov::testing::TestRunner| {
                    #register_call
                }
            )
        }
    };

    TokenStream::from(expanded)
}

enum Mode {
    Run,
    ShouldPanic(Option<String>),
    Ignore,
}

fn parse_mode(attr: TokenStream2) -> syn::Result<Mode> {
    if attr.is_empty() {
        return Ok(Mode::Run);
    }

    let metas = Punctuated::<Meta, Token![,]>::parse_terminated.parse2(attr)?;
    let mut mode = Mode::Run;

    for meta in metas {
        mode = match meta {
            Meta::Path(p) if p.is_ident("should_panic") => Mode::ShouldPanic(None),
            Meta::Path(p) if p.is_ident("ignore") => Mode::Ignore,
            Meta::NameValue(nv) if nv.path.is_ident("should_panic") => match nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => Mode::ShouldPanic(Some(s.value())),
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "should_panic expects a string literal",
                    ))
                }
            },
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "unknown tap_test attribute; expected should_panic, \
                     should_panic = \"message\" or ignore",
                ))
            }
        };
    }

    Ok(mode)
}
