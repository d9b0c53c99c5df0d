// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// The macro for labeling e2e testcases.
///
/// Testcase functions have the signature `async fn test(ctx: &Framework)`.
/// The macro moves the function body into a boxed future that evaluates to an
/// `e2e_testcase::TestOutcome` and creates an entry in the test case inventory
/// that allows the runner to enumerate the test.
#[proc_macro_attribute]
pub fn e2e_testcase(_attrib: TokenStream, input: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(input as ItemFn);

    if item_fn.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            item_fn.sig.fn_token,
            "e2e testcases must be async functions",
        )
        .to_compile_error()
        .into();
    }

    // The `module_path!()` in the generated code lets the test case report
    // its fully-qualified path regardless of where it's located.
    let fn_ident = item_fn.sig.ident.clone();
    let fn_name = fn_ident.to_string();
    let submit: proc_macro2::TokenStream = quote! {
        e2e_testcase::inventory_submit! {
            e2e_testcase::TestCase::new(
                module_path!(),
                #fn_name,
                e2e_testcase::TestFunction { f: #fn_ident }
            )
        }
    };

    // Rebuild the body into an inner async block returning an
    // `anyhow::Result` so tests can use `?` and `return Ok(())`.
    let fn_vis = item_fn.vis.clone();
    let fn_inputs = item_fn.sig.inputs.clone();
    let fn_block = item_fn.block;
    let remade_fn = quote! {
        #fn_vis fn #fn_ident(#fn_inputs)
            -> e2e_testcase::BoxFuture<'_, e2e_testcase::TestOutcome>
        {
            Box::pin(async move {
                #[allow(unreachable_code)]
                let result = async move {
                    #fn_block
                    Ok::<(), e2e_testcase::Error>(())
                }
                .await;
                e2e_testcase::TestOutcome::from_result(result)
            })
        }
    };

    quote! {
        #remade_fn

        #submit
    }
    .into()
}
