//! `#[traced]`: trace events around a function body.
//!
//! ```ignore
//! #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
//! pub async fn start(self) -> Result<Mailer, ConfigurationFailure> { .. }
//! ```
//!
//! An `enter` event is emitted before the body runs and an `exit` event
//! whenever the body is left, early returns and `?` included. With
//! `timing` the exit event carries the elapsed time in the chosen unit.

extern crate proc_macro;

use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote};
use syn::{
    Ident, ItemFn, LitStr, Stmt, Token,
    parse::{Parse, ParseStream},
    parse_macro_input, parse_quote,
};

mod kw {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
}

#[derive(Clone, Copy)]
enum Unit {
    Nanos,
    Micros,
    Millis,
    Secs,
}

impl Unit {
    fn from_literal(literal: &LitStr) -> syn::Result<Self> {
        match literal.value().as_str() {
            "ns" | "nanos" => Ok(Self::Nanos),
            "us" | "micros" => Ok(Self::Micros),
            "ms" | "millis" => Ok(Self::Millis),
            "s" | "secs" => Ok(Self::Secs),
            other => Err(syn::Error::new(
                literal.span(),
                format!("unknown precision `{other}`, expected one of ns, us, ms, s"),
            )),
        }
    }

    /// The `Duration` accessor and the suffix printed after its value.
    fn accessor(self) -> (Ident, &'static str) {
        let (method, suffix) = match self {
            Self::Nanos => ("as_nanos", "ns"),
            Self::Micros => ("as_micros", "us"),
            Self::Millis => ("as_millis", "ms"),
            Self::Secs => ("as_secs", "s"),
        };
        (Ident::new(method, Span::call_site()), suffix)
    }
}

#[derive(Default)]
struct Options {
    instrument: Option<TokenStream>,
    timing: Option<Unit>,
}

impl Parse for Options {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut options = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();

            if lookahead.peek(kw::instrument) {
                let keyword = input.parse::<kw::instrument>()?;
                if options.instrument.is_some() {
                    return Err(syn::Error::new(keyword.span, "`instrument` given twice"));
                }

                options.instrument = Some(if input.peek(syn::token::Paren) {
                    let content;
                    syn::parenthesized!(content in input);
                    content.parse()?
                } else {
                    TokenStream::new()
                });
            } else if lookahead.peek(kw::timing) {
                let keyword = input.parse::<kw::timing>()?;
                if options.timing.is_some() {
                    return Err(syn::Error::new(keyword.span, "`timing` given twice"));
                }

                options.timing = Some(if input.peek(syn::token::Paren) {
                    let content;
                    syn::parenthesized!(content in input);
                    content.parse::<kw::precision>()?;
                    content.parse::<Token![=]>()?;
                    Unit::from_literal(&content.parse()?)?
                } else {
                    Unit::Millis
                });
            } else {
                return Err(lookahead.error());
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(options)
    }
}

/// Wrap a function in `enter`/`exit` trace events.
///
/// `instrument(..)` is handed to `#[tracing::instrument]` untouched, and
/// `timing` (optionally `timing(precision = "ms")`) adds an `elapsed`
/// field to the exit event. The crate using the attribute must have
/// `tracing` in scope.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let options = parse_macro_input!(args as Options);
    let mut function = parse_macro_input!(item as ItemFn);

    expand(&options, &mut function);
    quote!(#function).into()
}

fn expand(options: &Options, function: &mut ItemFn) {
    let name = function.sig.ident.to_string();
    let guard = format_ident!("__TracedScope");

    let exit: TokenStream = match options.timing {
        Some(unit) => {
            let (accessor, suffix) = unit.accessor();
            quote! {
                tracing::trace!(
                    function = #name,
                    elapsed = %format_args!("{} {}", self.0.elapsed().#accessor(), #suffix),
                    "exit"
                );
            }
        }
        None => quote! { tracing::trace!(function = #name, "exit"); },
    };

    let prelude: Vec<Stmt> = parse_quote! {
        struct #guard(std::time::Instant);

        impl std::ops::Drop for #guard {
            fn drop(&mut self) {
                #exit
            }
        }

        tracing::trace!(function = #name, "enter");
        let __traced_scope = #guard(std::time::Instant::now());
    };

    function.block.stmts.splice(0..0, prelude);
    function
        .attrs
        .push(parse_quote!(#[allow(clippy::items_after_statements)]));

    if let Some(arguments) = &options.instrument {
        function.attrs.push(if arguments.is_empty() {
            parse_quote!(#[tracing::instrument])
        } else {
            parse_quote!(#[tracing::instrument(#arguments)])
        });
    }
}
