use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    parse_macro_input, Attribute, FnArg, ImplItem, ImplItemFn, ItemImpl, LitStr, Meta, ReturnType,
    Type,
};

#[derive(Clone, Copy)]
enum HookKind {
    Resources,
    PreConfiguration,
    Configuration,
    PostConstruct,
    WarmUp,
    PreDestroy,
}

impl HookKind {
    fn from_attr(attr: &Attribute) -> Option<Self> {
        let ident = attr.path().get_ident()?;
        let kind = match ident.to_string().as_str() {
            "resources" => HookKind::Resources,
            "pre_configuration" => HookKind::PreConfiguration,
            "configuration" => HookKind::Configuration,
            "post_construct" => HookKind::PostConstruct,
            "warm_up" => HookKind::WarmUp,
            "pre_destroy" => HookKind::PreDestroy,
            _ => return None,
        };
        Some(kind)
    }

    fn phase(self) -> TokenStream2 {
        let variant = match self {
            HookKind::Resources => quote!(Resources),
            HookKind::PreConfiguration => quote!(PreConfiguration),
            HookKind::Configuration => quote!(Configuration),
            HookKind::PostConstruct => quote!(PostConstruct),
            HookKind::WarmUp => quote!(WarmUp),
            HookKind::PreDestroy => quote!(PreDestroy),
        };
        quote!(::cadence::lifecycle::HookPhase::#variant)
    }
}

struct HookMethod {
    kind: HookKind,
    parallel: bool,
    method: syn::Ident,
    is_async: bool,
    returns_result: bool,
}

pub fn lifecycle_attribute(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[lifecycle] takes no arguments",
        )
        .to_compile_error()
        .into();
    }
    let input = parse_macro_input!(item as ItemImpl);
    generate_lifecycle_impl(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn generate_lifecycle_impl(mut input: ItemImpl) -> syn::Result<TokenStream2> {
    if let Some((_, path, _)) = &input.trait_ {
        return Err(syn::Error::new_spanned(
            path,
            "#[lifecycle] must be applied to an inherent impl block",
        ));
    }

    let mut hooks = Vec::new();
    for item in input.items.iter_mut() {
        if let ImplItem::Fn(method) = item {
            if let Some(hook) = take_hook_attr(method)? {
                hooks.push(hook);
            }
        }
    }

    let registrations = hooks.iter().map(|hook| {
        let phase = hook.kind.phase();
        let parallel = hook.parallel;
        let method = &hook.method;
        let name = LitStr::new(&method.to_string(), method.span());

        let call = if hook.is_async {
            quote!(this.#method().await)
        } else {
            quote!(this.#method())
        };
        let body = if hook.returns_result {
            quote! {
                #call
                    .map(|_| ())
                    .map_err(::core::convert::Into::into)
            }
        } else {
            quote! {
                #call;
                ::core::result::Result::Ok(())
            }
        };

        quote! {
            .hook(#phase, #name, #parallel, |this: ::std::sync::Arc<Self>| async move {
                #body
            })
        }
    });

    let self_ty = &input.self_ty;
    let (impl_generics, _, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        #input

        impl #impl_generics ::cadence::Introspect for #self_ty #where_clause {
            fn describe() -> ::cadence::lifecycle::TypeActionSet {
                ::cadence::lifecycle::TypeActionSet::builder::<Self>()
                    #(#registrations)*
                    .build()
            }
        }
    })
}

/// Strip the lifecycle attribute from `method`, describing the hook it marks.
fn take_hook_attr(method: &mut ImplItemFn) -> syn::Result<Option<HookMethod>> {
    let mut found: Option<(HookKind, bool)> = None;
    let mut kept = Vec::with_capacity(method.attrs.len());

    for attr in method.attrs.drain(..) {
        let Some(kind) = HookKind::from_attr(&attr) else {
            kept.push(attr);
            continue;
        };
        if found.is_some() {
            return Err(syn::Error::new_spanned(
                attr,
                "a method can carry only one lifecycle attribute",
            ));
        }
        let parallel = parse_options(kind, &attr)?;
        found = Some((kind, parallel));
    }
    method.attrs = kept;

    let Some((kind, parallel)) = found else {
        return Ok(None);
    };
    check_signature(method)?;

    Ok(Some(HookMethod {
        kind,
        parallel,
        method: method.sig.ident.clone(),
        is_async: method.sig.asyncness.is_some(),
        returns_result: !returns_unit(&method.sig.output),
    }))
}

/// `#[warm_up(parallel)]` is the only option any hook attribute accepts.
fn parse_options(kind: HookKind, attr: &Attribute) -> syn::Result<bool> {
    match &attr.meta {
        Meta::Path(_) => Ok(false),
        Meta::List(_) if matches!(kind, HookKind::WarmUp) => {
            let mut parallel = false;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("parallel") {
                    parallel = true;
                    Ok(())
                } else {
                    Err(meta.error("expected `parallel`"))
                }
            })?;
            Ok(parallel)
        }
        _ => Err(syn::Error::new_spanned(
            attr,
            "this lifecycle attribute takes no arguments",
        )),
    }
}

fn check_signature(method: &ImplItemFn) -> syn::Result<()> {
    let sig = &method.sig;
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "lifecycle hooks cannot be generic",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new_spanned(
                &sig.ident,
                "lifecycle hooks must take `&self`",
            ));
        }
    }
    if let Some(extra) = inputs.next() {
        return Err(syn::Error::new_spanned(
            extra,
            "lifecycle hooks take no arguments besides `&self`",
        ));
    }
    Ok(())
}

fn returns_unit(output: &ReturnType) -> bool {
    match output {
        ReturnType::Default => true,
        ReturnType::Type(_, ty) => matches!(&**ty, Type::Tuple(tuple) if tuple.elems.is_empty()),
    }
}
