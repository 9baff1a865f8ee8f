//! Resolution of type signatures in a generic context.
//!
//! The same signature can denote different types depending on the generic arguments of the
//! type and method it occurs in. [`Resolution`] carries that distinction to the caller so a
//! context dependent result is never memoized under the token that referenced it.

use crate::{
    metadata::{
        cache::CacheKey,
        method::Method,
        module::ModuleId,
        signatures::TypeSig,
        token::Token,
        typesystem::{GenericBinding, TypeRc, TypeRegistry},
    },
    Error, Result,
};

/// The generic arguments in scope where a signature occurs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericContext<'a> {
    /// The instantiated type containing the reference
    pub ty: Option<&'a TypeRc>,
    /// Generic arguments of the instantiated method containing the reference
    pub method_args: &'a [GenericBinding],
}

impl<'a> GenericContext<'a> {
    /// No generic arguments in scope
    pub const EMPTY: GenericContext<'static> = GenericContext {
        ty: None,
        method_args: &[],
    };

    /// The arguments of an instantiated type
    #[must_use]
    pub fn of_type(ty: &'a TypeRc) -> Self {
        GenericContext {
            ty: Some(ty),
            method_args: &[],
        }
    }

    /// The arguments of a method and its declaring type
    #[must_use]
    pub fn of_method(method: &'a Method) -> Self {
        GenericContext {
            ty: Some(&method.declaring),
            method_args: &method.generic_args,
        }
    }

    /// Looks up a generic parameter, type arguments first
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&'a TypeRc> {
        self.ty
            .and_then(|ty| ty.find_generic_argument(name))
            .or_else(|| {
                self.method_args
                    .iter()
                    .find(|binding| binding.name == name)
                    .map(|binding| &binding.ty)
            })
    }
}

/// Outcome of resolving a signature.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Independent of the generic context; may be memoized under the referencing token
    Cacheable(TypeRc),
    /// Determined by the generic context; must be resolved again for every context
    ContextDependent(TypeRc),
    /// An open generic parameter the context does not bind
    Unbound(String),
}

impl Resolution {
    /// The resolved type, if any
    #[must_use]
    pub fn ty(&self) -> Option<&TypeRc> {
        match self {
            Resolution::Cacheable(ty) | Resolution::ContextDependent(ty) => Some(ty),
            Resolution::Unbound(_) => None,
        }
    }

    /// Returns true for results that may be memoized
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Resolution::Cacheable(_))
    }
}

impl TypeRegistry {
    /// Resolves a signature occurring in module `module_id` against `ctx`.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for unknown names and
    /// [`Error::UnsupportedReferenceShape`] for pointers and function pointers.
    pub fn resolve_sig(
        &self,
        module_id: ModuleId,
        sig: &TypeSig,
        ctx: GenericContext<'_>,
    ) -> Result<Resolution> {
        match sig {
            TypeSig::Def(token) => Ok(Resolution::Cacheable(self.def_type(module_id, *token)?)),
            TypeSig::Ref { name, scope } => Ok(Resolution::Cacheable(
                self.resolve_scoped(name, scope.as_deref())?,
            )),
            TypeSig::GenericParam(name) => Ok(match ctx.find(name) {
                Some(ty) => Resolution::ContextDependent(ty.clone()),
                None => Resolution::Unbound(name.clone()),
            }),
            TypeSig::ByRef(inner) => {
                let resolved = self.resolve_sig(module_id, inner, ctx)?;
                let cacheable = resolved.is_cacheable() && !inner.contains_generic_parameter();
                match resolved.ty() {
                    Some(element) => Ok(wrap(self.make_by_ref(element), cacheable)),
                    None => Ok(resolved),
                }
            }
            TypeSig::Array { element, rank } => {
                let resolved = self.resolve_sig(module_id, element, ctx)?;
                let cacheable = resolved.is_cacheable() && !element.contains_generic_parameter();
                match resolved.ty() {
                    Some(ty) => Ok(wrap(self.make_array(ty, *rank), cacheable)),
                    None => Ok(resolved),
                }
            }
            TypeSig::GenericInst { definition, args } => {
                let definition = match self.resolve_sig(module_id, definition, ctx)? {
                    Resolution::Unbound(name) => return Ok(Resolution::Unbound(name)),
                    resolved => resolved.ty().cloned().ok_or_else(|| {
                        Error::TypeNotFound(sig.to_string())
                    })?,
                };

                let mut dummy = sig.contains_generic_parameter();
                let mut actuals = Vec::with_capacity(args.len());
                for arg in args {
                    match self.resolve_sig(module_id, arg, ctx)? {
                        Resolution::Cacheable(ty) => actuals.push(ty),
                        Resolution::ContextDependent(ty) => {
                            dummy = true;
                            actuals.push(ty);
                        }
                        Resolution::Unbound(name) => {
                            dummy = true;
                            actuals.push(self.generic_parameter(&name));
                        }
                    }
                }

                let instance = self.make_generic_instance(&definition, actuals)?;
                Ok(wrap(instance, !dummy))
            }
            TypeSig::Pointer(_) | TypeSig::FnPtr => {
                Err(Error::UnsupportedReferenceShape(format!("{} ({})", sig, sig.shape())))
            }
        }
    }

    /// Resolves a signature to a type, standing in a placeholder for unbound parameters.
    ///
    /// # Errors
    /// See [`TypeRegistry::resolve_sig`].
    pub fn resolve_type_sig(
        &self,
        module_id: ModuleId,
        sig: &TypeSig,
        ctx: GenericContext<'_>,
    ) -> Result<TypeRc> {
        Ok(match self.resolve_sig(module_id, sig, ctx)? {
            Resolution::Cacheable(ty) | Resolution::ContextDependent(ty) => ty,
            Resolution::Unbound(name) => self.generic_parameter(&name),
        })
    }

    /// Resolves a `TypeDef` or `TypeSpec` token, memoizing context independent results.
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for tokens of other tables, [`Error::TypeNotFound`] if
    /// the token names an open generic parameter the context does not bind, and the errors of
    /// [`TypeRegistry::resolve_sig`].
    pub fn resolve_type_token(
        &self,
        module_id: ModuleId,
        token: Token,
        ctx: GenericContext<'_>,
    ) -> Result<TypeRc> {
        let key = CacheKey::Token {
            module: module_id,
            token,
        };
        if let Some(ty) = self.tokens().cached_type(&key) {
            return Ok(ty);
        }

        let sig = self.module(module_id)?.type_sig(token)?;
        match self.resolve_sig(module_id, &sig, ctx)? {
            Resolution::Cacheable(ty) => {
                tracing::trace!(%token, ty = ty.name(), "cached type token");
                Ok(self.tokens().cache_type(key, ty))
            }
            Resolution::ContextDependent(ty) => Ok(ty),
            Resolution::Unbound(name) => Err(Error::TypeNotFound(format!("!{}", name))),
        }
    }
}

fn wrap(ty: TypeRc, cacheable: bool) -> Resolution {
    if cacheable {
        Resolution::Cacheable(ty)
    } else {
        Resolution::ContextDependent(ty)
    }
}
