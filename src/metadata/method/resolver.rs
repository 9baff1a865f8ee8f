//! Method and field resolution.
//!
//! Tokens inside method bodies name methods and fields either directly (`MethodDef`, `Field`),
//! through a reference to the declaring type (`MemberRef`) or as a generic method
//! instantiation (`MethodSpec`). Resolution happens in the generic context of the calling
//! method. Results that do not depend on that context are memoized under the token; every
//! resolved method is also memoized under its own identity.

use std::sync::{atomic::Ordering, Arc};

use crate::{
    metadata::{
        cache::CacheKey,
        method::{Method, MethodId, MethodOrigin, MethodRc},
        module::{MemberRef, MethodRef, ModuleId},
        signatures::TypeSig,
        token::{TableId, Token},
        typesystem::{
            corlib, FieldRc, GenericBinding, GenericContext, NativeType, Resolution, TypeKind,
            TypeName, TypeRc, TypeRegistry,
        },
    },
    Error, Result,
};

impl TypeRegistry {
    fn next_method_id(&self) -> MethodId {
        self.next_method_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolves the name of a native signature type in the context of a declaring type and
    /// method level generic arguments.
    fn native_sig(
        &self,
        name: &str,
        declaring: &TypeRc,
        native: &NativeType,
        method_params: &[String],
        method_args: &[GenericBinding],
    ) -> Result<TypeRc> {
        if let Some(ty) = declaring.find_generic_argument(name) {
            return Ok(ty.clone());
        }
        if let Some(binding) = method_args.iter().find(|binding| binding.name == name) {
            return Ok(binding.ty.clone());
        }
        if native.generic_params.iter().any(|p| p == name) || method_params.iter().any(|p| p == name) {
            return Ok(self.generic_parameter(name));
        }
        if TypeName::parse(name)?.is_simple() {
            self.resolve_scoped(name, Some(&native.module))
        } else {
            self.resolve(name)
        }
    }

    /// Methods `ty` declares, in declaration order.
    ///
    /// Members of generic instances are resolved against the instance's arguments; method
    /// level generic parameters stay open until [`TypeRegistry::instantiate_method`].
    ///
    /// # Errors
    /// Returns the resolution errors of parameter and return types.
    pub fn methods(&self, ty: &TypeRc) -> Result<Arc<[MethodRc]>> {
        if let Some(methods) = self.methods.get(&ty.index()).map(|e| e.value().clone()) {
            return Ok(methods);
        }

        let mut methods = Vec::new();
        match ty.kind() {
            TypeKind::Interpreted {
                module,
                module_id,
                token,
            } => {
                let ctx = GenericContext::of_type(ty);
                for method_token in module.method_tokens(*token)? {
                    let def = module.method_def(*method_token)?.def;
                    let params = def
                        .params
                        .iter()
                        .map(|sig| self.resolve_type_sig(*module_id, sig, ctx))
                        .collect::<Result<Vec<_>>>()?;
                    let ret = self.resolve_type_sig(*module_id, &def.ret, ctx)?;
                    let mut method = Method::new(
                        self.next_method_id(),
                        def.name.clone(),
                        ty.clone(),
                        def.flags,
                        params,
                        ret,
                        MethodOrigin::Interpreted {
                            module: module.clone(),
                            module_id: *module_id,
                            token: *method_token,
                            body: def.body.clone(),
                        },
                    );
                    method.generic_params.clone_from(&def.generic_params);
                    methods.push(Arc::new(method));
                }
            }
            TypeKind::Native(native) => {
                for entry in &native.methods {
                    let params = entry
                        .params
                        .iter()
                        .map(|p| self.native_sig(p, ty, native, &entry.generic_params, &[]))
                        .collect::<Result<Vec<_>>>()?;
                    let ret = self.native_sig(&entry.ret, ty, native, &entry.generic_params, &[])?;
                    let mut method = Method::new(
                        self.next_method_id(),
                        entry.name.clone(),
                        ty.clone(),
                        entry.flags,
                        params,
                        ret,
                        MethodOrigin::Native(Arc::new(entry.clone())),
                    );
                    method.generic_params.clone_from(&entry.generic_params);
                    methods.push(Arc::new(method));
                }
            }
            _ => {}
        }

        let methods: Arc<[MethodRc]> = methods.into();
        Ok(self
            .methods
            .entry(ty.index())
            .or_insert(methods)
            .value()
            .clone())
    }

    /// The instantiation of a generic method definition with `args`.
    ///
    /// # Errors
    /// Returns [`Error::GenericArityMismatch`] if `args` does not match the method's generic
    /// parameter count, and the resolution errors of the substituted signature.
    pub fn instantiate_method(&self, method: &MethodRc, args: Vec<TypeRc>) -> Result<MethodRc> {
        let definition = method.definition.clone().unwrap_or_else(|| method.clone());
        if definition.generic_params.len() != args.len() {
            return Err(Error::GenericArityMismatch {
                type_name: definition.full_name(),
                expected: definition.generic_params.len(),
                found: args.len(),
            });
        }

        let names: Vec<&str> = args.iter().map(|arg| arg.name()).collect();
        let key = (definition.id, names.join(","));
        if let Some(instance) = self.method_instances.get(&key).map(|e| e.value().clone()) {
            return Ok(instance);
        }

        let bindings: Vec<GenericBinding> = definition
            .generic_params
            .iter()
            .zip(args)
            .map(|(name, ty)| GenericBinding {
                name: name.clone(),
                ty,
            })
            .collect();

        let (params, ret) = match &definition.origin {
            MethodOrigin::Interpreted {
                module,
                module_id,
                token,
                ..
            } => {
                let def = module.method_def(*token)?.def;
                let ctx = GenericContext {
                    ty: Some(&definition.declaring),
                    method_args: &bindings,
                };
                let params = def
                    .params
                    .iter()
                    .map(|sig| self.resolve_type_sig(*module_id, sig, ctx))
                    .collect::<Result<Vec<_>>>()?;
                (params, self.resolve_type_sig(*module_id, &def.ret, ctx)?)
            }
            MethodOrigin::Native(entry) => {
                let native = definition
                    .declaring
                    .native()
                    .ok_or_else(|| Error::TypeNotFound(definition.declaring.name().to_string()))?;
                let resolve = |name: &str| {
                    self.native_sig(name, &definition.declaring, native, &entry.generic_params, &bindings)
                };
                let params = entry
                    .params
                    .iter()
                    .map(|p| resolve(p))
                    .collect::<Result<Vec<_>>>()?;
                let ret = resolve(&entry.ret)?;
                (params, ret)
            }
        };

        let mut instance = Method::new(
            self.next_method_id(),
            definition.name.clone(),
            definition.declaring.clone(),
            definition.flags,
            params,
            ret,
            definition.origin.clone(),
        );
        instance.generic_params.clone_from(&definition.generic_params);
        instance.generic_args = bindings;
        instance.definition = Some(definition.clone());

        Ok(self
            .method_instances
            .entry(key)
            .or_insert(Arc::new(instance))
            .value()
            .clone())
    }

    /// Resolves a method token in the context of the calling type and method.
    ///
    /// `Ok(None)` is returned for references to the parameterless `System.Object` and
    /// `System.Attribute` constructors, which compilers emit as base constructor calls that
    /// have nothing to do.
    ///
    /// # Errors
    /// Returns [`Error::MethodNotFound`] if the declaring type has no matching method, and
    /// the resolution errors of the referenced types.
    pub fn resolve_method(
        &self,
        module_id: ModuleId,
        token: Token,
        ctx_type: Option<&TypeRc>,
        ctx_method: Option<&Method>,
    ) -> Result<Option<MethodRc>> {
        let key = CacheKey::Token {
            module: module_id,
            token,
        };
        if let Some(hit) = self.tokens().cached_method(&key) {
            return Ok(hit);
        }

        let ctx = GenericContext {
            ty: ctx_type,
            method_args: ctx_method.map_or(&[], |method| method.generic_args.as_slice()),
        };
        let (method, context_dependent) = self.resolve_method_uncached(module_id, token, ctx)?;

        let method = if context_dependent {
            method
        } else {
            tracing::trace!(%token, method = ?method.as_ref().map(|m| m.key()), "cached method token");
            self.tokens().cache_method(key, method)
        };
        if let Some(method) = &method {
            self.tokens()
                .cache_method(CacheKey::Method(method.id), Some(method.clone()));
        }
        Ok(method)
    }

    /// A method descriptor previously returned by [`TypeRegistry::resolve_method`]
    #[must_use]
    pub fn method_by_id(&self, id: MethodId) -> Option<MethodRc> {
        self.tokens().cached_method(&CacheKey::Method(id)).flatten()
    }

    fn resolve_method_uncached(
        &self,
        module_id: ModuleId,
        token: Token,
        ctx: GenericContext<'_>,
    ) -> Result<(Option<MethodRc>, bool)> {
        let module = self.module(module_id)?;
        match token.table_id() {
            Some(TableId::MethodDef) => {
                let entry = module.method_def(token)?;
                let (declaring, dependent) =
                    self.contextual_declaring(self.def_type(module_id, entry.owner)?, ctx);
                let method = self.methods(&declaring)?.get(entry.index).cloned();
                match method {
                    Some(method) => Ok((Some(method), dependent)),
                    None => Err(Error::InvalidToken(token)),
                }
            }
            Some(TableId::MemberRef) => match module.member_ref(token)? {
                MemberRef::Method(reference) => {
                    self.resolve_method_ref(module_id, token, reference, ctx)
                }
                MemberRef::Field(_) => Err(Error::InvalidToken(token)),
            },
            Some(TableId::MethodSpec) => {
                let spec = module.method_spec(token)?;
                let (generic, mut dependent) = self.resolve_method_uncached(module_id, spec.method, ctx)?;
                let Some(generic) = generic else {
                    return Ok((None, dependent));
                };

                let mut args = Vec::with_capacity(spec.args.len());
                for sig in &spec.args {
                    match self.resolve_sig(module_id, sig, ctx)? {
                        Resolution::Cacheable(ty) => args.push(ty),
                        Resolution::ContextDependent(ty) => {
                            dependent = true;
                            args.push(ty);
                        }
                        Resolution::Unbound(name) => {
                            dependent = true;
                            args.push(self.generic_parameter(&name));
                        }
                    }
                }
                Ok((Some(self.instantiate_method(&generic, args)?), dependent))
            }
            _ => Err(Error::InvalidToken(token)),
        }
    }

    /// Members of an open generic definition are taken from the instance in context.
    fn contextual_declaring(&self, declaring: TypeRc, ctx: GenericContext<'_>) -> (TypeRc, bool) {
        if !declaring.is_generic_definition() {
            return (declaring, false);
        }
        match ctx.ty {
            Some(instance)
                if instance
                    .definition()
                    .is_some_and(|definition| Arc::ptr_eq(definition, &declaring)) =>
            {
                (instance.clone(), true)
            }
            _ => (declaring, true),
        }
    }

    fn resolve_method_ref(
        &self,
        module_id: ModuleId,
        token: Token,
        reference: &MethodRef,
        ctx: GenericContext<'_>,
    ) -> Result<(Option<MethodRc>, bool)> {
        let resolved = self.resolve_sig(module_id, &reference.declaring, ctx)?;
        let mut dependent = !resolved.is_cacheable();
        let declaring = match resolved {
            Resolution::Cacheable(ty) | Resolution::ContextDependent(ty) => ty,
            Resolution::Unbound(name) => return Err(Error::TypeNotFound(format!("!{}", name))),
        };

        if reference.is_constructor()
            && reference.params.is_empty()
            && (declaring.name() == corlib::OBJECT || declaring.name() == corlib::ATTRIBUTE)
        {
            return Ok((None, false));
        }

        if let Some(found) = self.find_referenced(&declaring, module_id, reference, ctx)? {
            return Ok((Some(found), dependent));
        }

        if let Some(counterpart) = self.adaptor_counterpart(&declaring, ctx)? {
            if let Some(found) = self.find_referenced(&counterpart, module_id, reference, ctx)? {
                dependent = true;
                tracing::trace!(method = found.key(), "resolved through cross-domain adaptor");
                return Ok((Some(found), dependent));
            }
        }

        Err(Error::MethodNotFound {
            method: reference.name.clone(),
            declaring_type: declaring.name().to_string(),
            token: Some(token),
        })
    }

    /// The adaptor counterpart of `declaring`, if the calling type crosses into a native base
    /// that an adaptor covers and `declaring` is one of the adaptor's base types.
    fn adaptor_counterpart(&self, declaring: &TypeRc, ctx: GenericContext<'_>) -> Result<Option<TypeRc>> {
        let Some(ctx_type) = ctx.ty else {
            return Ok(None);
        };
        let Some(native_base) = self.first_native_base(ctx_type)? else {
            return Ok(None);
        };
        let Some(adaptor) = self.adaptors().find(native_base.name()) else {
            return Ok(None);
        };
        if !adaptor.base_types().iter().any(|base| base == declaring.name()) {
            return Ok(None);
        }
        Ok(Some(self.native_type(&adaptor.adaptor_type())))
    }

    /// Finds the method `reference` names on `declaring` or, for non-constructors, its bases.
    fn find_referenced(
        &self,
        declaring: &TypeRc,
        module_id: ModuleId,
        reference: &MethodRef,
        ctx: GenericContext<'_>,
    ) -> Result<Option<MethodRc>> {
        let mut current = Some(declaring.clone());
        while let Some(ty) = current {
            let mut matches = Vec::new();
            for candidate in self.methods(&ty)?.iter() {
                if candidate.name != reference.name
                    || candidate.params.len() != reference.params.len()
                    || candidate.has_this() != reference.has_this
                    || candidate.generic_params.len() != reference.generic_arity
                {
                    continue;
                }

                let candidate_ctx = GenericContext {
                    ty: Some(&candidate.declaring),
                    method_args: &candidate.generic_args,
                };
                let mut equal = true;
                for (sig, param) in reference.params.iter().zip(&candidate.params) {
                    let ty = self.resolve_in_either(module_id, sig, candidate_ctx, ctx)?;
                    if !Arc::ptr_eq(&ty, param) {
                        equal = false;
                        break;
                    }
                }
                if equal {
                    matches.push(candidate.clone());
                }
            }

            match matches.len() {
                0 => {}
                1 => return Ok(matches.pop()),
                _ => {
                    for candidate in &matches {
                        let candidate_ctx = GenericContext {
                            ty: Some(&candidate.declaring),
                            method_args: &candidate.generic_args,
                        };
                        let ret = self.resolve_in_either(module_id, &reference.ret, candidate_ctx, ctx)?;
                        if Arc::ptr_eq(&ret, &candidate.ret) {
                            return Ok(Some(candidate.clone()));
                        }
                    }
                    return Ok(matches.into_iter().next());
                }
            }

            if reference.is_constructor() {
                return Ok(None);
            }
            current = self.base_type(&ty)?;
        }
        Ok(None)
    }

    fn resolve_in_either(
        &self,
        module_id: ModuleId,
        sig: &TypeSig,
        primary: GenericContext<'_>,
        fallback: GenericContext<'_>,
    ) -> Result<TypeRc> {
        match self.resolve_sig(module_id, sig, primary)? {
            Resolution::Cacheable(ty) | Resolution::ContextDependent(ty) => Ok(ty),
            Resolution::Unbound(_) => self.resolve_type_sig(module_id, sig, fallback),
        }
    }

    /// Resolves a field token in the context of the calling type and method.
    ///
    /// # Errors
    /// Returns [`Error::FieldNotFound`] if neither the declaring type nor its bases declare
    /// the field.
    pub fn resolve_field(
        &self,
        module_id: ModuleId,
        token: Token,
        ctx_type: Option<&TypeRc>,
        ctx_method: Option<&Method>,
    ) -> Result<FieldRc> {
        let key = CacheKey::Token {
            module: module_id,
            token,
        };
        if let Some(field) = self.tokens().cached_field(&key) {
            return Ok(field);
        }

        let ctx = GenericContext {
            ty: ctx_type,
            method_args: ctx_method.map_or(&[], |method| method.generic_args.as_slice()),
        };
        let module = self.module(module_id)?;
        let (declaring, name, is_static, dependent) = match token.table_id() {
            Some(TableId::Field) => {
                let entry = module.field_def(token)?;
                let (declaring, dependent) =
                    self.contextual_declaring(self.def_type(module_id, entry.owner)?, ctx);
                (declaring, entry.def.name.clone(), Some(entry.def.is_static), dependent)
            }
            Some(TableId::MemberRef) => match module.member_ref(token)? {
                MemberRef::Field(reference) => {
                    let resolved = self.resolve_sig(module_id, &reference.declaring, ctx)?;
                    let dependent = !resolved.is_cacheable();
                    let declaring = resolved
                        .ty()
                        .cloned()
                        .ok_or_else(|| Error::TypeNotFound(reference.declaring.to_string()))?;
                    (declaring, reference.name.clone(), None, dependent)
                }
                MemberRef::Method(_) => return Err(Error::InvalidToken(token)),
            },
            _ => return Err(Error::InvalidToken(token)),
        };

        let field = self.find_field(&declaring, &name, is_static)?;
        if dependent {
            Ok(field)
        } else {
            Ok(self.tokens().cache_field(key, field))
        }
    }

    /// Finds a field by name on `ty` or its bases
    ///
    /// # Errors
    /// Returns [`Error::FieldNotFound`] if no type in the chain declares it.
    pub fn find_field(&self, ty: &TypeRc, name: &str, is_static: Option<bool>) -> Result<FieldRc> {
        let mut current = Some(ty.clone());
        while let Some(candidate) = current {
            let layout = self.layout(&candidate)?;
            let found = match is_static {
                Some(true) => layout.find_static(name),
                Some(false) => layout.find(name),
                None => layout.find(name).or_else(|| layout.find_static(name)),
            };
            if let Some(field) = found {
                return Ok(field.clone());
            }
            current = self.base_type(&candidate)?;
        }
        Err(Error::FieldNotFound {
            field: name.to_string(),
            declaring_type: ty.name().to_string(),
        })
    }

    /// Resolves a user string token to its interned literal
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the module has no such user string.
    pub fn resolve_string(&self, module_id: ModuleId, token: Token) -> Result<Arc<str>> {
        let key = CacheKey::Token {
            module: module_id,
            token,
        };
        if let Some(hit) = self.tokens().cached_string(&key) {
            return Ok(hit);
        }
        let module = self.module(module_id)?;
        let literal = module.user_string(token)?;
        Ok(self.tokens().cache_string(key, literal))
    }

    /// The most derived implementation of `method` for a receiver of type `receiver`.
    ///
    /// # Errors
    /// Returns the resolution errors of the receiver's base chain.
    pub fn find_override(&self, receiver: &TypeRc, method: &MethodRc) -> Result<MethodRc> {
        if !method.is_virtual() {
            return Ok(method.clone());
        }
        let mut current = Some(receiver.clone());
        while let Some(ty) = current {
            if Arc::ptr_eq(&ty, &method.declaring) {
                break;
            }
            for candidate in self.methods(&ty)?.iter() {
                if candidate.is_virtual() && !candidate.is_abstract() && candidate.same_signature(method) {
                    return Ok(candidate.clone());
                }
            }
            current = self.base_type(&ty)?;
        }
        Ok(method.clone())
    }

    /// Finds a method by name and parameter count on `ty` or its bases
    ///
    /// # Errors
    /// Returns the resolution errors of the base chain.
    pub fn find_method(&self, ty: &TypeRc, name: &str, param_count: usize) -> Result<Option<MethodRc>> {
        let mut current = Some(ty.clone());
        while let Some(candidate) = current {
            if let Some(found) = self
                .methods(&candidate)?
                .iter()
                .find(|m| m.name == name && m.params.len() == param_count)
            {
                return Ok(Some(found.clone()));
            }
            current = self.base_type(&candidate)?;
        }
        Ok(None)
    }

    /// Instance constructors `ty` declares
    ///
    /// # Errors
    /// Returns the resolution errors of the constructor signatures.
    pub fn constructors(&self, ty: &TypeRc) -> Result<Vec<MethodRc>> {
        Ok(self
            .methods(ty)?
            .iter()
            .filter(|m| m.is_constructor())
            .cloned()
            .collect())
    }

    /// Local variable types of an interpreted method, resolved in the method's own context
    ///
    /// # Errors
    /// Returns [`Error::MissingMethodBody`] for methods without a body and the resolution
    /// errors of the local signatures.
    pub fn method_locals(&self, method: &Method) -> Result<Arc<[TypeRc]>> {
        if let Some(locals) = method.locals.get() {
            return Ok(locals.clone());
        }
        let (Some(body), Some((_, module_id, _))) = (method.body(), method.interpreted()) else {
            return Err(Error::MissingMethodBody(method.full_name()));
        };
        let ctx = GenericContext::of_method(method);
        let locals = body
            .locals
            .iter()
            .map(|sig| self.resolve_type_sig(module_id, sig, ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(method.locals.get_or_init(|| locals.into()).clone())
    }

    /// The type initializer of `ty`
    ///
    /// # Errors
    /// Returns the resolution errors of the method signatures.
    pub fn type_initializer(&self, ty: &TypeRc) -> Result<Option<MethodRc>> {
        Ok(self
            .methods(ty)?
            .iter()
            .find(|m| m.is_type_initializer())
            .cloned())
    }
}
