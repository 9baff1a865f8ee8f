//! Loaded bytecode modules.
//!
//! A [`Module`] is the unit the module loader hands to the runtime: the type definitions with
//! their fields and methods, the type specification, member reference, method specification
//! and user string tables that tokens inside method bodies point into, and optional
//! [`SequencePoints`] for diagnostics. Modules are immutable once built and shared as
//! [`ModuleRc`].
//!
//! # Key Components
//!
//! - [`Module`] - Immutable module tables with token based lookup
//! - [`ModuleBuilder`] - Assembles a module row by row, handing out tokens
//! - [`TypeDef`], [`FieldDef`], [`MethodDef`] - Definition rows
//! - [`MemberRef`], [`MethodRef`], [`FieldRef`], [`MethodSpec`] - Reference rows
//!
//! # Examples
//!
//! ```rust
//! use dotrun::assembly::Instruction;
//! use dotrun::metadata::method::MethodBody;
//! use dotrun::metadata::module::{MethodDef, ModuleBuilder, TypeDef};
//! use dotrun::metadata::signatures::TypeSig;
//!
//! let mut builder = ModuleBuilder::new("Sample");
//! let program = builder.define_type(TypeDef::class("Sample", "Program"));
//! builder.define_method(
//!     program,
//!     MethodDef::new("Answer")
//!         .returns(TypeSig::int32())
//!         .body(MethodBody::new(vec![Instruction::LdcI4(42), Instruction::Ret])),
//! )?;
//! let module = builder.build();
//! assert_eq!(module.type_def(program)?.full_name(), "Sample.Program");
//! # Ok::<(), dotrun::Error>(())
//! ```

mod typedef;

pub use typedef::{
    FieldDef, FieldRef, MemberRef, MethodDef, MethodRef, MethodSpec, TypeDef, TypeFlags,
};

use std::{fmt, sync::Arc};

use uguid::Guid;

use crate::{
    metadata::{
        method::MethodBody,
        sequencepoints::SequencePoints,
        signatures::TypeSig,
        token::{TableId, Token},
    },
    Error, Result,
};

/// Identity of a module inside a registry, assigned at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// A reference counted module
pub type ModuleRc = Arc<Module>;

/// A method definition row together with its location.
#[derive(Debug, Clone, Copy)]
pub struct MethodDefEntry<'a> {
    /// `TypeDef` token of the declaring type
    pub owner: Token,
    /// Position in the declaring type's method list
    pub index: usize,
    /// The definition
    pub def: &'a MethodDef,
}

/// A field definition row together with its location.
#[derive(Debug, Clone, Copy)]
pub struct FieldDefEntry<'a> {
    /// `TypeDef` token of the declaring type
    pub owner: Token,
    /// Position in the declaring type's field list
    pub index: usize,
    /// The definition
    pub def: &'a FieldDef,
}

/// An immutable bytecode module.
#[derive(Debug)]
pub struct Module {
    name: String,
    mvid: Guid,
    types: Vec<TypeDef>,
    field_rows: Vec<(usize, usize)>,
    method_rows: Vec<(usize, usize)>,
    field_tokens: Vec<Vec<Token>>,
    method_tokens: Vec<Vec<Token>>,
    type_specs: Vec<TypeSig>,
    member_refs: Vec<MemberRef>,
    method_specs: Vec<MethodSpec>,
    user_strings: Vec<String>,
    symbols: Option<SequencePoints>,
}

impl Module {
    /// Simple name of the module; used as resolution scope for its own types
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module version id; `Guid::ZERO` when the loader did not supply one
    #[must_use]
    pub fn mvid(&self) -> Guid {
        self.mvid
    }

    /// Optional symbol information
    #[must_use]
    pub fn symbols(&self) -> Option<&SequencePoints> {
        self.symbols.as_ref()
    }

    /// Number of type definitions
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Iterates over all type definitions with their tokens
    pub fn types(&self) -> impl Iterator<Item = (Token, &TypeDef)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, def)| (Token::from_parts(TableId::TypeDef, i as u32 + 1), def))
    }

    fn row<'a, T>(rows: &'a [T], token: Token, table: TableId) -> Result<&'a T> {
        if !token.is(table) {
            return Err(Error::InvalidToken(token));
        }
        token
            .index()
            .and_then(|i| rows.get(i))
            .ok_or(Error::InvalidToken(token))
    }

    /// Type definition addressed by a `TypeDef` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the token does not address a `TypeDef` row.
    pub fn type_def(&self, token: Token) -> Result<&TypeDef> {
        Self::row(&self.types, token, TableId::TypeDef)
    }

    /// Method definition addressed by a `MethodDef` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the token does not address a `MethodDef` row.
    pub fn method_def(&self, token: Token) -> Result<MethodDefEntry<'_>> {
        let &(ty, index) = Self::row(&self.method_rows, token, TableId::MethodDef)?;
        let def = self.types[ty]
            .methods
            .get(index)
            .ok_or(Error::InvalidToken(token))?;
        Ok(MethodDefEntry {
            owner: Token::from_parts(TableId::TypeDef, ty as u32 + 1),
            index,
            def,
        })
    }

    /// Field definition addressed by a `Field` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the token does not address a `Field` row.
    pub fn field_def(&self, token: Token) -> Result<FieldDefEntry<'_>> {
        let &(ty, index) = Self::row(&self.field_rows, token, TableId::Field)?;
        let def = self.types[ty]
            .fields
            .get(index)
            .ok_or(Error::InvalidToken(token))?;
        Ok(FieldDefEntry {
            owner: Token::from_parts(TableId::TypeDef, ty as u32 + 1),
            index,
            def,
        })
    }

    /// `MethodDef` tokens of the methods of a type, in declaration order
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if `owner` does not address a `TypeDef` row.
    pub fn method_tokens(&self, owner: Token) -> Result<&[Token]> {
        Self::row(&self.method_tokens, owner, TableId::TypeDef).map(Vec::as_slice)
    }

    /// `Field` tokens of the fields of a type, in declaration order
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if `owner` does not address a `TypeDef` row.
    pub fn field_tokens(&self, owner: Token) -> Result<&[Token]> {
        Self::row(&self.field_tokens, owner, TableId::TypeDef).map(Vec::as_slice)
    }

    /// Type specification addressed by a `TypeSpec` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the token does not address a `TypeSpec` row.
    pub fn type_spec(&self, token: Token) -> Result<&TypeSig> {
        Self::row(&self.type_specs, token, TableId::TypeSpec)
    }

    /// Member reference addressed by a `MemberRef` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the token does not address a `MemberRef` row.
    pub fn member_ref(&self, token: Token) -> Result<&MemberRef> {
        Self::row(&self.member_refs, token, TableId::MemberRef)
    }

    /// Generic method instantiation addressed by a `MethodSpec` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the token does not address a `MethodSpec` row.
    pub fn method_spec(&self, token: Token) -> Result<&MethodSpec> {
        Self::row(&self.method_specs, token, TableId::MethodSpec)
    }

    /// User string literal addressed by a `UserString` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if the token does not address a `UserString` row.
    pub fn user_string(&self, token: Token) -> Result<&str> {
        Self::row(&self.user_strings, token, TableId::UserString).map(String::as_str)
    }

    /// Signature of any type token: `TypeDef` and `TypeSpec` rows are supported directly
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] for other tables or rows out of range.
    pub fn type_sig(&self, token: Token) -> Result<TypeSig> {
        match token.table_id() {
            Some(TableId::TypeDef) => self.type_def(token).map(|_| TypeSig::Def(token)),
            Some(TableId::TypeSpec) => self.type_spec(token).cloned(),
            _ => Err(Error::InvalidToken(token)),
        }
    }
}

/// Assembles a [`Module`] row by row.
#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    /// Starts an empty module named `name`
    pub fn new(name: impl Into<String>) -> Self {
        ModuleBuilder {
            module: Module {
                name: name.into(),
                mvid: Guid::ZERO,
                types: Vec::new(),
                field_rows: Vec::new(),
                method_rows: Vec::new(),
                field_tokens: Vec::new(),
                method_tokens: Vec::new(),
                type_specs: Vec::new(),
                member_refs: Vec::new(),
                method_specs: Vec::new(),
                user_strings: Vec::new(),
                symbols: None,
            },
        }
    }

    /// Sets the module version id
    #[must_use]
    pub fn mvid(mut self, mvid: Guid) -> Self {
        self.module.mvid = mvid;
        self
    }

    /// Adds a type definition, returning its `TypeDef` token
    pub fn define_type(&mut self, def: TypeDef) -> Token {
        let mut def = def;
        // Rows are handed out through define_field / define_method only.
        def.fields.clear();
        def.methods.clear();
        self.module.types.push(def);
        self.module.field_tokens.push(Vec::new());
        self.module.method_tokens.push(Vec::new());
        Token::from_parts(TableId::TypeDef, self.module.types.len() as u32)
    }

    fn owner_index(&self, owner: Token) -> Result<usize> {
        Module::row(&self.module.types, owner, TableId::TypeDef)?;
        owner.index().ok_or(Error::InvalidToken(owner))
    }

    /// Adds a field to `owner`, returning its `Field` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if `owner` is not a `TypeDef` of this module.
    pub fn define_field(&mut self, owner: Token, field: FieldDef) -> Result<Token> {
        let ty = self.owner_index(owner)?;
        let index = self.module.types[ty].fields.len();
        self.module.types[ty].fields.push(field);
        self.module.field_rows.push((ty, index));
        let token = Token::from_parts(TableId::Field, self.module.field_rows.len() as u32);
        self.module.field_tokens[ty].push(token);
        Ok(token)
    }

    /// Adds a method to `owner`, returning its `MethodDef` token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if `owner` is not a `TypeDef` of this module.
    pub fn define_method(&mut self, owner: Token, method: MethodDef) -> Result<Token> {
        let ty = self.owner_index(owner)?;
        let index = self.module.types[ty].methods.len();
        self.module.types[ty].methods.push(method);
        self.module.method_rows.push((ty, index));
        let token = Token::from_parts(TableId::MethodDef, self.module.method_rows.len() as u32);
        self.module.method_tokens[ty].push(token);
        Ok(token)
    }

    /// Replaces the body of an already defined method, for bodies that reference their own token
    ///
    /// # Errors
    /// Returns [`Error::InvalidToken`] if `method` is not a `MethodDef` of this module.
    pub fn set_body(&mut self, method: Token, body: MethodBody) -> Result<()> {
        let &(ty, index) = Module::row(&self.module.method_rows, method, TableId::MethodDef)?;
        self.module.types[ty].methods[index].body = Some(Arc::new(body));
        Ok(())
    }

    /// Adds a type specification, returning its `TypeSpec` token
    pub fn type_spec(&mut self, sig: TypeSig) -> Token {
        self.module.type_specs.push(sig);
        Token::from_parts(TableId::TypeSpec, self.module.type_specs.len() as u32)
    }

    /// Adds a method reference, returning its `MemberRef` token
    pub fn method_ref(&mut self, method: MethodRef) -> Token {
        self.module.member_refs.push(MemberRef::Method(method));
        Token::from_parts(TableId::MemberRef, self.module.member_refs.len() as u32)
    }

    /// Adds a field reference, returning its `MemberRef` token
    pub fn field_ref(&mut self, declaring: TypeSig, name: impl Into<String>) -> Token {
        self.module.member_refs.push(MemberRef::Field(FieldRef {
            declaring,
            name: name.into(),
        }));
        Token::from_parts(TableId::MemberRef, self.module.member_refs.len() as u32)
    }

    /// Adds a generic method instantiation, returning its `MethodSpec` token
    pub fn method_spec(&mut self, method: Token, args: Vec<TypeSig>) -> Token {
        self.module.method_specs.push(MethodSpec { method, args });
        Token::from_parts(TableId::MethodSpec, self.module.method_specs.len() as u32)
    }

    /// Adds a user string literal, returning its `UserString` token
    pub fn user_string(&mut self, value: impl Into<String>) -> Token {
        self.module.user_strings.push(value.into());
        Token::from_parts(TableId::UserString, self.module.user_strings.len() as u32)
    }

    /// Attaches symbol information
    pub fn symbols(&mut self, symbols: SequencePoints) {
        self.module.symbols = Some(symbols);
    }

    /// Finishes the module
    #[must_use]
    pub fn build(self) -> Module {
        self.module
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::Instruction, metadata::method::MethodBody};

    #[test]
    fn tokens_address_rows() {
        let mut builder = ModuleBuilder::new("Sample");
        let foo = builder.define_type(TypeDef::class("Sample", "Foo"));
        let bar = builder.define_type(TypeDef::value_type("Sample", "Bar"));
        let x = builder.define_field(bar, FieldDef::new("x", TypeSig::int32())).unwrap();
        let run = builder
            .define_method(foo, MethodDef::new("Run").body(MethodBody::new(vec![Instruction::Ret])))
            .unwrap();
        let hello = builder.user_string("hello");
        let spec = builder.type_spec(TypeSig::def(foo).array());
        let module = builder.build();

        assert_eq!(foo, Token(0x02000001));
        assert_eq!(bar, Token(0x02000002));
        assert_eq!(module.type_def(bar).unwrap().full_name(), "Sample.Bar");
        assert!(module.type_def(bar).unwrap().is_value_type());

        let field = module.field_def(x).unwrap();
        assert_eq!(field.owner, bar);
        assert_eq!(field.def.name, "x");

        let method = module.method_def(run).unwrap();
        assert_eq!(method.owner, foo);
        assert_eq!(method.def.name, "Run");
        assert_eq!(module.method_tokens(foo).unwrap(), &[run]);

        assert_eq!(module.user_string(hello).unwrap(), "hello");
        assert_eq!(module.type_sig(spec).unwrap(), TypeSig::def(foo).array());
        assert_eq!(module.types().count(), 2);
    }

    #[test]
    fn invalid_tokens_are_rejected() {
        let mut builder = ModuleBuilder::new("Sample");
        let foo = builder.define_type(TypeDef::class("Sample", "Foo"));
        assert!(matches!(
            builder.define_method(Token(0x02000009), MethodDef::new("X")),
            Err(Error::InvalidToken(_))
        ));
        let module = builder.build();

        assert!(matches!(module.type_def(Token(0x02000002)), Err(Error::InvalidToken(_))));
        assert!(matches!(module.method_def(foo), Err(Error::InvalidToken(_))));
        assert!(matches!(module.user_string(Token(0x70000000)), Err(Error::InvalidToken(_))));
    }
}
