//! Fluent construction of module images.
//!
//! [`ModuleBuilder`] owns a [`ModuleImage`] together with its [`DebugSymbols`] and hands out
//! short-lived [`TypeBuilder`], [`FieldBuilder`] and [`MethodBuilder`] values that append one
//! row each. Reference rows (`AssemblyRef`, `TypeRef`, `MemberRef`, `TypeSpec`, `MethodSpec`)
//! are de-duplicated, so asking twice for `System.Object` yields the same token.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::{image::ModuleBuilder, signatures::TypeSignature};
//!
//! let mut builder = ModuleBuilder::new("Game.dll", "Game");
//! let player = builder.type_def("Game", "Player").public().build();
//! builder.field(player, "hp", TypeSignature::I4).public().build();
//! builder
//!     .method(player, "Score")
//!     .public()
//!     .returns(TypeSignature::I4)
//!     .document("Player.cs", 10)
//!     .code(|asm| {
//!         asm.ldc_i4(1)?.ret()?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let (image, symbols) = builder.finish();
//! assert_eq!(image.methods.len(), 1);
//! assert_eq!(symbols.documents, vec!["Player.cs".to_string()]);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    assembly::BodyEncoder,
    metadata::{
        flags::{FieldAttributes, MethodAttributes, TypeAttributes},
        image::tables::{
            AssemblyRefRow, FieldRow, MemberRefRow, MethodBody, MethodDefRow, MethodSpecRow,
            ModuleImage, TypeDefRow, TypeRefRow, TypeSpecRow, Version,
        },
        signatures::{
            MemberSignature, SignatureField, SignatureLocalVariable, SignatureLocalVariables,
            SignatureMethodSpec, SignatureParameter, TypeSignature,
        },
        symbols::{DebugSymbols, SequencePoint},
        token::{TableId, Token},
    },
    Result,
};

/// Name of the core library assembly references are created against.
pub const CORLIB: &str = "mscorlib";

const CORLIB_VERSION: Version = [4, 0, 0, 0];
const ACCESS_MASK: u32 = 0x0007;
const DEFAULT_MAX_STACK: u16 = 8;

/// Builds a [`ModuleImage`] and its symbols row by row.
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    image: ModuleImage,
    symbols: DebugSymbols,
}

impl ModuleBuilder {
    /// Start an empty module.
    #[must_use]
    pub fn new(module: &str, assembly: &str) -> Self {
        ModuleBuilder {
            image: ModuleImage::new(module, assembly),
            symbols: DebugSymbols::default(),
        }
    }

    /// Continue building on top of an existing image.
    #[must_use]
    pub fn from_image(image: ModuleImage, symbols: DebugSymbols) -> Self {
        ModuleBuilder { image, symbols }
    }

    /// The image built so far.
    #[must_use]
    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// Mutable access to the image built so far.
    pub fn image_mut(&mut self) -> &mut ModuleImage {
        &mut self.image
    }

    /// The symbols recorded so far.
    #[must_use]
    pub fn symbols(&self) -> &DebugSymbols {
        &self.symbols
    }

    /// Returns the finished image and its symbols.
    #[must_use]
    pub fn finish(self) -> (ModuleImage, DebugSymbols) {
        (self.image, self.symbols)
    }

    /// `AssemblyRef` for `name`, created on first use.
    pub fn assembly_ref(&mut self, name: &str, version: Version) -> Token {
        if let Some(index) = self
            .image
            .assembly_refs
            .iter()
            .position(|row| row.name == name)
        {
            return Token::from_parts(TableId::AssemblyRef, index as u32 + 1);
        }
        self.image.add_assembly_ref(AssemblyRefRow {
            name: name.to_string(),
            version,
        })
    }

    /// `TypeRef` for `namespace.name` resolved through `scope`, created on first use.
    pub fn type_ref(&mut self, scope: Token, namespace: &str, name: &str) -> Token {
        let row = TypeRefRow {
            scope,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        find_or_add(&mut self.image.type_refs, row, TableId::TypeRef)
    }

    /// `TypeRef` into the core library.
    pub fn corlib_type(&mut self, namespace: &str, name: &str) -> Token {
        let corlib = self.assembly_ref(CORLIB, CORLIB_VERSION);
        self.type_ref(corlib, namespace, name)
    }

    /// `MemberRef`, created on first use.
    pub fn member_ref(&mut self, class: Token, name: &str, signature: MemberSignature) -> Token {
        let row = MemberRefRow {
            class,
            name: name.to_string(),
            signature,
        };
        find_or_add(&mut self.image.member_refs, row, TableId::MemberRef)
    }

    /// `TypeSpec`, created on first use.
    pub fn type_spec(&mut self, signature: TypeSignature) -> Token {
        find_or_add(&mut self.image.type_specs, TypeSpecRow { signature }, TableId::TypeSpec)
    }

    /// `MethodSpec` instantiating `method` with `generic_args`, created on first use.
    pub fn method_spec(&mut self, method: Token, generic_args: Vec<TypeSignature>) -> Token {
        let row = MethodSpecRow {
            method,
            instantiation: SignatureMethodSpec { generic_args },
        };
        find_or_add(&mut self.image.method_specs, row, TableId::MethodSpec)
    }

    /// Append a user string literal.
    pub fn user_string(&mut self, value: &str) -> Token {
        self.image.add_user_string(value)
    }

    /// Begin a type definition.
    pub fn type_def(&mut self, namespace: &str, name: &str) -> TypeBuilder<'_> {
        TypeBuilder {
            row: TypeDefRow {
                namespace: namespace.to_string(),
                name: name.to_string(),
                ..TypeDefRow::default()
            },
            extends: None,
            module: self,
        }
    }

    /// Begin a field on `owner`. Fields are private instance fields unless configured.
    pub fn field(&mut self, owner: Token, name: &str, ty: TypeSignature) -> FieldBuilder<'_> {
        FieldBuilder {
            row: FieldRow {
                parent: owner,
                flags: FieldAttributes::PRIVATE,
                name: name.to_string(),
                signature: SignatureField { base: ty },
                offset: None,
            },
            module: self,
        }
    }

    /// Begin a method on `owner`. Methods are private instance methods returning `void`
    /// unless configured. `.ctor` and `.cctor` get their special name flags automatically.
    pub fn method(&mut self, owner: Token, name: &str) -> MethodBuilder<'_> {
        let mut flags = MethodAttributes::PRIVATE | MethodAttributes::HIDE_BY_SIG;
        if name == ".ctor" || name == ".cctor" {
            flags |= MethodAttributes::SPECIAL_NAME | MethodAttributes::RTSPECIAL_NAME;
        }
        if name == ".cctor" {
            flags |= MethodAttributes::STATIC;
        }

        MethodBuilder {
            row: MethodDefRow {
                parent: owner,
                flags,
                name: name.to_string(),
                ..MethodDefRow::default()
            },
            max_stack: DEFAULT_MAX_STACK,
            locals: Vec::new(),
            code: None,
            document: None,
            module: self,
        }
    }
}

fn find_or_add<T: PartialEq>(rows: &mut Vec<T>, row: T, table: TableId) -> Token {
    let index = match rows.iter().position(|existing| *existing == row) {
        Some(index) => index,
        None => {
            rows.push(row);
            rows.len() - 1
        }
    };
    Token::from_parts(table, index as u32 + 1)
}

/// Configures one `TypeDef` row.
pub struct TypeBuilder<'a> {
    module: &'a mut ModuleBuilder,
    row: TypeDefRow,
    extends: Option<Token>,
}

impl TypeBuilder<'_> {
    /// Make the type public (or nested public).
    #[must_use]
    pub fn public(mut self) -> Self {
        if self.row.enclosing.is_null() {
            self.row.flags |= TypeAttributes::PUBLIC;
        } else {
            self.row.flags |= TypeAttributes::NESTED_PUBLIC;
        }
        self
    }

    /// Nest the type inside `enclosing`. Nested types have no namespace.
    #[must_use]
    pub fn nested_in(mut self, enclosing: Token) -> Self {
        self.row.enclosing = enclosing;
        self.row.namespace.clear();
        if self.row.flags.contains(TypeAttributes::PUBLIC) {
            self.row.flags.remove(TypeAttributes::PUBLIC);
            self.row.flags |= TypeAttributes::NESTED_PUBLIC;
        } else {
            self.row.flags |= TypeAttributes::NESTED_PRIVATE;
        }
        self
    }

    /// Set the base type. Defaults to `System.Object`.
    #[must_use]
    pub fn extends(mut self, base: Token) -> Self {
        self.extends = Some(base);
        self
    }

    /// Derive from `System.ValueType` with sequential layout.
    #[must_use]
    pub fn value_type(mut self) -> Self {
        let base = self.module.corlib_type("System", "ValueType");
        self.extends = Some(base);
        self.row.flags |= TypeAttributes::SEALED | TypeAttributes::SEQUENTIAL_LAYOUT;
        self
    }

    /// Explicit field layout; field offsets must be given.
    #[must_use]
    pub fn explicit_layout(mut self) -> Self {
        self.row.flags |= TypeAttributes::EXPLICIT_LAYOUT;
        self
    }

    /// Mark as interface. Interfaces have no base type.
    #[must_use]
    pub fn interface(mut self) -> Self {
        self.row.flags |= TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT;
        self.extends = Some(Token::NULL);
        self
    }

    /// Add attribute flags.
    #[must_use]
    pub fn flags(mut self, flags: TypeAttributes) -> Self {
        self.row.flags |= flags;
        self
    }

    /// Declare generic parameters; the name receives the arity suffix.
    #[must_use]
    pub fn generic_params(mut self, names: &[&str]) -> Self {
        self.row.generic_params = names.iter().map(ToString::to_string).collect();
        if !names.is_empty() && !self.row.name.contains('`') {
            self.row.name = format!("{}`{}", self.row.name, names.len());
        }
        self
    }

    /// Append the row.
    pub fn build(self) -> Token {
        let extends = match self.extends {
            Some(base) => base,
            None => self.module.corlib_type("System", "Object"),
        };
        let mut row = self.row;
        row.extends = extends;
        self.module.image.add_type_def(row)
    }
}

/// Configures one `Field` row.
pub struct FieldBuilder<'a> {
    module: &'a mut ModuleBuilder,
    row: FieldRow,
}

impl FieldBuilder<'_> {
    /// Make the field public.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.row.flags = FieldAttributes::from_bits_retain(self.row.flags.bits() & !ACCESS_MASK)
            | FieldAttributes::PUBLIC;
        self
    }

    /// Make the field static.
    #[must_use]
    pub fn static_field(mut self) -> Self {
        self.row.flags |= FieldAttributes::STATIC;
        self
    }

    /// Explicit layout offset.
    #[must_use]
    pub fn offset(mut self, offset: u32) -> Self {
        self.row.offset = Some(offset);
        self
    }

    /// Append the row.
    pub fn build(self) -> Token {
        self.module.image.add_field(self.row)
    }
}

/// Configures one `MethodDef` row and its body.
pub struct MethodBuilder<'a> {
    module: &'a mut ModuleBuilder,
    row: MethodDefRow,
    max_stack: u16,
    locals: Vec<TypeSignature>,
    code: Option<Result<Vec<u8>>>,
    document: Option<(String, u32)>,
}

impl MethodBuilder<'_> {
    fn access(mut self, access: MethodAttributes) -> Self {
        self.row.flags =
            MethodAttributes::from_bits_retain(self.row.flags.bits() & !ACCESS_MASK) | access;
        self
    }

    /// Public access.
    #[must_use]
    pub fn public(self) -> Self {
        self.access(MethodAttributes::PUBLIC)
    }

    /// Private access.
    #[must_use]
    pub fn private(self) -> Self {
        self.access(MethodAttributes::PRIVATE)
    }

    /// Assembly (internal) access.
    #[must_use]
    pub fn internal(self) -> Self {
        self.access(MethodAttributes::ASSEM)
    }

    /// Static method.
    #[must_use]
    pub fn static_method(mut self) -> Self {
        self.row.flags |= MethodAttributes::STATIC;
        self
    }

    /// Virtual method in a new slot.
    #[must_use]
    pub fn virtual_method(mut self) -> Self {
        self.row.flags |= MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT;
        self
    }

    /// Virtual override reusing the base slot.
    #[must_use]
    pub fn override_method(mut self) -> Self {
        self.row.flags |= MethodAttributes::VIRTUAL;
        self
    }

    /// Abstract virtual method; the method gets no body.
    #[must_use]
    pub fn abstract_method(mut self) -> Self {
        self.row.flags |=
            MethodAttributes::ABSTRACT | MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT;
        self
    }

    /// Return type, `void` by default.
    #[must_use]
    pub fn returns(mut self, ty: TypeSignature) -> Self {
        self.row.signature.return_type = SignatureParameter::new(ty);
        self
    }

    /// Append a by-value parameter.
    #[must_use]
    pub fn param(mut self, ty: TypeSignature) -> Self {
        self.row.signature.params.push(SignatureParameter::new(ty));
        self
    }

    /// Append a by-reference parameter.
    #[must_use]
    pub fn param_by_ref(mut self, ty: TypeSignature) -> Self {
        self.row.signature.params.push(SignatureParameter {
            by_ref: true,
            base: ty,
        });
        self
    }

    /// Declare method generic parameters.
    #[must_use]
    pub fn generic_params(mut self, names: &[&str]) -> Self {
        self.row.generic_params = names.iter().map(ToString::to_string).collect();
        self.row.signature.generic_param_count = names.len() as u32;
        self
    }

    /// Append a local variable.
    #[must_use]
    pub fn local(mut self, ty: TypeSignature) -> Self {
        self.locals.push(ty);
        self
    }

    /// Maximum evaluation stack depth, 8 by default.
    #[must_use]
    pub fn max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    /// Map the method to `document`, starting at `line`.
    #[must_use]
    pub fn document(mut self, document: &str, line: u32) -> Self {
        self.document = Some((document.to_string(), line));
        self
    }

    /// Emit the body. Errors from `emit` surface in [`MethodBuilder::build`].
    #[must_use]
    pub fn code<F>(mut self, emit: F) -> Self
    where
        F: FnOnce(&mut BodyEncoder) -> Result<()>,
    {
        let mut encoder = BodyEncoder::new();
        self.code = Some(emit(&mut encoder).and_then(|()| encoder.finish()));
        self
    }

    /// Append the row, and its symbols if a document was given.
    ///
    /// Methods without code (and all abstract methods) get no body.
    ///
    /// # Errors
    /// Returns the first error raised while emitting the body.
    pub fn build(self) -> Result<Token> {
        let mut row = self.row;
        row.signature.has_this = !row.flags.is_static();

        if !row.flags.contains(MethodAttributes::ABSTRACT) {
            if let Some(code) = self.code {
                row.body = Some(MethodBody {
                    max_stack: self.max_stack,
                    init_locals: !self.locals.is_empty(),
                    locals: SignatureLocalVariables {
                        locals: self
                            .locals
                            .into_iter()
                            .map(|base| SignatureLocalVariable {
                                base,
                                ..SignatureLocalVariable::default()
                            })
                            .collect(),
                    },
                    code: code?,
                    exception_handlers: Vec::new(),
                });
            }
        }

        let token = self.module.image.add_method(row);
        if let Some((document, line)) = self.document {
            let document = self.module.symbols.add_document(document);
            self.module.symbols.add_method(
                token,
                document,
                vec![SequencePoint::new(0, line, 1, line, 2)],
            );
        }
        Ok(token)
    }
}
