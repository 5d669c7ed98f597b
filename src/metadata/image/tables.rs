//! Row types and the owned [`ModuleImage`] container.
//!
//! Rows are stored in declaration order; the token of a row is its table id plus its 1-based
//! position. Rows are never removed, so tokens handed out by the `add_*` functions stay
//! valid for the lifetime of the image.

use crate::{
    metadata::{
        flags::{
            ExceptionHandlerFlags, FieldAttributes, MethodAttributes, MethodImplAttributes,
            TypeAttributes,
        },
        signatures::{
            render_field_key, render_method_key, render_type, MemberSignature, SignatureField,
            SignatureLocalVariables, SignatureMethod, SignatureMethodSpec, TypeNames,
            TypeSignature,
        },
        token::{TableId, Token},
    },
    Error, Result,
};

/// Maximum nesting depth followed when building type names.
const MAX_NESTING_DEPTH: usize = 64;

/// A four part assembly version.
pub type Version = [u16; 4];

/// The identity of the module's own assembly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssemblyDef {
    /// Simple assembly name
    pub name: String,
    /// Assembly version
    pub version: Version,
}

/// A referenced assembly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssemblyRefRow {
    /// Simple assembly name
    pub name: String,
    /// Referenced version
    pub version: Version,
}

/// A reference to a type defined elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeRefRow {
    /// `AssemblyRef` for top level types, `TypeRef` of the enclosing type for nested ones
    pub scope: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
}

/// A type definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypeDefRow {
    /// Type attributes
    pub flags: TypeAttributes,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name, including the generic arity suffix
    pub name: String,
    /// Base type (`TypeDefOrRef` or `TypeSpec`), null for interfaces and `<Module>`
    pub extends: Token,
    /// Enclosing `TypeDef`, null for top level types
    pub enclosing: Token,
    /// Names of the generic parameters
    pub generic_params: Vec<String>,
}

/// A field definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldRow {
    /// Owning `TypeDef`
    pub parent: Token,
    /// Field attributes
    pub flags: FieldAttributes,
    /// Field name
    pub name: String,
    /// Field type
    pub signature: SignatureField,
    /// Explicit offset for explicit layout types
    pub offset: Option<u32>,
}

/// One exception handling clause of a method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub flags: ExceptionHandlerFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Caught type for typed clauses, null otherwise
    pub class_token: Token,
    /// Filter start for filter clauses, 0 otherwise
    pub filter_offset: u32,
}

/// The CIL body of a method.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialize locals
    pub init_locals: bool,
    /// Local variable types
    pub locals: SignatureLocalVariables,
    /// Raw CIL
    pub code: Vec<u8>,
    /// Exception clauses
    pub exception_handlers: Vec<ExceptionHandler>,
}

/// A method definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodDefRow {
    /// Owning `TypeDef`
    pub parent: Token,
    /// Method attributes
    pub flags: MethodAttributes,
    /// Implementation attributes
    pub impl_flags: MethodImplAttributes,
    /// Method name
    pub name: String,
    /// Method signature
    pub signature: SignatureMethod,
    /// Names of the generic parameters
    pub generic_params: Vec<String>,
    /// Body, `None` for abstract and runtime provided methods
    pub body: Option<MethodBody>,
}

/// A reference to a field or method of another type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRefRow {
    /// Declaring type (`TypeDef`, `TypeRef` or `TypeSpec`)
    pub class: Token,
    /// Member name
    pub name: String,
    /// Member signature
    pub signature: MemberSignature,
}

/// A constructed type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpecRow {
    /// The type
    pub signature: TypeSignature,
}

/// A generic method instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpecRow {
    /// Generic method (`MethodDef` or `MemberRef`)
    pub method: Token,
    /// Type arguments
    pub instantiation: SignatureMethodSpec,
}

/// A custom attribute argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeArg {
    /// `int`
    I32(i32),
    /// `string`
    String(String),
    /// `string[]`
    StringArray(Vec<String>),
}

/// A custom attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAttributeRow {
    /// Annotated entity
    pub parent: Token,
    /// Full name of the attribute type
    pub attribute_type: String,
    /// Positional constructor arguments
    pub args: Vec<AttributeArg>,
}

/// One compiled module, with all of its tables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleImage {
    /// Module file name
    pub name: String,
    /// The module's assembly
    pub assembly: AssemblyDef,
    /// `AssemblyRef` table
    pub assembly_refs: Vec<AssemblyRefRow>,
    /// `TypeRef` table
    pub type_refs: Vec<TypeRefRow>,
    /// `TypeDef` table
    pub type_defs: Vec<TypeDefRow>,
    /// `Field` table
    pub fields: Vec<FieldRow>,
    /// `MethodDef` table
    pub methods: Vec<MethodDefRow>,
    /// `MemberRef` table
    pub member_refs: Vec<MemberRefRow>,
    /// `TypeSpec` table
    pub type_specs: Vec<TypeSpecRow>,
    /// `MethodSpec` table
    pub method_specs: Vec<MethodSpecRow>,
    /// `CustomAttribute` table
    pub custom_attributes: Vec<CustomAttributeRow>,
    /// `ldstr` literals
    pub user_strings: Vec<String>,
}

fn row<T>(rows: &[T], token: Token, table: TableId) -> Result<&T> {
    if !token.is_table(table) {
        return Err(Error::resolution(token, format!("expected a {table} token")));
    }

    token
        .index()
        .and_then(|index| rows.get(index))
        .ok_or_else(|| Error::resolution(token, format!("{table} row out of range")))
}

fn row_mut<T>(rows: &mut [T], token: Token, table: TableId) -> Result<&mut T> {
    if !token.is_table(table) {
        return Err(Error::resolution(token, format!("expected a {table} token")));
    }

    token
        .index()
        .and_then(|index| rows.get_mut(index))
        .ok_or_else(|| Error::resolution(token, format!("{table} row out of range")))
}

fn push<T>(rows: &mut Vec<T>, value: T, table: TableId) -> Token {
    rows.push(value);
    Token::from_parts(table, rows.len() as u32)
}

fn tokens<T>(rows: &[T], table: TableId) -> impl Iterator<Item = (Token, &T)> {
    rows.iter()
        .enumerate()
        .map(move |(index, row)| (Token::from_parts(table, index as u32 + 1), row))
}

fn qualified(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

impl ModuleImage {
    /// Creates an empty image.
    #[must_use]
    pub fn new(name: impl Into<String>, assembly: impl Into<String>) -> Self {
        ModuleImage {
            name: name.into(),
            assembly: AssemblyDef {
                name: assembly.into(),
                version: [1, 0, 0, 0],
            },
            ..ModuleImage::default()
        }
    }

    /// Look up an `AssemblyRef` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn assembly_ref(&self, token: Token) -> Result<&AssemblyRefRow> {
        row(&self.assembly_refs, token, TableId::AssemblyRef)
    }

    /// Look up a `TypeRef` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn type_ref(&self, token: Token) -> Result<&TypeRefRow> {
        row(&self.type_refs, token, TableId::TypeRef)
    }

    /// Look up a `TypeDef` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn type_def(&self, token: Token) -> Result<&TypeDefRow> {
        row(&self.type_defs, token, TableId::TypeDef)
    }

    /// Look up a `Field` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn field(&self, token: Token) -> Result<&FieldRow> {
        row(&self.fields, token, TableId::Field)
    }

    /// Look up a `MethodDef` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn method(&self, token: Token) -> Result<&MethodDefRow> {
        row(&self.methods, token, TableId::MethodDef)
    }

    /// Mutable access to a `MethodDef` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn method_mut(&mut self, token: Token) -> Result<&mut MethodDefRow> {
        row_mut(&mut self.methods, token, TableId::MethodDef)
    }

    /// Look up a `MemberRef` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn member_ref(&self, token: Token) -> Result<&MemberRefRow> {
        row(&self.member_refs, token, TableId::MemberRef)
    }

    /// Look up a `TypeSpec` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn type_spec(&self, token: Token) -> Result<&TypeSpecRow> {
        row(&self.type_specs, token, TableId::TypeSpec)
    }

    /// Look up a `MethodSpec` row.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn method_spec(&self, token: Token) -> Result<&MethodSpecRow> {
        row(&self.method_specs, token, TableId::MethodSpec)
    }

    /// Look up an `ldstr` literal.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] for tokens of the wrong table or out of range.
    pub fn user_string(&self, token: Token) -> Result<&str> {
        row(&self.user_strings, token, TableId::UserString).map(String::as_str)
    }

    /// All type definitions with their tokens.
    pub fn type_def_tokens(&self) -> impl Iterator<Item = (Token, &TypeDefRow)> {
        tokens(&self.type_defs, TableId::TypeDef)
    }

    /// All method definitions with their tokens.
    pub fn method_tokens(&self) -> impl Iterator<Item = (Token, &MethodDefRow)> {
        tokens(&self.methods, TableId::MethodDef)
    }

    /// All member references with their tokens.
    pub fn member_ref_tokens(&self) -> impl Iterator<Item = (Token, &MemberRefRow)> {
        tokens(&self.member_refs, TableId::MemberRef)
    }

    /// All method specs with their tokens.
    pub fn method_spec_tokens(&self) -> impl Iterator<Item = (Token, &MethodSpecRow)> {
        tokens(&self.method_specs, TableId::MethodSpec)
    }

    /// Fields declared by `owner`, in declaration order.
    pub fn fields_of(&self, owner: Token) -> impl Iterator<Item = (Token, &FieldRow)> {
        tokens(&self.fields, TableId::Field).filter(move |(_, field)| field.parent == owner)
    }

    /// Methods declared by `owner`, in declaration order.
    pub fn methods_of(&self, owner: Token) -> impl Iterator<Item = (Token, &MethodDefRow)> {
        tokens(&self.methods, TableId::MethodDef).filter(move |(_, method)| method.parent == owner)
    }

    /// Find a type definition by full name (`NS.Outer/Inner`).
    #[must_use]
    pub fn find_type_def(&self, full_name: &str) -> Option<Token> {
        self.type_def_tokens()
            .map(|(token, _)| token)
            .find(|token| self.type_name(*token).is_ok_and(|name| name == full_name))
    }

    /// Returns `true` if the type definition `token` is a value type, deriving from
    /// `System.ValueType` or `System.Enum`.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] if `token` or its base type dangles.
    pub fn is_value_type_def(&self, token: Token) -> Result<bool> {
        let extends = self.type_def(token)?.extends;
        if extends.is_null() {
            return Ok(false);
        }
        let base = self.type_name(extends)?;
        Ok(matches!(base.as_str(), "System.ValueType" | "System.Enum")
            && self.type_name(token)? != "System.Enum")
    }

    /// Append an `AssemblyRef` row.
    pub fn add_assembly_ref(&mut self, value: AssemblyRefRow) -> Token {
        push(&mut self.assembly_refs, value, TableId::AssemblyRef)
    }

    /// Append a `TypeRef` row.
    pub fn add_type_ref(&mut self, value: TypeRefRow) -> Token {
        push(&mut self.type_refs, value, TableId::TypeRef)
    }

    /// Append a `TypeDef` row.
    pub fn add_type_def(&mut self, value: TypeDefRow) -> Token {
        push(&mut self.type_defs, value, TableId::TypeDef)
    }

    /// Append a `Field` row.
    pub fn add_field(&mut self, value: FieldRow) -> Token {
        push(&mut self.fields, value, TableId::Field)
    }

    /// Append a `MethodDef` row.
    pub fn add_method(&mut self, value: MethodDefRow) -> Token {
        push(&mut self.methods, value, TableId::MethodDef)
    }

    /// Append a `MemberRef` row.
    pub fn add_member_ref(&mut self, value: MemberRefRow) -> Token {
        push(&mut self.member_refs, value, TableId::MemberRef)
    }

    /// Append a `TypeSpec` row.
    pub fn add_type_spec(&mut self, value: TypeSpecRow) -> Token {
        push(&mut self.type_specs, value, TableId::TypeSpec)
    }

    /// Append a `MethodSpec` row.
    pub fn add_method_spec(&mut self, value: MethodSpecRow) -> Token {
        push(&mut self.method_specs, value, TableId::MethodSpec)
    }

    /// Append a custom attribute.
    pub fn add_custom_attribute(&mut self, value: CustomAttributeRow) -> Token {
        push(&mut self.custom_attributes, value, TableId::CustomAttribute)
    }

    /// Append a string literal, returning its `ldstr` token.
    pub fn add_user_string(&mut self, value: impl Into<String>) -> Token {
        push(&mut self.user_strings, value.into(), TableId::UserString)
    }

    /// Custom attributes attached to `parent`.
    pub fn attributes_of(&self, parent: Token) -> impl Iterator<Item = &CustomAttributeRow> {
        self.custom_attributes
            .iter()
            .filter(move |attribute| attribute.parent == parent)
    }

    fn nested_name(&self, token: Token, depth: usize) -> Result<String> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::RecursionLimit(MAX_NESTING_DEPTH));
        }

        match token.table_id() {
            Some(TableId::TypeDef) => {
                let row = self.type_def(token)?;
                if row.enclosing.is_null() {
                    Ok(qualified(&row.namespace, &row.name))
                } else {
                    Ok(format!(
                        "{}/{}",
                        self.nested_name(row.enclosing, depth + 1)?,
                        row.name
                    ))
                }
            }
            Some(TableId::TypeRef) => {
                let row = self.type_ref(token)?;
                if row.scope.is_table(TableId::TypeRef) {
                    Ok(format!(
                        "{}/{}",
                        self.nested_name(row.scope, depth + 1)?,
                        row.name
                    ))
                } else {
                    Ok(qualified(&row.namespace, &row.name))
                }
            }
            Some(TableId::TypeSpec) => render_type(&self.type_spec(token)?.signature, self),
            _ => Err(Error::resolution(token, "not a type token")),
        }
    }

    /// Symbolic name of a field or method token, `Owner::key`.
    ///
    /// Works for `Field`, `MethodDef`, `MemberRef` and `MethodSpec` tokens; the latter render
    /// as the generic method followed by its type arguments.
    ///
    /// # Errors
    /// Returns [`Error::ResolutionFailure`] if the token or anything it references dangles.
    pub fn member_name(&self, token: Token) -> Result<String> {
        match token.table_id() {
            Some(TableId::Field) => {
                let row = self.field(token)?;
                Ok(format!(
                    "{}::{}",
                    self.type_name(row.parent)?,
                    render_field_key(&row.name, &row.signature, self)?
                ))
            }
            Some(TableId::MethodDef) => {
                let row = self.method(token)?;
                Ok(format!(
                    "{}::{}",
                    self.type_name(row.parent)?,
                    render_method_key(&row.name, &row.signature, self)?
                ))
            }
            Some(TableId::MemberRef) => {
                let row = self.member_ref(token)?;
                let key = match &row.signature {
                    MemberSignature::Method(method) => render_method_key(&row.name, method, self)?,
                    MemberSignature::Field(field) => render_field_key(&row.name, field, self)?,
                };
                Ok(format!("{}::{}", self.type_name(row.class)?, key))
            }
            Some(TableId::MethodSpec) => {
                let row = self.method_spec(token)?;
                let args = row
                    .instantiation
                    .generic_args
                    .iter()
                    .map(|arg| render_type(arg, self))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{}<{}>", self.member_name(row.method)?, args.join(",")))
            }
            _ => Err(Error::resolution(token, "not a member token")),
        }
    }
}

impl TypeNames for ModuleImage {
    fn type_name(&self, token: Token) -> Result<String> {
        self.nested_name(token, 0)
    }
}
