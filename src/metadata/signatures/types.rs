use crate::{metadata::token::Token, Result};

#[allow(non_snake_case, dead_code, missing_docs)]
/// Bytes that represent the element types of a signature blob (ECMA-335 II.23.1.16)
pub mod ELEMENT_TYPE {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition, represented as number
    pub const MVAR: u8 = 0x1e;
    pub const CMOD_REQD: u8 = 0x1f;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Leading bytes of the non-type signature blobs
pub mod SIGNATURE_HEADER {
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const METHOD_SPEC: u8 = 0x0a;
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
}

/// A type inside a signature blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum TypeSignature {
    #[default]
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Object,
    /// `System.IntPtr`
    I,
    /// `System.UIntPtr`
    U,
    TypedByRef,
    /// Unmanaged pointer
    Ptr(Box<TypeSignature>),
    /// Managed reference
    ByRef(Box<TypeSignature>),
    /// A value type, `TypeDefOrRef` token
    ValueType(Token),
    /// A reference type, `TypeDefOrRef` token
    Class(Token),
    /// Generic parameter of the enclosing type (`!n`)
    GenericParamType(u32),
    /// Generic parameter of the enclosing method (`!!n`)
    GenericParamMethod(u32),
    /// Multi-dimensional array; sizes and bounds are not tracked
    Array(Box<TypeSignature>, u32),
    /// Generic instantiation: the generic type and its arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Single-dimensional zero based array
    SzArray(Box<TypeSignature>),
    /// Pinned local
    Pinned(Box<TypeSignature>),
}

impl TypeSignature {
    /// Rebuild the signature with every embedded token passed through `map`.
    ///
    /// Walks generic instantiations, arrays, pointers and references recursively, so a
    /// `List<Foo[]>` has its `Foo` token substituted as well as the `List` token.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn map_tokens<F>(&self, map: &mut F) -> Result<TypeSignature>
    where
        F: FnMut(Token) -> Result<Token>,
    {
        Ok(match self {
            TypeSignature::Class(token) => TypeSignature::Class(map(*token)?),
            TypeSignature::ValueType(token) => TypeSignature::ValueType(map(*token)?),
            TypeSignature::Ptr(inner) => TypeSignature::Ptr(Box::new(inner.map_tokens(map)?)),
            TypeSignature::ByRef(inner) => TypeSignature::ByRef(Box::new(inner.map_tokens(map)?)),
            TypeSignature::SzArray(inner) => {
                TypeSignature::SzArray(Box::new(inner.map_tokens(map)?))
            }
            TypeSignature::Pinned(inner) => {
                TypeSignature::Pinned(Box::new(inner.map_tokens(map)?))
            }
            TypeSignature::Array(inner, rank) => {
                TypeSignature::Array(Box::new(inner.map_tokens(map)?), *rank)
            }
            TypeSignature::GenericInst(base, args) => {
                let base = base.map_tokens(map)?;
                let args = args
                    .iter()
                    .map(|arg| arg.map_tokens(map))
                    .collect::<Result<Vec<_>>>()?;
                TypeSignature::GenericInst(Box::new(base), args)
            }
            other => other.clone(),
        })
    }

    /// Visit every embedded token.
    pub fn visit_tokens<F: FnMut(Token)>(&self, visit: &mut F) {
        match self {
            TypeSignature::Class(token) | TypeSignature::ValueType(token) => visit(*token),
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::SzArray(inner)
            | TypeSignature::Pinned(inner)
            | TypeSignature::Array(inner, _) => inner.visit_tokens(visit),
            TypeSignature::GenericInst(base, args) => {
                base.visit_tokens(visit);
                for arg in args {
                    arg.visit_tokens(visit);
                }
            }
            _ => {}
        }
    }

    /// Returns `true` if the signature mentions a type or method generic parameter.
    #[must_use]
    pub fn is_open(&self) -> bool {
        match self {
            TypeSignature::GenericParamType(_) | TypeSignature::GenericParamMethod(_) => true,
            TypeSignature::Ptr(inner)
            | TypeSignature::ByRef(inner)
            | TypeSignature::SzArray(inner)
            | TypeSignature::Pinned(inner)
            | TypeSignature::Array(inner, _) => inner.is_open(),
            TypeSignature::GenericInst(base, args) => {
                base.is_open() || args.iter().any(TypeSignature::is_open)
            }
            _ => false,
        }
    }

    /// Returns `true` for types whose instances are passed by value.
    ///
    /// Primitive numerics, `bool`, `char`, native ints, `ValueType` tokens and generic
    /// instantiations of value types count; references, arrays, pointers, `string` and
    /// `object` do not.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            TypeSignature::Boolean
            | TypeSignature::Char
            | TypeSignature::I1
            | TypeSignature::U1
            | TypeSignature::I2
            | TypeSignature::U2
            | TypeSignature::I4
            | TypeSignature::U4
            | TypeSignature::I8
            | TypeSignature::U8
            | TypeSignature::R4
            | TypeSignature::R8
            | TypeSignature::I
            | TypeSignature::U
            | TypeSignature::TypedByRef
            | TypeSignature::ValueType(_) => true,
            TypeSignature::GenericInst(base, _) => base.is_value_type(),
            _ => false,
        }
    }
}

/// Parameter or return type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureParameter {
    /// Parameter is passed by reference
    pub by_ref: bool,
    /// The type of the parameter
    pub base: TypeSignature,
}

impl SignatureParameter {
    /// A by-value parameter of type `base`.
    #[must_use]
    pub fn new(base: TypeSignature) -> Self {
        SignatureParameter {
            by_ref: false,
            base,
        }
    }
}

/// Method signature (II.23.2.1)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureMethod {
    /// Instance method, `this` is passed implicitly
    pub has_this: bool,
    /// Number of generic parameters, 0 for non-generic methods
    pub generic_param_count: u32,
    /// The return type
    pub return_type: SignatureParameter,
    /// The parameters
    pub params: Vec<SignatureParameter>,
}

/// Field signature (II.23.2.4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureField {
    /// The type of the field
    pub base: TypeSignature,
}

/// Local variable signature (II.23.2.6)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureLocalVariables {
    /// The local variables
    pub locals: Vec<SignatureLocalVariable>,
}

/// A local variable slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureLocalVariable {
    /// Is a managed reference
    pub is_byref: bool,
    /// Is pinned
    pub is_pinned: bool,
    /// The type of the variable
    pub base: TypeSignature,
}

/// Method specification (II.23.2.15)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureMethodSpec {
    /// Types of the generic arguments
    pub generic_args: Vec<TypeSignature>,
}

/// Member reference signatures are either method or field signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberSignature {
    /// Reference to a method
    Method(SignatureMethod),
    /// Reference to a field
    Field(SignatureField),
}
