//! Attribute flags for types, fields, methods and exception clauses.
//!
//! Values follow ECMA-335 II.23.1 so that images produced by a regular toolchain can be
//! mapped onto this crate's tables without translation. Only the bits the patch engine
//! inspects get named constants; unknown bits are retained via `from_bits_retain`.

use bitflags::bitflags;

/// Bitmask for member access extraction (`MemberAccessMask`)
pub const MEMBER_ACCESS_MASK: u32 = 0x0007;
/// Bitmask for type visibility extraction (`VisibilityMask`)
pub const TYPE_VISIBILITY_MASK: u32 = 0x0007;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Type definition attributes
    pub struct TypeAttributes: u32 {
        /// Visible outside the assembly
        const PUBLIC = 0x0001;
        /// Nested, public
        const NESTED_PUBLIC = 0x0002;
        /// Nested, private
        const NESTED_PRIVATE = 0x0003;
        /// Type is an interface
        const INTERFACE = 0x0020;
        /// Type is abstract
        const ABSTRACT = 0x0080;
        /// Type cannot be derived from
        const SEALED = 0x0100;
        /// Fields are laid out sequentially
        const SEQUENTIAL_LAYOUT = 0x0008;
        /// Fields carry explicit offsets
        const EXPLICIT_LAYOUT = 0x0010;
        /// Name is special
        const SPECIAL_NAME = 0x0400;
        /// Static initializer may run lazily
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

impl TypeAttributes {
    /// Returns `true` if the type is visible outside its assembly (public or nested public).
    #[must_use]
    pub fn is_public(self) -> bool {
        matches!(self.bits() & TYPE_VISIBILITY_MASK, 0x0001 | 0x0002)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Field definition attributes
    pub struct FieldAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type, else per instance
        const STATIC = 0x0010;
        /// Field can only be initialized
        const INIT_ONLY = 0x0020;
        /// Value is a compile time constant
        const LITERAL = 0x0040;
        /// Field has an RVA (initial data)
        const HAS_FIELD_RVA = 0x0100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Method definition attributes
    pub struct MethodAttributes: u32 {
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by anyone in the assembly
        const ASSEM = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on type, else per instance
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name+sig, else just by name
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new slot in the vtable
        const NEW_SLOT = 0x0100;
        /// Method does not provide an implementation
        const ABSTRACT = 0x0400;
        /// Method is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime provides special behavior based on the name (`.ctor`, `.cctor`)
        const RTSPECIAL_NAME = 0x1000;
        /// Implementation is forwarded through PInvoke
        const PINVOKE_IMPL = 0x2000;
    }
}

impl MethodAttributes {
    /// Returns `true` for public methods.
    ///
    /// Access is an enumeration inside the low three bits, so `contains(PUBLIC)` would also
    /// match `FAMILY | ASSEM` combinations.
    #[must_use]
    pub fn is_public(self) -> bool {
        self.bits() & MEMBER_ACCESS_MASK == MethodAttributes::PUBLIC.bits()
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(MethodAttributes::STATIC)
    }

    /// Returns `true` for virtual (including abstract) methods.
    #[must_use]
    pub fn is_virtual(self) -> bool {
        self.contains(MethodAttributes::VIRTUAL)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// Method implementation attributes
    pub struct MethodImplAttributes: u32 {
        /// Implementation is native code
        const NATIVE = 0x0001;
        /// Implementation is provided by the runtime
        const RUNTIME = 0x0003;
        /// Method cannot be inlined
        const NO_INLINING = 0x0008;
        /// Method is synchronized
        const SYNCHRONIZED = 0x0020;
        /// Implemented inside the runtime
        const INTERNAL_CALL = 0x1000;
    }
}

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause, `class_token` names the caught type.
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause.
        const FILTER = 0x0001;
        /// A finally clause.
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_access() {
        assert!(MethodAttributes::PUBLIC.is_public());
        assert!(!MethodAttributes::FAMILY.is_public());
        assert!(!(MethodAttributes::ASSEM | MethodAttributes::FAMILY).is_public());
        assert!((MethodAttributes::PUBLIC | MethodAttributes::STATIC).is_static());
        assert!((MethodAttributes::ABSTRACT | MethodAttributes::VIRTUAL).is_virtual());
    }

    #[test]
    fn test_type_visibility() {
        assert!(TypeAttributes::PUBLIC.is_public());
        assert!(TypeAttributes::NESTED_PUBLIC.is_public());
        assert!(!TypeAttributes::NESTED_PRIVATE.is_public());
        assert!(!TypeAttributes::SEALED.is_public());
    }

    #[test]
    fn test_unknown_bits_retained() {
        let flags = MethodAttributes::from_bits_retain(0x8046);
        assert_eq!(flags.bits(), 0x8046);
        assert!(flags.is_virtual());
    }
}
