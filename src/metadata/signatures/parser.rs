use crate::{
    file::parser::Parser,
    metadata::signatures::{
        SignatureField, SignatureLocalVariable, SignatureLocalVariables, SignatureMethod,
        SignatureMethodSpec, SignatureParameter, TypeSignature, ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Error::RecursionLimit,
    Result,
};

/// Maximum recursion depth for signature parsing
const MAX_RECURSION_DEPTH: usize = 50;

/// Signature parser for the blob signatures stored in a module image
///
/// # Example
///
/// ```rust
/// use dotpatch::metadata::signatures::SignatureParser;
/// let data = &[0x20, 0x01, 0x01, 0x0E];
/// let mut parser = SignatureParser::new(data);
/// let sig = parser.parse_method_signature().unwrap();
/// assert!(sig.has_this);
/// assert_eq!(sig.params.len(), 1);
/// ```
///
/// Custom modifiers, function pointers and vararg sentinels are rejected as malformed; the
/// compiler targeted by this crate does not emit them for patchable code. Do not re-use a
/// parser instance for multiple signatures.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a new `SignatureParser` from a byte slice
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    /// Parse a single type from the signature blob
    fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let current_byte = self.parser.read_le::<u8>()?;
        let parsed = match current_byte {
            ELEMENT_TYPE::VOID => TypeSignature::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSignature::Boolean,
            ELEMENT_TYPE::CHAR => TypeSignature::Char,
            ELEMENT_TYPE::I1 => TypeSignature::I1,
            ELEMENT_TYPE::U1 => TypeSignature::U1,
            ELEMENT_TYPE::I2 => TypeSignature::I2,
            ELEMENT_TYPE::U2 => TypeSignature::U2,
            ELEMENT_TYPE::I4 => TypeSignature::I4,
            ELEMENT_TYPE::U4 => TypeSignature::U4,
            ELEMENT_TYPE::I8 => TypeSignature::I8,
            ELEMENT_TYPE::U8 => TypeSignature::U8,
            ELEMENT_TYPE::R4 => TypeSignature::R4,
            ELEMENT_TYPE::R8 => TypeSignature::R8,
            ELEMENT_TYPE::STRING => TypeSignature::String,
            ELEMENT_TYPE::OBJECT => TypeSignature::Object,
            ELEMENT_TYPE::I => TypeSignature::I,
            ELEMENT_TYPE::U => TypeSignature::U,
            ELEMENT_TYPE::TYPEDBYREF => TypeSignature::TypedByRef,
            ELEMENT_TYPE::PTR => TypeSignature::Ptr(Box::new(self.parse_type()?)),
            ELEMENT_TYPE::BYREF => TypeSignature::ByRef(Box::new(self.parse_type()?)),
            ELEMENT_TYPE::PINNED => TypeSignature::Pinned(Box::new(self.parse_type()?)),
            ELEMENT_TYPE::SZARRAY => TypeSignature::SzArray(Box::new(self.parse_type()?)),
            ELEMENT_TYPE::VALUETYPE => {
                TypeSignature::ValueType(self.parser.read_compressed_token()?)
            }
            ELEMENT_TYPE::CLASS => TypeSignature::Class(self.parser.read_compressed_token()?),
            ELEMENT_TYPE::VAR => TypeSignature::GenericParamType(self.parser.read_compressed_uint()?),
            ELEMENT_TYPE::MVAR => {
                TypeSignature::GenericParamMethod(self.parser.read_compressed_uint()?)
            }
            ELEMENT_TYPE::ARRAY => {
                let elem_type = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                // Sizes and lower bounds are not part of the type identity the engine compares
                let num_sizes = self.parser.read_compressed_uint()?;
                for _ in 0..num_sizes {
                    self.parser.read_compressed_uint()?;
                }
                let num_lo_bounds = self.parser.read_compressed_uint()?;
                for _ in 0..num_lo_bounds {
                    self.parser.read_compressed_int()?;
                }

                TypeSignature::Array(Box::new(elem_type), rank)
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;

                let mut type_args = Vec::with_capacity(arg_count.min(64) as usize);
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                TypeSignature::GenericInst(Box::new(base_type), type_args)
            }
            _ => {
                return Err(malformed_error!(
                    "Unsupported ELEMENT_TYPE - {}",
                    current_byte
                ))
            }
        };

        self.depth -= 1;
        Ok(parsed)
    }

    /// Parse a parameter (`return_type` counts as parameter)
    fn parse_param(&mut self) -> Result<SignatureParameter> {
        let mut by_ref = false;
        if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
            self.parser.advance()?;
            by_ref = true;
        }

        Ok(SignatureParameter {
            by_ref,
            base: self.parse_type()?,
        })
    }

    /// Parse a method signature from the blob - `MethodDefSig` or `MethodRefSig`
    ///
    /// # Errors
    /// Returns an error if the signature data is malformed or if reading beyond the buffer bounds.
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let convention_byte = self.parser.read_le::<u8>()?;
        if convention_byte & 0x0F != 0 {
            return Err(malformed_error!(
                "SignatureMethod - unsupported calling convention - {}",
                convention_byte
            ));
        }

        let generic_param_count = if convention_byte & SIGNATURE_HEADER::GENERIC != 0 {
            self.parser.read_compressed_uint()?
        } else {
            0
        };
        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_param()?;

        let mut params = Vec::with_capacity(param_count.min(64) as usize);
        for _ in 0..param_count {
            params.push(self.parse_param()?);
        }

        Ok(SignatureMethod {
            has_this: convention_byte & SIGNATURE_HEADER::HAS_THIS != 0,
            generic_param_count,
            return_type,
            params,
        })
    }

    /// Parse a field signature from the blob (II.23.2.4)
    ///
    /// # Errors
    /// Returns an error if the signature header is invalid or if the field type cannot be parsed.
    pub fn parse_field_signature(&mut self) -> Result<SignatureField> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        Ok(SignatureField {
            base: self.parse_type()?,
        })
    }

    /// Parse a local variable signature from the blob (II.23.2.6)
    ///
    /// # Errors
    /// Returns an error if the local variable signature header is invalid or if variable types cannot be parsed.
    pub fn parse_local_var_signature(&mut self) -> Result<SignatureLocalVariables> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "SignatureLocalVar - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;

        let mut locals = Vec::with_capacity(count.min(256) as usize);
        for _ in 0..count {
            let mut is_pinned = false;
            if self.parser.peek_byte()? == ELEMENT_TYPE::PINNED {
                self.parser.advance()?;
                is_pinned = true;
            }

            let mut is_byref = false;
            if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
                self.parser.advance()?;
                is_byref = true;
            }

            locals.push(SignatureLocalVariable {
                is_byref,
                is_pinned,
                base: self.parse_type()?,
            });
        }

        Ok(SignatureLocalVariables { locals })
    }

    /// Parse a type specification signature from the blob (II.23.2.14)
    ///
    /// # Errors
    /// Returns an error if the type specification cannot be parsed.
    pub fn parse_type_spec_signature(&mut self) -> Result<TypeSignature> {
        self.parse_type()
    }

    /// Parse a method specification signature from the blob (II.23.2.15)
    ///
    /// # Errors
    /// Returns an error if the method specification header is invalid or if the type arguments cannot be parsed.
    pub fn parse_method_spec_signature(&mut self) -> Result<SignatureMethodSpec> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::METHOD_SPEC {
            return Err(malformed_error!(
                "SignatureMethodSpec - invalid start - {}",
                head_byte
            ));
        }

        let arg_count = self.parser.read_compressed_uint()?;
        let mut generic_args = Vec::with_capacity(arg_count.min(64) as usize);
        for _ in 0..arg_count {
            generic_args.push(self.parse_type()?);
        }

        Ok(SignatureMethodSpec { generic_args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::Token, Error};

    #[test]
    fn test_parse_primitive_types() {
        let mut parser = SignatureParser::new(&[
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
            0x1C, 0x18, 0x19,
        ]);
        let expected = [
            TypeSignature::Void,
            TypeSignature::Boolean,
            TypeSignature::Char,
            TypeSignature::I1,
            TypeSignature::U1,
            TypeSignature::I2,
            TypeSignature::U2,
            TypeSignature::I4,
            TypeSignature::U4,
            TypeSignature::I8,
            TypeSignature::U8,
            TypeSignature::R4,
            TypeSignature::R8,
            TypeSignature::String,
            TypeSignature::Object,
            TypeSignature::I,
            TypeSignature::U,
        ];
        for sig in expected {
            assert_eq!(parser.parse_type().unwrap(), sig);
        }
    }

    #[test]
    fn test_parse_generic_instance() {
        // List<int> where List is TypeRef row 1
        let mut parser = SignatureParser::new(&[0x15, 0x12, 0x05, 0x01, 0x08]);
        assert_eq!(
            parser.parse_type_spec_signature().unwrap(),
            TypeSignature::GenericInst(
                Box::new(TypeSignature::Class(Token::new(0x0100_0001))),
                vec![TypeSignature::I4]
            )
        );

        let mut parser = SignatureParser::new(&[0x15, 0x08]);
        assert!(matches!(
            parser.parse_type_spec_signature(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_array_skips_bounds() {
        // int[,] with one size (3) and one lower bound (0)
        let mut parser = SignatureParser::new(&[0x14, 0x08, 0x02, 0x01, 0x03, 0x01, 0x00, 0x0E]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::Array(Box::new(TypeSignature::I4), 2)
        );
        assert_eq!(parser.parse_type().unwrap(), TypeSignature::String);
    }

    #[test]
    fn test_parse_generic_method_signature() {
        // static !!0 Echo<T>(!!0)
        let sig = SignatureParser::new(&[0x10, 0x01, 0x01, 0x1E, 0x00, 0x1E, 0x00])
            .parse_method_signature()
            .unwrap();
        assert!(!sig.has_this);
        assert_eq!(sig.generic_param_count, 1);
        assert_eq!(sig.return_type.base, TypeSignature::GenericParamMethod(0));
        assert_eq!(sig.params.len(), 1);
    }

    #[test]
    fn test_parse_locals() {
        let sig = SignatureParser::new(&[0x07, 0x03, 0x08, 0x45, 0x10, 0x08, 0x1D, 0x0E])
            .parse_local_var_signature()
            .unwrap();
        assert_eq!(sig.locals.len(), 3);
        assert!(sig.locals[1].is_pinned);
        assert!(sig.locals[1].is_byref);
        assert_eq!(
            sig.locals[2].base,
            TypeSignature::SzArray(Box::new(TypeSignature::String))
        );
    }

    #[test]
    fn test_error_handling() {
        assert!(SignatureParser::new(&[0x05, 0x08])
            .parse_field_signature()
            .is_err());
        assert!(SignatureParser::new(&[0x05, 0x00, 0x01])
            .parse_method_signature()
            .is_err());
        assert!(SignatureParser::new(&[0x0A, 0x02, 0x08])
            .parse_method_spec_signature()
            .is_err());

        let mut nested = vec![0x1D; 60];
        nested.push(0x08);
        assert!(matches!(
            SignatureParser::new(&nested).parse_type(),
            Err(Error::RecursionLimit(_))
        ));
    }
}
