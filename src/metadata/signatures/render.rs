//! Textual rendering of signatures.
//!
//! Rendered strings are the identity of types, fields and methods across two compiles of
//! the same source: tokens are resolved to names, so row renumbering between compiles does
//! not change them. Formats:
//!
//! | Entity | Format | Example |
//! |--------|--------|---------|
//! | type | full name, nested with `/` | `Game.Player/State` |
//! | field | `{type} {name}` | `System.Int32 hp` |
//! | method | ``{ret} {name}[`arity]({params})`` | ``!!0 Echo`1(!!0)`` |

use crate::{
    metadata::{
        signatures::{SignatureField, SignatureMethod, SignatureParameter, TypeSignature},
        token::Token,
    },
    Result,
};

/// Resolves `TypeDefOrRef` and `TypeSpec` tokens to display names.
pub trait TypeNames {
    /// Full name of the type behind `token`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailure`] for dangling tokens.
    fn type_name(&self, token: Token) -> Result<String>;
}

/// Render a type signature.
///
/// # Errors
/// Propagates resolution failures from `names`.
pub fn render_type(signature: &TypeSignature, names: &dyn TypeNames) -> Result<String> {
    Ok(match signature {
        TypeSignature::Void => "System.Void".to_string(),
        TypeSignature::Boolean => "System.Boolean".to_string(),
        TypeSignature::Char => "System.Char".to_string(),
        TypeSignature::I1 => "System.SByte".to_string(),
        TypeSignature::U1 => "System.Byte".to_string(),
        TypeSignature::I2 => "System.Int16".to_string(),
        TypeSignature::U2 => "System.UInt16".to_string(),
        TypeSignature::I4 => "System.Int32".to_string(),
        TypeSignature::U4 => "System.UInt32".to_string(),
        TypeSignature::I8 => "System.Int64".to_string(),
        TypeSignature::U8 => "System.UInt64".to_string(),
        TypeSignature::R4 => "System.Single".to_string(),
        TypeSignature::R8 => "System.Double".to_string(),
        TypeSignature::String => "System.String".to_string(),
        TypeSignature::Object => "System.Object".to_string(),
        TypeSignature::I => "System.IntPtr".to_string(),
        TypeSignature::U => "System.UIntPtr".to_string(),
        TypeSignature::TypedByRef => "System.TypedReference".to_string(),
        TypeSignature::Ptr(inner) => format!("{}*", render_type(inner, names)?),
        TypeSignature::ByRef(inner) => format!("{}&", render_type(inner, names)?),
        TypeSignature::Pinned(inner) => format!("{} pinned", render_type(inner, names)?),
        TypeSignature::SzArray(inner) => format!("{}[]", render_type(inner, names)?),
        TypeSignature::Array(inner, rank) => format!(
            "{}[{}]",
            render_type(inner, names)?,
            ",".repeat(rank.saturating_sub(1) as usize)
        ),
        TypeSignature::ValueType(token) | TypeSignature::Class(token) => {
            names.type_name(*token)?
        }
        TypeSignature::GenericParamType(index) => format!("!{index}"),
        TypeSignature::GenericParamMethod(index) => format!("!!{index}"),
        TypeSignature::GenericInst(base, args) => {
            let args = args
                .iter()
                .map(|arg| render_type(arg, names))
                .collect::<Result<Vec<_>>>()?;
            format!("{}<{}>", render_type(base, names)?, args.join(","))
        }
    })
}

fn render_parameter(parameter: &SignatureParameter, names: &dyn TypeNames) -> Result<String> {
    let base = render_type(&parameter.base, names)?;
    Ok(if parameter.by_ref {
        format!("{base}&")
    } else {
        base
    })
}

/// Render the parameter list of a method as individual type names.
///
/// # Errors
/// Propagates resolution failures from `names`.
pub fn render_params(signature: &SignatureMethod, names: &dyn TypeNames) -> Result<Vec<String>> {
    signature
        .params
        .iter()
        .map(|param| render_parameter(param, names))
        .collect()
}

/// Render the return type of a method.
///
/// # Errors
/// Propagates resolution failures from `names`.
pub fn render_return(signature: &SignatureMethod, names: &dyn TypeNames) -> Result<String> {
    render_parameter(&signature.return_type, names)
}

/// Render the signature key of a method.
///
/// # Errors
/// Propagates resolution failures from `names`.
pub fn render_method_key(
    name: &str,
    signature: &SignatureMethod,
    names: &dyn TypeNames,
) -> Result<String> {
    let ret = render_return(signature, names)?;
    let params = render_params(signature, names)?.join(",");
    Ok(if signature.generic_param_count > 0 {
        format!("{ret} {name}`{}({params})", signature.generic_param_count)
    } else {
        format!("{ret} {name}({params})")
    })
}

/// Render the signature key of a field.
///
/// # Errors
/// Propagates resolution failures from `names`.
pub fn render_field_key(
    name: &str,
    signature: &SignatureField,
    names: &dyn TypeNames,
) -> Result<String> {
    Ok(format!("{} {name}", render_type(&signature.base, names)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    struct Names;

    impl TypeNames for Names {
        fn type_name(&self, token: Token) -> Result<String> {
            match token.value() {
                0x0100_0001 => Ok("System.Collections.Generic.List`1".into()),
                0x0200_0002 => Ok("Game.Player".into()),
                _ => Err(Error::resolution(token, "unknown type")),
            }
        }
    }

    #[test]
    fn test_render_nested_shapes() {
        let sig = TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(Token::new(0x0100_0001))),
            vec![TypeSignature::SzArray(Box::new(TypeSignature::Class(
                Token::new(0x0200_0002),
            )))],
        );
        assert_eq!(
            render_type(&sig, &Names).unwrap(),
            "System.Collections.Generic.List`1<Game.Player[]>"
        );
        assert_eq!(
            render_type(&TypeSignature::Array(Box::new(TypeSignature::I4), 3), &Names).unwrap(),
            "System.Int32[,,]"
        );
    }

    #[test]
    fn test_render_method_keys() {
        let plain = SignatureMethod {
            has_this: true,
            generic_param_count: 0,
            return_type: SignatureParameter::new(TypeSignature::I4),
            params: vec![],
        };
        assert_eq!(
            render_method_key("M", &plain, &Names).unwrap(),
            "System.Int32 M()"
        );

        let generic = SignatureMethod {
            has_this: false,
            generic_param_count: 1,
            return_type: SignatureParameter::new(TypeSignature::GenericParamMethod(0)),
            params: vec![
                SignatureParameter::new(TypeSignature::GenericParamMethod(0)),
                SignatureParameter {
                    by_ref: true,
                    base: TypeSignature::Boolean,
                },
            ],
        };
        assert_eq!(
            render_method_key("Echo", &generic, &Names).unwrap(),
            "!!0 Echo`1(!!0,System.Boolean&)"
        );
    }

    #[test]
    fn test_render_unresolved() {
        let field = SignatureField {
            base: TypeSignature::Class(Token::new(0x0200_0009)),
        };
        assert!(matches!(
            render_field_key("x", &field, &Names),
            Err(Error::ResolutionFailure { .. })
        ));
    }
}
