//! Generic instantiation scanning and wrapper synthesis.
//!
//! Redirecting a generic function only redirects its shared definition; the runtime keeps
//! separately compiled instantiations that a hook on the definition never reaches. For every
//! patched generic function, [`scan`] collects the closed instantiations the baseline itself
//! uses, from two places:
//!
//! - `MethodSpec` rows instantiating the function (directly, or through a `MemberRef` on a
//!   generic instance of its owner),
//! - `MemberRef` rows naming the function on a generic instance of its owner.
//!
//! Argument tuples are canonicalized the way the runtime shares code: every reference type
//! collapses to `System.Object`, value types stay distinct. [`synthesize_wrappers`] then
//! emits one static, non-generic forwarding function per distinct tuple so the host can
//! hook each instantiation individually.

use std::collections::BTreeMap;

use crate::{
    metadata::{
        cache::LoadedModule,
        flags::TypeAttributes,
        image::{AttributeArg, CustomAttributeRow, ModuleBuilder, ModuleImage},
        signatures::{
            render_method_key, render_type, MemberSignature, SignatureMethod, SignatureParameter,
            TypeSignature,
        },
        token::{TableId, Token},
    },
    patch::plan::HookPlan,
    Error, Result,
};

/// Name of the synthesized type holding the wrappers.
pub const WRAPPER_TYPE: &str = "<HotPatch>GenericWrappers";
/// Marks a patched generic definition with its record index.
pub const METHOD_INDEX_ATTRIBUTE: &str = "HotPatch.GenericMethodIndexAttribute";
/// Marks a wrapper with its record index and type arguments.
pub const METHOD_WRAPPER_ATTRIBUTE: &str = "HotPatch.GenericMethodWrapperAttribute";

/// One closed argument tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instantiation {
    /// Owner type arguments followed by function type arguments, in baseline token space
    pub args: Vec<TypeSignature>,
    /// Rendered `args`
    pub names: Vec<String>,
}

/// Closed instantiations of one patched generic function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericInstantiationRecord {
    /// Full name of the function
    pub method: String,
    /// The function in the candidate
    pub candidate: Token,
    /// Generic parameters of the owner
    pub type_arity: usize,
    /// Generic parameters of the function
    pub method_arity: usize,
    /// Distinct tuples, ordered by rendered names
    pub instantiations: Vec<Instantiation>,
}

/// A synthesized forwarding function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperMethod {
    /// Index of the record the wrapper belongs to
    pub index: usize,
    /// Full name of the wrapped generic function
    pub method: String,
    /// The wrapper's `MethodDef`
    pub token: Token,
    /// Full name of the wrapper
    pub name: String,
    /// Rendered type arguments
    pub type_args: Vec<String>,
}

fn canonicalize(arg: &TypeSignature) -> TypeSignature {
    if arg.is_value_type() {
        arg.clone()
    } else {
        TypeSignature::Object
    }
}

/// Owner token of a generic instance, `Owner<args>`.
fn generic_instance(image: &ModuleImage, class: Token) -> Option<(Token, Vec<TypeSignature>)> {
    if !class.is_table(TableId::TypeSpec) {
        return None;
    }
    match &image.type_spec(class).ok()?.signature {
        TypeSignature::GenericInst(base, args) => match **base {
            TypeSignature::Class(owner) | TypeSignature::ValueType(owner) => {
                Some((owner, args.clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Type arguments under which `reference` names `owner::signature`.
fn member_ref_args(
    image: &ModuleImage,
    reference: Token,
    owner: Token,
    signature: &str,
) -> Result<Option<Vec<TypeSignature>>> {
    let row = image.member_ref(reference)?;
    let MemberSignature::Method(method) = &row.signature else {
        return Ok(None);
    };
    let Some((instance_owner, type_args)) = generic_instance(image, row.class) else {
        return Ok(None);
    };
    if instance_owner != owner || render_method_key(&row.name, method, image)? != signature {
        return Ok(None);
    }
    Ok(Some(type_args))
}

/// Collect the closed instantiations of every patched generic function in `plan`.
///
/// # Errors
/// Returns [`Error::ResolutionFailure`] if a baseline reference row dangles.
pub fn scan(
    baseline: &LoadedModule,
    candidate: &LoadedModule,
    plan: &HookPlan,
) -> Result<Vec<GenericInstantiationRecord>> {
    let image = &baseline.image;
    let mut records = Vec::new();

    for (full_name, entry) in plan {
        let old = &entry.baseline;
        let Some(owner) = baseline.index.get_type(&old.owner) else {
            continue;
        };
        let Some(replacement) = candidate.index.get_type(&entry.candidate.owner) else {
            continue;
        };
        let type_arity = candidate
            .image
            .type_def(replacement.token)?
            .generic_params
            .len();
        let method_arity = old.generic_arity as usize;
        if type_arity == 0 && method_arity == 0 {
            continue;
        }

        let mut tuples: Vec<Vec<TypeSignature>> = Vec::new();
        if method_arity > 0 {
            for (_, spec) in image.method_spec_tokens() {
                let type_args = if spec.method == old.token {
                    Some(Vec::new())
                } else if spec.method.is_table(TableId::MemberRef) {
                    member_ref_args(image, spec.method, owner.token, &old.signature)?
                } else {
                    None
                };
                if let Some(mut args) = type_args {
                    args.extend(spec.instantiation.generic_args.iter().cloned());
                    tuples.push(args);
                }
            }
        } else {
            for (reference, _) in image.member_ref_tokens() {
                if let Some(args) = member_ref_args(image, reference, owner.token, &old.signature)? {
                    tuples.push(args);
                }
            }
        }

        let mut distinct: BTreeMap<Vec<String>, Instantiation> = BTreeMap::new();
        for tuple in tuples {
            if tuple.len() != type_arity + method_arity || tuple.iter().any(TypeSignature::is_open)
            {
                continue;
            }
            let args: Vec<TypeSignature> = tuple.iter().map(canonicalize).collect();
            let names = args
                .iter()
                .map(|arg| render_type(arg, image))
                .collect::<Result<Vec<_>>>()?;
            distinct
                .entry(names.clone())
                .or_insert(Instantiation { args, names });
        }

        if distinct.is_empty() {
            log::debug!("No closed instantiation of {} in the baseline", full_name);
            continue;
        }
        records.push(GenericInstantiationRecord {
            method: full_name.clone(),
            candidate: entry.candidate.token,
            type_arity,
            method_arity,
            instantiations: distinct.into_values().collect(),
        });
    }

    Ok(records)
}

fn substitute(
    signature: &TypeSignature,
    type_args: &[TypeSignature],
    method_args: &[TypeSignature],
) -> TypeSignature {
    let inner = |sig: &TypeSignature| Box::new(substitute(sig, type_args, method_args));
    match signature {
        TypeSignature::GenericParamType(index) => type_args
            .get(*index as usize)
            .cloned()
            .unwrap_or_else(|| signature.clone()),
        TypeSignature::GenericParamMethod(index) => method_args
            .get(*index as usize)
            .cloned()
            .unwrap_or_else(|| signature.clone()),
        TypeSignature::Ptr(sig) => TypeSignature::Ptr(inner(sig)),
        TypeSignature::ByRef(sig) => TypeSignature::ByRef(inner(sig)),
        TypeSignature::SzArray(sig) => TypeSignature::SzArray(inner(sig)),
        TypeSignature::Pinned(sig) => TypeSignature::Pinned(inner(sig)),
        TypeSignature::Array(sig, rank) => TypeSignature::Array(inner(sig), *rank),
        TypeSignature::GenericInst(base, args) => TypeSignature::GenericInst(
            inner(base),
            args.iter()
                .map(|arg| substitute(arg, type_args, method_args))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Recreates baseline types inside the patch module as references.
struct Transplanter<'a> {
    baseline: &'a ModuleImage,
}

impl Transplanter<'_> {
    fn token(&self, builder: &mut ModuleBuilder, token: Token) -> Result<Token> {
        match token.table_id() {
            Some(TableId::TypeDef) => {
                let row = self.baseline.type_def(token)?;
                let scope = if row.enclosing.is_null() {
                    builder.assembly_ref(
                        &self.baseline.assembly.name,
                        self.baseline.assembly.version,
                    )
                } else {
                    self.token(builder, row.enclosing)?
                };
                Ok(builder.type_ref(scope, &row.namespace, &row.name))
            }
            Some(TableId::TypeRef) => {
                let row = self.baseline.type_ref(token)?;
                let scope = if row.scope.is_table(TableId::TypeRef) {
                    self.token(builder, row.scope)?
                } else {
                    let assembly = self.baseline.assembly_ref(row.scope)?;
                    builder.assembly_ref(&assembly.name, assembly.version)
                };
                Ok(builder.type_ref(scope, &row.namespace, &row.name))
            }
            _ => Err(Error::resolution(token, "cannot transplant into the patch module")),
        }
    }

    fn signature(&self, builder: &mut ModuleBuilder, signature: &TypeSignature) -> Result<TypeSignature> {
        signature.map_tokens(&mut |token| self.token(builder, token))
    }
}

fn wrapper_type(builder: &mut ModuleBuilder) -> Token {
    match builder.image().find_type_def(WRAPPER_TYPE) {
        Some(token) => token,
        None => builder
            .type_def("", WRAPPER_TYPE)
            .flags(TypeAttributes::ABSTRACT | TypeAttributes::SEALED)
            .build(),
    }
}

fn owner_instance(image: &ModuleImage, owner: Token, type_args: &[TypeSignature]) -> Result<TypeSignature> {
    let is_value_type = image.is_value_type_def(owner)?;
    let base = if is_value_type {
        TypeSignature::ValueType(owner)
    } else {
        TypeSignature::Class(owner)
    };

    let instance = if type_args.is_empty() {
        base
    } else {
        TypeSignature::GenericInst(Box::new(base), type_args.to_vec())
    };
    Ok(if is_value_type {
        TypeSignature::ByRef(Box::new(instance))
    } else {
        instance
    })
}

/// Emit one forwarding function per instantiation of every record.
///
/// `builder` must hold the rewritten candidate; `baseline` supplies the token space the
/// records' arguments live in. Wrappers and their markers are added once per tuple even if
/// called twice.
///
/// # Errors
/// Fails if a record names a function missing from the candidate, or an argument cannot be
/// transplanted.
pub fn synthesize_wrappers(
    builder: &mut ModuleBuilder,
    baseline: &ModuleImage,
    records: &[GenericInstantiationRecord],
) -> Result<Vec<WrapperMethod>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let transplant = Transplanter { baseline };
    let holder = wrapper_type(builder);
    let mut wrappers = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let target = builder.image().method(record.candidate)?.clone();
        let marker = CustomAttributeRow {
            parent: record.candidate,
            attribute_type: METHOD_INDEX_ATTRIBUTE.to_string(),
            args: vec![AttributeArg::I32(index as i32)],
        };
        if !builder.image().custom_attributes.contains(&marker) {
            builder.image_mut().add_custom_attribute(marker);
        }

        for (position, instantiation) in record.instantiations.iter().enumerate() {
            let args = instantiation
                .args
                .iter()
                .map(|arg| transplant.signature(builder, arg))
                .collect::<Result<Vec<_>>>()?;
            let (type_args, method_args) = args.split_at(record.type_arity.min(args.len()));

            let callee = if type_args.is_empty() {
                record.candidate
            } else {
                let instance = builder.type_spec(TypeSignature::GenericInst(
                    Box::new(TypeSignature::Class(target.parent)),
                    type_args.to_vec(),
                ));
                builder.member_ref(
                    instance,
                    &target.name,
                    MemberSignature::Method(target.signature.clone()),
                )
            };
            let callee = if method_args.is_empty() {
                callee
            } else {
                builder.method_spec(callee, method_args.to_vec())
            };

            let mut params = Vec::new();
            if target.signature.has_this {
                params.push(SignatureParameter::new(owner_instance(
                    builder.image(),
                    target.parent,
                    type_args,
                )?));
            }
            params.extend(target.signature.params.iter().map(|param| SignatureParameter {
                by_ref: param.by_ref,
                base: substitute(&param.base, type_args, method_args),
            }));
            let return_type = SignatureParameter {
                by_ref: target.signature.return_type.by_ref,
                base: substitute(&target.signature.return_type.base, type_args, method_args),
            };

            let name = format!("{}__w{}_{}", target.name.replace('`', "_"), index, position);
            let signature = SignatureMethod {
                has_this: false,
                generic_param_count: 0,
                return_type,
                params,
            };
            if let Some(existing) = builder
                .image()
                .methods_of(holder)
                .find(|(_, row)| row.name == name && row.signature == signature)
                .map(|(token, _)| token)
            {
                wrappers.push(WrapperMethod {
                    index,
                    method: record.method.clone(),
                    token: existing,
                    name: builder.image().member_name(existing)?,
                    type_args: instantiation.names.clone(),
                });
                continue;
            }

            let mut method = builder.method(holder, &name).public().static_method();
            method = match &signature.return_type {
                SignatureParameter { by_ref: false, base } => method.returns(base.clone()),
                SignatureParameter { by_ref: true, base } => {
                    method.returns(TypeSignature::ByRef(Box::new(base.clone())))
                }
            };
            for param in &signature.params {
                method = if param.by_ref {
                    method.param_by_ref(param.base.clone())
                } else {
                    method.param(param.base.clone())
                };
            }
            let arity = signature.params.len();
            let token = method
                .max_stack(arity.max(1) as u16)
                .code(|asm| {
                    for arg in 0..arity {
                        asm.ldarg(arg as u16)?;
                    }
                    asm.call(callee)?.ret()?;
                    Ok(())
                })
                .build()?;

            builder.image_mut().add_custom_attribute(CustomAttributeRow {
                parent: token,
                attribute_type: METHOD_WRAPPER_ATTRIBUTE.to_string(),
                args: vec![
                    AttributeArg::I32(index as i32),
                    AttributeArg::StringArray(instantiation.names.clone()),
                ],
            });

            let name = builder.image().member_name(token)?;
            log::debug!("Synthesized {}", name);
            wrappers.push(WrapperMethod {
                index,
                method: record.method.clone(),
                token,
                name,
                type_args: instantiation.names.clone(),
            });
        }
    }

    Ok(wrappers)
}
